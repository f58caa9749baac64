//! Dataspace Transfer - Transfer Process Control Plane
//!
//! The connector-side state machine that negotiates and tracks asset
//! transfers with counterparty connectors, built around a lease-based store
//! so many workers can drive the same processes safely.
//!
//! # Modules
//!
//! - [`types`] - Core type definitions (TransferProcessId, DataAddress, etc.)
//! - [`state`] - The 14-state transfer graph and its legal edges
//! - [`process`] - The TransferProcess entity
//! - [`messages`] - Counterparty protocol messages
//! - [`error`] - Store and service error taxonomy
//! - [`store`] - Lease-aware persistence contract + in-memory implementation
//! - [`spi`] - Collaborator interfaces (dispatcher, provisioner, vault, ...)
//! - [`events`] - Listener hooks and the process observable
//! - [`retry`] - Retry budget and backoff gating
//! - [`driver`] - The polling state-machine driver
//! - [`manager`] - Outbound orchestrator (consumer and provider paths)
//! - [`protocol`] - Inbound counterparty notification handling
//! - [`testing`] - Scriptable stub collaborators

// Core types - must be first!
pub mod types;

// State machine foundations
pub mod process;
pub mod state;

// Control plane components
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod messages;
pub mod protocol;
pub mod retry;
pub mod spi;
pub mod store;
pub mod testing;

// Convenient re-exports at crate root
pub use config::{AppConfig, TransferConfig};
pub use driver::{DriverConfig, ExponentialWaitStrategy, ProcessorDelegate, StateMachineDriver};
pub use error::{ServiceError, ServiceResult, StoreError};
pub use events::{TransferProcessListener, TransferProcessObservable};
pub use manager::{ManagerDependencies, TransferProcessManager};
pub use messages::{
    RemoteMessage, TransferCompletionMessage, TransferProcessAck, TransferRequestMessage,
    TransferStartMessage, TransferSuspensionMessage, TransferTerminationMessage,
};
pub use process::TransferProcess;
pub use protocol::{ProtocolDependencies, TransferProcessProtocolService};
pub use retry::{FailureDisposition, RetryPolicy};
pub use spi::{
    ContractValidationService, DispatchResult, PolicyArchive, ProtocolTokenValidator,
    ProvisionManager, RemoteMessageDispatcher, ResourceManifestGenerator, TransferStatusChecker,
    Vault,
};
pub use state::TransferProcessState;
pub use store::{InMemoryTransferProcessStore, ProcessFilter, TransferProcessStore};
pub use types::{
    DataAddress, ProcessType, TokenRepresentation, TransferProcessId, TransferRequest,
};

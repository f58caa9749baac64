//! Collaborator Interfaces
//!
//! Everything this core consumes but does not implement: remote dispatch,
//! provisioning, policy and agreement resolution, token validation, secret
//! storage, and completion checking. All are object-safe async traits wired
//! in at construction; there is no registry or container behind them.

use async_trait::async_trait;

use crate::error::ServiceResult;
use crate::messages::{RemoteMessage, TransferProcessAck};
use crate::process::TransferProcess;
use crate::types::{
    ClaimToken, ContractAgreement, Policy, ProvisionedResource, ResourceDefinition,
    ResourceManifest, TokenRepresentation,
};

/// Outcome of one outbound dispatch.
///
/// `Retry` covers transient transport failures (the retry engine budgets
/// them); `Fatal` is an explicit rejection by the remote side and drives an
/// immediate terminal transition.
#[derive(Debug, Clone)]
pub enum DispatchResult {
    Delivered(TransferProcessAck),
    Retry(String),
    Fatal(String),
}

/// Sends one protocol message to the counterparty connector.
///
/// Per-call timeouts are the dispatcher's concern, but a timeout must
/// surface here as `Retry`, never hang the caller unbounded.
#[async_trait]
pub trait RemoteMessageDispatcher: Send + Sync {
    async fn dispatch(&self, message: RemoteMessage) -> DispatchResult;
}

/// Per-resource provisioning outcome
#[derive(Debug, Clone)]
pub enum ProvisionOutcome {
    Provisioned(ProvisionedResource),
    Retry(String),
    Fatal(String),
}

#[derive(Debug, Clone)]
pub struct ProvisionResponse {
    pub definition_id: String,
    pub outcome: ProvisionOutcome,
}

/// Per-resource deprovisioning outcome
#[derive(Debug, Clone)]
pub enum DeprovisionOutcome {
    Released,
    Retry(String),
    Fatal(String),
}

#[derive(Debug, Clone)]
pub struct DeprovisionResponse {
    pub definition_id: String,
    pub outcome: DeprovisionOutcome,
}

/// Provisions and releases the resources a transfer needs
#[async_trait]
pub trait ProvisionManager: Send + Sync {
    async fn provision(
        &self,
        resources: &[ResourceDefinition],
        policy: &Policy,
    ) -> Vec<ProvisionResponse>;

    async fn deprovision(
        &self,
        resources: &[ProvisionedResource],
        policy: &Policy,
    ) -> Vec<DeprovisionResponse>;
}

/// Builds the resource manifest for a transfer under a policy
#[async_trait]
pub trait ResourceManifestGenerator: Send + Sync {
    /// A policy-incompatible request fails with `BadRequest` (fatal)
    async fn generate(
        &self,
        process: &TransferProcess,
        policy: &Policy,
    ) -> ServiceResult<ResourceManifest>;
}

/// Resolves the policy snapshot fixed at contract negotiation
#[async_trait]
pub trait PolicyArchive: Send + Sync {
    async fn find_policy_for_contract(&self, contract_id: &str) -> Option<Policy>;
}

/// Agreement resolution and counterparty standing checks
#[async_trait]
pub trait ContractValidationService: Send + Sync {
    /// Resolve the agreement for a contract id, scoped to the calling
    /// participant. Any failure maps to `NotFound` upstream.
    async fn validate_agreement(
        &self,
        participant_id: &str,
        contract_id: &str,
    ) -> ServiceResult<ContractAgreement>;

    /// Check the counterparty's standing against the agreement
    async fn validate_request(
        &self,
        participant_id: &str,
        agreement: &ContractAgreement,
    ) -> ServiceResult<()>;
}

/// Verifies a bearer token against an agreement's policy
#[async_trait]
pub trait ProtocolTokenValidator: Send + Sync {
    async fn verify(
        &self,
        token: &TokenRepresentation,
        policy: &Policy,
    ) -> ServiceResult<ClaimToken>;
}

/// Secret storage; addresses reference secrets by key name, never inline
#[async_trait]
pub trait Vault: Send + Sync {
    async fn store_secret(&self, key: &str, value: &str) -> ServiceResult<()>;
    async fn resolve_secret(&self, key: &str) -> Option<String>;
    async fn delete_secret(&self, key: &str) -> ServiceResult<()>;
}

/// Detects completion of a started transfer (consumer side).
///
/// Checkers are registered per `transfer_type` in the manager's
/// configuration; a transfer type without a checker never self-completes.
#[async_trait]
pub trait TransferStatusChecker: Send + Sync {
    async fn is_complete(&self, process: &TransferProcess) -> ServiceResult<bool>;
}

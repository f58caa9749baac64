//! Transfer Process Store
//!
//! Lease-aware persistence contract. The store is the sole unit of mutual
//! exclusion in the system: every mutation of a process happens under a
//! lease, and `save` always releases the caller's lease, even when nothing
//! changed (defensive unlock). Leases expire after a store-defined timeout so
//! a crashed worker's processes become eligible for pickup again.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::process::TransferProcess;
use crate::state::TransferProcessState;
use crate::types::{ProcessType, TransferProcessId};

pub mod memory;

pub use memory::InMemoryTransferProcessStore;

/// Selection criteria for driver pickup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessFilter {
    pub state: TransferProcessState,
    /// `None` matches both consumer and provider processes
    pub process_type: Option<ProcessType>,
}

impl ProcessFilter {
    pub fn state(state: TransferProcessState) -> Self {
        Self {
            state,
            process_type: None,
        }
    }

    pub fn state_and_type(state: TransferProcessState, process_type: ProcessType) -> Self {
        Self {
            state,
            process_type: Some(process_type),
        }
    }

    pub fn matches(&self, process: &TransferProcess) -> bool {
        process.state == self.state
            && self
                .process_type
                .is_none_or(|t| process.process_type == t)
            && !process.pending
    }
}

/// Lease-aware persistence for transfer processes
#[async_trait]
pub trait TransferProcessStore: Send + Sync {
    /// Look up by local id, without leasing
    async fn find_by_id(
        &self,
        id: TransferProcessId,
    ) -> Result<Option<TransferProcess>, StoreError>;

    /// Look up by the counterparty's id for this transfer, without leasing
    async fn find_for_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<TransferProcess>, StoreError>;

    /// Lease one specific process for exclusive mutation.
    ///
    /// Fails with [`StoreError::NotFound`] for an unknown id and
    /// [`StoreError::LeaseConflict`] when another worker holds an unexpired
    /// lease.
    async fn find_by_id_and_lease(
        &self,
        id: TransferProcessId,
    ) -> Result<TransferProcess, StoreError>;

    /// Atomically lease and return up to `batch` unleased, non-pending
    /// processes matching the filter, oldest `updated_at` first.
    async fn next_not_leased(
        &self,
        batch: usize,
        filter: &ProcessFilter,
    ) -> Result<Vec<TransferProcess>, StoreError>;

    /// Persist the process and release any lease held by this caller,
    /// regardless of whether the state changed.
    async fn save(&self, process: TransferProcess) -> Result<(), StoreError>;
}

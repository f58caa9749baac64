//! In-Memory Store
//!
//! DashMap-backed implementation of the lease contract, used by tests and by
//! embedders that do not need durable persistence. Lease exclusivity is
//! enforced through DashMap's per-entry locking: two workers racing
//! `next_not_leased` can never both win the same process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::StoreError;
use crate::process::TransferProcess;
use crate::store::{ProcessFilter, TransferProcessStore};
use crate::types::TransferProcessId;

const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    expires_at: i64,
}

impl Lease {
    fn expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[derive(Default)]
struct Inner {
    processes: DashMap<TransferProcessId, TransferProcess>,
    /// correlation id -> local process id
    correlations: DashMap<String, TransferProcessId>,
    leases: DashMap<TransferProcessId, Lease>,
}

/// In-memory, lease-aware transfer process store.
///
/// Cloning shares the underlying maps; [`for_worker`](Self::for_worker)
/// produces a handle with a different lease-holder identity over the same
/// data, which is how multi-worker setups (and tests) share one store.
#[derive(Clone)]
pub struct InMemoryTransferProcessStore {
    inner: Arc<Inner>,
    holder: String,
    lease_duration: Duration,
}

impl InMemoryTransferProcessStore {
    pub fn new(holder: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            holder: holder.into(),
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    /// A handle for another worker over the same shared data
    pub fn for_worker(&self, holder: impl Into<String>) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            holder: holder.into(),
            lease_duration: self.lease_duration,
        }
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Attempt to acquire (or renew) the lease. Returns false when another
    /// worker holds an unexpired lease.
    fn try_lease(&self, id: TransferProcessId) -> bool {
        let now = Self::now_millis();
        let lease = Lease {
            holder: self.holder.clone(),
            expires_at: now + self.lease_duration.as_millis() as i64,
        };
        match self.inner.leases.entry(id) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if !current.expired(now) && current.holder != self.holder {
                    return false;
                }
                entry.insert(lease);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(lease);
                true
            }
        }
    }

    /// Release only if this handle is the current holder
    fn release_lease(&self, id: TransferProcessId) {
        self.inner
            .leases
            .remove_if(&id, |_, lease| lease.holder == self.holder);
    }

    fn leased_by_other(&self, id: TransferProcessId) -> bool {
        let now = Self::now_millis();
        self.inner
            .leases
            .get(&id)
            .map(|l| !l.expired(now) && l.holder != self.holder)
            .unwrap_or(false)
    }
}

#[async_trait]
impl TransferProcessStore for InMemoryTransferProcessStore {
    async fn find_by_id(
        &self,
        id: TransferProcessId,
    ) -> Result<Option<TransferProcess>, StoreError> {
        Ok(self.inner.processes.get(&id).map(|p| p.clone()))
    }

    async fn find_for_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<TransferProcess>, StoreError> {
        let Some(id) = self.inner.correlations.get(correlation_id).map(|r| *r) else {
            return Ok(None);
        };
        self.find_by_id(id).await
    }

    async fn find_by_id_and_lease(
        &self,
        id: TransferProcessId,
    ) -> Result<TransferProcess, StoreError> {
        if !self.inner.processes.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        if !self.try_lease(id) {
            return Err(StoreError::LeaseConflict(id));
        }
        // Read under lease; a snapshot taken before the lease could miss a
        // concurrent save and resurrect overwritten state
        match self.inner.processes.get(&id).map(|p| p.clone()) {
            Some(process) => Ok(process),
            None => {
                self.release_lease(id);
                Err(StoreError::NotFound)
            }
        }
    }

    async fn next_not_leased(
        &self,
        batch: usize,
        filter: &ProcessFilter,
    ) -> Result<Vec<TransferProcess>, StoreError> {
        let now = Self::now_millis();

        // Candidate ids sorted oldest-first; leasing happens per entry below,
        // so a concurrent worker scanning the same snapshot loses the race on
        // the lease map, not here.
        let mut candidates: Vec<(i64, TransferProcessId)> = self
            .inner
            .processes
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .filter(|entry| {
                self.inner
                    .leases
                    .get(entry.key())
                    .map(|l| l.expired(now))
                    .unwrap_or(true)
            })
            .map(|entry| (entry.value().updated_at, *entry.key()))
            .collect();
        candidates.sort_unstable();

        let mut leased = Vec::new();
        for (_, id) in candidates {
            if leased.len() >= batch {
                break;
            }
            if !self.try_lease(id) {
                continue;
            }
            // Re-read under lease; the row may have changed since the scan
            match self.inner.processes.get(&id) {
                Some(process) if filter.matches(process.value()) => {
                    leased.push(process.clone());
                }
                _ => self.release_lease(id),
            }
        }
        Ok(leased)
    }

    async fn save(&self, process: TransferProcess) -> Result<(), StoreError> {
        let id = process.id;
        if self.leased_by_other(id) {
            return Err(StoreError::LeaseConflict(id));
        }
        self.inner
            .correlations
            .insert(process.correlation_id.clone(), id);
        self.inner.processes.insert(id, process);
        self.release_lease(id);
        Ok(())
    }
}

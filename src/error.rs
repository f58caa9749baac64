//! Error Taxonomy
//!
//! Domain outcomes are always returned as typed results, never thrown across
//! a public operation. The one exception is an illegal state transition,
//! which is a programming invariant and panics loudly in the entity.

use thiserror::Error;

use crate::types::TransferProcessId;

/// Store-level failures, including the lease contract outcomes
#[derive(Debug, Error)]
pub enum StoreError {
    /// The id (or correlation id) is unknown
    #[error("transfer process not found")]
    NotFound,

    /// Another worker currently holds the lease
    #[error("transfer process {0} is leased by another worker")]
    LeaseConflict(TransferProcessId),

    /// Backend failure (connection, serialization, ...)
    #[error("store error: {0}")]
    Internal(String),
}

/// Domain-level failure kinds exposed by every public operation.
///
/// Transport controllers map these to their own failure codes; the mapping
/// is total because every operation returns exactly one of these kinds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Malformed input (bad manifest, invalid destination address). Terminal.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Counterparty/agreement validation failed, or the message is illegal
    /// for the process's current state. Terminal for that message.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown process, unknown agreement, or failed auth. Deliberately
    /// detail-free so callers cannot learn whether the transfer exists.
    #[error("not found")]
    NotFound,

    /// Transient failure; safe to retry under the retry policy
    #[error("recoverable failure: {0}")]
    Retry(String),

    /// Explicit rejection or unrecoverable precondition; never retried
    #[error("fatal failure: {0}")]
    Fatal(String),
}

/// Result alias for every exposed operation
pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServiceError::NotFound,
            StoreError::LeaseConflict(id) => {
                ServiceError::Conflict(format!("process {id} is leased by another worker"))
            }
            StoreError::Internal(msg) => ServiceError::Retry(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        assert_eq!(
            ServiceError::from(StoreError::NotFound),
            ServiceError::NotFound
        );

        let id = TransferProcessId::new();
        assert!(matches!(
            ServiceError::from(StoreError::LeaseConflict(id)),
            ServiceError::Conflict(_)
        ));

        assert!(matches!(
            ServiceError::from(StoreError::Internal("timeout".into())),
            ServiceError::Retry(_)
        ));
    }

    #[test]
    fn test_not_found_is_detail_free() {
        assert_eq!(ServiceError::NotFound.to_string(), "not found");
    }
}

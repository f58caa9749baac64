//! Transfer Process State Definitions
//!
//! State codes are stable `i16` values so stores can persist them as SMALLINT.
//! Terminal states: COMPLETED (800), TERMINATED (850), DEPROVISIONED (950).
//! COMPLETED and TERMINATED still admit the explicit DEPROVISIONING edge for
//! resource cleanup; DEPROVISIONED admits nothing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transfer process states
///
/// The graph is asymmetric between consumer and provider: a consumer walks
/// INITIAL -> PROVISIONING -> PROVISIONED -> REQUESTING -> REQUESTED and then
/// waits for the provider's start message, while a provider enters directly
/// at REQUESTED (created by the inbound request) and walks PROVISIONING ->
/// PROVISIONED -> STARTING -> STARTED. Which party may take a given edge is
/// enforced by the orchestrators; this table only encodes edge legality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TransferProcessState {
    /// Created locally, nothing executed yet (consumer entry point)
    Initial = 100,

    /// Resource manifest generated, provisioning in flight (retried)
    Provisioning = 200,

    /// All manifest resources provisioned
    Provisioned = 300,

    /// Outbound TransferRequestMessage in flight (consumer, retried)
    Requesting = 400,

    /// Request acknowledged by the provider; also the provider's entry
    /// point when it accepts an inbound TransferRequestMessage
    Requested = 500,

    /// Data flow being established, TransferStartMessage in flight (provider)
    Starting = 550,

    /// Data is flowing
    Started = 600,

    /// Flow paused by a TransferSuspensionMessage
    Suspended = 700,

    /// Completion detected, TransferCompletionMessage in flight (retried)
    Completing = 750,

    /// Terminal: transfer finished successfully
    Completed = 800,

    /// TransferTerminationMessage in flight (retried)
    Terminating = 825,

    /// Terminal: transfer ended, by failure or by request
    Terminated = 850,

    /// Resource cleanup in flight (retried, advances even on exhaustion)
    Deprovisioning = 900,

    /// Terminal: resources released
    Deprovisioned = 950,
}

impl TransferProcessState {
    /// Check if this is a terminal state (the driver never advances it)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferProcessState::Completed
                | TransferProcessState::Terminated
                | TransferProcessState::Deprovisioned
        )
    }

    /// Legal outgoing edges from this state.
    ///
    /// Self-edges mark retryable states: re-entering the same state is how a
    /// recoverable failure is recorded (the entity bumps `state_count`).
    pub fn can_transition_to(&self, next: TransferProcessState) -> bool {
        use TransferProcessState::*;
        match self {
            Initial => matches!(next, Provisioning | Terminating | Terminated),
            Provisioning => matches!(next, Provisioning | Provisioned | Terminating | Terminated),
            Provisioned => matches!(next, Requesting | Starting | Terminating | Terminated),
            Requesting => matches!(next, Requesting | Requested | Terminating | Terminated),
            // Provider entry path provisions from REQUESTED; a consumer in
            // REQUESTED only moves on an inbound start message.
            Requested => matches!(next, Provisioning | Started | Terminating | Terminated),
            Starting => matches!(next, Starting | Started | Terminating | Terminated),
            Started => matches!(
                next,
                Suspended | Completing | Completed | Terminating | Terminated
            ),
            // Provider resumes through STARTING; a consumer observes the
            // resume as an inbound start (STARTED).
            Suspended => matches!(next, Starting | Started | Terminating | Terminated),
            Completing => matches!(next, Completing | Completed | Terminating | Terminated),
            Completed => matches!(next, Deprovisioning),
            Terminating => matches!(next, Terminating | Terminated),
            Terminated => matches!(next, Deprovisioning),
            // Cleanup can still be cut short by either party's termination
            Deprovisioning => {
                matches!(next, Deprovisioning | Terminating | Terminated | Deprovisioned)
            }
            Deprovisioned => false,
        }
    }

    /// Get the numeric state code for persistence
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from a persisted state code
    pub fn from_id(id: i16) -> Option<Self> {
        use TransferProcessState::*;
        match id {
            100 => Some(Initial),
            200 => Some(Provisioning),
            300 => Some(Provisioned),
            400 => Some(Requesting),
            500 => Some(Requested),
            550 => Some(Starting),
            600 => Some(Started),
            700 => Some(Suspended),
            750 => Some(Completing),
            800 => Some(Completed),
            825 => Some(Terminating),
            850 => Some(Terminated),
            900 => Some(Deprovisioning),
            950 => Some(Deprovisioned),
            _ => None,
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        use TransferProcessState::*;
        match self {
            Initial => "INITIAL",
            Provisioning => "PROVISIONING",
            Provisioned => "PROVISIONED",
            Requesting => "REQUESTING",
            Requested => "REQUESTED",
            Starting => "STARTING",
            Started => "STARTED",
            Suspended => "SUSPENDED",
            Completing => "COMPLETING",
            Completed => "COMPLETED",
            Terminating => "TERMINATING",
            Terminated => "TERMINATED",
            Deprovisioning => "DEPROVISIONING",
            Deprovisioned => "DEPROVISIONED",
        }
    }
}

impl fmt::Display for TransferProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferProcessState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferProcessState::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransferProcessState::*;

    const ALL: [TransferProcessState; 14] = [
        Initial,
        Provisioning,
        Provisioned,
        Requesting,
        Requested,
        Starting,
        Started,
        Suspended,
        Completing,
        Completed,
        Terminating,
        Terminated,
        Deprovisioning,
        Deprovisioned,
    ];

    #[test]
    fn test_terminal_states() {
        assert!(Completed.is_terminal());
        assert!(Terminated.is_terminal());
        assert!(Deprovisioned.is_terminal());

        for state in [
            Initial,
            Provisioning,
            Provisioned,
            Requesting,
            Requested,
            Starting,
            Started,
            Suspended,
            Completing,
            Terminating,
            Deprovisioning,
        ] {
            assert!(!state.is_terminal(), "{state} should not be terminal");
        }
    }

    #[test]
    fn test_state_id_roundtrip() {
        for state in ALL {
            let id = state.id();
            let recovered = TransferProcessState::from_id(id).unwrap();
            assert_eq!(state, recovered);
        }
    }

    #[test]
    fn test_invalid_state_id() {
        assert!(TransferProcessState::from_id(0).is_none());
        assert!(TransferProcessState::from_id(999).is_none());
        assert!(TransferProcessState::from_id(-100).is_none());
    }

    #[test]
    fn test_every_non_terminal_state_can_terminate() {
        for state in ALL {
            if state.is_terminal() {
                continue;
            }
            assert!(
                state.can_transition_to(Terminating) || state.can_transition_to(Terminated),
                "{state} must have a termination edge"
            );
        }
    }

    #[test]
    fn test_happy_path_edges() {
        // Consumer path
        assert!(Initial.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Provisioned));
        assert!(Provisioned.can_transition_to(Requesting));
        assert!(Requesting.can_transition_to(Requested));
        assert!(Requested.can_transition_to(Started));
        assert!(Started.can_transition_to(Completing));
        assert!(Completing.can_transition_to(Completed));

        // Provider path: created at REQUESTED by the inbound request
        assert!(Requested.can_transition_to(Provisioning));
        assert!(Provisioned.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Started));

        // Cleanup
        assert!(Completed.can_transition_to(Deprovisioning));
        assert!(Terminated.can_transition_to(Deprovisioning));
        assert!(Deprovisioning.can_transition_to(Deprovisioned));
    }

    #[test]
    fn test_suspension_edges() {
        assert!(Started.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Starting));
        assert!(Suspended.can_transition_to(Started));
        assert!(!Suspended.can_transition_to(Completing));
    }

    #[test]
    fn test_illegal_edges() {
        assert!(!Initial.can_transition_to(Started));
        assert!(!Requested.can_transition_to(Requesting));
        assert!(!Completed.can_transition_to(Started));
        assert!(!Deprovisioned.can_transition_to(Deprovisioning));
        assert!(!Terminated.can_transition_to(Terminating));
    }

    #[test]
    fn test_deprovisioning_can_still_terminate() {
        assert!(Deprovisioning.can_transition_to(Terminating));
        assert!(Deprovisioning.can_transition_to(Terminated));
        assert!(!Deprovisioning.can_transition_to(Started));
    }

    #[test]
    fn test_retryable_self_edges() {
        for state in [
            Provisioning,
            Requesting,
            Starting,
            Completing,
            Terminating,
            Deprovisioning,
        ] {
            assert!(state.can_transition_to(state), "{state} must be retryable");
        }
        assert!(!Initial.can_transition_to(Initial));
        assert!(!Started.can_transition_to(Started));
    }

    #[test]
    fn test_display() {
        assert_eq!(Initial.to_string(), "INITIAL");
        assert_eq!(Completing.to_string(), "COMPLETING");
        assert_eq!(Deprovisioned.to_string(), "DEPROVISIONED");
    }
}

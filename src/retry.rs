//! Retry Engine
//!
//! Budgets recoverable failures per state and computes the exponential
//! backoff that gates driver re-selection. The delay is never slept on a
//! worker thread: a process in backoff is simply skipped (lease broken)
//! until enough wall time has passed since its last attempt.

use std::time::Duration;

use rand::Rng;

use crate::process::TransferProcess;

/// Exponential backoff with a bounded retry budget
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Consecutive recoverable failures tolerated before escalation
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// How the manager should route a recoverable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Budget remains: stay in state, re-select after the backoff delay
    Retry,
    /// Budget exhausted: escalate to the terminal path, exactly once
    Exhausted,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Deterministic backoff for the nth consecutive failure
    pub fn base_delay_for(&self, state_count: u32) -> Duration {
        let exp = state_count.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1u32 << exp);
        raw.min(self.max_delay)
    }

    /// Backoff with ±10% jitter, to spread re-selection across workers
    pub fn delay_for(&self, state_count: u32) -> Duration {
        let base = self.base_delay_for(state_count);
        let factor = rand::thread_rng().gen_range(0.9..=1.1);
        base.mul_f64(factor)
    }

    /// Strictly more consecutive failures than the budget allows
    pub fn is_exhausted(&self, state_count: u32) -> bool {
        state_count > self.max_retries
    }

    /// True while the process's backoff since its last attempt has not yet
    /// elapsed; the driver-side gate against hot retry loops
    pub fn in_backoff(&self, process: &TransferProcess, now_millis: i64) -> bool {
        if process.state_count == 0 {
            return false;
        }
        let delay = self.base_delay_for(process.state_count).as_millis() as i64;
        now_millis < process.updated_at + delay
    }

    /// Record one recoverable failure on the entity and classify it.
    ///
    /// The bump and the exhaustion check happen together so escalation fires
    /// in the same iteration that crosses the budget, exactly once (the
    /// escalating transition resets `state_count`).
    pub fn on_failure(&self, process: &mut TransferProcess) -> FailureDisposition {
        process.retry_failed();
        if self.is_exhausted(process.state_count) {
            FailureDisposition::Exhausted
        } else {
            FailureDisposition::Retry
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataAddress, TransferRequest};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(100), Duration::from_secs(1))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.base_delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay_for(4), Duration::from_millis(800));
        // Capped at max_delay
        assert_eq!(policy.base_delay_for(5), Duration::from_secs(1));
        assert_eq!(policy.base_delay_for(30), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = policy();
        for _ in 0..100 {
            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_millis(180), "{delay:?}");
            assert!(delay <= Duration::from_millis(220), "{delay:?}");
        }
    }

    #[test]
    fn test_exhaustion_boundary() {
        let policy = policy();
        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(1));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }

    #[test]
    fn test_on_failure_escalates_exactly_at_budget() {
        let policy = policy();
        let mut process = TransferProcess::new_consumer(&TransferRequest {
            id: "ext".into(),
            contract_id: "c1".into(),
            asset_id: "a1".into(),
            transfer_type: "HttpData-PULL".into(),
            protocol: "dsp".into(),
            counter_party_address: "https://provider".into(),
            data_destination: DataAddress::new("HttpData"),
        });
        process.transition_provisioning(Default::default());

        assert_eq!(policy.on_failure(&mut process), FailureDisposition::Retry);
        assert_eq!(policy.on_failure(&mut process), FailureDisposition::Retry);
        // max_retries + 1 = third consecutive failure escalates
        assert_eq!(
            policy.on_failure(&mut process),
            FailureDisposition::Exhausted
        );
    }

    #[test]
    fn test_in_backoff_gate() {
        let policy = policy();
        let mut process = TransferProcess::new_consumer(&TransferRequest {
            id: "ext".into(),
            contract_id: "c1".into(),
            asset_id: "a1".into(),
            transfer_type: "HttpData-PULL".into(),
            protocol: "dsp".into(),
            counter_party_address: "https://provider".into(),
            data_destination: DataAddress::new("HttpData"),
        });
        process.transition_provisioning(Default::default());

        // No failures yet: never gated
        assert!(!policy.in_backoff(&process, process.updated_at));

        process.retry_failed();
        let just_failed = process.updated_at;
        assert!(policy.in_backoff(&process, just_failed));
        assert!(policy.in_backoff(&process, just_failed + 99));
        assert!(!policy.in_backoff(&process, just_failed + 100));
    }
}

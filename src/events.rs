//! Lifecycle Events
//!
//! Fire-and-forget notification of transfer lifecycle transitions. Listeners
//! are held in an explicit list and invoked in registration order, so test
//! assertions over event sequences are deterministic. A listener cannot
//! abort a transition; the orchestrators never await anything here.

use std::sync::Arc;

use crate::process::TransferProcess;

/// Hooks for transfer lifecycle transitions. All default to no-ops so
/// listeners implement only what they care about.
#[allow(unused_variables)]
pub trait TransferProcessListener: Send + Sync {
    /// Before the created process is first persisted
    fn pre_created(&self, process: &TransferProcess) {}
    /// A consumer process was created and persisted
    fn initiated(&self, process: &TransferProcess) {}
    /// Manifest generated, provisioning begins
    fn provisioning_requested(&self, process: &TransferProcess) {}
    fn provisioned(&self, process: &TransferProcess) {}
    fn requested(&self, process: &TransferProcess) {}
    fn started(&self, process: &TransferProcess) {}
    fn suspended(&self, process: &TransferProcess) {}
    fn resumed(&self, process: &TransferProcess) {}
    fn completed(&self, process: &TransferProcess) {}
    fn terminated(&self, process: &TransferProcess) {}
    fn deprovisioned(&self, process: &TransferProcess) {}
}

/// Registration-ordered listener fan-out
#[derive(Default, Clone)]
pub struct TransferProcessObservable {
    listeners: Vec<Arc<dyn TransferProcessListener>>,
}

impl TransferProcessObservable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn TransferProcessListener>) {
        self.listeners.push(listener);
    }

    /// Invoke one hook on every listener, in registration order
    pub fn invoke_for_each(&self, f: impl Fn(&dyn TransferProcessListener)) {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::types::{DataAddress, TransferRequest};

    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl TransferProcessListener for Recorder {
        fn initiated(&self, _process: &TransferProcess) {
            self.log.lock().unwrap().push(self.tag);
        }
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut observable = TransferProcessObservable::new();
        observable.register(Arc::new(Recorder {
            tag: "first",
            log: Arc::clone(&log),
        }));
        observable.register(Arc::new(Recorder {
            tag: "second",
            log: Arc::clone(&log),
        }));

        let process = TransferProcess::new_consumer(&TransferRequest {
            id: "ext".into(),
            contract_id: "c1".into(),
            asset_id: "a1".into(),
            transfer_type: "HttpData-PULL".into(),
            protocol: "dsp".into(),
            counter_party_address: "https://provider".into(),
            data_destination: DataAddress::new("HttpData"),
        });
        observable.invoke_for_each(|l| l.initiated(&process));

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }
}

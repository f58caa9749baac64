//! Transfer Process Entity
//!
//! The state-machine instance: pure data plus legal-transition logic. All
//! mutation happens under a store lease; the entity itself carries no
//! concurrency machinery.
//!
//! Illegal transitions panic. They are programming errors (a handler bound
//! to the wrong state), not domain outcomes, and must surface loudly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state::TransferProcessState;
use crate::types::{
    DataAddress, DeprovisionedResource, ProcessType, ProvisionedResource, ResourceManifest,
    TransferProcessId, TransferRequest,
};

/// A single transfer process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProcess {
    pub id: TransferProcessId,
    pub process_type: ProcessType,
    pub state: TransferProcessState,
    /// Consecutive processings in the current state; reset on every real
    /// transition, incremented on each retry-without-transition. Drives the
    /// retry-exhaustion policy.
    pub state_count: u32,
    /// The shared logical transfer id both connectors correlate on: the
    /// consumer's external request id, fixed at creation on both sides and
    /// carried in every protocol message.
    pub correlation_id: String,
    /// True once the counterparty has heard of this transfer: set at
    /// creation for a provider (the counterparty initiated it), and when a
    /// consumer's request is acknowledged. Gates silent termination.
    pub counterparty_notified: bool,
    pub contract_id: String,
    pub asset_id: String,
    pub transfer_type: String,
    pub protocol: String,
    pub counter_party_address: String,
    pub data_destination: DataAddress,
    /// Source-side address (provider only), produced when the flow starts
    pub content_data_address: Option<DataAddress>,
    pub resource_manifest: ResourceManifest,
    pub provisioned_resources: Vec<ProvisionedResource>,
    pub resources_to_deprovision: Vec<ProvisionedResource>,
    pub deprovisioned_resources: Vec<DeprovisionedResource>,
    /// Last terminal-failure reason; set only on the way into TERMINATED or
    /// an errored DEPROVISIONED
    pub error_detail: Option<String>,
    /// Manual-hold flag: excludes the process from driver pickup without
    /// changing its state
    pub pending: bool,
    /// Last accepted inbound message id, for duplicate redelivery suppression
    pub last_processed_message_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl TransferProcess {
    /// Create a consumer process in INITIAL from an initiation request
    pub fn new_consumer(request: &TransferRequest) -> Self {
        let now = now_millis();
        Self {
            id: TransferProcessId::new(),
            process_type: ProcessType::Consumer,
            state: TransferProcessState::Initial,
            state_count: 0,
            correlation_id: request.id.clone(),
            counterparty_notified: false,
            contract_id: request.contract_id.clone(),
            asset_id: request.asset_id.clone(),
            transfer_type: request.transfer_type.clone(),
            protocol: request.protocol.clone(),
            counter_party_address: request.counter_party_address.clone(),
            data_destination: request.data_destination.clone(),
            content_data_address: None,
            resource_manifest: ResourceManifest::default(),
            provisioned_resources: Vec::new(),
            resources_to_deprovision: Vec::new(),
            deprovisioned_resources: Vec::new(),
            error_detail: None,
            pending: false,
            last_processed_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a provider process directly in REQUESTED from an accepted
    /// inbound transfer request. `consumer_pid` becomes the correlation id.
    #[allow(clippy::too_many_arguments)]
    pub fn new_provider(
        consumer_pid: impl Into<String>,
        contract_id: impl Into<String>,
        asset_id: impl Into<String>,
        transfer_type: impl Into<String>,
        protocol: impl Into<String>,
        counter_party_address: impl Into<String>,
        data_destination: DataAddress,
    ) -> Self {
        let now = now_millis();
        Self {
            id: TransferProcessId::new(),
            process_type: ProcessType::Provider,
            state: TransferProcessState::Requested,
            state_count: 0,
            correlation_id: consumer_pid.into(),
            counterparty_notified: true,
            contract_id: contract_id.into(),
            asset_id: asset_id.into(),
            transfer_type: transfer_type.into(),
            protocol: protocol.into(),
            counter_party_address: counter_party_address.into(),
            data_destination,
            content_data_address: None,
            resource_manifest: ResourceManifest::default(),
            provisioned_resources: Vec::new(),
            resources_to_deprovision: Vec::new(),
            deprovisioned_resources: Vec::new(),
            error_detail: None,
            pending: false,
            last_processed_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a transition along a legal edge.
    ///
    /// Re-entering the current state records a retry (`state_count` bump);
    /// a real change resets the count.
    ///
    /// # Panics
    ///
    /// Panics if the edge is not in the state graph.
    pub fn transition_to(&mut self, next: TransferProcessState) {
        assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {} for process {}",
            self.state,
            next,
            self.id
        );

        if next == self.state {
            self.state_count += 1;
        } else {
            self.state = next;
            self.state_count = 0;
        }
        self.updated_at = now_millis();
    }

    /// Record a recoverable failure: stay in the current state, bump the
    /// retry count. Only legal in retryable (self-edged) states.
    pub fn retry_failed(&mut self) {
        self.transition_to(self.state);
    }

    /// INITIAL/REQUESTED -> PROVISIONING with the generated manifest
    pub fn transition_provisioning(&mut self, manifest: ResourceManifest) {
        self.resource_manifest = manifest;
        self.transition_to(TransferProcessState::Provisioning);
    }

    /// PROVISIONING -> PROVISIONED; the manifest is consumed by the phase
    pub fn transition_provisioned(&mut self) {
        self.resource_manifest = ResourceManifest::default();
        self.transition_to(TransferProcessState::Provisioned);
    }

    pub fn transition_requesting(&mut self) {
        self.transition_to(TransferProcessState::Requesting);
    }

    /// REQUESTING -> REQUESTED; the acknowledged request means the
    /// counterparty now knows this transfer
    pub fn transition_requested(&mut self) {
        self.counterparty_notified = true;
        self.transition_to(TransferProcessState::Requested);
    }

    pub fn transition_starting(&mut self) {
        self.transition_to(TransferProcessState::Starting);
    }

    pub fn transition_started(&mut self) {
        self.transition_to(TransferProcessState::Started);
    }

    pub fn transition_suspended(&mut self) {
        self.transition_to(TransferProcessState::Suspended);
    }

    pub fn transition_completing(&mut self) {
        self.transition_to(TransferProcessState::Completing);
    }

    pub fn transition_completed(&mut self) {
        self.transition_to(TransferProcessState::Completed);
    }

    pub fn transition_terminating(&mut self, reason: impl Into<String>) {
        self.error_detail = Some(reason.into());
        self.transition_to(TransferProcessState::Terminating);
    }

    pub fn transition_terminated(&mut self, reason: Option<String>) {
        if reason.is_some() {
            self.error_detail = reason;
        }
        self.transition_to(TransferProcessState::Terminated);
    }

    /// COMPLETED/TERMINATED -> DEPROVISIONING; provisioned resources join the
    /// deprovision work set, atomically with the edge. Work left over from an
    /// interrupted cleanup stays queued.
    pub fn transition_deprovisioning(&mut self) {
        let mut fresh = std::mem::take(&mut self.provisioned_resources);
        self.resources_to_deprovision.append(&mut fresh);
        self.transition_to(TransferProcessState::Deprovisioning);
    }

    /// DEPROVISIONING -> DEPROVISIONED; a cleanup error is recorded, not
    /// retried forever
    pub fn transition_deprovisioned(&mut self, error: Option<String>) {
        if error.is_some() {
            self.error_detail = error;
        }
        self.resources_to_deprovision.clear();
        self.transition_to(TransferProcessState::Deprovisioned);
    }

    /// Record one provisioned resource (append-only within the phase)
    pub fn add_provisioned_resource(&mut self, resource: ProvisionedResource) {
        self.provisioned_resources.push(resource);
    }

    /// Record one deprovisioned resource outcome
    pub fn add_deprovisioned_resource(&mut self, resource: DeprovisionedResource) {
        self.deprovisioned_resources.push(resource);
    }

    /// True once every manifest entry is covered by a provisioned resource
    pub fn manifest_satisfied(&self) -> bool {
        self.resource_manifest.definitions.iter().all(|def| {
            self.provisioned_resources
                .iter()
                .any(|res| res.definition_id == def.id)
        })
    }

    /// Duplicate-redelivery check for inbound messages
    pub fn is_duplicate_message(&self, message_id: &str) -> bool {
        self.last_processed_message_id.as_deref() == Some(message_id)
    }

    /// Record the last accepted inbound message id
    pub fn record_message(&mut self, message_id: impl Into<String>) {
        self.last_processed_message_id = Some(message_id.into());
    }
}

impl fmt::Display for TransferProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransferProcess[{}] type={} state={} asset={} contract={}",
            self.id, self.process_type, self.state, self.asset_id, self.contract_id
        )
    }
}

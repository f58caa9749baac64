//! Transfer Process Manager
//!
//! The outbound orchestrator: owns the full driver-side state graph and
//! executes the side effect each state requires (manifest generation,
//! provisioning, remote dispatch, completion checks). Every handler runs on
//! a leased process handed over by the driver and must save on every path
//! to release the lease.
//!
//! Failure routing:
//! - validation/policy failures at the entry states are fatal, never retried
//! - dispatch and provisioning failures are budgeted by the retry policy
//! - an exhausted budget escalates to the terminal path exactly once: a
//!   provider (or a consumer the counterparty knows) goes to TERMINATING so
//!   the remote side is told, a consumer the counterparty has never heard of
//!   goes straight to TERMINATED

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::driver::ProcessorDelegate;
use crate::error::{ServiceError, ServiceResult};
use crate::events::TransferProcessObservable;
use crate::messages::{
    RemoteMessage, TransferCompletionMessage, TransferRequestMessage, TransferStartMessage,
    TransferTerminationMessage,
};
use crate::process::TransferProcess;
use crate::retry::{FailureDisposition, RetryPolicy};
use crate::spi::{
    DeprovisionOutcome, DispatchResult, PolicyArchive, ProvisionManager, ProvisionOutcome,
    RemoteMessageDispatcher, ResourceManifestGenerator, TransferStatusChecker, Vault,
};
use crate::state::TransferProcessState;
use crate::store::{ProcessFilter, TransferProcessStore};
use crate::types::{DeprovisionedResource, ProcessType, ResourceDefinition, TransferRequest};

/// Predicate excluding a process from driver pickup without changing its
/// state (manual-hold semantics)
pub type PendingGuard = Arc<dyn Fn(&TransferProcess) -> bool + Send + Sync>;

/// Everything the manager needs, wired explicitly at construction
pub struct ManagerDependencies {
    pub store: Arc<dyn TransferProcessStore>,
    pub dispatcher: Arc<dyn RemoteMessageDispatcher>,
    pub provision_manager: Arc<dyn ProvisionManager>,
    pub manifest_generator: Arc<dyn ResourceManifestGenerator>,
    pub policy_archive: Arc<dyn PolicyArchive>,
    pub vault: Arc<dyn Vault>,
    pub observable: TransferProcessObservable,
    /// Completion checkers keyed by `transfer_type`; owned here, no global
    /// registry
    pub status_checkers: HashMap<String, Arc<dyn TransferStatusChecker>>,
    pub retry_policy: RetryPolicy,
    pub pending_guard: Option<PendingGuard>,
    /// Our own protocol endpoint, sent in request messages so the provider
    /// can call back
    pub callback_address: String,
}

/// Outbound transfer orchestrator
pub struct TransferProcessManager {
    store: Arc<dyn TransferProcessStore>,
    dispatcher: Arc<dyn RemoteMessageDispatcher>,
    provision_manager: Arc<dyn ProvisionManager>,
    manifest_generator: Arc<dyn ResourceManifestGenerator>,
    policy_archive: Arc<dyn PolicyArchive>,
    vault: Arc<dyn Vault>,
    observable: TransferProcessObservable,
    status_checkers: HashMap<String, Arc<dyn TransferStatusChecker>>,
    retry_policy: RetryPolicy,
    pending_guard: Option<PendingGuard>,
    callback_address: String,
}

impl TransferProcessManager {
    pub fn new(deps: ManagerDependencies) -> Self {
        Self {
            store: deps.store,
            dispatcher: deps.dispatcher,
            provision_manager: deps.provision_manager,
            manifest_generator: deps.manifest_generator,
            policy_archive: deps.policy_archive,
            vault: deps.vault,
            observable: deps.observable,
            status_checkers: deps.status_checkers,
            retry_policy: deps.retry_policy,
            pending_guard: deps.pending_guard,
            callback_address: deps.callback_address,
        }
    }

    /// Start a consumer-side transfer.
    ///
    /// Idempotent on the external request id: initiating twice returns the
    /// already-stored process unchanged. An inline destination secret is
    /// moved to the vault before anything is persisted.
    pub async fn initiate_consumer_request(
        &self,
        request: TransferRequest,
    ) -> ServiceResult<TransferProcess> {
        if request.id.is_empty()
            || request.contract_id.is_empty()
            || request.counter_party_address.is_empty()
        {
            return Err(ServiceError::BadRequest(
                "id, contract id and counterparty address are required".into(),
            ));
        }

        if let Some(existing) = self.store.find_for_correlation_id(&request.id).await? {
            info!(
                process_id = %existing.id,
                external_id = %request.id,
                "transfer already initiated, returning existing process"
            );
            return Ok(existing);
        }

        let mut process = TransferProcess::new_consumer(&request);

        if let Some(secret) = process.data_destination.secret.take() {
            let key = process
                .data_destination
                .key_name
                .clone()
                .unwrap_or_else(|| format!("{}-destination-secret", process.id));
            self.vault.store_secret(&key, &secret).await?;
            process.data_destination.key_name = Some(key);
        }

        self.observable.invoke_for_each(|l| l.pre_created(&process));
        self.store.save(process.clone()).await?;
        info!(
            process_id = %process.id,
            contract_id = %process.contract_id,
            transfer_type = %process.transfer_type,
            "transfer process initiated"
        );
        self.observable.invoke_for_each(|l| l.initiated(&process));
        Ok(process)
    }

    /// Mark a started transfer complete (upstream signal); the driver then
    /// dispatches the completion message
    pub async fn complete(&self, id: crate::types::TransferProcessId) -> ServiceResult<TransferProcess> {
        let mut process = self.store.find_by_id_and_lease(id).await?;
        if process.state != TransferProcessState::Started {
            let state = process.state;
            return self
                .break_lease_with(
                    process,
                    ServiceError::Conflict(format!("cannot complete a transfer in {state}")),
                )
                .await;
        }
        process.transition_completing();
        self.store.save(process.clone()).await?;
        Ok(process)
    }

    /// Pause a started transfer locally
    pub async fn suspend(
        &self,
        id: crate::types::TransferProcessId,
        reason: Option<String>,
    ) -> ServiceResult<TransferProcess> {
        let mut process = self.store.find_by_id_and_lease(id).await?;
        if process.state != TransferProcessState::Started {
            let state = process.state;
            return self
                .break_lease_with(
                    process,
                    ServiceError::Conflict(format!("cannot suspend a transfer in {state}")),
                )
                .await;
        }
        process.transition_suspended();
        self.store.save(process.clone()).await?;
        info!(process_id = %process.id, reason = reason.as_deref().unwrap_or("-"), "transfer suspended");
        self.observable.invoke_for_each(|l| l.suspended(&process));
        Ok(process)
    }

    /// Resume a suspended transfer. Provider-only: re-enters STARTING so the
    /// driver re-establishes the flow; a consumer leaves SUSPENDED only via
    /// the provider's start message.
    pub async fn resume(&self, id: crate::types::TransferProcessId) -> ServiceResult<TransferProcess> {
        let mut process = self.store.find_by_id_and_lease(id).await?;
        if process.state != TransferProcessState::Suspended
            || process.process_type != ProcessType::Provider
        {
            let detail = format!(
                "cannot resume a {} transfer in {}",
                process.process_type, process.state
            );
            return self
                .break_lease_with(process, ServiceError::Conflict(detail))
                .await;
        }
        process.transition_starting();
        self.store.save(process.clone()).await?;
        self.observable.invoke_for_each(|l| l.resumed(&process));
        Ok(process)
    }

    /// Terminate a transfer locally. A consumer the counterparty has never
    /// heard of terminates silently; everyone else goes through TERMINATING
    /// so the remote side is told.
    pub async fn terminate(
        &self,
        id: crate::types::TransferProcessId,
        reason: impl Into<String>,
    ) -> ServiceResult<TransferProcess> {
        let mut process = self.store.find_by_id_and_lease(id).await?;
        if process.state.is_terminal() {
            let state = process.state;
            return self
                .break_lease_with(
                    process,
                    ServiceError::Conflict(format!("transfer already in terminal state {state}")),
                )
                .await;
        }
        let reason = reason.into();
        if !process.counterparty_notified {
            process.transition_terminated(Some(reason));
            self.store.save(process.clone()).await?;
            self.observable.invoke_for_each(|l| l.terminated(&process));
        } else {
            process.transition_terminating(reason);
            self.store.save(process.clone()).await?;
        }
        Ok(process)
    }

    /// Begin resource cleanup for a finished transfer
    pub async fn deprovision(&self, id: crate::types::TransferProcessId) -> ServiceResult<TransferProcess> {
        let mut process = self.store.find_by_id_and_lease(id).await?;
        if !matches!(
            process.state,
            TransferProcessState::Completed | TransferProcessState::Terminated
        ) {
            let state = process.state;
            return self
                .break_lease_with(
                    process,
                    ServiceError::Conflict(format!("cannot deprovision a transfer in {state}")),
                )
                .await;
        }
        process.transition_deprovisioning();
        self.store.save(process.clone()).await?;
        Ok(process)
    }

    /// Save unchanged to release the lease, then fail
    async fn break_lease_with<T>(
        &self,
        process: TransferProcess,
        error: ServiceError,
    ) -> ServiceResult<T> {
        self.store.save(process).await?;
        Err(error)
    }

    /// Route a recoverable failure through the retry budget
    async fn recoverable(
        &self,
        mut process: TransferProcess,
        reason: String,
    ) -> ServiceResult<bool> {
        match self.retry_policy.on_failure(&mut process) {
            FailureDisposition::Retry => {
                debug!(
                    process_id = %process.id,
                    state = %process.state,
                    state_count = process.state_count,
                    reason = %reason,
                    "recoverable failure, will retry after backoff"
                );
                self.store.save(process).await?;
                Ok(false)
            }
            FailureDisposition::Exhausted => {
                self.escalate(process, format!("retry budget exhausted: {reason}"))
                    .await
            }
        }
    }

    /// Drive a process onto its terminal path after a fatal failure or an
    /// exhausted retry budget
    async fn escalate(&self, mut process: TransferProcess, reason: String) -> ServiceResult<bool> {
        warn!(
            process_id = %process.id,
            state = %process.state,
            reason = %reason,
            "escalating to terminal path"
        );
        match process.state {
            // Cleanup failure is recorded, never retried forever
            TransferProcessState::Deprovisioning => {
                process.transition_deprovisioned(Some(reason));
                self.store.save(process.clone()).await?;
                self.observable
                    .invoke_for_each(|l| l.deprovisioned(&process));
            }
            // Already on the way out; give up on notifying
            TransferProcessState::Terminating => {
                process.transition_terminated(Some(reason));
                self.store.save(process.clone()).await?;
                self.observable.invoke_for_each(|l| l.terminated(&process));
            }
            _ if !process.counterparty_notified => {
                // Nobody to tell: no termination message is owed
                process.transition_terminated(Some(reason));
                self.store.save(process.clone()).await?;
                self.observable.invoke_for_each(|l| l.terminated(&process));
            }
            _ => {
                process.transition_terminating(reason);
                self.store.save(process).await?;
            }
        }
        Ok(true)
    }

    /// INITIAL (consumer) and REQUESTED (provider entry): resolve the policy
    /// and generate the resource manifest. Failures here are fatal; there is
    /// nothing a retry could fix.
    async fn process_initial(&self, mut process: TransferProcess) -> ServiceResult<bool> {
        let Some(policy) = self
            .policy_archive
            .find_policy_for_contract(&process.contract_id)
            .await
        else {
            let contract_id = process.contract_id.clone();
            return self
                .escalate(process, format!("no policy found for contract {contract_id}"))
                .await;
        };

        match self.manifest_generator.generate(&process, &policy).await {
            Ok(manifest) => {
                process.transition_provisioning(manifest);
                self.store.save(process.clone()).await?;
                self.observable
                    .invoke_for_each(|l| l.provisioning_requested(&process));
                Ok(true)
            }
            Err(e) => {
                self.escalate(process, format!("manifest generation failed: {e}"))
                    .await
            }
        }
    }

    /// PROVISIONING: request the not-yet-provisioned manifest entries.
    /// Partial success records the delivered resources and stays in state
    /// under the retry budget; any per-resource fatal outcome fails the
    /// whole phase.
    async fn process_provisioning(&self, mut process: TransferProcess) -> ServiceResult<bool> {
        let Some(policy) = self
            .policy_archive
            .find_policy_for_contract(&process.contract_id)
            .await
        else {
            let contract_id = process.contract_id.clone();
            return self
                .escalate(process, format!("no policy found for contract {contract_id}"))
                .await;
        };

        let pending: Vec<ResourceDefinition> = process
            .resource_manifest
            .definitions
            .iter()
            .filter(|def| {
                !process
                    .provisioned_resources
                    .iter()
                    .any(|res| res.definition_id == def.id)
            })
            .cloned()
            .collect();

        if !pending.is_empty() {
            let responses = self.provision_manager.provision(&pending, &policy).await;

            let mut retry_reason = None;
            let mut fatal_reason = None;
            for response in responses {
                match response.outcome {
                    ProvisionOutcome::Provisioned(resource) => {
                        process.add_provisioned_resource(resource);
                    }
                    ProvisionOutcome::Retry(reason) => {
                        retry_reason =
                            Some(format!("resource {}: {reason}", response.definition_id));
                    }
                    ProvisionOutcome::Fatal(reason) => {
                        fatal_reason =
                            Some(format!("resource {}: {reason}", response.definition_id));
                    }
                }
            }

            if let Some(reason) = fatal_reason {
                return self
                    .escalate(process, format!("provisioning failed: {reason}"))
                    .await;
            }
            if !process.manifest_satisfied() {
                let reason = retry_reason.unwrap_or_else(|| "provisioning incomplete".into());
                return self.recoverable(process, reason).await;
            }
        }

        process.transition_provisioned();
        self.store.save(process.clone()).await?;
        self.observable.invoke_for_each(|l| l.provisioned(&process));
        Ok(true)
    }

    /// PROVISIONED: pure local branch, no I/O
    async fn process_provisioned(&self, mut process: TransferProcess) -> ServiceResult<bool> {
        match process.process_type {
            ProcessType::Consumer => process.transition_requesting(),
            ProcessType::Provider => process.transition_starting(),
        }
        self.store.save(process).await?;
        Ok(true)
    }

    /// REQUESTING (consumer): dispatch the transfer request
    async fn process_requesting(&self, mut process: TransferProcess) -> ServiceResult<bool> {
        let mut destination = process.data_destination.clone();
        if destination.secret.is_none() {
            if let Some(key) = &destination.key_name {
                destination.secret = self.vault.resolve_secret(key).await;
            }
        }

        let message = TransferRequestMessage::new(
            process.correlation_id.clone(),
            process.contract_id.clone(),
            process.transfer_type.clone(),
            process.protocol.clone(),
            self.callback_address.clone(),
            destination,
        );
        let result = self
            .dispatcher
            .dispatch(RemoteMessage::Request {
                address: process.counter_party_address.clone(),
                message,
            })
            .await;

        match result {
            DispatchResult::Delivered(_) => {
                process.transition_requested();
                self.store.save(process.clone()).await?;
                info!(process_id = %process.id, "transfer request acknowledged");
                self.observable.invoke_for_each(|l| l.requested(&process));
                Ok(true)
            }
            DispatchResult::Retry(reason) => self.recoverable(process, reason).await,
            DispatchResult::Fatal(reason) => {
                self.escalate(process, format!("request rejected: {reason}"))
                    .await
            }
        }
    }

    /// STARTING (provider): announce the established data flow
    async fn process_starting(&self, mut process: TransferProcess) -> ServiceResult<bool> {
        if process.content_data_address.is_none() {
            process.content_data_address = process
                .provisioned_resources
                .iter()
                .find_map(|res| res.data_address.clone());
        }

        let message = TransferStartMessage::new(
            process.correlation_id.clone(),
            process.protocol.clone(),
            process.content_data_address.clone(),
        );
        let result = self
            .dispatcher
            .dispatch(RemoteMessage::Start {
                address: process.counter_party_address.clone(),
                message,
            })
            .await;

        match result {
            DispatchResult::Delivered(_) => {
                process.transition_started();
                self.store.save(process.clone()).await?;
                info!(process_id = %process.id, "transfer started");
                self.observable.invoke_for_each(|l| l.started(&process));
                Ok(true)
            }
            DispatchResult::Retry(reason) => self.recoverable(process, reason).await,
            DispatchResult::Fatal(reason) => {
                self.escalate(process, format!("start rejected: {reason}"))
                    .await
            }
        }
    }

    /// STARTED (consumer): poll the status checker for completion. No retry
    /// budget here; an incomplete or unreachable flow is simply re-checked
    /// next pickup.
    async fn process_started(&self, mut process: TransferProcess) -> ServiceResult<bool> {
        let Some(checker) = self.status_checkers.get(&process.transfer_type) else {
            // No checker registered: completion arrives via an inbound
            // message or an explicit complete() command
            self.store.save(process).await?;
            return Ok(false);
        };

        match checker.is_complete(&process).await {
            Ok(true) => {
                process.transition_completing();
                self.store.save(process).await?;
                Ok(true)
            }
            Ok(false) => {
                self.store.save(process).await?;
                Ok(false)
            }
            Err(e) => {
                warn!(process_id = %process.id, error = %e, "status check failed");
                self.store.save(process).await?;
                Ok(false)
            }
        }
    }

    /// COMPLETING: dispatch the completion message
    async fn process_completing(&self, mut process: TransferProcess) -> ServiceResult<bool> {
        let message = TransferCompletionMessage::new(
            process.correlation_id.clone(),
            process.protocol.clone(),
        );
        let result = self
            .dispatcher
            .dispatch(RemoteMessage::Complete {
                address: process.counter_party_address.clone(),
                message,
            })
            .await;

        match result {
            DispatchResult::Delivered(_) => {
                process.transition_completed();
                self.store.save(process.clone()).await?;
                info!(process_id = %process.id, "transfer completed");
                self.observable.invoke_for_each(|l| l.completed(&process));
                Ok(true)
            }
            DispatchResult::Retry(reason) => self.recoverable(process, reason).await,
            DispatchResult::Fatal(reason) => {
                self.escalate(process, format!("completion rejected: {reason}"))
                    .await
            }
        }
    }

    /// TERMINATING: dispatch the termination message, unless the
    /// counterparty has never heard of this transfer
    async fn process_terminating(&self, mut process: TransferProcess) -> ServiceResult<bool> {
        if !process.counterparty_notified {
            process.transition_terminated(None);
            self.store.save(process.clone()).await?;
            info!(process_id = %process.id, "terminated locally; counterparty unaware");
            self.observable.invoke_for_each(|l| l.terminated(&process));
            return Ok(true);
        }

        let message = TransferTerminationMessage::new(
            process.correlation_id.clone(),
            process.protocol.clone(),
            process.error_detail.clone(),
        );
        let result = self
            .dispatcher
            .dispatch(RemoteMessage::Terminate {
                address: process.counter_party_address.clone(),
                message,
            })
            .await;

        match result {
            DispatchResult::Delivered(_) => {
                process.transition_terminated(None);
                self.store.save(process.clone()).await?;
                info!(process_id = %process.id, "transfer terminated");
                self.observable.invoke_for_each(|l| l.terminated(&process));
                Ok(true)
            }
            DispatchResult::Retry(reason) => self.recoverable(process, reason).await,
            // escalate() sees TERMINATING and gives up on notifying
            DispatchResult::Fatal(reason) => self.escalate(process, reason).await,
        }
    }

    /// DEPROVISIONING: release resources; exhaustion still advances, with
    /// the failure recorded
    async fn process_deprovisioning(&self, mut process: TransferProcess) -> ServiceResult<bool> {
        let policy = self
            .policy_archive
            .find_policy_for_contract(&process.contract_id)
            .await
            .unwrap_or_default();

        let work_set = process.resources_to_deprovision.clone();
        let responses = self.provision_manager.deprovision(&work_set, &policy).await;

        let mut remaining = Vec::new();
        let mut retry_reason = None;
        let mut fatal_error = None;
        for resource in work_set {
            let outcome = responses
                .iter()
                .find(|r| r.definition_id == resource.definition_id)
                .map(|r| r.outcome.clone());
            match outcome {
                Some(DeprovisionOutcome::Released) => {
                    process.add_deprovisioned_resource(DeprovisionedResource {
                        definition_id: resource.definition_id.clone(),
                        error: None,
                    });
                }
                Some(DeprovisionOutcome::Fatal(e)) => {
                    process.add_deprovisioned_resource(DeprovisionedResource {
                        definition_id: resource.definition_id.clone(),
                        error: Some(e.clone()),
                    });
                    fatal_error = Some(format!("resource {}: {e}", resource.definition_id));
                }
                Some(DeprovisionOutcome::Retry(e)) => {
                    retry_reason = Some(format!("resource {}: {e}", resource.definition_id));
                    remaining.push(resource);
                }
                None => {
                    retry_reason =
                        Some(format!("resource {}: no response", resource.definition_id));
                    remaining.push(resource);
                }
            }
        }
        process.resources_to_deprovision = remaining;

        if process.resources_to_deprovision.is_empty() {
            process.transition_deprovisioned(fatal_error);
            self.store.save(process.clone()).await?;
            info!(process_id = %process.id, "transfer deprovisioned");
            self.observable
                .invoke_for_each(|l| l.deprovisioned(&process));
            Ok(true)
        } else {
            let reason = retry_reason.unwrap_or_else(|| "deprovisioning incomplete".into());
            self.recoverable(process, reason).await
        }
    }
}

#[async_trait]
impl ProcessorDelegate for TransferProcessManager {
    fn monitored(&self) -> Vec<ProcessFilter> {
        use TransferProcessState::*;
        vec![
            ProcessFilter::state(Initial),
            // Provider entry point: created at REQUESTED by the protocol
            // service; a consumer in REQUESTED is waiting on the wire
            ProcessFilter::state_and_type(Requested, ProcessType::Provider),
            ProcessFilter::state(Provisioning),
            ProcessFilter::state(Provisioned),
            ProcessFilter::state_and_type(Requesting, ProcessType::Consumer),
            ProcessFilter::state_and_type(Starting, ProcessType::Provider),
            ProcessFilter::state_and_type(Started, ProcessType::Consumer),
            ProcessFilter::state(Completing),
            ProcessFilter::state(Terminating),
            ProcessFilter::state(Deprovisioning),
        ]
    }

    async fn process(&self, mut process: TransferProcess) -> Result<bool, ServiceError> {
        if let Some(guard) = &self.pending_guard {
            if guard(&process) {
                debug!(process_id = %process.id, state = %process.state, "pending guard tripped");
                process.pending = true;
                self.store.save(process).await?;
                return Ok(false);
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        if self.retry_policy.in_backoff(&process, now) {
            // Break the lease untouched; re-selected once the delay elapses
            self.store.save(process).await?;
            return Ok(false);
        }

        use TransferProcessState::*;
        match process.state {
            // A consumer in REQUESTED is waiting for the provider's start
            // message; only the provider provisions from here
            Requested if process.process_type == ProcessType::Consumer => {
                self.store.save(process).await?;
                Ok(false)
            }
            Initial | Requested => self.process_initial(process).await,
            Provisioning => self.process_provisioning(process).await,
            Provisioned => self.process_provisioned(process).await,
            Requesting => self.process_requesting(process).await,
            Starting => self.process_starting(process).await,
            Started => self.process_started(process).await,
            Completing => self.process_completing(process).await,
            Terminating => self.process_terminating(process).await,
            Deprovisioning => self.process_deprovisioning(process).await,
            other => {
                warn!(process_id = %process.id, state = %other, "no handler for state");
                self.store.save(process).await?;
                Ok(false)
            }
        }
    }
}

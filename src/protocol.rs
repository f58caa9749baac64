//! Protocol Service
//!
//! The inbound half of the control plane: reacts to counterparty messages
//! delivered by a transport controller. Every notification runs the same
//! pipeline: authorize the caller against the contract's policy, locate and
//! lease the process by correlation id, suppress duplicate redeliveries,
//! check message legality for the current state, then transition and save.
//!
//! Auth failures are deliberately detail-free (`NotFound`) so a caller
//! cannot distinguish "no such transfer" from "not yours".

use std::sync::Arc;

use tracing::info;

use crate::error::{ServiceError, ServiceResult};
use crate::events::TransferProcessObservable;
use crate::messages::{
    TransferCompletionMessage, TransferProcessAck, TransferRequestMessage, TransferStartMessage,
    TransferSuspensionMessage, TransferTerminationMessage,
};
use crate::process::TransferProcess;
use crate::spi::{ContractValidationService, PolicyArchive, ProtocolTokenValidator};
use crate::state::TransferProcessState;
use crate::store::TransferProcessStore;
use crate::types::{
    ClaimToken, ContractAgreement, ProcessType, TokenRepresentation, TransferProcessId,
};

pub struct ProtocolDependencies {
    pub store: Arc<dyn TransferProcessStore>,
    pub validation_service: Arc<dyn ContractValidationService>,
    pub token_validator: Arc<dyn ProtocolTokenValidator>,
    pub policy_archive: Arc<dyn PolicyArchive>,
    pub observable: TransferProcessObservable,
}

/// Handles counterparty notifications for transfer processes
pub struct TransferProcessProtocolService {
    store: Arc<dyn TransferProcessStore>,
    validation_service: Arc<dyn ContractValidationService>,
    token_validator: Arc<dyn ProtocolTokenValidator>,
    policy_archive: Arc<dyn PolicyArchive>,
    observable: TransferProcessObservable,
}

impl TransferProcessProtocolService {
    pub fn new(deps: ProtocolDependencies) -> Self {
        Self {
            store: deps.store,
            validation_service: deps.validation_service,
            token_validator: deps.token_validator,
            policy_archive: deps.policy_archive,
            observable: deps.observable,
        }
    }

    /// Verify the caller's token against the contract's policy and resolve
    /// the agreement for the claimed participant. Any failure collapses to
    /// `NotFound`.
    async fn authorize(
        &self,
        token: &TokenRepresentation,
        contract_id: &str,
    ) -> ServiceResult<(ClaimToken, ContractAgreement)> {
        let policy = self
            .policy_archive
            .find_policy_for_contract(contract_id)
            .await
            .ok_or(ServiceError::NotFound)?;

        let claims = self
            .token_validator
            .verify(token, &policy)
            .await
            .map_err(|_| ServiceError::NotFound)?;
        let participant_id = claims.participant_id().ok_or(ServiceError::NotFound)?;

        let agreement = self
            .validation_service
            .validate_agreement(participant_id, contract_id)
            .await
            .map_err(|_| ServiceError::NotFound)?;

        Ok((claims, agreement))
    }

    /// Locate by the shared correlation id, authorize against the stored
    /// contract, then lease for mutation.
    ///
    /// Authorization runs before the lease is taken: an unauthenticated
    /// caller gets `NotFound` regardless of lease state, so lease conflicts
    /// never reveal that the transfer exists.
    async fn authorize_and_lease(
        &self,
        correlation_id: &str,
        token: &TokenRepresentation,
    ) -> ServiceResult<TransferProcess> {
        let found = self
            .store
            .find_for_correlation_id(correlation_id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.authorize(token, &found.contract_id).await?;
        Ok(self.store.find_by_id_and_lease(found.id).await?)
    }

    fn ack(process: &TransferProcess) -> TransferProcessAck {
        TransferProcessAck {
            process_id: Some(process.id.to_string()),
        }
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

    /// Inbound TransferRequestMessage (provider side): create the provider
    /// process directly in REQUESTED.
    ///
    /// Idempotent on the consumer's pid: a redelivered or repeated request
    /// acknowledges the existing process instead of creating a second one.
    pub async fn notify_requested(
        &self,
        message: TransferRequestMessage,
        token: TokenRepresentation,
    ) -> ServiceResult<TransferProcessAck> {
        let (claims, agreement) = self.authorize(&token, &message.contract_id).await?;
        let participant_id = claims.participant_id().ok_or(ServiceError::NotFound)?;
        self.validation_service
            .validate_request(participant_id, &agreement)
            .await?;

        if message.consumer_pid.is_empty() || message.callback_address.is_empty() {
            return Err(ServiceError::BadRequest(
                "consumer pid and callback address are required".into(),
            ));
        }

        if let Some(existing) = self
            .store
            .find_for_correlation_id(&message.consumer_pid)
            .await?
        {
            return Ok(Self::ack(&existing));
        }

        let mut process = TransferProcess::new_provider(
            message.consumer_pid,
            agreement.id.clone(),
            agreement.asset_id.clone(),
            message.transfer_type,
            message.protocol,
            message.callback_address,
            message.data_destination,
        );
        process.record_message(&message.id);

        self.observable.invoke_for_each(|l| l.pre_created(&process));
        self.store.save(process.clone()).await?;
        info!(
            process_id = %process.id,
            correlation_id = %process.correlation_id,
            contract_id = %process.contract_id,
            "provider transfer process created"
        );
        self.observable.invoke_for_each(|l| l.requested(&process));
        Ok(Self::ack(&process))
    }

    /// Inbound TransferStartMessage (consumer side): the provider's flow is
    /// established; record its source address and move to STARTED. Also ends
    /// a suspension.
    pub async fn notify_started(
        &self,
        message: TransferStartMessage,
        token: TokenRepresentation,
    ) -> ServiceResult<TransferProcessAck> {
        let mut process = self.authorize_and_lease(&message.process_id, &token).await?;

        if process.is_duplicate_message(&message.id) {
            return self.acknowledge_unchanged(process).await;
        }
        if !matches!(
            process.state,
            TransferProcessState::Requested | TransferProcessState::Suspended
        ) {
            let state = process.state;
            return self
                .break_lease_with(
                    process,
                    ServiceError::Conflict(format!("start message is illegal in {state}")),
                )
                .await;
        }

        // A suspended provider resumes through STARTING so the driver
        // re-establishes the flow and announces its own start
        if process.state == TransferProcessState::Suspended
            && process.process_type == ProcessType::Provider
        {
            process.record_message(&message.id);
            process.transition_starting();
            self.store.save(process.clone()).await?;
            info!(process_id = %process.id, "transfer resumed by counterparty");
            self.observable.invoke_for_each(|l| l.resumed(&process));
            return Ok(Self::ack(&process));
        }

        process.content_data_address = message.data_address;
        process.record_message(&message.id);
        process.transition_started();
        self.store.save(process.clone()).await?;
        info!(process_id = %process.id, "transfer started by counterparty");
        self.observable.invoke_for_each(|l| l.started(&process));
        Ok(Self::ack(&process))
    }

    /// Inbound TransferSuspensionMessage: pause a started transfer
    pub async fn notify_suspended(
        &self,
        message: TransferSuspensionMessage,
        token: TokenRepresentation,
    ) -> ServiceResult<TransferProcessAck> {
        let mut process = self.authorize_and_lease(&message.process_id, &token).await?;

        if process.is_duplicate_message(&message.id) {
            return self.acknowledge_unchanged(process).await;
        }
        if process.state != TransferProcessState::Started {
            let state = process.state;
            return self
                .break_lease_with(
                    process,
                    ServiceError::Conflict(format!("suspension is illegal in {state}")),
                )
                .await;
        }

        process.record_message(&message.id);
        process.transition_suspended();
        self.store.save(process.clone()).await?;
        info!(
            process_id = %process.id,
            reason = message.reason.as_deref().unwrap_or("-"),
            "transfer suspended by counterparty"
        );
        self.observable.invoke_for_each(|l| l.suspended(&process));
        Ok(Self::ack(&process))
    }

    /// Inbound TransferCompletionMessage: the counterparty considers the
    /// transfer done; finish directly, no message is owed back
    pub async fn notify_completed(
        &self,
        message: TransferCompletionMessage,
        token: TokenRepresentation,
    ) -> ServiceResult<TransferProcessAck> {
        let mut process = self.authorize_and_lease(&message.process_id, &token).await?;

        if process.is_duplicate_message(&message.id) {
            return self.acknowledge_unchanged(process).await;
        }
        if process.state != TransferProcessState::Started {
            let state = process.state;
            return self
                .break_lease_with(
                    process,
                    ServiceError::Conflict(format!("completion is illegal in {state}")),
                )
                .await;
        }

        process.record_message(&message.id);
        process.transition_completed();
        self.store.save(process.clone()).await?;
        info!(process_id = %process.id, "transfer completed by counterparty");
        self.observable.invoke_for_each(|l| l.completed(&process));
        Ok(Self::ack(&process))
    }

    /// Inbound TransferTerminationMessage: the counterparty already
    /// considers the transfer over, so go straight to TERMINATED without
    /// echoing a termination back
    pub async fn notify_terminated(
        &self,
        message: TransferTerminationMessage,
        token: TokenRepresentation,
    ) -> ServiceResult<TransferProcessAck> {
        let mut process = self.authorize_and_lease(&message.process_id, &token).await?;

        if process.is_duplicate_message(&message.id) {
            return self.acknowledge_unchanged(process).await;
        }
        if process.state.is_terminal() {
            let state = process.state;
            return self
                .break_lease_with(
                    process,
                    ServiceError::Conflict(format!("termination is illegal in {state}")),
                )
                .await;
        }

        process.record_message(&message.id);
        process.transition_terminated(message.reason);
        self.store.save(process.clone()).await?;
        info!(process_id = %process.id, "transfer terminated by counterparty");
        self.observable.invoke_for_each(|l| l.terminated(&process));
        Ok(Self::ack(&process))
    }

    /// Authorized lookup by local process id, for counterparty status reads
    pub async fn find_by_id(
        &self,
        id: TransferProcessId,
        token: TokenRepresentation,
    ) -> ServiceResult<TransferProcess> {
        let process = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.authorize(&token, &process.contract_id).await?;
        Ok(process)
    }

    /// Duplicate redelivery: acknowledge without mutating, releasing the lease
    async fn acknowledge_unchanged(
        &self,
        process: TransferProcess,
    ) -> ServiceResult<TransferProcessAck> {
        let ack = Self::ack(&process);
        self.store.save(process).await?;
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTransferProcessStore;
    use crate::testing::{
        RecordingListener, StubPolicyArchive, StubTokenValidator, StubValidationService,
    };
    use crate::types::DataAddress;

    struct Fixture {
        store: Arc<InMemoryTransferProcessStore>,
        validation: Arc<StubValidationService>,
        tokens: Arc<StubTokenValidator>,
        listener: Arc<RecordingListener>,
        service: TransferProcessProtocolService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryTransferProcessStore::new("test-worker"));
        let validation = Arc::new(StubValidationService::with_agreement(
            "c1",
            "consumer-participant",
            "provider-participant",
        ));
        let tokens = Arc::new(StubTokenValidator::accepting("consumer-participant"));
        let archive = Arc::new(StubPolicyArchive::with_policy("c1"));
        let listener = Arc::new(RecordingListener::new());

        let mut observable = TransferProcessObservable::new();
        observable.register(listener.clone());

        let service = TransferProcessProtocolService::new(ProtocolDependencies {
            store: store.clone(),
            validation_service: validation.clone(),
            token_validator: tokens.clone(),
            policy_archive: archive,
            observable,
        });

        Fixture {
            store,
            validation,
            tokens,
            listener,
            service,
        }
    }

    fn request_message(consumer_pid: &str) -> TransferRequestMessage {
        TransferRequestMessage::new(
            consumer_pid,
            "c1",
            "HttpData-PULL",
            "dataspace-protocol-http",
            "https://consumer.example.com/protocol",
            DataAddress::new("HttpData"),
        )
    }

    fn valid_token() -> TokenRepresentation {
        TokenRepresentation::new("valid-token")
    }

    #[tokio::test]
    async fn test_inbound_request_creates_provider_process() {
        let fx = fixture();
        let ack = fx
            .service
            .notify_requested(request_message("consumer-pid-1"), valid_token())
            .await
            .unwrap();

        let pid: TransferProcessId = ack.process_id.unwrap().parse().unwrap();
        let process = fx.store.find_by_id(pid).await.unwrap().unwrap();
        assert_eq!(process.state, TransferProcessState::Requested);
        assert_eq!(process.correlation_id, "consumer-pid-1");
        assert_eq!(process.asset_id, "asset-1");
        assert!(process.counterparty_notified);
        assert_eq!(fx.listener.hooks(), vec!["pre_created", "requested"]);
    }

    #[tokio::test]
    async fn test_inbound_request_is_idempotent() {
        let fx = fixture();
        let first = fx
            .service
            .notify_requested(request_message("consumer-pid-1"), valid_token())
            .await
            .unwrap();
        // A distinct message for the same transfer, e.g. a client retry
        let second = fx
            .service
            .notify_requested(request_message("consumer-pid-1"), valid_token())
            .await
            .unwrap();

        assert_eq!(first.process_id, second.process_id);
        assert_eq!(
            fx.listener
                .hooks()
                .iter()
                .filter(|h| **h == "requested")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_bad_token_is_detail_free_and_creates_nothing() {
        let fx = fixture();
        let err = fx
            .service
            .notify_requested(
                request_message("consumer-pid-1"),
                TokenRepresentation::new("forged"),
            )
            .await
            .unwrap_err();

        assert_eq!(err, ServiceError::NotFound);
        assert!(
            fx.store
                .find_for_correlation_id("consumer-pid-1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_unknown_contract_is_detail_free() {
        let fx = fixture();
        let mut message = request_message("consumer-pid-1");
        message.contract_id = "no-such-contract".into();

        let err = fx
            .service
            .notify_requested(message, valid_token())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound);
    }

    #[tokio::test]
    async fn test_counterparty_standing_rejection_is_conflict() {
        let fx = fixture();
        *fx.validation.reject_requests.lock().unwrap() = true;

        let err = fx
            .service
            .notify_requested(request_message("consumer-pid-1"), valid_token())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    async fn consumer_in_requested(fx: &Fixture) -> TransferProcess {
        let mut process = TransferProcess::new_consumer(&crate::types::TransferRequest {
            id: "ext-1".into(),
            contract_id: "c1".into(),
            asset_id: "a1".into(),
            transfer_type: "HttpData-PULL".into(),
            protocol: "dataspace-protocol-http".into(),
            counter_party_address: "https://provider.example.com/protocol".into(),
            data_destination: DataAddress::new("HttpData"),
        });
        process.transition_provisioning(Default::default());
        process.transition_provisioned();
        process.transition_requesting();
        process.transition_requested();
        fx.store.save(process.clone()).await.unwrap();
        process
    }

    #[tokio::test]
    async fn test_inbound_start_moves_consumer_to_started() {
        let fx = fixture();
        let consumer = consumer_in_requested(&fx).await;

        let source = DataAddress::new("HttpData").with_property("baseUrl", "https://data");
        let message = TransferStartMessage::new("ext-1", "dataspace-protocol-http", Some(source));
        let ack = fx
            .service
            .notify_started(message, valid_token())
            .await
            .unwrap();
        assert_eq!(ack.process_id.as_deref(), Some(consumer.id.to_string().as_str()));

        let updated = fx.store.find_by_id(consumer.id).await.unwrap().unwrap();
        assert_eq!(updated.state, TransferProcessState::Started);
        let source = updated.content_data_address.unwrap();
        assert_eq!(
            source.properties.get("baseUrl").map(String::as_str),
            Some("https://data")
        );
        assert!(fx.listener.hooks().contains(&"started"));
    }

    #[tokio::test]
    async fn test_duplicate_start_is_suppressed() {
        let fx = fixture();
        let consumer = consumer_in_requested(&fx).await;

        let message = TransferStartMessage::new("ext-1", "dataspace-protocol-http", None);
        fx.service
            .notify_started(message.clone(), valid_token())
            .await
            .unwrap();
        // Same message id, redelivered
        let ack = fx
            .service
            .notify_started(message, valid_token())
            .await
            .unwrap();

        assert_eq!(ack.process_id.as_deref(), Some(consumer.id.to_string().as_str()));
        assert_eq!(
            fx.listener
                .hooks()
                .iter()
                .filter(|h| **h == "started")
                .count(),
            1
        );
        // Still leasable: the duplicate path released its lease
        fx.store.find_by_id_and_lease(consumer.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_in_wrong_state_is_conflict_and_releases_lease() {
        let fx = fixture();
        let consumer = consumer_in_requested(&fx).await;

        fx.service
            .notify_started(
                TransferStartMessage::new("ext-1", "dataspace-protocol-http", None),
                valid_token(),
            )
            .await
            .unwrap();
        fx.service
            .notify_completed(
                TransferCompletionMessage::new("ext-1", "dataspace-protocol-http"),
                valid_token(),
            )
            .await
            .unwrap();

        // Completed is terminal; a late start must be rejected
        let err = fx
            .service
            .notify_started(
                TransferStartMessage::new("ext-1", "dataspace-protocol-http", None),
                valid_token(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let unchanged = fx.store.find_by_id(consumer.id).await.unwrap().unwrap();
        assert_eq!(unchanged.state, TransferProcessState::Completed);
        fx.store.find_by_id_and_lease(consumer.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_inbound_suspend_and_restart() {
        let fx = fixture();
        let consumer = consumer_in_requested(&fx).await;

        fx.service
            .notify_started(
                TransferStartMessage::new("ext-1", "dataspace-protocol-http", None),
                valid_token(),
            )
            .await
            .unwrap();
        fx.service
            .notify_suspended(
                TransferSuspensionMessage::new(
                    "ext-1",
                    "dataspace-protocol-http",
                    Some("maintenance".into()),
                ),
                valid_token(),
            )
            .await
            .unwrap();

        let suspended = fx.store.find_by_id(consumer.id).await.unwrap().unwrap();
        assert_eq!(suspended.state, TransferProcessState::Suspended);

        // The provider resumes by sending a fresh start
        fx.service
            .notify_started(
                TransferStartMessage::new("ext-1", "dataspace-protocol-http", None),
                valid_token(),
            )
            .await
            .unwrap();
        let resumed = fx.store.find_by_id(consumer.id).await.unwrap().unwrap();
        assert_eq!(resumed.state, TransferProcessState::Started);
    }

    #[tokio::test]
    async fn test_inbound_start_resumes_suspended_provider_via_starting() {
        let fx = fixture();
        let mut provider = TransferProcess::new_provider(
            "consumer-pid-9",
            "c1",
            "asset-1",
            "HttpData-PULL",
            "dataspace-protocol-http",
            "https://consumer.example.com/protocol",
            DataAddress::new("HttpData"),
        );
        provider.transition_provisioning(Default::default());
        provider.transition_provisioned();
        provider.transition_starting();
        provider.transition_started();
        provider.transition_suspended();
        let id = provider.id;
        fx.store.save(provider).await.unwrap();

        fx.service
            .notify_started(
                TransferStartMessage::new("consumer-pid-9", "dataspace-protocol-http", None),
                valid_token(),
            )
            .await
            .unwrap();

        // The driver owns re-establishing the flow from STARTING
        let resumed = fx.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(resumed.state, TransferProcessState::Starting);
        assert!(fx.listener.hooks().contains(&"resumed"));
    }

    #[tokio::test]
    async fn test_inbound_termination_goes_straight_to_terminated() {
        let fx = fixture();
        let consumer = consumer_in_requested(&fx).await;

        fx.service
            .notify_terminated(
                TransferTerminationMessage::new(
                    "ext-1",
                    "dataspace-protocol-http",
                    Some("policy violation".into()),
                ),
                valid_token(),
            )
            .await
            .unwrap();

        let terminated = fx.store.find_by_id(consumer.id).await.unwrap().unwrap();
        assert_eq!(terminated.state, TransferProcessState::Terminated);
        assert_eq!(terminated.error_detail.as_deref(), Some("policy violation"));
        assert!(fx.listener.hooks().contains(&"terminated"));
    }

    #[tokio::test]
    async fn test_forged_token_gets_not_found_even_while_leased() {
        let fx = fixture();
        let consumer = consumer_in_requested(&fx).await;
        // Another worker is mid-mutation on the same process
        let other_worker = fx.store.for_worker("other-worker");
        other_worker.find_by_id_and_lease(consumer.id).await.unwrap();

        let err = fx
            .service
            .notify_started(
                TransferStartMessage::new("ext-1", "dataspace-protocol-http", None),
                TokenRepresentation::new("forged"),
            )
            .await
            .unwrap_err();
        // Not Conflict: lease state must be invisible without a valid token
        assert_eq!(err, ServiceError::NotFound);

        // An authorized caller does observe the conflict
        let err = fx
            .service
            .notify_started(
                TransferStartMessage::new("ext-1", "dataspace-protocol-http", None),
                valid_token(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_inbound_termination_during_deprovisioning() {
        let fx = fixture();
        let consumer = consumer_in_requested(&fx).await;

        let mut process = fx.store.find_by_id_and_lease(consumer.id).await.unwrap();
        process.add_provisioned_resource(crate::types::ProvisionedResource {
            definition_id: "dst-1".into(),
            resource_type: "destination-bucket".into(),
            data_address: None,
        });
        process.transition_started();
        process.transition_completed();
        process.transition_deprovisioning();
        fx.store.save(process).await.unwrap();

        fx.service
            .notify_terminated(
                TransferTerminationMessage::new(
                    "ext-1",
                    "dataspace-protocol-http",
                    Some("contract revoked".into()),
                ),
                valid_token(),
            )
            .await
            .unwrap();

        let terminated = fx.store.find_by_id(consumer.id).await.unwrap().unwrap();
        assert_eq!(terminated.state, TransferProcessState::Terminated);
        assert_eq!(terminated.error_detail.as_deref(), Some("contract revoked"));
        // Interrupted cleanup work survives for a later deprovision command
        assert_eq!(terminated.resources_to_deprovision.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_correlation_is_not_found() {
        let fx = fixture();
        let err = fx
            .service
            .notify_started(
                TransferStartMessage::new("nobody", "dataspace-protocol-http", None),
                valid_token(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound);
    }

    #[tokio::test]
    async fn test_find_by_id_requires_authorization() {
        let fx = fixture();
        let consumer = consumer_in_requested(&fx).await;

        let found = fx
            .service
            .find_by_id(consumer.id, valid_token())
            .await
            .unwrap();
        assert_eq!(found.id, consumer.id);

        *fx.tokens.reject_all.lock().unwrap() = true;
        let err = fx
            .service
            .find_by_id(consumer.id, valid_token())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound);
    }
}

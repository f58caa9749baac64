//! Test Doubles
//!
//! Scriptable collaborator implementations for tests and local wiring.
//! Each stub records its calls and returns pre-programmed outcomes, so a
//! test can drive the orchestrators through any path without a network or a
//! provisioner.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{ServiceError, ServiceResult};
use crate::events::TransferProcessListener;
use crate::messages::{RemoteMessage, TransferProcessAck};
use crate::process::TransferProcess;
use crate::spi::{
    ContractValidationService, DeprovisionOutcome, DeprovisionResponse, DispatchResult,
    PolicyArchive, ProtocolTokenValidator, ProvisionManager, ProvisionOutcome, ProvisionResponse,
    RemoteMessageDispatcher, ResourceManifestGenerator, TransferStatusChecker, Vault,
};
use crate::types::{
    ClaimToken, ContractAgreement, Policy, ProvisionedResource, ResourceDefinition,
    ResourceManifest, TokenRepresentation,
};

/// Dispatcher that records every message and replays scripted results.
/// With no script it acknowledges everything.
#[derive(Default)]
pub struct StubDispatcher {
    pub sent: Mutex<Vec<RemoteMessage>>,
    script: Mutex<Vec<DispatchResult>>,
}

impl StubDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next dispatch outcomes, consumed in order
    pub fn enqueue(&self, result: DispatchResult) {
        self.script.lock().unwrap().push(result);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|m| m.kind()).collect()
    }
}

#[async_trait]
impl RemoteMessageDispatcher for StubDispatcher {
    async fn dispatch(&self, message: RemoteMessage) -> DispatchResult {
        self.sent.lock().unwrap().push(message);
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            DispatchResult::Delivered(TransferProcessAck::default())
        } else {
            script.remove(0)
        }
    }
}

/// Provision manager that succeeds for every resource unless told otherwise
#[derive(Default)]
pub struct StubProvisionManager {
    pub provision_calls: AtomicUsize,
    pub deprovision_calls: AtomicUsize,
    /// definition id -> scripted outcome; unlisted ids succeed
    pub provision_failures: Mutex<HashMap<String, ProvisionOutcome>>,
    pub deprovision_failures: Mutex<HashMap<String, DeprovisionOutcome>>,
}

impl StubProvisionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_provision(&self, definition_id: &str, outcome: ProvisionOutcome) {
        self.provision_failures
            .lock()
            .unwrap()
            .insert(definition_id.into(), outcome);
    }

    pub fn fail_deprovision(&self, definition_id: &str, outcome: DeprovisionOutcome) {
        self.deprovision_failures
            .lock()
            .unwrap()
            .insert(definition_id.into(), outcome);
    }
}

#[async_trait]
impl ProvisionManager for StubProvisionManager {
    async fn provision(
        &self,
        resources: &[ResourceDefinition],
        _policy: &Policy,
    ) -> Vec<ProvisionResponse> {
        self.provision_calls.fetch_add(1, Ordering::SeqCst);
        let failures = self.provision_failures.lock().unwrap();
        resources
            .iter()
            .map(|def| ProvisionResponse {
                definition_id: def.id.clone(),
                outcome: failures.get(&def.id).cloned().unwrap_or_else(|| {
                    ProvisionOutcome::Provisioned(ProvisionedResource {
                        definition_id: def.id.clone(),
                        resource_type: def.resource_type.clone(),
                        data_address: None,
                    })
                }),
            })
            .collect()
    }

    async fn deprovision(
        &self,
        resources: &[ProvisionedResource],
        _policy: &Policy,
    ) -> Vec<DeprovisionResponse> {
        self.deprovision_calls.fetch_add(1, Ordering::SeqCst);
        let failures = self.deprovision_failures.lock().unwrap();
        resources
            .iter()
            .map(|res| DeprovisionResponse {
                definition_id: res.definition_id.clone(),
                outcome: failures
                    .get(&res.definition_id)
                    .cloned()
                    .unwrap_or(DeprovisionOutcome::Released),
            })
            .collect()
    }
}

/// Manifest generator returning a fixed manifest (empty by default)
#[derive(Default)]
pub struct StubManifestGenerator {
    pub manifest: Mutex<ResourceManifest>,
    pub failure: Mutex<Option<ServiceError>>,
}

impl StubManifestGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manifest(manifest: ResourceManifest) -> Self {
        Self {
            manifest: Mutex::new(manifest),
            failure: Mutex::new(None),
        }
    }

    pub fn fail_with(&self, error: ServiceError) {
        *self.failure.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl ResourceManifestGenerator for StubManifestGenerator {
    async fn generate(
        &self,
        _process: &TransferProcess,
        _policy: &Policy,
    ) -> ServiceResult<ResourceManifest> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.manifest.lock().unwrap().clone())
    }
}

/// Policy archive over a fixed contract id -> policy map
#[derive(Default)]
pub struct StubPolicyArchive {
    policies: Mutex<HashMap<String, Policy>>,
}

impl StubPolicyArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(contract_id: &str) -> Self {
        let archive = Self::default();
        archive.add(contract_id, Policy::default());
        archive
    }

    pub fn add(&self, contract_id: &str, policy: Policy) {
        self.policies
            .lock()
            .unwrap()
            .insert(contract_id.into(), policy);
    }
}

#[async_trait]
impl PolicyArchive for StubPolicyArchive {
    async fn find_policy_for_contract(&self, contract_id: &str) -> Option<Policy> {
        self.policies.lock().unwrap().get(contract_id).cloned()
    }
}

/// Validation service accepting a fixed set of (participant, contract) pairs
#[derive(Default)]
pub struct StubValidationService {
    agreements: Mutex<HashMap<String, ContractAgreement>>,
    pub reject_requests: Mutex<bool>,
}

impl StubValidationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agreement(contract_id: &str, consumer_id: &str, provider_id: &str) -> Self {
        let service = Self::default();
        service.add_agreement(ContractAgreement {
            id: contract_id.into(),
            provider_id: provider_id.into(),
            consumer_id: consumer_id.into(),
            asset_id: "asset-1".into(),
            policy: Policy::default(),
        });
        service
    }

    pub fn add_agreement(&self, agreement: ContractAgreement) {
        self.agreements
            .lock()
            .unwrap()
            .insert(agreement.id.clone(), agreement);
    }
}

#[async_trait]
impl ContractValidationService for StubValidationService {
    async fn validate_agreement(
        &self,
        participant_id: &str,
        contract_id: &str,
    ) -> ServiceResult<ContractAgreement> {
        let agreements = self.agreements.lock().unwrap();
        let agreement = agreements.get(contract_id).ok_or(ServiceError::NotFound)?;
        if agreement.consumer_id != participant_id && agreement.provider_id != participant_id {
            return Err(ServiceError::NotFound);
        }
        Ok(agreement.clone())
    }

    async fn validate_request(
        &self,
        _participant_id: &str,
        _agreement: &ContractAgreement,
    ) -> ServiceResult<()> {
        if *self.reject_requests.lock().unwrap() {
            return Err(ServiceError::Conflict("counterparty not in standing".into()));
        }
        Ok(())
    }
}

/// Token validator that accepts any token equal to "valid-token" and maps
/// it to the given participant
pub struct StubTokenValidator {
    pub participant_id: String,
    pub reject_all: Mutex<bool>,
}

impl StubTokenValidator {
    pub fn accepting(participant_id: &str) -> Self {
        Self {
            participant_id: participant_id.into(),
            reject_all: Mutex::new(false),
        }
    }
}

#[async_trait]
impl ProtocolTokenValidator for StubTokenValidator {
    async fn verify(
        &self,
        token: &TokenRepresentation,
        _policy: &Policy,
    ) -> ServiceResult<ClaimToken> {
        if *self.reject_all.lock().unwrap() || token.token != "valid-token" {
            return Err(ServiceError::NotFound);
        }
        let mut claims = HashMap::new();
        claims.insert("participant_id".to_string(), self.participant_id.clone());
        Ok(ClaimToken { claims })
    }
}

/// In-memory vault
#[derive(Default)]
pub struct MemoryVault {
    secrets: DashMap<String, String>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.secrets.contains_key(key)
    }
}

#[async_trait]
impl Vault for MemoryVault {
    async fn store_secret(&self, key: &str, value: &str) -> ServiceResult<()> {
        self.secrets.insert(key.into(), value.into());
        Ok(())
    }

    async fn resolve_secret(&self, key: &str) -> Option<String> {
        self.secrets.get(key).map(|v| v.clone())
    }

    async fn delete_secret(&self, key: &str) -> ServiceResult<()> {
        self.secrets.remove(key);
        Ok(())
    }
}

/// Status checker with a switchable answer
#[derive(Default)]
pub struct StubStatusChecker {
    pub complete: Mutex<bool>,
    pub failure: Mutex<Option<ServiceError>>,
}

impl StubStatusChecker {
    pub fn reporting(complete: bool) -> Self {
        Self {
            complete: Mutex::new(complete),
            failure: Mutex::new(None),
        }
    }

    pub fn set_complete(&self, complete: bool) {
        *self.complete.lock().unwrap() = complete;
    }
}

#[async_trait]
impl TransferStatusChecker for StubStatusChecker {
    async fn is_complete(&self, _process: &TransferProcess) -> ServiceResult<bool> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(*self.complete.lock().unwrap())
    }
}

/// Listener recording every hook invocation as `(hook, process state)`
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<(&'static str, String)>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hooks(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|(h, _)| *h).collect()
    }

    fn record(&self, hook: &'static str, process: &TransferProcess) {
        self.events
            .lock()
            .unwrap()
            .push((hook, process.state.to_string()));
    }
}

impl TransferProcessListener for RecordingListener {
    fn pre_created(&self, process: &TransferProcess) {
        self.record("pre_created", process);
    }
    fn initiated(&self, process: &TransferProcess) {
        self.record("initiated", process);
    }
    fn provisioning_requested(&self, process: &TransferProcess) {
        self.record("provisioning_requested", process);
    }
    fn provisioned(&self, process: &TransferProcess) {
        self.record("provisioned", process);
    }
    fn requested(&self, process: &TransferProcess) {
        self.record("requested", process);
    }
    fn started(&self, process: &TransferProcess) {
        self.record("started", process);
    }
    fn suspended(&self, process: &TransferProcess) {
        self.record("suspended", process);
    }
    fn resumed(&self, process: &TransferProcess) {
        self.record("resumed", process);
    }
    fn completed(&self, process: &TransferProcess) {
        self.record("completed", process);
    }
    fn terminated(&self, process: &TransferProcess) {
        self.record("terminated", process);
    }
    fn deprovisioned(&self, process: &TransferProcess) {
        self.record("deprovisioned", process);
    }
}

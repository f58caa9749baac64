//! Core Types
//!
//! Identifiers and value objects shared across the transfer control plane.
//! Process ids are ULIDs: monotonic, sortable, no coordination needed.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transfer process identifier - ULID-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferProcessId(ulid::Ulid);

impl TransferProcessId {
    /// Generate a new unique process id
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransferProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferProcessId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Which side of the transfer this connector plays
///
/// Fixed for the lifetime of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum ProcessType {
    /// We requested the asset from a remote provider
    Consumer = 1,
    /// We serve the asset to a remote consumer
    Provider = 2,
}

impl ProcessType {
    /// Get numeric id for persistence
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from a persisted id
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(ProcessType::Consumer),
            2 => Some(ProcessType::Provider),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::Consumer => "CONSUMER",
            ProcessType::Provider => "PROVIDER",
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection metadata for a data source or destination.
///
/// `secret` is only ever populated in flight: the manager moves it into the
/// vault under `key_name` before the address is persisted, and resolves it
/// back when an outbound message needs it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataAddress {
    /// Transport-specific type tag, e.g. "HttpData"
    pub address_type: String,
    /// Vault key under which the secret is (or will be) stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    /// Inline secret; stripped before persistence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Free-form transport properties (endpoint, bucket, region, ...)
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl DataAddress {
    pub fn new(address_type: impl Into<String>) -> Self {
        Self {
            address_type: address_type.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

/// One resource that must exist before the transfer can proceed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub id: String,
    pub resource_type: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ResourceDefinition {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            properties: HashMap::new(),
        }
    }
}

/// The set of resources to provision for one transfer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceManifest {
    pub definitions: Vec<ResourceDefinition>,
}

impl ResourceManifest {
    pub fn new(definitions: Vec<ResourceDefinition>) -> Self {
        Self { definitions }
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// A successfully provisioned resource, keyed back to its definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    /// Id of the [`ResourceDefinition`] this satisfies
    pub definition_id: String,
    pub resource_type: String,
    /// Address material produced by the provisioner (endpoint, credentials key)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_address: Option<DataAddress>,
}

/// Outcome record of one deprovisioned resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeprovisionedResource {
    pub definition_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Consumer-side initiation parameters
///
/// `id` is the caller's external identifier and doubles as the idempotency
/// key: initiating twice with the same id returns the same process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: String,
    pub contract_id: String,
    pub asset_id: String,
    /// Data-plane flavor, e.g. "HttpData-PULL"; selects the status checker
    pub transfer_type: String,
    pub protocol: String,
    pub counter_party_address: String,
    pub data_destination: DataAddress,
}

/// A negotiated contract agreement, resolved by the validation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractAgreement {
    pub id: String,
    pub provider_id: String,
    pub consumer_id: String,
    pub asset_id: String,
    pub policy: Policy,
}

/// Opaque policy snapshot; this core never interprets its rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Serialized rule set, passed through to provisioners and dispatchers
    #[serde(default)]
    pub rules: serde_json::Value,
}

/// Verified claims extracted from a bearer token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimToken {
    pub claims: HashMap<String, String>,
}

impl ClaimToken {
    pub fn participant_id(&self) -> Option<&str> {
        self.claims.get("participant_id").map(String::as_str)
    }
}

/// Unverified bearer token as received from the transport layer
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRepresentation {
    pub token: String,
}

impl TokenRepresentation {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id_roundtrip() {
        let id = TransferProcessId::new();
        let parsed: TransferProcessId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_process_id_unique() {
        assert_ne!(TransferProcessId::new(), TransferProcessId::new());
    }

    #[test]
    fn test_process_id_serde_is_transparent() {
        let id = TransferProcessId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));

        let back: TransferProcessId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_process_ids_are_sortable() {
        let mut ids = vec![
            TransferProcessId::new(),
            TransferProcessId::new(),
            TransferProcessId::new(),
        ];
        ids.sort_unstable();
        for pair in ids.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_process_type_roundtrip() {
        assert_eq!(ProcessType::from_id(1), Some(ProcessType::Consumer));
        assert_eq!(ProcessType::from_id(2), Some(ProcessType::Provider));
        assert_eq!(ProcessType::from_id(0), None);
        assert_eq!(ProcessType::from_id(3), None);
    }

    #[test]
    fn test_data_address_builder() {
        let address = DataAddress::new("HttpData")
            .with_property("baseUrl", "https://data.example.com")
            .with_secret("s3cr3t");

        assert_eq!(address.address_type, "HttpData");
        assert_eq!(
            address.properties.get("baseUrl").map(String::as_str),
            Some("https://data.example.com")
        );
        assert_eq!(address.secret.as_deref(), Some("s3cr3t"));
    }

    #[test]
    fn test_data_address_secret_not_serialized_when_absent() {
        let address = DataAddress::new("HttpData");
        let json = serde_json::to_string(&address).unwrap();
        assert!(!json.contains("secret"));
    }
}

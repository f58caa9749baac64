//! Protocol Messages
//!
//! The asynchronous messages exchanged between counterparty connectors. Wire
//! encoding belongs to the transport layer; these are the behavior-level
//! shapes the orchestrators react to and emit.
//!
//! # Message Flow
//!
//! ```text
//! consumer: Request ->            provider: creates process (REQUESTED)
//! consumer: <- Start              provider: data flow established
//! either:   Suspension / Completion / Termination
//! ```
//!
//! Every message carries an `id` used for duplicate-redelivery suppression
//! and a `process_id`: the *sender's* pid, which is the receiver's
//! correlation id.

use serde::{Deserialize, Serialize};

use crate::types::DataAddress;

fn message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Consumer -> provider: open a transfer for an agreed contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequestMessage {
    pub id: String,
    /// The consumer's pid; becomes the provider's correlation id
    pub consumer_pid: String,
    pub contract_id: String,
    pub transfer_type: String,
    pub protocol: String,
    /// Where the provider should send its own protocol messages
    pub callback_address: String,
    pub data_destination: DataAddress,
}

/// Provider -> consumer: the data flow is established
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferStartMessage {
    pub id: String,
    /// Sender's pid (receiver looks its process up by correlation id)
    pub process_id: String,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_address: Option<DataAddress>,
}

/// Either party: pause the flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSuspensionMessage {
    pub id: String,
    pub process_id: String,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Either party: the transfer finished successfully
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCompletionMessage {
    pub id: String,
    pub process_id: String,
    pub protocol: String,
}

/// Either party: the transfer is over, by failure or by request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTerminationMessage {
    pub id: String,
    pub process_id: String,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Acknowledgement returned by the counterparty for a delivered message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferProcessAck {
    /// The counterparty's pid for this transfer, when it assigns one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
}

impl TransferRequestMessage {
    pub fn new(
        consumer_pid: impl Into<String>,
        contract_id: impl Into<String>,
        transfer_type: impl Into<String>,
        protocol: impl Into<String>,
        callback_address: impl Into<String>,
        data_destination: DataAddress,
    ) -> Self {
        Self {
            id: message_id(),
            consumer_pid: consumer_pid.into(),
            contract_id: contract_id.into(),
            transfer_type: transfer_type.into(),
            protocol: protocol.into(),
            callback_address: callback_address.into(),
            data_destination,
        }
    }
}

impl TransferStartMessage {
    pub fn new(
        process_id: impl Into<String>,
        protocol: impl Into<String>,
        data_address: Option<DataAddress>,
    ) -> Self {
        Self {
            id: message_id(),
            process_id: process_id.into(),
            protocol: protocol.into(),
            data_address,
        }
    }
}

impl TransferSuspensionMessage {
    pub fn new(
        process_id: impl Into<String>,
        protocol: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: message_id(),
            process_id: process_id.into(),
            protocol: protocol.into(),
            reason,
        }
    }
}

impl TransferCompletionMessage {
    pub fn new(process_id: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            id: message_id(),
            process_id: process_id.into(),
            protocol: protocol.into(),
        }
    }
}

impl TransferTerminationMessage {
    pub fn new(
        process_id: impl Into<String>,
        protocol: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: message_id(),
            process_id: process_id.into(),
            protocol: protocol.into(),
            code: None,
            reason,
        }
    }
}

/// Outbound message wrapper handed to the remote dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteMessage {
    Request {
        address: String,
        message: TransferRequestMessage,
    },
    Start {
        address: String,
        message: TransferStartMessage,
    },
    Suspend {
        address: String,
        message: TransferSuspensionMessage,
    },
    Complete {
        address: String,
        message: TransferCompletionMessage,
    },
    Terminate {
        address: String,
        message: TransferTerminationMessage,
    },
}

impl RemoteMessage {
    /// Counterparty endpoint this message targets
    pub fn address(&self) -> &str {
        match self {
            RemoteMessage::Request { address, .. }
            | RemoteMessage::Start { address, .. }
            | RemoteMessage::Suspend { address, .. }
            | RemoteMessage::Complete { address, .. }
            | RemoteMessage::Terminate { address, .. } => address,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RemoteMessage::Request { .. } => "TransferRequestMessage",
            RemoteMessage::Start { .. } => "TransferStartMessage",
            RemoteMessage::Suspend { .. } => "TransferSuspensionMessage",
            RemoteMessage::Complete { .. } => "TransferCompletionMessage",
            RemoteMessage::Terminate { .. } => "TransferTerminationMessage",
        }
    }
}

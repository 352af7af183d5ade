//! Wire payloads for the message and action streams.
//!
//! Every frame is one JSON document. Inbound payloads are what a client
//! sends; response payloads are what the broker pushes back. All of them are
//! immutable once built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ClientIdentity, RoomId, UserId};

/// A chat message sent by the client on the message stream.
///
/// Wire shape: `{"type": "chat", "text": "hi"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Message kind (`"chat"`, `"edit"`, ...). Interpreted by the broker.
    #[serde(rename = "type")]
    pub kind: String,
    /// Message body.
    pub text: String,
}

impl MessagePayload {
    /// Plain chat message.
    pub fn chat(text: impl Into<String>) -> Self {
        Self {
            kind: "chat".into(),
            text: text.into(),
        }
    }
}

/// A UI action sent by the client on the action stream (typing indicator,
/// room switch, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    /// Action kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Free-form action arguments.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// A message the broker delivers to this client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponsePayload {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Author of the message.
    pub user_id: UserId,
    /// Room the message was posted in.
    pub room_id: RoomId,
    /// Message body.
    pub text: String,
    /// When the broker accepted the message.
    pub sent_at: DateTime<Utc>,
}

/// An action the broker delivers to this client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponsePayload {
    /// Action kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// User that triggered the action.
    pub user_id: UserId,
    /// Room the action applies to.
    pub room_id: RoomId,
    /// Action arguments.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// An inbound payload tagged with the client that sent it.
///
/// The broker's ingestion queues are shared by every client, so the payload
/// alone does not say where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope<P> {
    /// Sender identity.
    pub from: ClientIdentity,
    /// Decoded payload.
    pub payload: P,
}

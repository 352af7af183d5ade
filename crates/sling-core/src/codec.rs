//! Stream codecs.
//!
//! A [`StreamCodec`] names the inbound and outbound payload types carried by
//! one logical stream. The relay is written once against this trait and
//! instantiated for [`MessageStream`] and [`ActionStream`].

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::{CodecError, Result};
use crate::payloads::{ActionPayload, ActionResponsePayload, MessagePayload, MessageResponsePayload};

/// The two logical streams a client holds open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Chat messages.
    Message,
    /// UI actions.
    Action,
}

impl StreamKind {
    /// Lowercase label used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Action => "action",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binds a payload pair to a stream.
pub trait StreamCodec: Send + Sync + 'static {
    /// Which stream this codec serves.
    const KIND: StreamKind;
    /// Payload decoded from client frames.
    type Inbound: DeserializeOwned + fmt::Debug + Send + 'static;
    /// Payload encoded into frames sent to the client.
    type Outbound: Serialize + fmt::Debug + Send + 'static;
}

/// Codec for the message stream.
#[derive(Debug)]
pub struct MessageStream;

impl StreamCodec for MessageStream {
    const KIND: StreamKind = StreamKind::Message;
    type Inbound = MessagePayload;
    type Outbound = MessageResponsePayload;
}

/// Codec for the action stream.
#[derive(Debug)]
pub struct ActionStream;

impl StreamCodec for ActionStream {
    const KIND: StreamKind = StreamKind::Action;
    type Inbound = ActionPayload;
    type Outbound = ActionResponsePayload;
}

/// Decode one frame body.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(CodecError::Decode)
}

/// Encode one payload as a JSON text body.
pub fn encode<T: Serialize>(payload: &T) -> Result<String> {
    serde_json::to_string(payload).map_err(CodecError::Encode)
}

//! # sling-core
//!
//! Shared vocabulary for the sling per-client relay.
//!
//! - **Identity**: [`ClientIdentity`] and the derived diagnostic [`ClientId`]
//! - **Payloads**: inbound [`MessagePayload`] / [`ActionPayload`] and their
//!   outbound response counterparts
//! - **Codecs**: [`StreamCodec`] binds a payload pair to one [`StreamKind`];
//!   [`MessageStream`] and [`ActionStream`] are the two instances
//! - **Errors**: [`CodecError`] via `thiserror`
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod payloads;

pub use codec::{ActionStream, MessageStream, StreamCodec, StreamKind, decode, encode};
pub use errors::CodecError;
pub use ids::{ClientId, ClientIdentity, RoomId, UserId};
pub use payloads::{
    ActionPayload, ActionResponsePayload, Envelope, MessagePayload, MessageResponsePayload,
};

//! # sling-relay
//!
//! Per-client relay between two WebSockets and a chat broker.
//!
//! - [`ClientActor`]: one user in one room, with a message stream and an
//!   action stream
//! - Per stream, a router (socket to broker) and a writer (broker to socket,
//!   plus heartbeat pings), both started by [`ClientActor::activate`]
//! - Liveness via read/write deadlines re-armed by pongs and inbound frames
//! - Teardown via a shared `CancellationToken`: the first failure stops all
//!   four loops and closes both sockets

#![deny(unsafe_code)]

pub mod client;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod shutdown;
pub mod transport;

pub use client::{ActiveClient, BrokerBindings, ClientActor, ClientReport};
pub use error::TransportError;
pub use relay::{LoopExit, RelayReport};
pub use shutdown::{ClientState, Teardown, TeardownReason};
pub use transport::{
    Frame, FrameReader, FrameWriter, Liveness, OutboundFrame, TransportAdapter, TransportCloser,
    WsStream,
};

//! One logical stream relayed between a WebSocket and the broker.
//!
//! A [`DuplexRelay`] owns one transport and both of its queues. Spawning it
//! starts two loops: the router (transport to broker) and the writer
//! (broker to transport, plus heartbeats). Both stop on the client's shared
//! [`Teardown`].

pub mod router;
pub mod writer;

use sling_core::{ClientIdentity, Envelope, StreamCodec};
use sling_settings::RelaySettings;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, info_span};

use crate::error::TransportError;
use crate::shutdown::Teardown;
use crate::transport::{TransportAdapter, WsStream};

/// Why a relay loop stopped.
#[derive(Debug)]
pub enum LoopExit {
    /// Teardown was raised elsewhere.
    Cancelled,
    /// The peer closed the stream normally.
    PeerClosed,
    /// The broker side of a queue was dropped.
    BrokerDetached,
    /// A read or write failed.
    Failed(TransportError),
    /// The loop panicked or outlived the grace period.
    Aborted,
}

impl LoopExit {
    /// Whether the loop stopped on its own fault.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Aborted)
    }
}

/// Exit of both loops of one stream.
#[derive(Debug)]
pub struct RelayReport {
    /// Transport-to-broker loop.
    pub router: LoopExit,
    /// Broker-to-transport loop.
    pub writer: LoopExit,
}

/// Handles of one stream's spawned loops.
pub(crate) struct RelayTasks {
    pub(crate) router: JoinHandle<LoopExit>,
    pub(crate) writer: JoinHandle<LoopExit>,
}

/// Transport plus queues for one stream, not yet running.
pub(crate) struct DuplexRelay<C: StreamCodec, S> {
    transport: TransportAdapter<S>,
    inbound: mpsc::Sender<Envelope<C::Inbound>>,
    outbound_tx: mpsc::Sender<C::Outbound>,
    outbound_rx: mpsc::Receiver<C::Outbound>,
}

impl<C: StreamCodec, S: WsStream> DuplexRelay<C, S> {
    /// Bind a transport to the broker's ingestion queue and allocate the
    /// outbound queue.
    pub(crate) fn new(
        transport: TransportAdapter<S>,
        inbound: mpsc::Sender<Envelope<C::Inbound>>,
        capacity: usize,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        Self {
            transport,
            inbound,
            outbound_tx,
            outbound_rx,
        }
    }

    /// Producer end of the outbound queue, for the broker.
    pub(crate) fn outbound(&self) -> mpsc::Sender<C::Outbound> {
        self.outbound_tx.clone()
    }

    /// Start the router and writer.
    pub(crate) fn spawn(
        self,
        identity: &ClientIdentity,
        teardown: &Teardown,
        settings: &RelaySettings,
    ) -> RelayTasks {
        let client = identity.client_id();
        let (reader, writer) = self.transport.split();

        let router_guard = teardown.enter_loop();
        let writer_guard = teardown.enter_loop();

        let router_span = info_span!("router", %client, stream = %C::KIND);
        let router = tokio::spawn(
            router::run_router::<C, S>(
                reader,
                self.inbound,
                identity.clone(),
                teardown.clone(),
                settings.read_timeout(),
                router_guard,
            )
            .instrument(router_span),
        );

        let writer_span = info_span!("writer", %client, stream = %C::KIND);
        let writer = tokio::spawn(
            writer::run_writer::<C, S>(
                writer,
                self.outbound_rx,
                teardown.clone(),
                writer::Heartbeat::from(settings),
                writer_guard,
            )
            .instrument(writer_span),
        );

        RelayTasks { router, writer }
    }
}

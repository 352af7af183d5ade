//! Client actor: one authenticated user in one room, holding a message
//! stream and an action stream open.
//!
//! A [`ClientActor`] is built from two established WebSockets and the
//! broker's ingestion queues. [`ClientActor::activate`] consumes it, starts
//! exactly four loops (router and writer per stream), and returns an
//! [`ActiveClient`] handle. When any loop fails, or the owner calls
//! [`ActiveClient::shutdown`], all four stop together.

use std::time::Duration;

use sling_core::{
    ActionPayload, ActionResponsePayload, ActionStream, ClientId, ClientIdentity, Envelope,
    MessagePayload, MessageResponsePayload, MessageStream, RoomId, UserId,
};
use sling_settings::RelaySettings;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::relay::{DuplexRelay, LoopExit, RelayReport, RelayTasks};
use crate::shutdown::{self, ClientState, Teardown, TeardownReason};
use crate::transport::{TransportAdapter, WsStream};

/// Broker ingestion queues shared by every client.
#[derive(Clone, Debug)]
pub struct BrokerBindings {
    /// Receives every decoded chat message.
    pub messages: mpsc::Sender<Envelope<MessagePayload>>,
    /// Receives every decoded UI action.
    pub actions: mpsc::Sender<Envelope<ActionPayload>>,
}

/// A client whose transports and queues exist but whose loops have not
/// started.
pub struct ClientActor<S> {
    identity: ClientIdentity,
    settings: RelaySettings,
    teardown: Teardown,
    message: DuplexRelay<MessageStream, S>,
    action: DuplexRelay<ActionStream, S>,
}

impl<S: WsStream> ClientActor<S> {
    /// Bind two established WebSockets to the broker.
    ///
    /// Both transports close when the client tears down.
    pub fn new(
        identity: ClientIdentity,
        message_ws: S,
        action_ws: S,
        bindings: BrokerBindings,
        settings: RelaySettings,
    ) -> Self {
        let teardown = Teardown::new(identity.client_id());
        let message = DuplexRelay::new(
            TransportAdapter::with_close_signal(message_ws, teardown.child_token()),
            bindings.messages,
            settings.queue_capacity,
        );
        let action = DuplexRelay::new(
            TransportAdapter::with_close_signal(action_ws, teardown.child_token()),
            bindings.actions,
            settings.queue_capacity,
        );
        Self {
            identity,
            settings,
            teardown,
            message,
            action,
        }
    }

    /// Diagnostic ID, `<user>@<room>`.
    pub fn id(&self) -> ClientId {
        self.identity.client_id()
    }

    /// Authenticated user.
    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    /// Joined room.
    pub fn room_id(&self) -> &RoomId {
        &self.identity.room_id
    }

    /// Always `Created` until activation.
    pub fn state(&self) -> ClientState {
        self.teardown.state()
    }

    /// Queue the broker pushes chat messages into.
    ///
    /// Take it before activating: once every sender is dropped the client
    /// tears down with [`TeardownReason::BrokerDetached`].
    pub fn message_queue(&self) -> mpsc::Sender<MessageResponsePayload> {
        self.message.outbound()
    }

    /// Queue the broker pushes actions into.
    pub fn action_queue(&self) -> mpsc::Sender<ActionResponsePayload> {
        self.action.outbound()
    }

    /// Start the four loops.
    ///
    /// Consuming `self` makes a second activation impossible. The returned
    /// handle does not keep the outbound queues open.
    pub fn activate(self) -> ActiveClient {
        let Self {
            identity,
            settings,
            teardown,
            message,
            action,
        } = self;

        let message_tx = message.outbound().downgrade();
        let action_tx = action.outbound().downgrade();

        teardown.activate();
        let message = message.spawn(&identity, &teardown, &settings);
        let action = action.spawn(&identity, &teardown, &settings);

        ActiveClient {
            identity,
            grace: settings.shutdown_grace(),
            activated_at: Instant::now(),
            teardown,
            message_tx,
            action_tx,
            message,
            action,
        }
    }
}

/// Handle to a running client.
pub struct ActiveClient {
    identity: ClientIdentity,
    grace: Duration,
    activated_at: Instant,
    teardown: Teardown,
    message_tx: mpsc::WeakSender<MessageResponsePayload>,
    action_tx: mpsc::WeakSender<ActionResponsePayload>,
    message: RelayTasks,
    action: RelayTasks,
}

impl ActiveClient {
    /// Diagnostic ID, `<user>@<room>`.
    pub fn id(&self) -> ClientId {
        self.identity.client_id()
    }

    /// Validated identity.
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Authenticated user.
    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    /// Joined room.
    pub fn room_id(&self) -> &RoomId {
        &self.identity.room_id
    }

    /// Another sender for the chat queue, while the broker still holds one.
    pub fn message_queue(&self) -> Option<mpsc::Sender<MessageResponsePayload>> {
        self.message_tx.upgrade()
    }

    /// Another sender for the action queue, while the broker still holds one.
    pub fn action_queue(&self) -> Option<mpsc::Sender<ActionResponsePayload>> {
        self.action_tx.upgrade()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.teardown.state()
    }

    /// Watch lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.teardown.subscribe()
    }

    /// First recorded teardown reason, if teardown has started.
    pub fn teardown_reason(&self) -> Option<TeardownReason> {
        self.teardown.reason()
    }

    /// Loops that have not yet exited.
    pub fn live_loops(&self) -> usize {
        self.teardown.live_loops()
    }

    /// Stop all four loops and close both transports.
    ///
    /// Idempotent; a reason recorded earlier is kept. Both transports
    /// close on the teardown signal.
    pub fn shutdown(&self) {
        if !self.teardown.raise(TeardownReason::Shutdown) {
            debug!(client = %self.identity, "shutdown after teardown already started");
        }
    }

    /// Resolves once every loop has exited.
    pub async fn wait_terminated(&self) {
        let mut state = self.teardown.subscribe();
        let _ = state.wait_for(|s| *s == ClientState::Terminated).await;
    }

    /// Wait for teardown, then collect the loops using the configured
    /// grace period.
    pub async fn join(self) -> ClientReport {
        let grace = self.grace;
        self.join_with_grace(grace).await
    }

    /// Wait for teardown, give the loops `grace` to exit, abort the rest.
    ///
    /// Does not request teardown itself; call [`shutdown`](Self::shutdown)
    /// first to stop a healthy client.
    pub async fn join_with_grace(self, grace: Duration) -> ClientReport {
        let Self {
            identity,
            activated_at,
            teardown,
            message,
            action,
            ..
        } = self;

        teardown.cancelled().await;
        let handles = vec![message.router, message.writer, action.router, action.writer];
        let mut exits = shutdown::drain(handles, grace).await.into_iter();
        let mut next = || exits.next().flatten().unwrap_or(LoopExit::Aborted);

        ClientReport {
            client_id: identity.client_id(),
            reason: teardown.reason().unwrap_or(TeardownReason::Aborted),
            message: RelayReport {
                router: next(),
                writer: next(),
            },
            action: RelayReport {
                router: next(),
                writer: next(),
            },
            lifetime: activated_at.elapsed(),
        }
    }
}

/// How a client ended.
#[derive(Debug)]
pub struct ClientReport {
    /// Diagnostic ID.
    pub client_id: ClientId,
    /// First recorded teardown reason.
    pub reason: TeardownReason,
    /// Message stream loops.
    pub message: RelayReport,
    /// Action stream loops.
    pub action: RelayReport,
    /// Activation to join.
    pub lifetime: Duration,
}

impl ClientReport {
    /// Whether the client ended because of a fault.
    pub fn is_failure(&self) -> bool {
        self.reason.is_failure()
    }
}

//! Client teardown coordination via `CancellationToken`.
//!
//! One [`Teardown`] is shared by a client's four loops. The first loop (or
//! the owner) to raise it records the reason; every later raise is a no-op.
//! Raising cancels the token, which also closes both transports because
//! their close signals are child tokens.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use sling_core::{ClientId, StreamKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{info, warn};

use crate::metrics::{
    RELAY_CLIENT_LIFETIME_SECONDS, RELAY_CLIENTS_ACTIVE, RELAY_CLIENTS_TOTAL,
    RELAY_TEARDOWNS_TOTAL,
};

/// Lifecycle of one client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Transports and queues exist; no loops are running.
    Created,
    /// All four loops are running.
    Active,
    /// Teardown raised; loops are exiting.
    Draining,
    /// Every loop has exited.
    Terminated,
}

/// Why a client was torn down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TeardownReason {
    /// The owner asked for shutdown.
    Shutdown,
    /// The peer closed one stream with a normal or going-away code.
    PeerClosed {
        /// Stream that saw the close frame.
        stream: StreamKind,
    },
    /// A read or write failed.
    TransportFailed {
        /// Stream whose transport failed.
        stream: StreamKind,
        /// Rendered transport error.
        error: String,
    },
    /// The broker dropped its end of a queue.
    BrokerDetached {
        /// Stream whose queue closed.
        stream: StreamKind,
    },
    /// A loop ended without recording a reason (panic or abort).
    Aborted,
}

impl TeardownReason {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::PeerClosed { .. } => "peer_closed",
            Self::TransportFailed { .. } => "transport_failed",
            Self::BrokerDetached { .. } => "broker_detached",
            Self::Aborted => "aborted",
        }
    }

    /// Whether the teardown was caused by a fault rather than a request.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::TransportFailed { .. } | Self::Aborted)
    }
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => f.write_str("shutdown requested"),
            Self::PeerClosed { stream } => write!(f, "peer closed the {stream} stream"),
            Self::TransportFailed { stream, error } => {
                write!(f, "{stream} transport failed: {error}")
            }
            Self::BrokerDetached { stream } => write!(f, "broker detached from the {stream} queue"),
            Self::Aborted => f.write_str("loop aborted"),
        }
    }
}

struct TeardownInner {
    client: ClientId,
    token: CancellationToken,
    reason: OnceLock<TeardownReason>,
    state: watch::Sender<ClientState>,
    live_loops: AtomicUsize,
    activated_at: OnceLock<Instant>,
}

/// Shared teardown signal and lifecycle state for one client.
#[derive(Clone)]
pub struct Teardown {
    inner: Arc<TeardownInner>,
}

impl Teardown {
    /// New signal in the `Created` state.
    pub fn new(client: ClientId) -> Self {
        let (state, _) = watch::channel(ClientState::Created);
        Self {
            inner: Arc::new(TeardownInner {
                client,
                token: CancellationToken::new(),
                reason: OnceLock::new(),
                state,
                live_loops: AtomicUsize::new(0),
                activated_at: OnceLock::new(),
            }),
        }
    }

    /// Close signal for one transport of this client.
    pub fn child_token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    /// Resolves once teardown is raised.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.token.cancelled()
    }

    /// Whether teardown has been raised.
    pub fn is_raised(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// The first recorded reason.
    pub fn reason(&self) -> Option<TeardownReason> {
        self.inner.reason.get().cloned()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    /// Loops that have not yet exited.
    pub fn live_loops(&self) -> usize {
        self.inner.live_loops.load(Ordering::Acquire)
    }

    /// Move `Created` to `Active`.
    pub(crate) fn activate(&self) {
        let _ = self.inner.activated_at.set(Instant::now());
        let _ = self.inner.state.send_if_modified(|state| {
            let created = *state == ClientState::Created;
            if created {
                *state = ClientState::Active;
            }
            created
        });
        gauge!(RELAY_CLIENTS_ACTIVE).increment(1.0);
        counter!(RELAY_CLIENTS_TOTAL).increment(1);
        info!(client = %self.inner.client, "client active");
    }

    /// Record `reason` and cancel every loop.
    ///
    /// Returns `true` only for the raise whose reason was recorded.
    pub fn raise(&self, reason: TeardownReason) -> bool {
        let first = self.inner.reason.set(reason).is_ok();
        if first {
            if let Some(reason) = self.inner.reason.get() {
                counter!(RELAY_TEARDOWNS_TOTAL, "reason" => reason.label()).increment(1);
                if reason.is_failure() {
                    warn!(client = %self.inner.client, %reason, "client teardown");
                } else {
                    info!(client = %self.inner.client, %reason, "client teardown");
                }
            }
        }
        self.inner.token.cancel();
        let _ = self.inner.state.send_if_modified(|state| match state {
            ClientState::Created | ClientState::Active => {
                *state = ClientState::Draining;
                true
            }
            ClientState::Draining | ClientState::Terminated => false,
        });
        first
    }

    /// Count a loop as running until the guard drops.
    ///
    /// Take the guard before spawning so the count never reaches zero while
    /// a sibling loop is still starting.
    pub(crate) fn enter_loop(&self) -> LoopGuard {
        let _ = self.inner.live_loops.fetch_add(1, Ordering::AcqRel);
        LoopGuard {
            teardown: self.clone(),
        }
    }

    fn loop_exited(&self) {
        // A loop that ends without raising was aborted or panicked.
        let _ = self.raise(TeardownReason::Aborted);
        if self.inner.live_loops.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.terminate();
        }
    }

    fn terminate(&self) {
        let _ = self.inner.state.send_replace(ClientState::Terminated);
        if let Some(activated_at) = self.inner.activated_at.get() {
            gauge!(RELAY_CLIENTS_ACTIVE).decrement(1.0);
            histogram!(RELAY_CLIENT_LIFETIME_SECONDS).record(activated_at.elapsed().as_secs_f64());
        }
        info!(client = %self.inner.client, "client terminated");
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("client", &self.inner.client)
            .field("state", &self.state())
            .field("reason", &self.inner.reason.get())
            .field("live_loops", &self.live_loops())
            .finish()
    }
}

/// Held by a running loop; dropping it marks the loop as exited.
pub(crate) struct LoopGuard {
    teardown: Teardown,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.teardown.loop_exited();
    }
}

/// Wait up to `grace` for every handle, aborting the ones still running.
///
/// Returns each task's output in order, `None` for tasks that panicked or
/// had to be aborted.
pub async fn drain<T>(handles: Vec<JoinHandle<T>>, grace: Duration) -> Vec<Option<T>> {
    let deadline = Instant::now() + grace;
    let waits = handles.into_iter().map(|mut handle| async move {
        match time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(output)) => Some(output),
            Ok(Err(e)) => {
                warn!(error = %e, "task ended abnormally");
                None
            }
            Err(_) => {
                warn!(?grace, "task outlived grace period, aborting");
                handle.abort();
                let _ = handle.await;
                None
            }
        }
    });
    futures::future::join_all(waits).await
}

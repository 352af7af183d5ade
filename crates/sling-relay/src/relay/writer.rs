//! Broker-to-transport loop with heartbeat pings.

use std::time::Duration;

use metrics::counter;
use sling_core::StreamCodec;
use sling_settings::RelaySettings;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace, warn};

use super::LoopExit;
use crate::error::TransportError;
use crate::metrics::RELAY_FRAMES_OUT_TOTAL;
use crate::shutdown::{LoopGuard, Teardown, TeardownReason};
use crate::transport::{FrameWriter, OutboundFrame, WsStream};

/// Timing for one writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Read deadline extension applied on start and on every pong.
    pub read_timeout: Duration,
    /// Deadline for each write.
    pub write_timeout: Duration,
}

impl From<&RelaySettings> for Heartbeat {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            ping_interval: settings.ping_interval(),
            read_timeout: settings.read_timeout(),
            write_timeout: settings.write_timeout(),
        }
    }
}

/// Close code sent to the peer for a given teardown.
pub fn close_code(reason: Option<&TeardownReason>) -> CloseCode {
    match reason {
        None | Some(TeardownReason::PeerClosed { .. }) => CloseCode::Normal,
        Some(TeardownReason::Shutdown | TeardownReason::BrokerDetached { .. }) => CloseCode::Away,
        Some(TeardownReason::TransportFailed { .. } | TeardownReason::Aborted) => CloseCode::Error,
    }
}

/// Drain the outbound queue onto the transport and keep the peer alive.
///
/// Primes the read deadline and installs the pong callback before the
/// first wait, so a peer that never answers is detected even if nothing is
/// ever sent. On exit the transport is always closed.
pub(crate) async fn run_writer<C, S>(
    mut writer: FrameWriter<S>,
    mut outbound: mpsc::Receiver<C::Outbound>,
    teardown: Teardown,
    heartbeat: Heartbeat,
    _guard: LoopGuard,
) -> LoopExit
where
    C: StreamCodec,
    S: WsStream,
{
    let stream = C::KIND;
    let read_timeout = heartbeat.read_timeout;
    writer.liveness().extend_read_deadline(read_timeout);
    writer
        .liveness()
        .on_pong(move |liveness| liveness.extend_read_deadline(read_timeout));

    let mut ping_interval = time::interval(heartbeat.ping_interval);
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;
    debug!("writer started");

    let fail = |e: TransportError| -> LoopExit {
        if teardown.is_raised() {
            debug!(error = %e, "writer stopped by teardown");
            return LoopExit::Cancelled;
        }
        warn!(error = %e, "write failed");
        let _ = teardown.raise(TeardownReason::TransportFailed {
            stream,
            error: e.to_string(),
        });
        LoopExit::Failed(e)
    };

    let exit = loop {
        tokio::select! {
            () = teardown.cancelled() => break LoopExit::Cancelled,
            next = outbound.recv() => {
                let Some(payload) = next else {
                    warn!("broker outbound queue closed");
                    let _ = teardown.raise(TeardownReason::BrokerDetached { stream });
                    break LoopExit::BrokerDetached;
                };
                let body = match sling_core::encode(&payload) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(error = %e, ?payload, "dropping unencodable payload");
                        continue;
                    }
                };
                writer.liveness().extend_write_deadline(heartbeat.write_timeout);
                if let Err(e) = writer.write_frame(OutboundFrame::Text(body)).await {
                    break fail(e);
                }
                counter!(RELAY_FRAMES_OUT_TOTAL, "stream" => stream.as_str()).increment(1);
            }
            _ = ping_interval.tick() => {
                writer.liveness().extend_write_deadline(heartbeat.write_timeout);
                if let Err(e) = writer.write_frame(OutboundFrame::Ping).await {
                    break fail(e);
                }
                trace!("ping");
            }
        }
    };

    let reason = teardown.reason();
    let code = close_code(reason.as_ref());
    writer.close(code, "").await;
    exit
}

//! Transport-to-broker loop.

use std::time::Duration;

use metrics::counter;
use sling_core::{ClientIdentity, Envelope, StreamCodec};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, trace, warn};

use super::LoopExit;
use crate::metrics::{RELAY_DECODE_ERRORS_TOTAL, RELAY_FRAMES_IN_TOTAL};
use crate::shutdown::{LoopGuard, Teardown, TeardownReason};
use crate::transport::{FrameReader, WsStream};

/// Read frames, decode them, and hand them to the broker in arrival order.
///
/// Every received frame re-arms the read deadline. Malformed frames are
/// logged and dropped. A full broker queue blocks this loop, which in turn
/// stops reading from the socket; the read deadline is suspended for as
/// long as the broker holds it up.
pub(crate) async fn run_router<C, S>(
    mut reader: FrameReader<S>,
    inbound: mpsc::Sender<Envelope<C::Inbound>>,
    identity: ClientIdentity,
    teardown: Teardown,
    read_timeout: Duration,
    _guard: LoopGuard,
) -> LoopExit
where
    C: StreamCodec,
    S: WsStream,
{
    let stream = C::KIND;
    let detached = || {
        warn!("broker inbound queue closed");
        let _ = teardown.raise(TeardownReason::BrokerDetached { stream });
        LoopExit::BrokerDetached
    };
    debug!("router started");

    loop {
        let frame = match reader.read_frame().await {
            Ok(frame) => frame,
            Err(e) if e.is_graceful() => {
                info!(error = %e, "peer closed stream");
                let _ = teardown.raise(TeardownReason::PeerClosed { stream });
                return LoopExit::PeerClosed;
            }
            Err(e) if teardown.is_raised() => {
                debug!(error = %e, "router stopped by teardown");
                return LoopExit::Cancelled;
            }
            Err(e) => {
                warn!(error = %e, "read failed");
                let _ = teardown.raise(TeardownReason::TransportFailed {
                    stream,
                    error: e.to_string(),
                });
                return LoopExit::Failed(e);
            }
        };

        reader.liveness().extend_read_deadline(read_timeout);
        counter!(RELAY_FRAMES_IN_TOTAL, "stream" => stream.as_str()).increment(1);

        let payload = match frame.decode::<C::Inbound>() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, len = frame.as_bytes().len(), "dropping malformed frame");
                counter!(RELAY_DECODE_ERRORS_TOTAL, "stream" => stream.as_str()).increment(1);
                continue;
            }
        };

        let envelope = Envelope {
            from: identity.clone(),
            payload,
        };
        let envelope = match inbound.try_reserve() {
            Ok(permit) => {
                permit.send(envelope);
                continue;
            }
            Err(TrySendError::Closed(())) => return detached(),
            Err(TrySendError::Full(())) => envelope,
        };

        // Pongs go unread while the broker is full, so the peer is not
        // judged until reading resumes.
        reader.liveness().clear_read_deadline();
        trace!("broker queue full");
        tokio::select! {
            sent = inbound.send(envelope) => {
                if sent.is_err() {
                    return detached();
                }
            }
            () = teardown.cancelled() => {
                debug!("router stopped by teardown while enqueueing");
                return LoopExit::Cancelled;
            }
        }
        reader.liveness().extend_read_deadline(read_timeout);
    }
}

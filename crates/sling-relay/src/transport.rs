//! WebSocket transport adapter.
//!
//! Wraps one established WebSocket and splits it into a [`FrameReader`]
//! (owned by the router loop) and a [`FrameWriter`] (owned by the writer
//! loop). The halves share a [`Liveness`] record holding the read and write
//! deadlines plus the pong callback, and a close signal that unblocks both
//! halves at once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use sling_core::CodecError;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::TransportError;

/// How long a best-effort close frame may take.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Any full-duplex WebSocket the adapter can drive.
///
/// Satisfied by `tokio_tungstenite::WebSocketStream` over any I/O type.
pub trait WsStream:
    Stream<Item = Result<Message, tungstenite::Error>>
    + Sink<Message, Error = tungstenite::Error>
    + Unpin
    + Send
    + 'static
{
}

impl<T> WsStream for T where
    T: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin
        + Send
        + 'static
{
}

/// A data frame received from the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame. Expected to carry UTF-8 JSON.
    Binary(Vec<u8>),
}

impl Frame {
    /// Raw frame body.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Decode the body as one JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        match self {
            Self::Text(text) => sling_core::decode(text.as_bytes()),
            Self::Binary(bytes) => {
                let text = std::str::from_utf8(bytes)?;
                sling_core::decode(text.as_bytes())
            }
        }
    }
}

/// A frame the writer can emit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Encoded payload.
    Text(String),
    /// Empty heartbeat ping.
    Ping,
}

/// Invoked by the reader for every pong it sees.
pub type PongCallback = Box<dyn Fn(&Liveness) + Send + Sync>;

struct LivenessInner {
    read_deadline: watch::Sender<Option<Instant>>,
    write_deadline: Mutex<Option<Instant>>,
    on_pong: Mutex<Option<PongCallback>>,
}

/// Deadlines and pong handling shared by both halves of one transport.
///
/// A pending read observes deadline changes immediately; a write picks up
/// the deadline in force when it starts.
#[derive(Clone)]
pub struct Liveness {
    inner: Arc<LivenessInner>,
}

impl Liveness {
    fn new() -> Self {
        let (read_deadline, _) = watch::channel(None);
        Self {
            inner: Arc::new(LivenessInner {
                read_deadline,
                write_deadline: Mutex::new(None),
                on_pong: Mutex::new(None),
            }),
        }
    }

    /// Fail any read still pending at `at`.
    pub fn set_read_deadline(&self, at: Instant) {
        let _ = self.inner.read_deadline.send_replace(Some(at));
    }

    /// Push the read deadline to `now + by`.
    pub fn extend_read_deadline(&self, by: Duration) {
        self.set_read_deadline(Instant::now() + by);
    }

    /// Suspend the read deadline until it is set again.
    pub fn clear_read_deadline(&self) {
        let _ = self.inner.read_deadline.send_replace(None);
    }

    /// Current read deadline.
    pub fn read_deadline(&self) -> Option<Instant> {
        *self.inner.read_deadline.borrow()
    }

    /// Fail any write started after this call that has not finished by `at`.
    pub fn set_write_deadline(&self, at: Instant) {
        *self.inner.write_deadline.lock() = Some(at);
    }

    /// Push the write deadline to `now + by`.
    pub fn extend_write_deadline(&self, by: Duration) {
        self.set_write_deadline(Instant::now() + by);
    }

    /// Current write deadline.
    pub fn write_deadline(&self) -> Option<Instant> {
        *self.inner.write_deadline.lock()
    }

    /// Replace the pong callback.
    pub fn on_pong<F>(&self, callback: F)
    where
        F: Fn(&Liveness) + Send + Sync + 'static,
    {
        *self.inner.on_pong.lock() = Some(Box::new(callback));
    }

    fn pong_received(&self) {
        let callback = self.inner.on_pong.lock();
        if let Some(callback) = callback.as_ref() {
            callback(self);
        }
    }

    fn watch_read_deadline(&self) -> watch::Receiver<Option<Instant>> {
        self.inner.read_deadline.subscribe()
    }
}

impl fmt::Debug for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Liveness")
            .field("read_deadline", &self.read_deadline())
            .field("write_deadline", &self.write_deadline())
            .finish_non_exhaustive()
    }
}

/// Closes a transport from outside its loops.
#[derive(Clone, Debug)]
pub struct TransportCloser {
    closed: CancellationToken,
}

impl TransportCloser {
    /// Unblock the pending read and fail every later write.
    pub fn force_close(&self) {
        self.closed.cancel();
    }

    /// Whether the transport has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// One established WebSocket, not yet split between loops.
pub struct TransportAdapter<S> {
    stream: S,
    liveness: Liveness,
    closed: CancellationToken,
}

impl<S: WsStream> TransportAdapter<S> {
    /// Wrap a WebSocket with its own close signal.
    pub fn new(stream: S) -> Self {
        Self::with_close_signal(stream, CancellationToken::new())
    }

    /// Wrap a WebSocket that also closes when `closed` is cancelled.
    ///
    /// Pass a child of the client's teardown token so every transport of
    /// a client closes together.
    pub fn with_close_signal(stream: S, closed: CancellationToken) -> Self {
        Self {
            stream,
            liveness: Liveness::new(),
            closed,
        }
    }

    /// Shared deadline state.
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Handle for closing the transport from another task.
    pub fn close_handle(&self) -> TransportCloser {
        TransportCloser {
            closed: self.closed.clone(),
        }
    }

    /// Split into the reading and writing halves.
    pub fn split(self) -> (FrameReader<S>, FrameWriter<S>) {
        let (sink, stream) = self.stream.split();
        let reader = FrameReader {
            stream,
            deadline: self.liveness.watch_read_deadline(),
            liveness: self.liveness.clone(),
            closed: self.closed.clone(),
        };
        let writer = FrameWriter {
            sink,
            liveness: self.liveness,
            closed: self.closed,
        };
        (reader, writer)
    }
}

/// Reading half of a transport.
pub struct FrameReader<S> {
    stream: SplitStream<S>,
    deadline: watch::Receiver<Option<Instant>>,
    liveness: Liveness,
    closed: CancellationToken,
}

impl<S: WsStream> FrameReader<S> {
    /// Shared deadline state.
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Block until the next data frame.
    ///
    /// Pings are answered by the WebSocket layer and pongs go to the pong
    /// callback; neither is returned. Fails when the read deadline passes,
    /// the peer closes, the connection drops, or the transport is
    /// force-closed.
    pub async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            let deadline = *self.deadline.borrow_and_update();
            let expiry = async move {
                match deadline {
                    Some(at) => time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            // Buffered frames and pongs win over a deadline that has just
            // passed.
            let next = tokio::select! {
                biased;
                () = self.closed.cancelled() => return Err(TransportError::ForceClosed),
                next = self.stream.next() => next,
                changed = self.deadline.changed() => {
                    // Sender lives in `self.liveness`, so this never errors.
                    let _ = changed;
                    continue;
                }
                () = expiry => return Err(TransportError::ReadDeadlineExceeded),
            };

            match next {
                Some(Ok(Message::Text(text))) => return Ok(Frame::Text(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => return Ok(Frame::Binary(bytes.to_vec())),
                Some(Ok(Message::Pong(_))) => {
                    trace!("pong");
                    self.liveness.pong_received();
                }
                Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                        None => (None, String::new()),
                    };
                    return Err(TransportError::Closed { code, reason });
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::ConnectionLost),
            }
        }
    }
}

/// Writing half of a transport.
pub struct FrameWriter<S> {
    sink: SplitSink<S, Message>,
    liveness: Liveness,
    closed: CancellationToken,
}

impl<S: WsStream> FrameWriter<S> {
    /// Shared deadline state.
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Write one frame, bounded by the current write deadline.
    pub async fn write_frame(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ForceClosed);
        }
        let message = match frame {
            OutboundFrame::Text(body) => Message::Text(body.into()),
            OutboundFrame::Ping => Message::Ping(Vec::new().into()),
        };

        let send = self.sink.send(message);
        let result = match self.liveness.write_deadline() {
            Some(at) => time::timeout_at(at, send)
                .await
                .map_err(|_| TransportError::WriteDeadlineExceeded)?,
            None => send.await,
        };
        result.map_err(TransportError::from)
    }

    /// Send a close frame and release the transport.
    ///
    /// Best effort: the close signal is raised first, and failures to send
    /// the frame are only logged.
    pub async fn close(&mut self, code: CloseCode, reason: &str) {
        self.closed.cancel();
        let frame = CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };
        let sent = time::timeout(CLOSE_TIMEOUT, async {
            self.sink.send(Message::Close(Some(frame))).await?;
            self.sink.close().await
        })
        .await;
        match sent {
            Ok(Ok(())) => debug!(code = u16::from(code), "close frame sent"),
            Ok(Err(e)) => debug!(error = %e, "close frame not delivered"),
            Err(_) => debug!("close frame timed out"),
        }
    }
}

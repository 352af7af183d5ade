//! Transport error types.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Close code for a normal, completed session.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code for an endpoint going away (page navigation, server restart).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Terminal failure of one transport.
///
/// Every variant ends the adapter; nothing here is retried.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer sent a close frame.
    #[error("peer closed the connection (code {code:?}): {reason}")]
    Closed {
        /// Close code, `None` when the frame carried no status.
        code: Option<u16>,
        /// Close reason text.
        reason: String,
    },
    /// The stream ended without a close frame.
    #[error("connection lost without a close frame")]
    ConnectionLost,
    /// Nothing arrived before the read deadline.
    #[error("read deadline exceeded")]
    ReadDeadlineExceeded,
    /// A frame could not be written before the write deadline.
    #[error("write deadline exceeded")]
    WriteDeadlineExceeded,
    /// The transport was closed locally during teardown.
    #[error("transport force-closed")]
    ForceClosed,
    /// Protocol or I/O error from the WebSocket layer.
    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),
}

impl TransportError {
    /// Peer-initiated normal or going-away closure.
    ///
    /// Everything else, including a close frame with any other code, is
    /// abnormal.
    pub fn is_graceful(&self) -> bool {
        matches!(
            self,
            Self::Closed {
                code: Some(CLOSE_NORMAL | CLOSE_GOING_AWAY),
                ..
            }
        )
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

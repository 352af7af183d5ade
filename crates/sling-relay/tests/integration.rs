//! End-to-end tests: a client actor over real TCP WebSockets, with the test
//! playing both the remote peer and the broker.

use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};

use sling_core::logging::capture_logs;
use sling_core::{
    ActionPayload, ActionResponsePayload, Envelope, MessagePayload, MessageResponsePayload,
    StreamKind,
};
use sling_relay::{
    ActiveClient, BrokerBindings, ClientActor, ClientState, LoopExit, TeardownReason,
};
use sling_settings::RelaySettings;

const TIMEOUT: Duration = Duration::from_secs(5);

type ServerWs = WebSocketStream<TcpStream>;
type PeerWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Accept one WebSocket on an ephemeral port and connect to it.
async fn connect_pair() -> (ServerWs, PeerWs) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = async {
        let (tcp, _) = listener.accept().await.unwrap();
        accept_async(tcp).await.unwrap()
    };
    let connect = async { connect_async(format!("ws://{addr}")).await.unwrap().0 };
    tokio::join!(accept, connect)
}

/// A remote client that keeps reading (so pings are answered) and forwards
/// every data and close frame to the test.
struct Peer {
    sink: SplitSink<PeerWs, Message>,
    frames: mpsc::UnboundedReceiver<Message>,
    reader: JoinHandle<()>,
}

impl Drop for Peer {
    // The reader task owns the other half of the socket.
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Peer {
    fn responsive(ws: PeerWs) -> Self {
        let (sink, mut stream) = ws.split();
        let (tx, frames) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                if matches!(msg, Message::Ping(_) | Message::Pong(_)) {
                    continue;
                }
                if tx.send(msg).is_err() {
                    break;
                }
            }
        });
        Self {
            sink,
            frames,
            reader,
        }
    }

    async fn send_text(&mut self, body: &str) {
        self.sink.send(Message::Text(body.into())).await.unwrap();
    }

    async fn send_close(&mut self, code: CloseCode) {
        let frame = CloseFrame {
            code,
            reason: "test".into(),
        };
        self.sink.send(Message::Close(Some(frame))).await.unwrap();
    }

    async fn next_frame(&mut self) -> Message {
        timeout(TIMEOUT, self.frames.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("peer reader ended")
    }

    async fn next_text(&mut self) -> String {
        match self.next_frame().await {
            Message::Text(body) => body.as_str().to_owned(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    async fn expect_close(&mut self, code: CloseCode) {
        loop {
            match self.next_frame().await {
                Message::Close(Some(frame)) => {
                    assert_eq!(frame.code, code);
                    return;
                }
                Message::Close(None) => panic!("close frame without a code"),
                _ => {}
            }
        }
    }
}

fn settings() -> RelaySettings {
    RelaySettings {
        queue_capacity: 16,
        ping_interval_ms: 50,
        read_timeout_ms: 300,
        write_timeout_ms: 500,
        shutdown_grace_ms: 1_000,
    }
}

/// The broker's side of one client.
struct Harness {
    client: ActiveClient,
    messages: mpsc::Receiver<Envelope<MessagePayload>>,
    actions: mpsc::Receiver<Envelope<ActionPayload>>,
    message_out: mpsc::Sender<MessageResponsePayload>,
    action_out: mpsc::Sender<ActionResponsePayload>,
}

async fn start_client(settings: RelaySettings) -> (Harness, PeerWs, PeerWs) {
    let (message_ws, message_peer) = connect_pair().await;
    let (action_ws, action_peer) = connect_pair().await;
    let (message_tx, messages) = mpsc::channel(settings.queue_capacity);
    let (action_tx, actions) = mpsc::channel(settings.queue_capacity);

    let actor = ClientActor::new(
        sling_core::ClientIdentity::new("u1", "r1"),
        message_ws,
        action_ws,
        BrokerBindings {
            messages: message_tx,
            actions: action_tx,
        },
        settings,
    );
    let message_out = actor.message_queue();
    let action_out = actor.action_queue();
    let client = actor.activate();
    (
        Harness {
            client,
            messages,
            actions,
            message_out,
            action_out,
        },
        message_peer,
        action_peer,
    )
}

async fn start_responsive(settings: RelaySettings) -> (Harness, Peer, Peer) {
    let (harness, message_peer, action_peer) = start_client(settings).await;
    (
        harness,
        Peer::responsive(message_peer),
        Peer::responsive(action_peer),
    )
}

async fn recv<T>(rx: &mut mpsc::Receiver<T>) -> T {
    timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for broker")
        .expect("broker queue closed")
}

fn chat(text: &str) -> String {
    json!({"type": "chat", "text": text}).to_string()
}

// ── Round trips ─────────────────────────────────────────────────────

#[tokio::test]
async fn chat_message_reaches_broker_and_response_reaches_peer() {
    let (mut h, mut message_peer, _action_peer) = start_responsive(settings()).await;
    assert_eq!(h.client.id().as_str(), "u1@r1");

    message_peer.send_text(&chat("hi")).await;
    let envelope = recv(&mut h.messages).await;
    assert_eq!(envelope.payload, MessagePayload::chat("hi"));
    assert_eq!(envelope.from.user_id.as_str(), "u1");
    assert_eq!(envelope.from.room_id.as_str(), "r1");

    let response = MessageResponsePayload {
        kind: "chat".into(),
        user_id: "u2".into(),
        room_id: "r1".into(),
        text: "hello back".into(),
        sent_at: Utc::now(),
    };
    h.message_out.send(response.clone()).await.unwrap();
    let body = message_peer.next_text().await;
    let decoded: MessageResponsePayload = serde_json::from_str(&body).unwrap();
    assert_eq!(decoded, response);
}

#[tokio::test]
async fn action_stream_round_trip() {
    let (mut h, _message_peer, mut action_peer) = start_responsive(settings()).await;

    action_peer
        .send_text(r#"{"type":"typing","params":{"active":true}}"#)
        .await;
    let envelope = recv(&mut h.actions).await;
    assert_eq!(envelope.payload.kind, "typing");
    assert_eq!(envelope.payload.params["active"], true);

    let response = ActionResponsePayload {
        kind: "typing".into(),
        user_id: "u2".into(),
        room_id: "r1".into(),
        params: json!({"active": false}),
    };
    h.action_out.send(response.clone()).await.unwrap();
    let body = action_peer.next_text().await;
    let decoded: ActionResponsePayload = serde_json::from_str(&body).unwrap();
    assert_eq!(decoded, response);
}

#[tokio::test]
async fn binary_json_frames_are_accepted() {
    let (mut h, mut message_peer, _action_peer) = start_responsive(settings()).await;

    message_peer
        .sink
        .send(Message::Binary(chat("bin").into_bytes().into()))
        .await
        .unwrap();
    let envelope = recv(&mut h.messages).await;
    assert_eq!(envelope.payload.text, "bin");
}

// ── Ordering and backpressure ───────────────────────────────────────

#[tokio::test]
async fn each_stream_preserves_order() {
    let (mut h, mut message_peer, mut action_peer) = start_responsive(settings()).await;

    for i in 0..10 {
        message_peer.send_text(&chat(&format!("m{i}"))).await;
        action_peer
            .send_text(&json!({"type": "seq", "params": {"n": i}}).to_string())
            .await;
    }
    for i in 0..10 {
        assert_eq!(recv(&mut h.messages).await.payload.text, format!("m{i}"));
        assert_eq!(recv(&mut h.actions).await.payload.params["n"], i);
    }

    for i in 0..10 {
        h.message_out
            .send(MessageResponsePayload {
                kind: "chat".into(),
                user_id: "u2".into(),
                room_id: "r1".into(),
                text: format!("r{i}"),
                sent_at: Utc::now(),
            })
            .await
            .unwrap();
    }
    for i in 0..10 {
        let decoded: MessageResponsePayload =
            serde_json::from_str(&message_peer.next_text().await).unwrap();
        assert_eq!(decoded.text, format!("r{i}"));
    }
}

#[tokio::test]
async fn full_broker_queue_applies_backpressure_without_dropping() {
    let relay = RelaySettings {
        queue_capacity: 2,
        ..settings()
    };
    let (mut h, mut message_peer, _action_peer) = start_responsive(relay).await;

    for i in 0..8 {
        message_peer.send_text(&chat(&format!("m{i}"))).await;
    }
    // Broker is stalled; the relay must wait rather than drop.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.client.state(), ClientState::Active);

    for i in 0..8 {
        assert_eq!(recv(&mut h.messages).await.payload.text, format!("m{i}"));
    }
}

#[tokio::test]
async fn broker_stall_longer_than_read_timeout_keeps_client() {
    let relay = RelaySettings {
        queue_capacity: 1,
        ..settings()
    };
    let (mut h, mut message_peer, _action_peer) = start_responsive(relay).await;

    for i in 0..4 {
        message_peer.send_text(&chat(&format!("m{i}"))).await;
    }
    // More than twice the read timeout with the router blocked.
    sleep(Duration::from_millis(700)).await;
    assert_eq!(h.client.state(), ClientState::Active);

    for i in 0..4 {
        assert_eq!(recv(&mut h.messages).await.payload.text, format!("m{i}"));
    }
    // Pongs buffered during the stall are read once the router resumes.
    sleep(Duration::from_millis(400)).await;
    assert_eq!(h.client.state(), ClientState::Active);
    assert_eq!(h.client.teardown_reason(), None);
}

// ── Malformed input ─────────────────────────────────────────────────

#[tokio::test]
async fn malformed_frame_is_logged_and_skipped() {
    let (logs, _guard) = capture_logs();
    let (mut h, mut message_peer, _action_peer) = start_responsive(settings()).await;

    message_peer.send_text("{definitely not json").await;
    message_peer.send_text(&chat("still here")).await;

    let envelope = recv(&mut h.messages).await;
    assert_eq!(envelope.payload.text, "still here");
    assert_eq!(h.client.state(), ClientState::Active);
    assert!(logs.has_event(tracing::Level::WARN, "dropping malformed frame"));
}

// ── Liveness ────────────────────────────────────────────────────────

#[tokio::test]
async fn responsive_peer_survives_past_read_timeout() {
    let (h, _message_peer, _action_peer) = start_responsive(settings()).await;

    // Three read timeouts with no data frames; only pongs keep it alive.
    sleep(Duration::from_millis(900)).await;
    assert_eq!(h.client.state(), ClientState::Active);
    assert_eq!(h.client.teardown_reason(), None);
}

#[tokio::test]
async fn silent_peer_tears_down_both_streams() {
    let (h, silent_message_peer, action_peer) = start_client(settings()).await;
    let mut action_peer = Peer::responsive(action_peer);

    let report = timeout(TIMEOUT, h.client.join())
        .await
        .expect("silent peer was never detected");
    assert_matches!(
        report.reason,
        TeardownReason::TransportFailed {
            stream: StreamKind::Message,
            ..
        }
    );
    assert!(report.is_failure());
    assert_matches!(report.message.router, LoopExit::Failed(_));
    assert!(!report.action.writer.is_failure());

    // The healthy stream is closed too.
    action_peer.expect_close(CloseCode::Error).await;
    drop(silent_message_peer);
}

// ── Peer closure ────────────────────────────────────────────────────

#[tokio::test]
async fn graceful_close_ends_client_without_error() {
    let (h, mut message_peer, mut action_peer) = start_responsive(settings()).await;

    action_peer.send_close(CloseCode::Normal).await;
    let report = timeout(TIMEOUT, h.client.join()).await.unwrap();
    assert_eq!(
        report.reason,
        TeardownReason::PeerClosed {
            stream: StreamKind::Action
        }
    );
    assert!(!report.is_failure());
    assert_matches!(report.action.router, LoopExit::PeerClosed);
    message_peer.expect_close(CloseCode::Normal).await;
}

#[tokio::test]
async fn going_away_close_is_graceful() {
    let (h, mut message_peer, _action_peer) = start_responsive(settings()).await;

    message_peer.send_close(CloseCode::Away).await;
    let report = timeout(TIMEOUT, h.client.join()).await.unwrap();
    assert_eq!(
        report.reason,
        TeardownReason::PeerClosed {
            stream: StreamKind::Message
        }
    );
}

#[tokio::test]
async fn abnormal_close_code_is_a_failure() {
    let (h, mut message_peer, _action_peer) = start_responsive(settings()).await;

    message_peer.send_close(CloseCode::Policy).await;
    let report = timeout(TIMEOUT, h.client.join()).await.unwrap();
    assert_matches!(
        report.reason,
        TeardownReason::TransportFailed {
            stream: StreamKind::Message,
            ..
        }
    );
    assert!(report.is_failure());
}

#[tokio::test]
async fn dropped_connection_is_a_failure() {
    let (h, message_peer, _action_peer) = start_responsive(settings()).await;

    drop(message_peer);
    let report = timeout(TIMEOUT, h.client.join()).await.unwrap();
    assert!(report.is_failure());
}

// ── Shutdown and cleanup ────────────────────────────────────────────

#[tokio::test]
async fn shutdown_terminates_and_releases_broker_queues() {
    let (mut h, mut message_peer, mut action_peer) = start_responsive(settings()).await;
    let mut state = h.client.watch_state();
    assert_eq!(h.client.live_loops(), 4);

    h.client.shutdown();
    assert_eq!(h.client.state(), ClientState::Draining);
    let report = timeout(TIMEOUT, h.client.join()).await.unwrap();

    assert_eq!(report.reason, TeardownReason::Shutdown);
    assert!(!report.is_failure());
    for exit in [
        &report.message.router,
        &report.message.writer,
        &report.action.router,
        &report.action.writer,
    ] {
        assert_matches!(exit, LoopExit::Cancelled);
    }
    assert_eq!(*state.borrow_and_update(), ClientState::Terminated);

    // Every sender the relay held is gone.
    assert!(h.messages.recv().await.is_none());
    assert!(h.actions.recv().await.is_none());

    message_peer.expect_close(CloseCode::Away).await;
    action_peer.expect_close(CloseCode::Away).await;
}

#[tokio::test]
async fn wait_terminated_resolves_after_shutdown() {
    let (h, _message_peer, _action_peer) = start_responsive(settings()).await;

    h.client.shutdown();
    timeout(TIMEOUT, h.client.wait_terminated()).await.unwrap();
    assert_eq!(h.client.state(), ClientState::Terminated);
    assert_eq!(h.client.live_loops(), 0);
}

#[tokio::test]
async fn first_teardown_reason_wins() {
    let (h, mut message_peer, _action_peer) = start_responsive(settings()).await;

    message_peer.send_close(CloseCode::Normal).await;
    timeout(TIMEOUT, h.client.wait_terminated()).await.unwrap();
    h.client.shutdown();

    assert_eq!(
        h.client.teardown_reason(),
        Some(TeardownReason::PeerClosed {
            stream: StreamKind::Message
        })
    );
}

#[tokio::test]
async fn detached_broker_tears_down_client() {
    let (h, mut message_peer, _action_peer) = start_responsive(settings()).await;
    let Harness {
        client, messages, ..
    } = h;
    drop(messages);

    message_peer.send_text(&chat("anyone?")).await;
    let report = timeout(TIMEOUT, client.join()).await.unwrap();
    assert_eq!(
        report.reason,
        TeardownReason::BrokerDetached {
            stream: StreamKind::Message
        }
    );
}

#[tokio::test]
async fn dropping_every_outbound_sender_detaches_broker() {
    let (h, mut message_peer, _action_peer) = start_responsive(settings()).await;
    let Harness {
        client,
        message_out,
        ..
    } = h;
    let extra = client.message_queue().expect("broker still holds a sender");

    drop(message_out);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(client.state(), ClientState::Active);

    drop(extra);
    let report = timeout(TIMEOUT, client.join()).await.unwrap();
    assert_eq!(
        report.reason,
        TeardownReason::BrokerDetached {
            stream: StreamKind::Message
        }
    );
    assert_matches!(report.message.writer, LoopExit::BrokerDetached);
    message_peer.expect_close(CloseCode::Away).await;
}

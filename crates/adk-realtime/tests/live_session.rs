//! End-to-end tests against an in-process scripted WebSocket server.

use adk_realtime::{
    LiveClient, LiveConfig, LiveEvent, PlaybackCommand, SocketState, StatusState, Transcript,
};
use futures_util::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async,
    tungstenite::{
        Message,
        handshake::server::{Request, Response},
    },
};

struct TestServer {
    addr: std::net::SocketAddr,
    uris: mpsc::UnboundedReceiver<String>,
    conns: mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>,
}

/// Accepts connections forever, recording each handshake's request URI and
/// handing the upgraded stream to the test.
async fn spawn_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (uri_tx, uris) = mpsc::unbounded_channel();
    let (conn_tx, conns) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let uri_tx = uri_tx.clone();
            let callback = move |req: &Request, resp: Response| {
                let _ = uri_tx.send(req.uri().to_string());
                Ok(resp)
            };
            if let Ok(ws) = accept_hdr_async(stream, callback).await {
                let _ = conn_tx.send(ws);
            }
        }
    });
    TestServer { addr, uris, conns }
}

fn client_config(addr: std::net::SocketAddr) -> LiveConfig {
    LiveConfig {
        endpoint: format!("ws://{addr}"),
        reconnect_delay: Duration::from_millis(100),
        send_window: Duration::from_millis(150),
        ..LiveConfig::default()
    }
}

async fn recv_timeout<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

async fn next_event(events: &mut mpsc::Receiver<LiveEvent>) -> LiveEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

/// Skips non-status events and asserts the next status transition.
async fn expect_status(events: &mut mpsc::Receiver<LiveEvent>, from: StatusState, to: StatusState) {
    loop {
        match next_event(events).await {
            LiveEvent::Status { from: f, to: t } => {
                assert_eq!((f, t), (from, to), "unexpected status transition");
                return;
            }
            _ => continue,
        }
    }
}

async fn next_text_frame(ws: &mut WebSocketStream<TcpStream>) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, raw: &str) {
    ws.send(Message::Text(raw.into())).await.unwrap();
}

#[tokio::test]
async fn text_turn_end_to_end() {
    let mut server = spawn_server().await;
    let (handle, mut events) = LiveClient::spawn(client_config(server.addr));
    let mut ws = recv_timeout(&mut server.conns).await;

    let uri = recv_timeout(&mut server.uris).await;
    assert_eq!(uri, format!("/ws/{}?is_audio=false", handle.session_id()));

    handle.send_text("hello").await;
    let frame = next_text_frame(&mut ws).await;
    assert_eq!(frame["mime_type"], "text/plain");
    assert_eq!(frame["data"], "hello");

    expect_status(&mut events, StatusState::Idle, StatusState::Sending).await;
    expect_status(&mut events, StatusState::Sending, StatusState::Processing).await;

    send_json(&mut ws, r#"{"mime_type":"text/plain","data":"Hi "}"#).await;
    send_json(&mut ws, r#"{"mime_type":"text/plain","data":"there"}"#).await;
    send_json(&mut ws, r#"{"turn_complete":true}"#).await;

    let mut transcript = Transcript::new();
    let mut latency = None;
    let mut statuses = Vec::new();
    let sealed = loop {
        match next_event(&mut events).await {
            LiveEvent::Text(chunk) => transcript.push_chunk(&chunk),
            LiveEvent::Status { from, to } => statuses.push((from, to)),
            LiveEvent::Latency(snapshot) => latency = Some(snapshot),
            LiveEvent::TurnComplete => break transcript.complete().expect("no sealed message"),
            other => panic!("unexpected event {other:?}"),
        }
    };
    assert_eq!(sealed.text, "Hi there");
    assert_eq!(
        statuses,
        vec![
            (StatusState::Processing, StatusState::Responding),
            (StatusState::Responding, StatusState::Idle),
        ]
    );

    let latency = latency.expect("no latency snapshot");
    assert!(latency.total >= latency.processing + latency.response);
    // A second turn_complete with no intervening content changes nothing.
    send_json(&mut ws, r#"{"turn_complete":true}"#).await;
    loop {
        match next_event(&mut events).await {
            LiveEvent::Status { .. } => panic!("duplicate turn_complete moved the status"),
            LiveEvent::TurnComplete => break,
            _ => continue,
        }
    }
    assert!(transcript.complete().is_none());
}

#[tokio::test]
async fn voice_turn_settles_after_the_send_window() {
    let mut server = spawn_server().await;
    let (handle, mut events) = LiveClient::spawn(LiveConfig {
        audio_mode: true,
        ..client_config(server.addr)
    });
    let mut ws = recv_timeout(&mut server.conns).await;
    let uri = recv_timeout(&mut server.uris).await;
    assert!(uri.ends_with("?is_audio=true"));

    handle.capture_started().await;
    expect_status(&mut events, StatusState::Idle, StatusState::Listening).await;

    handle.send_audio_chunk(vec![0, 1, 2, 3]).await;
    let frame = next_text_frame(&mut ws).await;
    assert_eq!(frame["mime_type"], "audio/pcm");
    assert_eq!(frame["data"], "AAECAw==");

    expect_status(&mut events, StatusState::Listening, StatusState::Sending).await;
    // No end-of-utterance signal: the send window promotes the dispatch.
    let started = Instant::now();
    expect_status(&mut events, StatusState::Sending, StatusState::Processing).await;
    assert!(started.elapsed() >= Duration::from_millis(140));
}

#[tokio::test]
async fn interruption_flushes_playback_and_abandons_the_turn() {
    let mut server = spawn_server().await;
    let (handle, mut events) = LiveClient::spawn(client_config(server.addr));
    let mut ws = recv_timeout(&mut server.conns).await;

    let (playback_tx, mut playback_rx) = mpsc::channel(16);
    handle.register_playback(playback_tx).await;

    handle.send_text("tell me a story").await;
    next_text_frame(&mut ws).await;
    send_json(&mut ws, r#"{"mime_type":"text/plain","data":"Once upon"}"#).await;
    send_json(&mut ws, r#"{"mime_type":"audio/pcm","data":"AAECAw=="}"#).await;
    send_json(&mut ws, r#"{"interrupted":true}"#).await;

    let mut transcript = Transcript::new();
    loop {
        match next_event(&mut events).await {
            LiveEvent::Text(chunk) => transcript.push_chunk(&chunk),
            LiveEvent::Interrupted => break,
            LiveEvent::TurnComplete => panic!("interruption completed the turn"),
            _ => continue,
        }
    }
    // Abandoned, not sealed: the partial text is dropped.
    transcript.abandon();
    assert!(transcript.complete().is_none());

    let first = tokio::time::timeout(Duration::from_secs(5), playback_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, PlaybackCommand::Pcm(vec![0, 1, 2, 3]));
    let second = tokio::time::timeout(Duration::from_secs(5), playback_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, PlaybackCommand::EndOfAudio);

    // Status is Idle regardless of prior state: a fresh input starts cleanly.
    handle.send_text("again").await;
    expect_status(&mut events, StatusState::Idle, StatusState::Sending).await;
}

#[tokio::test]
async fn unexpected_closes_reconnect_with_the_same_identity() {
    let mut server = spawn_server().await;
    let (handle, _events) = LiveClient::spawn(LiveConfig {
        audio_mode: true,
        ..client_config(server.addr)
    });
    let expected = format!("/ws/{}?is_audio=true", handle.session_id());

    let mut arrivals = Vec::new();
    for _ in 0..4 {
        let uri = recv_timeout(&mut server.uris).await;
        arrivals.push(Instant::now());
        assert_eq!(uri, expected);
        let ws = recv_timeout(&mut server.conns).await;
        // Unexpected close; the client schedules exactly one reconnect.
        drop(ws);
    }
    for pair in arrivals.windows(2) {
        let spacing = pair[1].duration_since(pair[0]);
        assert!(spacing >= Duration::from_millis(90), "spacing {spacing:?}");
    }
}

#[tokio::test]
async fn send_while_closed_is_a_silent_drop() {
    // Bind then drop, so the port refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (handle, mut events) = LiveClient::spawn(LiveConfig {
        endpoint: format!("ws://{addr}"),
        reconnect_delay: Duration::from_secs(600),
        ..LiveConfig::default()
    });
    loop {
        if let LiveEvent::Connection(SocketState::Closed) = next_event(&mut events).await {
            break;
        }
    }

    handle.send_text("into the void").await;
    // No queue, no status movement, no panic.
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            matches!(event, LiveEvent::Connection(_)),
            "dropped send produced {event:?}"
        );
    }
}

#[tokio::test]
async fn send_while_connecting_is_a_silent_drop() {
    // Accept the TCP connection but hold the upgrade, so the client sits in
    // Connecting with the handshake in flight.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (handle, mut events) = LiveClient::spawn(LiveConfig {
        endpoint: format!("ws://{addr}"),
        reconnect_delay: Duration::from_secs(600),
        ..LiveConfig::default()
    });
    let (stream, _) = listener.accept().await.unwrap();

    handle.send_text("sent mid-handshake").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut ws = accept_hdr_async(stream, |_req: &Request, resp: Response| Ok(resp))
        .await
        .unwrap();
    loop {
        if let LiveEvent::Connection(SocketState::Open) = next_event(&mut events).await {
            break;
        }
    }

    // No outbound queue: only what was sent after the socket opened arrives.
    handle.send_text("after open").await;
    let frame = next_text_frame(&mut ws).await;
    assert_eq!(frame["data"], "after open");
}

#[tokio::test]
async fn audio_mode_switch_cycles_the_connection() {
    let mut server = spawn_server().await;
    let (handle, _events) = LiveClient::spawn(client_config(server.addr));

    let uri = recv_timeout(&mut server.uris).await;
    assert_eq!(uri, format!("/ws/{}?is_audio=false", handle.session_id()));
    let mut ws = recv_timeout(&mut server.conns).await;

    let mut watch = handle.audio_mode_watch();
    handle.set_audio_mode(true).await;

    // The client closes first; the fresh connect reuses the reconnect path.
    let closed = tokio::time::timeout(Duration::from_secs(5), ws.next()).await.unwrap();
    assert!(matches!(closed, None | Some(Ok(Message::Close(_)))));

    let uri = recv_timeout(&mut server.uris).await;
    assert_eq!(uri, format!("/ws/{}?is_audio=true", handle.session_id()));
    assert!(*watch.borrow_and_update());
}

#[tokio::test]
async fn decode_failure_drops_the_envelope_but_not_the_socket() {
    let mut server = spawn_server().await;
    let (handle, mut events) = LiveClient::spawn(client_config(server.addr));
    let mut ws = recv_timeout(&mut server.conns).await;
    loop {
        if let LiveEvent::Connection(SocketState::Open) = next_event(&mut events).await {
            break;
        }
    }

    handle.send_text("hi").await;
    next_text_frame(&mut ws).await;

    send_json(&mut ws, "this is not json").await;
    send_json(&mut ws, r#"{"mime_type":"image/png","data":"x"}"#).await;
    send_json(&mut ws, r#"{"mime_type":"text/plain","data":"still here"}"#).await;

    loop {
        match next_event(&mut events).await {
            LiveEvent::Text(chunk) => {
                assert_eq!(chunk, "still here");
                break;
            }
            LiveEvent::Connection(state) => {
                panic!("socket cycled after a decode failure: {state:?}")
            }
            _ => continue,
        }
    }
}

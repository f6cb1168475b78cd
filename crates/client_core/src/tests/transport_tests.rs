use super::*;
use axum::{
    extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use shared::domain::JobMode;
use tokio::net::TcpListener;

async fn spawn_channel_server(router: Router) -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}"))
}

async fn subscribe_then_report(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(report_progress_for_subscription)
}

async fn report_progress_for_subscription(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        let AxumMessage::Text(text) = message else {
            continue;
        };
        let Ok(ChannelRequest::Subscribe { job_id, .. }) = serde_json::from_str(&text) else {
            continue;
        };
        let _ = socket
            .send(AxumMessage::Text("{\"hello\":true}".to_string()))
            .await;
        let frame = ChannelFrame::progress(job_id, 40.0, "Simulating flood extent");
        let text = serde_json::to_string(&frame).expect("encode frame");
        let _ = socket.send(AxumMessage::Text(text)).await;
        let _ = socket.send(AxumMessage::Close(None)).await;
        break;
    }
}

async fn silent(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|socket| async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(socket);
    })
}

async fn attentive(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket| async move { while let Some(Ok(_)) = socket.recv().await {} })
}

#[test]
fn derives_websocket_url_from_http_base() {
    let session_id = SessionId::generate();
    let url = channel_url("http://127.0.0.1:5000", "/ws", session_id).expect("url");
    assert_eq!(url, format!("ws://127.0.0.1:5000/ws?session_id={session_id}"));

    let url = channel_url("https://rapid.example.org/base", "/status", session_id).expect("url");
    assert!(url.starts_with("wss://rapid.example.org/status?session_id="));
}

#[test]
fn rejects_non_http_server_urls() {
    let err = channel_url("ftp://example.org", "/ws", SessionId::generate()).expect_err("scheme");
    assert!(matches!(err, ChannelError::InvalidUrl { .. }));

    let err = channel_url("not a url", "/ws", SessionId::generate()).expect_err("parse");
    assert!(matches!(err, ChannelError::InvalidUrl { .. }));
}

#[tokio::test]
async fn subscribes_and_receives_frames_skipping_garbage() {
    let url = spawn_channel_server(Router::new().route("/ws", get(subscribe_then_report)))
        .await
        .expect("server");
    let transport = WsTransport::new(&url, "/ws", SessionId::generate(), None).expect("transport");
    let mut connection = transport.connect().await.expect("connect");

    connection
        .send(&ChannelRequest::subscribe("J1", Some(JobMode::Simulation)))
        .await
        .expect("subscribe");

    let frame = connection
        .next_frame()
        .await
        .expect("frame")
        .expect("decoded");
    assert_eq!(
        frame,
        ChannelFrame::progress("J1", 40.0, "Simulating flood extent")
    );
    assert!(connection.next_frame().await.is_none());
}

#[tokio::test]
async fn connect_failure_reports_endpoint() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let transport = WsTransport::new(&format!("http://{addr}"), "/ws", SessionId::generate(), None)
        .expect("transport");
    let err = transport.connect().await.err().expect("must fail");
    match err {
        ChannelError::Connect { url, .. } => assert!(url.starts_with(&format!("ws://{addr}/ws"))),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn keepalive_detects_unresponsive_peer() {
    let url = spawn_channel_server(Router::new().route("/ws", get(silent)))
        .await
        .expect("server");
    let transport = WsTransport::new(
        &url,
        "/ws",
        SessionId::generate(),
        Some(Duration::from_millis(50)),
    )
    .expect("transport");
    let mut connection = transport.connect().await.expect("connect");

    match connection.next_frame().await {
        Some(Err(ChannelError::Disconnected(reason))) => {
            assert_eq!(reason, "keepalive timed out")
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn keepalive_tolerates_quiet_but_responsive_peer() {
    let url = spawn_channel_server(Router::new().route("/ws", get(attentive)))
        .await
        .expect("server");
    let transport = WsTransport::new(
        &url,
        "/ws",
        SessionId::generate(),
        Some(Duration::from_millis(30)),
    )
    .expect("transport");
    let mut connection = transport.connect().await.expect("connect");

    let outcome =
        tokio::time::timeout(Duration::from_millis(250), connection.next_frame()).await;
    assert!(outcome.is_err(), "connection should still be open: {outcome:?}");
}

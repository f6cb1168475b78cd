//! WebSocket transport for the status-push channel.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::{
    domain::SessionId,
    protocol::{ChannelFrame, ChannelRequest},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::ChannelError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens connections to the status-push endpoint.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FrameConnection>, ChannelError>;
    fn endpoint(&self) -> &str;
}

/// One live push connection.
///
/// `next_frame` yields `None` when the peer closes cleanly and
/// `Some(Err(_))` when the connection breaks. Undecodable messages are
/// skipped by the implementation and never end the connection.
#[async_trait]
pub trait FrameConnection: Send {
    async fn send(&mut self, request: &ChannelRequest) -> Result<(), ChannelError>;
    async fn next_frame(&mut self) -> Option<Result<ChannelFrame, ChannelError>>;
}

pub struct WsTransport {
    url: String,
    keepalive: Option<Duration>,
}

impl WsTransport {
    pub fn new(
        server_url: &str,
        path: &str,
        session_id: SessionId,
        keepalive: Option<Duration>,
    ) -> Result<Self, ChannelError> {
        let url = channel_url(server_url, path, session_id)?;
        Ok(Self { url, keepalive })
    }
}

pub(crate) fn channel_url(
    server_url: &str,
    path: &str,
    session_id: SessionId,
) -> Result<String, ChannelError> {
    let invalid = |reason: String| ChannelError::InvalidUrl {
        url: server_url.to_string(),
        reason,
    };
    let mut url = Url::parse(server_url).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch scheme to {scheme}")))?;
    url.set_path(path);
    url.query_pairs_mut()
        .clear()
        .append_pair("session_id", &session_id.to_string());
    Ok(url.into())
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn connect(&self) -> Result<Box<dyn FrameConnection>, ChannelError> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| ChannelError::Connect {
                url: self.url.clone(),
                reason: err.to_string(),
            })?;
        Ok(Box::new(WsConnection {
            stream,
            keepalive: self.keepalive,
            awaiting_pong: false,
        }))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

struct WsConnection {
    stream: WsStream,
    keepalive: Option<Duration>,
    awaiting_pong: bool,
}

impl WsConnection {
    async fn next_message(&mut self) -> Result<Option<Message>, ChannelError> {
        loop {
            let Some(interval) = self.keepalive else {
                return self.stream.next().await.transpose().map_err(disconnected);
            };
            match tokio::time::timeout(interval, self.stream.next()).await {
                Ok(next) => {
                    self.awaiting_pong = false;
                    return next.transpose().map_err(disconnected);
                }
                Err(_) if self.awaiting_pong => {
                    return Err(ChannelError::Disconnected("keepalive timed out".to_string()));
                }
                Err(_) => {
                    self.awaiting_pong = true;
                    self.stream
                        .send(Message::Ping(Vec::new()))
                        .await
                        .map_err(disconnected)?;
                }
            }
        }
    }
}

fn disconnected(err: tokio_tungstenite::tungstenite::Error) -> ChannelError {
    ChannelError::Disconnected(err.to_string())
}

#[async_trait]
impl FrameConnection for WsConnection {
    async fn send(&mut self, request: &ChannelRequest) -> Result<(), ChannelError> {
        let text =
            serde_json::to_string(request).map_err(|err| ChannelError::Send(err.to_string()))?;
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|err| ChannelError::Send(err.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<ChannelFrame, ChannelError>> {
        loop {
            let message = match self.next_message().await {
                Ok(Some(message)) => message,
                Ok(None) => return None,
                Err(err) => return Some(Err(err)),
            };
            match message {
                Message::Text(text) => match ChannelFrame::decode(&text) {
                    Ok(frame) => return Some(Ok(frame)),
                    Err(err) => warn!(%err, "skipping undecodable channel message"),
                },
                Message::Close(frame) => {
                    debug!(?frame, "channel closed by peer");
                    return None;
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;

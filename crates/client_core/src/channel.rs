//! Long-lived push channel with reconnect and subscription replay.

use std::{sync::Arc, time::Duration};

use shared::{
    domain::{JobId, JobMode},
    protocol::{ChannelFrame, ChannelRequest},
};
use tokio::{
    sync::{broadcast, mpsc, watch},
    time::Instant,
};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    Stream, StreamExt,
};
use tracing::{debug, info, warn};

use crate::{
    backoff::{Backoff, ReconnectPolicy},
    transport::{FrameConnection, FrameTransport},
};

const DEFAULT_FRAME_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub path: String,
    pub keepalive: Option<Duration>,
    pub reconnect: ReconnectPolicy,
    pub frame_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            keepalive: Some(Duration::from_secs(20)),
            reconnect: ReconnectPolicy::default(),
            frame_buffer: DEFAULT_FRAME_BUFFER,
        }
    }
}

#[derive(Debug)]
enum ChannelCommand {
    Watch(ChannelRequest),
    Unwatch,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Handle to the single long-lived push connection.
///
/// The connection is driven by a background task that reconnects with
/// capped exponential backoff. Frames that arrive while disconnected are
/// lost; consumers must treat the frame sequence as best-effort.
#[derive(Clone)]
pub struct ChannelClient {
    commands: mpsc::UnboundedSender<ChannelCommand>,
    frames: broadcast::Sender<ChannelFrame>,
    state: watch::Receiver<ConnectionState>,
}

impl ChannelClient {
    pub fn spawn(transport: Arc<dyn FrameTransport>, config: &ChannelConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (frames, _) = broadcast::channel(config.frame_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let worker = ChannelWorker {
            transport,
            backoff: Backoff::new(config.reconnect),
            commands: commands_rx,
            frames: frames.clone(),
            state: state_tx,
            watched: None,
        };
        tokio::spawn(worker.run());

        Self {
            commands: commands_tx,
            frames,
            state: state_rx,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// A fresh, unbounded sequence of inbound frames starting from now.
    /// Call again to restart after dropping a previous sequence.
    pub fn frames(&self) -> impl Stream<Item = ChannelFrame> + Send + Unpin + 'static {
        BroadcastStream::new(self.frames.subscribe()).filter_map(|frame| match frame {
            Ok(frame) => Some(frame),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "frame consumer lagged; dropping frames");
                None
            }
        })
    }

    /// Subscribe to frames for `job_id`, replacing any earlier subscription.
    /// The subscription is replayed after every reconnect.
    pub fn watch_job(&self, job_id: JobId, mode: Option<JobMode>) {
        self.send(ChannelCommand::Watch(ChannelRequest::subscribe(job_id, mode)));
    }

    /// Forget the current subscription. Nothing is sent to the server.
    pub fn unwatch_job(&self) {
        self.send(ChannelCommand::Unwatch);
    }

    pub fn shutdown(&self) {
        self.send(ChannelCommand::Shutdown);
    }

    fn send(&self, command: ChannelCommand) {
        if self.commands.send(command).is_err() {
            debug!("channel worker already stopped");
        }
    }
}

struct ChannelWorker {
    transport: Arc<dyn FrameTransport>,
    backoff: Backoff,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
    frames: broadcast::Sender<ChannelFrame>,
    state: watch::Sender<ConnectionState>,
    watched: Option<ChannelRequest>,
}

impl ChannelWorker {
    async fn run(mut self) {
        let endpoint = self.transport.endpoint().to_string();
        info!(%endpoint, "channel client started");

        loop {
            self.set_state(ConnectionState::Connecting);
            let transport = Arc::clone(&self.transport);
            let connect = transport.connect();
            tokio::pin!(connect);

            let outcome = loop {
                tokio::select! {
                    biased;
                    command = self.commands.recv() => {
                        if self.apply(command) == Flow::Stop {
                            break None;
                        }
                    }
                    result = &mut connect => break Some(result),
                }
            };
            let Some(result) = outcome else {
                break;
            };

            match result {
                Ok(connection) => {
                    self.set_state(ConnectionState::Connected);
                    info!(%endpoint, "channel connected");
                    let connected_at = Instant::now();
                    if self.serve(connection).await == Flow::Stop {
                        break;
                    }
                    // Accept-then-drop storms keep backing off.
                    if connected_at.elapsed() >= self.backoff.policy().max_delay {
                        self.backoff.reset();
                    }
                }
                Err(err) => {
                    warn!(%err, attempt = self.backoff.attempts() + 1, "channel connect failed");
                }
            }

            self.set_state(ConnectionState::Disconnected);
            let delay = self.backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "scheduling channel reconnect");
            if self.sleep(delay).await == Flow::Stop {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!(%endpoint, "channel client stopped");
    }

    /// Backoff is reset once the connection delivers a frame.
    async fn serve(&mut self, mut connection: Box<dyn FrameConnection>) -> Flow {
        if let Some(request) = self.watched.clone() {
            if let Err(err) = connection.send(&request).await {
                warn!(%err, "failed to replay job subscription");
                return Flow::Continue;
            }
        }

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    let previous = self.watched.clone();
                    if self.apply(command) == Flow::Stop {
                        return Flow::Stop;
                    }
                    if self.watched == previous {
                        continue;
                    }
                    if let Some(request) = self.watched.clone() {
                        if let Err(err) = connection.send(&request).await {
                            warn!(%err, "failed to subscribe to job");
                            return Flow::Continue;
                        }
                    }
                }
                next = connection.next_frame() => match next {
                    Some(Ok(frame)) => {
                        debug!(job_id = %frame.job_id, kind = frame.kind(), "channel frame");
                        self.backoff.reset();
                        let _ = self.frames.send(frame);
                    }
                    Some(Err(err)) => {
                        warn!(%err, "channel connection lost");
                        return Flow::Continue;
                    }
                    None => {
                        info!("channel closed by server");
                        return Flow::Continue;
                    }
                },
            }
        }
    }

    async fn sleep(&mut self, delay: Duration) -> Flow {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    if self.apply(command) == Flow::Stop {
                        return Flow::Stop;
                    }
                }
                _ = &mut sleep => return Flow::Continue,
            }
        }
    }

    fn apply(&mut self, command: Option<ChannelCommand>) -> Flow {
        match command {
            Some(ChannelCommand::Watch(request)) => {
                debug!(?request, "watching job");
                self.watched = Some(request);
                Flow::Continue
            }
            Some(ChannelCommand::Unwatch) => {
                self.watched = None;
                Flow::Continue
            }
            Some(ChannelCommand::Shutdown) | None => Flow::Stop,
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;

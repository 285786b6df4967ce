//! Websocket connection worker for the rover server channel.
//!
//! The worker loops `connecting -> open -> closed -> connecting` until the
//! channel is dropped. Each successful connect publishes a fresh
//! [`ChannelSession`] through a `watch` cell; readers only ever observe an
//! open session or `None`.

use std::fmt;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::channel::session::ChannelSession;
use crate::retry::{with_timeout, BackoffPolicy};

/// Rover server endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:3001/ardupilot";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_QUEUE_CAPACITY: usize = 32;
const STATUS_CAPACITY: usize = 64;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings for [`ReconnectingChannel`].
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub endpoint: String,
    pub backoff: BackoffPolicy,
    pub connect_timeout: Duration,
    /// Frames a session buffers before new writes are dropped.
    pub queue_capacity: usize,
    /// Skip the network and discard every write.
    pub discard: bool,
}

impl ChannelConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::default().with_endpoint(endpoint)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim().to_string();
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);
        self
    }

    pub fn with_discard(mut self, discard: bool) -> Self {
        self.discard = discard;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            backoff: BackoffPolicy::reconnect(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            discard: false,
        }
    }
}

/// Why an open session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    WriteFailed(String),
    ReadFailed(String),
    ClosedByPeer,
    EndOfStream,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::WriteFailed(err) => write!(f, "write failed: {err}"),
            CloseReason::ReadFailed(err) => write!(f, "read failed: {err}"),
            CloseReason::ClosedByPeer => f.write_str("closed by peer"),
            CloseReason::EndOfStream => f.write_str("stream ended"),
        }
    }
}

/// Connection lifecycle updates produced by the channel worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelStatus {
    /// `attempt` is 1-based and counts since the last successful connect.
    Connecting { attempt: usize },
    ConnectFailed {
        attempt: usize,
        delay: Duration,
        error: String,
    },
    Connected { session_id: u64 },
    Disconnected { session_id: u64, reason: CloseReason },
}

/// Errors produced by the rover server channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Connect attempt did not complete in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Session queue is full; the frame was dropped.
    #[error("session queue is full")]
    Backpressure,

    /// Session's connection has closed.
    #[error("session is closed")]
    SessionClosed,
}

/// Self-healing connection to the rover server.
///
/// Dropping the channel stops the worker and closes the live connection.
#[derive(Debug)]
pub struct ReconnectingChannel {
    sessions: watch::Receiver<Option<ChannelSession>>,
    status: broadcast::Receiver<ChannelStatus>,
    task: JoinHandle<()>,
}

impl ReconnectingChannel {
    /// Starts the connect loop in a background task.
    pub fn spawn(config: ChannelConfig) -> Self {
        let (sessions_tx, sessions_rx) = watch::channel(None);
        let (status_tx, status_rx) = broadcast::channel(STATUS_CAPACITY);

        let task = tokio::spawn(async move {
            if config.discard {
                discard_worker(config, sessions_tx, status_tx).await;
            } else {
                channel_worker(config, sessions_tx, status_tx).await;
            }
        });

        Self {
            sessions: sessions_rx,
            status: status_rx,
            task,
        }
    }

    /// Returns a receiver that observes every session change.
    pub fn sessions(&self) -> watch::Receiver<Option<ChannelSession>> {
        self.sessions.clone()
    }

    /// Currently open session, if any.
    pub fn current(&self) -> Option<ChannelSession> {
        self.sessions.borrow().clone()
    }

    /// Receives the next lifecycle update.
    ///
    /// Updates older than the status buffer are skipped.
    pub async fn recv_status(&mut self) -> Option<ChannelStatus> {
        loop {
            match self.status.recv().await {
                Ok(status) => return Some(status),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(event = "channel_status_lagged", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Stops the worker and closes the live connection.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for ReconnectingChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn report(status_tx: &broadcast::Sender<ChannelStatus>, status: ChannelStatus) {
    let _ = status_tx.send(status);
}

async fn channel_worker(
    config: ChannelConfig,
    sessions_tx: watch::Sender<Option<ChannelSession>>,
    status_tx: broadcast::Sender<ChannelStatus>,
) {
    let mut next_session_id: u64 = 1;
    let mut failures: usize = 0;

    loop {
        report(
            &status_tx,
            ChannelStatus::Connecting {
                attempt: failures + 1,
            },
        );

        match open_socket(&config).await {
            Ok(socket) => {
                failures = 0;
                let session_id = next_session_id;
                next_session_id += 1;

                let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity.max(1));
                sessions_tx.send_replace(Some(ChannelSession::new(session_id, outbound_tx)));
                info!(
                    event = "channel_connected",
                    session_id,
                    endpoint = %config.endpoint
                );
                report(&status_tx, ChannelStatus::Connected { session_id });

                let reason = run_open_session(socket, outbound_rx).await;

                sessions_tx.send_replace(None);
                warn!(
                    event = "channel_disconnected",
                    session_id,
                    reason = %reason
                );
                report(
                    &status_tx,
                    ChannelStatus::Disconnected { session_id, reason },
                );
            }
            Err(err) => {
                failures += 1;
                let delay = config.backoff.delay_for_attempt(failures);
                warn!(
                    event = "channel_connect_failed",
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    endpoint = %config.endpoint,
                    error = %err
                );
                report(
                    &status_tx,
                    ChannelStatus::ConnectFailed {
                        attempt: failures,
                        delay,
                        error: err.to_string(),
                    },
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

async fn open_socket(config: &ChannelConfig) -> Result<Socket, ChannelError> {
    let (socket, _) = with_timeout(config.connect_timeout, connect_async(config.endpoint.as_str()))
        .await
        .map_err(|_| ChannelError::ConnectTimeout(config.connect_timeout))??;
    Ok(socket)
}

async fn run_open_session(
    mut socket: Socket,
    mut outbound_rx: mpsc::Receiver<String>,
) -> CloseReason {
    loop {
        tokio::select! {
            maybe_outbound = outbound_rx.recv() => {
                match maybe_outbound {
                    Some(text) => {
                        if let Err(err) = socket.send(Message::Text(text.into())).await {
                            return CloseReason::WriteFailed(err.to_string());
                        }
                    }
                    None => {
                        let _ = socket.close(None).await;
                        return CloseReason::EndOfStream;
                    }
                }
            }
            maybe_inbound = socket.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(err) = socket.send(Message::Pong(payload)).await {
                            return CloseReason::WriteFailed(err.to_string());
                        }
                    }
                    Some(Ok(Message::Close(_))) => return CloseReason::ClosedByPeer,
                    Some(Ok(Message::Text(text))) => {
                        trace!(event = "channel_inbound_ignored", len = text.len());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return CloseReason::ReadFailed(err.to_string()),
                    None => return CloseReason::EndOfStream,
                }
            }
        }
    }
}

async fn discard_worker(
    config: ChannelConfig,
    sessions_tx: watch::Sender<Option<ChannelSession>>,
    status_tx: broadcast::Sender<ChannelStatus>,
) {
    let session_id = 1;
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(config.queue_capacity.max(1));
    sessions_tx.send_replace(Some(ChannelSession::new(session_id, outbound_tx)));
    info!(event = "channel_discarding", session_id);
    report(&status_tx, ChannelStatus::Connected { session_id });

    while let Some(text) = outbound_rx.recv().await {
        trace!(event = "channel_discarded", text = %text);
    }
}

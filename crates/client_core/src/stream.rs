//! Per-chat push-event connections: one long-lived server-to-client stream
//! per target, with idempotent connect, explicit disconnect, and an unbounded
//! fixed-delay reconnect loop.
//!
//! The manager owns every transport handle. Events for one target are
//! delivered to the handler in arrival order; targets run independently.

use std::{collections::HashMap, pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest_eventsource::{Event, EventSource};
use rest_client::CredentialProvider;
use shared::domain::ChatId;
use thiserror::Error;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::error::SyncError;

/// Baseline delay between reconnect attempts after a transport failure.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One stream connection key: the per-chat event feed, or the per-chat
/// summarization progress feed. Both obey the same single-connection
/// invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTarget {
    ChatEvents(ChatId),
    Summarization(ChatId),
}

impl StreamTarget {
    pub fn chat_id(&self) -> ChatId {
        match self {
            StreamTarget::ChatEvents(id) | StreamTarget::Summarization(id) => *id,
        }
    }
}

impl std::fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamTarget::ChatEvents(id) => write!(f, "chat {id}"),
            StreamTarget::Summarization(id) => write!(f, "summarizer {id}"),
        }
    }
}

/// Raw pushed event before decoding: the kind tag and its JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrame {
    pub event: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The server accepted the connection; the feed is live.
    Opened,
    Frame(StreamFrame),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open event stream: {0}")]
    Connect(String),
    #[error("event stream interrupted: {0}")]
    Interrupted(String),
    #[error("event stream ended by the server")]
    Ended,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<TransportEvent, TransportError>> + Send>>;

/// Transport seam; the production implementation speaks SSE, tests script
/// their own sequences of events and failures.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn open(&self, target: StreamTarget, token: &str) -> Result<EventStream, TransportError>;
}

/// Receives everything a live connection produces, in arrival order.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn on_frame(&self, target: StreamTarget, frame: StreamFrame);

    /// Called when the credential disappears while a connection is supposed
    /// to stay up; synchronization for that target halts until reconnected.
    async fn on_credential_failure(&self, _target: StreamTarget) {}
}

/// Timer seam so tests can drive the reconnect backoff with a virtual clock.
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Live,
    Reconnecting,
}

/// Server-push connection over SSE. The credential rides the query string,
/// unlike REST calls which carry it in a header.
pub struct SseTransport {
    http: reqwest::Client,
    base_url: String,
}

impl SseTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl EventTransport for SseTransport {
    async fn open(&self, target: StreamTarget, token: &str) -> Result<EventStream, TransportError> {
        let request = match target {
            StreamTarget::ChatEvents(chat_id) => self
                .http
                .get(format!("{}/api/chats/{chat_id}/events", self.base_url))
                .query(&[("token", token)]),
            StreamTarget::Summarization(chat_id) => self
                .http
                .get(format!("{}/api/ai/summarizations/stream", self.base_url))
                .query(&[("chat_id", chat_id.to_string()), ("token", token.to_string())]),
        }
        .header("Accept", "text/event-stream");

        let source =
            EventSource::new(request).map_err(|err| TransportError::Connect(err.to_string()))?;
        Ok(Box::pin(source.map(|item| match item {
            Ok(Event::Open) => Ok(TransportEvent::Opened),
            Ok(Event::Message(message)) => Ok(TransportEvent::Frame(StreamFrame {
                event: message.event,
                data: message.data,
            })),
            Err(reqwest_eventsource::Error::StreamEnded) => Err(TransportError::Ended),
            Err(err) => Err(TransportError::Interrupted(err.to_string())),
        })))
    }
}

struct Connection {
    task: JoinHandle<()>,
    state: watch::Receiver<StreamState>,
}

/// Owns zero-or-one live connection per target.
pub struct StreamManager {
    transport: Arc<dyn EventTransport>,
    credentials: Arc<dyn CredentialProvider>,
    timer: Arc<dyn Timer>,
    reconnect_delay: Duration,
    connections: Mutex<HashMap<StreamTarget, Connection>>,
}

impl StreamManager {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        credentials: Arc<dyn CredentialProvider>,
        reconnect_delay: Duration,
    ) -> Self {
        Self::with_timer(transport, credentials, reconnect_delay, Arc::new(TokioTimer))
    }

    pub fn with_timer(
        transport: Arc<dyn EventTransport>,
        credentials: Arc<dyn CredentialProvider>,
        reconnect_delay: Duration,
        timer: Arc<dyn Timer>,
    ) -> Self {
        Self {
            transport,
            credentials,
            timer,
            reconnect_delay,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a connection for `target`. A no-op when one already exists;
    /// fails with [`SyncError::NoCredential`] when no token is available.
    pub async fn connect(
        &self,
        target: StreamTarget,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<(), SyncError> {
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(&target) {
            if !existing.task.is_finished() {
                warn!(%target, "stream: already connected");
                return Ok(());
            }
            connections.remove(&target);
        }

        if self.credentials.access_token().await.is_none() {
            return Err(SyncError::NoCredential);
        }

        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);
        let transport = Arc::clone(&self.transport);
        let credentials = Arc::clone(&self.credentials);
        let timer = Arc::clone(&self.timer);
        let delay = self.reconnect_delay;
        let task = tokio::spawn(async move {
            run_connection(transport, credentials, timer, delay, target, handler, state_tx).await;
        });

        connections.insert(
            target,
            Connection {
                task,
                state: state_rx,
            },
        );
        info!(%target, "stream: connection registered");
        Ok(())
    }

    /// Closes and removes the connection if present. Aborting the task also
    /// cancels any reconnect delay still pending for this target.
    pub async fn disconnect(&self, target: StreamTarget) {
        let removed = self.connections.lock().await.remove(&target);
        if let Some(connection) = removed {
            connection.task.abort();
            info!(%target, "stream: disconnected");
        }
    }

    pub async fn disconnect_all(&self) {
        let mut connections = self.connections.lock().await;
        for (target, connection) in connections.drain() {
            connection.task.abort();
            debug!(%target, "stream: disconnected");
        }
    }

    pub async fn state(&self, target: StreamTarget) -> StreamState {
        let connections = self.connections.lock().await;
        connections
            .get(&target)
            .map(|connection| *connection.state.borrow())
            .unwrap_or(StreamState::Disconnected)
    }

    pub async fn is_connected(&self, target: StreamTarget) -> bool {
        let connections = self.connections.lock().await;
        connections
            .get(&target)
            .is_some_and(|connection| !connection.task.is_finished())
    }
}

async fn run_connection(
    transport: Arc<dyn EventTransport>,
    credentials: Arc<dyn CredentialProvider>,
    timer: Arc<dyn Timer>,
    delay: Duration,
    target: StreamTarget,
    handler: Arc<dyn StreamHandler>,
    state: watch::Sender<StreamState>,
) {
    loop {
        let _ = state.send(StreamState::Connecting);
        // The provider is re-read on every attempt; this is the only place
        // streaming credentials are read.
        let Some(token) = credentials.access_token().await else {
            warn!(%target, "stream: credential missing; halting synchronization");
            let _ = state.send(StreamState::Disconnected);
            handler.on_credential_failure(target).await;
            return;
        };

        match transport.open(target, &token).await {
            Ok(mut stream) => {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(TransportEvent::Opened) => {
                            debug!(%target, "stream: live");
                            let _ = state.send(StreamState::Live);
                        }
                        Ok(TransportEvent::Frame(frame)) => {
                            handler.on_frame(target, frame).await;
                        }
                        Err(err) => {
                            warn!(%target, error = %err, "stream: transport failure");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(%target, error = %err, "stream: failed to open");
            }
        }

        let _ = state.send(StreamState::Reconnecting);
        timer.sleep(delay).await;
        info!(%target, "stream: reconnecting");
    }
}

#[cfg(test)]
#[path = "tests/stream_tests.rs"]
mod tests;

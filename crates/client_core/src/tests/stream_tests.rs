use super::*;
use std::{
    collections::HashMap as StdHashMap,
    convert::Infallible,
    sync::atomic::{AtomicUsize, Ordering},
    sync::Mutex as StdMutex,
};

use axum::{
    extract::Query,
    response::sse::{Event as ServerSseEvent, Sse},
    routing::get,
    Router,
};
use futures::stream;
use rest_client::{CredentialProvider, MissingCredentials, StaticCredentials};
use tokio::{net::TcpListener, sync::Notify};
use uuid::Uuid;

fn target(n: u128) -> StreamTarget {
    StreamTarget::ChatEvents(ChatId(Uuid::from_u128(n)))
}

fn frame(event: &str, data: &str) -> StreamFrame {
    StreamFrame {
        event: event.to_string(),
        data: data.to_string(),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Fails the first `failures` opens, then serves a live connection forever.
struct FlakyTransport {
    opens: AtomicUsize,
    failures: usize,
}

impl FlakyTransport {
    fn new(failures: usize) -> Self {
        Self {
            opens: AtomicUsize::new(0),
            failures,
        }
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventTransport for FlakyTransport {
    async fn open(&self, _target: StreamTarget, _token: &str) -> Result<EventStream, TransportError> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            Ok(Box::pin(stream::iter(vec![Err(TransportError::Interrupted(
                "connection reset".to_string(),
            ))])))
        } else {
            Ok(Box::pin(
                stream::iter(vec![Ok(TransportEvent::Opened)]).chain(stream::pending()),
            ))
        }
    }
}

/// Serves a fixed frame sequence, then stays open.
struct FrameTransport {
    opens: AtomicUsize,
    frames: Vec<StreamFrame>,
}

impl FrameTransport {
    fn new(frames: Vec<StreamFrame>) -> Self {
        Self {
            opens: AtomicUsize::new(0),
            frames,
        }
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventTransport for FrameTransport {
    async fn open(&self, _target: StreamTarget, _token: &str) -> Result<EventStream, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut items = vec![Ok(TransportEvent::Opened)];
        items.extend(
            self.frames
                .iter()
                .cloned()
                .map(|frame| Ok(TransportEvent::Frame(frame))),
        );
        Ok(Box::pin(stream::iter(items).chain(stream::pending())))
    }
}

#[derive(Default)]
struct RecordingHandler {
    frames: Mutex<Vec<(StreamTarget, StreamFrame)>>,
    credential_failures: AtomicUsize,
}

#[async_trait]
impl StreamHandler for RecordingHandler {
    async fn on_frame(&self, target: StreamTarget, frame: StreamFrame) {
        self.frames.lock().await.push((target, frame));
    }

    async fn on_credential_failure(&self, _target: StreamTarget) {
        self.credential_failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// Returns immediately, recording each requested delay.
#[derive(Default)]
struct RecordingTimer {
    sleeps: StdMutex<Vec<Duration>>,
}

impl RecordingTimer {
    fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Timer for RecordingTimer {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Signals entry, then never returns; lets tests freeze a pending backoff.
struct BlockingTimer {
    entered: Notify,
}

#[async_trait]
impl Timer for BlockingTimer {
    async fn sleep(&self, _duration: Duration) {
        self.entered.notify_one();
        futures::future::pending::<()>().await;
    }
}

/// Yields a token a bounded number of times, then reports none.
struct ExpiringCredentials {
    remaining: AtomicUsize,
}

#[async_trait]
impl CredentialProvider for ExpiringCredentials {
    async fn access_token(&self) -> Option<String> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left == 0 {
            return None;
        }
        self.remaining.fetch_sub(1, Ordering::SeqCst);
        Some("token-1".to_string())
    }
}

fn manager_with(
    transport: Arc<dyn EventTransport>,
    credentials: Arc<dyn CredentialProvider>,
    timer: Arc<dyn Timer>,
) -> StreamManager {
    StreamManager::with_timer(transport, credentials, Duration::from_secs(5), timer)
}

#[tokio::test]
async fn connect_is_idempotent_per_target() {
    let transport = Arc::new(FrameTransport::new(Vec::new()));
    let manager = manager_with(
        Arc::clone(&transport) as Arc<dyn EventTransport>,
        Arc::new(StaticCredentials::new("token-1")),
        Arc::new(RecordingTimer::default()),
    );
    let handler = Arc::new(RecordingHandler::default());

    manager
        .connect(target(7), Arc::clone(&handler) as Arc<dyn StreamHandler>)
        .await
        .unwrap();
    manager
        .connect(target(7), Arc::clone(&handler) as Arc<dyn StreamHandler>)
        .await
        .unwrap();

    wait_until(|| transport.opens() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.opens(), 1);
    assert!(manager.is_connected(target(7)).await);

    manager.disconnect(target(7)).await;
    assert!(!manager.is_connected(target(7)).await);
    assert_eq!(manager.state(target(7)).await, StreamState::Disconnected);
}

#[tokio::test]
async fn connect_without_credential_fails_fast() {
    let manager = manager_with(
        Arc::new(FrameTransport::new(Vec::new())),
        Arc::new(MissingCredentials),
        Arc::new(RecordingTimer::default()),
    );
    let handler = Arc::new(RecordingHandler::default());

    let result = manager
        .connect(target(7), handler as Arc<dyn StreamHandler>)
        .await;
    assert!(matches!(result, Err(SyncError::NoCredential)));
    assert!(!manager.is_connected(target(7)).await);
}

#[tokio::test]
async fn frames_reach_the_handler_in_arrival_order() {
    let frames = vec![
        frame("new_message", r#"{"seq":1}"#),
        frame("update_read_status", r#"{"seq":2}"#),
        frame("new_reaction", r#"{"seq":3}"#),
    ];
    let transport = Arc::new(FrameTransport::new(frames.clone()));
    let manager = manager_with(
        Arc::clone(&transport) as Arc<dyn EventTransport>,
        Arc::new(StaticCredentials::new("token-1")),
        Arc::new(RecordingTimer::default()),
    );
    let handler = Arc::new(RecordingHandler::default());

    manager
        .connect(target(3), Arc::clone(&handler) as Arc<dyn StreamHandler>)
        .await
        .unwrap();

    wait_until(|| handler.frames.try_lock().map(|f| f.len() == 3).unwrap_or(false)).await;
    let received = handler.frames.lock().await;
    let events: Vec<&str> = received.iter().map(|(_, f)| f.event.as_str()).collect();
    assert_eq!(events, vec!["new_message", "update_read_status", "new_reaction"]);
    assert!(received.iter().all(|(t, _)| *t == target(3)));
    assert_eq!(manager.state(target(3)).await, StreamState::Live);
}

#[tokio::test]
async fn n_failures_produce_n_spaced_reconnect_attempts() {
    let transport = Arc::new(FlakyTransport::new(3));
    let timer = Arc::new(RecordingTimer::default());
    let manager = manager_with(
        Arc::clone(&transport) as Arc<dyn EventTransport>,
        Arc::new(StaticCredentials::new("token-1")),
        Arc::clone(&timer) as Arc<dyn Timer>,
    );
    let handler = Arc::new(RecordingHandler::default());

    manager
        .connect(target(9), handler as Arc<dyn StreamHandler>)
        .await
        .unwrap();

    wait_until(|| transport.opens() == 4).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.state(target(9)).await != StreamState::Live {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stream never went live");

    let sleeps = timer.sleeps();
    assert_eq!(sleeps.len(), 3);
    assert!(sleeps.iter().all(|d| *d == Duration::from_secs(5)));
}

#[tokio::test]
async fn disconnect_cancels_a_pending_reconnect() {
    let transport = Arc::new(FlakyTransport::new(usize::MAX));
    let timer = Arc::new(BlockingTimer {
        entered: Notify::new(),
    });
    let manager = manager_with(
        Arc::clone(&transport) as Arc<dyn EventTransport>,
        Arc::new(StaticCredentials::new("token-1")),
        Arc::clone(&timer) as Arc<dyn Timer>,
    );
    let handler = Arc::new(RecordingHandler::default());

    manager
        .connect(target(7), handler as Arc<dyn StreamHandler>)
        .await
        .unwrap();

    // The first attempt has failed and the backoff sleep is now pending.
    timer.entered.notified().await;
    assert_eq!(transport.opens(), 1);
    assert_eq!(manager.state(target(7)).await, StreamState::Reconnecting);

    manager.disconnect(target(7)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.opens(), 1);
    assert_eq!(manager.state(target(7)).await, StreamState::Disconnected);
}

#[tokio::test]
async fn losing_the_credential_halts_the_connection() {
    let transport = Arc::new(FlakyTransport::new(1));
    let handler = Arc::new(RecordingHandler::default());
    let manager = manager_with(
        Arc::clone(&transport) as Arc<dyn EventTransport>,
        Arc::new(ExpiringCredentials {
            remaining: AtomicUsize::new(2),
        }),
        Arc::new(RecordingTimer::default()),
    );

    manager
        .connect(target(5), Arc::clone(&handler) as Arc<dyn StreamHandler>)
        .await
        .unwrap();

    wait_until(|| handler.credential_failures.load(Ordering::SeqCst) == 1).await;
    assert_eq!(transport.opens(), 1);
    assert!(!manager.is_connected(target(5)).await);
    assert_eq!(manager.state(target(5)).await, StreamState::Disconnected);
}

#[tokio::test]
async fn chat_and_summarizer_streams_are_tracked_independently() {
    let transport = Arc::new(FrameTransport::new(Vec::new()));
    let manager = manager_with(
        Arc::clone(&transport) as Arc<dyn EventTransport>,
        Arc::new(StaticCredentials::new("token-1")),
        Arc::new(RecordingTimer::default()),
    );
    let handler = Arc::new(RecordingHandler::default());
    let chat_id = ChatId(Uuid::from_u128(7));

    manager
        .connect(
            StreamTarget::ChatEvents(chat_id),
            Arc::clone(&handler) as Arc<dyn StreamHandler>,
        )
        .await
        .unwrap();
    manager
        .connect(
            StreamTarget::Summarization(chat_id),
            Arc::clone(&handler) as Arc<dyn StreamHandler>,
        )
        .await
        .unwrap();

    wait_until(|| transport.opens() == 2).await;

    manager.disconnect(StreamTarget::Summarization(chat_id)).await;
    assert!(manager.is_connected(StreamTarget::ChatEvents(chat_id)).await);
    assert!(
        !manager
            .is_connected(StreamTarget::Summarization(chat_id))
            .await
    );

    manager.disconnect_all().await;
    assert!(!manager.is_connected(StreamTarget::ChatEvents(chat_id)).await);
}

#[tokio::test]
async fn sse_transport_translates_server_events() {
    let seen_query: Arc<StdMutex<Option<StdHashMap<String, String>>>> =
        Arc::new(StdMutex::new(None));
    let recorded = Arc::clone(&seen_query);

    let app = Router::new().route(
        "/api/chats/:id/events",
        get(move |Query(params): Query<StdHashMap<String, String>>| {
            *recorded.lock().unwrap() = Some(params);
            async move {
                Sse::new(stream::iter([
                    Ok::<_, Infallible>(
                        ServerSseEvent::default()
                            .event("new_message")
                            .data(r#"{"seq":1}"#),
                    ),
                    Ok(ServerSseEvent::default()
                        .event("user_typing")
                        .data(r#"{"seq":2}"#)),
                ]))
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let transport = SseTransport::new(format!("http://{addr}"));
    let mut stream = transport
        .open(target(7), "token-1")
        .await
        .expect("open event stream");

    assert_eq!(stream.next().await.unwrap().unwrap(), TransportEvent::Opened);
    assert_eq!(
        stream.next().await.unwrap().unwrap(),
        TransportEvent::Frame(frame("new_message", r#"{"seq":1}"#))
    );
    assert_eq!(
        stream.next().await.unwrap().unwrap(),
        TransportEvent::Frame(frame("user_typing", r#"{"seq":2}"#))
    );

    let params = seen_query.lock().unwrap().clone().unwrap();
    assert_eq!(params.get("token").map(String::as_str), Some("token-1"));
}

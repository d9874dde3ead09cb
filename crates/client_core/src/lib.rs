//! Synchronization engine for the chat client: wires the per-chat push-event
//! stream through the dispatcher into the local state store, coordinates REST
//! fetches with concurrently arriving events, and fans everything out to
//! subscribers over a broadcast channel.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rest_client::{ApiClient, CredentialProvider, CursorPage, DeleteOutcome, PageQuery};
use shared::{
    domain::{ChatId, MessageId, SummarizationPeriod},
    protocol::{
        MessageSchema, NewMessage, ReactionSchema, ReadStatusSchema, TypingStatus,
        UpdateReadStatus, UserShort,
    },
};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

pub mod dispatch;
pub mod error;
pub mod store;
pub mod stream;

pub use dispatch::{Dispatcher, MessageAction, ReactionAction, Routed, SummarizationUpdate};
pub use error::SyncError;
pub use store::{Applied, Chat, ChatStore, StoreError};
pub use stream::{
    EventTransport, SseTransport, StreamFrame, StreamHandler, StreamManager, StreamState,
    StreamTarget, Timer, TokioTimer, TransportError, TransportEvent, RECONNECT_DELAY,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_url: String,
    pub reconnect_delay: Duration,
    pub page_size: u32,
    pub event_capacity: usize,
}

impl EngineConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            reconnect_delay: RECONNECT_DELAY,
            page_size: rest_client::DEFAULT_PAGE_SIZE,
            event_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupChange {
    Name(String),
    Image(String),
}

/// Everything the engine reports to its host. Subscribers receive these over
/// the broadcast channel; the engine itself never drives UI.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Message {
        chat_id: ChatId,
        action: MessageAction,
        message: MessageSchema,
    },
    MessageDeleted {
        chat_id: ChatId,
        message_id: MessageId,
    },
    Typing {
        chat_id: ChatId,
        status: TypingStatus,
    },
    GroupChanged {
        chat_id: ChatId,
        change: GroupChange,
    },
    ReadStatus {
        chat_id: ChatId,
        status: ReadStatusSchema,
    },
    Reaction {
        chat_id: ChatId,
        action: ReactionAction,
        reaction: ReactionSchema,
    },
    Summarization {
        chat_id: ChatId,
        update: SummarizationUpdate,
    },
    /// The credential was rejected or has gone missing; re-authentication is
    /// the host's job.
    CredentialsRejected,
    Error(String),
}

struct EngineState {
    current_user: Option<UserShort>,
    open_chat: Option<ChatId>,
}

pub struct SyncEngine {
    api: ApiClient,
    streams: StreamManager,
    store: Mutex<ChatStore>,
    inner: Mutex<EngineState>,
    events: broadcast::Sender<SyncEvent>,
    page_size: u32,
}

impl SyncEngine {
    pub fn new(config: EngineConfig, credentials: Arc<dyn CredentialProvider>) -> Arc<Self> {
        let api = ApiClient::new(&config.base_url, Arc::clone(&credentials));
        let transport = Arc::new(SseTransport::new(&config.base_url));
        Self::with_dependencies(config, api, transport, Arc::new(TokioTimer), credentials)
    }

    /// Fully injected constructor; tests swap in scripted transports, virtual
    /// timers, and mock REST backends.
    pub fn with_dependencies(
        config: EngineConfig,
        api: ApiClient,
        transport: Arc<dyn EventTransport>,
        timer: Arc<dyn Timer>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Arc<Self> {
        let streams =
            StreamManager::with_timer(transport, credentials, config.reconnect_delay, timer);
        let (events, _) = broadcast::channel(config.event_capacity);
        Arc::new(Self {
            api,
            streams,
            store: Mutex::new(ChatStore::new()),
            inner: Mutex::new(EngineState {
                current_user: None,
                open_chat: None,
            }),
            events,
            page_size: config.page_size,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Direct access to the typed REST surface for operations the engine does
    /// not bookkeep (user listings, block list, deleted histories).
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    // --- lifecycle ---

    /// Resolves the authenticated identity and loads the chat list.
    pub async fn start(&self) -> Result<(), SyncError> {
        let me = self.api.fetch_me().await?;
        info!(user_id = %me.id, username = %me.username, "sync: authenticated");
        {
            let mut inner = self.inner.lock().await;
            inner.current_user = Some(me);
        }
        self.refresh_chats().await
    }

    /// Drains the chat-list paginator and replaces the store's chat list.
    pub async fn refresh_chats(&self) -> Result<(), SyncError> {
        let mut pages = self.api.chat_pages(self.page_size);
        let mut chats = Vec::new();
        while let Some(items) = pages.next_page().await? {
            chats.extend(items.into_iter().map(Chat::from));
        }
        let count = chats.len();
        self.store.lock().await.replace_chat_list(chats);
        info!(count, "sync: chat list replaced");
        Ok(())
    }

    /// Opens a chat view: marks it foreground, resolves it locally (fetching
    /// details when unknown), connects its event stream (idempotent), and
    /// merges the first page of history through the idempotent store path.
    pub async fn open_chat(self: &Arc<Self>, chat_id: ChatId) -> Result<(), SyncError> {
        {
            let mut inner = self.inner.lock().await;
            inner.open_chat = Some(chat_id);
        }
        self.ensure_chat_loaded(chat_id).await?;
        let handler: Arc<dyn StreamHandler> = Arc::clone(self) as Arc<dyn StreamHandler>;
        self.streams
            .connect(StreamTarget::ChatEvents(chat_id), handler)
            .await?;
        let page = self
            .api
            .fetch_messages(chat_id, &PageQuery::first(self.page_size))
            .await?;
        self.merge_history(chat_id, page.items).await?;
        Ok(())
    }

    /// Closes a chat view; exactly one disconnect, cancelling any pending
    /// reconnect for it.
    pub async fn close_chat(&self, chat_id: ChatId) {
        {
            let mut inner = self.inner.lock().await;
            if inner.open_chat == Some(chat_id) {
                inner.open_chat = None;
            }
        }
        self.streams
            .disconnect(StreamTarget::ChatEvents(chat_id))
            .await;
    }

    /// Process-teardown hook: closes every tracked connection.
    pub async fn shutdown(&self) {
        self.streams.disconnect_all().await;
    }

    pub async fn open_summarizer(self: &Arc<Self>, chat_id: ChatId) -> Result<(), SyncError> {
        let handler: Arc<dyn StreamHandler> = Arc::clone(self) as Arc<dyn StreamHandler>;
        self.streams
            .connect(StreamTarget::Summarization(chat_id), handler)
            .await
    }

    pub async fn close_summarizer(&self, chat_id: ChatId) {
        self.streams
            .disconnect(StreamTarget::Summarization(chat_id))
            .await;
    }

    pub async fn stream_state(&self, chat_id: ChatId) -> StreamState {
        self.streams.state(StreamTarget::ChatEvents(chat_id)).await
    }

    // --- REST-side operations; local bookkeeping first, errors re-raised ---

    /// Fetches an older page of history and merges it; returns the page so
    /// the caller can keep the cursor.
    pub async fn older_messages(
        &self,
        chat_id: ChatId,
        cursor: Option<String>,
    ) -> Result<CursorPage<MessageSchema>, SyncError> {
        let query = match cursor {
            Some(cursor) => PageQuery::after(cursor, self.page_size),
            None => PageQuery::first(self.page_size),
        };
        let page = self.api.fetch_messages(chat_id, &query).await?;
        self.merge_history(chat_id, page.items.clone()).await?;
        Ok(page)
    }

    /// Sends a message. The authority's response becomes the local copy; the
    /// echo of this message on the stream is suppressed by authorship.
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        message: &NewMessage,
    ) -> Result<MessageSchema, SyncError> {
        let sent = self.api.send_message(chat_id, message).await?;
        self.apply_message_with_fetch(chat_id, sent.clone(), true)
            .await?;
        Ok(sent)
    }

    pub async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        message: &NewMessage,
    ) -> Result<MessageSchema, SyncError> {
        let updated = self.api.update_message(chat_id, message_id, message).await?;
        self.store.lock().await.apply_message_update(&updated);
        Ok(updated)
    }

    pub async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        forever: bool,
    ) -> Result<DeleteOutcome, SyncError> {
        let outcome = self.api.delete_message(chat_id, message_id, forever).await?;
        self.store.lock().await.apply_message_delete(
            chat_id,
            message_id,
            outcome == DeleteOutcome::Purged,
        );
        Ok(outcome)
    }

    pub async fn recover_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), SyncError> {
        self.api.recover_message(chat_id, message_id).await?;
        self.store
            .lock()
            .await
            .clear_deleted_flag(chat_id, message_id);
        Ok(())
    }

    /// Forwards messages into `to_chat_id`; the authority's copies are
    /// applied to the destination chat.
    pub async fn forward_messages(
        &self,
        to_chat_id: ChatId,
        messages: &[MessageId],
    ) -> Result<Vec<MessageSchema>, SyncError> {
        let forwarded = self.api.forward_messages(to_chat_id, messages).await?;
        for message in &forwarded {
            self.apply_message_with_fetch(to_chat_id, message.clone(), true)
                .await?;
        }
        Ok(forwarded)
    }

    /// Creates or replaces the chat's draft, whichever the authority expects.
    pub async fn save_draft(&self, chat_id: ChatId, content: &str) -> Result<(), SyncError> {
        let draft = NewMessage::text(content);
        let has_draft = {
            let store = self.store.lock().await;
            store.chat(chat_id).is_some_and(|c| c.draft.is_some())
        };
        let saved = if has_draft {
            self.api.replace_draft(chat_id, &draft).await?
        } else {
            self.api.create_draft(chat_id, &draft).await?
        };
        self.store.lock().await.set_draft(chat_id, saved.content);
        Ok(())
    }

    pub async fn clear_draft(&self, chat_id: ChatId) -> Result<(), SyncError> {
        self.api.delete_draft(chat_id).await?;
        self.store.lock().await.set_draft(chat_id, None);
        Ok(())
    }

    pub async fn add_reaction(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        reaction_type: &str,
    ) -> Result<ReactionSchema, SyncError> {
        let reaction = self
            .api
            .add_reaction(chat_id, message_id, reaction_type)
            .await?;
        self.store
            .lock()
            .await
            .apply_reaction(chat_id, &reaction, false);
        Ok(reaction)
    }

    pub async fn remove_reaction(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), SyncError> {
        self.api.remove_reaction(chat_id, message_id).await?;
        let user = { self.inner.lock().await.current_user.as_ref().map(|u| u.id) };
        if let Some(user_id) = user {
            self.store
                .lock()
                .await
                .remove_reaction_by_user(chat_id, message_id, user_id);
        }
        Ok(())
    }

    pub async fn mark_read(
        &self,
        chat_id: ChatId,
        update: &UpdateReadStatus,
    ) -> Result<ReadStatusSchema, SyncError> {
        let status = self.api.update_read_status(chat_id, update).await?;
        self.store.lock().await.apply_read_status(&status);
        Ok(status)
    }

    pub async fn set_typing(&self, chat_id: ChatId, is_typing: bool) -> Result<(), SyncError> {
        self.api.send_typing(chat_id, is_typing).await?;
        Ok(())
    }

    pub async fn rename_group(&self, chat_id: ChatId, name: &str) -> Result<(), SyncError> {
        self.api.rename_group(chat_id, name).await?;
        self.store.lock().await.apply_group_name(chat_id, name);
        Ok(())
    }

    pub async fn start_summarization(
        &self,
        chat_id: ChatId,
        period: SummarizationPeriod,
    ) -> Result<(), SyncError> {
        self.api.start_summarization(chat_id, period).await?;
        Ok(())
    }

    // --- views ---

    pub async fn current_user(&self) -> Option<UserShort> {
        self.inner.lock().await.current_user.clone()
    }

    pub async fn open_chat_id(&self) -> Option<ChatId> {
        self.inner.lock().await.open_chat
    }

    pub async fn chat(&self, chat_id: ChatId) -> Option<Chat> {
        self.store.lock().await.chat(chat_id).cloned()
    }

    pub async fn chats(&self) -> Vec<Chat> {
        self.store
            .lock()
            .await
            .chats_by_recency()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Newest message across all held chats, for the notification badge.
    /// Only meaningful while no chat is foregrounded.
    pub async fn most_recent_unseen(&self) -> Option<MessageSchema> {
        if self.inner.lock().await.open_chat.is_some() {
            return None;
        }
        self.store.lock().await.most_recent_unseen().cloned()
    }

    pub async fn new_message_count(&self) -> u64 {
        self.store.lock().await.new_message_count()
    }

    pub async fn reset_new_message_count(&self) {
        self.store.lock().await.reset_new_message_count();
    }

    // --- internals ---

    async fn ensure_chat_loaded(&self, chat_id: ChatId) -> Result<(), SyncError> {
        if self.store.lock().await.chat(chat_id).is_some() {
            return Ok(());
        }
        let chat = self.api.fetch_chat(chat_id).await?;
        let mut store = self.store.lock().await;
        if store.chat(chat_id).is_none() {
            store.upsert_chat(Chat::from(chat));
        }
        Ok(())
    }

    /// Applies a REST-fetched history page oldest-first so the arrival order
    /// in the store reads forward.
    async fn merge_history(
        &self,
        chat_id: ChatId,
        messages: Vec<MessageSchema>,
    ) -> Result<(), SyncError> {
        let mut store = self.store.lock().await;
        for message in messages.into_iter().rev() {
            match store.apply_incoming_message(chat_id, message, true) {
                Ok(_) => {}
                Err(StoreError::UnknownChat(id)) => return Err(SyncError::UnknownChat(id)),
            }
        }
        Ok(())
    }

    /// The fetch-then-retry path for messages racing the chat list: when the
    /// store reports `UnknownChat`, fetch the chat detail over REST, upsert
    /// it, and apply the message again.
    async fn apply_message_with_fetch(
        &self,
        chat_id: ChatId,
        message: MessageSchema,
        is_chat_open: bool,
    ) -> Result<Applied, SyncError> {
        let first = {
            let mut store = self.store.lock().await;
            store.apply_incoming_message(chat_id, message.clone(), is_chat_open)
        };
        match first {
            Ok(applied) => Ok(applied),
            Err(StoreError::UnknownChat(_)) => {
                let chat = self.api.fetch_chat(chat_id).await?;
                let mut store = self.store.lock().await;
                if store.chat(chat_id).is_none() {
                    store.upsert_chat(Chat::from(chat));
                }
                store
                    .apply_incoming_message(chat_id, message, is_chat_open)
                    .map_err(|_| SyncError::UnknownChat(chat_id))
            }
        }
    }

    async fn apply_routed(&self, chat_id: ChatId, routed: Routed) {
        match routed {
            Routed::Message {
                action: MessageAction::New,
                message,
            } => {
                let is_open = { self.inner.lock().await.open_chat == Some(chat_id) };
                match self
                    .apply_message_with_fetch(chat_id, message.clone(), is_open)
                    .await
                {
                    Ok(Applied::Appended) => {
                        let _ = self.events.send(SyncEvent::Message {
                            chat_id,
                            action: MessageAction::New,
                            message,
                        });
                    }
                    // Already held (REST fetch won the race); nothing to tell anyone.
                    Ok(Applied::Duplicate) => {}
                    Err(err) => {
                        warn!(%chat_id, error = %err, "sync: failed to reconcile incoming message");
                        let _ = self.events.send(SyncEvent::Error(format!(
                            "failed to reconcile incoming message for chat {chat_id}: {err}"
                        )));
                    }
                }
            }
            Routed::Message {
                action: MessageAction::Forward,
                message,
            } => {
                let _ = self.events.send(SyncEvent::Message {
                    chat_id,
                    action: MessageAction::Forward,
                    message,
                });
            }
            Routed::Message {
                action: MessageAction::Update,
                message,
            } => {
                self.store.lock().await.apply_message_update(&message);
                let _ = self.events.send(SyncEvent::Message {
                    chat_id,
                    action: MessageAction::Update,
                    message,
                });
            }
            Routed::Message {
                action: MessageAction::Recover,
                message,
            } => {
                self.store.lock().await.apply_message_recover(&message);
                let _ = self.events.send(SyncEvent::Message {
                    chat_id,
                    action: MessageAction::Recover,
                    message,
                });
            }
            Routed::MessageDeleted(deleted) => {
                self.store
                    .lock()
                    .await
                    .apply_message_delete(chat_id, deleted.id, false);
                let _ = self.events.send(SyncEvent::MessageDeleted {
                    chat_id,
                    message_id: deleted.id,
                });
            }
            Routed::Typing(status) => {
                let _ = self.events.send(SyncEvent::Typing { chat_id, status });
            }
            Routed::GroupName(update) => {
                self.store
                    .lock()
                    .await
                    .apply_group_name(chat_id, &update.group_name);
                let _ = self.events.send(SyncEvent::GroupChanged {
                    chat_id,
                    change: GroupChange::Name(update.group_name),
                });
            }
            Routed::GroupImage(update) => {
                self.store
                    .lock()
                    .await
                    .apply_group_image(chat_id, &update.image_url);
                let _ = self.events.send(SyncEvent::GroupChanged {
                    chat_id,
                    change: GroupChange::Image(update.image_url),
                });
            }
            Routed::ReadStatus(status) => {
                self.store.lock().await.apply_read_status(&status);
                let _ = self.events.send(SyncEvent::ReadStatus { chat_id, status });
            }
            Routed::Reaction { action, reaction } => {
                self.store.lock().await.apply_reaction(
                    chat_id,
                    &reaction,
                    action == ReactionAction::Delete,
                );
                let _ = self.events.send(SyncEvent::Reaction {
                    chat_id,
                    action,
                    reaction,
                });
            }
            Routed::Summarization(update) => {
                let _ = self.events.send(SyncEvent::Summarization { chat_id, update });
            }
        }
    }
}

#[async_trait]
impl StreamHandler for SyncEngine {
    async fn on_frame(&self, target: StreamTarget, frame: StreamFrame) {
        let current_user = {
            self.inner
                .lock()
                .await
                .current_user
                .as_ref()
                .map(|user| user.id)
        };
        let Some(user_id) = current_user else {
            warn!(%target, "sync: event arrived before authentication; dropped");
            return;
        };
        match Dispatcher::new(user_id).route(&frame) {
            Ok(Some(routed)) => self.apply_routed(target.chat_id(), routed).await,
            Ok(None) => {}
            Err(err) => {
                warn!(%target, event = %frame.event, error = %err, "sync: dropping malformed event payload");
            }
        }
    }

    async fn on_credential_failure(&self, target: StreamTarget) {
        warn!(%target, "sync: credential failure on stream");
        let _ = self.events.send(SyncEvent::CredentialsRejected);
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

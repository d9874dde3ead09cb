//! Local state store: the single source of truth for chats and messages
//! visible to the rest of the application.
//!
//! The store never performs network I/O. Unknown chats are reported through
//! [`StoreError::UnknownChat`] so the engine can fetch details over REST and
//! retry. All mutations go through the methods here; the engine serializes
//! them behind its own mutex (single-writer discipline), and tests construct
//! a fresh store per case.

use std::collections::HashMap;

use shared::{
    domain::{ChatId, ChatKind, MessageId, UserId},
    protocol::{ChatSchema, MessageSchema, ReactionSchema, ReadStatusSchema, UserShort},
};
use thiserror::Error;

/// Preview length the authority keeps for `last_message_content`.
const LAST_MESSAGE_PREVIEW_LEN: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("chat {0} is not loaded locally")]
    UnknownChat(ChatId),
}

/// Result of reconciling one incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Appended,
    /// A message with the same identifier was already held; no-op.
    Duplicate,
}

/// A chat as held locally: REST-fetched metadata plus the arrival-ordered
/// message list accumulated from history fetches and stream events.
#[derive(Debug, Clone)]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub name: Option<String>,
    pub image: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub members: Vec<UserShort>,
    pub read_statuses: Vec<ReadStatusSchema>,
    pub last_message: Option<String>,
    pub draft: Option<String>,
    pub messages: Vec<MessageSchema>,
}

impl From<ChatSchema> for Chat {
    fn from(schema: ChatSchema) -> Self {
        Self {
            id: schema.id,
            kind: schema.chat_type,
            name: schema.name,
            image: schema.image,
            created_at: schema.created_at,
            updated_at: schema.updated_at,
            members: schema.users,
            read_statuses: schema.read_statuses,
            last_message: schema.last_message_content,
            draft: schema.draft_message,
            messages: Vec::new(),
        }
    }
}

impl Chat {
    fn message_mut(&mut self, id: MessageId) -> Option<&mut MessageSchema> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn set_last_message(&mut self, content: Option<&str>) {
        self.last_message = content.map(|c| c.chars().take(LAST_MESSAGE_PREVIEW_LEN).collect());
    }
}

#[derive(Debug, Default)]
pub struct ChatStore {
    chats: HashMap<ChatId, Chat>,
    new_message_count: u64,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- REST-sync entry points ---

    /// Replaces the whole chat list. A full replacement: message lists loaded
    /// for chats that are no longer present are dropped with them.
    pub fn replace_chat_list(&mut self, chats: Vec<Chat>) {
        self.chats = chats.into_iter().map(|chat| (chat.id, chat)).collect();
    }

    /// Inserts or fully replaces one chat by identifier. No partial merge
    /// happens here; partial patches (group name, image) have their own
    /// operations.
    pub fn upsert_chat(&mut self, chat: Chat) {
        self.chats.insert(chat.id, chat);
    }

    pub fn remove_chat(&mut self, chat_id: ChatId) -> Option<Chat> {
        self.chats.remove(&chat_id)
    }

    // --- stream reconciliation ---

    /// Appends an incoming message to its chat, keeping arrival order.
    ///
    /// Idempotent by message identifier: re-delivery of a message already
    /// held (REST fetch racing the stream, duplicated events) is a no-op.
    /// When the chat is not the foreground one, the process-wide new-message
    /// counter is bumped for notification badges; the message itself is
    /// reconciled either way.
    pub fn apply_incoming_message(
        &mut self,
        chat_id: ChatId,
        message: MessageSchema,
        is_chat_open: bool,
    ) -> Result<Applied, StoreError> {
        let chat = self
            .chats
            .get_mut(&chat_id)
            .ok_or(StoreError::UnknownChat(chat_id))?;
        if chat.messages.iter().any(|m| m.id == message.id) {
            return Ok(Applied::Duplicate);
        }
        chat.set_last_message(message.content.as_deref());
        chat.updated_at = message.created_at;
        chat.messages.push(message);
        if !is_chat_open {
            self.new_message_count += 1;
        }
        Ok(Applied::Appended)
    }

    /// Replaces the held copy of an edited message. Returns `false` when the
    /// message is not held locally.
    pub fn apply_message_update(&mut self, message: &MessageSchema) -> bool {
        let Some(chat) = self.chats.get_mut(&message.chat_id) else {
            return false;
        };
        let Some(held) = chat.message_mut(message.id) else {
            return false;
        };
        *held = message.clone();
        chat.set_last_message(message.content.as_deref());
        true
    }

    /// Marks the soft-delete flag on the first application; deleting an
    /// already-deleted message, or passing `forever`, removes the entry
    /// outright, mirroring the authority's two-phase delete.
    pub fn apply_message_delete(
        &mut self,
        chat_id: ChatId,
        message_id: MessageId,
        forever: bool,
    ) -> bool {
        let Some(chat) = self.chats.get_mut(&chat_id) else {
            return false;
        };
        match chat.message_mut(message_id) {
            Some(held) if !held.is_deleted && !forever => {
                held.is_deleted = true;
                true
            }
            Some(_) => {
                chat.messages.retain(|m| m.id != message_id);
                true
            }
            None => false,
        }
    }

    /// Local bookkeeping for a REST-initiated recover; the full payload
    /// arrives later on the stream.
    pub fn clear_deleted_flag(&mut self, chat_id: ChatId, message_id: MessageId) -> bool {
        let Some(chat) = self.chats.get_mut(&chat_id) else {
            return false;
        };
        match chat.message_mut(message_id) {
            Some(held) => {
                held.is_deleted = false;
                true
            }
            None => false,
        }
    }

    /// Clears the soft-delete flag, or re-appends the recovered message when
    /// it is no longer held locally.
    pub fn apply_message_recover(&mut self, message: &MessageSchema) -> bool {
        let Some(chat) = self.chats.get_mut(&message.chat_id) else {
            return false;
        };
        match chat.message_mut(message.id) {
            Some(held) => {
                *held = message.clone();
                held.is_deleted = false;
            }
            None => {
                let mut recovered = message.clone();
                recovered.is_deleted = false;
                chat.messages.push(recovered);
            }
        }
        chat.set_last_message(message.content.as_deref());
        true
    }

    /// Applies a reaction event. A user holds at most one reaction per
    /// message: a new reaction replaces any existing one by the same user,
    /// a delete removes it.
    pub fn apply_reaction(&mut self, chat_id: ChatId, reaction: &ReactionSchema, removed: bool) -> bool {
        let Some(chat) = self.chats.get_mut(&chat_id) else {
            return false;
        };
        let Some(held) = chat.message_mut(reaction.message_id) else {
            return false;
        };
        held.reactions.retain(|r| r.user_id != reaction.user_id);
        if !removed {
            held.reactions.push(reaction.clone());
        }
        true
    }

    /// Drops the reaction `user_id` holds on a message, if any. Used for
    /// REST-initiated removals where no reaction payload is returned.
    pub fn remove_reaction_by_user(
        &mut self,
        chat_id: ChatId,
        message_id: MessageId,
        user_id: UserId,
    ) -> bool {
        let Some(chat) = self.chats.get_mut(&chat_id) else {
            return false;
        };
        let Some(held) = chat.message_mut(message_id) else {
            return false;
        };
        let before = held.reactions.len();
        held.reactions.retain(|r| r.user_id != user_id);
        held.reactions.len() != before
    }

    /// Replaces the read status entry for the event's user, or records a new
    /// one. Applied regardless of who triggered it.
    pub fn apply_read_status(&mut self, status: &ReadStatusSchema) -> bool {
        let Some(chat) = self.chats.get_mut(&status.chat_id) else {
            return false;
        };
        match chat
            .read_statuses
            .iter_mut()
            .find(|rs| rs.user_id == status.user_id)
        {
            Some(held) => *held = status.clone(),
            None => chat.read_statuses.push(status.clone()),
        }
        true
    }

    pub fn apply_group_name(&mut self, chat_id: ChatId, name: &str) -> bool {
        let Some(chat) = self.chats.get_mut(&chat_id) else {
            return false;
        };
        chat.name = Some(name.to_string());
        true
    }

    pub fn apply_group_image(&mut self, chat_id: ChatId, image_url: &str) -> bool {
        let Some(chat) = self.chats.get_mut(&chat_id) else {
            return false;
        };
        chat.image = Some(image_url.to_string());
        true
    }

    pub fn set_draft(&mut self, chat_id: ChatId, draft: Option<String>) -> bool {
        let Some(chat) = self.chats.get_mut(&chat_id) else {
            return false;
        };
        chat.draft = draft;
        true
    }

    // --- views ---

    pub fn chat(&self, chat_id: ChatId) -> Option<&Chat> {
        self.chats.get(&chat_id)
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    /// Chats ordered by most recent activity first.
    pub fn chats_by_recency(&self) -> Vec<&Chat> {
        let mut chats: Vec<&Chat> = self.chats.values().collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        chats
    }

    /// The newest message across all held chats, recomputed on demand.
    /// Ties on the creation timestamp go to the highest chat id, which keeps
    /// the result deterministic.
    pub fn most_recent_unseen(&self) -> Option<&MessageSchema> {
        self.chats
            .values()
            .flat_map(|chat| chat.messages.iter())
            .max_by_key(|m| (m.created_at, m.chat_id))
    }

    pub fn new_message_count(&self) -> u64 {
        self.new_message_count
    }

    pub fn reset_new_message_count(&mut self) {
        self.new_message_count = 0;
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ChatId, ChatKind, MessageId, MessageKind, ReactionId, ReadStatusId, SummarizationStatus,
    UserId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserShort {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_online: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionSchema {
    pub id: ReactionId,
    pub reaction_type: String,
    pub user_id: UserId,
    pub message_id: MessageId,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardedMessage {
    pub id: MessageId,
    pub user: UserShort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentMessage {
    pub id: MessageId,
    pub message_type: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSchema {
    pub id: MessageId,
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub message_type: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    #[serde(default)]
    pub reactions: Vec<ReactionSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_message: Option<ForwardedMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message: Option<ParentMessage>,
}

impl MessageSchema {
    /// The authority bumps `updated_at` past `created_at` on the first edit.
    pub fn is_edited(&self) -> bool {
        self.updated_at > self.created_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadStatusSchema {
    pub id: ReadStatusId,
    pub chat_id: ChatId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_message_id: Option<MessageId>,
    pub count_unread_msg: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingStatus {
    pub user_id: UserId,
    pub username: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupNameUpdate {
    pub group_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupImageUpdate {
    pub image_url: String,
}

/// Payload of a `delete_message` push event; the authority publishes only the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDeleted {
    pub id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSchema {
    pub id: ChatId,
    pub chat_type: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub users: Vec<UserShort>,
    #[serde(default)]
    pub read_statuses: Vec<ReadStatusSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftMessageSchema {
    pub id: MessageId,
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub message_type: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizationSchema {
    pub chat_id: ChatId,
    pub status: SummarizationStatus,
    pub progress: f64,
    #[serde(default)]
    pub result: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDirectChat {
    pub recipient_user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGroupChat {
    pub recipient_user_ids: Vec<UserId>,
    pub name_group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameGroup {
    pub name_group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardMessages {
    pub messages: Vec<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardedMessages {
    pub forward_messages: Vec<MessageSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateReadStatus {
    pub last_read_message_id: MessageId,
    pub count_unread_msg: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReaction {
    pub reaction_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockUser {
    pub user_id: UserId,
}

/// One server-pushed event, decoded from the `(kind, data)` pair delivered by
/// the stream transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    NewMessage(MessageSchema),
    ForwardMessage(MessageSchema),
    UpdateMessage(MessageSchema),
    DeleteMessage(MessageDeleted),
    RecoverMessage(MessageSchema),
    UserTyping(TypingStatus),
    UpdateGroupName(GroupNameUpdate),
    UpdateImageGroup(GroupImageUpdate),
    UpdateReadStatus(ReadStatusSchema),
    NewReaction(ReactionSchema),
    DeleteReaction(ReactionSchema),
    ProgressSummarization(SummarizationSchema),
    FailedSummarization(SummarizationSchema),
}

impl ChatEvent {
    /// Decodes a pushed event payload. `Ok(None)` means the kind is unknown to
    /// this client; a malformed payload of a known kind is an error.
    pub fn decode(kind: &str, data: &str) -> Result<Option<ChatEvent>, serde_json::Error> {
        let event = match kind {
            "new_message" => ChatEvent::NewMessage(serde_json::from_str(data)?),
            "forward_message" => ChatEvent::ForwardMessage(serde_json::from_str(data)?),
            "update_message" => ChatEvent::UpdateMessage(serde_json::from_str(data)?),
            "delete_message" => ChatEvent::DeleteMessage(serde_json::from_str(data)?),
            "recover_message" => ChatEvent::RecoverMessage(serde_json::from_str(data)?),
            "user_typing" => ChatEvent::UserTyping(serde_json::from_str(data)?),
            "update_group_name" => ChatEvent::UpdateGroupName(serde_json::from_str(data)?),
            "update_image_group" => ChatEvent::UpdateImageGroup(serde_json::from_str(data)?),
            "update_read_status" => ChatEvent::UpdateReadStatus(serde_json::from_str(data)?),
            "new_reaction" => ChatEvent::NewReaction(serde_json::from_str(data)?),
            "delete_reaction" => ChatEvent::DeleteReaction(serde_json::from_str(data)?),
            "progress_summarization" => {
                ChatEvent::ProgressSummarization(serde_json::from_str(data)?)
            }
            "failed_summarization" => ChatEvent::FailedSummarization(serde_json::from_str(data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

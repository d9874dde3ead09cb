//! Classifies server-pushed events and decides what reaches the store and the
//! subscribers.
//!
//! Echo suppression applies only to message-content and typing events: the
//! REST call that produced them already updated local state. Group, read
//! status, reaction, and summarization events are author-agnostic.

use shared::{
    domain::UserId,
    protocol::{
        ChatEvent, GroupImageUpdate, GroupNameUpdate, MessageDeleted, MessageSchema,
        ReactionSchema, ReadStatusSchema, SummarizationSchema, TypingStatus,
    },
};

use crate::stream::StreamFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAction {
    New,
    Forward,
    Update,
    Recover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionAction {
    New,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SummarizationUpdate {
    Progress(SummarizationSchema),
    Failed(SummarizationSchema),
}

/// One event after classification, ready to be applied to the store and
/// fanned out.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Message {
        action: MessageAction,
        message: MessageSchema,
    },
    MessageDeleted(MessageDeleted),
    Typing(TypingStatus),
    GroupName(GroupNameUpdate),
    GroupImage(GroupImageUpdate),
    ReadStatus(ReadStatusSchema),
    Reaction {
        action: ReactionAction,
        reaction: ReactionSchema,
    },
    Summarization(SummarizationUpdate),
}

pub struct Dispatcher {
    current_user: UserId,
}

impl Dispatcher {
    pub fn new(current_user: UserId) -> Self {
        Self { current_user }
    }

    /// Routes one raw frame. `Ok(None)` means the event is an unknown kind or
    /// a suppressed self-echo; `Err` means a known kind carried a malformed
    /// payload. The caller logs and drops it; the stream must survive.
    pub fn route(&self, frame: &StreamFrame) -> Result<Option<Routed>, serde_json::Error> {
        let Some(event) = ChatEvent::decode(&frame.event, &frame.data)? else {
            return Ok(None);
        };

        let routed = match event {
            ChatEvent::NewMessage(message) if message.user_id == self.current_user => None,
            ChatEvent::NewMessage(message) => Some(Routed::Message {
                action: MessageAction::New,
                message,
            }),
            ChatEvent::ForwardMessage(message) => Some(Routed::Message {
                action: MessageAction::Forward,
                message,
            }),
            ChatEvent::UpdateMessage(message) if message.user_id == self.current_user => None,
            ChatEvent::UpdateMessage(message) => Some(Routed::Message {
                action: MessageAction::Update,
                message,
            }),
            ChatEvent::DeleteMessage(deleted) => Some(Routed::MessageDeleted(deleted)),
            ChatEvent::RecoverMessage(message) => Some(Routed::Message {
                action: MessageAction::Recover,
                message,
            }),
            ChatEvent::UserTyping(status) if status.user_id == self.current_user => None,
            ChatEvent::UserTyping(status) => Some(Routed::Typing(status)),
            ChatEvent::UpdateGroupName(update) => Some(Routed::GroupName(update)),
            ChatEvent::UpdateImageGroup(update) => Some(Routed::GroupImage(update)),
            ChatEvent::UpdateReadStatus(status) => Some(Routed::ReadStatus(status)),
            ChatEvent::NewReaction(reaction) => Some(Routed::Reaction {
                action: ReactionAction::New,
                reaction,
            }),
            ChatEvent::DeleteReaction(reaction) => Some(Routed::Reaction {
                action: ReactionAction::Delete,
                reaction,
            }),
            ChatEvent::ProgressSummarization(summary) => {
                Some(Routed::Summarization(SummarizationUpdate::Progress(summary)))
            }
            ChatEvent::FailedSummarization(summary) => {
                Some(Routed::Summarization(SummarizationUpdate::Failed(summary)))
            }
        };
        Ok(routed)
    }
}

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod tests;

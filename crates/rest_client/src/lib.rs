//! Typed REST client for the chat authority. Every call attaches the bearer
//! credential supplied by the [`CredentialProvider`]; a missing credential
//! fails fast with [`Error::NoCredential`] before any I/O. REST calls are
//! never retried here.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ChatId, MessageId, SummarizationPeriod, SummarizationStatus, UserId},
    error::{ApiError, ErrorBody, ErrorCode},
    protocol::{
        BlockUser, ChatSchema, DraftMessageSchema, ForwardMessages, ForwardedMessages,
        MessageSchema, NewDirectChat, NewGroupChat, NewMessage, NewReaction, ReactionSchema,
        ReadStatusSchema, RenameGroup, SummarizationSchema, UpdateReadStatus, UserShort,
    },
};
use thiserror::Error;
use tracing::debug;

pub mod pagination;

pub use pagination::{CursorPage, FetchPage, PageQuery, Paginator, DEFAULT_PAGE_SIZE};

/// Supplies the access credential attached to every request. Streaming and
/// REST both read tokens through this seam and nowhere else.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

/// Fixed token, handed over by whatever performed authentication.
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn access_token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

/// Null provider; every call through it fails with [`Error::NoCredential`].
pub struct MissingCredentials;

#[async_trait]
impl CredentialProvider for MissingCredentials {
    async fn access_token(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no access credential available")]
    NoCredential,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote error {status}: {error}")]
    Remote { status: u16, error: ApiError },
    #[error("invalid response payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Error {
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a message delete: the authority soft-deletes on the first call
/// and purges on a repeated or `is_forever` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    SoftDeleted,
    Purged,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let token = self
            .credentials
            .access_token()
            .await
            .ok_or(Error::NoCredential)?;
        let response = builder.bearer_auth(token).send().await?;
        Self::check(response).await
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let code = ErrorCode::from_status(status.as_u16());
        let body: ErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .reason()
            .unwrap_or("remote authority returned an error")
            .to_string();
        debug!(status = status.as_u16(), %message, "rest: request rejected");
        Err(Error::Remote {
            status: status.as_u16(),
            error: ApiError::new(code, message),
        })
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let text = self.send(builder).await?.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base_url)
    }

    // --- chats ---

    pub async fn fetch_chats(
        &self,
        query: &PageQuery,
        user_id_exists: Option<UserId>,
    ) -> Result<CursorPage<ChatSchema>> {
        let mut builder = self.http.get(self.url("chats")).query(query);
        if let Some(user_id) = user_id_exists {
            builder = builder.query(&[("user_id_exists", user_id)]);
        }
        self.json(builder).await
    }

    pub async fn fetch_deleted_chats(&self, query: &PageQuery) -> Result<CursorPage<ChatSchema>> {
        self.json(self.http.get(self.url("chats/deleted")).query(query))
            .await
    }

    pub async fn fetch_chat(&self, chat_id: ChatId) -> Result<ChatSchema> {
        self.json(self.http.get(self.url(&format!("chats/{chat_id}"))))
            .await
    }

    pub async fn create_direct_chat(&self, recipient_user_id: UserId) -> Result<ChatSchema> {
        self.json(
            self.http
                .post(self.url("chats/create/direct"))
                .json(&NewDirectChat { recipient_user_id }),
        )
        .await
    }

    pub async fn create_group_chat(&self, group: &NewGroupChat) -> Result<ChatSchema> {
        self.json(self.http.post(self.url("chats/create/group")).json(group))
            .await
    }

    pub async fn rename_group(&self, chat_id: ChatId, name: impl Into<String>) -> Result<()> {
        self.send(self.http.patch(self.url(&format!("chats/{chat_id}"))).json(
            &RenameGroup {
                name_group: name.into(),
            },
        ))
        .await?;
        Ok(())
    }

    // --- messages ---

    pub async fn fetch_messages(
        &self,
        chat_id: ChatId,
        query: &PageQuery,
    ) -> Result<CursorPage<MessageSchema>> {
        self.json(
            self.http
                .get(self.url(&format!("chats/{chat_id}/messages")))
                .query(query),
        )
        .await
    }

    pub async fn fetch_message_range(
        &self,
        chat_id: ChatId,
        from_id: MessageId,
        to_id: MessageId,
    ) -> Result<Vec<MessageSchema>> {
        self.json(
            self.http
                .get(self.url(&format!("chats/{chat_id}/messages/range")))
                .query(&[("from_id", from_id), ("to_id", to_id)]),
        )
        .await
    }

    pub async fn fetch_deleted_messages(
        &self,
        chat_id: ChatId,
        query: &PageQuery,
    ) -> Result<CursorPage<MessageSchema>> {
        self.json(
            self.http
                .get(self.url(&format!("chats/{chat_id}/deleted-messages")))
                .query(query),
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: ChatId,
        message: &NewMessage,
    ) -> Result<MessageSchema> {
        self.json(
            self.http
                .post(self.url(&format!("chats/{chat_id}/messages")))
                .json(message),
        )
        .await
    }

    pub async fn update_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        message: &NewMessage,
    ) -> Result<MessageSchema> {
        self.json(
            self.http
                .patch(self.url(&format!("chats/{chat_id}/messages/{message_id}")))
                .json(message),
        )
        .await
    }

    pub async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        forever: bool,
    ) -> Result<DeleteOutcome> {
        let response = self
            .send(
                self.http
                    .delete(self.url(&format!("chats/{chat_id}/messages/{message_id}")))
                    .query(&[("is_forever", forever)]),
            )
            .await?;
        Ok(match response.status() {
            StatusCode::ACCEPTED => DeleteOutcome::SoftDeleted,
            _ => DeleteOutcome::Purged,
        })
    }

    pub async fn recover_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        self.send(
            self.http
                .post(self.url(&format!("chats/{chat_id}/messages/{message_id}/recover"))),
        )
        .await?;
        Ok(())
    }

    pub async fn forward_messages(
        &self,
        to_chat_id: ChatId,
        messages: &[MessageId],
    ) -> Result<Vec<MessageSchema>> {
        let body: ForwardedMessages = self
            .json(
                self.http
                    .post(self.url(&format!("chats/{to_chat_id}/messages/forward")))
                    .json(&ForwardMessages {
                        messages: messages.to_vec(),
                    }),
            )
            .await?;
        Ok(body.forward_messages)
    }

    // --- drafts ---

    pub async fn create_draft(
        &self,
        chat_id: ChatId,
        draft: &NewMessage,
    ) -> Result<DraftMessageSchema> {
        self.json(
            self.http
                .post(self.url(&format!("chats/{chat_id}/draft-message")))
                .json(draft),
        )
        .await
    }

    pub async fn replace_draft(
        &self,
        chat_id: ChatId,
        draft: &NewMessage,
    ) -> Result<DraftMessageSchema> {
        self.json(
            self.http
                .put(self.url(&format!("chats/{chat_id}/draft-message")))
                .json(draft),
        )
        .await
    }

    pub async fn delete_draft(&self, chat_id: ChatId) -> Result<()> {
        self.send(
            self.http
                .delete(self.url(&format!("chats/{chat_id}/draft-message"))),
        )
        .await?;
        Ok(())
    }

    // --- reactions ---

    pub async fn add_reaction(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        reaction_type: impl Into<String>,
    ) -> Result<ReactionSchema> {
        self.json(
            self.http
                .post(self.url(&format!("chats/{chat_id}/messages/{message_id}/reaction")))
                .json(&NewReaction {
                    reaction_type: reaction_type.into(),
                }),
        )
        .await
    }

    pub async fn remove_reaction(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        self.send(
            self.http
                .delete(self.url(&format!("chats/{chat_id}/messages/{message_id}/reaction"))),
        )
        .await?;
        Ok(())
    }

    // --- read status / typing ---

    pub async fn update_read_status(
        &self,
        chat_id: ChatId,
        update: &UpdateReadStatus,
    ) -> Result<ReadStatusSchema> {
        self.json(
            self.http
                .patch(self.url(&format!("read_status/{chat_id}/update")))
                .json(update),
        )
        .await
    }

    pub async fn send_typing(&self, chat_id: ChatId, is_typing: bool) -> Result<()> {
        self.send(
            self.http
                .post(self.url(&format!("chats/{chat_id}/typing-status")))
                .query(&[("is_typing", is_typing)]),
        )
        .await?;
        Ok(())
    }

    // --- users ---

    pub async fn fetch_users(&self, query: &PageQuery) -> Result<CursorPage<UserShort>> {
        self.json(self.http.get(self.url("users")).query(query)).await
    }

    pub async fn fetch_user(&self, user_id: UserId) -> Result<UserShort> {
        self.json(self.http.get(self.url(&format!("users/read/{user_id}"))))
            .await
    }

    pub async fn fetch_me(&self) -> Result<UserShort> {
        self.json(self.http.get(self.url("users/me"))).await
    }

    // --- block list ---

    pub async fn fetch_block_list(&self, query: &PageQuery) -> Result<CursorPage<UserShort>> {
        self.json(
            self.http
                .get(self.url("black_list/blocked_users"))
                .query(query),
        )
        .await
    }

    pub async fn block_user(&self, user_id: UserId) -> Result<()> {
        self.send(
            self.http
                .post(self.url("black_list/add"))
                .json(&BlockUser { user_id }),
        )
        .await?;
        Ok(())
    }

    pub async fn unblock_user(&self, user_id: UserId) -> Result<()> {
        self.send(
            self.http
                .delete(self.url("black_list/remove"))
                .json(&BlockUser { user_id }),
        )
        .await?;
        Ok(())
    }

    // --- summarization ---

    pub async fn start_summarization(
        &self,
        chat_id: ChatId,
        period: SummarizationPeriod,
    ) -> Result<()> {
        self.send(
            self.http
                .post(self.url("ai/summarizations"))
                .query(&[("chat_id", chat_id.to_string())])
                .query(&[("duration", period)]),
        )
        .await?;
        Ok(())
    }

    pub async fn fetch_summarization(&self, chat_id: ChatId) -> Result<SummarizationSchema> {
        self.json(self.http.get(self.url(&format!("ai/summarizations/{chat_id}"))))
            .await
    }

    pub async fn fetch_summarizations(
        &self,
        status: SummarizationStatus,
    ) -> Result<Vec<SummarizationSchema>> {
        self.json(
            self.http
                .get(self.url("ai/summarizations"))
                .query(&[("summarization_status", status)]),
        )
        .await
    }

    // --- paginators ---

    pub fn chat_pages(&self, size: u32) -> Paginator<ChatPages> {
        Paginator::new(
            ChatPages {
                client: self.clone(),
            },
            size,
        )
    }

    pub fn deleted_chat_pages(&self, size: u32) -> Paginator<DeletedChatPages> {
        Paginator::new(
            DeletedChatPages {
                client: self.clone(),
            },
            size,
        )
    }

    pub fn message_pages(&self, chat_id: ChatId, size: u32) -> Paginator<MessagePages> {
        Paginator::new(
            MessagePages {
                client: self.clone(),
                chat_id,
            },
            size,
        )
    }

    pub fn deleted_message_pages(
        &self,
        chat_id: ChatId,
        size: u32,
    ) -> Paginator<DeletedMessagePages> {
        Paginator::new(
            DeletedMessagePages {
                client: self.clone(),
                chat_id,
            },
            size,
        )
    }

    pub fn user_pages(&self, size: u32) -> Paginator<UserPages> {
        Paginator::new(
            UserPages {
                client: self.clone(),
            },
            size,
        )
    }

    pub fn block_list_pages(&self, size: u32) -> Paginator<BlockListPages> {
        Paginator::new(
            BlockListPages {
                client: self.clone(),
            },
            size,
        )
    }
}

pub struct ChatPages {
    client: ApiClient,
}

#[async_trait]
impl FetchPage for ChatPages {
    type Item = ChatSchema;

    async fn fetch(&self, query: &PageQuery) -> Result<CursorPage<ChatSchema>> {
        self.client.fetch_chats(query, None).await
    }
}

pub struct DeletedChatPages {
    client: ApiClient,
}

#[async_trait]
impl FetchPage for DeletedChatPages {
    type Item = ChatSchema;

    async fn fetch(&self, query: &PageQuery) -> Result<CursorPage<ChatSchema>> {
        self.client.fetch_deleted_chats(query).await
    }
}

pub struct MessagePages {
    client: ApiClient,
    chat_id: ChatId,
}

#[async_trait]
impl FetchPage for MessagePages {
    type Item = MessageSchema;

    async fn fetch(&self, query: &PageQuery) -> Result<CursorPage<MessageSchema>> {
        self.client.fetch_messages(self.chat_id, query).await
    }
}

pub struct DeletedMessagePages {
    client: ApiClient,
    chat_id: ChatId,
}

#[async_trait]
impl FetchPage for DeletedMessagePages {
    type Item = MessageSchema;

    async fn fetch(&self, query: &PageQuery) -> Result<CursorPage<MessageSchema>> {
        self.client.fetch_deleted_messages(self.chat_id, query).await
    }
}

pub struct UserPages {
    client: ApiClient,
}

#[async_trait]
impl FetchPage for UserPages {
    type Item = UserShort;

    async fn fetch(&self, query: &PageQuery) -> Result<CursorPage<UserShort>> {
        self.client.fetch_users(query).await
    }
}

pub struct BlockListPages {
    client: ApiClient,
}

#[async_trait]
impl FetchPage for BlockListPages {
    type Item = UserShort;

    async fn fetch(&self, query: &PageQuery) -> Result<CursorPage<UserShort>> {
        self.client.fetch_block_list(query).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

use shared::domain::ChatId;
use thiserror::Error;

/// Failure taxonomy of the synchronization engine.
///
/// `NoCredential` is surfaced and never retried; `Transport` covers network
/// failures on REST calls (stream transport failures are absorbed by the
/// reconnect loop and only logged); `UnknownChat` is recovered by a
/// caller-driven fetch-then-retry; `Decode` is a malformed payload;
/// `Remote` propagates the authority's rejection unmodified.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no access credential available")]
    NoCredential,
    #[error("chat {0} is not loaded locally")]
    UnknownChat(ChatId),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Remote(rest_client::Error),
}

impl From<rest_client::Error> for SyncError {
    fn from(err: rest_client::Error) -> Self {
        match err {
            rest_client::Error::NoCredential => SyncError::NoCredential,
            rest_client::Error::Transport(inner) => SyncError::Transport(inner.to_string()),
            rest_client::Error::Decode(inner) => SyncError::Decode(inner),
            remote @ rest_client::Error::Remote { .. } => SyncError::Remote(remote),
        }
    }
}

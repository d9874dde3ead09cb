use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use client_core::{EngineConfig, GroupChange, SyncEngine, SyncEvent};
use rest_client::StaticCredentials;
use shared::domain::ChatId;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use uuid::Uuid;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    base_url: String,
    #[arg(long)]
    token: String,
    /// Chat to open and follow; without it only the chat list is printed.
    #[arg(long)]
    open: Option<Uuid>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let credentials = Arc::new(StaticCredentials::new(args.token));
    let engine = SyncEngine::new(EngineConfig::new(&args.base_url), credentials);
    engine.start().await?;

    let me = engine.current_user().await.expect("authenticated");
    println!("Signed in as {} ({})", me.username, me.id);

    for chat in engine.chats().await {
        let name = chat.name.unwrap_or_else(|| format!("{:?} chat", chat.kind));
        let preview = chat.last_message.unwrap_or_default();
        println!("{}  {name}  {preview}", chat.id);
    }

    let mut events = engine.subscribe();
    if let Some(chat) = args.open {
        engine.open_chat(ChatId(chat)).await?;
        println!("Following chat {chat}; press Ctrl-C to quit.");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SyncEvent::Message { chat_id, action, message }) => {
                    let body = message.content.unwrap_or_default();
                    println!("[{chat_id}] {action:?} from {}: {body}", message.user_id);
                }
                Ok(SyncEvent::MessageDeleted { chat_id, message_id }) => {
                    println!("[{chat_id}] message {message_id} deleted");
                }
                Ok(SyncEvent::Typing { chat_id, status }) => {
                    if status.is_typing {
                        println!("[{chat_id}] {} is typing...", status.username);
                    }
                }
                Ok(SyncEvent::GroupChanged { chat_id, change }) => match change {
                    GroupChange::Name(name) => println!("[{chat_id}] renamed to {name}"),
                    GroupChange::Image(_) => println!("[{chat_id}] group image updated"),
                },
                Ok(SyncEvent::ReadStatus { chat_id, status }) => {
                    println!("[{chat_id}] {} unread for {}", status.count_unread_msg, status.user_id);
                }
                Ok(SyncEvent::Reaction { chat_id, action, reaction }) => {
                    println!("[{chat_id}] reaction {action:?}: {}", reaction.reaction_type);
                }
                Ok(SyncEvent::Summarization { chat_id, .. }) => {
                    println!("[{chat_id}] summarization update");
                }
                Ok(SyncEvent::CredentialsRejected) => {
                    println!("Credentials rejected; sign in again.");
                    break;
                }
                Ok(SyncEvent::Error(message)) => warn!(%message, "engine error"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscription lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown().await;
    Ok(())
}

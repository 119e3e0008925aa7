//! Telegram client using teloxide.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode, ReplyParameters};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::chatbot::prompt::Formatting;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to send: {0}")]
    Send(String),
    #[error("failed to resolve bot identity: {0}")]
    Identity(String),
}

/// Outbound side of the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// The bot's own username, without the leading `@`.
    async fn bot_username(&self) -> Result<String, TransportError>;

    /// Send `text` to `chat_id`, optionally as a reply. Returns the new message id.
    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i32>,
        formatting: Formatting,
    ) -> Result<i32, TransportError>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
    username: OnceCell<String>,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            username: OnceCell::new(),
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn bot_username(&self) -> Result<String, TransportError> {
        self.username
            .get_or_try_init(|| async {
                let me = self.bot.get_me().await.map_err(|e| {
                    let msg = e.to_string();
                    warn!("Failed to get bot info: {msg}");
                    TransportError::Identity(msg)
                })?;
                info!("Bot user ID: {}, username: @{}", me.id, me.username());
                Ok::<_, TransportError>(me.username().to_string())
            })
            .await
            .cloned()
    }

    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i32>,
        formatting: Formatting,
    ) -> Result<i32, TransportError> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);

        if formatting == Formatting::Code {
            request = request.parse_mode(ParseMode::Html);
        }

        if let Some(msg_id) = reply_to_message_id {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id)));
        }

        request.await.map(|msg| msg.id.0).map_err(|e| {
            let msg = format!("{e}");
            warn!("Failed to send to chat {}: {}", chat_id, msg);
            TransportError::Send(msg)
        })
    }
}

use serde::Deserialize;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use url::Url;

use crate::db::OwnerId;
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct TelegramService {
    bot: Bot,
}

impl TelegramService {
    pub async fn new(token: String) -> AppResult<Self> {
        let bot = Bot::new(token);

        // Verify the bot token by getting bot info
        match bot.get_me().await {
            Ok(me) => {
                tracing::info!("Telegram bot initialized: @{}", me.username());
                Ok(Self { bot })
            }
            Err(e) => {
                tracing::error!("Failed to initialize Telegram bot: {}", e);
                Err(AppError::Telegram(format!(
                    "Failed to initialize bot: {}",
                    e
                )))
            }
        }
    }

    /// Plain-text reply; user-supplied content is never interpreted as markup.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<i32> {
        match self
            .bot
            .send_message(ChatId(chat_id), text)
            .disable_web_page_preview(true)
            .await
        {
            Ok(sent_message) => {
                tracing::debug!(
                    "Telegram message sent to {}: message_id={}",
                    chat_id,
                    sent_message.id
                );
                Ok(sent_message.id.0)
            }
            Err(e) => {
                tracing::error!("Failed to send Telegram message: {}", e);
                Err(AppError::Telegram(format!("Failed to send message: {}", e)))
            }
        }
    }

    /// Point Telegram at our webhook route. Telegram echoes `secret` back on every delivery.
    pub async fn set_webhook(&self, url: &str, secret: &str) -> AppResult<()> {
        let url = Url::parse(url)
            .map_err(|e| AppError::Config(format!("Invalid webhook URL {}: {}", url, e)))?;

        self.bot
            .set_webhook(url.clone())
            .secret_token(secret.to_string())
            .await
            .map_err(|e| AppError::Telegram(format!("Failed to set webhook: {}", e)))?;

        tracing::info!("Telegram webhook set to {}", url);
        Ok(())
    }
}

/// The subset of a Bot API `Update` the bot reacts to.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub from: Option<Sender>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sender {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// A text message reduced to what the assistant needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundText {
    pub chat_id: i64,
    pub owner_id: Option<OwnerId>,
    pub language_code: Option<String>,
    pub text: String,
}

impl Update {
    /// `None` for updates without a text message, and for messages sent by bots.
    pub fn into_inbound(self) -> Option<InboundText> {
        let message = self.message?;
        let text = message.text?;
        if message.from.as_ref().is_some_and(|f| f.is_bot) {
            return None;
        }

        Some(InboundText {
            chat_id: message.chat.id,
            owner_id: message.from.as_ref().map(|f| f.id),
            language_code: message.from.and_then(|f| f.language_code),
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_update_becomes_inbound() {
        let raw = r#"{
            "update_id": 1001,
            "message": {
                "message_id": 5,
                "date": 1700000000,
                "from": {"id": 42, "is_bot": false, "first_name": "Sam", "language_code": "ru"},
                "chat": {"id": 42, "type": "private"},
                "text": "lunch tomorrow"
            }
        }"#;
        let update: Update = serde_json::from_str(raw).expect("decode");

        assert_eq!(
            update.into_inbound(),
            Some(InboundText {
                chat_id: 42,
                owner_id: Some(42),
                language_code: Some("ru".to_string()),
                text: "lunch tomorrow".to_string(),
            })
        );
    }

    #[test]
    fn non_text_and_bot_updates_are_skipped() {
        let sticker = r#"{"update_id":1,"message":{"message_id":1,"chat":{"id":1},"from":{"id":1}}}"#;
        let edited = r#"{"update_id":2,"edited_message":{"message_id":1,"chat":{"id":1},"text":"x"}}"#;
        let bot = r#"{"update_id":3,"message":{"message_id":1,"chat":{"id":1},"from":{"id":9,"is_bot":true},"text":"x"}}"#;

        for raw in [sticker, edited, bot] {
            let update: Update = serde_json::from_str(raw).expect("decode");
            assert!(update.into_inbound().is_none());
        }
    }

    #[test]
    fn message_without_sender_has_no_owner() {
        let raw = r#"{"update_id":4,"message":{"message_id":1,"chat":{"id":-100},"text":"hi"}}"#;
        let update: Update = serde_json::from_str(raw).expect("decode");
        let inbound = update.into_inbound().expect("inbound");
        assert_eq!(inbound.owner_id, None);
        assert_eq!(inbound.chat_id, -100);
    }
}

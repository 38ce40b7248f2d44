//! Sends user notifications through the Telegram Bot API.
//!
//! Users are addressed by their Telegram id, which is the `user_id` stored on the deposit request.
use std::sync::Arc;

use deposit_engine::traits::{NotificationDispatcher, NotificationError};
use log::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::TelegramConfig;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Could not initialize the Telegram client. {0}")]
    Initialization(String),
    #[error("Notifications are disabled or no bot token was configured")]
    NotConfigured,
    #[error("Could not reach the Telegram API. {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Telegram refused the message. {0}")]
    Refused(String),
}

impl From<TelegramError> for NotificationError {
    fn from(e: TelegramError) -> Self {
        match e {
            TelegramError::NotConfigured => NotificationError::Disabled,
            e => NotificationError::DeliveryFailed(e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Debug, Deserialize)]
struct TelegramReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Clone)]
pub struct TelegramNotifier {
    send_message_url: String,
    client: Arc<Client>,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self, TelegramError> {
        if !config.is_usable() {
            return Err(TelegramError::NotConfigured);
        }
        let client = Client::builder().build().map_err(|e| TelegramError::Initialization(e.to_string()))?;
        let send_message_url = format!("{}/bot{}/sendMessage", config.api_url, config.bot_token.reveal());
        Ok(Self { send_message_url, client: Arc::new(client) })
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let body = SendMessage { chat_id, text, parse_mode: "HTML" };
        let response = self.client.post(&self.send_message_url).json(&body).send().await?;
        let status = response.status();
        let reply = response.json::<TelegramReply>().await.map_err(|e| {
            TelegramError::Refused(format!("HTTP {status} with an unreadable body. {e}"))
        })?;
        if reply.ok {
            Ok(())
        } else {
            Err(TelegramError::Refused(reply.description.unwrap_or_else(|| format!("HTTP {status}"))))
        }
    }
}

impl NotificationDispatcher for TelegramNotifier {
    async fn notify_user(&self, user_id: i64, message: &str) -> Result<(), NotificationError> {
        trace!("📨️ Sending {} characters to chat {user_id}", message.chars().count());
        self.send_message(user_id, message).await.map_err(|e| {
            warn!("📨️ Could not notify user {user_id}. {e}");
            NotificationError::from(e)
        })
    }
}

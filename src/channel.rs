use async_trait::async_trait;
use reqwest::Url;
use std::fmt;
use std::future::IntoFuture;
use std::time::Duration;
use teloxide::payloads::SendPhotoSetters;
use teloxide::requests::Requester;
use teloxide::types::{ChatId, InputFile, Recipient};
use teloxide::{Bot, RequestError};
use thiserror::Error;

use crate::config;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    #[error("telegram request failed: {0}")]
    Telegram(#[from] RequestError),
    #[error("invalid image url {url}: {source}")]
    InvalidImage {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Destination for published posts. One call is one attempt.
#[async_trait]
pub trait PostChannel: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), SendError>;

    async fn send_image(&self, image_url: &str, caption: &str) -> Result<(), SendError>;
}

#[derive(Clone)]
pub struct TelegramChannel {
    bot: Bot,
    chat: Recipient,
    timeout: Duration,
}

impl fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("chat", &self.chat)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TelegramChannel {
    pub fn new(bot_token: &str, chat: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = teloxide::net::default_reqwest_settings()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            bot: Bot::with_client(bot_token, http),
            chat: parse_recipient(chat),
            timeout,
        })
    }

    pub fn from_config(cfg: &config::Post) -> Result<Self, reqwest::Error> {
        Self::new(
            &cfg.bot_token,
            &cfg.post_chat,
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    async fn bounded<F, T>(&self, request: F) -> Result<(), SendError>
    where
        F: IntoFuture<Output = Result<T, RequestError>>,
    {
        match tokio::time::timeout(self.timeout, request.into_future()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(SendError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl PostChannel for TelegramChannel {
    async fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.bounded(self.bot.send_message(self.chat.clone(), text))
            .await
    }

    async fn send_image(&self, image_url: &str, caption: &str) -> Result<(), SendError> {
        let url = Url::parse(image_url).map_err(|source| SendError::InvalidImage {
            url: image_url.to_string(),
            source,
        })?;
        self.bounded(
            self.bot
                .send_photo(self.chat.clone(), InputFile::url(url))
                .caption(caption),
        )
        .await
    }
}

/// Numeric ids address chats directly; anything else is a channel username.
pub fn parse_recipient(chat: &str) -> Recipient {
    let chat = chat.trim();
    match chat.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) if chat.starts_with('@') => Recipient::ChannelUsername(chat.to_string()),
        Err(_) => Recipient::ChannelUsername(format!("@{chat}")),
    }
}

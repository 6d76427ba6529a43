//! Telegram notifier for query digests
//!
//! Sends plain-text messages to one chat through the Bot API `sendMessage`
//! method. Digests longer than Telegram's message limit are split on line
//! boundaries and delivered in order.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use crate::config::AppConfig;
use crate::utils::error::DeliveryError;

/// Maximum characters Telegram accepts in one message
pub const MESSAGE_LIMIT: usize = 4096;

/// Upper bound for one sendMessage round trip, response body included
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivery of a finished digest to a chat destination
///
/// Failures are reported to the caller and never retried here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), DeliveryError>;
}

/// Notifier shared with the supervisor
pub type SharedNotifier = Arc<dyn Notifier>;

/// sendMessage request body
#[derive(Debug, Serialize)]
pub struct TelegramMessage<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
    pub disable_web_page_preview: bool,
}

/// Subset of the Bot API response envelope
#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API notifier
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    /// API base URL, without trailing slash
    api_base: String,
    /// Bot token
    bot_token: String,
    /// Destination chat
    chat_id: String,
    /// Per-chunk request timeout
    timeout: Duration,
    /// HTTP client
    client: Client,
}

impl TelegramNotifier {
    pub fn new(
        api_base: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            timeout: DEFAULT_DELIVERY_TIMEOUT,
            client: Client::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.telegram_api_base.clone(),
            config.telegram_bot_token.clone(),
            config.telegram_chat_id.clone(),
        )
        .with_timeout(config.telegram_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// sendMessage endpoint for this bot
    pub fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    async fn send_chunk(&self, text: &str) -> Result<(), DeliveryError> {
        // Telegram 호출 타임아웃 적용
        tokio::time::timeout(self.timeout, self.post_chunk(text))
            .await
            .map_err(|_| {
                error!(timeout_secs = self.timeout.as_secs_f64(), "Telegram request timed out");
                DeliveryError::Timeout(self.timeout)
            })?
    }

    async fn post_chunk(&self, text: &str) -> Result<(), DeliveryError> {
        let payload = TelegramMessage {
            chat_id: &self.chat_id,
            text,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                // the URL carries the bot token
                let e = e.without_url();
                error!(error = %e, "Failed to send Telegram message");
                DeliveryError::Request(e)
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let envelope: Option<TelegramResponse> = serde_json::from_str(&body).ok();

        let accepted = status.is_success() && envelope.as_ref().map(|r| r.ok).unwrap_or(false);
        if !accepted {
            let description = envelope
                .and_then(|r| r.description)
                .unwrap_or(body);
            error!(status = %status, description = %description, "Telegram API returned error");
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                description,
            });
        }

        debug!(chars = text.chars().count(), "Telegram chunk delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    #[instrument(skip(self, text), fields(chat_id = %self.chat_id))]
    async fn notify(&self, text: &str) -> Result<(), DeliveryError> {
        info!(digest = %text, "Sending notification");

        let chunks = split_message(text, MESSAGE_LIMIT);
        let total = chunks.len();
        for (index, chunk) in chunks.iter().enumerate() {
            self.send_chunk(chunk).await.inspect_err(|_| {
                error!(chunk = index + 1, total, "Aborting remaining chunks");
            })?;
        }

        info!(chunks = total, "Telegram notification sent successfully");
        Ok(())
    }
}

/// Split `text` into pieces of at most `limit` characters
///
/// Breaks only between lines where possible. A single line longer than the
/// limit is cut at character boundaries.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();

        if current_len + line_len <= limit {
            current.push_str(line);
            current_len += line_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len <= limit {
            current.push_str(line);
            current_len = line_len;
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        for piece in chars.chunks(limit) {
            if piece.len() == limit {
                chunks.push(piece.iter().collect());
            } else {
                current = piece.iter().collect();
                current_len = piece.len();
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

use std::time::Duration;

use pagewatch_core::error::AppError;
use pagewatch_core::models::ChangeNotice;
use pagewatch_core::traits::Notifier;
use reqwest::Client;
use serde::Serialize;

const TELEGRAM_API: &str = "https://api.telegram.org";
const EXCERPT_LIMIT: usize = 1000;
const MESSAGE_LIMIT: usize = 4000;
const TRUNCATED: &str = "\n...truncated";

#[derive(Clone)]
struct Credentials {
    token: String,
    chat_id: String,
}

/// Sends one Telegram message per batch of changes.
///
/// Without a bot token and chat id the notifier is disabled: batches are
/// logged and dropped.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    credentials: Option<Credentials>,
    base_url: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client()?,
            credentials: Some(Credentials {
                token: token.to_string(),
                chat_id: chat_id.to_string(),
            }),
            base_url: TELEGRAM_API.to_string(),
        })
    }

    /// A notifier that only logs.
    pub fn disabled() -> Result<Self, AppError> {
        Ok(Self {
            client: build_client()?,
            credentials: None,
            base_url: TELEGRAM_API.to_string(),
        })
    }

    /// Configure from `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`.
    pub fn from_env() -> Result<Self, AppError> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|v| !v.is_empty());
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok().filter(|v| !v.is_empty());
        match (token, chat_id) {
            (Some(token), Some(chat_id)) => Self::new(&token, &chat_id),
            _ => {
                tracing::info!("TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID missing, notifications disabled");
                Self::disabled()
            }
        }
    }

    /// Point at another Bot API host (tests, self-hosted servers).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }
}

fn build_client() -> Result<Client, AppError> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| AppError::NotifierError(e.to_string()))
}

impl Notifier for TelegramNotifier {
    async fn notify_batch(&self, changes: &[ChangeNotice]) -> Result<(), AppError> {
        let Some(credentials) = &self.credentials else {
            tracing::info!(changes = changes.len(), "Notifications disabled, skipping");
            return Ok(());
        };

        let text = format_batch_message(changes);
        let url = format!("{}/bot{}/sendMessage", self.base_url, credentials.token);
        tracing::debug!(chars = text.chars().count(), "Sending Telegram message");

        let response = self
            .client
            .post(&url)
            .json(&SendMessage {
                chat_id: &credentials.chat_id,
                text: &text,
                disable_web_page_preview: true,
            })
            .send()
            .await
            .map_err(|e| AppError::NotifierError(format!("Telegram request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::NotifierError(format!(
                "Telegram returned HTTP {}: {body}",
                status.as_u16()
            )));
        }

        tracing::info!(changes = changes.len(), "Telegram notification sent");
        Ok(())
    }
}

/// Render a batch as one message: title, url and excerpt per change.
///
/// Excerpts are cut at 1000 chars and the whole message at 4000.
pub fn format_batch_message(changes: &[ChangeNotice]) -> String {
    let mut message = String::from("Webpage Monitor - Changes Detected\n\n");
    for change in changes {
        message.push_str(&change.title);
        message.push('\n');
        message.push_str(&change.url);
        message.push_str("\n\n");
        message.push_str(&truncate_chars(&change.content, EXCERPT_LIMIT));
        message.push_str("\n\n");
    }
    truncate_chars(&message, MESSAGE_LIMIT)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{TRUNCATED}", &text[..cut]),
        None => text.to_string(),
    }
}

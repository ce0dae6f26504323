use crate::alerts::sinks::{format_body, truncate_text, ChannelSink, SinkFuture};
use crate::config::TelegramConfig;
use crate::error::SinkError;
use crate::findings::Finding;
use log::debug;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;

/// Telegram caps message text at 4096 characters
const MAX_MESSAGE_LENGTH: usize = 4096;

/// Delivers findings to a Telegram chat through the Bot API
pub struct TelegramSink {
    client: Client,
    config: TelegramConfig,
}

impl TelegramSink {
    /// Create a Telegram sink
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Unreachable` if the HTTP client cannot be built.
    pub fn new(config: TelegramConfig, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    fn api_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        )
    }

    /// Render a finding as a Markdown chat message
    pub fn format_message(finding: &Finding) -> String {
        let text = format!(
            "{} *{}*\n\n{}",
            finding.priority.emoji(),
            finding.priority.label(),
            escape_markdown(&format_body(finding))
        );
        truncate_text(&text, MAX_MESSAGE_LENGTH)
    }
}

/// Escape characters that legacy Telegram Markdown treats as markup
///
/// Entity ids like `water_tank` would otherwise open an italic span and get
/// the whole message rejected.
fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Map a non-success Bot API status to a sink error
fn status_error(status: StatusCode, body: String) -> SinkError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        SinkError::RateLimited
    } else if status.is_client_error() {
        SinkError::Rejected(format!("HTTP {}: {}", status, truncate_text(&body, 200)))
    } else {
        SinkError::Unreachable(format!("HTTP {}", status))
    }
}

impl ChannelSink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    fn send<'a>(&'a self, finding: &'a Finding) -> SinkFuture<'a> {
        Box::pin(async move {
            let payload = json!({
                "chat_id": self.config.chat_id,
                "text": Self::format_message(finding),
                "parse_mode": "Markdown",
            });

            let response = self.client.post(self.api_url()).json(&payload).send().await?;
            let status = response.status();
            if status.is_success() {
                debug!("Telegram notification sent for {}", finding.entity_id);
                return Ok(());
            }

            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, body))
        })
    }
}

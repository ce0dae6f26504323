use crate::error::SinkError;
use crate::findings::{Finding, Priority};
use log::{info, Level};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Boxed future returned by channel sink deliveries
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// Trait for notification channel implementations
///
/// A sink delivers one finding per call and does not retry. The router bounds
/// every call with its own timeout.
pub trait ChannelSink: Send + Sync {
    /// Channel name used in routing tables
    fn name(&self) -> &str;

    fn send<'a>(&'a self, finding: &'a Finding) -> SinkFuture<'a>;
}

/// Writes findings to the application log
///
/// The log level follows the finding's priority, so a Critical finding shows
/// up as an error even when no other channel is configured.
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }

    pub fn level_for(priority: Priority) -> Level {
        match priority {
            Priority::Critical => Level::Error,
            Priority::High => Level::Warn,
            Priority::Medium | Priority::Low => Level::Info,
        }
    }
}

impl ChannelSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn send<'a>(&'a self, finding: &'a Finding) -> SinkFuture<'a> {
        Box::pin(async move {
            log::log!(Self::level_for(finding.priority), "{}", finding.headline());
            Ok(())
        })
    }
}

/// Sink that records every finding it receives, for tests and dry runs
///
/// It can be configured to fail or to stall, which makes it useful for
/// checking that one bad channel does not hold up the others.
#[derive(Debug)]
pub struct RecordingSink {
    name: String,
    received: Mutex<Vec<Finding>>,
    failure: Option<SinkError>,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            received: Mutex::new(Vec::new()),
            failure: None,
            delay: None,
        }
    }

    /// Record findings but report every delivery as failed
    pub fn failing(name: impl Into<String>, error: SinkError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new(name)
        }
    }

    /// Wait before completing each delivery
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Snapshot of the findings received so far
    pub fn received(&self) -> Vec<Finding> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ChannelSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(&'a self, finding: &'a Finding) -> SinkFuture<'a> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.received
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(finding.clone());

            match &self.failure {
                Some(error) => Err(error.clone()),
                None => {
                    info!("RECORDED NOTIFICATION [{}]: {}", self.name, finding.headline());
                    Ok(())
                }
            }
        })
    }
}

/// Truncate text to a maximum byte length, ending with "..." when cut
///
/// Truncation always happens on a UTF-8 character boundary.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }

    let mut truncate_at = max_length.saturating_sub(3);
    while truncate_at > 0 && !text.is_char_boundary(truncate_at) {
        truncate_at -= 1;
    }
    format!("{}...", &text[..truncate_at])
}

/// Multi-line body shared by the chat and email channels
pub fn format_body(finding: &Finding) -> String {
    let mut body = format!(
        "{}: {}\n\nEntity: {}\nDetected: {}",
        finding.kind,
        finding.message,
        finding.entity_id,
        finding.detected_at.format("%Y-%m-%d %H:%M UTC")
    );

    if !finding.evidence.is_empty() {
        body.push_str("\n\nEvidence:");
        for (key, value) in &finding.evidence {
            body.push_str(&format!("\n- {}: {:.2}", key, value));
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn finding() -> Finding {
        Finding::new(
            "water_tank",
            crate::findings::FindingKind::TankLow,
            Priority::Critical,
            "Tank level 8.0% is below critical threshold 10.0%",
            Utc::now(),
        )
        .with_evidence("value", 8.0)
    }

    #[tokio::test]
    async fn test_log_sink_always_succeeds() {
        let sink = LogSink::new();
        assert_eq!(sink.name(), "log");
        assert!(sink.send(&finding()).await.is_ok());
    }

    #[test]
    fn test_log_levels_follow_priority() {
        assert_eq!(LogSink::level_for(Priority::Critical), Level::Error);
        assert_eq!(LogSink::level_for(Priority::High), Level::Warn);
        assert_eq!(LogSink::level_for(Priority::Low), Level::Info);
    }

    #[tokio::test]
    async fn test_recording_sink() {
        let ok = RecordingSink::new("telegram");
        let failing = RecordingSink::failing("email", SinkError::RateLimited);

        assert!(ok.send(&finding()).await.is_ok());
        assert_eq!(failing.send(&finding()).await, Err(SinkError::RateLimited));
        assert_eq!(ok.count(), 1);
        assert_eq!(failing.count(), 1);
        assert_eq!(ok.received()[0].entity_id, "water_tank");
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("this is a long message", 10), "this is...");

        // Multi-byte characters are never split
        let text = "🚨🚨🚨🚨";
        let truncated = truncate_text(text, 9);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 9);
        assert!(truncated.starts_with('🚨'));
    }

    #[test]
    fn test_format_body_includes_evidence() {
        let body = format_body(&finding());
        assert!(body.starts_with("tank_low: Tank level 8.0%"));
        assert!(body.contains("Entity: water_tank"));
        assert!(body.contains("- value: 8.00"));
    }
}

// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn prop_truncate_never_exceeds_limit(text: String, max_length: u8) -> bool {
        let max_length = (max_length as usize).max(3);
        truncate_text(&text, max_length).len() <= max_length
    }
}

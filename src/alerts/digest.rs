use crate::alerts::cooldown::CooldownEntry;
use crate::alerts::sinks::{ChannelSink, SinkFuture};
use crate::error::SinkError;
use crate::findings::{Finding, FindingKind, Priority};
use crate::readings::Timestamp;
use chrono::Duration;
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Entity id used on digest summary findings
pub const DIGEST_ENTITY: &str = "digest";

#[derive(Debug, Default)]
struct DigestState {
    pending: Vec<Finding>,
    last_flush: Option<Timestamp>,
}

/// Collects low-urgency findings and delivers them as one periodic summary
///
/// `send` only buffers. After each tick the scheduler checks
/// [`DigestSink::is_due`] and calls [`DigestSink::flush`], and flushes once
/// more on shutdown; the summary goes to the target sink directly.
pub struct DigestSink {
    target: Arc<dyn ChannelSink>,
    interval: Duration,
    state: Mutex<DigestState>,
}

impl DigestSink {
    pub fn new(target: Arc<dyn ChannelSink>, interval: Duration) -> Self {
        Self {
            target,
            interval,
            state: Mutex::new(DigestState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, DigestState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the sink summaries are delivered to
    pub fn target_name(&self) -> &str {
        self.target.name()
    }

    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Whether the digest interval has elapsed since the last flush
    ///
    /// The first call only starts the interval clock.
    pub fn is_due(&self, now: Timestamp) -> bool {
        let mut state = self.state();
        match state.last_flush {
            None => {
                state.last_flush = Some(now);
                false
            }
            Some(last) => now - last >= self.interval,
        }
    }

    /// Deliver everything pending as one summary finding
    ///
    /// Returns `None` when there was nothing to summarize.
    pub async fn flush(
        &self,
        now: Timestamp,
        suppressed: &[CooldownEntry],
    ) -> Option<Result<(), SinkError>> {
        let pending = {
            let mut state = self.state();
            state.last_flush = Some(now);
            std::mem::take(&mut state.pending)
        };

        let summary = Self::summarize(&pending, suppressed, now)?;
        info!(
            "Delivering digest of {} findings via {}",
            pending.len(),
            self.target.name()
        );
        Some(self.target.send(&summary).await)
    }

    /// Build the summary finding, `None` when there is nothing to report
    pub fn summarize(
        pending: &[Finding],
        suppressed: &[CooldownEntry],
        now: Timestamp,
    ) -> Option<Finding> {
        if pending.is_empty() && suppressed.is_empty() {
            return None;
        }

        let mut message = format!("{} findings since the last digest", pending.len());
        for finding in pending {
            message.push_str(&format!("\n- {}", finding.headline()));
        }

        let suppressed_total: u64 = suppressed.iter().map(|e| e.suppressed_count).sum();
        if !suppressed.is_empty() {
            message.push_str(&format!("\nSuppressed repeats: {}", suppressed_total));
            for entry in suppressed {
                message.push_str(&format!(
                    "\n- {} ({}): {} repeats since {}",
                    entry.entity_id,
                    entry.kind,
                    entry.suppressed_count,
                    entry.last_dispatched_at.format("%Y-%m-%d %H:%M UTC")
                ));
            }
        }

        let priority = pending
            .iter()
            .map(|f| f.priority)
            .max()
            .unwrap_or(Priority::Low);

        Some(
            Finding::new(DIGEST_ENTITY, FindingKind::Custom, priority, message, now)
                .with_evidence("findings", pending.len() as f64)
                .with_evidence("suppressed", suppressed_total as f64),
        )
    }
}

impl ChannelSink for DigestSink {
    fn name(&self) -> &str {
        "digest"
    }

    fn send<'a>(&'a self, finding: &'a Finding) -> SinkFuture<'a> {
        Box::pin(async move {
            let mut state = self.state();
            state.pending.push(finding.clone());
            debug!(
                "Buffered {} for digest ({} pending)",
                finding.headline(),
                state.pending.len()
            );
            Ok(())
        })
    }
}

//! One entity's pass through fetch, detect, classify, cooldown and dispatch

use crate::alerts::{CooldownTracker, DeliveryReport, NotificationRouter};
use crate::buffer::ReadingBuffer;
use crate::classifier::ConditionClassifier;
use crate::config::{Config, Entity};
use crate::detection::{AnomalyDetector, DetectionContext, TrendAnalyzer, TrendResult};
use crate::error::SourceError;
use crate::findings::Finding;
use crate::readings::{Reading, Timestamp};
use crate::sources::{ReadingSource, SourceFuture};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// What happened to one entity during a tick
#[derive(Debug, Clone)]
pub struct EntityReport {
    pub entity_id: String,
    /// First source failure of the tick, if any
    pub source_error: Option<SourceError>,
    /// Readings added to the buffer this tick
    pub new_readings: usize,
    pub window_len: usize,
    pub trend: TrendResult,
    /// Everything the classifier produced, dispatched or not
    pub findings: Vec<Finding>,
    /// Findings admitted by the cooldown tracker, with their delivery results
    pub dispatched: Vec<(Finding, DeliveryReport)>,
    /// Findings held back by the cooldown tracker
    pub suppressed: Vec<Finding>,
}

/// Shared processing state for every monitored entity
///
/// The reading buffer and cooldown tracker live for the life of the process.
/// Neither lock is held across an await point.
pub struct Pipeline {
    source: Arc<dyn ReadingSource>,
    buffer: Mutex<ReadingBuffer>,
    detector: AnomalyDetector,
    analyzer: TrendAnalyzer,
    classifier: ConditionClassifier,
    cooldown: CooldownTracker,
    router: NotificationRouter,
    source_timeout: Duration,
    lookback: chrono::Duration,
    actuation_grace: chrono::Duration,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        source: Arc<dyn ReadingSource>,
        router: NotificationRouter,
    ) -> Self {
        Self {
            source,
            buffer: Mutex::new(ReadingBuffer::new(
                config.history_window(),
                config.source.buffer_capacity,
            )),
            detector: AnomalyDetector::from_config(config),
            analyzer: TrendAnalyzer::from_config(&config.trend),
            classifier: ConditionClassifier::from_config(config),
            cooldown: CooldownTracker::new(config.cooldown.clone()),
            router,
            source_timeout: config.scheduler.source_timeout(),
            lookback: config.history_window(),
            actuation_grace: chrono::Duration::minutes(config.anomaly.actuation_grace_minutes),
        }
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    pub fn router(&self) -> &NotificationRouter {
        &self.router
    }

    /// Number of buffered readings for an entity
    pub fn buffered(&self, entity_id: &str) -> usize {
        self.buffer().len(entity_id)
    }

    fn buffer(&self) -> std::sync::MutexGuard<'_, ReadingBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a source call under the source timeout
    async fn bounded<T>(&self, call: SourceFuture<'_, T>) -> Result<T, SourceError> {
        match tokio::time::timeout(self.source_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout),
        }
    }

    /// Process one entity at tick time `now`
    ///
    /// Source failures mean no new readings this tick; detection still runs on
    /// the buffered window, which is how missing data is noticed. An entity
    /// that has never delivered a reading is measured from its first failed poll.
    pub async fn process(&self, entity: &Entity, now: Timestamp) -> EntityReport {
        let id = entity.id.as_str();
        let (fetched, source_error, recent_actuation) = self.fetch(id, now).await;

        let (new_readings, window, silent_since) = {
            let mut buffer = self.buffer();
            let added = buffer.extend(fetched);
            if source_error.is_some() && added == 0 {
                buffer.mark_silent(id, now);
            }
            buffer.prune_old_entries(now);
            (added, buffer.window(id, now), buffer.silent_since(id))
        };

        let context = DetectionContext::at(now)
            .with_actuation(recent_actuation)
            .with_silence(silent_since);
        let candidates = self.detector.detect(&window, &context);
        let trend = self.analyzer.analyze(&window);
        let findings = self
            .classifier
            .classify(entity, &candidates, &trend, &window, &context);

        debug!(
            "{}: {} readings in window, trend {:?} ({:.2}/day), {} findings",
            id,
            window.len(),
            trend.direction,
            trend.rate_per_day,
            findings.len()
        );

        let mut dispatched = Vec::new();
        let mut suppressed = Vec::new();
        for finding in &findings {
            if self.cooldown.admit_at(finding, now) {
                info!("Dispatching {}", finding.headline());
                let report = self.router.route(finding).await;
                dispatched.push((finding.clone(), report));
            } else {
                suppressed.push(finding.clone());
            }
        }

        EntityReport {
            entity_id: entity.id.clone(),
            source_error,
            new_readings,
            window_len: window.len(),
            trend,
            findings,
            dispatched,
            suppressed,
        }
    }

    /// Fetch the current reading, recent history and actuation state
    async fn fetch(
        &self,
        entity_id: &str,
        now: Timestamp,
    ) -> (Vec<Reading>, Option<SourceError>, bool) {
        let lookback_start = now - self.lookback;
        let current = match self.bounded(self.source.get_current(entity_id)).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("No reading for {} this tick: {}", entity_id, e);
                let recovered = self.recover_history(entity_id, lookback_start).await;
                return (recovered, Some(e), false);
            }
        };

        let since = self
            .buffer()
            .latest(entity_id)
            .map(|r| r.captured_at.max(lookback_start))
            .unwrap_or(lookback_start);

        let mut readings = Vec::new();
        let mut source_error = None;
        match self.bounded(self.source.get_history(entity_id, since)).await {
            Ok(history) => readings.extend(history),
            Err(e) => {
                warn!("History unavailable for {}: {}", entity_id, e);
                source_error = Some(e);
            }
        }
        readings.push(current);

        let recent_actuation = match self.bounded(self.source.last_actuation(entity_id)).await {
            Ok(Some(at)) => at <= now && now - at <= self.actuation_grace,
            Ok(None) => false,
            Err(e) => {
                debug!("Actuation state unavailable for {}: {}", entity_id, e);
                false
            }
        };

        (readings, source_error, recent_actuation)
    }

    /// Load history for an entity with an empty buffer, such as after a restart
    ///
    /// Recovers the last known readings when the current reading is
    /// unavailable, so staleness is measured from real data.
    async fn recover_history(&self, entity_id: &str, since: Timestamp) -> Vec<Reading> {
        if self.buffered(entity_id) > 0 {
            return Vec::new();
        }
        match self.bounded(self.source.get_history(entity_id, since)).await {
            Ok(history) => {
                if !history.is_empty() {
                    info!("Recovered {} readings for {} from history", history.len(), entity_id);
                }
                history
            }
            Err(e) => {
                debug!("History also unavailable for {}: {}", entity_id, e);
                Vec::new()
            }
        }
    }
}

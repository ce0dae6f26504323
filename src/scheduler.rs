//! Fixed-interval driver for the monitoring pipeline
//!
//! The scheduler runs one tick per interval. Within a tick every entity is
//! processed concurrently, bounded by `max_concurrent_entities`. Stop requests
//! are only observed between ticks, so a tick always completes and cooldown
//! state is never left half-updated.

use crate::alerts::NotificationRouter;
use crate::config::{Config, Entity};
use crate::error::SchedulerError;
use crate::findings::Finding;
use crate::monitoring::{PipelineMonitor, TickTimer};
use crate::pipeline::{EntityReport, Pipeline};
use crate::readings::Timestamp;
use crate::sources::{HttpReadingSource, ReadingSource};
use chrono::Utc;
use log::{error, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Lifecycle of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// Stop requested; flushing pending digests
    Stopping,
    Stopped,
}

/// An entity that could not be processed normally during a tick
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFailure {
    pub entity_id: String,
    pub error: String,
}

/// Outcome of one tick across all entities
#[derive(Debug, Clone)]
pub struct TickSummary {
    pub started_at: Timestamp,
    pub duration: Duration,
    pub reports: Vec<EntityReport>,
    /// Source errors and crashed entity tasks
    pub failures: Vec<EntityFailure>,
}

impl TickSummary {
    pub fn report(&self, entity_id: &str) -> Option<&EntityReport> {
        self.reports.iter().find(|r| r.entity_id == entity_id)
    }

    /// Every finding admitted by the cooldown tracker during the tick
    pub fn dispatched(&self) -> impl Iterator<Item = &Finding> {
        self.reports
            .iter()
            .flat_map(|r| r.dispatched.iter().map(|(finding, _)| finding))
    }

    pub fn suppressed_count(&self) -> usize {
        self.reports.iter().map(|r| r.suppressed.len()).sum()
    }
}

/// Drives the monitoring pipeline on a fixed interval
///
/// Cloning is cheap and every clone shares the same pipeline, state and
/// metrics.
#[derive(Clone)]
pub struct MonitoringScheduler {
    config: Arc<Config>,
    entities: Arc<Vec<Entity>>,
    pipeline: Arc<Pipeline>,
    monitor: PipelineMonitor,
    state: Arc<Mutex<SchedulerState>>,
}

impl MonitoringScheduler {
    pub fn new(config: Config, source: Arc<dyn ReadingSource>, router: NotificationRouter) -> Self {
        let pipeline = Pipeline::new(&config, source, router);
        let monitor = PipelineMonitor::new(config.scheduler.interval());

        Self {
            entities: Arc::new(config.entities()),
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            monitor,
            state: Arc::new(Mutex::new(SchedulerState::Idle)),
        }
    }

    /// Build a scheduler reading from the HTTP sensor backend
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` if the configuration is invalid or a
    /// channel cannot be built.
    pub fn from_config(config: Config) -> Result<Self, SchedulerError> {
        config.validate()?;
        let source = HttpReadingSource::from_config(&config).map_err(|e| {
            crate::error::ConfigError::ValidationError(format!("sensor source: {}", e))
        })?;
        let router = NotificationRouter::from_config(&config)?;
        Ok(Self::new(config, Arc::new(source), router))
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        info!("Scheduler state: {:?}", state);
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn monitor(&self) -> &PipelineMonitor {
        &self.monitor
    }

    /// Run one tick stamped with the current time
    pub async fn run_tick(&self) -> TickSummary {
        self.run_tick_at(Utc::now()).await
    }

    /// Run one tick at time `now`
    ///
    /// A failing or panicking entity is recorded in the summary and never
    /// aborts the tick.
    pub async fn run_tick_at(&self, now: Timestamp) -> TickSummary {
        let timer = TickTimer::start(&self.monitor);
        let semaphore = Arc::new(Semaphore::new(self.config.scheduler.max_concurrent_entities));

        let mut handles: Vec<(String, JoinHandle<EntityReport>)> = Vec::new();
        for entity in self.entities.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let pipeline = Arc::clone(&self.pipeline);
            let entity_id = entity.id.clone();

            let handle = tokio::spawn(async move {
                // The semaphore is never closed, so acquiring only waits
                let _permit = semaphore.acquire_owned().await.ok();
                pipeline.process(&entity, now).await
            });
            handles.push((entity_id, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        let mut failures = Vec::new();
        for (entity_id, handle) in handles {
            match handle.await {
                Ok(report) => {
                    if let Some(ref e) = report.source_error {
                        failures.push(EntityFailure {
                            entity_id: entity_id.clone(),
                            error: e.to_string(),
                        });
                    }
                    for (_, delivery) in &report.dispatched {
                        for outcome in &delivery.outcomes {
                            self.monitor
                                .record_delivery(&outcome.sink, outcome.result.is_ok());
                        }
                    }
                    reports.push(report);
                }
                Err(e) => {
                    error!("Processing {} failed: {}", entity_id, e);
                    failures.push(EntityFailure {
                        entity_id,
                        error: format!("entity task failed: {}", e),
                    });
                }
            }
        }

        if let Some(digest) = self.pipeline.router().digest() {
            if digest.is_due(now) {
                let suppressed = self.pipeline.cooldown().take_unreported();
                if let Some(Err(e)) = digest.flush(now, &suppressed).await {
                    warn!("Digest delivery failed: {}", e);
                }
            }
        }

        let duration = timer.finish(failures.len() as u64);
        let summary = TickSummary {
            started_at: now,
            duration,
            reports,
            failures,
        };

        info!(
            "Tick complete in {:?}: {} entities, {} dispatched, {} suppressed, {} failures",
            summary.duration,
            summary.reports.len(),
            summary.dispatched().count(),
            summary.suppressed_count(),
            summary.failures.len()
        );
        summary
    }

    /// Deliver whatever the digest has buffered
    pub async fn flush_digest(&self, now: Timestamp) {
        if let Some(digest) = self.pipeline.router().digest() {
            let suppressed = self.pipeline.cooldown().take_unreported();
            match digest.flush(now, &suppressed).await {
                Some(Ok(())) => info!("Final digest delivered"),
                Some(Err(e)) => warn!("Final digest delivery failed: {}", e),
                None => {}
            }
        }
    }

    /// Validate the configuration and start the tick loop on the tokio runtime
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidState` unless the scheduler is idle and
    /// `SchedulerError::Config` if the configuration is invalid; in both cases
    /// nothing is started.
    pub fn start(&self) -> Result<SchedulerHandle, SchedulerError> {
        let state = self.state();
        if state != SchedulerState::Idle {
            return Err(SchedulerError::InvalidState(state));
        }
        self.config.validate()?;

        let (stop_sender, stop_receiver) = watch::channel(false);
        self.set_state(SchedulerState::Running);

        let scheduler = self.clone();
        let task = tokio::spawn(async move { scheduler.run_loop(stop_receiver).await });

        Ok(SchedulerHandle {
            stop_sender,
            task,
            state: Arc::clone(&self.state),
        })
    }

    async fn run_loop(&self, mut stop_receiver: watch::Receiver<bool>) {
        let interval = self.config.scheduler.interval();
        info!(
            "Monitoring {} entities every {:?}",
            self.entities.len(),
            interval
        );

        // Ticks start on a fixed cadence; a slow tick delays the next one
        // instead of triggering a burst
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *stop_receiver.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = stop_receiver.changed() => {
                    if changed.is_err() {
                        warn!("Scheduler handle dropped, stopping");
                    }
                    break;
                }
                _ = ticker.tick() => {}
            }

            self.run_tick().await;
            self.monitor.log_health();
        }

        self.set_state(SchedulerState::Stopping);
        self.flush_digest(Utc::now()).await;
        self.set_state(SchedulerState::Stopped);
    }
}

/// Handle to a running scheduler task
pub struct SchedulerHandle {
    stop_sender: watch::Sender<bool>,
    task: JoinHandle<()>,
    state: Arc<Mutex<SchedulerState>>,
}

impl SchedulerHandle {
    /// Request a stop; the current tick, if any, runs to completion
    pub fn stop(&self) {
        info!("Stop requested");
        self.stop_sender.send_replace(true);
    }

    /// Clone of the stop channel, for signal handlers
    pub fn stop_sender(&self) -> watch::Sender<bool> {
        self.stop_sender.clone()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the scheduler task to finish
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::TaskFailed` if the task panicked.
    pub async fn join(self) -> Result<(), SchedulerError> {
        self.task
            .await
            .map_err(|e| SchedulerError::TaskFailed(e.to_string()))
    }
}

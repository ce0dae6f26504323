use crate::error::SourceError;
use crate::readings::{Reading, Timestamp};
use crate::sources::{ReadingSource, SourceFuture};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    current: HashMap<String, Reading>,
    history: HashMap<String, Vec<Reading>>,
    failures: HashMap<String, SourceError>,
    current_failures: HashMap<String, SourceError>,
    actuations: HashMap<String, Timestamp>,
    current_calls: HashMap<String, usize>,
}

/// In-memory reading source for tests and demos
///
/// Values are set per entity and returned until changed. A failure injected for
/// an entity makes every call for that entity fail until it is cleared.
#[derive(Debug, Default)]
pub struct MockReadingSource {
    state: Mutex<MockState>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockReadingSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, for exercising caller timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the reading returned by `get_current`, also recording it in history
    pub fn set_reading(&self, entity_id: &str, value: f64, captured_at: Timestamp) {
        let reading = Reading::new(entity_id, value, captured_at);
        let mut state = self.state();
        state
            .history
            .entry(entity_id.to_string())
            .or_default()
            .push(reading.clone());
        state.current.insert(entity_id.to_string(), reading);
    }

    /// Replace an entity's history
    ///
    /// The latest reading of the history also becomes the current reading.
    pub fn set_history(&self, entity_id: &str, readings: Vec<Reading>) {
        let mut state = self.state();
        if let Some(latest) = readings.iter().max_by_key(|r| r.captured_at) {
            state.current.insert(entity_id.to_string(), latest.clone());
        }
        state.history.insert(entity_id.to_string(), readings);
    }

    /// Make every call for an entity fail with `error`
    pub fn set_failure(&self, entity_id: &str, error: SourceError) {
        self.state().failures.insert(entity_id.to_string(), error);
    }

    /// Make only `get_current` fail for an entity; history stays available
    pub fn set_current_failure(&self, entity_id: &str, error: SourceError) {
        self.state()
            .current_failures
            .insert(entity_id.to_string(), error);
    }

    pub fn clear_failure(&self, entity_id: &str) {
        let mut state = self.state();
        state.failures.remove(entity_id);
        state.current_failures.remove(entity_id);
    }

    pub fn set_actuation(&self, entity_id: &str, at: Timestamp) {
        self.state().actuations.insert(entity_id.to_string(), at);
    }

    /// Number of `get_current` calls made for an entity
    pub fn current_calls(&self, entity_id: &str) -> usize {
        self.state()
            .current_calls
            .get(entity_id)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of concurrent `get_current` calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl ReadingSource for MockReadingSource {
    fn get_current<'a>(&'a self, entity_id: &'a str) -> SourceFuture<'a, Reading> {
        Box::pin(async move {
            *self
                .state()
                .current_calls
                .entry(entity_id.to_string())
                .or_insert(0) += 1;

            let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
            self.pause().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let state = self.state();
            if let Some(error) = state
                .failures
                .get(entity_id)
                .or_else(|| state.current_failures.get(entity_id))
            {
                return Err(error.clone());
            }
            state
                .current
                .get(entity_id)
                .cloned()
                .ok_or_else(|| SourceError::NotFound(entity_id.to_string()))
        })
    }

    fn get_history<'a>(
        &'a self,
        entity_id: &'a str,
        since: Timestamp,
    ) -> SourceFuture<'a, Vec<Reading>> {
        Box::pin(async move {
            self.pause().await;

            let state = self.state();
            if let Some(error) = state.failures.get(entity_id) {
                return Err(error.clone());
            }
            Ok(state
                .history
                .get(entity_id)
                .map(|readings| {
                    readings
                        .iter()
                        .filter(|r| r.captured_at >= since)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn last_actuation<'a>(&'a self, entity_id: &'a str) -> SourceFuture<'a, Option<Timestamp>> {
        Box::pin(async move {
            let state = self.state();
            if let Some(error) = state.failures.get(entity_id) {
                return Err(error.clone());
            }
            Ok(state.actuations.get(entity_id).copied())
        })
    }
}

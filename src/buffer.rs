//! Per-entity rolling buffer of readings
//!
//! The buffer keeps the readings the pipeline has seen for each entity so that
//! detection keeps running on the last known data while the reading source is
//! unavailable. Readings older than `max_age` are pruned, and each entity keeps
//! at most `max_size` readings. Entities that have never delivered a reading
//! remember their first failed poll instead, so staleness can be measured for
//! a sensor that was offline from the start.

use crate::readings::{Reading, ReadingWindow, Timestamp};
use chrono::Duration;
use std::collections::{HashMap, VecDeque};

pub struct ReadingBuffer {
    /// Readings per entity, ordered by capture time
    entities: HashMap<String, VecDeque<Reading>>,
    /// First failed poll of entities with no buffered readings
    silent_since: HashMap<String, Timestamp>,
    /// Maximum age for readings before expiration
    max_age: Duration,
    /// Maximum number of readings per entity
    max_size: usize,
}

impl ReadingBuffer {
    /// Create a new buffer with the specified limits
    ///
    /// # Examples
    ///
    /// ```
    /// use soilwatch::buffer::ReadingBuffer;
    /// use chrono::Duration;
    ///
    /// let buffer = ReadingBuffer::new(Duration::hours(24), 512);
    /// assert_eq!(buffer.len("tomato"), 0);
    /// ```
    pub fn new(max_age: Duration, max_size: usize) -> Self {
        Self {
            entities: HashMap::new(),
            silent_since: HashMap::new(),
            max_age,
            max_size,
        }
    }

    /// Add a reading, keeping capture order and ignoring exact duplicates
    ///
    /// Returns `true` if the reading was new.
    pub fn add(&mut self, reading: Reading) -> bool {
        self.silent_since.remove(&reading.entity_id);
        let max_size = self.max_size;
        let buffer = self.entities.entry(reading.entity_id.clone()).or_default();

        if buffer.iter().any(|r| r.captured_at == reading.captured_at) {
            return false;
        }

        let position = buffer
            .iter()
            .rposition(|r| r.captured_at < reading.captured_at)
            .map(|i| i + 1)
            .unwrap_or(0);
        buffer.insert(position, reading);

        while buffer.len() > max_size {
            buffer.pop_front();
        }
        true
    }

    /// Add several readings, returning how many were new
    pub fn extend(&mut self, readings: impl IntoIterator<Item = Reading>) -> usize {
        readings.into_iter().filter(|r| self.add(r.clone())).count()
    }

    /// Most recent buffered reading for an entity
    pub fn latest(&self, entity_id: &str) -> Option<&Reading> {
        self.entities.get(entity_id).and_then(|b| b.back())
    }

    /// Record a failed poll for an entity
    ///
    /// Only the first failure is kept, and only while nothing is buffered for
    /// the entity.
    pub fn mark_silent(&mut self, entity_id: &str, at: Timestamp) {
        if self.len(entity_id) == 0 {
            self.silent_since.entry(entity_id.to_string()).or_insert(at);
        }
    }

    /// First failed poll of an entity that has never delivered a reading
    pub fn silent_since(&self, entity_id: &str) -> Option<Timestamp> {
        self.silent_since.get(entity_id).copied()
    }

    pub fn len(&self, entity_id: &str) -> usize {
        self.entities.get(entity_id).map(|b| b.len()).unwrap_or(0)
    }

    /// Window of readings captured within `max_age` of `now`
    ///
    /// When nothing recent is buffered the last known reading is returned on its
    /// own, so a long outage still shows up as stale data instead of no data.
    pub fn window(&self, entity_id: &str, now: Timestamp) -> ReadingWindow {
        let Some(buffer) = self.entities.get(entity_id) else {
            return ReadingWindow::default();
        };

        let cutoff = now - self.max_age;
        let mut readings: Vec<Reading> = buffer
            .iter()
            .filter(|r| r.captured_at >= cutoff && r.captured_at <= now)
            .cloned()
            .collect();
        if readings.is_empty() {
            readings.extend(buffer.iter().rev().find(|r| r.captured_at <= now).cloned());
        }
        ReadingWindow::new(readings)
    }

    /// Remove readings older than `max_age` relative to `now`
    ///
    /// The most recent reading of each entity is always kept, so staleness
    /// can still be measured after a long outage.
    pub fn prune_old_entries(&mut self, now: Timestamp) {
        let cutoff = now - self.max_age;
        for buffer in self.entities.values_mut() {
            while buffer.len() > 1 {
                match buffer.front() {
                    Some(r) if r.captured_at < cutoff => {
                        buffer.pop_front();
                    }
                    _ => break,
                }
            }
        }
    }
}

impl Default for ReadingBuffer {
    fn default() -> Self {
        // Default: 24 hour window, 512 readings per entity
        Self::new(Duration::hours(24), 512)
    }
}

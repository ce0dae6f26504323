//! Core reading types for the sensor monitor
//!
//! This module defines the sensor readings consumed by the detectors and the
//! ordered window type that both the anomaly detector and trend analyzer work on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// A single sensor value captured for a monitored entity
///
/// Values are unit-specific: soil moisture and tank level are both percentages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    /// Identifier of the monitored entity (plant or tank)
    pub entity_id: String,
    /// Measured value
    pub value: f64,
    /// When the sensor captured the value
    pub captured_at: Timestamp,
}

impl Reading {
    pub fn new(entity_id: impl Into<String>, value: f64, captured_at: Timestamp) -> Self {
        Self {
            entity_id: entity_id.into(),
            value,
            captured_at,
        }
    }
}

/// Readings for one entity ordered by capture time, oldest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingWindow {
    readings: Vec<Reading>,
}

impl ReadingWindow {
    /// Build a window from readings in any order
    ///
    /// Readings with non-finite values are dropped so downstream statistics
    /// never see NaN or infinity.
    pub fn new(mut readings: Vec<Reading>) -> Self {
        readings.retain(|r| r.value.is_finite());
        readings.sort_by_key(|r| r.captured_at);
        Self { readings }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Most recent reading, if any
    pub fn latest(&self) -> Option<&Reading> {
        self.readings.last()
    }

    /// The last `count` readings (or all of them if fewer are available)
    pub fn tail(&self, count: usize) -> &[Reading] {
        let start = self.readings.len().saturating_sub(count);
        &self.readings[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_window_sorts_by_capture_time() {
        let now = Utc::now();
        let window = ReadingWindow::new(vec![
            Reading::new("basil", 50.0, now),
            Reading::new("basil", 55.0, now - Duration::hours(2)),
            Reading::new("basil", 52.0, now - Duration::hours(1)),
        ]);

        let values: Vec<f64> = window.readings().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![55.0, 52.0, 50.0]);
        assert_eq!(window.latest().map(|r| r.value), Some(50.0));
    }

    #[test]
    fn test_window_drops_non_finite_values() {
        let now = Utc::now();
        let window = ReadingWindow::new(vec![
            Reading::new("basil", f64::NAN, now),
            Reading::new("basil", 40.0, now - Duration::minutes(5)),
            Reading::new("basil", f64::INFINITY, now - Duration::minutes(1)),
        ]);

        assert_eq!(window.len(), 1);
        assert_eq!(window.latest().map(|r| r.value), Some(40.0));
    }

    #[test]
    fn test_tail_handles_short_windows() {
        let now = Utc::now();
        let window = ReadingWindow::new(vec![
            Reading::new("tank", 80.0, now - Duration::minutes(10)),
            Reading::new("tank", 79.0, now),
        ]);

        assert_eq!(window.tail(6).len(), 2);
        assert_eq!(window.tail(1)[0].value, 79.0);
        assert!(ReadingWindow::default().tail(3).is_empty());
    }

    #[test]
    fn test_reading_serialization() {
        let reading = Reading::new("tomato", 61.5, Utc::now());
        let json = serde_json::to_string(&reading).unwrap();
        let deserialized: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(reading, deserialized);
    }
}

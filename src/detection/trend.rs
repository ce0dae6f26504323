//! Least-squares trend analysis over a reading window

use crate::config::TrendConfig;
use crate::readings::ReadingWindow;
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Direction of a fitted trend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Declining,
    Stable,
    Rising,
    /// Not enough data to fit a line
    Unknown,
}

/// Result of fitting a line through a window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendResult {
    /// Fitted slope in value units per day
    pub rate_per_day: f64,
    pub direction: TrendDirection,
    /// 0 when the window is below the minimum sample count, otherwise the fit's R²
    pub confidence: f64,
    pub r_squared: f64,
    pub samples: usize,
    /// Most recent observed value
    pub latest_value: Option<f64>,
}

impl TrendResult {
    fn unknown(samples: usize, latest_value: Option<f64>) -> Self {
        Self {
            rate_per_day: 0.0,
            direction: TrendDirection::Unknown,
            confidence: 0.0,
            r_squared: 0.0,
            samples,
            latest_value,
        }
    }

    /// Whether this trend is reliable enough to drive a finding
    pub fn is_actionable(&self, min_confidence: f64) -> bool {
        self.direction != TrendDirection::Unknown
            && self.confidence > 0.0
            && self.confidence >= min_confidence
    }

    /// Hours until a declining trend reaches `threshold` from the latest value
    ///
    /// Returns `None` unless the trend is declining; `Some(0.0)` when the latest
    /// value is already at or below the threshold.
    pub fn projected_hours_to(&self, threshold: f64) -> Option<f64> {
        if self.direction != TrendDirection::Declining || self.rate_per_day >= 0.0 {
            return None;
        }
        let latest = self.latest_value?;
        if latest <= threshold {
            return Some(0.0);
        }
        Some((latest - threshold) / -self.rate_per_day * 24.0)
    }
}

/// Fits a least-squares line through (days, value) pairs
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    min_samples: usize,
    stable_band_per_day: f64,
}

impl TrendAnalyzer {
    pub fn new(min_samples: usize, stable_band_per_day: f64) -> Self {
        Self {
            min_samples,
            stable_band_per_day,
        }
    }

    pub fn from_config(config: &TrendConfig) -> Self {
        Self::new(config.min_samples, config.stable_band_per_day)
    }

    pub fn analyze(&self, window: &ReadingWindow) -> TrendResult {
        let readings = window.readings();
        let samples = readings.len();
        let latest_value = window.latest().map(|r| r.value);

        let first = match readings.first() {
            Some(first) if samples >= 2 => first.captured_at,
            _ => return TrendResult::unknown(samples, latest_value),
        };

        let points: Vec<(f64, f64)> = readings
            .iter()
            .map(|r| {
                let millis = (r.captured_at - first).num_milliseconds() as f64;
                (millis / 1000.0 / SECONDS_PER_DAY, r.value)
            })
            .collect();

        let n = samples as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

        let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
        if sxx <= f64::EPSILON {
            // All samples share a timestamp
            return TrendResult::unknown(samples, latest_value);
        }
        let sxy: f64 = points
            .iter()
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum();
        let slope = sxy / sxx;

        let ss_tot: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
        let ss_res: f64 = points
            .iter()
            .map(|(x, y)| {
                let fitted = mean_y + slope * (x - mean_x);
                (y - fitted).powi(2)
            })
            .sum();
        let r_squared = if ss_tot <= f64::EPSILON {
            0.0
        } else {
            (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
        };

        let direction = if slope < -self.stable_band_per_day {
            TrendDirection::Declining
        } else if slope > self.stable_band_per_day {
            TrendDirection::Rising
        } else {
            TrendDirection::Stable
        };

        let confidence = if samples < self.min_samples {
            0.0
        } else {
            r_squared
        };

        TrendResult {
            rate_per_day: slope,
            direction,
            confidence,
            r_squared,
            samples,
            latest_value,
        }
    }
}

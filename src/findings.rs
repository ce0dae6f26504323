//! Classified findings and their priority tiers

use crate::readings::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Priority tier of a finding, ordered from least to most urgent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Informational, delivered through digests
    Low,
    /// Important but not urgent
    Medium,
    /// Urgent attention needed
    High,
    /// Immediate action required
    Critical,
}

impl Priority {
    /// All tiers, most urgent first
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }

    /// Emoji prefix used by chat channels
    pub fn emoji(&self) -> &'static str {
        match self {
            Priority::Low => "\u{2705}",
            Priority::Medium => "\u{2139}\u{fe0f}",
            Priority::High => "\u{26a0}\u{fe0f}",
            Priority::Critical => "\u{1f6a8}",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What kind of condition a finding describes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    StuckSensor,
    ErraticReading,
    MissingData,
    ThresholdBreach,
    TrendWarning,
    TankLow,
    Custom,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FindingKind::StuckSensor => "stuck_sensor",
            FindingKind::ErraticReading => "erratic_reading",
            FindingKind::MissingData => "missing_data",
            FindingKind::ThresholdBreach => "threshold_breach",
            FindingKind::TrendWarning => "trend_warning",
            FindingKind::TankLow => "tank_low",
            FindingKind::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// A classified, actionable observation about one entity
///
/// Findings are created by the condition classifier and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub entity_id: String,
    pub kind: FindingKind,
    pub priority: Priority,
    pub message: String,
    /// Supporting numbers (latest value, thresholds, slope, ...)
    pub evidence: BTreeMap<String, f64>,
    pub detected_at: Timestamp,
}

impl Finding {
    pub fn new(
        entity_id: impl Into<String>,
        kind: FindingKind,
        priority: Priority,
        message: impl Into<String>,
        detected_at: Timestamp,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind,
            priority,
            message: message.into(),
            evidence: BTreeMap::new(),
            detected_at,
        }
    }

    /// Create a finding stamped with the current time
    pub fn now(
        entity_id: impl Into<String>,
        kind: FindingKind,
        priority: Priority,
        message: impl Into<String>,
    ) -> Self {
        Self::new(entity_id, kind, priority, message, Utc::now())
    }

    /// Attach a piece of supporting evidence
    pub fn with_evidence(mut self, key: impl Into<String>, value: f64) -> Self {
        self.evidence.insert(key.into(), value);
        self
    }

    /// One-line rendering used by log-style channels
    pub fn headline(&self) -> String {
        format!(
            "[{}] {} ({}): {}",
            self.priority, self.entity_id, self.kind, self.message
        )
    }
}

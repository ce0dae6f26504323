//! Condition classifier: maps detector candidates, trends and static thresholds
//! to prioritized findings

use crate::config::{Config, Entity, EntityKind, TrendConfig};
use crate::detection::{DetectionContext, TrendResult};
use crate::findings::{Finding, FindingKind, Priority};
use crate::readings::{ReadingWindow, Timestamp};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Deterministic priority policy applied to one entity per tick
#[derive(Debug, Clone)]
pub struct ConditionClassifier {
    trend: TrendConfig,
    all_clear_digest: bool,
}

impl ConditionClassifier {
    pub fn new(trend: TrendConfig, all_clear_digest: bool) -> Self {
        Self {
            trend,
            all_clear_digest,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.trend.clone(), config.classifier.all_clear_digest)
    }

    /// Classify one entity's detector output into findings
    ///
    /// At most one finding per kind is returned (the highest priority wins), ordered
    /// most urgent first. Value-based findings are skipped while data is missing,
    /// since the window no longer describes the entity's current state.
    pub fn classify(
        &self,
        entity: &Entity,
        candidates: &BTreeSet<FindingKind>,
        trend: &TrendResult,
        window: &ReadingWindow,
        context: &DetectionContext,
    ) -> Vec<Finding> {
        let now = context.now;
        let mut findings = Vec::new();
        let latest = window.latest();

        for kind in candidates {
            findings.extend(self.classify_candidate(entity, *kind, window, context));
        }

        if !candidates.contains(&FindingKind::MissingData) {
            if let Some(latest) = latest {
                findings.extend(self.classify_value(entity, latest.value, trend, now));
            }
        }

        if findings.is_empty() && self.all_clear_digest && latest.is_some() {
            findings.push(
                Finding::new(
                    &entity.id,
                    FindingKind::Custom,
                    Priority::Low,
                    "All readings within normal range",
                    now,
                )
                .with_evidence("samples", window.len() as f64),
            );
        }

        keep_highest_per_kind(findings)
    }

    fn classify_candidate(
        &self,
        entity: &Entity,
        kind: FindingKind,
        window: &ReadingWindow,
        context: &DetectionContext,
    ) -> Option<Finding> {
        let now = context.now;
        let latest = window.latest();
        let finding = match kind {
            FindingKind::MissingData => {
                let priority = if entity.critical {
                    Priority::Critical
                } else {
                    Priority::High
                };
                let minutes = context
                    .last_seen(window)
                    .map(|seen| (now - seen).num_seconds() as f64 / 60.0)
                    .unwrap_or(0.0);
                Finding::new(
                    &entity.id,
                    kind,
                    priority,
                    format!("No sensor data for {:.0} minutes", minutes),
                    now,
                )
                .with_evidence("minutes_since_last_reading", minutes)
            }
            FindingKind::StuckSensor => {
                let priority = if entity.critical {
                    Priority::Critical
                } else {
                    Priority::Medium
                };
                let value = latest.map(|r| r.value).unwrap_or(0.0);
                Finding::new(
                    &entity.id,
                    kind,
                    priority,
                    format!("Sensor appears stuck at {:.1}%", value),
                    now,
                )
                .with_evidence("value", value)
            }
            FindingKind::ErraticReading => {
                let value = latest.map(|r| r.value).unwrap_or(0.0);
                Finding::new(
                    &entity.id,
                    kind,
                    Priority::Medium,
                    "Sensor readings are fluctuating erratically",
                    now,
                )
                .with_evidence("value", value)
            }
            FindingKind::ThresholdBreach
            | FindingKind::TrendWarning
            | FindingKind::TankLow
            | FindingKind::Custom => {
                debug!("Ignoring non-detector candidate {} for {}", kind, entity.id);
                return None;
            }
        };
        Some(finding)
    }

    fn classify_value(
        &self,
        entity: &Entity,
        value: f64,
        trend: &TrendResult,
        now: Timestamp,
    ) -> Option<Finding> {
        let thresholds = entity.thresholds;
        let (breach_kind, label) = match entity.kind {
            EntityKind::SoilMoisture => (FindingKind::ThresholdBreach, "Moisture"),
            EntityKind::TankLevel => (FindingKind::TankLow, "Tank level"),
        };

        if value < thresholds.critical {
            return Some(
                Finding::new(
                    &entity.id,
                    breach_kind,
                    Priority::Critical,
                    format!(
                        "{} critically low at {:.1}% (critical below {:.0}%)",
                        label, value, thresholds.critical
                    ),
                    now,
                )
                .with_evidence("value", value)
                .with_evidence("critical_threshold", thresholds.critical),
            );
        }

        if value < thresholds.low {
            return Some(
                Finding::new(
                    &entity.id,
                    breach_kind,
                    Priority::High,
                    format!(
                        "{} low at {:.1}% (low below {:.0}%)",
                        label, value, thresholds.low
                    ),
                    now,
                )
                .with_evidence("value", value)
                .with_evidence("low_threshold", thresholds.low),
            );
        }

        if !trend.is_actionable(self.trend.min_confidence) {
            return None;
        }
        let hours = trend.projected_hours_to(thresholds.low)?;
        if hours > self.trend.forecast_horizon_hours {
            return None;
        }

        Some(
            Finding::new(
                &entity.id,
                FindingKind::TrendWarning,
                Priority::High,
                format!(
                    "{} declining {:.1}%/day, projected to drop below {:.0}% in {:.1} hours",
                    label, -trend.rate_per_day, thresholds.low, hours
                ),
                now,
            )
            .with_evidence("value", value)
            .with_evidence("rate_per_day", trend.rate_per_day)
            .with_evidence("hours_to_low", hours)
            .with_evidence("confidence", trend.confidence),
        )
    }
}

/// Collapse findings to one per kind, keeping the most urgent, and order them
/// most urgent first
pub fn keep_highest_per_kind(findings: Vec<Finding>) -> Vec<Finding> {
    let mut by_kind: BTreeMap<FindingKind, Finding> = BTreeMap::new();
    for finding in findings {
        match by_kind.get(&finding.kind) {
            Some(existing) if existing.priority >= finding.priority => {}
            _ => {
                by_kind.insert(finding.kind, finding);
            }
        }
    }

    let mut result: Vec<Finding> = by_kind.into_values().collect();
    result.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.kind.cmp(&b.kind)));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::detection::{TrendAnalyzer, TrendDirection};
    use crate::readings::Reading;
    use chrono::{Duration, Utc};

    fn plant(low: f64) -> Entity {
        Entity {
            id: "tomato".to_string(),
            kind: EntityKind::SoilMoisture,
            critical: false,
            thresholds: Thresholds {
                critical: 20.0,
                low,
            },
        }
    }

    fn tank() -> Entity {
        Entity {
            id: "water_tank".to_string(),
            kind: EntityKind::TankLevel,
            critical: true,
            thresholds: Thresholds {
                critical: 10.0,
                low: 30.0,
            },
        }
    }

    fn hourly(values: &[f64], end: Timestamp) -> ReadingWindow {
        let count = values.len() as i64;
        ReadingWindow::new(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    Reading::new("tomato", *v, end - Duration::hours(count - 1 - i as i64))
                })
                .collect(),
        )
    }

    fn classify(
        entity: &Entity,
        candidates: &[FindingKind],
        window: &ReadingWindow,
        now: Timestamp,
    ) -> Vec<Finding> {
        let trend = TrendAnalyzer::from_config(&TrendConfig::default()).analyze(window);
        ConditionClassifier::from_config(&Config::default()).classify(
            entity,
            &candidates.iter().copied().collect(),
            &trend,
            window,
            &DetectionContext::at(now),
        )
    }

    #[test]
    fn test_critical_moisture() {
        let now = Utc::now();
        let findings = classify(&plant(30.0), &[], &hourly(&[15.0], now), now);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::ThresholdBreach);
        assert_eq!(findings[0].priority, Priority::Critical);
        assert_eq!(findings[0].evidence.get("value"), Some(&15.0));
    }

    #[test]
    fn test_low_moisture_is_high() {
        let now = Utc::now();
        let findings = classify(&plant(30.0), &[], &hourly(&[25.0], now), now);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].priority, Priority::High);
    }

    #[test]
    fn test_tank_low_kind() {
        let now = Utc::now();
        let findings = classify(&tank(), &[], &hourly(&[8.0], now), now);
        assert_eq!(findings[0].kind, FindingKind::TankLow);
        assert_eq!(findings[0].priority, Priority::Critical);
    }

    #[test]
    fn test_declining_trend_within_horizon() {
        let now = Utc::now();
        let window = hourly(&[65.0, 63.0, 61.0, 59.0, 57.0], now);
        let findings = classify(&plant(45.0), &[], &window, now);

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::TrendWarning);
        assert_eq!(findings[0].priority, Priority::High);
        let hours = findings[0].evidence["hours_to_low"];
        assert!((hours - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_slow_decline_outside_horizon() {
        let now = Utc::now();
        // -2/day from 80% needs days to reach 45%
        let window = hourly(&[80.4, 80.3, 80.2, 80.1, 80.0, 79.9], now);
        assert!(classify(&plant(45.0), &[], &window, now).is_empty());
    }

    #[test]
    fn test_unknown_trend_never_warns() {
        let now = Utc::now();
        let window = hourly(&[46.0], now);
        let trend = TrendAnalyzer::from_config(&TrendConfig::default()).analyze(&window);
        assert_eq!(trend.direction, TrendDirection::Unknown);

        let findings = classify(&plant(45.0), &[], &window, now);
        assert!(findings
            .iter()
            .all(|f| f.kind != FindingKind::TrendWarning));
    }

    #[test]
    fn test_stuck_sensor_above_low_emits_single_finding() {
        let now = Utc::now();
        let window = hourly(&[40.0; 6], now);
        let findings = classify(&plant(30.0), &[FindingKind::StuckSensor], &window, now);

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::StuckSensor);
        assert_eq!(findings[0].priority, Priority::Medium);
    }

    #[test]
    fn test_missing_data_on_critical_entity() {
        let now = Utc::now();
        let window = hourly(&[50.0], now - Duration::minutes(20));
        let findings = classify(&tank(), &[FindingKind::MissingData], &window, now);

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::MissingData);
        assert_eq!(findings[0].priority, Priority::Critical);
        assert_eq!(findings[0].evidence["minutes_since_last_reading"], 20.0);
    }

    #[test]
    fn test_missing_data_skips_stale_value_findings() {
        let now = Utc::now();
        let window = hourly(&[12.0], now - Duration::hours(2));
        let findings = classify(&plant(30.0), &[FindingKind::MissingData], &window, now);

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].priority, Priority::High);
    }

    #[test]
    fn test_distinct_kinds_are_independent_and_ordered() {
        let now = Utc::now();
        let window = hourly(&[20.0, 70.0, 25.0, 80.0, 15.0, 18.0], now);
        let findings = classify(&plant(30.0), &[FindingKind::ErraticReading], &window, now);

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].kind, FindingKind::ThresholdBreach);
        assert_eq!(findings[0].priority, Priority::Critical);
        assert_eq!(findings[1].kind, FindingKind::ErraticReading);
    }

    #[test]
    fn test_empty_window_yields_nothing() {
        let now = Utc::now();
        assert!(classify(&plant(30.0), &[], &ReadingWindow::default(), now).is_empty());
    }

    #[test]
    fn test_all_clear_digest() {
        let now = Utc::now();
        let mut config = Config::default();
        config.classifier.all_clear_digest = true;
        let window = hourly(&[60.0, 60.5, 59.8], now);
        let trend = TrendAnalyzer::from_config(&config.trend).analyze(&window);

        let findings = ConditionClassifier::from_config(&config).classify(
            &plant(30.0),
            &BTreeSet::new(),
            &trend,
            &window,
            &DetectionContext::at(now),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].priority, Priority::Low);
        assert_eq!(findings[0].kind, FindingKind::Custom);
    }

    #[test]
    fn test_missing_data_for_entity_never_heard_from() {
        let now = Utc::now();
        let context = DetectionContext::at(now).with_silence(Some(now - Duration::minutes(15)));
        let window = ReadingWindow::default();
        let trend = TrendAnalyzer::from_config(&TrendConfig::default()).analyze(&window);
        let candidates: BTreeSet<FindingKind> = [FindingKind::MissingData].into_iter().collect();

        let findings = ConditionClassifier::from_config(&Config::default())
            .classify(&tank(), &candidates, &trend, &window, &context);

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].priority, Priority::Critical);
        assert_eq!(findings[0].evidence["minutes_since_last_reading"], 15.0);
    }

    #[test]
    fn test_non_detector_candidates_are_ignored() {
        let now = Utc::now();
        let findings = classify(
            &plant(30.0),
            &[FindingKind::Custom, FindingKind::TrendWarning],
            &hourly(&[55.0], now),
            now,
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn test_keep_highest_per_kind() {
        let findings = vec![
            Finding::now("basil", FindingKind::ThresholdBreach, Priority::High, "low"),
            Finding::now("basil", FindingKind::ThresholdBreach, Priority::Critical, "critical"),
            Finding::now("basil", FindingKind::ErraticReading, Priority::Medium, "erratic"),
        ];
        let kept = keep_highest_per_kind(findings);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].message, "critical");
        assert_eq!(kept[1].kind, FindingKind::ErraticReading);
    }
}

//! Built-in anomaly rules and the detector that runs them
//!
//! Each rule inspects one entity's reading window independently. Rules may fire
//! together; the detector collects every candidate kind that fired.

use crate::config::Config;
use crate::findings::FindingKind;
use crate::readings::{ReadingWindow, Timestamp};
use chrono::Duration;
use std::collections::BTreeSet;

/// Inputs a rule needs besides the window itself
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext {
    /// Evaluation time
    pub now: Timestamp,
    /// Whether an actuation (irrigation) recently explains large swings
    pub recent_actuation: bool,
    /// First failed poll of an entity that has never delivered a reading
    pub silent_since: Option<Timestamp>,
}

impl DetectionContext {
    /// Context at `now` with no actuation and no recorded silence
    pub fn at(now: Timestamp) -> Self {
        Self {
            now,
            recent_actuation: false,
            silent_since: None,
        }
    }

    pub fn with_actuation(mut self, recent_actuation: bool) -> Self {
        self.recent_actuation = recent_actuation;
        self
    }

    pub fn with_silence(mut self, silent_since: Option<Timestamp>) -> Self {
        self.silent_since = silent_since;
        self
    }

    /// Time the entity was last heard from
    ///
    /// The latest reading when there is one, otherwise the first failed poll.
    pub fn last_seen(&self, window: &ReadingWindow) -> Option<Timestamp> {
        window
            .latest()
            .map(|r| r.captured_at)
            .or(self.silent_since)
    }
}

/// Trait for rules that flag a malfunctioning or silent sensor
pub trait AnomalyRule: Send + Sync {
    /// Evaluate whether this rule fires for the given window
    fn evaluate(&self, window: &ReadingWindow, context: &DetectionContext) -> bool;

    /// Finding kind emitted when the rule fires
    fn kind(&self) -> FindingKind;

    /// Human-readable rule name for logging
    fn name(&self) -> &str;
}

/// Fires when the entity has not been heard from for the staleness threshold
///
/// With an empty window, staleness is measured from the first failed poll. An
/// entity with neither readings nor failed polls never fires.
pub struct MissingDataRule {
    pub staleness: Duration,
}

impl MissingDataRule {
    pub fn new(staleness: Duration) -> Self {
        Self { staleness }
    }
}

impl AnomalyRule for MissingDataRule {
    fn evaluate(&self, window: &ReadingWindow, context: &DetectionContext) -> bool {
        context
            .last_seen(window)
            .map(|seen| context.now - seen >= self.staleness)
            .unwrap_or(false)
    }

    fn kind(&self) -> FindingKind {
        FindingKind::MissingData
    }

    fn name(&self) -> &str {
        "MissingDataRule"
    }
}

/// Fires when the last K readings are identical within epsilon
///
/// Real sensors carry thermal and electrical noise, so a perfectly flat run of
/// K samples points at a frozen sensor rather than a stable soil.
pub struct StuckSensorRule {
    pub sample_count: usize,
    pub epsilon: f64,
}

impl StuckSensorRule {
    pub fn new(sample_count: usize, epsilon: f64) -> Self {
        Self {
            sample_count,
            epsilon,
        }
    }
}

impl AnomalyRule for StuckSensorRule {
    fn evaluate(&self, window: &ReadingWindow, _context: &DetectionContext) -> bool {
        let tail = window.tail(self.sample_count);
        if self.sample_count < 2 || tail.len() < self.sample_count {
            return false;
        }

        let (min, max) = tail.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
            (lo.min(r.value), hi.max(r.value))
        });
        max - min <= self.epsilon
    }

    fn kind(&self) -> FindingKind {
        FindingKind::StuckSensor
    }

    fn name(&self) -> &str {
        "StuckSensorRule"
    }
}

/// Fires when the sample standard deviation of the last K readings is too high
///
/// Suppressed while a recent actuation explains the swing.
pub struct ErraticReadingRule {
    pub sample_count: usize,
    pub stddev_threshold: f64,
}

impl ErraticReadingRule {
    pub fn new(sample_count: usize, stddev_threshold: f64) -> Self {
        Self {
            sample_count,
            stddev_threshold,
        }
    }
}

impl AnomalyRule for ErraticReadingRule {
    fn evaluate(&self, window: &ReadingWindow, context: &DetectionContext) -> bool {
        if context.recent_actuation {
            return false;
        }

        let tail = window.tail(self.sample_count);
        if self.sample_count < 2 || tail.len() < self.sample_count {
            return false;
        }

        let values: Vec<f64> = tail.iter().map(|r| r.value).collect();
        sample_std_dev(&values)
            .map(|sd| sd > self.stddev_threshold)
            .unwrap_or(false)
    }

    fn kind(&self) -> FindingKind {
        FindingKind::ErraticReading
    }

    fn name(&self) -> &str {
        "ErraticReadingRule"
    }
}

/// Sample (n - 1) standard deviation, `None` for fewer than two values
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

/// Runs every registered anomaly rule against a window
pub struct AnomalyDetector {
    rules: Vec<Box<dyn AnomalyRule>>,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl AnomalyDetector {
    /// Create a detector with no rules
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Create a detector with the built-in missing, stuck and erratic rules
    pub fn from_config(config: &Config) -> Self {
        let mut detector = Self::new();
        detector.add_rule(Box::new(MissingDataRule::new(config.staleness_threshold())));
        detector.add_rule(Box::new(StuckSensorRule::new(
            config.anomaly.stuck_sample_count,
            config.anomaly.stuck_epsilon,
        )));
        detector.add_rule(Box::new(ErraticReadingRule::new(
            config.anomaly.stuck_sample_count,
            config.anomaly.erratic_stddev_threshold,
        )));
        detector
    }

    pub fn add_rule(&mut self, rule: Box<dyn AnomalyRule>) {
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Collect the finding kinds of every rule that fires
    pub fn detect(
        &self,
        window: &ReadingWindow,
        context: &DetectionContext,
    ) -> BTreeSet<FindingKind> {
        self.rules
            .iter()
            .filter(|rule| rule.evaluate(window, context))
            .map(|rule| {
                log::debug!("Anomaly rule fired: {}", rule.name());
                rule.kind()
            })
            .collect()
    }
}


// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::readings::Reading;
    use chrono::Utc;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// Arbitrary noisy prefix followed by a run of identical values
    #[derive(Debug, Clone)]
    struct StuckTail {
        prefix: Vec<f64>,
        stuck_value: f64,
        run: usize,
    }

    impl Arbitrary for StuckTail {
        fn arbitrary(g: &mut Gen) -> Self {
            let prefix_len = usize::arbitrary(g) % 20;
            let prefix = (0..prefix_len)
                .map(|_| (u16::arbitrary(g) % 1001) as f64 / 10.0)
                .collect();
            Self {
                prefix,
                stuck_value: (u16::arbitrary(g) % 1001) as f64 / 10.0,
                run: 6 + usize::arbitrary(g) % 10,
            }
        }
    }

    #[quickcheck]
    fn prop_identical_tail_is_stuck(input: StuckTail) -> bool {
        let now = Utc::now();
        let mut values = input.prefix.clone();
        values.extend(std::iter::repeat(input.stuck_value).take(input.run));

        let count = values.len() as i64;
        let window = ReadingWindow::new(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    Reading::new("tomato", *v, now - Duration::minutes((count - i as i64) * 5))
                })
                .collect(),
        );

        AnomalyDetector::from_config(&Config::default())
            .detect(&window, &DetectionContext::at(now))
            .contains(&FindingKind::StuckSensor)
    }
}

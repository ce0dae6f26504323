use crate::config::CooldownConfig;
use crate::findings::{Finding, FindingKind, Priority};
use crate::readings::Timestamp;
use chrono::Utc;
use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Dispatch history for one (entity, kind) pair
#[derive(Debug, Clone, PartialEq)]
pub struct CooldownEntry {
    pub entity_id: String,
    pub kind: FindingKind,
    /// Priority of the last dispatched finding
    pub priority: Priority,
    pub last_dispatched_at: Timestamp,
    /// Findings suppressed since the last dispatch
    pub suppressed_count: u64,
}

/// Suppresses repeated findings for the same entity and kind
///
/// Each (entity, kind) pair has its own cooldown window based on priority.
/// Critical findings always pass, and an escalation to a higher priority than
/// the last dispatched one passes immediately. The whole map sits behind one
/// lock, so checking and updating an entry is atomic.
#[derive(Debug)]
pub struct CooldownTracker {
    windows: CooldownConfig,
    entries: Mutex<HashMap<(String, FindingKind), Tracked>>,
}

#[derive(Debug)]
struct Tracked {
    entry: CooldownEntry,
    /// Part of `suppressed_count` already handed to a digest
    reported: u64,
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(CooldownConfig::default())
    }
}

impl CooldownTracker {
    pub fn new(windows: CooldownConfig) -> Self {
        Self {
            windows,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<(String, FindingKind), Tracked>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a finding may be dispatched now
    pub fn admit(&self, finding: &Finding) -> bool {
        self.admit_at(finding, Utc::now())
    }

    /// Decide whether a finding may be dispatched at a specific time
    ///
    /// Admission records the dispatch; suppression increments the entry's
    /// suppressed count.
    pub fn admit_at(&self, finding: &Finding, now: Timestamp) -> bool {
        let key = (finding.entity_id.clone(), finding.kind);
        let mut entries = self.entries();

        let admitted = match entries.get(&key).map(|t| &t.entry) {
            None => true,
            Some(_) if finding.priority == Priority::Critical => true,
            Some(entry) if finding.priority > entry.priority => true,
            Some(entry) => match self.windows.window(finding.priority) {
                Some(window) => now - entry.last_dispatched_at >= window,
                None => true,
            },
        };

        if admitted {
            entries.insert(
                key,
                Tracked {
                    entry: CooldownEntry {
                        entity_id: finding.entity_id.clone(),
                        kind: finding.kind,
                        priority: finding.priority,
                        last_dispatched_at: now,
                        suppressed_count: 0,
                    },
                    reported: 0,
                },
            );
        } else if let Some(tracked) = entries.get_mut(&key) {
            tracked.entry.suppressed_count += 1;
            debug!(
                "Suppressed {} for {} ({} since last dispatch)",
                finding.kind, finding.entity_id, tracked.entry.suppressed_count
            );
        }

        admitted
    }

    /// Entry for an (entity, kind) pair, if one has been dispatched
    pub fn entry(&self, entity_id: &str, kind: FindingKind) -> Option<CooldownEntry> {
        self.entries()
            .get(&(entity_id.to_string(), kind))
            .map(|t| t.entry.clone())
    }

    /// Entries with suppressed findings, ordered by entity then kind
    pub fn suppressed_summary(&self) -> Vec<CooldownEntry> {
        let mut summary: Vec<CooldownEntry> = self
            .entries()
            .values()
            .filter(|t| t.entry.suppressed_count > 0)
            .map(|t| t.entry.clone())
            .collect();
        sort_entries(&mut summary);
        summary
    }

    /// Suppressions not yet handed out by a previous call
    ///
    /// Each returned entry's `suppressed_count` is the number of repeats
    /// suppressed since the last call, and those repeats are marked reported.
    pub fn take_unreported(&self) -> Vec<CooldownEntry> {
        let mut unreported = Vec::new();
        for tracked in self.entries().values_mut() {
            let fresh = tracked.entry.suppressed_count - tracked.reported;
            if fresh > 0 {
                tracked.reported = tracked.entry.suppressed_count;
                unreported.push(CooldownEntry {
                    suppressed_count: fresh,
                    ..tracked.entry.clone()
                });
            }
        }
        sort_entries(&mut unreported);
        unreported
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

fn sort_entries(entries: &mut [CooldownEntry]) {
    entries.sort_by(|a, b| a.entity_id.cmp(&b.entity_id).then(a.kind.cmp(&b.kind)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn finding(kind: FindingKind, priority: Priority) -> Finding {
        Finding::now("basil", kind, priority, "test")
    }

    #[test]
    fn test_first_finding_is_admitted() {
        let tracker = CooldownTracker::default();
        assert!(tracker.admit(&finding(FindingKind::ThresholdBreach, Priority::High)));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_window_boundary() {
        let tracker = CooldownTracker::default();
        let start = Utc::now();
        let high = finding(FindingKind::ThresholdBreach, Priority::High);

        assert!(tracker.admit_at(&high, start));
        assert!(!tracker.admit_at(&high, start + Duration::minutes(119)));
        assert!(tracker.admit_at(&high, start + Duration::minutes(120)));
    }

    #[test]
    fn test_suppressed_count_resets_on_admit() {
        let tracker = CooldownTracker::default();
        let start = Utc::now();
        let medium = finding(FindingKind::ErraticReading, Priority::Medium);

        assert!(tracker.admit_at(&medium, start));
        assert!(!tracker.admit_at(&medium, start + Duration::minutes(5)));
        assert!(!tracker.admit_at(&medium, start + Duration::minutes(10)));

        let entry = tracker.entry("basil", FindingKind::ErraticReading).unwrap();
        assert_eq!(entry.suppressed_count, 2);
        assert_eq!(entry.last_dispatched_at, start);
        assert_eq!(tracker.suppressed_summary().len(), 1);

        assert!(tracker.admit_at(&medium, start + Duration::hours(6)));
        let entry = tracker.entry("basil", FindingKind::ErraticReading).unwrap();
        assert_eq!(entry.suppressed_count, 0);
        assert!(tracker.suppressed_summary().is_empty());
    }

    #[test]
    fn test_critical_bypasses_cooldown() {
        let tracker = CooldownTracker::default();
        let start = Utc::now();
        let critical = finding(FindingKind::TankLow, Priority::Critical);

        for minute in 0..5 {
            assert!(tracker.admit_at(&critical, start + Duration::minutes(minute)));
        }
    }

    #[test]
    fn test_escalation_bypasses_cooldown() {
        let tracker = CooldownTracker::default();
        let start = Utc::now();

        assert!(tracker.admit_at(
            &finding(FindingKind::MissingData, Priority::Medium),
            start
        ));
        assert!(tracker.admit_at(
            &finding(FindingKind::MissingData, Priority::High),
            start + Duration::minutes(1)
        ));
        // Back at High within the High window
        assert!(!tracker.admit_at(
            &finding(FindingKind::MissingData, Priority::High),
            start + Duration::minutes(2)
        ));
    }

    #[test]
    fn test_deescalation_uses_lower_window() {
        let tracker = CooldownTracker::default();
        let start = Utc::now();

        assert!(tracker.admit_at(
            &finding(FindingKind::ThresholdBreach, Priority::High),
            start
        ));
        let medium = finding(FindingKind::ThresholdBreach, Priority::Medium);
        assert!(!tracker.admit_at(&medium, start + Duration::hours(5)));
        assert!(tracker.admit_at(&medium, start + Duration::hours(6)));
    }

    #[test]
    fn test_critical_admitted_right_after_suppressed_medium() {
        let tracker = CooldownTracker::default();
        let start = Utc::now();
        let medium = finding(FindingKind::MissingData, Priority::Medium);

        assert!(tracker.admit_at(&medium, start));
        assert!(!tracker.admit_at(&medium, start + Duration::minutes(1)));
        assert!(tracker.admit_at(
            &finding(FindingKind::MissingData, Priority::Critical),
            start + Duration::minutes(1) + Duration::seconds(1)
        ));

        let entry = tracker.entry("basil", FindingKind::MissingData).unwrap();
        assert_eq!(entry.priority, Priority::Critical);
        assert_eq!(entry.suppressed_count, 0);
    }

    #[test]
    fn test_unreported_counts_are_handed_out_once() {
        let tracker = CooldownTracker::default();
        let start = Utc::now();
        let medium = finding(FindingKind::ErraticReading, Priority::Medium);

        assert!(tracker.admit_at(&medium, start));
        for minute in 1..=3 {
            assert!(!tracker.admit_at(&medium, start + Duration::minutes(minute)));
        }

        let first = tracker.take_unreported();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].suppressed_count, 3);
        assert!(tracker.take_unreported().is_empty());

        assert!(!tracker.admit_at(&medium, start + Duration::minutes(4)));
        let second = tracker.take_unreported();
        assert_eq!(second[0].suppressed_count, 1);

        // The running total is unaffected by reporting
        let entry = tracker.entry("basil", FindingKind::ErraticReading).unwrap();
        assert_eq!(entry.suppressed_count, 4);
    }

    #[test]
    fn test_kinds_and_entities_are_independent() {
        let tracker = CooldownTracker::default();
        let start = Utc::now();

        assert!(tracker.admit_at(
            &finding(FindingKind::ThresholdBreach, Priority::High),
            start
        ));
        assert!(tracker.admit_at(
            &finding(FindingKind::TrendWarning, Priority::High),
            start
        ));
        assert!(tracker.admit_at(
            &Finding::now("tomato", FindingKind::ThresholdBreach, Priority::High, "x"),
            start
        ));
        assert_eq!(tracker.len(), 3);
    }
}

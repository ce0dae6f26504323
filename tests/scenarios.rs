//! End-to-end monitoring scenarios driven through the scheduler with an
//! in-memory reading source and recording channels.

use chrono::{Duration, TimeZone, Utc};
use soilwatch::alerts::{NotificationRouter, RecordingSink};
use soilwatch::config::{EntityConfig, EntityKind, Thresholds};
use soilwatch::sources::MockReadingSource;
use soilwatch::{
    Config, FindingKind, MonitoringScheduler, Priority, Reading, SinkError, SourceError, Timestamp,
};
use std::sync::Arc;

struct Harness {
    source: Arc<MockReadingSource>,
    log: Arc<RecordingSink>,
    telegram: Arc<RecordingSink>,
    email: Arc<RecordingSink>,
    scheduler: MonitoringScheduler,
}

fn start_time() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
}

fn harness_with(config: Config, telegram: RecordingSink) -> Harness {
    let source = Arc::new(MockReadingSource::new());
    let log = Arc::new(RecordingSink::new("log"));
    let telegram = Arc::new(telegram);
    let email = Arc::new(RecordingSink::new("email"));

    let router = NotificationRouter::builder()
        .register(log.clone())
        .register(telegram.clone())
        .register(email.clone())
        .route(Priority::Critical, "log")
        .route(Priority::Critical, "telegram")
        .route(Priority::Critical, "email")
        .route(Priority::High, "log")
        .route(Priority::High, "telegram")
        .route(Priority::Medium, "log")
        .route(Priority::Low, "log")
        .build()
        .unwrap();

    let scheduler = MonitoringScheduler::new(config, source.clone(), router);
    Harness {
        source,
        log,
        telegram,
        email,
        scheduler,
    }
}

fn harness(entities: Vec<EntityConfig>) -> Harness {
    let config = Config {
        entities,
        ..Config::default()
    };
    harness_with(config, RecordingSink::new("telegram"))
}

#[tokio::test]
async fn declining_moisture_raises_trend_warning() {
    let t0 = start_time();
    let h = harness(vec![EntityConfig {
        thresholds: Some(Thresholds {
            critical: 20.0,
            low: 45.0,
        }),
        ..EntityConfig::new("tomato", EntityKind::SoilMoisture)
    }]);

    let values = [65.0, 63.0, 61.0, 59.0, 57.0];
    h.source.set_history(
        "tomato",
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Reading::new("tomato", *v, t0 - Duration::hours(4 - i as i64)))
            .collect(),
    );

    let summary = h.scheduler.run_tick_at(t0).await;
    let dispatched: Vec<_> = summary.dispatched().collect();

    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].kind, FindingKind::TrendWarning);
    assert_eq!(dispatched[0].priority, Priority::High);
    assert!((dispatched[0].evidence["hours_to_low"] - 6.0).abs() < 1e-6);

    assert_eq!(h.log.count(), 1);
    assert_eq!(h.telegram.count(), 1);
    assert_eq!(h.email.count(), 0);
}

#[tokio::test]
async fn silent_tank_escalates_to_critical_missing_data() {
    let t0 = start_time();
    let h = harness(vec![EntityConfig::new("water_tank", EntityKind::TankLevel)]);
    h.source.set_reading("water_tank", 60.0, t0);

    let first = h.scheduler.run_tick_at(t0).await;
    assert!(first.failures.is_empty());
    assert_eq!(first.dispatched().count(), 0);

    h.source
        .set_failure("water_tank", SourceError::Unreachable("sensor offline".to_string()));

    for minutes in [5, 10] {
        let summary = h.scheduler.run_tick_at(t0 + Duration::minutes(minutes)).await;
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].entity_id, "water_tank");
        assert_eq!(summary.dispatched().count(), 0);
    }

    // Three missed polls reach the staleness threshold
    let third = h.scheduler.run_tick_at(t0 + Duration::minutes(15)).await;
    let dispatched: Vec<_> = third.dispatched().collect();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].kind, FindingKind::MissingData);
    assert_eq!(dispatched[0].priority, Priority::Critical);
    assert_eq!(h.email.count(), 1);

    // Critical findings bypass cooldown on every later tick
    let fourth = h.scheduler.run_tick_at(t0 + Duration::minutes(20)).await;
    assert_eq!(fourth.dispatched().count(), 1);
    assert_eq!(h.telegram.count(), 2);
    assert_eq!(h.email.count(), 2);
}

#[tokio::test]
async fn tank_offline_from_first_tick_raises_missing_data() {
    let t0 = start_time();
    let h = harness(vec![EntityConfig::new("water_tank", EntityKind::TankLevel)]);
    h.source
        .set_failure("water_tank", SourceError::Unreachable("sensor offline".to_string()));

    for minutes in [0, 5, 10] {
        let summary = h.scheduler.run_tick_at(t0 + Duration::minutes(minutes)).await;
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.dispatched().count(), 0);
    }

    for minutes in [15, 20, 60, 600] {
        let summary = h.scheduler.run_tick_at(t0 + Duration::minutes(minutes)).await;
        let dispatched: Vec<_> = summary.dispatched().collect();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].kind, FindingKind::MissingData);
        assert_eq!(dispatched[0].priority, Priority::Critical);
    }
    assert_eq!(h.email.count(), 4);

    // The first reading clears the silence
    h.source.clear_failure("water_tank");
    let back = t0 + Duration::minutes(605);
    h.source.set_reading("water_tank", 55.0, back);
    let summary = h.scheduler.run_tick_at(back).await;
    assert!(summary.failures.is_empty());
    assert_eq!(summary.dispatched().count(), 0);
}

#[tokio::test]
async fn flat_readings_report_only_a_stuck_sensor() {
    let t0 = start_time();
    let h = harness(vec![EntityConfig::new("basil", EntityKind::SoilMoisture)]);
    h.source.set_history(
        "basil",
        (0..6)
            .map(|i| Reading::new("basil", 40.0, t0 - Duration::minutes(25 - 5 * i)))
            .collect(),
    );

    let summary = h.scheduler.run_tick_at(t0).await;
    let report = summary.report("basil").unwrap();

    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].kind, FindingKind::StuckSensor);
    assert_eq!(report.findings[0].priority, Priority::Medium);
    assert_eq!(h.log.count(), 1);
    assert_eq!(h.telegram.count(), 0);
}

#[tokio::test]
async fn failing_channel_does_not_block_others() {
    let t0 = start_time();
    let config = Config {
        entities: vec![EntityConfig::new("pepper", EntityKind::SoilMoisture)],
        ..Config::default()
    };
    let h = harness_with(config, RecordingSink::failing("telegram", SinkError::RateLimited));
    h.source.set_reading("pepper", 12.0, t0);

    let summary = h.scheduler.run_tick_at(t0).await;
    let report = summary.report("pepper").unwrap();
    let (finding, delivery) = &report.dispatched[0];

    assert_eq!(finding.priority, Priority::Critical);
    assert_eq!(delivery.delivered(), 2);
    assert_eq!(
        delivery.outcome("telegram").unwrap().result,
        Err(SinkError::RateLimited)
    );
    assert_eq!(h.log.count(), 1);
    assert_eq!(h.email.count(), 1);

    let metrics = h.scheduler.monitor().collect_metrics();
    assert_eq!(metrics.failed_deliveries, 1);
    assert_eq!(metrics.per_sink_success_rate.get("telegram"), Some(&0.0));
}

#[tokio::test]
async fn high_findings_respect_cooldown_window() {
    let t0 = start_time();
    let h = harness(vec![EntityConfig::new("pepper", EntityKind::SoilMoisture)]);

    let mut dispatched_at = Vec::new();
    for minutes in [0, 60, 119, 120] {
        let now = t0 + Duration::minutes(minutes);
        h.source.set_reading("pepper", 25.0, now);
        let summary = h.scheduler.run_tick_at(now).await;
        if summary.dispatched().count() > 0 {
            dispatched_at.push(minutes);
        }
    }

    assert_eq!(dispatched_at, vec![0, 120]);
    let entry = h
        .scheduler
        .pipeline()
        .cooldown()
        .entry("pepper", FindingKind::ThresholdBreach)
        .unwrap();
    assert_eq!(entry.suppressed_count, 0);
    assert_eq!(entry.last_dispatched_at, t0 + Duration::minutes(120));
}

#[tokio::test]
async fn escalation_to_critical_bypasses_cooldown() {
    let t0 = start_time();
    let h = harness(vec![EntityConfig::new("pepper", EntityKind::SoilMoisture)]);

    h.source.set_reading("pepper", 25.0, t0);
    let first = h.scheduler.run_tick_at(t0).await;
    assert_eq!(first.dispatched().next().unwrap().priority, Priority::High);

    let later = t0 + Duration::minutes(10);
    h.source.set_reading("pepper", 15.0, later);
    let second = h.scheduler.run_tick_at(later).await;
    let escalated: Vec<_> = second.dispatched().collect();

    assert_eq!(escalated.len(), 1);
    assert_eq!(escalated[0].priority, Priority::Critical);
    assert_eq!(h.email.count(), 1);
    assert_eq!(h.telegram.count(), 2);
}

#[tokio::test]
async fn one_failing_entity_does_not_affect_the_rest() {
    let t0 = start_time();
    let h = harness(vec![
        EntityConfig::new("tomato", EntityKind::SoilMoisture),
        EntityConfig::new("basil", EntityKind::SoilMoisture),
        EntityConfig::new("water_tank", EntityKind::TankLevel),
    ]);
    h.source.set_reading("tomato", 55.0, t0);
    h.source.set_reading("water_tank", 8.0, t0);
    h.source.set_failure("basil", SourceError::Timeout);

    let summary = h.scheduler.run_tick_at(t0).await;

    assert_eq!(summary.reports.len(), 3);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].entity_id, "basil");

    let tank = summary.report("water_tank").unwrap();
    assert_eq!(tank.dispatched.len(), 1);
    assert_eq!(tank.dispatched[0].0.kind, FindingKind::TankLow);
    assert_eq!(tank.dispatched[0].0.priority, Priority::Critical);
    assert!(summary.report("tomato").unwrap().findings.is_empty());
}

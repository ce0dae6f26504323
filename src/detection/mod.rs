/// Anomaly rules and trend analysis over reading windows
pub mod anomaly;
pub mod trend;

pub use anomaly::{
    AnomalyDetector, AnomalyRule, DetectionContext, ErraticReadingRule, MissingDataRule,
    StuckSensorRule,
};
pub use trend::{TrendAnalyzer, TrendDirection, TrendResult};

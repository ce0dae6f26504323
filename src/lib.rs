/// Error types for the sensor monitor
pub mod error;

/// Sensor readings and reading windows
pub mod readings;

/// Classified findings and priority tiers
pub mod findings;

/// Configuration management
pub mod config;

/// Reading sources (HTTP backend and in-memory mock)
pub mod sources;

/// Per-entity rolling reading buffer
pub mod buffer;

/// Anomaly rules and trend analysis
pub mod detection;

/// Priority policy over detector output
pub mod classifier;

/// Cooldown tracking, routing and notification channels
pub mod alerts;

/// Per-entity processing pipeline
pub mod pipeline;

/// Fixed-interval monitoring scheduler
pub mod scheduler;

/// Pipeline health metrics
pub mod monitoring;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConfigError, SchedulerError, SinkError, SourceError};
pub use findings::{Finding, FindingKind, Priority};
pub use readings::{Reading, ReadingWindow, Timestamp};
pub use scheduler::{MonitoringScheduler, SchedulerHandle, SchedulerState, TickSummary};

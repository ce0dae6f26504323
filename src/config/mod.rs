/// Configuration loading and validation
#[allow(clippy::module_inception)]
pub mod config;

pub use config::{
    AnomalyConfig, ChannelsConfig, ClassifierConfig, Config, CooldownConfig, DigestConfig,
    EmailConfig, Entity, EntityConfig, EntityKind, RoutingConfig, SchedulerConfig, SourceConfig,
    TelegramConfig, ThresholdDefaults, Thresholds, TrendConfig, KNOWN_CHANNELS,
};

use crate::error::ConfigError;
use crate::findings::Priority;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Longest polling interval accepted
const SECONDS_PER_DAY: u64 = 86_400;

/// Longest history lookback accepted (one year)
const MAX_HISTORY_HOURS: u32 = 24 * 366;

/// Longest cooldown or actuation grace window accepted (one year)
const MAX_WINDOW_MINUTES: i64 = 60 * 24 * 366;

const MAX_STALENESS_MULTIPLIER: f64 = 1000.0;

/// Channel names the router knows how to build
pub const KNOWN_CHANNELS: [&str; 4] = ["log", "telegram", "email", "digest"];

/// Top-level monitor configuration
///
/// Built once at startup and shared immutably by every component. Every section
/// has defaults, so a partial TOML file only needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub source: SourceConfig,
    pub anomaly: AnomalyConfig,
    pub trend: TrendConfig,
    pub classifier: ClassifierConfig,
    pub cooldown: CooldownConfig,
    pub thresholds: ThresholdDefaults,
    pub entities: Vec<EntityConfig>,
    pub routing: RoutingConfig,
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between monitoring ticks
    pub interval_seconds: u64,
    /// Upper bound on entities processed concurrently within a tick
    pub max_concurrent_entities: usize,
    /// Timeout for each reading source call
    pub source_timeout_seconds: u64,
    /// Timeout for each channel sink delivery
    pub sink_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            max_concurrent_entities: 4,
            source_timeout_seconds: 5,
            sink_timeout_seconds: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_seconds)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the sensor backend
    pub base_url: String,
    /// Lookback window for history and trend analysis
    pub history_hours: u32,
    /// Maximum buffered readings per entity
    pub buffer_capacity: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.1.100:3000".to_string(),
            history_hours: 24,
            buffer_capacity: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Staleness threshold as a multiple of the polling interval
    pub staleness_multiplier: f64,
    /// Number of trailing samples (K) inspected by the stuck and erratic rules
    pub stuck_sample_count: usize,
    /// Maximum spread for samples to count as identical
    pub stuck_epsilon: f64,
    /// Sample standard deviation above which readings are erratic
    pub erratic_stddev_threshold: f64,
    /// How long after an actuation (irrigation) swings are expected
    pub actuation_grace_minutes: i64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            staleness_multiplier: 3.0,
            stuck_sample_count: 6,
            stuck_epsilon: 0.001,
            erratic_stddev_threshold: 15.0,
            actuation_grace_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrendConfig {
    /// Samples required before a trend carries any confidence
    pub min_samples: usize,
    /// Rates within +/- this value per day are considered stable
    pub stable_band_per_day: f64,
    /// Minimum confidence for a trend to drive a finding
    pub min_confidence: f64,
    /// How far ahead a projected threshold crossing is reported
    pub forecast_horizon_hours: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            stable_band_per_day: 1.0,
            min_confidence: 0.6,
            forecast_horizon_hours: 24.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Emit a Low all-clear finding for entities with nothing to report
    pub all_clear_digest: bool,
}

/// Per-priority cooldown windows. Critical findings have no cooldown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CooldownConfig {
    pub high_minutes: i64,
    pub medium_minutes: i64,
    pub low_minutes: i64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            high_minutes: 120,
            medium_minutes: 360,
            low_minutes: 1440,
        }
    }
}

impl CooldownConfig {
    /// Cooldown window for a priority, `None` when the tier never cools down
    pub fn window(&self, priority: Priority) -> Option<chrono::Duration> {
        match priority {
            Priority::Critical => None,
            Priority::High => Some(chrono::Duration::minutes(self.high_minutes)),
            Priority::Medium => Some(chrono::Duration::minutes(self.medium_minutes)),
            Priority::Low => Some(chrono::Duration::minutes(self.low_minutes)),
        }
    }
}

/// Critical and low watermarks for a percentage reading
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    pub critical: f64,
    pub low: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdDefaults {
    pub moisture: Thresholds,
    pub tank: Thresholds,
}

impl Default for ThresholdDefaults {
    fn default() -> Self {
        Self {
            moisture: Thresholds {
                critical: 20.0,
                low: 30.0,
            },
            tank: Thresholds {
                critical: 10.0,
                low: 30.0,
            },
        }
    }
}

/// What an entity's sensor measures
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    SoilMoisture,
    TankLevel,
}

/// Entity as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityConfig {
    pub id: String,
    #[serde(default)]
    pub kind: EntityKind,
    /// Whether irrigation depends on this entity; defaults to true for tanks
    #[serde(default)]
    pub critical: Option<bool>,
    #[serde(default)]
    pub thresholds: Option<Thresholds>,
}

impl EntityConfig {
    pub fn new(id: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            critical: None,
            thresholds: None,
        }
    }
}

/// A monitored entity with defaults resolved
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    /// Actuator-critical entities escalate sensor faults to Critical
    pub critical: bool,
    pub thresholds: Thresholds,
}

/// Channel names each priority tier is delivered to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    pub critical: Vec<String>,
    pub high: Vec<String>,
    pub medium: Vec<String>,
    pub low: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            critical: names(&["log", "telegram", "email"]),
            high: names(&["log", "telegram"]),
            medium: names(&["log", "digest"]),
            low: names(&["log", "digest"]),
        }
    }
}

impl RoutingConfig {
    pub fn channels_for(&self, priority: Priority) -> &[String] {
        match priority {
            Priority::Critical => &self.critical,
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
    pub email: Option<EmailConfig>,
    pub digest: DigestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

/// SMTP relay used for email delivery
///
/// Mail is submitted with STARTTLS and authenticated with the username and
/// password. The sender defaults to the username.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailConfig {
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from: Option<String>,
    /// Recipient address
    pub to: String,
}

fn default_smtp_port() -> u16 {
    587
}

impl EmailConfig {
    /// Sender address, falling back to the SMTP username
    pub fn sender(&self) -> &str {
        self.from.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DigestConfig {
    /// Hours between digest deliveries
    pub interval_hours: u32,
    /// Channel the digest summary is delivered through
    pub deliver_to: String,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            deliver_to: "log".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut entities: Vec<EntityConfig> = ["tomato", "basil", "lettuce", "pepper"]
            .iter()
            .map(|id| EntityConfig::new(*id, EntityKind::SoilMoisture))
            .collect();
        entities.push(EntityConfig::new("water_tank", EntityKind::TankLevel));

        Self {
            scheduler: SchedulerConfig::default(),
            source: SourceConfig::default(),
            anomaly: AnomalyConfig::default(),
            trend: TrendConfig::default(),
            classifier: ClassifierConfig::default(),
            cooldown: CooldownConfig::default(),
            thresholds: ThresholdDefaults::default(),
            entities,
            routing: RoutingConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, apply environment overrides and validate
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, a TOML error if
    /// it cannot be parsed, and `ConfigError::ValidationError` if values are invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_overrides_from(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without validating it
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides_from(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from an environment-like lookup
    ///
    /// Unparseable numeric values are ignored so a typo in the environment
    /// cannot silently zero the polling interval.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(interval) = lookup("MONITORING_INTERVAL_SECONDS").and_then(|v| v.parse().ok())
        {
            self.scheduler.interval_seconds = interval;
        }
        if let Some(url) = lookup("SENSOR_BASE_URL") {
            self.source.base_url = url;
        }

        if let (Some(bot_token), Some(chat_id)) =
            (lookup("TELEGRAM_BOT_TOKEN"), lookup("TELEGRAM_CHAT_ID"))
        {
            if !bot_token.is_empty() && !chat_id.is_empty() {
                let api_base = self
                    .channels
                    .telegram
                    .as_ref()
                    .map(|t| t.api_base.clone())
                    .unwrap_or_else(default_telegram_api);
                self.channels.telegram = Some(TelegramConfig {
                    bot_token,
                    chat_id,
                    api_base,
                });
            }
        }

        let smtp = (
            lookup("SMTP_SERVER"),
            lookup("SMTP_USERNAME"),
            lookup("NOTIFICATION_EMAIL"),
        );
        if let (Some(smtp_server), Some(username), Some(to)) = smtp {
            if !smtp_server.is_empty() && !username.is_empty() && !to.is_empty() {
                let smtp_port = lookup("SMTP_PORT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_smtp_port);
                self.channels.email = Some(EmailConfig {
                    smtp_server,
                    smtp_port,
                    username,
                    password: lookup("SMTP_PASSWORD").unwrap_or_default(),
                    from: lookup("EMAIL_FROM").filter(|v| !v.is_empty()),
                    to,
                });
            }
        }
    }

    /// Resolve configured entities, filling in kind-specific defaults
    pub fn entities(&self) -> Vec<Entity> {
        self.entities
            .iter()
            .map(|e| {
                let default_thresholds = match e.kind {
                    EntityKind::SoilMoisture => self.thresholds.moisture,
                    EntityKind::TankLevel => self.thresholds.tank,
                };
                Entity {
                    id: e.id.clone(),
                    kind: e.kind,
                    critical: e.critical.unwrap_or(e.kind == EntityKind::TankLevel),
                    thresholds: e.thresholds.unwrap_or(default_thresholds),
                }
            })
            .collect()
    }

    /// Age after which an entity's latest reading counts as missing
    pub fn staleness_threshold(&self) -> chrono::Duration {
        let millis =
            self.scheduler.interval_seconds as f64 * 1000.0 * self.anomaly.staleness_multiplier;
        chrono::Duration::milliseconds(millis.round() as i64)
    }

    /// Lookback window for history queries and trend analysis
    pub fn history_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.source.history_hours as i64)
    }

    /// Check the configuration for values that would make monitoring meaningless
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.entities.is_empty() {
            return invalid("entity list is empty".to_string());
        }
        let mut seen = HashSet::new();
        for entity in &self.entities {
            if entity.id.trim().is_empty() {
                return invalid("entity id must not be empty".to_string());
            }
            if !seen.insert(entity.id.as_str()) {
                return invalid(format!("duplicate entity id '{}'", entity.id));
            }
        }
        for entity in self.entities() {
            let t = entity.thresholds;
            if !t.critical.is_finite() || !t.low.is_finite() || t.critical >= t.low {
                return invalid(format!(
                    "entity '{}': critical threshold ({}) must be below low threshold ({})",
                    entity.id, t.critical, t.low
                ));
            }
        }

        if !(1..=SECONDS_PER_DAY).contains(&self.scheduler.interval_seconds) {
            return invalid(format!(
                "scheduler.interval_seconds must be between 1 and {}",
                SECONDS_PER_DAY
            ));
        }
        if self.scheduler.max_concurrent_entities == 0 {
            return invalid("scheduler.max_concurrent_entities must be positive".to_string());
        }
        if self.scheduler.source_timeout_seconds == 0 || self.scheduler.sink_timeout_seconds == 0 {
            return invalid("scheduler timeouts must be positive".to_string());
        }
        if self.source.history_hours == 0 || self.source.history_hours > MAX_HISTORY_HOURS {
            return invalid(format!(
                "source.history_hours must be between 1 and {}",
                MAX_HISTORY_HOURS
            ));
        }
        if self.source.buffer_capacity == 0 {
            return invalid("source.buffer_capacity must be positive".to_string());
        }

        if !(self.anomaly.staleness_multiplier > 0.0)
            || self.anomaly.staleness_multiplier > MAX_STALENESS_MULTIPLIER
        {
            return invalid(format!(
                "anomaly.staleness_multiplier must be positive and at most {}",
                MAX_STALENESS_MULTIPLIER
            ));
        }
        if self.anomaly.stuck_sample_count < 2 {
            return invalid("anomaly.stuck_sample_count must be at least 2".to_string());
        }
        if !(self.anomaly.stuck_epsilon >= 0.0) || !(self.anomaly.erratic_stddev_threshold > 0.0) {
            return invalid(
                "anomaly epsilon and erratic threshold must be non-negative".to_string(),
            );
        }
        if !(0..=MAX_WINDOW_MINUTES).contains(&self.anomaly.actuation_grace_minutes) {
            return invalid(format!(
                "anomaly.actuation_grace_minutes must be between 0 and {}",
                MAX_WINDOW_MINUTES
            ));
        }

        if self.trend.min_samples < 2 {
            return invalid("trend.min_samples must be at least 2".to_string());
        }
        if !(0.0..=1.0).contains(&self.trend.min_confidence) {
            return invalid("trend.min_confidence must be between 0 and 1".to_string());
        }
        if !(self.trend.forecast_horizon_hours > 0.0) || !(self.trend.stable_band_per_day >= 0.0) {
            return invalid(
                "trend horizon must be positive and stable band non-negative".to_string(),
            );
        }

        let windows = [
            ("high", self.cooldown.high_minutes),
            ("medium", self.cooldown.medium_minutes),
            ("low", self.cooldown.low_minutes),
        ];
        for (tier, minutes) in windows {
            if !(0..=MAX_WINDOW_MINUTES).contains(&minutes) {
                return invalid(format!(
                    "cooldown.{}_minutes must be between 0 and {}",
                    tier, MAX_WINDOW_MINUTES
                ));
            }
        }

        for priority in Priority::ALL {
            for name in self.routing.channels_for(priority) {
                if !KNOWN_CHANNELS.contains(&name.as_str()) {
                    return invalid(format!(
                        "routing.{}: unknown channel '{}'",
                        priority.label().to_lowercase(),
                        name
                    ));
                }
            }
        }
        let target = self.channels.digest.deliver_to.as_str();
        if target == "digest" || !KNOWN_CHANNELS.contains(&target) {
            return invalid(format!(
                "channels.digest.deliver_to: invalid channel '{}'",
                target
            ));
        }
        if self.channels.digest.interval_hours == 0 {
            return invalid("channels.digest.interval_hours must be positive".to_string());
        }

        Ok(())
    }
}

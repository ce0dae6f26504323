use crate::alerts::digest::DigestSink;
use crate::alerts::email::EmailSink;
use crate::alerts::sinks::{ChannelSink, LogSink};
use crate::alerts::telegram::TelegramSink;
use crate::config::Config;
use crate::error::{ConfigError, SinkError};
use crate::findings::{Finding, Priority};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Result of delivering a finding to one sink
#[derive(Debug, Clone, PartialEq)]
pub struct SinkOutcome {
    pub sink: String,
    pub result: Result<(), SinkError>,
}

/// Per-sink results of routing one finding
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    pub outcomes: Vec<SinkOutcome>,
}

impl DeliveryReport {
    /// Number of sinks that accepted the finding
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SinkOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn all_delivered(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn outcome(&self, sink: &str) -> Option<&SinkOutcome> {
        self.outcomes.iter().find(|o| o.sink == sink)
    }
}

/// Fans findings out to the sinks configured for their priority
///
/// Every sink in a priority's subset is called concurrently and bounded by the
/// sink timeout. A failing, stalled or panicking sink only affects its own
/// outcome. Deliveries are never retried.
pub struct NotificationRouter {
    sinks: HashMap<String, Arc<dyn ChannelSink>>,
    routes: BTreeMap<Priority, Vec<String>>,
    sink_timeout: Duration,
    digest: Option<Arc<DigestSink>>,
}

/// Builder for [`NotificationRouter`]
///
/// # Examples
///
/// ```
/// use soilwatch::alerts::{LogSink, NotificationRouter};
/// use soilwatch::findings::Priority;
/// use std::sync::Arc;
///
/// let router = NotificationRouter::builder()
///     .register(Arc::new(LogSink::new()))
///     .route(Priority::Critical, "log")
///     .build()
///     .unwrap();
/// assert_eq!(router.channels_for(Priority::Critical), ["log".to_string()]);
/// assert!(router.channels_for(Priority::Low).is_empty());
/// ```
pub struct NotificationRouterBuilder {
    sinks: HashMap<String, Arc<dyn ChannelSink>>,
    routes: BTreeMap<Priority, Vec<String>>,
    sink_timeout: Duration,
    digest: Option<Arc<DigestSink>>,
}

impl Default for NotificationRouterBuilder {
    fn default() -> Self {
        Self {
            sinks: HashMap::new(),
            routes: BTreeMap::new(),
            sink_timeout: Duration::from_secs(10),
            digest: None,
        }
    }
}

impl NotificationRouterBuilder {
    /// Register a sink under its own name, replacing any sink with that name
    pub fn register(mut self, sink: Arc<dyn ChannelSink>) -> Self {
        self.sinks.insert(sink.name().to_string(), sink);
        self
    }

    /// Register the digest sink so the scheduler can flush it
    pub fn digest(mut self, digest: Arc<DigestSink>) -> Self {
        self.sinks
            .insert(digest.name().to_string(), digest.clone() as Arc<dyn ChannelSink>);
        self.digest = Some(digest);
        self
    }

    /// Deliver findings of `priority` to the named sink
    pub fn route(mut self, priority: Priority, sink: impl Into<String>) -> Self {
        let sink = sink.into();
        let names = self.routes.entry(priority).or_default();
        if !names.contains(&sink) {
            names.push(sink);
        }
        self
    }

    pub fn sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    /// Build the router
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if a route names a sink that was
    /// never registered.
    pub fn build(self) -> Result<NotificationRouter, ConfigError> {
        for (priority, names) in &self.routes {
            if let Some(missing) = names.iter().find(|n| !self.sinks.contains_key(*n)) {
                return Err(ConfigError::ValidationError(format!(
                    "{} findings routed to unregistered channel '{}'",
                    priority, missing
                )));
            }
        }

        Ok(NotificationRouter {
            sinks: self.sinks,
            routes: self.routes,
            sink_timeout: self.sink_timeout,
            digest: self.digest,
        })
    }
}

impl NotificationRouter {
    pub fn builder() -> NotificationRouterBuilder {
        NotificationRouterBuilder::default()
    }

    /// Build the configured channels and routing table
    ///
    /// Routes to channels without credentials (telegram or email) are dropped
    /// with a warning. A digest whose target channel is unavailable falls back
    /// to the log channel.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if an HTTP channel cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let sink_timeout = config.scheduler.sink_timeout();
        let mut available: HashMap<String, Arc<dyn ChannelSink>> = HashMap::new();
        available.insert("log".to_string(), Arc::new(LogSink::new()));

        if let Some(ref telegram) = config.channels.telegram {
            let sink = TelegramSink::new(telegram.clone(), sink_timeout).map_err(|e| {
                ConfigError::ValidationError(format!("telegram channel: {}", e))
            })?;
            available.insert("telegram".to_string(), Arc::new(sink));
        }
        if let Some(ref email) = config.channels.email {
            let sink = EmailSink::new(email.clone(), sink_timeout)
                .map_err(|e| ConfigError::ValidationError(format!("email channel: {}", e)))?;
            available.insert("email".to_string(), Arc::new(sink));
        }

        let mut builder = NotificationRouter::builder().sink_timeout(sink_timeout);

        let uses_digest = Priority::ALL
            .iter()
            .any(|p| config.routing.channels_for(*p).iter().any(|n| n == "digest"));
        if uses_digest {
            let digest_config = &config.channels.digest;
            let target = match available.get(&digest_config.deliver_to) {
                Some(sink) => sink.clone(),
                None => {
                    warn!(
                        "Digest target '{}' is not configured, delivering digests to the log",
                        digest_config.deliver_to
                    );
                    available["log"].clone()
                }
            };
            let interval = chrono::Duration::hours(digest_config.interval_hours as i64);
            builder = builder.digest(Arc::new(DigestSink::new(target, interval)));
        }

        for sink in available.values() {
            builder = builder.register(sink.clone());
        }

        for priority in Priority::ALL {
            for name in config.routing.channels_for(priority) {
                if name == "digest" || available.contains_key(name) {
                    builder = builder.route(priority, name.clone());
                } else {
                    warn!(
                        "Channel '{}' is not configured, dropping it from {} routing",
                        name, priority
                    );
                }
            }
        }

        builder.build()
    }

    /// Sink names a priority is delivered to, in routing order
    pub fn channels_for(&self, priority: Priority) -> &[String] {
        self.routes
            .get(&priority)
            .map(|names| names.as_slice())
            .unwrap_or(&[])
    }

    pub fn digest(&self) -> Option<&Arc<DigestSink>> {
        self.digest.as_ref()
    }

    /// Deliver a finding to every sink configured for its priority
    pub async fn route(&self, finding: &Finding) -> DeliveryReport {
        let names = self.channels_for(finding.priority);
        if names.is_empty() {
            debug!("No channels configured for {} findings", finding.priority);
            return DeliveryReport::default();
        }

        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            let Some(sink) = self.sinks.get(name).cloned() else {
                continue;
            };
            let finding = finding.clone();
            let timeout = self.sink_timeout;

            let handle = tokio::spawn(async move {
                match tokio::time::timeout(timeout, sink.send(&finding)).await {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::Timeout),
                }
            });
            handles.push((name.clone(), handle));
        }

        let mut report = DeliveryReport::default();
        for (sink, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(SinkError::Unreachable(format!("sink task failed: {}", e))),
            };

            if let Err(ref e) = result {
                warn!(
                    "Delivery of {} via '{}' failed: {}",
                    finding.headline(),
                    sink,
                    e
                );
            }
            report.outcomes.push(SinkOutcome { sink, result });
        }
        report
    }
}

use crate::config::{Config, EntityKind};
use crate::error::SourceError;
use crate::readings::{Reading, Timestamp};
use crate::sources::{ReadingSource, SourceFuture};
use chrono::Utc;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// Reading source backed by the irrigation controller's HTTP API
///
/// Soil sensors are read from `GET {base}/api/sensors/{id}` and their history
/// from `GET {base}/api/sensors/{id}/history?hours=N`. Tank entities are read
/// from the single `GET {base}/api/water-tank` endpoint.
pub struct HttpReadingSource {
    client: Client,
    base_url: String,
    tank_ids: HashSet<String>,
}

/// Response from the soil sensor endpoint
#[derive(Debug, Deserialize)]
struct SensorResponse {
    moisture: f64,
    #[serde(default)]
    timestamp: Option<Timestamp>,
    #[serde(default)]
    last_irrigation: Option<Timestamp>,
}

/// Response from the water tank endpoint
#[derive(Debug, Deserialize)]
struct TankResponse {
    level: f64,
    #[serde(default)]
    timestamp: Option<Timestamp>,
    #[serde(default)]
    last_refill: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<HistoryPoint>,
}

#[derive(Debug, Deserialize)]
struct HistoryPoint {
    #[serde(alias = "moisture", alias = "level")]
    value: f64,
    #[serde(alias = "captured_at")]
    timestamp: Timestamp,
}

impl HttpReadingSource {
    /// Create a source for the given backend
    ///
    /// # Arguments
    /// * `base_url` - Backend URL (e.g., "http://192.168.1.100:3000")
    /// * `timeout` - Per-request timeout applied by the HTTP client
    /// * `tank_ids` - Entities read from the water tank endpoint
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Unreachable` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        tank_ids: impl IntoIterator<Item = String>,
    ) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tank_ids: tank_ids.into_iter().collect(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        let tank_ids = config
            .entities()
            .into_iter()
            .filter(|e| e.kind == EntityKind::TankLevel)
            .map(|e| e.id);
        Self::new(
            config.source.base_url.clone(),
            config.scheduler.source_timeout(),
            tank_ids,
        )
    }

    fn is_tank(&self, entity_id: &str) -> bool {
        self.tank_ids.contains(entity_id)
    }

    fn sensor_url(&self, entity_id: &str) -> String {
        format!("{}/api/sensors/{}", self.base_url, entity_id)
    }

    fn tank_url(&self) -> String {
        format!("{}/api/water-tank", self.base_url)
    }

    /// Hours of history to request so that `since` is covered
    fn hours_since(since: Timestamp, now: Timestamp) -> i64 {
        let minutes = (now - since).num_minutes().max(0);
        ((minutes + 59) / 60).max(1)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        entity_id: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SourceError> {
        let response = request.send().await?;

        match response.status() {
            status if status.is_success() => Ok(response.json::<T>().await?),
            StatusCode::NOT_FOUND => Err(SourceError::NotFound(entity_id.to_string())),
            status => Err(SourceError::Unreachable(format!(
                "sensor backend returned HTTP {}",
                status
            ))),
        }
    }
}

impl ReadingSource for HttpReadingSource {
    fn get_current<'a>(&'a self, entity_id: &'a str) -> SourceFuture<'a, Reading> {
        Box::pin(async move {
            let (value, timestamp) = if self.is_tank(entity_id) {
                let tank: TankResponse = self
                    .get_json(entity_id, self.client.get(self.tank_url()))
                    .await?;
                (tank.level, tank.timestamp)
            } else {
                let sensor: SensorResponse = self
                    .get_json(entity_id, self.client.get(self.sensor_url(entity_id)))
                    .await?;
                (sensor.moisture, sensor.timestamp)
            };

            if !value.is_finite() {
                return Err(SourceError::InvalidResponse(format!(
                    "non-finite value for {}",
                    entity_id
                )));
            }

            debug!("Read {} = {:.1}", entity_id, value);
            Ok(Reading::new(
                entity_id,
                value,
                timestamp.unwrap_or_else(Utc::now),
            ))
        })
    }

    fn get_history<'a>(
        &'a self,
        entity_id: &'a str,
        since: Timestamp,
    ) -> SourceFuture<'a, Vec<Reading>> {
        Box::pin(async move {
            // The tank endpoint has no history
            if self.is_tank(entity_id) {
                return Ok(Vec::new());
            }

            let hours = Self::hours_since(since, Utc::now());
            let url = format!("{}/history", self.sensor_url(entity_id));
            let response: HistoryResponse = self
                .get_json(entity_id, self.client.get(url).query(&[("hours", hours)]))
                .await?;

            let readings: Vec<Reading> = response
                .history
                .into_iter()
                .filter(|p| p.timestamp >= since && p.value.is_finite())
                .map(|p| Reading::new(entity_id, p.value, p.timestamp))
                .collect();

            debug!(
                "Fetched {} history readings for {} ({}h)",
                readings.len(),
                entity_id,
                hours
            );
            Ok(readings)
        })
    }

    fn last_actuation<'a>(&'a self, entity_id: &'a str) -> SourceFuture<'a, Option<Timestamp>> {
        Box::pin(async move {
            if self.is_tank(entity_id) {
                let tank: TankResponse = self
                    .get_json(entity_id, self.client.get(self.tank_url()))
                    .await?;
                Ok(tank.last_refill)
            } else {
                let sensor: SensorResponse = self
                    .get_json(entity_id, self.client.get(self.sensor_url(entity_id)))
                    .await?;
                Ok(sensor.last_irrigation)
            }
        })
    }
}

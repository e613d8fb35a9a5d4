/// Datadog metrics submission
///
/// Each record becomes three gauge series (`co2`, `temperature`,
/// `humidity`) sharing the record's timestamp, posted to the v2 series
/// intake in one request.
use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use tokio::time::Duration;

use crate::error::PublishError;
use crate::models::Record;
use crate::publish::Publisher;

// Datadog v2 intake type for gauges
const GAUGE: u8 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Serialize)]
pub struct SeriesPayload {
    pub series: Vec<MetricSeries>,
}

#[derive(Debug, Serialize)]
pub struct MetricSeries {
    pub metric: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    pub points: Vec<MetricPoint>,
}

#[derive(Debug, Serialize)]
pub struct MetricPoint {
    pub timestamp: i64,
    pub value: f64,
}

/// Handle to the metrics API, created once at startup and shared by
/// reference with whoever submits records
pub struct MetricsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    prefix: String,
}

impl MetricsClient {
    pub fn new(endpoint: &str, api_key: &str, prefix: &str) -> Result<Self, PublishError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(MetricsClient {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            prefix: prefix.to_string(),
        })
    }

    /// Build the request body for one record
    pub fn payload(&self, record: &Record) -> SeriesPayload {
        let timestamp = record.timestamp.unix_timestamp();
        let series = |name: &str, unit: Option<&'static str>, value: f64| MetricSeries {
            metric: format!("{}.{}", self.prefix, name),
            kind: GAUGE,
            unit,
            points: vec![MetricPoint { timestamp, value }],
        };

        SeriesPayload {
            series: vec![
                // ppm is not a Datadog unit, so co2 goes without one
                series("co2", None, f64::from(record.co2)),
                series("temperature", Some("degree celsius"), record.temperature),
                series("humidity", Some("percent"), record.humidity),
            ],
        }
    }

    pub async fn submit(&self, record: &Record) -> Result<(), PublishError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("DD-API-KEY", &self.api_key)
            .json(&self.payload(record))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Submitted metrics for {}", record.timestamp);
        Ok(())
    }
}

#[async_trait]
impl Publisher for MetricsClient {
    fn name(&self) -> &'static str {
        "datadog"
    }

    async fn publish(&self, record: &Record) -> Result<(), PublishError> {
        self.submit(record).await
    }
}

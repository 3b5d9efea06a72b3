use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::metrics::consts::LATENCY_SAMPLE_HISTOGRAM;
use crate::metrics::utils::{histogram, label};
use crate::subject::SubjectContext;

pub const LATENCY_METRIC: &str = "latency";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("sink rejected event with status {0}")]
    Rejected(u16),
}

/// One timestamped sample for the experiment metrics sink.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MetricEvent {
    pub metric: String,
    pub subject: SubjectContext,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl MetricEvent {
    pub fn latency(subject: SubjectContext, value: f64) -> Self {
        Self {
            metric: LATENCY_METRIC.to_string(),
            subject,
            value,
            timestamp: Utc::now(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }
}

/// Destination for telemetry. Delivery is best effort: callers log failures and move on.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn emit(&self, event: &MetricEvent) -> Result<(), SinkError>;
}

/// Records samples into the process metrics recorder, scraped from `/metrics`.
#[derive(Debug, Default, Clone)]
pub struct RecorderSink;

#[async_trait]
impl MetricsSink for RecorderSink {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn emit(&self, event: &MetricEvent) -> Result<(), SinkError> {
        histogram(
            LATENCY_SAMPLE_HISTOGRAM,
            &[label("metric", &event.metric)],
            event.value,
        );
        Ok(())
    }
}

/// Posts each event as JSON to a remote experiment tracking endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl MetricsSink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn emit(&self, event: &MetricEvent) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(event).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

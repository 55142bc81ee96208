//! Device telemetry provider.
//!
//! The provider only composes a request descriptor from the query; a
//! [`TelemetryTransport`] performs it. Polling is driven by the binding.

use crate::error::ProviderError;
use crate::provider::{DataProvider, ProviderKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const CURRENT_PATH: &str = "/telemetry/datas/current/keys";
const STATISTIC_PATH: &str = "/telemetry/datas/statistic";

/// Aggregation applied per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Raw points.
    #[default]
    None,
    /// Average.
    Avg,
    /// Maximum.
    Max,
    /// Minimum.
    Min,
    /// Sum.
    Sum,
    /// Point count.
    Count,
}

impl Aggregation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Avg => "avg",
            Self::Max => "max",
            Self::Min => "min",
            Self::Sum => "sum",
            Self::Count => "count",
        }
    }
}

/// Time range of a history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    /// The last `secs` seconds.
    Last {
        /// Length of the range in seconds.
        secs: u64,
    },
    /// Absolute range in epoch milliseconds.
    Absolute {
        /// Start (inclusive).
        start_ms: i64,
        /// End (exclusive).
        end_ms: i64,
    },
}

/// What to read from a device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryQuery {
    /// Device id.
    pub device_id: String,
    /// Metric keys.
    pub metric_ids: Vec<String>,
    /// Aggregation function.
    pub aggregation: Aggregation,
    /// Aggregation window in seconds.
    pub window_secs: Option<u64>,
    /// History range. Without one, current values are read.
    pub time_range: Option<TimeRange>,
    /// Maximum number of points.
    pub limit: Option<u32>,
}

impl TelemetryQuery {
    /// Current values of `metric_ids` on `device_id`.
    #[must_use]
    pub fn current(device_id: &str, metric_ids: &[&str]) -> Self {
        Self {
            device_id: device_id.to_string(),
            metric_ids: metric_ids.iter().map(|m| (*m).to_string()).collect(),
            ..Self::default()
        }
    }

    /// Read history over `range`.
    #[must_use]
    pub const fn with_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    /// Aggregate with `aggregation` over `window`.
    #[must_use]
    pub const fn with_aggregation(mut self, aggregation: Aggregation, window: Duration) -> Self {
        self.aggregation = aggregation;
        self.window_secs = Some(window.as_secs());
        self
    }

    /// Cap the number of points.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn validate(&self) -> Result<(), ProviderError> {
        if self.device_id.trim().is_empty() {
            return Err(ProviderError::InvalidConfig("telemetry query needs a device id".into()));
        }
        if self.metric_ids.is_empty() {
            return Err(ProviderError::InvalidConfig(
                "telemetry query needs at least one metric".into(),
            ));
        }
        if let Some(TimeRange::Absolute { start_ms, end_ms }) = self.time_range {
            if start_ms >= end_ms {
                return Err(ProviderError::InvalidConfig(
                    "telemetry range start must precede its end".into(),
                ));
            }
        }
        if self.aggregation != Aggregation::None && self.window_secs.unwrap_or(0) == 0 {
            return Err(ProviderError::InvalidConfig(
                "aggregation needs a positive window".into(),
            ));
        }
        Ok(())
    }
}

/// Request descriptor produced from a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryRequest {
    /// Endpoint path.
    pub path: String,
    /// Query pairs in order.
    pub query: Vec<(String, String)>,
}

impl TelemetryRequest {
    /// Build the descriptor for `query`.
    #[must_use]
    pub fn from_query(query: &TelemetryQuery) -> Self {
        let keys = query.metric_ids.join(",");
        let mut pairs = vec![("device_id".to_string(), query.device_id.clone())];

        let Some(range) = query.time_range else {
            pairs.push(("keys".to_string(), keys));
            return Self {
                path: CURRENT_PATH.to_string(),
                query: pairs,
            };
        };

        pairs.push(("key".to_string(), keys));
        match range {
            TimeRange::Last { secs } => {
                pairs.push(("time_range".to_string(), format!("last_{}", span_label(secs))));
            }
            TimeRange::Absolute { start_ms, end_ms } => {
                pairs.push(("time_range".to_string(), "custom".to_string()));
                pairs.push(("start_time".to_string(), start_ms.to_string()));
                pairs.push(("end_time".to_string(), end_ms.to_string()));
            }
        }
        let window = match (query.aggregation, query.window_secs) {
            (Aggregation::None, _) | (_, None) => "no_aggregate".to_string(),
            (_, Some(secs)) => span_label(secs),
        };
        pairs.push(("aggregate_window".to_string(), window));
        if query.aggregation != Aggregation::None {
            pairs.push((
                "aggregate_function".to_string(),
                query.aggregation.as_str().to_string(),
            ));
        }
        if let Some(limit) = query.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        Self {
            path: STATISTIC_PATH.to_string(),
            query: pairs,
        }
    }
}

/// `3600` -> `1h`, `90` -> `90s`.
fn span_label(secs: u64) -> String {
    match secs {
        0 => "0s".to_string(),
        s if s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s % 3600 == 0 => format!("{}h", s / 3600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}

/// Performs telemetry requests.
#[async_trait]
pub trait TelemetryTransport: Send + Sync + fmt::Debug {
    /// Execute `request` and return the decoded body.
    async fn send(&self, request: &TelemetryRequest) -> Result<Value, ProviderError>;
}

/// Transport that sends requests over HTTP.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Send requests to `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            timeout: super::http::DEFAULT_HTTP_TIMEOUT,
            client,
        })
    }

    /// Send `x-token` with every request.
    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TelemetryTransport for ReqwestTransport {
    async fn send(&self, request: &TelemetryRequest) -> Result<Value, ProviderError> {
        let mut builder = self
            .client
            .get(format!("{}{}", self.base_url, request.path))
            .query(&request.query)
            .timeout(self.timeout);
        if let Some(token) = &self.token {
            builder = builder.header("x-token", token.as_str());
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

/// Provider that reads device telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryProvider {
    query: TelemetryQuery,
    transport: Arc<dyn TelemetryTransport>,
}

impl TelemetryProvider {
    /// Read `query` through `transport`.
    #[must_use]
    pub fn new(query: TelemetryQuery, transport: Arc<dyn TelemetryTransport>) -> Self {
        Self { query, transport }
    }

    /// The query.
    #[must_use]
    pub const fn query(&self) -> &TelemetryQuery {
        &self.query
    }

    /// The request a fetch would send.
    #[must_use]
    pub fn request(&self) -> TelemetryRequest {
        TelemetryRequest::from_query(&self.query)
    }
}

#[async_trait]
impl DataProvider for TelemetryProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Telemetry
    }

    async fn fetch(&self) -> Result<Value, ProviderError> {
        self.query.validate()?;
        self.transport.send(&self.request()).await
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        self.query.validate()
    }
}

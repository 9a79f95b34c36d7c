//! Dashboard selection context and tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::Lookback;
use crate::model::DatabaseId;
use crate::series::DEFAULT_SERIES_SIZE;

/// What the dashboard is looking at.
///
/// Never mutated in place: a new context is handed to
/// [`crate::dashboard::Dashboard::select`], which invalidates everything
/// derived from the old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardContext {
    /// Instance label, display only.
    pub instance: String,
    pub database_id: DatabaseId,
    #[serde(default)]
    pub lookback: Lookback,
}

impl DashboardContext {
    pub fn new(instance: impl Into<String>, database_id: DatabaseId, lookback: Lookback) -> Self {
        Self {
            instance: instance.into(),
            database_id,
            lookback,
        }
    }
}

/// Demo-mode settings. Presence enables the synthetic telemetry source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoConfig {
    pub seed: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Dashboard tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Period of the full reload. Default: 30s.
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,
    /// Rows per table page. Default: 10.
    pub page_size: usize,
    /// Buckets per chart. Default: 12.
    pub chart_size: usize,
    /// Rows requested for the top-CPU and top-memory panels. Default: 10.
    pub top_limit: usize,
    /// Threshold of the slow-query panel. Default: 1000ms.
    pub slow_threshold_ms: u64,
    /// Per-request timeout of the HTTP source. Default: 10s.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    pub demo: Option<DemoConfig>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            page_size: 10,
            chart_size: DEFAULT_SERIES_SIZE,
            top_limit: 10,
            slow_threshold_ms: 1000,
            request_timeout: Duration::from_secs(10),
            demo: None,
        }
    }
}

impl DashboardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::Zero("refresh_interval"));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Zero("page_size"));
        }
        if self.chart_size == 0 {
            return Err(ConfigError::Zero("chart_size"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Zero("request_timeout"));
        }
        Ok(())
    }

    pub fn is_demo(&self) -> bool {
        self.demo.is_some()
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

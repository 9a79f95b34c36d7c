//! Telemetry source abstraction and response envelope normalization.
//!
//! The collector wraps every payload in `{success, data, message}`. Sources
//! return typed rows or a [`FetchError`] distinguishing transport failures
//! from backend rejections.

#[cfg(feature = "demo")]
pub mod demo;
#[cfg(feature = "http")]
pub mod http;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::FetchError;
use crate::explain::ExplainResponse;
use crate::model::{AggregatedQueryStat, DatabaseId, RawExecutionSample};

#[cfg(feature = "demo")]
pub use demo::DemoTelemetry;
#[cfg(feature = "http")]
pub use http::HttpTelemetry;

/// Text used when a rejection carries no message.
pub const GENERIC_REJECTION: &str = "request rejected by collector";

/// Standard collector response envelope.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    /// `success: false` becomes [`FetchError::BackendRejected`].
    pub fn into_result(self) -> Result<Option<T>, FetchError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(FetchError::BackendRejected {
                message: self
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| GENERIC_REJECTION.to_string()),
            })
        }
    }
}

impl<R> Envelope<Vec<R>> {
    /// For list endpoints: a successful envelope without data is an empty list.
    pub fn into_rows(self) -> Result<Vec<R>, FetchError> {
        self.into_result().map(Option::unwrap_or_default)
    }
}

/// Source of query telemetry for one collector.
///
/// Calls are independent; callers may issue them concurrently and consume
/// each result on its own.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Raw per-execution samples of a database.
    async fn raw_samples(
        &self,
        database_id: DatabaseId,
    ) -> Result<Vec<RawExecutionSample>, FetchError>;

    /// Per-query aggregates over the last `window_hours`.
    async fn aggregated_stats(
        &self,
        database_id: DatabaseId,
        window_hours: u32,
    ) -> Result<Vec<AggregatedQueryStat>, FetchError>;

    /// Samples with the highest CPU usage.
    async fn top_cpu(&self, limit: usize) -> Result<Vec<RawExecutionSample>, FetchError>;

    /// Samples with the highest memory usage.
    async fn top_memory(&self, limit: usize) -> Result<Vec<RawExecutionSample>, FetchError>;

    /// Samples slower than `threshold_ms`.
    async fn slow_queries(&self, threshold_ms: u64)
    -> Result<Vec<RawExecutionSample>, FetchError>;

    /// Execution-plan analysis of `query`. The backend decides whether the
    /// statement is actually executed.
    async fn explain_analyze(
        &self,
        database_id: DatabaseId,
        query: &str,
    ) -> Result<ExplainResponse, FetchError>;
}

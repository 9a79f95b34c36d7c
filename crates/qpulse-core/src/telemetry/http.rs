//! HTTP telemetry source backed by the collector REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use tracing::{debug, warn};

use super::{Envelope, TelemetrySource};
use crate::error::FetchError;
use crate::explain::ExplainResponse;
use crate::model::{AggregatedQueryStat, DatabaseId, RawExecutionSample};

const EMPTY_EXPLAIN: &str = "empty explain response";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExplainRequest<'a> {
    database_id: DatabaseId,
    query: &'a str,
}

/// Collector client. Cloning is cheap and shares the connection pool.
#[derive(Debug, Clone)]
pub struct HttpTelemetry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTelemetry {
    /// `base_url` is the API root, e.g. `http://collector:8080/api`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, FetchError> {
        let url = self.url(path);
        debug!(%url, ?query, "GET");
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;
        decode(&url, resp).await
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, FetchError> {
        Ok(self.get::<Vec<T>>(path, query).await?.unwrap_or_default())
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> FetchError {
    warn!(%url, error = %e, "collector request failed");
    FetchError::Network(e.to_string())
}

/// Normalizes a collector response.
///
/// A parseable `success: false` body is a rejection whatever the status; any
/// other non-2xx status or an undecodable 2xx body is a network failure.
async fn decode<T: DeserializeOwned>(
    url: &str,
    resp: reqwest::Response,
) -> Result<Option<T>, FetchError> {
    let status = resp.status();
    let body = resp.bytes().await.map_err(|e| transport_error(url, e))?;

    if !status.is_success() {
        if let Ok(env) = serde_json::from_slice::<Envelope<IgnoredAny>>(&body) {
            if let Err(err) = env.into_result() {
                warn!(%url, %status, error = %err, "collector rejected request");
                return Err(err);
            }
        }
        warn!(%url, %status, "collector returned error status");
        return Err(FetchError::Network(format!("HTTP {}", status)));
    }

    match serde_json::from_slice::<Envelope<T>>(&body) {
        Ok(env) => {
            let result = env.into_result();
            if let Err(e) = &result {
                warn!(%url, error = %e, "collector rejected request");
            }
            result
        }
        Err(e) => {
            warn!(%url, error = %e, "undecodable collector response");
            Err(FetchError::Network(format!("malformed response: {}", e)))
        }
    }
}

#[async_trait]
impl TelemetrySource for HttpTelemetry {
    async fn raw_samples(
        &self,
        database_id: DatabaseId,
    ) -> Result<Vec<RawExecutionSample>, FetchError> {
        self.get_rows(&format!("/query-metrics/database/{}", database_id), &[])
            .await
    }

    async fn aggregated_stats(
        &self,
        database_id: DatabaseId,
        window_hours: u32,
    ) -> Result<Vec<AggregatedQueryStat>, FetchError> {
        self.get_rows(
            "/query-metrics/execution-stats",
            &[
                ("databaseId", database_id.to_string()),
                ("hours", window_hours.to_string()),
            ],
        )
        .await
    }

    async fn top_cpu(&self, limit: usize) -> Result<Vec<RawExecutionSample>, FetchError> {
        self.get_rows("/query-metrics/top/cpu", &[("limit", limit.to_string())])
            .await
    }

    async fn top_memory(&self, limit: usize) -> Result<Vec<RawExecutionSample>, FetchError> {
        self.get_rows("/query-metrics/top/memory", &[("limit", limit.to_string())])
            .await
    }

    async fn slow_queries(
        &self,
        threshold_ms: u64,
    ) -> Result<Vec<RawExecutionSample>, FetchError> {
        self.get_rows(
            "/query-metrics/slow",
            &[("thresholdMs", threshold_ms.to_string())],
        )
        .await
    }

    async fn explain_analyze(
        &self,
        database_id: DatabaseId,
        query: &str,
    ) -> Result<ExplainResponse, FetchError> {
        let url = self.url("/query-metrics/explain-analyze");
        debug!(%url, database_id, "POST explain");
        let resp = self
            .client
            .post(&url)
            .json(&ExplainRequest { database_id, query })
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;
        decode::<ExplainResponse>(&url, resp)
            .await?
            .ok_or_else(|| FetchError::BackendRejected {
                message: EMPTY_EXPLAIN.to_string(),
            })
    }
}

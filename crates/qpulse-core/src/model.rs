//! Telemetry records and the reconciled per-query view.
//!
//! Wire types use camelCase field names to match the collector's JSON envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::{QueryType, Severity};

/// Database identifier as used by the collector API.
pub type DatabaseId = i64;

/// One observed execution of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExecutionSample {
    pub sample_id: i64,
    pub query_hash: String,
    pub collected_at: DateTime<Utc>,
    #[serde(default)]
    pub execution_time_ms: f64,
    #[serde(default)]
    pub cpu_usage_percent: f64,
    #[serde(default)]
    pub memory_usage_mb: f64,
    #[serde(default)]
    pub io_blocks: i64,
    #[serde(default)]
    pub query_text: String,
    pub database_id: DatabaseId,
}

/// One row per distinct normalized query within a reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedQueryStat {
    pub query_hash: String,
    #[serde(default)]
    pub short_query: String,
    #[serde(default)]
    pub full_query: String,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default)]
    pub avg_time_ms: f64,
    #[serde(default)]
    pub total_time_ms: f64,
    #[serde(default)]
    pub call_count: u64,
    /// Type label as reported by the collector. Display only; classification
    /// is derived from the query text.
    #[serde(default)]
    pub query_type: Option<String>,
    pub last_executed_at: DateTime<Utc>,
}

impl AggregatedQueryStat {
    /// Text used for classification: full text when present, short text otherwise.
    pub fn query_text(&self) -> &str {
        if self.full_query.trim().is_empty() {
            &self.short_query
        } else {
            &self.full_query
        }
    }
}

/// Resource usage borrowed from the most recent raw sample of a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub sample_id: i64,
    pub collected_at: DateTime<Utc>,
    pub execution_time_ms: f64,
    pub cpu_usage_percent: f64,
    pub memory_usage_mb: f64,
    pub io_blocks: i64,
}

impl From<&RawExecutionSample> for ResourceUsage {
    fn from(s: &RawExecutionSample) -> Self {
        Self {
            sample_id: s.sample_id,
            collected_at: s.collected_at,
            execution_time_ms: s.execution_time_ms,
            cpu_usage_percent: s.cpu_usage_percent,
            memory_usage_mb: s.memory_usage_mb,
            io_blocks: s.io_blocks,
        }
    }
}

/// Aggregated row joined with its latest raw sample.
///
/// `resources` is `None` when no raw sample shares the row's hash. It is never
/// filled with zeros.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledQueryView {
    pub stat: AggregatedQueryStat,
    pub resources: Option<ResourceUsage>,
    pub query_type: QueryType,
    pub severity: Severity,
}

impl ReconciledQueryView {
    pub fn query_hash(&self) -> &str {
        &self.stat.query_hash
    }

    pub fn has_resources(&self) -> bool {
        self.resources.is_some()
    }
}

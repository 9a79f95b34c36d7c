//! Seeded synthetic telemetry for running without a collector.
//!
//! Every call derives its own generator from the seed and the call's
//! arguments, so identical calls return identical rows. Timestamps are laid
//! out relative to the anchor (wall clock when unset).

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::TelemetrySource;
use crate::error::FetchError;
use crate::explain::{ExecutionMode, ExplainResponse, is_data_mutating};
use crate::metrics::RATE_WINDOW_SECS;
use crate::model::{AggregatedQueryStat, DatabaseId, RawExecutionSample};

/// Database used by the unscoped top-N endpoints.
pub const DEMO_DATABASE: DatabaseId = 1;

const SAMPLE_SPAN_SECS: i64 = 6 * 3600;

const CATALOG: &[(&str, f64)] = &[
    ("SELECT id, email FROM users WHERE id = $1", 2.0),
    ("SELECT * FROM orders WHERE customer_id = $1 ORDER BY created_at DESC", 45.0),
    ("SELECT count(*) FROM events WHERE created_at > now() - interval '1 day'", 1800.0),
    ("INSERT INTO events (kind, payload) VALUES ($1, $2)", 3.5),
    ("UPDATE accounts SET balance = balance - $1 WHERE id = $2", 8.0),
    ("DELETE FROM sessions WHERE expires_at < now()", 120.0),
    (
        "SELECT o.id, sum(i.amount) FROM orders o JOIN items i ON i.order_id = o.id GROUP BY o.id",
        3600.0,
    ),
    ("WITH recent AS (SELECT * FROM audit_log LIMIT 100) SELECT * FROM recent", 25.0),
    ("VACUUM ANALYZE orders", 9000.0),
    ("SELECT p.* FROM products p WHERE p.name ILIKE $1", 950.0),
];

#[derive(Debug, Clone)]
pub struct DemoTelemetry {
    seed: u64,
    anchor: Option<DateTime<Utc>>,
    latency: StdDuration,
}

impl DemoTelemetry {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            anchor: None,
            latency: StdDuration::ZERO,
        }
    }

    /// Pins "now" to `anchor`.
    pub fn with_anchor(mut self, anchor: DateTime<Utc>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// Delays every response by `latency`.
    pub fn with_latency(mut self, latency: StdDuration) -> Self {
        self.latency = latency;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn now(&self) -> DateTime<Utc> {
        self.anchor.unwrap_or_else(Utc::now)
    }

    fn rng(&self, salt: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn hash(idx: usize) -> String {
        format!("dq{:02}", idx)
    }

    /// Newest first.
    pub fn generate_samples(&self, database_id: DatabaseId) -> Vec<RawExecutionSample> {
        let now = self.now();
        let mut rng = self.rng(database_id as u64);
        let mut out = Vec::new();
        let mut id = 1;
        for (idx, (text, base_ms)) in CATALOG.iter().enumerate() {
            let runs = rng.random_range(1..=6);
            for _ in 0..runs {
                let age = rng.random_range(0..SAMPLE_SPAN_SECS);
                let ms = *base_ms * rng.random_range(0.5..1.5_f64);
                out.push(RawExecutionSample {
                    sample_id: id,
                    query_hash: Self::hash(idx),
                    collected_at: now - Duration::seconds(age),
                    execution_time_ms: (ms * 100.0).round() / 100.0,
                    cpu_usage_percent: (rng.random_range(0.5..95.0_f64) * 10.0).round() / 10.0,
                    memory_usage_mb: (rng.random_range(4.0..512.0_f64) * 10.0).round() / 10.0,
                    io_blocks: rng.random_range(0..5_000),
                    query_text: text.to_string(),
                    database_id,
                });
                id += 1;
            }
        }
        out.sort_by(|a, b| b.collected_at.cmp(&a.collected_at));
        out
    }

    pub fn generate_stats(
        &self,
        database_id: DatabaseId,
        window_hours: u32,
    ) -> Vec<AggregatedQueryStat> {
        let now = self.now();
        let mut rng = self.rng(((database_id as u64) << 16) ^ u64::from(window_hours));
        let span = i64::from(window_hours.max(1)) * 3600;
        CATALOG
            .iter()
            .enumerate()
            .map(|(idx, (text, base_ms))| {
                // a third of the queries ran inside the rate window
                let age = if idx % 3 == 0 {
                    rng.random_range(0..RATE_WINDOW_SECS as i64)
                } else {
                    rng.random_range(0..span)
                };
                let execution_count = match idx {
                    0 => 0,
                    1 => 1,
                    _ => rng.random_range(2..window_hours.max(1) as u64 * 20 + 2),
                };
                let avg = *base_ms * rng.random_range(0.8..1.2_f64);
                AggregatedQueryStat {
                    query_hash: Self::hash(idx),
                    short_query: crate::fmt::truncate(text, 40),
                    full_query: text.to_string(),
                    execution_count,
                    avg_time_ms: (avg * 100.0).round() / 100.0,
                    total_time_ms: (avg * execution_count as f64 * 100.0).round() / 100.0,
                    call_count: execution_count,
                    query_type: None,
                    last_executed_at: now - Duration::seconds(age),
                }
            })
            .collect()
    }

    fn plan_for(query: &str, mode: &ExecutionMode, rng: &mut StdRng) -> String {
        let cost = rng.random_range(1.0..5_000.0_f64);
        let node = if query.contains("JOIN") {
            "Hash Join"
        } else if query.contains("WHERE id =") {
            "Index Scan using pkey"
        } else {
            "Seq Scan"
        };
        let mut plan = format!("{}  (cost=0.00..{:.2} rows=100 width=64)", node, cost);
        if *mode == ExecutionMode::Analyze {
            plan.push_str(&format!(
                " (actual time=0.010..{:.3} rows=100 loops=1)",
                cost / 10.0
            ));
            if node == "Seq Scan" {
                plan.push_str("\n  Rows Removed by Filter: 9900");
            }
        }
        plan
    }
}

#[async_trait]
impl TelemetrySource for DemoTelemetry {
    async fn raw_samples(
        &self,
        database_id: DatabaseId,
    ) -> Result<Vec<RawExecutionSample>, FetchError> {
        self.delay().await;
        Ok(self.generate_samples(database_id))
    }

    async fn aggregated_stats(
        &self,
        database_id: DatabaseId,
        window_hours: u32,
    ) -> Result<Vec<AggregatedQueryStat>, FetchError> {
        self.delay().await;
        Ok(self.generate_stats(database_id, window_hours))
    }

    async fn top_cpu(&self, limit: usize) -> Result<Vec<RawExecutionSample>, FetchError> {
        self.delay().await;
        let mut rows = self.generate_samples(DEMO_DATABASE);
        rows.sort_by(|a, b| b.cpu_usage_percent.total_cmp(&a.cpu_usage_percent));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn top_memory(&self, limit: usize) -> Result<Vec<RawExecutionSample>, FetchError> {
        self.delay().await;
        let mut rows = self.generate_samples(DEMO_DATABASE);
        rows.sort_by(|a, b| b.memory_usage_mb.total_cmp(&a.memory_usage_mb));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn slow_queries(
        &self,
        threshold_ms: u64,
    ) -> Result<Vec<RawExecutionSample>, FetchError> {
        self.delay().await;
        let mut rows: Vec<_> = self
            .generate_samples(DEMO_DATABASE)
            .into_iter()
            .filter(|s| s.execution_time_ms > threshold_ms as f64)
            .collect();
        rows.sort_by(|a, b| b.execution_time_ms.total_cmp(&a.execution_time_ms));
        Ok(rows)
    }

    async fn explain_analyze(
        &self,
        database_id: DatabaseId,
        query: &str,
    ) -> Result<ExplainResponse, FetchError> {
        self.delay().await;
        if query.trim().is_empty() {
            return Err(FetchError::BackendRejected {
                message: "query text is empty".to_string(),
            });
        }
        let salt = query
            .bytes()
            .fold(database_id as u64, |h, b| h.wrapping_mul(31).wrapping_add(u64::from(b)));
        let mut rng = self.rng(salt);
        let mode = if is_data_mutating(query) {
            ExecutionMode::EstimateOnly
        } else {
            ExecutionMode::Analyze
        };
        let plan = Self::plan_for(query, &mode, &mut rng);
        let execution_time_ms = (mode == ExecutionMode::Analyze)
            .then(|| (rng.random_range(0.05..500.0_f64) * 1000.0).round() / 1000.0);
        Ok(ExplainResponse {
            explain_plan: plan,
            execution_mode: mode,
            execution_time_ms,
            planning_time_ms: Some((rng.random_range(0.01..2.0_f64) * 1000.0).round() / 1000.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::metrics::{RateBasis, compute_rates};

    fn demo() -> DemoTelemetry {
        DemoTelemetry::new(7).with_anchor(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn same_seed_same_rows() {
        let a = demo();
        let b = demo();
        assert_eq!(a.raw_samples(3).await.unwrap(), b.raw_samples(3).await.unwrap());
        assert_eq!(
            a.aggregated_stats(3, 24).await.unwrap(),
            b.aggregated_stats(3, 24).await.unwrap()
        );
        let other = DemoTelemetry::new(8).with_anchor(a.now());
        assert_ne!(a.raw_samples(3).await.unwrap(), other.raw_samples(3).await.unwrap());
    }

    #[tokio::test]
    async fn samples_stay_within_span() {
        let d = demo();
        let rows = d.raw_samples(3).await.unwrap();
        assert!(!rows.is_empty());
        let newest = rows.iter().map(|r| r.collected_at).max().unwrap();
        assert!(newest <= d.now());
        assert!(rows.iter().all(|r| r.collected_at > d.now() - Duration::hours(6)));
        assert!(rows.windows(2).all(|w| w[0].collected_at >= w[1].collected_at));
    }

    #[tokio::test]
    async fn stats_have_recent_activity() {
        let d = demo();
        let stats = d.aggregated_stats(3, 24).await.unwrap();
        assert_eq!(stats.len(), CATALOG.len());
        assert_eq!(stats[0].execution_count, 0);
        assert_eq!(stats[1].execution_count, 1);
        assert_eq!(compute_rates(&stats, d.now()).basis, RateBasis::Window);
    }

    #[tokio::test]
    async fn top_and_slow_are_ordered() {
        let d = demo();
        let cpu = d.top_cpu(5).await.unwrap();
        assert!(cpu.len() <= 5);
        assert!(cpu.windows(2).all(|w| w[0].cpu_usage_percent >= w[1].cpu_usage_percent));
        let slow = d.slow_queries(1000).await.unwrap();
        assert!(slow.iter().all(|s| s.execution_time_ms > 1000.0));
    }

    #[tokio::test]
    async fn mutating_explain_is_estimate_only() {
        let d = demo();
        let r = d.explain_analyze(3, "DELETE FROM sessions").await.unwrap();
        assert_eq!(r.execution_mode, ExecutionMode::EstimateOnly);
        assert_eq!(r.execution_time_ms, None);
        let r = d.explain_analyze(3, "SELECT * FROM t").await.unwrap();
        assert_eq!(r.execution_mode, ExecutionMode::Analyze);
        assert!(r.explain_plan.contains("Seq Scan"));
        assert!(d.explain_analyze(3, "  ").await.is_err());
    }
}

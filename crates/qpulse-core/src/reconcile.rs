//! Joins aggregated rows with the most recent raw sample of the same query.
//!
//! The aggregated feed carries no resource usage; memory, CPU and I/O are
//! borrowed from the latest raw sample sharing the row's `queryHash`.

use std::collections::HashMap;

use crate::metrics::{QueryType, Severity};
use crate::model::{AggregatedQueryStat, RawExecutionSample, ReconciledQueryView, ResourceUsage};

/// Latest sample per query hash.
///
/// Samples with identical `collectedAt` resolve to the one appearing first in
/// the feed, so the result is stable for a given input order.
pub fn latest_by_hash(samples: &[RawExecutionSample]) -> HashMap<&str, &RawExecutionSample> {
    let mut latest: HashMap<&str, &RawExecutionSample> = HashMap::with_capacity(samples.len());
    for s in samples {
        latest
            .entry(s.query_hash.as_str())
            .and_modify(|cur| {
                if s.collected_at > cur.collected_at {
                    *cur = s;
                }
            })
            .or_insert(s);
    }
    latest
}

/// Builds one reconciled view per aggregated row, in the aggregated feed's order.
pub fn reconcile(
    stats: &[AggregatedQueryStat],
    samples: &[RawExecutionSample],
) -> Vec<ReconciledQueryView> {
    let latest = latest_by_hash(samples);
    stats
        .iter()
        .map(|stat| {
            let resources = latest
                .get(stat.query_hash.as_str())
                .map(|s| ResourceUsage::from(*s));
            ReconciledQueryView {
                query_type: QueryType::detect(stat.query_text()),
                severity: Severity::classify(stat.avg_time_ms),
                resources,
                stat: stat.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn stat(hash: &str) -> AggregatedQueryStat {
        AggregatedQueryStat {
            query_hash: hash.into(),
            short_query: format!("SELECT {hash}"),
            full_query: format!("SELECT {hash} FROM t"),
            execution_count: 3,
            avg_time_ms: 1600.0,
            total_time_ms: 4800.0,
            call_count: 3,
            query_type: Some("SELECT".into()),
            last_executed_at: t0(),
        }
    }

    fn sample(id: i64, hash: &str, at: DateTime<Utc>, cpu: f64) -> RawExecutionSample {
        RawExecutionSample {
            sample_id: id,
            query_hash: hash.into(),
            collected_at: at,
            execution_time_ms: 10.0,
            cpu_usage_percent: cpu,
            memory_usage_mb: 64.0,
            io_blocks: 12,
            query_text: "SELECT 1".into(),
            database_id: 1,
        }
    }

    #[test]
    fn picks_latest_sample_and_marks_missing_as_unavailable() {
        let t1 = t0();
        let t2 = t1 + Duration::seconds(5);
        let stats = vec![stat("a"), stat("b"), stat("c")];
        let samples = vec![sample(1, "a", t1, 10.0), sample(2, "a", t2, 20.0)];

        let views = reconcile(&stats, &samples);
        assert_eq!(views.len(), 3);

        let a = views[0].resources.as_ref().expect("a has a sample");
        assert_eq!(a.sample_id, 2);
        assert_eq!(a.collected_at, t2);
        assert!((a.cpu_usage_percent - 20.0).abs() < 1e-9);

        assert!(views[1].resources.is_none());
        assert!(views[2].resources.is_none());
    }

    #[test]
    fn latest_wins_regardless_of_feed_order() {
        let t1 = t0();
        let samples = vec![
            sample(1, "a", t1 + Duration::seconds(30), 1.0),
            sample(2, "a", t1, 2.0),
            sample(3, "a", t1 + Duration::seconds(10), 3.0),
        ];
        assert_eq!(latest_by_hash(&samples)["a"].sample_id, 1);
    }

    #[test]
    fn equal_timestamps_resolve_to_first_in_feed() {
        let t = t0();
        let samples = vec![sample(7, "a", t, 1.0), sample(8, "a", t, 2.0)];
        for _ in 0..10 {
            assert_eq!(latest_by_hash(&samples)["a"].sample_id, 7);
        }
    }

    #[test]
    fn view_carries_type_and_severity() {
        let views = reconcile(&[stat("a")], &[]);
        assert_eq!(views[0].query_type, QueryType::Select);
        assert_eq!(views[0].severity, Severity::Medium);
        assert!(!views[0].has_resources());
    }
}

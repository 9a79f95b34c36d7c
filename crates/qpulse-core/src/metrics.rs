//! Window metrics: time filtering, throughput rates, severity classification
//! and distributions.
//!
//! This module is the single source of truth for derived per-window numbers.
//! Every function is a pure function of its inputs; "now" is always passed in.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AggregatedQueryStat, RawExecutionSample};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Window (seconds) for rates over a genuinely time-filtered subset.
pub const RATE_WINDOW_SECS: u64 = 300;

/// Window (seconds) used when the filtered subset is empty and the rate is
/// recomputed over the entire available set.
pub const FALLBACK_WINDOW_SECS: u64 = 60;

/// Executions strictly slower than this are HIGH severity.
pub const HIGH_SEVERITY_MS: f64 = 3000.0;

/// Executions strictly slower than this (and not HIGH) are MEDIUM severity.
pub const MEDIUM_SEVERITY_MS: f64 = 1500.0;

/// Maximum number of entries in the query-type histogram.
pub const MAX_QUERY_TYPES: usize = 6;

// ---------------------------------------------------------------------------
// Activity records
// ---------------------------------------------------------------------------

/// A timestamped record carrying an execution count.
///
/// Raw samples count as one execution each; aggregated rows carry their
/// `executionCount` and are timestamped by `lastExecutedAt`.
pub trait ActivityRecord {
    fn observed_at(&self) -> DateTime<Utc>;
    fn executions(&self) -> u64;
}

impl ActivityRecord for RawExecutionSample {
    fn observed_at(&self) -> DateTime<Utc> {
        self.collected_at
    }

    fn executions(&self) -> u64 {
        1
    }
}

impl ActivityRecord for AggregatedQueryStat {
    fn observed_at(&self) -> DateTime<Utc> {
        self.last_executed_at
    }

    fn executions(&self) -> u64 {
        self.execution_count
    }
}

// ---------------------------------------------------------------------------
// Lookback and time filtering
// ---------------------------------------------------------------------------

/// Requested reporting lookback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Lookback {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[default]
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
}

impl Lookback {
    pub fn hours(&self) -> u32 {
        match self {
            Lookback::OneHour => 1,
            Lookback::SixHours => 6,
            Lookback::OneDay => 24,
            Lookback::SevenDays => 168,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::hours(i64::from(self.hours()))
    }

    /// Whether the filter is applied locally.
    ///
    /// Feeds for 24h and 7d are already scoped upstream by the `hours`
    /// parameter, so filtering them again is a no-op by policy.
    pub fn filters_locally(&self) -> bool {
        matches!(self, Lookback::OneHour | Lookback::SixHours)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lookback::OneHour => "1h",
            Lookback::SixHours => "6h",
            Lookback::OneDay => "24h",
            Lookback::SevenDays => "7d",
        }
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lookback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1h" => Ok(Lookback::OneHour),
            "6h" => Ok(Lookback::SixHours),
            "24h" | "1d" => Ok(Lookback::OneDay),
            "7d" => Ok(Lookback::SevenDays),
            other => Err(format!("invalid lookback '{}': expected 1h, 6h, 24h or 7d", other)),
        }
    }
}

/// Records whose timestamp falls in `[now - window, now]`.
pub fn filter_window<R: ActivityRecord>(rows: &[R], window: Duration, now: DateTime<Utc>) -> Vec<&R> {
    let from = now - window;
    rows.iter()
        .filter(|r| {
            let t = r.observed_at();
            t >= from && t <= now
        })
        .collect()
}

/// Records inside the requested lookback. No-op for 24h and 7d.
pub fn filter_by_lookback<R: ActivityRecord>(
    rows: &[R],
    lookback: Lookback,
    now: DateTime<Utc>,
) -> Vec<&R> {
    if !lookback.filters_locally() {
        return rows.iter().collect();
    }
    filter_window(rows, lookback.duration(), now)
}

// ---------------------------------------------------------------------------
// Throughput rates
// ---------------------------------------------------------------------------

/// Which subset a rate was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBasis {
    /// Records from the last five minutes.
    Window,
    /// Five-minute subset was empty; computed over everything available.
    Fallback,
    /// Nothing to compute over.
    NoActivity,
}

/// TPS/QPS for one load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThroughputRates {
    pub tps: u64,
    pub qps: u64,
    pub window_secs: u64,
    pub basis: RateBasis,
}

impl ThroughputRates {
    pub fn is_approximate(&self) -> bool {
        self.basis == RateBasis::Fallback
    }
}

/// Floors `count / window_secs`, clamped to at least 1 whenever `count > 0`.
pub fn clamp_rate(count: u64, window_secs: u64) -> u64 {
    if count == 0 || window_secs == 0 {
        return 0;
    }
    (count / window_secs).max(1)
}

/// TPS = executions / window, QPS = rows / window.
///
/// Uses the last five minutes when that subset is non-empty. Otherwise falls
/// back to the whole set over a 60 second window and flags the result.
pub fn compute_rates<R: ActivityRecord>(rows: &[R], now: DateTime<Utc>) -> ThroughputRates {
    let recent = filter_window(rows, Duration::seconds(RATE_WINDOW_SECS as i64), now);

    let (subset, window_secs, basis) = if !recent.is_empty() {
        (recent, RATE_WINDOW_SECS, RateBasis::Window)
    } else if !rows.is_empty() {
        (rows.iter().collect(), FALLBACK_WINDOW_SECS, RateBasis::Fallback)
    } else {
        return ThroughputRates {
            tps: 0,
            qps: 0,
            window_secs: RATE_WINDOW_SECS,
            basis: RateBasis::NoActivity,
        };
    };

    let executions: u64 = subset.iter().map(|r| r.executions()).sum();
    ThroughputRates {
        tps: clamp_rate(executions, window_secs),
        qps: clamp_rate(subset.len() as u64, window_secs),
        window_secs,
        basis,
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Latency-based classification of a query execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// `> 3000` is HIGH, `> 1500` is MEDIUM, anything else (including NaN) LOW.
    pub fn classify(execution_time_ms: f64) -> Self {
        if execution_time_ms > HIGH_SEVERITY_MS {
            Severity::High
        } else if execution_time_ms > MEDIUM_SEVERITY_MS {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

// ---------------------------------------------------------------------------
// Query type
// ---------------------------------------------------------------------------

/// Normalized statement type derived from the leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl QueryType {
    pub const ALL: [QueryType; 5] = [
        QueryType::Select,
        QueryType::Insert,
        QueryType::Update,
        QueryType::Delete,
        QueryType::Other,
    ];

    /// Classifies by the first keyword, case-insensitively. Leading
    /// whitespace, comments and opening parentheses are skipped.
    pub fn detect(query: &str) -> Self {
        let kw = leading_keyword(query);
        if kw.eq_ignore_ascii_case("SELECT") {
            QueryType::Select
        } else if kw.eq_ignore_ascii_case("INSERT") {
            QueryType::Insert
        } else if kw.eq_ignore_ascii_case("UPDATE") {
            QueryType::Update
        } else if kw.eq_ignore_ascii_case("DELETE") {
            QueryType::Delete
        } else {
            QueryType::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Select => "SELECT",
            QueryType::Insert => "INSERT",
            QueryType::Update => "UPDATE",
            QueryType::Delete => "DELETE",
            QueryType::Other => "OTHER",
        }
    }
}

fn leading_keyword(query: &str) -> &str {
    let mut rest = query;
    loop {
        rest = rest.trim_start();
        if let Some(r) = rest.strip_prefix("--") {
            rest = r.find('\n').map_or("", |i| &r[i + 1..]);
        } else if let Some(r) = rest.strip_prefix("/*") {
            rest = r.find("*/").map_or("", |i| &r[i + 2..]);
        } else if let Some(r) = rest.strip_prefix('(') {
            rest = r;
        } else {
            break;
        }
    }
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    &rest[..end]
}

// ---------------------------------------------------------------------------
// Distributions
// ---------------------------------------------------------------------------

/// Fixed execution-count bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExecutionCountBin {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2-3")]
    TwoToThree,
    #[serde(rename = "4-7")]
    FourToSeven,
    #[serde(rename = "8-15")]
    EightToFifteen,
    #[serde(rename = "16+")]
    SixteenPlus,
}

impl ExecutionCountBin {
    pub const ALL: [ExecutionCountBin; 5] = [
        ExecutionCountBin::One,
        ExecutionCountBin::TwoToThree,
        ExecutionCountBin::FourToSeven,
        ExecutionCountBin::EightToFifteen,
        ExecutionCountBin::SixteenPlus,
    ];

    /// Bin for an execution count. Rows that never executed are not binned.
    pub fn for_count(count: u64) -> Option<Self> {
        match count {
            0 => None,
            1 => Some(ExecutionCountBin::One),
            2..=3 => Some(ExecutionCountBin::TwoToThree),
            4..=7 => Some(ExecutionCountBin::FourToSeven),
            8..=15 => Some(ExecutionCountBin::EightToFifteen),
            _ => Some(ExecutionCountBin::SixteenPlus),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionCountBin::One => "1",
            ExecutionCountBin::TwoToThree => "2-3",
            ExecutionCountBin::FourToSeven => "4-7",
            ExecutionCountBin::EightToFifteen => "8-15",
            ExecutionCountBin::SixteenPlus => "16+",
        }
    }
}

/// One histogram entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistogramBucket<K> {
    pub key: K,
    pub count: u64,
}

/// Number of rows per execution-count bin, all five bins in fixed order.
pub fn execution_count_histogram<'a, I>(stats: I) -> Vec<HistogramBucket<ExecutionCountBin>>
where
    I: IntoIterator<Item = &'a AggregatedQueryStat>,
{
    let mut counts = [0u64; 5];
    for s in stats {
        if let Some(bin) = ExecutionCountBin::for_count(s.execution_count) {
            counts[bin as usize] += 1;
        }
    }
    ExecutionCountBin::ALL
        .iter()
        .map(|&key| HistogramBucket {
            key,
            count: counts[key as usize],
        })
        .collect()
}

/// Total executions per query type, descending, at most [`MAX_QUERY_TYPES`].
///
/// Equal totals keep the canonical type order.
pub fn query_type_histogram<'a, I>(stats: I) -> Vec<HistogramBucket<QueryType>>
where
    I: IntoIterator<Item = &'a AggregatedQueryStat>,
{
    let mut totals: HashMap<QueryType, u64> = HashMap::new();
    for s in stats {
        *totals.entry(QueryType::detect(s.query_text())).or_insert(0) += s.execution_count;
    }
    let mut buckets: Vec<HistogramBucket<QueryType>> = QueryType::ALL
        .iter()
        .filter_map(|&key| totals.get(&key).map(|&count| HistogramBucket { key, count }))
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count));
    buckets.truncate(MAX_QUERY_TYPES);
    buckets
}

// ---------------------------------------------------------------------------
// Window summary
// ---------------------------------------------------------------------------

/// Per-severity sample counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
}

impl SeverityCounts {
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Low => self.low += 1,
            Severity::Medium => self.medium += 1,
            Severity::High => self.high += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.low + self.medium + self.high
    }
}

/// Everything derived from one consistent snapshot of both feeds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    pub lookback: Lookback,
    pub computed_at: DateTime<Utc>,
    pub rates: ThroughputRates,
    pub severity: SeverityCounts,
    /// Mean execution time of lookback-filtered samples, `None` without samples.
    pub avg_execution_ms: Option<f64>,
    pub sample_count: usize,
    pub execution_histogram: Vec<HistogramBucket<ExecutionCountBin>>,
    pub query_type_histogram: Vec<HistogramBucket<QueryType>>,
}

impl WindowSummary {
    pub fn compute(
        stats: &[AggregatedQueryStat],
        samples: &[RawExecutionSample],
        lookback: Lookback,
        now: DateTime<Utc>,
    ) -> Self {
        let filtered_stats = filter_by_lookback(stats, lookback, now);
        let filtered_samples = filter_by_lookback(samples, lookback, now);

        let mut severity = SeverityCounts::default();
        let mut total_ms = 0.0;
        for s in &filtered_samples {
            severity.add(Severity::classify(s.execution_time_ms));
            total_ms += s.execution_time_ms;
        }
        let avg_execution_ms =
            (!filtered_samples.is_empty()).then(|| total_ms / filtered_samples.len() as f64);

        Self {
            lookback,
            computed_at: now,
            rates: compute_rates(stats, now),
            severity,
            avg_execution_ms,
            sample_count: filtered_samples.len(),
            execution_histogram: execution_count_histogram(filtered_stats.iter().copied()),
            query_type_histogram: query_type_histogram(filtered_stats.iter().copied()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn stat(hash: &str, query: &str, count: u64, last: DateTime<Utc>) -> AggregatedQueryStat {
        AggregatedQueryStat {
            query_hash: hash.into(),
            short_query: query.into(),
            full_query: query.into(),
            execution_count: count,
            avg_time_ms: 10.0,
            total_time_ms: 10.0 * count as f64,
            call_count: count,
            query_type: None,
            last_executed_at: last,
        }
    }

    fn sample(id: i64, ms: f64, at: DateTime<Utc>) -> RawExecutionSample {
        RawExecutionSample {
            sample_id: id,
            query_hash: "h".into(),
            collected_at: at,
            execution_time_ms: ms,
            cpu_usage_percent: 1.0,
            memory_usage_mb: 1.0,
            io_blocks: 0,
            query_text: "SELECT 1".into(),
            database_id: 1,
        }
    }

    // ===== severity =====

    #[test]
    fn severity_boundaries_are_strict() {
        assert_eq!(Severity::classify(3000.0), Severity::Medium);
        assert_eq!(Severity::classify(3001.0), Severity::High);
        assert_eq!(Severity::classify(1500.0), Severity::Low);
        assert_eq!(Severity::classify(1501.0), Severity::Medium);
        assert_eq!(Severity::classify(0.0), Severity::Low);
        assert_eq!(Severity::classify(f64::NAN), Severity::Low);
    }

    // ===== rates =====

    #[test]
    fn rates_use_five_minute_window_when_recent_rows_exist() {
        let t = now();
        let rows = vec![
            stat("a", "SELECT 1", 900, t - Duration::seconds(30)),
            stat("b", "SELECT 2", 600, t - Duration::seconds(200)),
            stat("c", "SELECT 3", 5000, t - Duration::hours(2)),
        ];
        let r = compute_rates(&rows, t);
        assert_eq!(r.basis, RateBasis::Window);
        assert_eq!(r.window_secs, 300);
        assert_eq!(r.tps, 5); // 1500 / 300
        assert_eq!(r.qps, 1); // 2 / 300 floors to 0, clamped to 1
        assert!(!r.is_approximate());
    }

    #[test]
    fn rates_fall_back_to_full_set_over_sixty_seconds() {
        let t = now();
        let old = t - Duration::hours(3);
        // M = 3 rows, E = 250 executions
        let rows = vec![
            stat("a", "SELECT 1", 100, old),
            stat("b", "SELECT 2", 100, old),
            stat("c", "SELECT 3", 50, old),
        ];
        let r = compute_rates(&rows, t);
        assert_eq!(r.basis, RateBasis::Fallback);
        assert!(r.is_approximate());
        assert_eq!(r.window_secs, 60);
        assert_eq!(r.tps, (250 / 60u64).max(1));
        assert_eq!(r.qps, 1);
    }

    #[test]
    fn rates_for_empty_set_are_zero() {
        let rows: Vec<AggregatedQueryStat> = vec![];
        let r = compute_rates(&rows, now());
        assert_eq!(r.basis, RateBasis::NoActivity);
        assert_eq!((r.tps, r.qps), (0, 0));
    }

    #[test]
    fn clamp_rate_only_clamps_positive_counts() {
        assert_eq!(clamp_rate(0, 300), 0);
        assert_eq!(clamp_rate(1, 300), 1);
        assert_eq!(clamp_rate(299, 60), 4);
    }

    // ===== filtering =====

    #[test]
    fn lookback_filter_keeps_inclusive_range() {
        let t = now();
        let samples = vec![
            sample(1, 1.0, t - Duration::hours(1)),
            sample(2, 1.0, t - Duration::hours(1) - Duration::seconds(1)),
            sample(3, 1.0, t),
            sample(4, 1.0, t + Duration::seconds(1)),
        ];
        let kept: Vec<i64> = filter_by_lookback(&samples, Lookback::OneHour, t)
            .iter()
            .map(|s| s.sample_id)
            .collect();
        assert_eq!(kept, vec![1, 3]);
    }

    #[test]
    fn long_lookbacks_do_not_filter() {
        let t = now();
        let samples = vec![sample(1, 1.0, t - Duration::days(30))];
        assert_eq!(filter_by_lookback(&samples, Lookback::OneDay, t).len(), 1);
        assert_eq!(filter_by_lookback(&samples, Lookback::SevenDays, t).len(), 1);
        assert!(filter_by_lookback(&samples, Lookback::SixHours, t).is_empty());
    }

    #[test]
    fn lookback_parses_known_labels() {
        assert_eq!("6h".parse::<Lookback>().unwrap(), Lookback::SixHours);
        assert_eq!("7d".parse::<Lookback>().unwrap(), Lookback::SevenDays);
        assert!("2h".parse::<Lookback>().is_err());
    }

    // ===== query type =====

    #[test]
    fn query_type_uses_leading_keyword() {
        assert_eq!(QueryType::detect("select * from t"), QueryType::Select);
        assert_eq!(QueryType::detect("  \n\tInsert into t values (1)"), QueryType::Insert);
        assert_eq!(
            QueryType::detect("-- refresh\n/* batch */ UPDATE t SET a = 1"),
            QueryType::Update
        );
        assert_eq!(QueryType::detect("(SELECT 1) UNION (SELECT 2)"), QueryType::Select);
        assert_eq!(QueryType::detect("DELETE FROM t"), QueryType::Delete);
        assert_eq!(QueryType::detect("WITH x AS (DELETE FROM t) SELECT 1"), QueryType::Other);
        assert_eq!(QueryType::detect("SELECTED"), QueryType::Other);
        assert_eq!(QueryType::detect(""), QueryType::Other);
    }

    // ===== histograms =====

    #[test]
    fn execution_histogram_uses_fixed_bins() {
        let t = now();
        let rows = vec![
            stat("a", "SELECT 1", 1, t),
            stat("b", "SELECT 1", 3, t),
            stat("c", "SELECT 1", 4, t),
            stat("d", "SELECT 1", 15, t),
            stat("e", "SELECT 1", 16, t),
            stat("f", "SELECT 1", 1000, t),
            stat("g", "SELECT 1", 0, t),
        ];
        let h = execution_count_histogram(&rows);
        let counts: Vec<(&str, u64)> = h.iter().map(|b| (b.key.label(), b.count)).collect();
        assert_eq!(
            counts,
            vec![("1", 1), ("2-3", 1), ("4-7", 1), ("8-15", 1), ("16+", 2)]
        );
    }

    #[test]
    fn query_type_histogram_sorted_by_executions() {
        let t = now();
        let rows = vec![
            stat("a", "SELECT 1", 10, t),
            stat("b", "insert into t values (1)", 40, t),
            stat("c", "SELECT 2", 20, t),
            stat("d", "VACUUM t", 5, t),
        ];
        let h = query_type_histogram(&rows);
        let keys: Vec<(QueryType, u64)> = h.iter().map(|b| (b.key, b.count)).collect();
        assert_eq!(
            keys,
            vec![
                (QueryType::Insert, 40),
                (QueryType::Select, 30),
                (QueryType::Other, 5)
            ]
        );
        assert!(h.len() <= MAX_QUERY_TYPES);
    }

    // ===== summary =====

    #[test]
    fn summary_counts_severity_of_filtered_samples() {
        let t = now();
        let samples = vec![
            sample(1, 100.0, t - Duration::minutes(10)),
            sample(2, 2000.0, t - Duration::minutes(20)),
            sample(3, 5000.0, t - Duration::minutes(30)),
            sample(4, 5000.0, t - Duration::hours(5)),
        ];
        let stats = vec![stat("a", "SELECT 1", 10, t)];
        let s = WindowSummary::compute(&stats, &samples, Lookback::OneHour, t);
        assert_eq!(
            s.severity,
            SeverityCounts {
                low: 1,
                medium: 1,
                high: 1
            }
        );
        assert_eq!(s.sample_count, 3);
        assert!((s.avg_execution_ms.unwrap() - 2366.666).abs() < 0.01);
        assert_eq!(s.rates.basis, RateBasis::Window);
    }
}

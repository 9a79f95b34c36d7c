//! Fixed-length time-bucketed series for live charts.
//!
//! The window never changes length: it is seeded once with `size` buckets and
//! afterwards only shifted by [`TimeSeriesWindow::tick`], which drops the
//! oldest bucket and appends one new bucket.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::metrics::ActivityRecord;

/// Default number of buckets per chart.
pub const DEFAULT_SERIES_SIZE: usize = 12;

/// Maximum relative change applied by seeded jitter.
pub const DEMO_JITTER_RATIO: f64 = 0.1;

// ---------------------------------------------------------------------------
// Granularity
// ---------------------------------------------------------------------------

/// Bucket width of a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    FiveMinutes,
    Hourly,
}

impl Granularity {
    pub fn width(&self) -> Duration {
        match self {
            Granularity::FiveMinutes => Duration::minutes(5),
            Granularity::Hourly => Duration::hours(1),
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn align(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.duration_trunc(self.width()).unwrap_or(ts)
    }

    /// Time from `now` until the next bucket boundary.
    pub fn until_next_boundary(&self, now: DateTime<Utc>) -> Duration {
        self.align(now) + self.width() - now
    }

    fn label_format(&self) -> &'static str {
        match self {
            Granularity::FiveMinutes => "%H:%M",
            Granularity::Hourly => "%H:00",
        }
    }
}

// ---------------------------------------------------------------------------
// Buckets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesBucket {
    pub start: DateTime<Utc>,
    pub label: String,
    pub value: f64,
    /// Value was not computed from live data (carried forward or jittered).
    pub derived: bool,
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// `now` still falls in the newest bucket; nothing changed.
    Unchanged,
    /// Window shifted by one bucket.
    Advanced { value: f64, derived: bool },
}

/// Fallback for ticks whose live recomputation failed.
///
/// Outside demo mode the prior value is carried forward unchanged. Demo mode
/// uses a seeded generator so runs are reproducible.
pub struct Jitter {
    #[cfg(feature = "demo")]
    rng: Option<rand::rngs::StdRng>,
}

impl Jitter {
    pub fn none() -> Self {
        Self {
            #[cfg(feature = "demo")]
            rng: None,
        }
    }

    #[cfg(feature = "demo")]
    pub fn seeded(seed: u64) -> Self {
        use rand::SeedableRng;
        Self {
            rng: Some(rand::rngs::StdRng::seed_from_u64(seed)),
        }
    }

    /// Bounded perturbation of `prev`, never negative.
    pub fn perturb(&mut self, prev: f64) -> f64 {
        #[cfg(feature = "demo")]
        if let Some(rng) = self.rng.as_mut() {
            use rand::Rng;
            let r: f64 = rng.random_range(-DEMO_JITTER_RATIO..=DEMO_JITTER_RATIO);
            return (prev * (1.0 + r)).max(0.0);
        }
        prev
    }
}

impl fmt::Debug for Jitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(feature = "demo")]
        let seeded = self.rng.is_some();
        #[cfg(not(feature = "demo"))]
        let seeded = false;
        f.debug_struct("Jitter").field("seeded", &seeded).finish()
    }
}

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// Fixed-length ordered sequence of time buckets, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesWindow {
    name: &'static str,
    granularity: Granularity,
    size: usize,
    buckets: VecDeque<SeriesBucket>,
}

impl TimeSeriesWindow {
    /// Seeds all buckets ending with the bucket containing `now`.
    ///
    /// `seed_values` is aligned to the newest end: missing leading values are
    /// zero, extra leading values are dropped.
    pub fn initialize(
        name: &'static str,
        granularity: Granularity,
        size: usize,
        seed_values: &[f64],
        now: DateTime<Utc>,
    ) -> Self {
        let size = size.max(1);
        let newest = granularity.align(now);
        let skip = seed_values.len().saturating_sub(size);
        let pad = size.saturating_sub(seed_values.len());
        let values = std::iter::repeat_n(0.0, pad).chain(seed_values[skip..].iter().copied());

        let buckets = values
            .enumerate()
            .map(|(i, value)| {
                let start = newest - granularity.width() * (size - 1 - i) as i32;
                SeriesBucket {
                    start,
                    label: start.format(granularity.label_format()).to_string(),
                    value,
                    derived: false,
                }
            })
            .collect();

        Self {
            name,
            granularity,
            size,
            buckets,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn buckets(&self) -> impl Iterator<Item = &SeriesBucket> {
        self.buckets.iter()
    }

    pub fn newest(&self) -> Option<&SeriesBucket> {
        self.buckets.back()
    }

    pub fn values(&self) -> Vec<f64> {
        self.buckets.iter().map(|b| b.value).collect()
    }

    /// Advances the window if `now` entered a new bucket.
    ///
    /// Repeated calls within the same bucket are no-ops. On failure of the
    /// live value the previous value is passed through `jitter` instead of
    /// failing the chart.
    pub fn tick<E: fmt::Display>(
        &mut self,
        now: DateTime<Utc>,
        latest: Result<f64, E>,
        jitter: &mut Jitter,
    ) -> TickOutcome {
        let start = self.granularity.align(now);
        let prev = self.buckets.back().map(|b| (b.start, b.value));
        if let Some((last_start, _)) = prev {
            if start <= last_start {
                debug!(chart = self.name, bucket = %start, "tick within current bucket");
                return TickOutcome::Unchanged;
            }
        }

        let prev_value = prev.map_or(0.0, |(_, v)| v);
        let (value, derived) = match latest {
            Ok(v) => (v, false),
            Err(e) => {
                let v = jitter.perturb(prev_value);
                warn!(chart = self.name, error = %e, prev = prev_value, value = v,
                    "live value unavailable, deriving from previous bucket");
                (v, true)
            }
        };

        self.buckets.pop_front();
        self.buckets.push_back(SeriesBucket {
            start,
            label: start.format(self.granularity.label_format()).to_string(),
            value,
            derived,
        });
        debug_assert_eq!(self.buckets.len(), self.size);
        debug!(chart = self.name, bucket = %start, value, derived, "chart advanced");
        TickOutcome::Advanced { value, derived }
    }
}

/// Sums executions per bucket for the `size` buckets ending at `now`.
pub fn bucket_executions<R: ActivityRecord>(
    rows: &[R],
    granularity: Granularity,
    size: usize,
    now: DateTime<Utc>,
) -> Vec<f64> {
    let size = size.max(1);
    let width = granularity.width();
    let oldest = granularity.align(now) - width * (size - 1) as i32;
    let mut out = vec![0.0; size];
    for r in rows {
        let t = r.observed_at();
        if t < oldest || t > now {
            continue;
        }
        let idx = ((granularity.align(t) - oldest).num_seconds() / width.num_seconds()) as usize;
        if let Some(slot) = out.get_mut(idx) {
            *slot += r.executions() as f64;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::model::RawExecutionSample;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, s).unwrap()
    }

    fn window(now: DateTime<Utc>) -> TimeSeriesWindow {
        let seed: Vec<f64> = (1..=12).map(f64::from).collect();
        TimeSeriesWindow::initialize("tps", Granularity::FiveMinutes, 12, &seed, now)
    }

    #[test]
    fn initialize_labels_aligned_buckets() {
        let w = window(at(12, 7, 30));
        assert_eq!(w.len(), 12);
        let labels: Vec<&str> = w.buckets().map(|b| b.label.as_str()).collect();
        assert_eq!(labels.first(), Some(&"11:10"));
        assert_eq!(labels.last(), Some(&"12:05"));
        assert_eq!(w.values()[11], 12.0);
    }

    #[test]
    fn initialize_pads_and_truncates_seed() {
        let now = at(12, 0, 0);
        let short = TimeSeriesWindow::initialize("x", Granularity::Hourly, 4, &[7.0], now);
        assert_eq!(short.values(), vec![0.0, 0.0, 0.0, 7.0]);
        let long =
            TimeSeriesWindow::initialize("x", Granularity::Hourly, 2, &[1.0, 2.0, 3.0], now);
        assert_eq!(long.values(), vec![2.0, 3.0]);
    }

    #[test]
    fn tick_shifts_exactly_one_bucket() {
        let mut w = window(at(12, 7, 30));
        let before = w.values();
        let out = w.tick(at(12, 10, 1), Ok::<f64, String>(99.0), &mut Jitter::none());
        assert_eq!(
            out,
            TickOutcome::Advanced {
                value: 99.0,
                derived: false
            }
        );
        let after = w.values();
        assert_eq!(after.len(), before.len());
        assert_eq!(&after[..11], &before[1..]);
        assert_eq!(after[11], 99.0);
        assert_eq!(w.newest().unwrap().label, "12:10");
    }

    #[test]
    fn tick_is_idempotent_within_bucket() {
        let mut w = window(at(12, 7, 30));
        w.tick(at(12, 10, 0), Ok::<f64, String>(1.0), &mut Jitter::none());
        let snapshot = w.clone();
        for s in [5, 30, 59] {
            let out = w.tick(at(12, 14, s), Ok::<f64, String>(50.0), &mut Jitter::none());
            assert_eq!(out, TickOutcome::Unchanged);
        }
        assert_eq!(w, snapshot);
    }

    #[test]
    fn failed_recompute_carries_previous_value() {
        let mut w = window(at(12, 7, 30));
        let out = w.tick(at(12, 10, 0), Err("collector down"), &mut Jitter::none());
        assert_eq!(
            out,
            TickOutcome::Advanced {
                value: 12.0,
                derived: true
            }
        );
        assert!(w.newest().unwrap().derived);
        assert_eq!(w.len(), 12);
    }

    #[cfg(feature = "demo")]
    #[test]
    fn seeded_jitter_is_bounded_and_reproducible() {
        let mut a = Jitter::seeded(42);
        let mut b = Jitter::seeded(42);
        for _ in 0..100 {
            let va = a.perturb(100.0);
            assert_eq!(va, b.perturb(100.0));
            assert!((90.0..=110.0).contains(&va));
        }
    }

    #[test]
    fn bucket_executions_counts_per_bucket() {
        let now = at(12, 7, 0);
        let sample = |m: u32| RawExecutionSample {
            sample_id: 0,
            query_hash: "h".into(),
            collected_at: at(12, m, 0),
            execution_time_ms: 1.0,
            cpu_usage_percent: 0.0,
            memory_usage_mb: 0.0,
            io_blocks: 0,
            query_text: String::new(),
            database_id: 1,
        };
        let rows = vec![sample(6), sample(5), sample(4), sample(0)];
        let v = bucket_executions(&rows, Granularity::FiveMinutes, 3, now);
        assert_eq!(v, vec![0.0, 2.0, 2.0]);
    }

    #[test]
    fn next_boundary_distance() {
        let d = Granularity::FiveMinutes.until_next_boundary(at(12, 7, 30));
        assert_eq!(d.num_seconds(), 150);
        let d = Granularity::Hourly.until_next_boundary(at(12, 0, 0));
        assert_eq!(d.num_seconds(), 3600);
    }
}

//! Dashboard coordinator: load cycles, selection changes, timers and
//! detail sessions over one shared state.
//!
//! Every piece of derived state belongs to one selection generation. A load
//! captures the generation and its cancellation token before fetching; its
//! results are written only if the generation is still current once both
//! feeds have resolved. [`Dashboard::select`] bumps the generation, cancels
//! in-flight fetches and swaps the whole state in one step, so old and new
//! database data never mix.
//!
//! Within one generation, a newer load supersedes an older one still in
//! flight: the older fetch is cancelled and its results are never written.
//! Panel loads are sequenced the same way.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DashboardConfig, DashboardContext};
use crate::error::{FeedState, FetchError};
use crate::explain::{ExplainOrchestrator, ExplainSession, Resolution, run_session};
use crate::metrics::{RATE_WINDOW_SECS, WindowSummary, clamp_rate};
use crate::model::{AggregatedQueryStat, RawExecutionSample};
use crate::reconcile::reconcile;
use crate::series::{Granularity, Jitter, TickOutcome, TimeSeriesWindow, bucket_executions};
use crate::table::QueryTable;
use crate::telemetry::TelemetrySource;

/// Wall-clock source, replaceable in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Result of one load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied { generation: u64, rows: usize },
    /// The selection changed or a newer load started while fetching;
    /// nothing was written.
    Superseded,
}

/// Sequence and cancellation of the latest request of one kind.
#[derive(Debug, Default)]
struct InFlight {
    seq: u64,
    cancel: Option<CancellationToken>,
}

impl InFlight {
    /// Cancels the previous request and registers a new one under `parent`.
    fn begin(&mut self, parent: &CancellationToken) -> (u64, CancellationToken) {
        if let Some(prev) = self.cancel.take() {
            prev.cancel();
        }
        self.seq += 1;
        let token = parent.child_token();
        self.cancel = Some(token.clone());
        (self.seq, token)
    }

    /// True if `seq` is still the latest request; clears its token if so.
    fn finish(&mut self, seq: u64) -> bool {
        if self.seq != seq {
            return false;
        }
        self.cancel = None;
        true
    }
}

#[derive(Debug, Clone, Copy)]
enum RequestKind {
    Feeds,
    Panels,
}

/// What a load captured when it started.
struct LoadTicket {
    generation: u64,
    seq: u64,
    context: DashboardContext,
    cancel: CancellationToken,
}

/// Everything the presentation layer reads.
#[derive(Debug)]
pub struct DashboardState {
    pub context: DashboardContext,
    pub generation: u64,
    pub samples: FeedState<RawExecutionSample>,
    pub stats: FeedState<AggregatedQueryStat>,
    pub table: QueryTable,
    pub summary: Option<WindowSummary>,
    pub throughput: Option<TimeSeriesWindow>,
    pub executions: Option<TimeSeriesWindow>,
    pub top_cpu: FeedState<RawExecutionSample>,
    pub top_memory: FeedState<RawExecutionSample>,
    pub slow: FeedState<RawExecutionSample>,
    pub loaded_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
    feeds: InFlight,
    panels: InFlight,
    jitter: Jitter,
}

impl DashboardState {
    fn new(context: DashboardContext, generation: u64, config: &DashboardConfig) -> Self {
        Self {
            context,
            generation,
            samples: FeedState::Loading,
            stats: FeedState::Loading,
            table: QueryTable::new(config.page_size),
            summary: None,
            throughput: None,
            executions: None,
            top_cpu: FeedState::Loading,
            top_memory: FeedState::Loading,
            slow: FeedState::Loading,
            loaded_at: None,
            cancel: CancellationToken::new(),
            feeds: InFlight::default(),
            panels: InFlight::default(),
            jitter: jitter_for(config),
        }
    }

    /// Writes both feeds and everything derived from them.
    fn apply_feeds(
        &mut self,
        samples: Result<Vec<RawExecutionSample>, FetchError>,
        stats: Result<Vec<AggregatedQueryStat>, FetchError>,
        now: DateTime<Utc>,
        chart_size: usize,
    ) {
        if let Some(state) = FeedState::from_result(samples) {
            self.samples = state;
        }
        if let Some(state) = FeedState::from_result(stats) {
            self.stats = state;
        }
        for (feed, err) in [("samples", self.samples.error()), ("stats", self.stats.error())] {
            if let Some(e) = err {
                warn!(feed, error = %e, database_id = self.context.database_id, "feed degraded");
            }
        }

        self.table
            .set_rows(reconcile(self.stats.rows(), self.samples.rows()));

        if self.stats.is_failed() && self.samples.is_failed() {
            self.summary = None;
        } else {
            self.summary = Some(WindowSummary::compute(
                self.stats.rows(),
                self.samples.rows(),
                self.context.lookback,
                now,
            ));
        }

        if self.throughput.is_none() && !self.stats.is_failed() && !self.stats.is_loading() {
            let seed: Vec<f64> =
                bucket_executions(self.stats.rows(), Granularity::FiveMinutes, chart_size, now)
                    .into_iter()
                    .map(|e| clamp_rate(e as u64, RATE_WINDOW_SECS) as f64)
                    .collect();
            self.throughput = Some(TimeSeriesWindow::initialize(
                "throughput",
                Granularity::FiveMinutes,
                chart_size,
                &seed,
                now,
            ));
        }
        if self.executions.is_none() && !self.samples.is_failed() && !self.samples.is_loading() {
            let seed = bucket_executions(self.samples.rows(), Granularity::Hourly, chart_size, now);
            self.executions = Some(TimeSeriesWindow::initialize(
                "executions",
                Granularity::Hourly,
                chart_size,
                &seed,
                now,
            ));
        }
        self.loaded_at = Some(now);
    }

    fn live_throughput(&self) -> Result<f64, String> {
        match (&self.stats, &self.summary) {
            (FeedState::Failed(e), _) => Err(e.to_string()),
            (_, Some(summary)) => Ok(summary.rates.tps as f64),
            _ => Err("no snapshot loaded".to_string()),
        }
    }

    fn live_executions(&self, now: DateTime<Utc>) -> Result<f64, String> {
        match &self.samples {
            FeedState::Failed(e) => Err(e.to_string()),
            FeedState::Loading => Err("no snapshot loaded".to_string()),
            feed => Ok(bucket_executions(feed.rows(), Granularity::Hourly, 1, now)[0]),
        }
    }
}

#[cfg(feature = "demo")]
fn jitter_for(config: &DashboardConfig) -> Jitter {
    match config.demo {
        Some(demo) => Jitter::seeded(demo.seed),
        None => Jitter::none(),
    }
}

#[cfg(not(feature = "demo"))]
fn jitter_for(_config: &DashboardConfig) -> Jitter {
    Jitter::none()
}

struct Inner {
    source: Arc<dyn TelemetrySource>,
    config: DashboardConfig,
    clock: Clock,
    state: Mutex<DashboardState>,
    explain: Arc<Mutex<ExplainOrchestrator>>,
    explain_cancel: Mutex<Option<CancellationToken>>,
}

impl Inner {
    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Captures the selection and supersedes the previous request of the
    /// same kind.
    fn begin(&self, kind: RequestKind) -> LoadTicket {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        let inflight = match kind {
            RequestKind::Feeds => &mut s.feeds,
            RequestKind::Panels => &mut s.panels,
        };
        let (seq, cancel) = inflight.begin(&s.cancel);
        LoadTicket {
            generation: s.generation,
            seq,
            context: s.context.clone(),
            cancel,
        }
    }

    async fn load(&self) -> LoadOutcome {
        let LoadTicket {
            generation,
            seq,
            context: ctx,
            cancel,
        } = self.begin(RequestKind::Feeds);
        let t0 = Instant::now();
        debug!(generation, seq, database_id = ctx.database_id, lookback = %ctx.lookback, "load cycle started");

        let fetch = async {
            tokio::join!(
                self.source.raw_samples(ctx.database_id),
                self.source
                    .aggregated_stats(ctx.database_id, ctx.lookback.hours()),
            )
        };
        let (samples, stats) = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(generation, seq, "load cycle cancelled");
                return LoadOutcome::Superseded;
            }
            r = fetch => r,
        };

        let now = self.now();
        let mut s = self.state.lock();
        if s.generation != generation || !s.feeds.finish(seq) {
            debug!(generation, seq, current = s.generation, "discarding stale load results");
            return LoadOutcome::Superseded;
        }
        s.apply_feeds(samples, stats, now, self.config.chart_size);
        let rows = s.table.rows().len();
        info!(
            generation,
            database_id = ctx.database_id,
            duration_ms = t0.elapsed().as_millis() as u64,
            rows,
            samples = s.samples.rows().len(),
            samples_state = s.samples.label(),
            stats_state = s.stats.label(),
            "load cycle finished"
        );
        LoadOutcome::Applied { generation, rows }
    }

    async fn load_panels(&self) {
        let LoadTicket {
            generation,
            seq,
            cancel,
            ..
        } = self.begin(RequestKind::Panels);
        let limit = self.config.top_limit;
        let fetch = async {
            tokio::join!(
                self.source.top_cpu(limit),
                self.source.top_memory(limit),
                self.source.slow_queries(self.config.slow_threshold_ms),
            )
        };
        let (cpu, memory, slow) = tokio::select! {
            _ = cancel.cancelled() => return,
            r = fetch => r,
        };

        let mut guard = self.state.lock();
        if guard.generation != generation || !guard.panels.finish(seq) {
            debug!(generation, seq, "discarding stale panel results");
            return;
        }
        let s = &mut *guard;
        for (panel, result, slot) in [
            ("top_cpu", cpu, &mut s.top_cpu),
            ("top_memory", memory, &mut s.top_memory),
            ("slow", slow, &mut s.slow),
        ] {
            if let Some(state) = FeedState::from_result(result) {
                if let Some(e) = state.error() {
                    warn!(panel, error = %e, "panel degraded");
                }
                *slot = state;
            }
        }
    }

    async fn refresh(&self) -> LoadOutcome {
        let (outcome, ()) = tokio::join!(self.load(), self.load_panels());
        outcome
    }

    fn tick_charts(&self, now: DateTime<Utc>) -> (TickOutcome, TickOutcome) {
        let mut s = self.state.lock();
        let throughput = s.live_throughput();
        let executions = s.live_executions(now);
        let DashboardState {
            throughput: tp_window,
            executions: ex_window,
            jitter,
            ..
        } = &mut *s;
        let a = tp_window
            .as_mut()
            .map_or(TickOutcome::Unchanged, |w| w.tick(now, throughput, jitter));
        let b = ex_window
            .as_mut()
            .map_or(TickOutcome::Unchanged, |w| w.tick(now, executions, jitter));
        (a, b)
    }

    fn cancel_explain(&self) {
        if let Some(token) = self.explain_cancel.lock().take() {
            token.cancel();
        }
    }
}

/// Handle to the detail view opened by [`Dashboard::open_detail`].
#[derive(Debug)]
pub struct DetailHandle {
    /// Provisional session as it was when opened.
    pub placeholder: ExplainSession,
    task: JoinHandle<Resolution>,
}

impl DetailHandle {
    /// Waits for the backend result to be applied or discarded.
    pub async fn resolved(self) -> Resolution {
        self.task.await.unwrap_or(Resolution::Discarded)
    }
}

pub struct Dashboard {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dashboard {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        context: DashboardContext,
        config: DashboardConfig,
    ) -> Self {
        Self::with_clock(source, context, config, Arc::new(Utc::now))
    }

    pub fn with_clock(
        source: Arc<dyn TelemetrySource>,
        context: DashboardContext,
        config: DashboardConfig,
        clock: Clock,
    ) -> Self {
        let state = DashboardState::new(context, 0, &config);
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                clock,
                state: Mutex::new(state),
                explain: Arc::new(Mutex::new(ExplainOrchestrator::new())),
                explain_cancel: Mutex::new(None),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.inner.config
    }

    pub fn context(&self) -> DashboardContext {
        self.inner.state.lock().context.clone()
    }

    /// Reads the current state under the lock.
    pub fn read<T>(&self, f: impl FnOnce(&DashboardState) -> T) -> T {
        f(&self.inner.state.lock())
    }

    /// Sort, filter and page interactions on the query table.
    pub fn update_table<T>(&self, f: impl FnOnce(&mut QueryTable) -> T) -> T {
        f(&mut self.inner.state.lock().table)
    }

    /// Fetches both feeds and applies them as one snapshot.
    pub async fn load(&self) -> LoadOutcome {
        self.inner.load().await
    }

    /// Fetches the side panels; each degrades on its own.
    pub async fn load_panels(&self) {
        self.inner.load_panels().await
    }

    /// Feeds and panels together.
    pub async fn refresh(&self) -> LoadOutcome {
        self.inner.refresh().await
    }

    /// Replaces the selection. In-flight fetches are cancelled and all
    /// derived state is dropped; the next load starts from scratch.
    pub fn select(&self, context: DashboardContext) {
        self.inner.cancel_explain();
        self.inner.explain.lock().close();
        let mut s = self.inner.state.lock();
        s.cancel.cancel();
        let generation = s.generation + 1;
        info!(
            generation,
            instance = %context.instance,
            database_id = context.database_id,
            lookback = %context.lookback,
            "selection changed"
        );
        *s = DashboardState::new(context, generation, &self.inner.config);
    }

    /// Advances both charts if `now` entered a new bucket.
    pub fn tick_charts(&self, now: DateTime<Utc>) -> (TickOutcome, TickOutcome) {
        self.inner.tick_charts(now)
    }

    /// Spawns the refresh loop and the aligned chart timers.
    ///
    /// The first refresh runs immediately. Calling `start` twice replaces the
    /// previous timers.
    pub fn start(&self) {
        self.stop_timers();
        let mut tasks = self.tasks.lock();

        let inner = self.inner.clone();
        let period = self.inner.config.refresh_interval;
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                inner.refresh().await;
            }
        }));

        for granularity in [Granularity::FiveMinutes, Granularity::Hourly] {
            let inner = self.inner.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    let wait = granularity
                        .until_next_boundary(inner.now())
                        .to_std()
                        .unwrap_or(Duration::from_secs(1));
                    tokio::time::sleep(wait).await;
                    let (throughput, executions) = inner.tick_charts(inner.now());
                    debug!(?granularity, ?throughput, ?executions, "chart timer fired");
                }
            }));
        }
        info!(
            refresh_secs = period.as_secs(),
            timers = tasks.len(),
            "dashboard started"
        );
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().iter().any(|t| !t.is_finished())
    }

    fn stop_timers(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Stops timers and cancels every in-flight request.
    pub fn shutdown(&self) {
        self.stop_timers();
        self.inner.cancel_explain();
        self.inner.explain.lock().close();
        self.inner.state.lock().cancel.cancel();
        info!("dashboard stopped");
    }

    /// Opens the detail view of the row with `query_hash`.
    ///
    /// The placeholder is available at once; the explain request runs in the
    /// background and supersedes any previous detail session.
    pub fn open_detail(&self, query_hash: &str) -> Option<DetailHandle> {
        let (database_id, row) = {
            let s = self.inner.state.lock();
            let row = s
                .table
                .rows()
                .iter()
                .find(|r| r.query_hash() == query_hash)?
                .clone();
            (s.context.database_id, row)
        };

        let (ticket, placeholder, cancel) = {
            let mut explain = self.inner.explain.lock();
            self.inner.cancel_explain();
            let (ticket, placeholder) = explain.begin(database_id, &row);
            let cancel = CancellationToken::new();
            *self.inner.explain_cancel.lock() = Some(cancel.clone());
            (ticket, placeholder, cancel)
        };
        let task = tokio::spawn(run_session(
            self.inner.explain.clone(),
            self.inner.source.clone(),
            ticket,
            cancel,
        ));
        Some(DetailHandle { placeholder, task })
    }

    /// Current detail session, if a detail view is open.
    pub fn detail(&self) -> Option<ExplainSession> {
        self.inner.explain.lock().current().cloned()
    }

    pub fn close_detail(&self) {
        self.inner.cancel_explain();
        self.inner.explain.lock().close();
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.stop_timers();
        self.inner.cancel_explain();
        self.inner.state.lock().cancel.cancel();
    }
}

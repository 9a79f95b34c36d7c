//! qpulse - headless query-performance dashboard.
//!
//! Drives the analytics core against a collector (or seeded demo data):
//! a live watch loop, one-shot CSV export and explain drill-downs.

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::time::MissedTickBehavior;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use qpulse_core::config::{DashboardConfig, DashboardContext, DemoConfig};
use qpulse_core::dashboard::{Dashboard, LoadOutcome};
use qpulse_core::error::FeedState;
use qpulse_core::explain::ExplainSession;
use qpulse_core::export::export_to_dir;
use qpulse_core::fmt::{FmtStyle, format_ms, format_opt_f64, format_rate, truncate};
use qpulse_core::metrics::Lookback;
use qpulse_core::model::DatabaseId;
use qpulse_core::table::{QueryColumn, SortDirection, SortState};
use qpulse_core::telemetry::{DemoTelemetry, HttpTelemetry, TelemetrySource};

/// Query performance dashboard.
#[derive(Parser)]
#[command(name = "qpulse", about = "Query performance dashboard", version)]
struct Args {
    /// Collector API root.
    #[arg(long, env = "QPULSE_COLLECTOR_URL", default_value = "http://localhost:8080/api", global = true)]
    collector_url: String,

    /// Database id to monitor.
    #[arg(long, env = "QPULSE_DATABASE", default_value_t = 1, global = true)]
    database: DatabaseId,

    /// Instance label shown in logs.
    #[arg(long, env = "QPULSE_INSTANCE", default_value = "default", global = true)]
    instance: String,

    /// Reporting lookback: 1h, 6h, 24h or 7d.
    #[arg(long, env = "QPULSE_LOOKBACK", default_value = "24h", global = true)]
    lookback: Lookback,

    /// Refresh interval in seconds.
    #[arg(long, env = "QPULSE_REFRESH", default_value_t = 30, global = true)]
    refresh: u64,

    /// Rows per table page.
    #[arg(long, env = "QPULSE_PAGE_SIZE", default_value_t = 10, global = true)]
    page_size: usize,

    /// Use seeded synthetic telemetry instead of the collector.
    #[arg(long, env = "QPULSE_DEMO_SEED", global = true)]
    demo_seed: Option<u64>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the live dashboard until Ctrl-C.
    Watch,
    /// Load once and write the query table as CSV.
    Export {
        /// Output directory.
        #[arg(long)]
        out: PathBuf,
        /// Sort column (id, query, count, avg, total, calls, last, cpu, memory, io).
        #[arg(long)]
        sort: Option<String>,
        /// Sort ascending instead of descending.
        #[arg(long)]
        ascending: bool,
    },
    /// Load once and analyse the execution plan of one query.
    Explain {
        #[arg(long)]
        query_hash: String,
    },
}

/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::ERROR
    } else {
        match verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_config(args: &Args) -> anyhow::Result<DashboardConfig> {
    let config = DashboardConfig {
        refresh_interval: Duration::from_secs(args.refresh),
        page_size: args.page_size,
        demo: args.demo_seed.map(|seed| DemoConfig { seed }),
        ..Default::default()
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn build_source(args: &Args, config: &DashboardConfig) -> anyhow::Result<Arc<dyn TelemetrySource>> {
    if let Some(demo) = config.demo {
        info!(seed = demo.seed, "demo mode: using synthetic telemetry");
        return Ok(Arc::new(DemoTelemetry::new(demo.seed)));
    }
    let http = HttpTelemetry::new(&args.collector_url, config.request_timeout)
        .context("failed to build collector client")?;
    info!(url = %http.base_url(), "using collector");
    Ok(Arc::new(http))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = build_config(&args)?;
    let source = build_source(&args, &config)?;
    let context = DashboardContext::new(args.instance.clone(), args.database, args.lookback);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        instance = %context.instance,
        database_id = context.database_id,
        lookback = %context.lookback,
        "qpulse starting"
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(async_main(args.command, source, context, config))
}

async fn async_main(
    command: Command,
    source: Arc<dyn TelemetrySource>,
    context: DashboardContext,
    config: DashboardConfig,
) -> anyhow::Result<()> {
    let dashboard = Dashboard::new(source, context, config);
    match command {
        Command::Watch => watch(&dashboard).await,
        Command::Export {
            out,
            sort,
            ascending,
        } => export(&dashboard, &out, sort.as_deref(), ascending).await,
        Command::Explain { query_hash } => explain(&dashboard, &query_hash).await,
    }
}

async fn watch(dashboard: &Dashboard) -> anyhow::Result<()> {
    dashboard.start();

    let mut report = tokio::time::interval(dashboard.config().refresh_interval);
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // first tick fires immediately, before any data
    report.tick().await;

    loop {
        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r.context("failed to listen for Ctrl-C")?;
                info!("interrupt received");
                break;
            }
            _ = report.tick() => log_summary(dashboard),
        }
    }

    dashboard.shutdown();
    Ok(())
}

fn log_summary(dashboard: &Dashboard) {
    dashboard.read(|s| {
        let Some(summary) = &s.summary else {
            warn!(samples = s.samples.label(), stats = s.stats.label(), "no data yet");
            return;
        };
        let approx = summary.rates.is_approximate();
        info!(
            tps = %format_rate(summary.rates.tps, approx),
            qps = %format_rate(summary.rates.qps, approx),
            high = summary.severity.high,
            medium = summary.severity.medium,
            low = summary.severity.low,
            avg = %format_opt_f64(summary.avg_execution_ms, 1),
            rows = s.table.rows().len(),
            "summary"
        );
        for row in s.table.page_rows() {
            info!(
                hash = %row.stat.query_hash,
                count = row.stat.execution_count,
                avg = %format_ms(row.stat.avg_time_ms, FmtStyle::Compact),
                severity = row.severity.as_str(),
                query = %truncate(&row.stat.short_query, 60),
                "row"
            );
        }
        for (panel, feed) in [("top_cpu", &s.top_cpu), ("top_memory", &s.top_memory), ("slow", &s.slow)] {
            if let FeedState::Failed(e) = feed {
                warn!(panel, error = %e, "panel unavailable");
            }
        }
    });
}

async fn load_once(dashboard: &Dashboard) -> anyhow::Result<()> {
    if dashboard.load().await == LoadOutcome::Superseded {
        bail!("load was superseded");
    }
    dashboard.read(|s| match s.stats.error() {
        Some(e) => Err(anyhow!(
            "{}",
            e.user_message().unwrap_or("could not reach the collector")
        )),
        None => Ok(()),
    })
}

async fn export(
    dashboard: &Dashboard,
    out: &std::path::Path,
    sort: Option<&str>,
    ascending: bool,
) -> anyhow::Result<()> {
    load_once(dashboard).await?;

    if let Some(name) = sort {
        let column =
            QueryColumn::from_name(name).ok_or_else(|| anyhow!("unknown sort column '{}'", name))?;
        let direction = if ascending {
            SortDirection::Ascending
        } else {
            SortDirection::Descending
        };
        dashboard.update_table(|t| t.set_sort(Some(SortState { column, direction })));
    }

    let path = dashboard.read(|s| export_to_dir(out, s.table.visible(), &Local::now()))?;
    println!("{}", path.display());
    Ok(())
}

async fn explain(dashboard: &Dashboard, query_hash: &str) -> anyhow::Result<()> {
    load_once(dashboard).await?;

    let handle = dashboard
        .open_detail(query_hash)
        .ok_or_else(|| anyhow!("no query with hash '{}'", query_hash))?;
    info!(session = handle.placeholder.id, "explain requested");
    handle.resolved().await;

    let session = dashboard
        .detail()
        .ok_or_else(|| anyhow!("detail view closed"))?;
    print_detail(&session);
    dashboard.close_detail();
    Ok(())
}

fn print_detail(session: &ExplainSession) {
    let d = &session.detail;
    println!("query:      {}", d.query);
    println!("hash:       {}", d.query_hash);
    println!("status:     {:?} ({:?})", d.badge, session.phase);
    println!("severity:   {}", d.severity.as_str());
    println!(
        "executions: {}  avg {}  total {}",
        d.execution_count,
        format_ms(d.avg_time_ms, FmtStyle::Detail),
        format_ms(d.total_time_ms, FmtStyle::Detail)
    );
    match &d.resources {
        Some(r) => println!(
            "resources:  cpu {:.1}%  mem {:.1}MB  io {} blocks",
            r.cpu_usage_percent, r.memory_usage_mb, r.io_blocks
        ),
        None => println!("resources:  unavailable"),
    }
    if let Some(mode) = &d.execution_mode {
        println!("mode:       {}", String::from(mode.clone()));
    }
    println!(
        "timing:     execution {}ms  planning {}ms",
        format_opt_f64(d.execution_time_ms, 3),
        format_opt_f64(d.planning_time_ms, 3)
    );
    println!("\n{}\n", d.explain_plan);
    for s in &d.suggestions {
        println!("- {}", s);
    }
}

//! qpulse-core - query-performance analytics for the database dashboard.
//!
//! Provides:
//! - `model` - telemetry records and the reconciled per-query view
//! - `error` - fetch failures and per-feed load state
//! - `telemetry` - collector source abstraction and envelope handling
//! - `reconcile` - joins aggregates with their latest raw sample
//! - `metrics` - time filtering, rates, severity, histograms
//! - `series` - fixed-length bucketed chart windows
//! - `table` - generic sort/filter/paginate engine
//! - `explain` - per drill-down explain sessions
//! - `dashboard` - load cycles, selection, timers
//! - `config` - selection context and tunables
//! - `export` - CSV export
//! - `fmt` - shared formatting helpers
//!
//! With `http` feature (default):
//! - `telemetry::http` - reqwest-backed collector client
//!
//! With `demo` feature (default):
//! - `telemetry::demo` - seeded synthetic telemetry, seeded chart jitter

pub mod config;
pub mod dashboard;
pub mod error;
pub mod explain;
pub mod export;
pub mod fmt;
pub mod metrics;
pub mod model;
pub mod reconcile;
pub mod series;
pub mod table;
pub mod telemetry;

//! Explain sessions: per drill-down execution-plan analysis.
//!
//! Opening a detail view starts a session and immediately yields a
//! provisional detail built from the row already in hand. The backend result
//! (or failure) is applied later, but only while the session is still the
//! current one. A newer session implicitly cancels the previous one and its
//! late result is discarded.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::metrics::Severity;
use crate::model::{DatabaseId, ReconciledQueryView, ResourceUsage};
use crate::telemetry::TelemetrySource;

/// Plan text shown while the analysis is in flight.
pub const PLACEHOLDER_PLAN: &str = "Analyzing execution plan…";

/// Planning time (ms) above which a suggestion is emitted.
const HIGH_PLANNING_MS: f64 = 100.0;

pub type SessionId = u64;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// How the backend analysed the statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExecutionMode {
    /// Statement was executed (`EXPLAIN ANALYZE`).
    Analyze,
    /// Plan estimate only; the statement was not executed.
    EstimateOnly,
    Other(String),
}

impl From<String> for ExecutionMode {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "analyze" | "explain_analyze" | "actual" | "execute" | "live" => ExecutionMode::Analyze,
            "estimate" | "estimate_only" | "explain" | "explain_only" | "plan_only"
            | "dry_run" => ExecutionMode::EstimateOnly,
            _ => ExecutionMode::Other(s),
        }
    }
}

impl From<ExecutionMode> for String {
    fn from(m: ExecutionMode) -> Self {
        match m {
            ExecutionMode::Analyze => "analyze".to_string(),
            ExecutionMode::EstimateOnly => "estimate_only".to_string(),
            ExecutionMode::Other(s) => s,
        }
    }
}

/// Payload of `POST /query-metrics/explain-analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainResponse {
    pub explain_plan: String,
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub execution_time_ms: Option<f64>,
    #[serde(default)]
    pub planning_time_ms: Option<f64>,
}

// ---------------------------------------------------------------------------
// Classification and suggestions
// ---------------------------------------------------------------------------

/// True when any word of the query is a data-mutating keyword.
///
/// Unlike [`crate::metrics::QueryType::detect`] this looks at the whole text, so
/// `WITH ... DELETE` and `EXPLAIN UPDATE ...` are caught too.
pub fn is_data_mutating(query: &str) -> bool {
    query
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|w| {
            w.eq_ignore_ascii_case("UPDATE")
                || w.eq_ignore_ascii_case("INSERT")
                || w.eq_ignore_ascii_case("DELETE")
        })
}

/// Mode the backend is expected to choose for `query`.
pub fn expected_mode(query: &str) -> ExecutionMode {
    if is_data_mutating(query) {
        ExecutionMode::EstimateOnly
    } else {
        ExecutionMode::Analyze
    }
}

/// Suggestions available from row-level data alone.
pub fn severity_suggestions(severity: Severity) -> Vec<String> {
    match severity {
        Severity::High => vec![
            "Average execution time exceeds 3s; prioritize this query for tuning.".to_string(),
        ],
        Severity::Medium => {
            vec!["Average execution time exceeds 1.5s; review its execution plan.".to_string()]
        }
        Severity::Low => Vec::new(),
    }
}

/// Suggestions derived from a plan and its timings.
pub fn plan_suggestions(plan: &str, planning_time_ms: Option<f64>) -> Vec<String> {
    let mut out = Vec::new();
    if plan.contains("Seq Scan") {
        out.push("Sequential scan detected; consider an index on the filtered columns.".to_string());
    }
    if plan.contains("Rows Removed by Filter") {
        out.push("Many rows are discarded by a filter; a more selective index may help.".to_string());
    }
    if plan.contains("Sort Method: external") {
        out.push("Sort spilled to disk; consider raising work_mem.".to_string());
    }
    if plan.contains("Nested Loop") {
        out.push("Nested loop join; check that join columns are indexed.".to_string());
    }
    if planning_time_ms.is_some_and(|ms| ms > HIGH_PLANNING_MS) {
        out.push("High planning time; consider a prepared statement.".to_string());
    }
    out
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainPhase {
    Requested,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBadge {
    Provisional,
    Analyzed,
    Estimated,
    /// Backend reported a mode this client does not recognise.
    Unconfirmed,
    Error,
}

/// Detail view of one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainDetail {
    pub query_hash: String,
    pub query: String,
    pub database_id: DatabaseId,
    /// Built from local data only; backend result not applied yet.
    pub provisional: bool,
    pub execution_count: u64,
    pub call_count: u64,
    pub avg_time_ms: f64,
    pub total_time_ms: f64,
    pub severity: Severity,
    pub resources: Option<ResourceUsage>,
    pub explain_plan: String,
    pub expected_mode: ExecutionMode,
    pub execution_mode: Option<ExecutionMode>,
    pub execution_time_ms: Option<f64>,
    pub planning_time_ms: Option<f64>,
    pub suggestions: Vec<String>,
    pub badge: StatusBadge,
    pub error: Option<String>,
}

impl ExplainDetail {
    /// Placeholder built from the row already in hand.
    pub fn placeholder(database_id: DatabaseId, row: &ReconciledQueryView) -> Self {
        let query = row.stat.query_text().to_string();
        Self {
            query_hash: row.stat.query_hash.clone(),
            expected_mode: expected_mode(&query),
            query,
            database_id,
            provisional: true,
            execution_count: row.stat.execution_count,
            call_count: row.stat.call_count,
            avg_time_ms: row.stat.avg_time_ms,
            total_time_ms: row.stat.total_time_ms,
            severity: row.severity,
            resources: row.resources.clone(),
            explain_plan: PLACEHOLDER_PLAN.to_string(),
            execution_mode: None,
            execution_time_ms: None,
            planning_time_ms: None,
            suggestions: severity_suggestions(row.severity),
            badge: StatusBadge::Provisional,
            error: None,
        }
    }

    fn apply_response(&mut self, resp: ExplainResponse) {
        let mut suggestions = severity_suggestions(self.severity);
        suggestions.extend(plan_suggestions(&resp.explain_plan, resp.planning_time_ms));
        self.badge = match &resp.execution_mode {
            ExecutionMode::Analyze => StatusBadge::Analyzed,
            ExecutionMode::EstimateOnly => StatusBadge::Estimated,
            ExecutionMode::Other(_) if self.expected_mode == ExecutionMode::EstimateOnly => {
                StatusBadge::Estimated
            }
            ExecutionMode::Other(_) => StatusBadge::Unconfirmed,
        };
        self.explain_plan = resp.explain_plan;
        self.execution_mode = Some(resp.execution_mode);
        self.execution_time_ms = resp.execution_time_ms;
        self.planning_time_ms = resp.planning_time_ms;
        self.suggestions = suggestions;
        self.provisional = false;
        self.error = None;
    }

    /// Keeps every locally known field; only plan text and badge change.
    fn apply_failure(&mut self, err: &FetchError) {
        let summary = match err.user_message() {
            Some(msg) => format!("Execution plan unavailable: {}", msg),
            None => "Execution plan unavailable: collector unreachable".to_string(),
        };
        self.explain_plan = summary;
        self.badge = StatusBadge::Error;
        self.provisional = false;
        self.error = Some(err.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainSession {
    pub id: SessionId,
    pub phase: ExplainPhase,
    pub detail: ExplainDetail,
}

/// What the async driver needs to issue the backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainTicket {
    pub session_id: SessionId,
    pub database_id: DatabaseId,
    pub query: String,
    pub expected_mode: ExecutionMode,
}

/// Outcome of delivering a backend result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Applied(ExplainPhase),
    /// Session was superseded or closed; the result was dropped.
    Discarded,
}

/// Holds at most one live session and the id counter.
#[derive(Debug, Default)]
pub struct ExplainOrchestrator {
    next_id: SessionId,
    current: Option<ExplainSession>,
}

impl ExplainOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session for `row`, cancelling any previous one.
    ///
    /// Returns the request ticket together with a copy of the provisional
    /// session, taken before any result can be applied.
    pub fn begin(
        &mut self,
        database_id: DatabaseId,
        row: &ReconciledQueryView,
    ) -> (ExplainTicket, ExplainSession) {
        self.close();
        self.next_id += 1;
        let id = self.next_id;
        let detail = ExplainDetail::placeholder(database_id, row);
        let ticket = ExplainTicket {
            session_id: id,
            database_id,
            query: detail.query.clone(),
            expected_mode: detail.expected_mode.clone(),
        };
        info!(
            session = id,
            query_hash = %detail.query_hash,
            expected_mode = ?ticket.expected_mode,
            "explain session requested"
        );
        let session = ExplainSession {
            id,
            phase: ExplainPhase::Requested,
            detail,
        };
        self.current = Some(session.clone());
        (ticket, session)
    }

    /// Destroys the current session. A still-pending session is returned
    /// in the `Cancelled` phase.
    pub fn close(&mut self) -> Option<ExplainSession> {
        let mut prev = self.current.take()?;
        if prev.phase == ExplainPhase::Requested {
            prev.phase = ExplainPhase::Cancelled;
            debug!(session = prev.id, "explain session cancelled");
        }
        Some(prev)
    }

    pub fn current(&self) -> Option<&ExplainSession> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<SessionId> {
        self.current.as_ref().map(|s| s.id)
    }

    pub fn is_current(&self, id: SessionId) -> bool {
        self.current_id() == Some(id)
    }

    /// Applies a backend result if `id` is still the current, pending session.
    pub fn complete(
        &mut self,
        id: SessionId,
        result: Result<ExplainResponse, FetchError>,
    ) -> Resolution {
        let Some(session) = self.current.as_mut().filter(|s| s.id == id) else {
            debug!(session = id, "discarding result of superseded explain session");
            return Resolution::Discarded;
        };
        if session.phase != ExplainPhase::Requested {
            debug!(session = id, phase = ?session.phase, "explain session already resolved");
            return Resolution::Discarded;
        }

        session.phase = match result {
            Ok(resp) => {
                if session.detail.expected_mode == ExecutionMode::EstimateOnly
                    && resp.execution_mode == ExecutionMode::Analyze
                {
                    warn!(session = id, "backend executed a data-mutating statement");
                }
                info!(session = id, mode = ?resp.execution_mode, "explain session completed");
                session.detail.apply_response(resp);
                ExplainPhase::Completed
            }
            Err(FetchError::Cancelled) => {
                debug!(session = id, "explain request cancelled");
                ExplainPhase::Cancelled
            }
            Err(e) => {
                warn!(session = id, error = %e, "explain session failed");
                session.detail.apply_failure(&e);
                ExplainPhase::Failed
            }
        };
        Resolution::Applied(session.phase)
    }
}

/// Issues the backend call for `ticket` and delivers the result.
///
/// Cancelling `cancel` aborts the in-flight request; the session then
/// resolves as cancelled (or is discarded if already superseded).
pub async fn run_session(
    orchestrator: Arc<Mutex<ExplainOrchestrator>>,
    source: Arc<dyn TelemetrySource>,
    ticket: ExplainTicket,
    cancel: CancellationToken,
) -> Resolution {
    let result = tokio::select! {
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        r = source.explain_analyze(ticket.database_id, &ticket.query) => r,
    };
    orchestrator.lock().complete(ticket.session_id, result)
}

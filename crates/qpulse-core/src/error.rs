//! Fetch failures and per-feed load state.

use thiserror::Error;

/// Failure of a single telemetry or explain request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Transport or HTTP-level failure. Retried only by user action.
    #[error("network failure: {0}")]
    Network(String),
    /// The collector answered with `success: false`.
    #[error("collector rejected request: {message}")]
    BackendRejected { message: String },
    /// A newer selection or request superseded this one.
    #[error("request superseded")]
    Cancelled,
}

impl FetchError {
    /// Message suitable for showing to the user verbatim.
    ///
    /// Only backend rejections carry one; network failures get a generic text
    /// from the presentation layer.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            FetchError::BackendRejected { message } => Some(message),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

/// Load state of one feed or panel.
///
/// `NoData` is a valid empty result and renders as an explicit empty state.
/// `Cancelled` fetches never reach this type.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FeedState<T> {
    #[default]
    Loading,
    Ready(Vec<T>),
    NoData,
    Failed(FetchError),
}

impl<T> FeedState<T> {
    /// Builds the state from a completed fetch. Returns `None` for cancelled
    /// fetches so callers cannot store them by accident.
    pub fn from_result(result: Result<Vec<T>, FetchError>) -> Option<Self> {
        match result {
            Ok(rows) if rows.is_empty() => Some(FeedState::NoData),
            Ok(rows) => Some(FeedState::Ready(rows)),
            Err(FetchError::Cancelled) => None,
            Err(e) => Some(FeedState::Failed(e)),
        }
    }

    /// Rows when ready, an empty slice otherwise.
    pub fn rows(&self) -> &[T] {
        match self {
            FeedState::Ready(rows) => rows,
            _ => &[],
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            FeedState::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, FeedState::Loading)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FeedState::Failed(_))
    }

    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            FeedState::Loading => "loading",
            FeedState::Ready(_) => "ready",
            FeedState::NoData => "no_data",
            FeedState::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_is_no_data_not_failure() {
        let st: FeedState<u32> = FeedState::from_result(Ok(vec![])).unwrap();
        assert_eq!(st, FeedState::NoData);
        assert!(!st.is_failed());
        assert!(st.rows().is_empty());
    }

    #[test]
    fn cancelled_result_is_never_stored() {
        let st: Option<FeedState<u32>> = FeedState::from_result(Err(FetchError::Cancelled));
        assert!(st.is_none());
    }

    #[test]
    fn only_backend_rejection_has_user_message() {
        let rejected = FetchError::BackendRejected {
            message: "database offline".into(),
        };
        assert_eq!(rejected.user_message(), Some("database offline"));
        assert_eq!(FetchError::Network("timeout".into()).user_message(), None);
    }
}

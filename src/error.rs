//! Unified error handling for the ingest pipeline.
//!
//! The engine surfaces one error enum; the HTTP adapter maps it onto status
//! codes and the metrics layer labels counters with `error_code()`.

use crate::db::DbError;
use thiserror::Error;

/// Errors that can occur while reconciling one notification.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Payload failed validation before any state mutation.
    #[error("invalid notification: {0}")]
    Validation(String),

    /// App id failed the format check.
    #[error("invalid app id: {0}")]
    InvalidAppId(String),

    /// Store interaction failed; the transaction was rolled back and the
    /// caller may retry with the same notice_id.
    #[error("store error: {0}")]
    Store(#[from] DbError),

    /// The caller-supplied deadline expired mid-transaction. Everything was
    /// rolled back, including the dedup memo entry.
    #[error("ingest deadline of {0} ms exceeded")]
    DeadlineExceeded(u64),
}

impl IngestError {
    /// Static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InvalidAppId(_) => "invalid_app_id",
            Self::Store(_) => "store",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
        }
    }

    /// Whether the caller should retry the same notification. Retried
    /// notifications carry the same notice_id, so the dedup path absorbs
    /// any half-visible effects of prior attempts.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::DeadlineExceeded(_))
    }
}

/// Outcome of a successfully handled notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Notification was new; all derived mutations committed.
    Accepted,
    /// notice_id was already known; no state changed.
    Duplicate,
    /// Notification was persisted raw but session processing was skipped
    /// (user event missing uid/clientSeq, or unknown event code).
    AcceptedRawOnly,
}

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Transport-level failure talking to the inference service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("missing api key: set CDIFF_API_KEY or OPENAI_API_KEY")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("call timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("empty response from extraction service")]
    EmptyResponse,
    #[error("malformed extraction payload: {0}")]
    MalformedPayload(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Failure of one comparison call. Every variant is recovered with the
/// local field diff.
#[derive(Debug, Error)]
pub enum ComparisonError {
    #[error("empty response from comparison service")]
    EmptyResponse,
    #[error("malformed comparison payload: {0}")]
    MalformedPayload(String),
    #[error("comparison timed out after {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Failure that drops a single comparison task from the report.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("worker pool shut down before the task ran")]
    PoolClosed,
}

/// Run-level failure: nothing downstream of extraction is usable.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("extraction failed for {label}: {source}")]
    Extraction {
        label: String,
        #[source]
        source: ExtractionError,
    },
}

// ── Warnings ──

/// Non-fatal diagnostic reported next to the analysis report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A comparison task failed and was left out of the results.
    TaskDropped { key: String, error: String },
    /// A key repeated within one record set; the last occurrence was kept.
    DuplicateKey {
        label: String,
        key: String,
        occurrences: usize,
    },
}

impl Warning {
    pub fn task_dropped(key: impl Into<String>, error: &TaskError) -> Self {
        Warning::TaskDropped {
            key: key.into(),
            error: error.to_string(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskDropped { key, error } => {
                write!(f, "error processing comparison for '{key}': {error}")
            }
            Self::DuplicateKey {
                label,
                key,
                occurrences,
            } => write!(
                f,
                "key '{key}' appears {occurrences} times in {label}; keeping the last occurrence"
            ),
        }
    }
}

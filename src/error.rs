use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while handing a job to the query service.
///
/// None of these are retried by the engine: a run that fails to submit ends
/// immediately and the caller decides whether to start a fresh run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SubmissionError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("rejected by service (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("submission timed out")]
    Timeout,
}

/// Errors raised by a status check. Distinct from a job whose own status is
/// `FAILED`; these are retried up to the poll budget.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PollError {
    #[error("unknown job handle: {0}")]
    UnknownHandle(String),

    #[error("status service unavailable: {0}")]
    Unavailable(String),

    #[error("status check timed out")]
    Timeout,

    #[error("unreadable status response: {0}")]
    Malformed(String),
}

/// Errors raised while retrieving the results of a succeeded job.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FetchError {
    #[error("results not found for {0}")]
    NotFound(String),

    #[error("result service unavailable: {0}")]
    Unavailable(String),

    #[error("result fetch timed out")]
    Timeout,

    #[error("unreadable result response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be at most {max} seconds")]
    TooLarge { field: &'static str, max: u64 },

    #[error("invalid endpoint: {0}")]
    Endpoint(String),

    #[error("cannot build HTTP client: {0}")]
    Client(String),
}

/// Broad classification of why a run failed, for callers that only need to
/// tell a timeout from a job failure from an infrastructure fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCategory {
    /// The global deadline expired.
    Timeout,
    /// The job itself ended as FAILED or CANCELLED (or an unknown status
    /// treated as failure).
    Job,
    /// Submission, polling or fetching broke down.
    Infrastructure,
    /// The run was cancelled from outside (signal, shutdown).
    Aborted,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCategory::Timeout => write!(f, "Timeout"),
            FailureCategory::Job => write!(f, "Job"),
            FailureCategory::Infrastructure => write!(f, "Infrastructure"),
            FailureCategory::Aborted => write!(f, "Aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_error_display() {
        let err = SubmissionError::Rejected {
            status: 403,
            message: "access denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "rejected by service (status 403): access denied"
        );
        assert_eq!(
            SubmissionError::Malformed("query must not be empty".into()).to_string(),
            "malformed request: query must not be empty"
        );
    }

    #[test]
    fn poll_error_display() {
        assert_eq!(
            PollError::UnknownHandle("q-9".into()).to_string(),
            "unknown job handle: q-9"
        );
        assert_eq!(PollError::Timeout.to_string(), "status check timed out");
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::Zero {
            field: "wait_interval_secs",
        };
        assert_eq!(err.to_string(), "wait_interval_secs must be greater than zero");
        let err = ConfigError::TooLarge {
            field: "global_timeout_secs",
            max: 604_800,
        };
        assert_eq!(err.to_string(), "global_timeout_secs must be at most 604800 seconds");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SubmissionError>();
        assert_send_sync::<PollError>();
        assert_send_sync::<FetchError>();
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::job::{JobHandle, JobStatus, ResultSet, RetryConfig};
use super::state::State;
use crate::error::{FailureCategory, FetchError, PollError, SubmissionError};

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureCause {
    Submission(SubmissionError),
    /// The job reached a terminal status other than SUCCEEDED.
    JobFailed(JobStatus),
    PollBudgetExhausted { attempts: u32, last_error: PollError },
    Fetch(FetchError),
    Timeout,
    Aborted,
    InvalidTransition { state: State, event: String },
}

impl FailureCause {
    pub fn category(&self) -> FailureCategory {
        match self {
            FailureCause::Timeout => FailureCategory::Timeout,
            FailureCause::JobFailed(_) => FailureCategory::Job,
            FailureCause::Aborted => FailureCategory::Aborted,
            FailureCause::Submission(_)
            | FailureCause::PollBudgetExhausted { .. }
            | FailureCause::Fetch(_)
            | FailureCause::InvalidTransition { .. } => FailureCategory::Infrastructure,
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Submission(e) => write!(f, "submission failed: {e}"),
            FailureCause::JobFailed(status) => write!(f, "{status}"),
            FailureCause::PollBudgetExhausted {
                attempts,
                last_error,
            } => write!(f, "status unavailable after {attempts} attempts: {last_error}"),
            FailureCause::Fetch(e) => write!(f, "fetch failed: {e}"),
            FailureCause::Timeout => write!(f, "timeout"),
            FailureCause::Aborted => write!(f, "aborted"),
            FailureCause::InvalidTransition { state, event } => {
                write!(f, "invalid transition: {event} in {state}")
            }
        }
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Success(ResultSet),
    Failure(FailureCause),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// Mutable per-run state, owned by the engine for the lifetime of one run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub state: State,
    pub state_history: Vec<State>,
    pub handle: Option<JobHandle>,
    pub last_status: Option<JobStatus>,
    /// Status checks attempted, failed ones included.
    pub poll_count: u32,
    /// Waiting phases entered.
    pub wait_cycles: u32,
    pub consecutive_poll_failures: u32,
    pub poll_failures: u32,
    pub poll_retry: RetryConfig,
    pub started: Instant,
    pub started_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(poll_retry: RetryConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: State::Submitting,
            state_history: Vec::new(),
            handle: None,
            last_status: None,
            poll_count: 0,
            wait_cycles: 0,
            consecutive_poll_failures: 0,
            poll_failures: 0,
            poll_retry,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

/// Structured audit record produced when a run terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub handle: Option<JobHandle>,
    pub outcome: Outcome,
    pub last_status: Option<JobStatus>,
    pub state_transitions: Vec<State>,
    pub poll_count: u32,
    pub wait_cycles: u32,
    pub poll_failures: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn from_context(ctx: &ExecutionContext, outcome: Outcome) -> Self {
        let mut transitions = ctx.state_history.clone();
        transitions.push(ctx.state);

        Self {
            run_id: ctx.run_id,
            handle: ctx.handle.clone(),
            outcome,
            last_status: ctx.last_status.clone(),
            state_transitions: transitions,
            poll_count: ctx.poll_count,
            wait_cycles: ctx.wait_cycles,
            poll_failures: ctx.poll_failures,
            started_at: ctx.started_at,
            completed_at: Utc::now(),
            duration_ms: ctx.elapsed().as_millis() as u64,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn failure(&self) -> Option<&FailureCause> {
        match &self.outcome {
            Outcome::Failure(cause) => Some(cause),
            Outcome::Success(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_cause_display_and_category() {
        let cause = FailureCause::JobFailed(JobStatus::Failed);
        assert_eq!(cause.to_string(), "FAILED");
        assert_eq!(cause.category(), FailureCategory::Job);

        assert_eq!(FailureCause::Timeout.to_string(), "timeout");
        assert_eq!(FailureCause::Timeout.category(), FailureCategory::Timeout);

        let cause = FailureCause::PollBudgetExhausted {
            attempts: 4,
            last_error: PollError::Timeout,
        };
        assert_eq!(
            cause.to_string(),
            "status unavailable after 4 attempts: status check timed out"
        );
        assert_eq!(cause.category(), FailureCategory::Infrastructure);
        assert_eq!(FailureCause::Aborted.category(), FailureCategory::Aborted);

        let blank = FailureCause::JobFailed(JobStatus::from(" "));
        assert_eq!(blank.to_string(), "UNKNOWN");
    }

    #[test]
    fn new_context_starts_in_submitting() {
        let ctx = ExecutionContext::new(RetryConfig::default());
        assert_eq!(ctx.state, State::Submitting);
        assert!(ctx.handle.is_none());
        assert_eq!(ctx.poll_count, 0);
        assert_eq!(ctx.wait_cycles, 0);
        assert!(ctx.state_history.is_empty());
    }

    #[test]
    fn report_from_context_appends_final_state() {
        let mut ctx = ExecutionContext::new(RetryConfig::default());
        ctx.state_history = vec![State::Submitting];
        ctx.state = State::Failed;
        let report = RunReport::from_context(
            &ctx,
            Outcome::Failure(FailureCause::Submission(SubmissionError::Timeout)),
        );
        assert_eq!(report.state_transitions, vec![State::Submitting, State::Failed]);
        assert!(!report.is_success());
        assert_eq!(
            report.failure().map(FailureCause::category),
            Some(FailureCategory::Infrastructure)
        );
    }

    #[test]
    fn report_serializes_to_json() {
        let mut ctx = ExecutionContext::new(RetryConfig::default());
        ctx.handle = Some(JobHandle::new("q-1"));
        ctx.state = State::Succeeded;
        let report = RunReport::from_context(&ctx, Outcome::Success(ResultSet::default()));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["handle"], "q-1");
        assert_eq!(json["state_transitions"][0], "Succeeded");
    }
}

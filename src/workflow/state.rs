use std::fmt;

use serde::{Deserialize, Serialize};

use super::context::{ExecutionContext, FailureCause, Outcome};
use super::job::{JobHandle, JobStatus, ResultSet};
use super::wait::Interrupt;
use crate::error::{FetchError, PollError, SubmissionError};

/// States of a query run.
///
/// Each run flows through: SUBMITTING → POLLING → DECIDING → (WAITING →
/// POLLING)* → FETCHING → SUCCEEDED, or ends early in FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Submitting,
    Polling,
    Deciding,
    Waiting,
    Fetching,
    Succeeded,
    Failed,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Succeeded | State::Failed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Submitting => write!(f, "SUBMITTING"),
            State::Polling => write!(f, "POLLING"),
            State::Deciding => write!(f, "DECIDING"),
            State::Waiting => write!(f, "WAITING"),
            State::Fetching => write!(f, "FETCHING"),
            State::Succeeded => write!(f, "SUCCEEDED"),
            State::Failed => write!(f, "FAILED"),
        }
    }
}

/// What to do after observing a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Fetch,
    Retry,
    Fail,
}

/// How to treat a status the router does not recognise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownStatusPolicy {
    /// Keep polling; the global deadline bounds the run.
    #[default]
    Retry,
    /// End the run as a job failure.
    Fail,
}

/// Map a status to the next action. Total: anything not known to be
/// terminal keeps the run polling.
pub fn decide(status: &JobStatus) -> Action {
    decide_with(status, UnknownStatusPolicy::Retry)
}

pub fn decide_with(status: &JobStatus, policy: UnknownStatusPolicy) -> Action {
    match status {
        JobStatus::Succeeded => Action::Fetch,
        JobStatus::Failed | JobStatus::Cancelled => Action::Fail,
        JobStatus::Queued | JobStatus::Running => Action::Retry,
        JobStatus::Other(_) => match policy {
            UnknownStatusPolicy::Retry => Action::Retry,
            UnknownStatusPolicy::Fail => Action::Fail,
        },
    }
}

/// Result of performing the work of the current state.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Submitted(JobHandle),
    SubmitFailed(SubmissionError),
    Polled(JobStatus),
    PollFailed(PollError),
    Decided(Action),
    Waited,
    Fetched(ResultSet),
    FetchFailed(FetchError),
    Interrupted(Interrupt),
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::Submitted(_) => "Submitted",
            Event::SubmitFailed(_) => "SubmitFailed",
            Event::Polled(_) => "Polled",
            Event::PollFailed(_) => "PollFailed",
            Event::Decided(_) => "Decided",
            Event::Waited => "Waited",
            Event::Fetched(_) => "Fetched",
            Event::FetchFailed(_) => "FetchFailed",
            Event::Interrupted(_) => "Interrupted",
        }
    }
}

/// The result of evaluating a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Advance to the next state.
    Next(State),
    /// Repeat the current state after a poll failure.
    Retry { state: State, reason: PollError },
    /// The run has reached a terminal state.
    Complete(Outcome),
}

/// Drives an `ExecutionContext` through the run states.
pub struct StateMachine;

impl StateMachine {
    /// Compute and apply the transition caused by `event` in the context's
    /// current state.
    ///
    /// Terminal states accept no events; feeding one, or an event that does
    /// not belong to the current state, fails the run.
    pub fn next(ctx: &mut ExecutionContext, event: Event) -> Transition {
        let transition = match (ctx.state, event) {
            (state, _) if state.is_terminal() => {
                Self::invalid(state, "event after terminal state")
            }
            (_, Event::Interrupted(Interrupt::Timeout)) => {
                Transition::Complete(Outcome::Failure(FailureCause::Timeout))
            }
            (_, Event::Interrupted(Interrupt::Cancelled)) => {
                Transition::Complete(Outcome::Failure(FailureCause::Aborted))
            }

            (State::Submitting, Event::Submitted(handle)) => {
                ctx.handle = Some(handle);
                Transition::Next(State::Polling)
            }
            (State::Submitting, Event::SubmitFailed(e)) => {
                Transition::Complete(Outcome::Failure(FailureCause::Submission(e)))
            }

            (State::Polling, Event::Polled(status)) => {
                ctx.poll_count += 1;
                ctx.consecutive_poll_failures = 0;
                ctx.last_status = Some(status);
                Transition::Next(State::Deciding)
            }
            (State::Polling, Event::PollFailed(e)) => {
                ctx.poll_count += 1;
                Self::handle_poll_failure(ctx, e)
            }

            (State::Deciding, Event::Decided(action)) => match action {
                Action::Retry => {
                    ctx.wait_cycles += 1;
                    Transition::Next(State::Waiting)
                }
                Action::Fetch if ctx.last_status == Some(JobStatus::Succeeded) => {
                    Transition::Next(State::Fetching)
                }
                Action::Fetch => Self::invalid(State::Deciding, "Fetch without SUCCEEDED"),
                Action::Fail => {
                    let status = ctx
                        .last_status
                        .clone()
                        .unwrap_or_else(|| JobStatus::Other("UNKNOWN".into()));
                    Transition::Complete(Outcome::Failure(FailureCause::JobFailed(status)))
                }
            },

            (State::Waiting, Event::Waited) => Transition::Next(State::Polling),

            (State::Fetching, Event::Fetched(rows)) => {
                Transition::Complete(Outcome::Success(rows))
            }
            (State::Fetching, Event::FetchFailed(e)) => {
                Transition::Complete(Outcome::Failure(FailureCause::Fetch(e)))
            }

            (state, event) => Self::invalid(state, event.name()),
        };

        // Apply the transition to the context.
        match &transition {
            Transition::Next(next_state) => {
                ctx.state_history.push(ctx.state);
                ctx.state = *next_state;
            }
            Transition::Retry { state, .. } => {
                // State stays the same; failure counters were already
                // incremented in handle_poll_failure.
                ctx.state_history.push(*state);
            }
            // A finished run keeps its recorded outcome.
            Transition::Complete(_) if ctx.state.is_terminal() => {}
            Transition::Complete(outcome) => {
                ctx.state_history.push(ctx.state);
                ctx.state = match outcome {
                    Outcome::Success(_) => State::Succeeded,
                    Outcome::Failure(_) => State::Failed,
                };
            }
        }

        transition
    }

    fn handle_poll_failure(ctx: &mut ExecutionContext, error: PollError) -> Transition {
        ctx.consecutive_poll_failures += 1;
        ctx.poll_failures += 1;
        if ctx.consecutive_poll_failures <= ctx.poll_retry.max_retries {
            Transition::Retry {
                state: State::Polling,
                reason: error,
            }
        } else {
            Transition::Complete(Outcome::Failure(FailureCause::PollBudgetExhausted {
                attempts: ctx.consecutive_poll_failures,
                last_error: error,
            }))
        }
    }

    fn invalid(state: State, event: &str) -> Transition {
        Transition::Complete(Outcome::Failure(FailureCause::InvalidTransition {
            state,
            event: event.to_string(),
        }))
    }
}

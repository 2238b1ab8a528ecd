use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::context::{ExecutionContext, Outcome, RunReport};
use super::job::{JobHandle, JobRequest, RetryConfig};
use super::state::{Action, Event, State, StateMachine, Transition, UnknownStatusPolicy, decide_with};
use super::wait::{Deadline, Interrupt, WaitPolicy, wait};
use crate::error::{FetchError, PollError, SubmissionError};
use crate::service::QueryService;

/// Timing and retry knobs for a run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub wait: WaitPolicy,
    /// Hard upper bound on a run, measured from submission.
    pub global_timeout: Duration,
    pub poll_retry: RetryConfig,
    /// Bound on each individual service call.
    pub request_timeout: Duration,
    pub unknown_status: UnknownStatusPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait: WaitPolicy::default(),
            global_timeout: Duration::from_secs(300),
            poll_retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(10),
            unknown_status: UnknownStatusPolicy::Retry,
        }
    }
}

/// Receives progress notifications from running jobs.
pub trait RunObserver: Send + Sync {
    fn on_state(&self, _run_id: Uuid, _state: State, _handle: Option<&JobHandle>) {}

    fn on_poll_retry(&self, _run_id: Uuid, _attempt: u32, _max: u32, _reason: &PollError, _delay: Duration) {}
}

/// Drives query runs from submission to a terminal outcome.
pub struct Engine<S> {
    service: Arc<S>,
    config: EngineConfig,
    cancel: CancellationToken,
    observer: Option<Arc<dyn RunObserver>>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
            observer: self.observer.clone(),
        }
    }
}

impl<S: QueryService> Engine<S> {
    pub fn new(service: Arc<S>, config: EngineConfig) -> Self {
        Self {
            service,
            config,
            cancel: CancellationToken::new(),
            observer: None,
        }
    }

    /// Cancelling `token` aborts every run started by this engine.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one request to completion. Always returns a report; failures are
    /// carried in its outcome.
    pub async fn run(&self, request: JobRequest) -> RunReport {
        let ctx = ExecutionContext::new(self.config.poll_retry.clone());
        let span = tracing::info_span!("run", run_id = %ctx.run_id, context = %request.context);
        self.drive(ctx, &request).instrument(span).await
    }

    /// Run several requests concurrently, one task each. Reports come back
    /// in request order.
    pub async fn run_many(&self, requests: Vec<JobRequest>) -> Result<Vec<RunReport>, JoinError>
    where
        S: 'static,
    {
        let tasks: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let engine = self.clone();
                tokio::spawn(async move { engine.run(request).await })
            })
            .collect();

        let mut reports = Vec::with_capacity(tasks.len());
        for task in tasks {
            reports.push(task.await?);
        }
        Ok(reports)
    }

    async fn drive(&self, mut ctx: ExecutionContext, request: &JobRequest) -> RunReport {
        let deadline = Deadline::after(self.config.global_timeout, self.cancel.child_token());
        let mut pending: Option<Event> = None;

        tracing::info!(
            query = %request.query,
            output = %request.output.location(),
            timeout_secs = self.config.global_timeout.as_secs(),
            "submitting query"
        );
        self.notify(&ctx);

        loop {
            let event = match pending.take() {
                Some(event) => event,
                None => self.step(&ctx, request, &deadline).await,
            };

            match StateMachine::next(&mut ctx, event) {
                Transition::Next(state) => {
                    tracing::debug!(%state, "transition");
                    self.notify(&ctx);
                }
                Transition::Retry { reason, .. } => {
                    let attempt = ctx.consecutive_poll_failures;
                    let delay = Duration::from_millis(ctx.poll_retry.delay_for_attempt(attempt));
                    tracing::warn!(
                        attempt,
                        max = ctx.poll_retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "status check failed, retrying"
                    );
                    if let Some(observer) = &self.observer {
                        observer.on_poll_retry(ctx.run_id, attempt, ctx.poll_retry.max_retries, &reason, delay);
                    }
                    if let Err(interrupt) = deadline.guard(sleep(delay)).await {
                        pending = Some(Event::Interrupted(interrupt));
                    }
                }
                Transition::Complete(outcome) => {
                    self.notify(&ctx);
                    return self.finish(&ctx, outcome);
                }
            }
        }
    }

    /// Perform the work of the current state and report what happened.
    async fn step(&self, ctx: &ExecutionContext, request: &JobRequest, deadline: &Deadline) -> Event {
        match ctx.state {
            State::Submitting => self.submit(request, deadline).await,
            State::Polling => {
                if let Err(interrupt) = deadline.check() {
                    return Event::Interrupted(interrupt);
                }
                let Some(handle) = &ctx.handle else {
                    unreachable!("polling is only entered after submission");
                };
                self.poll(handle, deadline).await
            }
            State::Deciding => {
                let action = ctx
                    .last_status
                    .as_ref()
                    .map_or(Action::Retry, |status| decide_with(status, self.config.unknown_status));
                Event::Decided(action)
            }
            State::Waiting => {
                if let Err(interrupt) = deadline.check() {
                    return Event::Interrupted(interrupt);
                }
                match wait(&self.config.wait, ctx.wait_cycles, deadline).await {
                    Ok(_) => Event::Waited,
                    Err(interrupt) => Event::Interrupted(interrupt),
                }
            }
            State::Fetching => {
                let Some(handle) = &ctx.handle else {
                    unreachable!("fetching is only entered after submission");
                };
                self.fetch(handle, deadline).await
            }
            State::Succeeded | State::Failed => {
                unreachable!("the run loop returns on completion")
            }
        }
    }

    async fn submit(&self, request: &JobRequest, deadline: &Deadline) -> Event {
        if let Err(e) = request.validate() {
            return Event::SubmitFailed(e);
        }
        match self
            .call(deadline, self.service.submit(request), SubmissionError::Timeout)
            .await
        {
            Ok(Ok(handle)) => {
                tracing::info!(handle = %handle, "query submitted");
                Event::Submitted(handle)
            }
            Ok(Err(e)) => Event::SubmitFailed(e),
            Err(interrupt) => Event::Interrupted(interrupt),
        }
    }

    async fn poll(&self, handle: &JobHandle, deadline: &Deadline) -> Event {
        match self
            .call(deadline, self.service.get_status(handle), PollError::Timeout)
            .await
        {
            Ok(Ok(status)) => {
                tracing::debug!(handle = %handle, %status, remaining_secs = deadline.remaining().as_secs(), "polled");
                Event::Polled(status)
            }
            Ok(Err(e)) => Event::PollFailed(e),
            Err(interrupt) => Event::Interrupted(interrupt),
        }
    }

    async fn fetch(&self, handle: &JobHandle, deadline: &Deadline) -> Event {
        match self
            .call(deadline, self.service.get_results(handle), FetchError::Timeout)
            .await
        {
            Ok(Ok(rows)) => Event::Fetched(rows),
            Ok(Err(e)) => Event::FetchFailed(e),
            Err(interrupt) => Event::Interrupted(interrupt),
        }
    }

    /// One service call, bounded by both the per-call timeout and the run
    /// deadline.
    async fn call<T, E>(
        &self,
        deadline: &Deadline,
        fut: impl Future<Output = Result<T, E>>,
        on_timeout: E,
    ) -> Result<Result<T, E>, Interrupt> {
        deadline
            .guard(async {
                match tokio::time::timeout(self.config.request_timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(on_timeout),
                }
            })
            .await
    }

    fn notify(&self, ctx: &ExecutionContext) {
        if let Some(observer) = &self.observer {
            observer.on_state(ctx.run_id, ctx.state, ctx.handle.as_ref());
        }
    }

    fn finish(&self, ctx: &ExecutionContext, outcome: Outcome) -> RunReport {
        let report = RunReport::from_context(ctx, outcome);
        match &report.outcome {
            Outcome::Success(rows) => tracing::info!(
                handle = ?report.handle.as_ref().map(JobHandle::as_str),
                rows = rows.len(),
                polls = report.poll_count,
                waits = report.wait_cycles,
                duration_ms = report.duration_ms,
                "run succeeded"
            ),
            Outcome::Failure(cause) => tracing::warn!(
                handle = ?report.handle.as_ref().map(JobHandle::as_str),
                category = %cause.category(),
                %cause,
                polls = report.poll_count,
                waits = report.wait_cycles,
                duration_ms = report.duration_ms,
                "run failed"
            ),
        }
        report
    }
}

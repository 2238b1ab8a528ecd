use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::QueryService;
use crate::error::{FetchError, PollError, SubmissionError};
use crate::workflow::{JobHandle, JobRequest, JobStatus, ResultSet};

type PollStep = Result<JobStatus, PollError>;

/// In-memory query service that replays a fixed status script for every
/// submitted job. Handles are issued as `q-1`, `q-2`, … in submission order.
///
/// Once a job's script runs out, its last entry repeats; an empty script
/// reports RUNNING forever.
#[derive(Debug)]
pub struct ScriptedService {
    script: Vec<PollStep>,
    submit_error: Option<SubmissionError>,
    results: Result<ResultSet, FetchError>,
    latency: Duration,
    next_id: AtomicU32,
    jobs: Mutex<HashMap<JobHandle, VecDeque<PollStep>>>,
    submits: AtomicU32,
    polls: AtomicU32,
    fetches: AtomicU32,
}

impl ScriptedService {
    pub fn new(statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        Self::with_script(statuses.into_iter().map(Ok))
    }

    /// Script that may interleave poll failures with statuses.
    pub fn with_script(script: impl IntoIterator<Item = PollStep>) -> Self {
        Self {
            script: script.into_iter().collect(),
            submit_error: None,
            results: Ok(ResultSet::default()),
            latency: Duration::ZERO,
            next_id: AtomicU32::new(1),
            jobs: Mutex::new(HashMap::new()),
            submits: AtomicU32::new(0),
            polls: AtomicU32::new(0),
            fetches: AtomicU32::new(0),
        }
    }

    pub fn rejecting(mut self, error: SubmissionError) -> Self {
        self.submit_error = Some(error);
        self
    }

    pub fn returning(mut self, results: ResultSet) -> Self {
        self.results = Ok(results);
        self
    }

    pub fn failing_fetch(mut self, error: FetchError) -> Self {
        self.results = Err(error);
        self
    }

    /// Delay applied to every call, to exercise per-call timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn submits(&self) -> u32 {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn next_step(&self, handle: &JobHandle) -> PollStep {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let Some(steps) = jobs.get_mut(handle) else {
            return Err(PollError::UnknownHandle(handle.to_string()));
        };
        match steps.len() {
            0 => Ok(JobStatus::Running),
            1 => steps[0].clone(),
            _ => steps.pop_front().unwrap_or(Ok(JobStatus::Running)),
        }
    }
}

impl Default for ScriptedService {
    fn default() -> Self {
        Self::with_script(Vec::<PollStep>::new())
    }
}

impl QueryService for ScriptedService {
    async fn submit(&self, request: &JobRequest) -> Result<JobHandle, SubmissionError> {
        self.simulate_latency().await;
        self.submits.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.submit_error {
            return Err(e.clone());
        }
        let handle = JobHandle::new(format!("q-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        tracing::debug!(handle = %handle, query = %request.query, "scripted job accepted");
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.clone(), self.script.iter().cloned().collect());
        Ok(handle)
    }

    async fn get_status(&self, handle: &JobHandle) -> Result<JobStatus, PollError> {
        self.simulate_latency().await;
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.next_step(handle)
    }

    async fn get_results(&self, handle: &JobHandle) -> Result<ResultSet, FetchError> {
        self.simulate_latency().await;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(handle)
        {
            return Err(FetchError::NotFound(handle.to_string()));
        }
        self.results.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::OutputDestination;

    fn request() -> JobRequest {
        JobRequest::new("SELECT 1", "db1", OutputDestination::new("results", "guardduty"))
    }

    #[tokio::test]
    async fn handles_are_sequential_and_scripts_independent() {
        let svc = ScriptedService::new([JobStatus::Running, JobStatus::Succeeded]);
        let a = svc.submit(&request()).await.unwrap();
        let b = svc.submit(&request()).await.unwrap();
        assert_eq!(a, JobHandle::new("q-1"));
        assert_eq!(b, JobHandle::new("q-2"));

        assert_eq!(svc.get_status(&a).await.unwrap(), JobStatus::Running);
        assert_eq!(svc.get_status(&a).await.unwrap(), JobStatus::Succeeded);
        assert_eq!(svc.get_status(&b).await.unwrap(), JobStatus::Running);
        assert_eq!(svc.polls(), 3);
    }

    #[tokio::test]
    async fn last_status_repeats() {
        let svc = ScriptedService::new([JobStatus::Failed]);
        let h = svc.submit(&request()).await.unwrap();
        assert_eq!(svc.get_status(&h).await.unwrap(), JobStatus::Failed);
        assert_eq!(svc.get_status(&h).await.unwrap(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn empty_script_runs_forever() {
        let svc = ScriptedService::default();
        let h = svc.submit(&request()).await.unwrap();
        assert_eq!(svc.get_status(&h).await.unwrap(), JobStatus::Running);
    }

    #[tokio::test]
    async fn unknown_handle_is_a_poll_error() {
        let svc = ScriptedService::new([JobStatus::Running]);
        let err = svc.get_status(&JobHandle::new("q-42")).await.unwrap_err();
        assert_eq!(err, PollError::UnknownHandle("q-42".into()));
        let err = svc.get_results(&JobHandle::new("q-42")).await.unwrap_err();
        assert_eq!(err, FetchError::NotFound("q-42".into()));
    }

    #[tokio::test]
    async fn rejecting_service_counts_the_attempt() {
        let svc = ScriptedService::default().rejecting(SubmissionError::Unavailable("quota".into()));
        assert!(svc.submit(&request()).await.is_err());
        assert_eq!(svc.submits(), 1);
    }
}

pub mod client;
pub mod scripted;
pub mod types;

use std::future::Future;

use crate::error::{FetchError, PollError, SubmissionError};
use crate::workflow::{JobHandle, JobRequest, JobStatus, ResultSet};

pub use client::HttpQueryService;
pub use scripted::ScriptedService;

/// The external query execution service a run talks to.
///
/// Implementations must be shareable across concurrent runs; each run only
/// ever addresses its own handle.
pub trait QueryService: Send + Sync {
    /// Start a job. Returns as soon as the service has accepted it.
    fn submit(
        &self,
        request: &JobRequest,
    ) -> impl Future<Output = Result<JobHandle, SubmissionError>> + Send;

    /// Fresh status of a previously submitted job.
    fn get_status(
        &self,
        handle: &JobHandle,
    ) -> impl Future<Output = Result<JobStatus, PollError>> + Send;

    /// Output of a job that has SUCCEEDED.
    fn get_results(
        &self,
        handle: &JobHandle,
    ) -> impl Future<Output = Result<ResultSet, FetchError>> + Send;
}

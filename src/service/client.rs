use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};

use super::QueryService;
use super::types::{QueryExecutionResponse, QueryResultsResponse, StartQueryRequest, StartQueryResponse};
use crate::error::{ConfigError, FetchError, PollError, SubmissionError};
use crate::workflow::{JobHandle, JobRequest, JobStatus, ResultSet};

/// Query service reached over HTTP/JSON. The underlying connection pool is
/// shared by every run using this instance.
#[derive(Debug, Clone)]
pub struct HttpQueryService {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpQueryService {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let base_url = base_url.into();
        let parsed = Url::parse(&base_url).map_err(|_| ConfigError::Endpoint(base_url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Endpoint(base_url));
        }
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: parsed,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // http(s) URLs always have a path, checked in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn queries_url(&self) -> Url {
        self.url(&["queries"])
    }

    fn query_url(&self, handle: &JobHandle) -> Url {
        self.url(&["queries", handle.as_str()])
    }

    fn results_url(&self, handle: &JobHandle) -> Url {
        self.url(&["queries", handle.as_str(), "results"])
    }
}

async fn error_body(response: Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string())
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

impl QueryService for HttpQueryService {
    async fn submit(&self, request: &JobRequest) -> Result<JobHandle, SubmissionError> {
        let body = StartQueryRequest::from(request);
        let response = self
            .authorized(self.client.post(self.queries_url()))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SubmissionError::Timeout
                } else {
                    SubmissionError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if is_transient(status) {
            let message = error_body(response).await;
            return Err(SubmissionError::Unavailable(format!("status {status}: {message}")));
        }
        if !status.is_success() {
            let message = error_body(response).await;
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .json::<StartQueryResponse>()
            .await
            .map_err(|e| SubmissionError::Unavailable(format!("unreadable response: {e}")))?;
        tracing::debug!(handle = %body.query_execution_id, "query accepted");
        Ok(JobHandle::new(body.query_execution_id))
    }

    async fn get_status(&self, handle: &JobHandle) -> Result<JobStatus, PollError> {
        let response = self
            .authorized(self.client.get(self.query_url(handle)))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PollError::Timeout
                } else {
                    PollError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PollError::UnknownHandle(handle.to_string()));
        }
        if !status.is_success() {
            let message = error_body(response).await;
            return Err(PollError::Unavailable(format!("status {status}: {message}")));
        }

        let body = response
            .json::<QueryExecutionResponse>()
            .await
            .map_err(|e| PollError::Malformed(e.to_string()))?;
        if let Some(reason) = &body.status.state_change_reason {
            tracing::debug!(handle = %handle, state = %body.status.state, reason = %reason, "state change reason");
        }
        Ok(JobStatus::from(body.status.state))
    }

    async fn get_results(&self, handle: &JobHandle) -> Result<ResultSet, FetchError> {
        let response = self
            .authorized(self.client.get(self.results_url(handle)))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(handle.to_string()));
        }
        if !status.is_success() {
            let message = error_body(response).await;
            return Err(FetchError::Unavailable(format!("status {status}: {message}")));
        }

        let body = response
            .json::<QueryResultsResponse>()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        Ok(ResultSet::new(body.rows))
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SubmissionError;

/// How the query service encrypts the results it writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum EncryptionMode {
    /// Storage-provider managed keys.
    #[default]
    #[serde(rename = "SSE_S3")]
    S3Managed,
    #[serde(rename = "SSE_KMS")]
    KmsManaged { key_id: Option<String> },
    #[serde(rename = "CSE_KMS")]
    ClientSideKms { key_id: Option<String> },
}

impl EncryptionMode {
    /// Wire name understood by the query service.
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionMode::S3Managed => "SSE_S3",
            EncryptionMode::KmsManaged { .. } => "SSE_KMS",
            EncryptionMode::ClientSideKms { .. } => "CSE_KMS",
        }
    }

    pub fn key_id(&self) -> Option<&str> {
        match self {
            EncryptionMode::S3Managed => None,
            EncryptionMode::KmsManaged { key_id } | EncryptionMode::ClientSideKms { key_id } => {
                key_id.as_deref()
            }
        }
    }
}

/// Where the query service should write its output. Passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDestination {
    pub bucket: String,
    pub key: String,
    #[serde(default)]
    pub encryption: EncryptionMode,
}

impl OutputDestination {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            encryption: EncryptionMode::S3Managed,
        }
    }

    pub fn with_encryption(mut self, encryption: EncryptionMode) -> Self {
        self.encryption = encryption;
        self
    }

    /// `s3://bucket/key`
    pub fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key.trim_start_matches('/'))
    }
}

/// A single query to run: what to execute, against which data source, and
/// where the output goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub query: String,
    pub context: String,
    pub output: OutputDestination,
}

impl JobRequest {
    pub fn new(query: impl Into<String>, context: impl Into<String>, output: OutputDestination) -> Self {
        Self {
            query: query.into(),
            context: context.into(),
            output,
        }
    }

    /// Reject requests the service could never accept, before any call is made.
    pub fn validate(&self) -> Result<(), SubmissionError> {
        if self.query.trim().is_empty() {
            return Err(SubmissionError::Malformed("query must not be empty".into()));
        }
        if self.context.trim().is_empty() {
            return Err(SubmissionError::Malformed("context must not be empty".into()));
        }
        if self.output.bucket.trim().is_empty() {
            return Err(SubmissionError::Malformed(
                "output bucket must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Opaque identifier of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a job as last reported by the query service.
///
/// Parsing never fails: anything the service reports that is not one of the
/// known states is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Other(s) if s.is_empty() => "UNKNOWN",
            JobStatus::Other(s) => s,
        }
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        let s = s.trim();
        match s.to_ascii_uppercase().as_str() {
            "QUEUED" => JobStatus::Queued,
            "RUNNING" => JobStatus::Running,
            "SUCCEEDED" => JobStatus::Succeeded,
            "FAILED" => JobStatus::Failed,
            "CANCELLED" | "CANCELED" => JobStatus::Cancelled,
            _ => JobStatus::Other(s.to_string()),
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        JobStatus::from(s.as_str())
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows returned by a succeeded job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet {
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Configuration for retrying failed status checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Consecutive poll failures tolerated before the run fails.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given retry attempt using exponential backoff.
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_delay_ms.saturating_mul(2u64.pow(exp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: &str, context: &str) -> JobRequest {
        JobRequest::new(query, context, OutputDestination::new("results", "guardduty"))
    }

    #[test]
    fn validate_accepts_well_formed_request() {
        assert!(request("SELECT 1", "db1").validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_query_and_context() {
        assert!(matches!(
            request("   ", "db1").validate(),
            Err(SubmissionError::Malformed(_))
        ));
        assert!(matches!(
            request("SELECT 1", "").validate(),
            Err(SubmissionError::Malformed(_))
        ));
    }

    #[test]
    fn output_location_rendering() {
        let dest = OutputDestination::new("sdl-athena-query-results", "guardduty");
        assert_eq!(dest.location(), "s3://sdl-athena-query-results/guardduty");
        assert_eq!(dest.encryption.as_str(), "SSE_S3");

        let dest = OutputDestination::new("b", "/nested/key");
        assert_eq!(dest.location(), "s3://b/nested/key");
    }

    #[test]
    fn kms_modes_expose_key_id() {
        let mode = EncryptionMode::KmsManaged {
            key_id: Some("alias/results".into()),
        };
        assert_eq!(mode.as_str(), "SSE_KMS");
        assert_eq!(mode.key_id(), Some("alias/results"));
        assert_eq!(EncryptionMode::S3Managed.key_id(), None);
    }

    #[test]
    fn status_parsing_is_total() {
        assert_eq!(JobStatus::from("RUNNING"), JobStatus::Running);
        assert_eq!(JobStatus::from("succeeded"), JobStatus::Succeeded);
        assert_eq!(JobStatus::from("CANCELED"), JobStatus::Cancelled);
        assert_eq!(JobStatus::from("QUEUED"), JobStatus::Queued);
        assert_eq!(
            JobStatus::from("SUSPENDED"),
            JobStatus::Other("SUSPENDED".into())
        );
        assert_eq!(JobStatus::Other("SUSPENDED".into()).to_string(), "SUSPENDED");
    }

    #[test]
    fn unknown_status_is_trimmed_and_never_blank() {
        assert_eq!(JobStatus::from("  paused \n"), JobStatus::Other("paused".into()));
        assert_eq!(JobStatus::from(" running "), JobStatus::Running);
        assert_eq!(JobStatus::from("   "), JobStatus::Other(String::new()));
        assert_eq!(JobStatus::from("").to_string(), "UNKNOWN");
    }

    #[test]
    fn status_serializes_as_wire_string() {
        let json = serde_json::to_string(&JobStatus::Failed).unwrap();
        assert_eq!(json, r#""FAILED""#);
        let parsed: JobStatus = serde_json::from_str(r#""RUNNING""#).unwrap();
        assert_eq!(parsed, JobStatus::Running);
    }

    #[test]
    fn result_set_is_a_plain_row_array() {
        let rs: ResultSet = serde_json::from_str(r#"[{"1":1}]"#).unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.rows[0]["1"], serde_json::json!(1));
    }

    #[test]
    fn retry_config_exponential_backoff() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 1000,
        };
        assert_eq!(config.delay_for_attempt(1), 1000);
        assert_eq!(config.delay_for_attempt(2), 2000);
        assert_eq!(config.delay_for_attempt(3), 4000);
        assert_eq!(config.delay_for_attempt(4), 8000);
    }
}

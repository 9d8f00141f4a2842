use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidValue,

    ValidationInvalidArgument,
    ValidationInvalidJson,

    JobNotFound,
    JobConflict,
    JobAlreadyFailed,
    JobAlreadyRunning,
    JobComplete,

    StepExecutionFailed,

    CaptureDelimiterMissing,
    CaptureArtifactUnreadable,
    CaptureUnrecognizedPolicy,

    InternalIoError,
    InternalJsonError,
    InternalDatabaseError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationInvalidJson => "validation.invalid_json",

            ErrorCode::JobNotFound => "job.not_found",
            ErrorCode::JobConflict => "job.conflict",
            ErrorCode::JobAlreadyFailed => "job.already_failed",
            ErrorCode::JobAlreadyRunning => "job.already_running",
            ErrorCode::JobComplete => "job.complete",

            ErrorCode::StepExecutionFailed => "step.execution_failed",

            ErrorCode::CaptureDelimiterMissing => "capture.delimiter_missing",
            ErrorCode::CaptureArtifactUnreadable => "capture.artifact_unreadable",
            ErrorCode::CaptureUnrecognizedPolicy => "capture.unrecognized_policy",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalDatabaseError => "internal.database_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionFailedDetails {
    pub job_id: String,
    pub step: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelimiterMissingDetails {
    pub begin_delimiter: String,
    pub end_delimiter: String,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn validation_invalid_json(err: serde_json::Error, context: Option<String>) -> Self {
        let details = serde_json::json!({
            "error": err.to_string(),
            "context": context,
        });

        Self::new(ErrorCode::ValidationInvalidJson, "Invalid JSON", details)
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn job_not_found(id: impl Into<String>) -> Self {
        let details = to_details(NotFoundDetails { id: id.into() });
        Self::new(ErrorCode::JobNotFound, "Job not found", details)
            .with_hint("Run 'jobline job list' to see available jobs")
    }

    pub fn job_conflict(id: impl Into<String>) -> Self {
        let id = id.into();
        let message = format!("Job '{}' already exists", id);
        Self::new(ErrorCode::JobConflict, message, to_details(NotFoundDetails { id }))
    }

    pub fn job_already_failed(id: impl Into<String>) -> Self {
        let details = to_details(NotFoundDetails { id: id.into() });
        let mut err = Self::new(
            ErrorCode::JobAlreadyFailed,
            "Job has already failed and will not be retried",
            details,
        )
        .with_hint("Create a new job to run the steps again");
        err.retryable = Some(false);
        err
    }

    pub fn job_already_running(id: impl Into<String>) -> Self {
        let details = to_details(NotFoundDetails { id: id.into() });
        Self::new(ErrorCode::JobAlreadyRunning, "Job is already running", details)
            .with_hint("If the process running it has exited, use 'jobline job abandon <id>'")
    }

    pub fn job_complete(id: impl Into<String>) -> Self {
        let details = to_details(NotFoundDetails { id: id.into() });
        Self::new(ErrorCode::JobComplete, "Job has no remaining steps", details)
    }

    pub fn step_execution_failed(
        job_id: impl Into<String>,
        step: usize,
        exit_code: Option<i32>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(StepExecutionFailedDetails {
            job_id: job_id.into(),
            step,
            exit_code,
            problem: problem.clone(),
        });

        Self::new(ErrorCode::StepExecutionFailed, problem, details)
    }

    pub fn capture_delimiter_missing(
        begin_delimiter: impl Into<String>,
        end_delimiter: impl Into<String>,
    ) -> Self {
        let details = to_details(DelimiterMissingDetails {
            begin_delimiter: begin_delimiter.into(),
            end_delimiter: end_delimiter.into(),
        });

        Self::new(
            ErrorCode::CaptureDelimiterMissing,
            "Output delimiters not found in captured output",
            details,
        )
    }

    pub fn capture_artifact_unreadable(path: impl Into<String>, error: impl Into<String>) -> Self {
        let details = serde_json::json!({
            "path": path.into(),
            "error": error.into(),
        });

        Self::new(
            ErrorCode::CaptureArtifactUnreadable,
            "Step output artifact could not be read",
            details,
        )
    }

    pub fn capture_unrecognized_policy(output: impl Into<String>) -> Self {
        let output = output.into();
        let details = to_details(InvalidArgumentDetails {
            field: "output".to_string(),
            problem: format!("Unrecognized output policy '{}'", output),
            id: None,
            tried: Some(vec![
                "stdout".to_string(),
                "stderr".to_string(),
                "/absolute/path".to_string(),
            ]),
        });

        Self::new(
            ErrorCode::CaptureUnrecognizedPolicy,
            "Unrecognized output policy",
            details,
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = serde_json::json!({
            "error": error.into(),
            "context": context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_database(error: impl Into<String>, context: Option<String>) -> Self {
        let details = serde_json::json!({
            "error": error.into(),
            "context": context,
        });

        Self::new(ErrorCode::InternalDatabaseError, "Database error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::internal_unexpected(message)
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::JobNotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.code == ErrorCode::JobConflict
    }

    /// Step-level failures that turn a running job into a failed one.
    pub fn is_step_failure(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::StepExecutionFailed
                | ErrorCode::CaptureDelimiterMissing
                | ErrorCode::CaptureArtifactUnreadable
                | ErrorCode::CaptureUnrecognizedPolicy
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::internal_database(err.to_string(), None)
    }
}

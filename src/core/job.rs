use serde::{Deserialize, Serialize};
use std::fmt;

use crate::environment::Environment;
use crate::error::{Error, Result};

/// Lifecycle label of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Created,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(JobStatus::Created),
            "running" => Ok(JobStatus::Running),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::validation_invalid_argument(
                "status",
                format!("Unknown job status '{}'", other),
                None,
                Some(vec![
                    "created".to_string(),
                    "running".to_string(),
                    "complete".to_string(),
                    "failed".to_string(),
                ]),
            )),
        }
    }
}

/// The data needed to process a job: an ordered list of steps sharing an
/// environment and a log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<JobStep>,
    #[serde(default, skip_serializing_if = "Environment::is_empty")]
    pub environment: Environment,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub steps_completed: usize,
    #[serde(default)]
    pub status: JobStatus,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

impl Job {
    pub fn is_complete(&self) -> bool {
        self.steps_completed >= self.steps.len()
    }

    /// The first step that has not finished yet.
    ///
    /// Errors with `job.complete` once every step has run; callers check
    /// [`Job::is_complete`] first.
    pub fn current_step(&self) -> Result<&JobStep> {
        self.steps
            .get(self.steps_completed)
            .ok_or_else(|| Error::job_complete(&self.id))
    }

    /// Job-wide environment followed by the current step's environment.
    pub fn current_step_environment(&self) -> Result<Environment> {
        let step = self.current_step()?;
        Ok(Environment::compose(&self.environment, &step.environment))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.check_steps_completed(self.steps_completed)
    }

    /// `0 <= steps_completed <= steps.len()` must hold for every stored job.
    pub(crate) fn check_steps_completed(&self, steps_completed: usize) -> Result<()> {
        if steps_completed > self.steps.len() {
            return Err(Error::validation_invalid_argument(
                "stepsCompleted",
                format!(
                    "stepsCompleted ({}) exceeds the number of steps ({})",
                    steps_completed,
                    self.steps.len()
                ),
                Some(self.id.clone()),
                None,
            ));
        }
        Ok(())
    }
}

/// One stage of a job, run as one container process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStep {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Environment::is_empty")]
    pub environment: Environment,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub begin_delimiter: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub end_delimiter: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub refresh: bool,
}

impl JobStep {
    pub fn uses_delimited_output(&self) -> bool {
        !self.begin_delimiter.is_empty() && !self.end_delimiter.is_empty()
    }
}

/// A window of a job's log starting at `index`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLog {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub index: usize,
    #[serde(default)]
    pub lines: Vec<String>,
}

impl JobLog {
    /// Slice `lines[index..]` out of a full log. Offsets past the end give
    /// an empty window at that offset.
    pub fn window(all: &[String], index: usize) -> Self {
        let lines = all.get(index..).map(<[String]>::to_vec).unwrap_or_default();
        Self { index, lines }
    }
}

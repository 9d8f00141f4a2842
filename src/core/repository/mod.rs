//! Persistence of jobs and their append-only logs.
//!
//! The job manager is the only writer. Implementations serialize writes so a
//! log read while a job runs always sees a prefix of the final log.

mod memory;
mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use crate::error::Result;
use crate::job::{Job, JobLog, JobStatus};

/// Single-field state change applied by [`JobRepository::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobUpdate {
    Status(JobStatus),
    StepsCompleted(usize),
}

impl JobUpdate {
    /// External attribute name the update targets.
    pub fn attribute(&self) -> &'static str {
        match self {
            JobUpdate::Status(_) => "status",
            JobUpdate::StepsCompleted(_) => "stepsCompleted",
        }
    }
}

pub trait JobRepository: Send + Sync {
    /// Every stored job, oldest first.
    fn all(&self) -> Result<Vec<Job>>;

    fn get(&self, job_id: &str) -> Result<Job>;

    /// Fails with `job.conflict` when the id is already stored.
    fn create(&self, job: &Job) -> Result<()>;

    /// Removes the job and its log.
    fn delete(&self, job_id: &str) -> Result<()>;

    fn update(&self, job_id: &str, update: JobUpdate) -> Result<()>;

    /// Log lines from `index` onward.
    fn get_job_log(&self, job_id: &str, index: usize) -> Result<JobLog>;

    fn append_log_line(&self, job_id: &str, line: &str) -> Result<()>;
}

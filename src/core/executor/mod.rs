//! Turning a job's current step into a running process.
//!
//! The manager calls [`StepExecutor::start`], then [`StepExecutor::inspect`]
//! once the step's output is needed, then [`StepExecutor::clean_up`].
//! Per-step bookkeeping (process handles, container names) is kept by the
//! executor, keyed by [`StepKey`], so step definitions stay immutable.

mod container;
mod in_process;

pub use container::ContainerExecutor;
pub use in_process::{InProcessExecutor, StepContext, StepRun};

use std::fmt;
use std::io::{Read, Write};

use crate::defaults::CaptureConfig;
use crate::error::Result;
use crate::job::Job;

pub type StepInput = Box<dyn Read + Send>;
pub type StepOutput = Box<dyn Write + Send>;

pub trait StepExecutor: Send + Sync {
    /// Launch the current step with `stdin` as its input. The executor owns
    /// `stdout` and `stderr` and drops them once the process streams close.
    fn start(&self, job: &Job, stdin: StepInput, stdout: StepOutput, stderr: StepOutput)
        -> Result<()>;

    /// Block until the current step's process exits; errors if it failed.
    fn inspect(&self, job: &Job) -> Result<()>;

    /// Release whatever the current step still holds.
    fn clean_up(&self, job: &Job) -> Result<()>;

    /// Capture settings the executor prepares steps with. Output is read
    /// back with the same settings.
    fn capture(&self) -> &CaptureConfig;
}

/// Identifies one step execution: job id plus step index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepKey {
    pub job_id: String,
    pub step: usize,
}

impl StepKey {
    pub fn current(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            step: job.steps_completed,
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.job_id, self.step)
    }
}

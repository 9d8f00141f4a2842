//! Job lifecycle: create, execute, stream logs, delete.
//!
//! `execute` walks the steps of a stored job one at a time. Each step gets
//! the composed environment and its `source` on stdin; the captured output
//! is appended to the job log and becomes the next step's `source`. The
//! standard stream that is not being captured is streamed into the log while
//! the step runs, so `get_log` can tail a job in progress.

use std::collections::HashSet;
use std::io::{self, Cursor, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::capture::{CaptureMode, OutputCapture};
use crate::error::{Error, Result};
use crate::executor::{StepExecutor, StepOutput};
use crate::job::{Job, JobLog, JobStatus};
use crate::repository::{JobRepository, JobUpdate};

pub struct JobManager {
    repository: Arc<dyn JobRepository>,
    executor: Arc<dyn StepExecutor>,
    active: Mutex<HashSet<String>>,
}

impl JobManager {
    pub fn new(repository: Arc<dyn JobRepository>, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            repository,
            executor,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn list_all(&self) -> Result<Vec<Job>> {
        self.repository.all()
    }

    pub fn get_by_id(&self, job_id: &str) -> Result<Job> {
        self.repository.get(job_id)
    }

    /// Persist a new job. An empty id is replaced with a fresh UUID; the job
    /// always starts `created` with no completed steps.
    pub fn create(&self, mut job: Job) -> Result<Job> {
        if job.id.trim().is_empty() {
            job.id = uuid::Uuid::new_v4().to_string();
        }
        job.steps_completed = 0;
        job.status = JobStatus::Created;

        self.repository.create(&job)?;
        log_status!("job", "Created {} with {} step(s)", job.id, job.steps.len());
        Ok(job)
    }

    /// Run the job's remaining steps to completion or first failure.
    ///
    /// A complete job is left alone. A failed job is never retried, and a job
    /// already executing is rejected.
    pub fn execute(&self, job: &Job) -> Result<()> {
        let stored = self.repository.get(&job.id)?;
        match stored.status {
            JobStatus::Failed => return Err(Error::job_already_failed(&stored.id)),
            JobStatus::Complete => return Ok(()),
            JobStatus::Running => return Err(Error::job_already_running(&stored.id)),
            JobStatus::Created => {}
        }

        let _claim = self.claim(&stored.id)?;
        self.run(stored)
    }

    /// Run [`JobManager::execute`] on its own thread.
    pub fn spawn_execute(self: &Arc<Self>, job: Job) -> JoinHandle<Result<()>> {
        let manager = Arc::clone(self);
        thread::spawn(move || manager.execute(&job))
    }

    pub fn get_log(&self, job: &Job, index: usize) -> Result<JobLog> {
        self.repository.get_job_log(&job.id, index)
    }

    /// Fail a job left `running` by an execution that no longer exists, such
    /// as a process that died mid-run. Jobs executing in this manager are
    /// refused with `job.already_running`.
    pub fn abandon(&self, job: &Job) -> Result<Job> {
        let stored = self.repository.get(&job.id)?;
        if stored.status != JobStatus::Running {
            return Err(Error::validation_invalid_argument(
                "status",
                format!("Only running jobs can be abandoned (job is {})", stored.status),
                Some(stored.id.clone()),
                None,
            ));
        }

        let _claim = self.claim(&stored.id)?;
        let index = stored.steps_completed;
        let cause = Error::step_execution_failed(&stored.id, index, None, "execution abandoned");
        self.fail(&stored, index, cause);
        self.repository.get(&stored.id)
    }

    pub fn delete(&self, job: &Job) -> Result<()> {
        self.repository.delete(&job.id)?;
        log_status!("job", "Deleted {}", job.id);
        Ok(())
    }

    fn run(&self, mut job: Job) -> Result<()> {
        self.repository
            .update(&job.id, JobUpdate::Status(JobStatus::Running))?;
        log_status!("job", "Running {} ({} step(s))", job.id, job.steps.len());

        while !job.is_complete() {
            let index = job.steps_completed;
            if let Err(err) = self.advance(&mut job) {
                return Err(self.fail(&job, index, err));
            }
        }

        self.repository
            .update(&job.id, JobUpdate::Status(JobStatus::Complete))?;
        log_status!("job", "Completed {}", job.id);
        Ok(())
    }

    /// Run the current step and move `job` on to the next one.
    fn advance(&self, job: &mut Job) -> Result<()> {
        let index = job.steps_completed;
        let output = self.run_step(job)?;

        for line in output.lines() {
            self.repository.append_log_line(&job.id, line)?;
        }
        if let Some(next) = job.steps.get_mut(index + 1) {
            next.source = output;
        }

        self.executor.clean_up(job)?;

        job.steps_completed = index + 1;
        self.repository
            .update(&job.id, JobUpdate::StepsCompleted(job.steps_completed))?;
        Ok(())
    }

    fn run_step(&self, job: &Job) -> Result<String> {
        let step = job.current_step()?;
        let capture = OutputCapture::for_step(step, self.executor.capture())?;
        log_status!(
            "job",
            "{} step {}/{}: {}",
            job.id,
            job.steps_completed + 1,
            job.steps.len(),
            step.name
        );

        let captured = CaptureBuffer::default();
        let to_capture: StepOutput = Box::new(captured.clone());
        let to_log: StepOutput = Box::new(self.log_writer(job));
        let (stdout, stderr) = match capture.mode {
            CaptureMode::Stdout => (to_capture, to_log),
            CaptureMode::Stderr => (to_log, to_capture),
            CaptureMode::Artifact { .. } => {
                let second: StepOutput = Box::new(self.log_writer(job));
                (to_log, second)
            }
        };
        let stdin = Box::new(Cursor::new(step.source.clone().into_bytes()));

        self.executor.start(job, stdin, stdout, stderr)?;
        self.executor.inspect(job)?;

        capture.collect(&captured.contents()?)
    }

    /// Record a step failure and hand back the error that caused it.
    fn fail(&self, job: &Job, index: usize, err: Error) -> Error {
        if let Err(cleanup) = self.executor.clean_up(job) {
            log_status!("job", "Cleanup after failure of {} failed: {}", job.id, cleanup);
        }

        let name = job.steps.get(index).map(|s| s.name.as_str()).unwrap_or("");
        let line = format!("step {} ({}) failed: {}", index, name, err.message);
        let recorded = self
            .repository
            .append_log_line(&job.id, &line)
            .and_then(|_| {
                self.repository
                    .update(&job.id, JobUpdate::Status(JobStatus::Failed))
            });
        if let Err(store) = recorded {
            log_status!("job", "Could not record failure of {}: {}", job.id, store);
        }

        log_status!("job", "{}", line);
        err
    }

    fn log_writer(&self, job: &Job) -> LogWriter {
        LogWriter {
            repository: Arc::clone(&self.repository),
            job_id: job.id.clone(),
            pending: Vec::new(),
        }
    }

    fn claim(&self, job_id: &str) -> Result<ExecutionClaim<'_>> {
        let mut active = self.active_jobs()?;
        if !active.insert(job_id.to_string()) {
            return Err(Error::job_already_running(job_id));
        }
        Ok(ExecutionClaim {
            manager: self,
            job_id: job_id.to_string(),
        })
    }

    fn active_jobs(&self) -> Result<MutexGuard<'_, HashSet<String>>> {
        self.active
            .lock()
            .map_err(|_| Error::internal_unexpected("active job set lock poisoned"))
    }
}

/// Marks a job as executing in this manager until dropped.
struct ExecutionClaim<'a> {
    manager: &'a JobManager,
    job_id: String,
}

impl Drop for ExecutionClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.manager.active_jobs() {
            active.remove(&self.job_id);
        }
    }
}

/// Shared buffer for the captured standard stream.
#[derive(Clone, Default)]
struct CaptureBuffer(Arc<Mutex<Vec<u8>>>);

impl CaptureBuffer {
    fn contents(&self) -> Result<Vec<u8>> {
        self.0
            .lock()
            .map(|buf| buf.clone())
            .map_err(|_| Error::internal_unexpected("capture buffer lock poisoned"))
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| io::Error::other("capture buffer lock poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Appends each complete line written to it to the job log.
struct LogWriter {
    repository: Arc<dyn JobRepository>,
    job_id: String,
    pending: Vec<u8>,
}

impl LogWriter {
    fn append(&self, raw: &[u8]) -> io::Result<()> {
        let line = String::from_utf8_lossy(raw);
        let line = line.strip_suffix('\r').unwrap_or(&line);
        self.repository
            .append_log_line(&self.job_id, line)
            .map_err(io::Error::other)
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.append(&line[..line.len() - 1])?;
        }
        Ok(buf.len())
    }

    /// Emits a trailing partial line.
    fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let line = std::mem::take(&mut self.pending);
        self.append(&line)
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log_status!("job", "Dropped log output for {}: {}", self.job_id, e);
        }
    }
}

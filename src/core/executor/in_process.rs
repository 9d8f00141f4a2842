use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use super::{StepExecutor, StepInput, StepKey, StepOutput};
use crate::capture::OutputCapture;
use crate::defaults::CaptureConfig;
use crate::error::{Error, Result};
use crate::job::{Job, JobStep};

/// What a step handler sees.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub job_id: String,
    pub index: usize,
    pub step: JobStep,
    /// Composed `VARIABLE=VALUE` environment.
    pub environment: Vec<String>,
    pub input: String,
    /// Host file to write when the step captures an artifact.
    pub artifact: Option<PathBuf>,
}

/// Streams and exit code produced by a step handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl StepRun {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into(),
            ..Default::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Default::default()
        }
    }
}

type Handler = dyn Fn(&StepContext) -> Result<StepRun> + Send + Sync;

/// Runs steps as Rust closures on worker threads instead of containers.
pub struct InProcessExecutor {
    handler: Arc<Handler>,
    capture: CaptureConfig,
    running: Mutex<HashMap<StepKey, JoinHandle<Result<StepRun>>>>,
}

impl InProcessExecutor {
    pub fn new<F>(capture: CaptureConfig, handler: F) -> Self
    where
        F: Fn(&StepContext) -> Result<StepRun> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            capture,
            running: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> Result<MutexGuard<'_, HashMap<StepKey, JoinHandle<Result<StepRun>>>>> {
        self.running
            .lock()
            .map_err(|_| Error::internal_unexpected("executor step table lock poisoned"))
    }
}

impl StepExecutor for InProcessExecutor {
    fn start(
        &self,
        job: &Job,
        mut stdin: StepInput,
        mut stdout: StepOutput,
        mut stderr: StepOutput,
    ) -> Result<()> {
        let key = StepKey::current(job);
        let step = job.current_step()?.clone();
        let capture = OutputCapture::for_step(&step, &self.capture)?;

        let mut input = String::new();
        stdin
            .read_to_string(&mut input)
            .map_err(|e| Error::internal_io(e.to_string(), Some("read step input".to_string())))?;

        let context = StepContext {
            job_id: key.job_id.clone(),
            index: key.step,
            environment: job.current_step_environment()?.stringify(),
            artifact: capture.artifact_path().map(PathBuf::from),
            step,
            input,
        };

        let handler = Arc::clone(&self.handler);
        let handle = thread::spawn(move || {
            let run = handler(&context)?;
            let write = |out: &mut StepOutput, text: &str| {
                out.write_all(text.as_bytes())
                    .and_then(|_| out.flush())
                    .map_err(|e| Error::internal_io(e.to_string(), Some("write step output".to_string())))
            };
            write(&mut stdout, &run.stdout)?;
            write(&mut stderr, &run.stderr)?;
            Ok(run)
        });

        self.table()?.insert(key, handle);
        Ok(())
    }

    fn inspect(&self, job: &Job) -> Result<()> {
        let key = StepKey::current(job);
        let handle = self.table()?.remove(&key).ok_or_else(|| {
            Error::step_execution_failed(&key.job_id, key.step, None, "step was not started")
        })?;

        let run = handle
            .join()
            .map_err(|_| Error::step_execution_failed(&key.job_id, key.step, None, "step panicked"))??;

        if run.exit_code != 0 {
            return Err(Error::step_execution_failed(
                &key.job_id,
                key.step,
                Some(run.exit_code),
                format!("step exited with code {}", run.exit_code),
            ));
        }
        Ok(())
    }

    fn clean_up(&self, job: &Job) -> Result<()> {
        // Handlers are not cancellable; wait for a stray one so it cannot
        // outlive the job's execution.
        if let Some(handle) = self.table()?.remove(&StepKey::current(job)) {
            let _ = handle.join();
        }
        Ok(())
    }

    fn capture(&self) -> &CaptureConfig {
        &self.capture
    }
}

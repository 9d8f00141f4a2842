// Container execution through the docker CLI

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use super::{StepExecutor, StepInput, StepKey, StepOutput};
use crate::capture::{CaptureMode, OutputCapture};
use crate::defaults::{CaptureConfig, ExecutorConfig};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::utils::{io as file_io, shell};

/// Bookkeeping for one launched step.
struct RunningStep {
    container: String,
    child: Option<Child>,
    pumps: Vec<JoinHandle<io::Result<u64>>>,
    artifact: Option<PathBuf>,
}

/// Runs each step as `docker run -i <image>`, where the image is the step's
/// name.
pub struct ContainerExecutor {
    config: ExecutorConfig,
    capture: CaptureConfig,
    running: Mutex<HashMap<StepKey, RunningStep>>,
}

impl ContainerExecutor {
    pub fn new(config: ExecutorConfig, capture: CaptureConfig) -> Self {
        Self {
            config,
            capture,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Container name assigned to a step that has been started and not yet
    /// cleaned up.
    pub fn container_name(&self, key: &StepKey) -> Option<String> {
        self.table()
            .ok()?
            .get(key)
            .map(|running| running.container.clone())
    }

    fn artifact_in_use(&self, path: &Path, except: &StepKey) -> Result<bool> {
        Ok(self.table()?.iter().any(|(key, running)| {
            key != except && running.artifact.as_deref() == Some(path)
        }))
    }

    fn table(&self) -> Result<MutexGuard<'_, HashMap<StepKey, RunningStep>>> {
        self.running
            .lock()
            .map_err(|_| Error::internal_unexpected("executor step table lock poisoned"))
    }

    /// Arguments for `docker run`, without the binary itself.
    pub(crate) fn run_args(
        &self,
        job: &Job,
        container: &str,
        capture: &OutputCapture,
    ) -> Result<Vec<String>> {
        let step = job.current_step()?;
        if step.name.trim().is_empty() {
            return Err(Error::validation_invalid_argument(
                "name",
                "Step name must name the image to run",
                Some(job.id.clone()),
                None,
            ));
        }

        let mut args = vec![
            "run".to_string(),
            "-i".to_string(),
            "--name".to_string(),
            container.to_string(),
        ];

        for var in job.current_step_environment()?.stringify() {
            args.push("-e".to_string());
            args.push(var);
        }

        if let (CaptureMode::Artifact { container_path }, Some(host)) =
            (&capture.mode, capture.artifact_path())
        {
            args.push("-v".to_string());
            args.push(format!("{}:{}", host.display(), container_path));
        }

        if step.refresh {
            args.push("--pull".to_string());
            args.push("always".to_string());
        }

        args.push(step.name.clone());
        Ok(args)
    }

    fn remove_container(&self, key: &StepKey, container: &str) -> Result<()> {
        let output = Command::new(&self.config.docker_binary)
            .args(["rm", "-f", container])
            .output()
            .map_err(|e| {
                Error::step_execution_failed(
                    &key.job_id,
                    key.step,
                    None,
                    format!("failed to remove container {}: {}", container, e),
                )
            })?;

        if !output.status.success() {
            return Err(Error::step_execution_failed(
                &key.job_id,
                key.step,
                output.status.code(),
                format!(
                    "failed to remove container {}: {}",
                    container,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        log_status!("executor", "Removed container {}", container);
        Ok(())
    }
}

/// `jobline-<job id>-<step>-<suffix>`, with characters docker rejects in
/// container names replaced by `-`.
fn new_container_name(key: &StepKey) -> String {
    let job_id: String = key
        .job_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("jobline-{}-{}-{}", job_id, key.step, &suffix[..8])
}

fn pump<R, W>(mut from: R, mut to: W) -> JoinHandle<io::Result<u64>>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        let copied = io::copy(&mut from, &mut to)?;
        to.flush()?;
        Ok(copied)
    })
}

impl StepExecutor for ContainerExecutor {
    fn start(
        &self,
        job: &Job,
        stdin: StepInput,
        stdout: StepOutput,
        stderr: StepOutput,
    ) -> Result<()> {
        let key = StepKey::current(job);
        let step = job.current_step()?;
        let capture = OutputCapture::for_step(step, &self.capture)?;

        // Identical sources share a host file; leave it alone while another
        // step is using it.
        if let Some(host) = capture.artifact_path() {
            if !self.artifact_in_use(host, &key)? {
                file_io::touch_file(host, "prepare step artifact")?;
            }
        }

        let container = new_container_name(&key);
        let args = self.run_args(job, &container, &capture)?;

        log_status!(
            "executor",
            "Starting {}: {}",
            key,
            shell::command_line(&self.config.docker_binary, &args)
        );

        let mut child = Command::new(&self.config.docker_binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::step_execution_failed(
                    &key.job_id,
                    key.step,
                    None,
                    format!("failed to launch {}: {}", self.config.docker_binary, e),
                )
            })?;

        let mut pumps = Vec::with_capacity(3);
        if let Some(child_stdin) = child.stdin.take() {
            pumps.push(pump(stdin, child_stdin));
        }
        if let Some(child_stdout) = child.stdout.take() {
            pumps.push(pump(child_stdout, stdout));
        }
        if let Some(child_stderr) = child.stderr.take() {
            pumps.push(pump(child_stderr, stderr));
        }

        self.table()?.insert(
            key,
            RunningStep {
                container,
                child: Some(child),
                pumps,
                artifact: capture.artifact_path().map(PathBuf::from),
            },
        );
        Ok(())
    }

    fn inspect(&self, job: &Job) -> Result<()> {
        let key = StepKey::current(job);
        let (child, pumps, container) = {
            let mut table = self.table()?;
            let running = table.get_mut(&key).ok_or_else(|| {
                Error::step_execution_failed(&key.job_id, key.step, None, "step was not started")
            })?;
            (
                running.child.take(),
                std::mem::take(&mut running.pumps),
                running.container.clone(),
            )
        };

        let mut child = child.ok_or_else(|| {
            Error::step_execution_failed(&key.job_id, key.step, None, "step was already inspected")
        })?;

        let status = child.wait().map_err(|e| {
            Error::step_execution_failed(
                &key.job_id,
                key.step,
                None,
                format!("failed to wait for {}: {}", container, e),
            )
        })?;

        for handle in pumps {
            match handle.join() {
                Ok(Ok(_)) => {}
                // The process may exit without reading all of its input.
                Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => {
                    return Err(Error::step_execution_failed(
                        &key.job_id,
                        key.step,
                        status.code(),
                        format!("stream copy failed for {}: {}", container, e),
                    ))
                }
                Err(_) => {
                    return Err(Error::internal_unexpected("stream copy thread panicked"));
                }
            }
        }

        if !status.success() {
            return Err(Error::step_execution_failed(
                &key.job_id,
                key.step,
                status.code(),
                format!("container {} exited with {}", container, status),
            ));
        }

        log_status!("executor", "{} finished ({})", key, container);
        Ok(())
    }

    fn clean_up(&self, job: &Job) -> Result<()> {
        let key = StepKey::current(job);
        let Some(mut running) = self.table()?.remove(&key) else {
            return Ok(());
        };

        if let Some(mut child) = running.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }

        if self.config.remove_containers {
            self.remove_container(&key, &running.container)?;
        }

        if let Some(path) = &running.artifact {
            if !self.artifact_in_use(path, &key)? {
                file_io::remove_file_if_exists(path, "remove step artifact")?;
            }
        }
        Ok(())
    }

    fn capture(&self) -> &CaptureConfig {
        &self.capture
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvVar;
    use crate::job::JobStep;

    fn executor() -> ContainerExecutor {
        ContainerExecutor::new(
            ExecutorConfig::default(),
            CaptureConfig {
                artifact_root: "/var/tmp/jobline".to_string(),
                ..Default::default()
            },
        )
    }

    fn job(step: JobStep) -> Job {
        Job {
            id: "j1".to_string(),
            steps: vec![step],
            environment: vec![EnvVar::new("SCOPE", "job")].into(),
            ..Default::default()
        }
    }

    #[test]
    fn run_args_pass_composed_environment() {
        let exec = executor();
        let job = job(JobStep {
            name: "alpine:3.20".to_string(),
            environment: vec![EnvVar::new("SCOPE", "step")].into(),
            ..Default::default()
        });
        let capture = OutputCapture::for_step(&job.steps[0], &exec.capture).unwrap();

        let args = exec.run_args(&job, "c1", &capture).unwrap();
        assert_eq!(
            args,
            vec!["run", "-i", "--name", "c1", "-e", "SCOPE=job", "-e", "SCOPE=step", "alpine:3.20"]
        );
    }

    #[test]
    fn run_args_mount_artifact_and_pull_on_refresh() {
        let exec = executor();
        let job = job(JobStep {
            name: "alpine".to_string(),
            source: "payload".to_string(),
            output: "/out/result".to_string(),
            refresh: true,
            ..Default::default()
        });
        let capture = OutputCapture::for_step(&job.steps[0], &exec.capture).unwrap();
        let host = capture.artifact_path().unwrap().display().to_string();

        let args = exec.run_args(&job, "c1", &capture).unwrap();
        let mount = format!("{}:/out/result", host);
        assert!(args.windows(2).any(|w| w[0] == "-v" && w[1] == mount));
        assert!(args.windows(2).any(|w| w[0] == "--pull" && w[1] == "always"));
        assert_eq!(args.last().unwrap(), "alpine");
    }

    #[test]
    fn run_args_require_image_name() {
        let exec = executor();
        let job = job(JobStep::default());
        let capture = OutputCapture::for_step(&job.steps[0], &exec.capture).unwrap();

        assert!(exec.run_args(&job, "c1", &capture).is_err());
    }

    #[test]
    fn clean_up_without_start_is_noop() {
        let exec = executor();
        let job = job(JobStep {
            name: "alpine".to_string(),
            ..Default::default()
        });
        exec.clean_up(&job).unwrap();
        assert!(exec.container_name(&StepKey::current(&job)).is_none());
    }

    #[test]
    fn inspect_without_start_fails() {
        let exec = executor();
        let job = job(JobStep {
            name: "alpine".to_string(),
            ..Default::default()
        });
        let err = exec.inspect(&job).unwrap_err();
        assert_eq!(err.code.as_str(), "step.execution_failed");
    }

    #[test]
    fn container_name_replaces_rejected_characters() {
        let key = StepKey {
            job_id: "team/build #1".to_string(),
            step: 2,
        };
        let name = new_container_name(&key);

        assert!(name.starts_with("jobline-team-build--1-2-"));
        assert_eq!(name.len(), "jobline-team-build--1-2-".len() + 8);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')));
    }

    /// Stands in for the docker CLI. The last argument picks the behaviour.
    #[cfg(unix)]
    const FAKE_DOCKER: &str = r#"#!/bin/sh
if [ "$1" = "rm" ]; then
  echo "$3" >> "$(dirname "$0")/removed"
  exit 0
fi
host=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-v" ]; then host="${arg%%:*}"; fi
  prev="$arg"
  image="$arg"
done
case "$image" in
  fail) echo boom >&2; exit 3 ;;
  ignore) exit 0 ;;
  artifact) tr a-z A-Z > "$host"; echo wrote ;;
  *) echo progress >&2; tr a-z A-Z ;;
esac
"#;

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use crate::defaults::MissingDelimiter;
        use crate::manager::JobManager;
        use crate::repository::MemoryRepository;
        use std::io::Cursor;
        use std::os::unix::fs::PermissionsExt;
        use std::sync::{Arc, Mutex};
        use tempfile::{tempdir, TempDir};

        #[derive(Clone, Default)]
        struct Shared(Arc<Mutex<Vec<u8>>>);

        impl Shared {
            fn text(&self) -> String {
                String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
            }
        }

        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        fn scripted_executor(dir: &TempDir) -> ContainerExecutor {
            let script = dir.path().join("docker");
            std::fs::write(&script, FAKE_DOCKER).unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

            ContainerExecutor::new(
                ExecutorConfig {
                    docker_binary: script.display().to_string(),
                    remove_containers: true,
                },
                CaptureConfig {
                    artifact_root: dir.path().display().to_string(),
                    missing_delimiter: MissingDelimiter::Fail,
                },
            )
        }

        fn scripted_job(id: &str, image: &str, source: &str, output: &str) -> Job {
            Job {
                id: id.to_string(),
                steps: vec![JobStep {
                    name: image.to_string(),
                    source: source.to_string(),
                    output: output.to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }
        }

        fn start(exec: &ContainerExecutor, job: &Job, out: &Shared, err: &Shared) {
            let input = job.steps[job.steps_completed].source.clone().into_bytes();
            exec.start(
                job,
                Box::new(Cursor::new(input)),
                Box::new(out.clone()),
                Box::new(err.clone()),
            )
            .unwrap();
        }

        #[test]
        fn step_streams_are_pumped_and_container_removed() {
            let dir = tempdir().unwrap();
            let exec = scripted_executor(&dir);
            let job = scripted_job("j1", "upper", "hi", "");
            let (out, err) = (Shared::default(), Shared::default());

            start(&exec, &job, &out, &err);
            let container = exec.container_name(&StepKey::current(&job)).unwrap();
            exec.inspect(&job).unwrap();
            exec.clean_up(&job).unwrap();

            assert_eq!(out.text(), "HI");
            assert_eq!(err.text(), "progress\n");
            assert!(exec.container_name(&StepKey::current(&job)).is_none());
            let removed = std::fs::read_to_string(dir.path().join("removed")).unwrap();
            assert_eq!(removed.trim(), container);
        }

        #[test]
        fn non_zero_exit_is_step_failure() {
            let dir = tempdir().unwrap();
            let exec = scripted_executor(&dir);
            let job = scripted_job("j1", "fail", "", "");
            let (out, err) = (Shared::default(), Shared::default());

            start(&exec, &job, &out, &err);
            let failure = exec.inspect(&job).unwrap_err();
            exec.clean_up(&job).unwrap();

            assert_eq!(failure.code.as_str(), "step.execution_failed");
            assert_eq!(failure.details["exitCode"], 3);
            assert_eq!(err.text(), "boom\n");
        }

        #[test]
        fn unread_input_does_not_fail_step() {
            let dir = tempdir().unwrap();
            let exec = scripted_executor(&dir);
            let job = scripted_job("j1", "ignore", &"x".repeat(1 << 20), "");
            let (out, err) = (Shared::default(), Shared::default());

            start(&exec, &job, &out, &err);
            exec.inspect(&job).unwrap();
            exec.clean_up(&job).unwrap();
        }

        #[test]
        fn artifact_is_mounted_then_removed() {
            let dir = tempdir().unwrap();
            let exec = scripted_executor(&dir);
            let job = scripted_job("j1", "artifact", "data", "/out/result");
            let host = crate::capture::artifact_path(dir.path(), "data");
            let (out, err) = (Shared::default(), Shared::default());

            start(&exec, &job, &out, &err);
            exec.inspect(&job).unwrap();
            assert_eq!(std::fs::read_to_string(&host).unwrap(), "DATA");
            assert_eq!(out.text(), "wrote\n");

            exec.clean_up(&job).unwrap();
            assert!(!host.exists());
        }

        #[test]
        fn shared_artifact_survives_until_last_user_cleans_up() {
            let dir = tempdir().unwrap();
            let exec = scripted_executor(&dir);
            let first = scripted_job("j1", "artifact", "same", "/out/result");
            let second = scripted_job("j2", "artifact", "same", "/out/result");
            let host = crate::capture::artifact_path(dir.path(), "same");
            let (out, err) = (Shared::default(), Shared::default());

            start(&exec, &first, &out, &err);
            exec.inspect(&first).unwrap();
            start(&exec, &second, &out, &err);
            exec.inspect(&second).unwrap();

            exec.clean_up(&first).unwrap();
            assert_eq!(std::fs::read_to_string(&host).unwrap(), "SAME");

            exec.clean_up(&second).unwrap();
            assert!(!host.exists());
        }

        #[test]
        fn manager_runs_steps_through_container_cli() {
            let dir = tempdir().unwrap();
            let manager = JobManager::new(
                Arc::new(MemoryRepository::new()),
                Arc::new(scripted_executor(&dir)),
            );
            let mut job = scripted_job("", "upper", "hi", "");
            job.steps.push(JobStep {
                name: "upper".to_string(),
                ..Default::default()
            });

            let created = manager.create(job).unwrap();
            manager.execute(&created).unwrap();

            assert_eq!(
                manager.get_log(&created, 0).unwrap().lines,
                vec!["progress", "HI", "progress", "HI"]
            );
        }
    }
}

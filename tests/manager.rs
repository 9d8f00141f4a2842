use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use jobline::defaults::{CaptureConfig, MissingDelimiter};
use jobline::environment::EnvVar;
use jobline::executor::{InProcessExecutor, StepContext, StepRun};
use jobline::repository::{JobRepository, MemoryRepository, SqliteRepository};
use jobline::{Job, JobManager, JobStatus, JobStep, Result};
use tempfile::tempdir;

/// Steps are dispatched on their name, the way images are for containers.
fn run_step(ctx: &StepContext) -> Result<StepRun> {
    let run = match ctx.step.name.as_str() {
        "upper" => StepRun::stdout(ctx.input.to_uppercase()),
        "wrap" => StepRun::stdout(format!("noiseSTART{}ENDtrailer", ctx.input)),
        "env" => StepRun::stdout(ctx.environment.join("\n")),
        "to-stderr" => StepRun {
            stdout: "progress".to_string(),
            stderr: format!("err:{}", ctx.input),
            exit_code: 0,
        },
        "artifact" => {
            if let Some(path) = &ctx.artifact {
                std::fs::write(path, format!("artifact:{}", ctx.input)).unwrap();
            }
            StepRun::stdout("written")
        }
        "fail" => StepRun::failed(1, "boom"),
        other => StepRun::failed(127, format!("unknown image {}", other)),
    };
    Ok(run)
}

fn capture(root: &Path, missing: MissingDelimiter) -> CaptureConfig {
    CaptureConfig {
        artifact_root: root.display().to_string(),
        missing_delimiter: missing,
    }
}

fn manager_with(repository: Arc<dyn JobRepository>, capture: CaptureConfig) -> JobManager {
    JobManager::new(repository, Arc::new(InProcessExecutor::new(capture, run_step)))
}

fn manager(root: &Path) -> JobManager {
    manager_with(
        Arc::new(MemoryRepository::new()),
        capture(root, MissingDelimiter::Fail),
    )
}

fn step(name: &str) -> JobStep {
    JobStep {
        name: name.to_string(),
        ..Default::default()
    }
}

fn job(source: &str, names: &[&str]) -> Job {
    let mut steps: Vec<JobStep> = names.iter().map(|n| step(n)).collect();
    if let Some(first) = steps.first_mut() {
        first.source = source.to_string();
    }
    Job {
        name: "pipeline".to_string(),
        steps,
        ..Default::default()
    }
}

#[test]
fn first_step_reads_job_source() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let created = manager.create(job("hello", &["upper"])).unwrap();

    manager.execute(&created).unwrap();

    let stored = manager.get_by_id(&created.id).unwrap();
    assert_eq!(stored.status, JobStatus::Complete);
    assert_eq!(stored.steps_completed, 1);
    assert_eq!(manager.get_log(&stored, 0).unwrap().lines, vec!["HELLO"]);
}

#[test]
fn output_feeds_next_step_source() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let created = manager.create(job("abc", &["upper", "wrap"])).unwrap();

    manager.execute(&created).unwrap();

    let log = manager.get_log(&created, 0).unwrap();
    assert_eq!(log.lines, vec!["ABC", "noiseSTARTABCENDtrailer"]);

    // stored definitions are untouched by execution
    let stored = manager.get_by_id(&created.id).unwrap();
    assert_eq!(stored.steps[1].source, "");
}

#[test]
fn failing_step_stops_job_and_keeps_log() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let created = manager
        .create(job("hello", &["upper", "fail", "upper"]))
        .unwrap();

    let err = manager.execute(&created).unwrap_err();
    assert!(err.is_step_failure());

    let stored = manager.get_by_id(&created.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.steps_completed, 1);

    let log = manager.get_log(&stored, 0).unwrap();
    assert_eq!(
        log.lines,
        vec!["HELLO", "boom", "step 1 (fail) failed: step exited with code 1"]
    );
}

#[test]
fn failed_job_is_not_retried() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let created = manager.create(job("x", &["fail"])).unwrap();
    manager.execute(&created).unwrap_err();

    let err = manager.execute(&created).unwrap_err();
    assert_eq!(err.code.as_str(), "job.already_failed");
    assert_eq!(err.retryable, Some(false));
}

#[test]
fn complete_job_execute_is_noop() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let created = manager.create(job("x", &["upper"])).unwrap();
    manager.execute(&created).unwrap();

    manager.execute(&created).unwrap();
    assert_eq!(manager.get_log(&created, 0).unwrap().lines, vec!["X"]);
}

#[test]
fn environment_is_job_then_step() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let mut definition = job("", &["env"]);
    definition.environment = vec![EnvVar::new("A", "job")].into();
    definition.steps[0].environment =
        vec![EnvVar::new("B", "step"), EnvVar::new("A", "step")].into();

    let created = manager.create(definition).unwrap();
    manager.execute(&created).unwrap();

    assert_eq!(
        manager.get_log(&created, 0).unwrap().lines,
        vec!["A=job", "B=step", "A=step"]
    );
}

#[test]
fn stderr_capture_streams_stdout_to_log() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let mut definition = job("in", &["to-stderr", "upper"]);
    definition.steps[0].output = "stderr".to_string();

    let created = manager.create(definition).unwrap();
    manager.execute(&created).unwrap();

    assert_eq!(
        manager.get_log(&created, 0).unwrap().lines,
        vec!["progress", "err:in", "ERR:IN"]
    );
}

#[test]
fn artifact_output_is_read_from_file() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let mut definition = job("payload", &["artifact", "upper"]);
    definition.steps[0].output = "/out/result.txt".to_string();

    let created = manager.create(definition).unwrap();
    manager.execute(&created).unwrap();

    assert_eq!(
        manager.get_log(&created, 0).unwrap().lines,
        vec!["written", "artifact:payload", "ARTIFACT:PAYLOAD"]
    );
}

#[test]
fn delimiters_pass_only_excerpt() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let mut definition = job("hello", &["wrap", "upper"]);
    definition.steps[0].begin_delimiter = "START".to_string();
    definition.steps[0].end_delimiter = "END".to_string();

    let created = manager.create(definition).unwrap();
    manager.execute(&created).unwrap();

    assert_eq!(
        manager.get_log(&created, 0).unwrap().lines,
        vec!["hello", "HELLO"]
    );
}

#[test]
fn missing_delimiters_fail_by_default() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let mut definition = job("hello", &["upper", "upper"]);
    definition.steps[0].begin_delimiter = "<<".to_string();
    definition.steps[0].end_delimiter = ">>".to_string();

    let created = manager.create(definition).unwrap();
    let err = manager.execute(&created).unwrap_err();

    assert_eq!(err.code.as_str(), "capture.delimiter_missing");
    let stored = manager.get_by_id(&created.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.steps_completed, 0);
}

#[test]
fn missing_delimiters_can_yield_empty_excerpt() {
    let dir = tempdir().unwrap();
    let manager = manager_with(
        Arc::new(MemoryRepository::new()),
        capture(dir.path(), MissingDelimiter::Empty),
    );
    let mut definition = job("hello", &["upper", "wrap"]);
    definition.steps[0].begin_delimiter = "<<".to_string();
    definition.steps[0].end_delimiter = ">>".to_string();

    let created = manager.create(definition).unwrap();
    manager.execute(&created).unwrap();

    assert_eq!(
        manager.get_log(&created, 0).unwrap().lines,
        vec!["noiseSTARTENDtrailer"]
    );
}

#[test]
fn log_index_returns_suffix() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let created = manager.create(job("a", &["upper", "wrap"])).unwrap();
    manager.execute(&created).unwrap();

    let tail = manager.get_log(&created, 1).unwrap();
    assert_eq!(tail.index, 1);
    assert_eq!(tail.lines, vec!["noiseSTARTAENDtrailer"]);

    let past_end = manager.get_log(&created, 10).unwrap();
    assert!(past_end.lines.is_empty());
}

#[test]
fn deleted_job_is_gone() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let created = manager.create(job("a", &["upper"])).unwrap();
    manager.execute(&created).unwrap();

    manager.delete(&created).unwrap();

    assert!(manager.get_by_id(&created.id).unwrap_err().is_not_found());
    assert!(manager.get_log(&created, 0).unwrap_err().is_not_found());
    assert!(manager.list_all().unwrap().is_empty());
}

#[test]
fn list_all_keeps_creation_order() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let ids: Vec<String> = (0..3)
        .map(|_| manager.create(job("", &[])).unwrap().id)
        .collect();

    let listed: Vec<String> = manager.list_all().unwrap().into_iter().map(|j| j.id).collect();
    assert_eq!(listed, ids);
}

#[test]
fn sqlite_backed_run_survives_reopen() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");

    let id = {
        let repository = Arc::new(SqliteRepository::open(&db).unwrap());
        let manager = manager_with(repository, capture(dir.path(), MissingDelimiter::Fail));
        let created = manager.create(job("persist", &["upper", "fail"])).unwrap();
        manager.execute(&created).unwrap_err();
        created.id
    };

    let repository = Arc::new(SqliteRepository::open(&db).unwrap());
    let manager = manager_with(repository, capture(dir.path(), MissingDelimiter::Fail));
    let stored = manager.get_by_id(&id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.steps_completed, 1);
    assert_eq!(
        manager.get_log(&stored, 0).unwrap().lines,
        vec!["PERSIST", "boom", "step 1 (fail) failed: step exited with code 1"]
    );
}

#[test]
fn log_is_readable_while_job_runs() {
    let dir = tempdir().unwrap();
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);

    let capture = capture(dir.path(), MissingDelimiter::Fail);
    let executor = InProcessExecutor::new(capture, move |ctx| {
        if ctx.step.name == "gate" {
            entered_tx.lock().unwrap().send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
            return Ok(StepRun::stdout(format!("gated {}", ctx.input)));
        }
        run_step(ctx)
    });
    let manager = Arc::new(JobManager::new(
        Arc::new(MemoryRepository::new()),
        Arc::new(executor),
    ));

    let created = manager.create(job("go", &["upper", "gate"])).unwrap();
    let handle = manager.spawn_execute(created.clone());

    entered_rx.recv().unwrap();
    let running = manager.get_by_id(&created.id).unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.steps_completed, 1);
    assert_eq!(manager.get_log(&created, 0).unwrap().lines, vec!["GO"]);

    let err = manager.execute(&created).unwrap_err();
    assert_eq!(err.code.as_str(), "job.already_running");

    release_tx.send(()).unwrap();
    handle.join().unwrap().unwrap();

    assert_eq!(
        manager.get_log(&created, 0).unwrap().lines,
        vec!["GO", "gated GO"]
    );
    assert_eq!(
        manager.get_by_id(&created.id).unwrap().status,
        JobStatus::Complete
    );
}

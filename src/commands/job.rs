use clap::{Args, Subcommand};
use serde::Serialize;
use std::sync::Arc;

use jobline::defaults;
use jobline::executor::ContainerExecutor;
use jobline::repository::SqliteRepository;
use jobline::{Job, JobLog, JobManager};

use super::{parse_json_spec, CmdResult};

#[derive(Args)]
pub struct JobArgs {
    #[command(subcommand)]
    command: JobCommand,
}

#[derive(Subcommand)]
enum JobCommand {
    /// List all jobs in creation order
    List,
    /// Show a single job
    Show {
        /// Job ID
        job_id: String,
    },
    /// Create a job from a JSON definition
    Create {
        /// JSON spec (inline, @file, or - for stdin)
        spec: String,
        /// Run the job right after creating it
        #[arg(long)]
        run: bool,
    },
    /// Run a job's remaining steps
    Run {
        /// Job ID
        job_id: String,
    },
    /// Show a job's log lines
    Log {
        /// Job ID
        job_id: String,
        /// Skip this many lines (for incremental reads)
        #[arg(long, default_value = "0")]
        index: usize,
    },
    /// Mark a job stuck in `running` as failed
    Abandon {
        /// Job ID
        job_id: String,
    },
    /// Delete a job and its log
    Delete {
        /// Job ID
        job_id: String,
    },
}

#[derive(Debug, Serialize)]
pub struct JobOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<Job>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jobs: Option<Vec<Job>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log: Option<JobLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<bool>,
}

impl JobOutput {
    fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            job: None,
            jobs: None,
            log: None,
            deleted: None,
        }
    }
}

pub fn run(args: JobArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<JobOutput> {
    let manager = open_manager()?;

    match args.command {
        JobCommand::List => list(&manager),
        JobCommand::Show { job_id } => show(&manager, &job_id),
        JobCommand::Create { spec, run } => create(&manager, &spec, run),
        JobCommand::Run { job_id } => execute(&manager, &job_id),
        JobCommand::Log { job_id, index } => log(&manager, &job_id, index),
        JobCommand::Abandon { job_id } => abandon(&manager, &job_id),
        JobCommand::Delete { job_id } => delete(&manager, &job_id),
    }
}

fn open_manager() -> jobline::Result<JobManager> {
    let defaults = defaults::load_defaults();
    let database = defaults.storage.database_path()?;
    let repository = SqliteRepository::open(&database)?;
    let executor = ContainerExecutor::new(defaults.executor, defaults.capture);

    Ok(JobManager::new(Arc::new(repository), Arc::new(executor)))
}

fn list(manager: &JobManager) -> CmdResult<JobOutput> {
    Ok((
        JobOutput {
            jobs: Some(manager.list_all()?),
            ..JobOutput::new("job.list")
        },
        0,
    ))
}

fn show(manager: &JobManager, job_id: &str) -> CmdResult<JobOutput> {
    Ok((
        JobOutput {
            job: Some(manager.get_by_id(job_id)?),
            ..JobOutput::new("job.show")
        },
        0,
    ))
}

fn create(manager: &JobManager, spec: &str, run: bool) -> CmdResult<JobOutput> {
    let job: Job = parse_json_spec(spec, "parse job definition")?;
    let created = manager.create(job)?;

    if run {
        manager.execute(&created)?;
    }

    Ok((
        JobOutput {
            job: Some(manager.get_by_id(&created.id)?),
            ..JobOutput::new("job.create")
        },
        0,
    ))
}

fn execute(manager: &JobManager, job_id: &str) -> CmdResult<JobOutput> {
    let job = manager.get_by_id(job_id)?;
    manager.execute(&job)?;

    Ok((
        JobOutput {
            job: Some(manager.get_by_id(job_id)?),
            ..JobOutput::new("job.run")
        },
        0,
    ))
}

fn log(manager: &JobManager, job_id: &str, index: usize) -> CmdResult<JobOutput> {
    let job = manager.get_by_id(job_id)?;

    Ok((
        JobOutput {
            log: Some(manager.get_log(&job, index)?),
            ..JobOutput::new("job.log")
        },
        0,
    ))
}

fn abandon(manager: &JobManager, job_id: &str) -> CmdResult<JobOutput> {
    let job = manager.get_by_id(job_id)?;

    Ok((
        JobOutput {
            job: Some(manager.abandon(&job)?),
            ..JobOutput::new("job.abandon")
        },
        0,
    ))
}

fn delete(manager: &JobManager, job_id: &str) -> CmdResult<JobOutput> {
    let job = manager.get_by_id(job_id)?;
    manager.delete(&job)?;

    Ok((
        JobOutput {
            deleted: Some(true),
            ..JobOutput::new("job.delete")
        },
        0,
    ))
}

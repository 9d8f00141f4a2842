use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{JobRepository, JobUpdate};
use crate::error::{Error, Result};
use crate::job::{Job, JobLog};

#[derive(Debug, Default)]
struct Store {
    jobs: HashMap<String, StoredJob>,
    order: Vec<String>,
}

#[derive(Debug)]
struct StoredJob {
    job: Job,
    log: Vec<String>,
}

/// Process-local repository backed by a lock-guarded map.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    store: RwLock<Store>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Store>> {
        self.store
            .read()
            .map_err(|_| Error::internal_unexpected("job store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Store>> {
        self.store
            .write()
            .map_err(|_| Error::internal_unexpected("job store lock poisoned"))
    }
}

impl JobRepository for MemoryRepository {
    fn all(&self) -> Result<Vec<Job>> {
        let store = self.read()?;
        Ok(store
            .order
            .iter()
            .filter_map(|id| store.jobs.get(id))
            .map(|stored| stored.job.clone())
            .collect())
    }

    fn get(&self, job_id: &str) -> Result<Job> {
        self.read()?
            .jobs
            .get(job_id)
            .map(|stored| stored.job.clone())
            .ok_or_else(|| Error::job_not_found(job_id))
    }

    fn create(&self, job: &Job) -> Result<()> {
        job.validate()?;
        let mut store = self.write()?;
        if store.jobs.contains_key(&job.id) {
            return Err(Error::job_conflict(&job.id));
        }

        store.order.push(job.id.clone());
        store.jobs.insert(
            job.id.clone(),
            StoredJob {
                job: job.clone(),
                log: Vec::new(),
            },
        );
        Ok(())
    }

    fn delete(&self, job_id: &str) -> Result<()> {
        let mut store = self.write()?;
        if store.jobs.remove(job_id).is_none() {
            return Err(Error::job_not_found(job_id));
        }
        store.order.retain(|id| id != job_id);
        Ok(())
    }

    fn update(&self, job_id: &str, update: JobUpdate) -> Result<()> {
        let mut store = self.write()?;
        let stored = store
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::job_not_found(job_id))?;

        match update {
            JobUpdate::Status(status) => stored.job.status = status,
            JobUpdate::StepsCompleted(count) => {
                stored.job.check_steps_completed(count)?;
                stored.job.steps_completed = count;
            }
        }
        Ok(())
    }

    fn get_job_log(&self, job_id: &str, index: usize) -> Result<JobLog> {
        let store = self.read()?;
        let stored = store
            .jobs
            .get(job_id)
            .ok_or_else(|| Error::job_not_found(job_id))?;
        Ok(JobLog::window(&stored.log, index))
    }

    fn append_log_line(&self, job_id: &str, line: &str) -> Result<()> {
        let mut store = self.write()?;
        let stored = store
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::job_not_found(job_id))?;
        stored.log.push(line.to_string());
        Ok(())
    }
}

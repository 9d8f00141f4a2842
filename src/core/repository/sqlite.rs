use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{JobRepository, JobUpdate};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::job::{Job, JobLog, JobStatus, JobStep};

/// Repository persisting jobs and logs to a SQLite database.
///
/// A single connection sits behind a mutex, so every read and write against
/// the file is serialized.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            Error::internal_database(e.to_string(), Some(format!("open {}", path.display())))
        })?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal_unexpected("job database lock poisoned"))
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            steps TEXT NOT NULL,
            environment TEXT NOT NULL,
            steps_completed INTEGER NOT NULL,
            status TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS job_logs (
            job_id TEXT NOT NULL,
            line_no INTEGER NOT NULL,
            line TEXT NOT NULL,
            PRIMARY KEY (job_id, line_no)
        );",
    )?;
    Ok(())
}

struct JobRow {
    id: String,
    name: String,
    steps: String,
    environment: String,
    steps_completed: i64,
    status: String,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            steps: row.get(2)?,
            environment: row.get(3)?,
            steps_completed: row.get(4)?,
            status: row.get(5)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let context = |field: &str| Some(format!("decode {} of job {}", field, self.id));
        let steps: Vec<JobStep> = serde_json::from_str(&self.steps)
            .map_err(|e| Error::internal_json(e.to_string(), context("steps")))?;
        let environment: Environment = serde_json::from_str(&self.environment)
            .map_err(|e| Error::internal_json(e.to_string(), context("environment")))?;
        let steps_completed = usize::try_from(self.steps_completed).map_err(|_| {
            Error::internal_database(
                format!("negative step count {}", self.steps_completed),
                context("stepsCompleted"),
            )
        })?;
        let status: JobStatus = self.status.parse()?;

        Ok(Job {
            id: self.id,
            name: self.name,
            steps,
            environment,
            steps_completed,
            status,
        })
    }
}

const SELECT_JOB: &str =
    "SELECT id, name, steps, environment, steps_completed, status FROM jobs";

fn to_sql_count(value: usize) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::internal_database("count out of range", None))
}

fn job_exists(conn: &Connection, job_id: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM jobs WHERE id = ?1", params![job_id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn load_job(conn: &Connection, job_id: &str) -> Result<Job> {
    conn.query_row(
        &format!("{} WHERE id = ?1", SELECT_JOB),
        params![job_id],
        JobRow::from_row,
    )
    .optional()?
    .ok_or_else(|| Error::job_not_found(job_id))?
    .into_job()
}

impl JobRepository for SqliteRepository {
    fn all(&self) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY seq", SELECT_JOB))?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    fn get(&self, job_id: &str) -> Result<Job> {
        let conn = self.lock()?;
        load_job(&conn, job_id)
    }

    fn create(&self, job: &Job) -> Result<()> {
        job.validate()?;
        let steps = serde_json::to_string(&job.steps)
            .map_err(|e| Error::internal_json(e.to_string(), Some("encode steps".to_string())))?;
        let environment = serde_json::to_string(&job.environment).map_err(|e| {
            Error::internal_json(e.to_string(), Some("encode environment".to_string()))
        })?;

        let conn = self.lock()?;
        if job_exists(&conn, &job.id)? {
            return Err(Error::job_conflict(&job.id));
        }

        conn.execute(
            "INSERT INTO jobs (id, name, steps, environment, steps_completed, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job.id,
                job.name,
                steps,
                environment,
                to_sql_count(job.steps_completed)?,
                job.status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, job_id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM jobs WHERE id = ?1", params![job_id])?;
        if removed == 0 {
            return Err(Error::job_not_found(job_id));
        }
        tx.execute("DELETE FROM job_logs WHERE job_id = ?1", params![job_id])?;
        tx.commit()?;
        Ok(())
    }

    fn update(&self, job_id: &str, update: JobUpdate) -> Result<()> {
        let conn = self.lock()?;
        let changed = match update {
            JobUpdate::Status(status) => conn.execute(
                "UPDATE jobs SET status = ?2 WHERE id = ?1",
                params![job_id, status.as_str()],
            )?,
            JobUpdate::StepsCompleted(count) => {
                load_job(&conn, job_id)?.check_steps_completed(count)?;
                conn.execute(
                    "UPDATE jobs SET steps_completed = ?2 WHERE id = ?1",
                    params![job_id, to_sql_count(count)?],
                )?
            }
        };

        if changed == 0 {
            return Err(Error::job_not_found(job_id));
        }
        Ok(())
    }

    fn get_job_log(&self, job_id: &str, index: usize) -> Result<JobLog> {
        let conn = self.lock()?;
        if !job_exists(&conn, job_id)? {
            return Err(Error::job_not_found(job_id));
        }

        let mut stmt = conn.prepare(
            "SELECT line FROM job_logs WHERE job_id = ?1 AND line_no >= ?2 ORDER BY line_no",
        )?;
        let lines = stmt
            .query_map(params![job_id, to_sql_count(index)?], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(JobLog { index, lines })
    }

    fn append_log_line(&self, job_id: &str, line: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if !job_exists(&tx, job_id)? {
            return Err(Error::job_not_found(job_id));
        }

        tx.execute(
            "INSERT INTO job_logs (job_id, line_no, line)
             SELECT ?1, COALESCE(MAX(line_no) + 1, 0), ?2 FROM job_logs WHERE job_id = ?1",
            params![job_id, line],
        )?;
        tx.commit()?;
        Ok(())
    }
}

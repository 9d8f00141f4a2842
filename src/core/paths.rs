use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Base jobline config directory (~/.config/jobline/ on Unix-like systems)
pub fn jobline() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("jobline"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("jobline"))
    }
}

/// Global jobline.json config file path
pub fn jobline_json() -> Result<PathBuf> {
    Ok(jobline()?.join("jobline.json"))
}

/// Default SQLite job store
pub fn jobs_db() -> Result<PathBuf> {
    Ok(jobline()?.join("jobs.db"))
}

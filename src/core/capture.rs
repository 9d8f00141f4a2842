//! Output capture policy.
//!
//! A step's `output` field selects where its result is read from:
//!
//! - `""` or `"stdout"`: the process's standard output
//! - `"stderr"`: the process's standard error
//! - `"/some/path"`: a file the process writes at that path
//!
//! Artifact files live on the host at a content-addressed path derived from
//! the step's `source`, under the configured artifact root. The container
//! sees the same file at the step's `output` path.
//!
//! When both delimiters are set the captured text is reduced to the part
//! strictly between the first begin marker and the next end marker.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::defaults::{CaptureConfig, MissingDelimiter};
use crate::error::{Error, Result};
use crate::job::JobStep;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureMode {
    Stdout,
    Stderr,
    /// Path of the artifact as seen by the step's process.
    Artifact { container_path: String },
}

impl CaptureMode {
    /// Total over the four documented forms; anything else is rejected.
    pub fn select(output: &str) -> Result<Self> {
        match output {
            "" | "stdout" => Ok(CaptureMode::Stdout),
            "stderr" => Ok(CaptureMode::Stderr),
            path if path.starts_with('/') => Ok(CaptureMode::Artifact {
                container_path: path.to_string(),
            }),
            other => Err(Error::capture_unrecognized_policy(other)),
        }
    }

    pub fn uses_stdout(&self) -> bool {
        matches!(self, CaptureMode::Stdout)
    }

    pub fn uses_stderr(&self) -> bool {
        matches!(self, CaptureMode::Stderr)
    }

    pub fn uses_artifact(&self) -> bool {
        matches!(self, CaptureMode::Artifact { .. })
    }
}

/// Hex SHA-256 of `source` placed under `root`.
pub fn artifact_path(root: &Path, source: &str) -> PathBuf {
    let digest = Sha256::digest(source.as_bytes());
    root.join(format!("{:x}", digest))
}

/// Text strictly between the first `begin` and the next `end` after it.
pub fn extract_excerpt<'a>(raw: &'a str, begin: &str, end: &str) -> Option<&'a str> {
    let start = raw.find(begin)? + begin.len();
    let rest = &raw[start..];
    let stop = rest.find(end)?;
    Some(&rest[..stop])
}

pub fn excerpt_or_empty<'a>(raw: &'a str, begin: &str, end: &str) -> &'a str {
    extract_excerpt(raw, begin, end).unwrap_or("")
}

/// Resolved capture plan for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputCapture {
    pub mode: CaptureMode,
    artifact: Option<PathBuf>,
    delimiters: Option<(String, String)>,
    missing_delimiter: MissingDelimiter,
}

impl OutputCapture {
    pub fn for_step(step: &JobStep, config: &CaptureConfig) -> Result<Self> {
        let mode = CaptureMode::select(&step.output)?;
        let artifact = mode
            .uses_artifact()
            .then(|| artifact_path(&config.artifact_root(), &step.source));
        let delimiters = step
            .uses_delimited_output()
            .then(|| (step.begin_delimiter.clone(), step.end_delimiter.clone()));

        Ok(Self {
            mode,
            artifact,
            delimiters,
            missing_delimiter: config.missing_delimiter,
        })
    }

    /// Host-side artifact file, present only in artifact mode.
    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Raw output for the active mode, passed through the delimiter filter.
    ///
    /// `stream` is what the process wrote to the captured standard stream;
    /// artifact mode ignores it and reads the artifact file instead.
    pub fn collect(&self, stream: &[u8]) -> Result<String> {
        let raw = match (&self.mode, &self.artifact) {
            (CaptureMode::Stdout | CaptureMode::Stderr, _) => {
                String::from_utf8_lossy(stream).into_owned()
            }
            (CaptureMode::Artifact { .. }, Some(path)) => read_artifact(path)?,
            (CaptureMode::Artifact { container_path }, None) => {
                return Err(Error::capture_artifact_unreadable(
                    container_path.clone(),
                    "no host path resolved for artifact",
                ))
            }
        };

        self.filter(raw)
    }

    fn filter(&self, raw: String) -> Result<String> {
        let Some((begin, end)) = &self.delimiters else {
            return Ok(raw);
        };

        match (extract_excerpt(&raw, begin, end), self.missing_delimiter) {
            (Some(excerpt), _) => Ok(excerpt.to_string()),
            (None, MissingDelimiter::Empty) => Ok(String::new()),
            (None, MissingDelimiter::Fail) => Err(Error::capture_delimiter_missing(begin, end)),
        }
    }
}

fn read_artifact(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| {
        Error::capture_artifact_unreadable(path.display().to_string(), e.to_string())
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

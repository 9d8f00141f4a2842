//! File I/O primitives with consistent error handling.

use crate::error::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Read file contents, mapping failures to `internal.io_error`.
pub fn read_file(path: &Path, operation: &str) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))
}

/// Write to `<name>.tmp` beside the target, then rename over it.
pub fn write_file_atomic(path: &Path, content: &str, operation: &str) -> Result<()> {
    let invalid = || {
        Error::internal_io(
            format!("Invalid path: {}", path.display()),
            Some(operation.to_string()),
        )
    };
    let parent = path.parent().ok_or_else(invalid)?;
    let filename = path.file_name().ok_or_else(invalid)?;
    let tmp_path = parent.join(format!("{}.tmp", filename.to_string_lossy()));

    fs::write(&tmp_path, content)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("{} (write temp)", operation))))?;

    fs::rename(&tmp_path, path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("{} (rename)", operation))))
}

/// Create an empty file (truncating any previous content), creating parents.
pub fn touch_file(path: &Path, operation: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))?;
    }
    fs::write(path, b"").map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))
}

/// Remove a file; a file that is already gone is not an error.
pub fn remove_file_if_exists(path: &Path, operation: &str) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::internal_io(e.to_string(), Some(operation.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_file_returns_error_for_missing_file() {
        let err = read_file(Path::new("/nonexistent/path.txt"), "test read").unwrap_err();
        assert_eq!(err.code.as_str(), "internal.io_error");
    }

    #[test]
    fn write_file_atomic_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        write_file_atomic(&path, "first", "test write").unwrap();
        write_file_atomic(&path, "second", "test write").unwrap();

        assert_eq!(read_file(&path, "test read").unwrap(), "second");
        assert!(!dir.path().join("config.json.tmp").exists());
    }

    #[test]
    fn touch_creates_parents_and_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("artifact");

        touch_file(&path, "test touch").unwrap();
        fs::write(&path, "stale").unwrap();
        touch_file(&path, "test touch").unwrap();

        assert_eq!(read_file(&path, "test read").unwrap(), "");
    }

    #[test]
    fn remove_missing_file_is_ok() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone");

        assert!(!remove_file_if_exists(&path, "test remove").unwrap());
        fs::write(&path, "x").unwrap();
        assert!(remove_file_if_exists(&path, "test remove").unwrap());
    }
}

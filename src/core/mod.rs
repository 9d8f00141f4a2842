// Public modules
pub mod capture;
pub mod environment;
pub mod error;
pub mod executor;
pub mod job;
pub mod manager;
pub mod repository;

// Internal modules - not part of public API
pub(crate) mod paths;

// Public modules for CLI access
pub mod defaults;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
pub use job::{Job, JobLog, JobStatus, JobStep};
pub use manager::JobManager;

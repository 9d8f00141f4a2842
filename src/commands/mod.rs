use std::io::Read;
use std::path::Path;

pub type CmdResult<T> = jobline::Result<(T, i32)>;

pub(crate) struct GlobalArgs {}

// ============================================================================
// JSON Input Parsing (CLI layer)
// ============================================================================

/// Read JSON spec from string, file (@path), or stdin (-).
fn read_json_spec_to_string(spec: &str) -> jobline::Result<String> {
    use std::io::IsTerminal;

    if spec.trim() == "-" {
        let mut buf = String::new();
        let mut stdin = std::io::stdin();
        if stdin.is_terminal() {
            return Err(jobline::Error::validation_invalid_argument(
                "json",
                "Cannot read JSON from stdin when stdin is a TTY",
                None,
                None,
            ));
        }
        stdin.read_to_string(&mut buf).map_err(|e| {
            jobline::Error::internal_io(e.to_string(), Some("read stdin".to_string()))
        })?;
        return Ok(buf);
    }

    if let Some(path) = spec.strip_prefix('@') {
        if path.trim().is_empty() {
            return Err(jobline::Error::validation_invalid_argument(
                "json",
                "Invalid JSON spec '@' (missing file path)",
                None,
                None,
            ));
        }
        return std::fs::read_to_string(Path::new(path)).map_err(|e| {
            jobline::Error::internal_io(e.to_string(), Some(format!("read {}", path)))
        });
    }

    Ok(spec.to_string())
}

/// Parse a JSON spec argument into `T`.
pub fn parse_json_spec<T: serde::de::DeserializeOwned>(
    spec: &str,
    context: &str,
) -> jobline::Result<T> {
    let raw = read_json_spec_to_string(spec)?;
    serde_json::from_str(&raw)
        .map_err(|e| jobline::Error::validation_invalid_json(e, Some(context.to_string())))
}

pub mod config;
pub mod job;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (jobline::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Job(args) => dispatch!(args, global, job),
        crate::Commands::Config(args) => dispatch!(args, global, config),
    }
}

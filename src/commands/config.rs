use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;

use jobline::defaults::{self, Defaults, JoblineConfig};

use super::CmdResult;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Display configuration (merged defaults + file)
    Show {
        /// Show only built-in defaults (ignore jobline.json)
        #[arg(long)]
        builtin: bool,
    },
    /// Set a configuration value at a JSON pointer path
    Set {
        /// JSON pointer path (e.g., /defaults/capture/missingDelimiter)
        pointer: String,
        /// Value to set (JSON)
        value: String,
    },
    /// Reset configuration to built-in defaults (deletes jobline.json)
    Reset,
    /// Show the path to jobline.json
    Path,
}

#[derive(Debug, Serialize)]
pub struct ConfigOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<JoblineConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    defaults: Option<Defaults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<bool>,
}

impl ConfigOutput {
    fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            config: None,
            defaults: None,
            path: None,
            exists: None,
            deleted: None,
        }
    }
}

pub fn run(args: ConfigArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<ConfigOutput> {
    match args.command {
        ConfigCommand::Show { builtin } => show(builtin),
        ConfigCommand::Set { pointer, value } => set(&pointer, &value),
        ConfigCommand::Reset => reset(),
        ConfigCommand::Path => path(),
    }
}

fn show(builtin: bool) -> CmdResult<ConfigOutput> {
    let output = if builtin {
        ConfigOutput {
            defaults: Some(defaults::builtin_defaults()),
            ..ConfigOutput::new("config.show")
        }
    } else {
        ConfigOutput {
            config: Some(defaults::load_config()),
            ..ConfigOutput::new("config.show")
        }
    };
    Ok((output, 0))
}

fn set(pointer: &str, value_str: &str) -> CmdResult<ConfigOutput> {
    let value: Value = serde_json::from_str(value_str).map_err(|e| {
        jobline::Error::validation_invalid_json(e, Some("parse value".to_string()))
    })?;

    let config = apply_pointer(defaults::load_config(), pointer, value)?;
    defaults::save_config(&config)?;

    Ok((
        ConfigOutput {
            config: Some(config),
            ..ConfigOutput::new("config.set")
        },
        0,
    ))
}

/// Replace the value at an existing JSON pointer and re-validate the result.
fn apply_pointer(config: JoblineConfig, pointer: &str, value: Value) -> jobline::Result<JoblineConfig> {
    if !pointer.starts_with('/') {
        return Err(jobline::Error::validation_invalid_argument(
            "pointer",
            "JSON pointer must start with '/'",
            None,
            None,
        ));
    }

    let mut config_json = serde_json::to_value(&config).map_err(|e| {
        jobline::Error::internal_json(e.to_string(), Some("serialize config".to_string()))
    })?;

    let slot = config_json.pointer_mut(pointer).ok_or_else(|| {
        jobline::Error::config_invalid_value(
            pointer,
            None,
            "No configuration key at this pointer",
        )
    })?;
    *slot = value;

    serde_json::from_value(config_json).map_err(|e| {
        jobline::Error::validation_invalid_json(e, Some("deserialize config".to_string()))
    })
}

fn reset() -> CmdResult<ConfigOutput> {
    let deleted = defaults::reset_config()?;

    Ok((
        ConfigOutput {
            defaults: Some(defaults::builtin_defaults()),
            path: Some(defaults::config_path()?),
            deleted: Some(deleted),
            ..ConfigOutput::new("config.reset")
        },
        0,
    ))
}

fn path() -> CmdResult<ConfigOutput> {
    Ok((
        ConfigOutput {
            path: Some(defaults::config_path()?),
            exists: Some(defaults::config_exists()),
            ..ConfigOutput::new("config.path")
        },
        0,
    ))
}

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{config, job, GlobalArgs};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "jobline")]
#[command(version = VERSION)]
#[command(about = "Run multi-step container jobs and follow their logs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, run, and inspect jobs
    #[command(visible_alias = "jobs")]
    Job(job::JobArgs),
    /// Manage global jobline configuration
    Config(config::ConfigArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs {};

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    if let Err(e) = output::print_json_result(json_result) {
        eprintln!("{}", e);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}

mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;
use devlink_exec::{is_worker_mode, run_worker, SessionConfig, LOG_LEVEL_ENV};

use crate::cmd::Command;
use crate::exit::{FAILURE, INTERNAL, SUCCESS};
use crate::logging::{init_logging, init_worker_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "devlink", version, about = "Device automation over serial and socket links")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    if is_worker_mode() {
        std::process::exit(worker_main());
    }

    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format, cli.log_level);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

/// Entry point of a task process started by `devlink run`.
fn worker_main() -> i32 {
    let level = std::env::var(LOG_LEVEL_ENV).ok();
    init_worker_logging(LogLevel::parse_or_default(level.as_deref()));

    match run_worker(&devlink::tasks::registry(), SessionConfig::default()) {
        Ok(true) => SUCCESS,
        Ok(false) => FAILURE,
        Err(err) => {
            tracing::error!(error = %err, "task process failed before reporting");
            INTERNAL
        }
    }
}

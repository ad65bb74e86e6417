use std::io::Read;
use std::path::Path;

use devlink_exec::{ErrorPolicy, ExecConfig, Executor, Spawner, TaskSpec};
use tracing::warn;

use crate::cmd::{parse_duration, RunArgs};
use crate::exit::{exec_error, io_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS};
use crate::logging::LogLevel;
use crate::output::{print_outcome, OutputFormat};

pub fn run(args: RunArgs, format: OutputFormat, log_level: LogLevel) -> CliResult<i32> {
    let specs = read_batch(&args.batch)?;
    let timeout = parse_duration(&args.timeout)?;
    let config = ExecConfig {
        terminate_grace: parse_duration(&args.terminate_grace)?,
        ..ExecConfig::default()
    };

    let registry = devlink::tasks::registry();
    for (index, spec) in specs.iter().enumerate() {
        if !registry.contains(&spec.entry_point) {
            warn!(task = index, entry_point = %spec.entry_point, "no built-in task by that name");
        }
    }

    let spawner = Spawner::current_exe()
        .map_err(|err| exec_error("cannot locate the devlink binary", err))?
        .log_level(log_level.as_str());
    let policy = if args.collect {
        ErrorPolicy::Collect
    } else {
        ErrorPolicy::Raise
    };

    let outcome = Executor::new(spawner, config)
        .execute(&specs, timeout, policy)
        .map_err(|err| exec_error("batch failed", err))?;

    print_outcome(&specs, &outcome, format);
    Ok(if outcome.is_success() { SUCCESS } else { FAILURE })
}

fn read_batch(path: &Path) -> CliResult<Vec<TaskSpec>> {
    let raw = if path == Path::new("-") {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw).map(|_| raw)
    } else {
        std::fs::read_to_string(path)
    }
    .map_err(|err| io_error(&format!("cannot read batch {}", path.display()), err))?;
    parse_batch(&raw)
}

/// A batch is a JSON array of `{"entry_point", "args", "kwargs"}` objects.
fn parse_batch(raw: &str) -> CliResult<Vec<TaskSpec>> {
    serde_json::from_str(raw)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid batch: {err}")))
}

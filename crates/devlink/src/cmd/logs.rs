use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cmd::{close_transport, parse_duration, LogsArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_log_line, OutputFormat};

/// Upper bound on one blocking read, so Ctrl-C is noticed promptly.
const READ_SLICE: Duration = Duration::from_millis(200);

pub fn run(args: LogsArgs, format: OutputFormat) -> CliResult<i32> {
    let deadline = args
        .duration
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|window| Instant::now() + window);

    let transport = args.link.open()?;
    let address = transport.address().to_string();

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let slice = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                remaining.min(READ_SLICE)
            }
            None => READ_SLICE,
        };

        let chunk = transport.read(slice);
        if chunk.is_empty() && !transport.is_open() {
            close_transport(transport);
            return Err(CliError::new(
                TRANSPORT_ERROR,
                format!("device link {address} closed after {printed} lines"),
            ));
        }
        for line in String::from_utf8_lossy(&chunk).lines() {
            print_log_line(&address, line, format);
            printed = printed.saturating_add(1);
        }
    }

    tracing::debug!(lines = printed, "log stream stopped");
    close_transport(transport);
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

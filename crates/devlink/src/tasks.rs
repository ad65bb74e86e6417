//! Built-in tasks.
//!
//! These are the entry points a batch file may name when it is run by the
//! `devlink` binary. Device tasks take the link address first, either
//! positionally or as the `address` keyword, in any form
//! [`LinkAddress`] parses.

use std::time::{Duration, Instant};

use devlink_exec::{Session, TaskArgs, TaskFailure, TaskRegistry};
use devlink_link::LinkAddress;
use serde_json::{json, Value};
use tracing::{debug, info};

const ARGUMENT_ERROR: &str = "ArgumentError";
const TASK_ERROR: &str = "TaskError";
const DEFAULT_LOG_WINDOW: f64 = 1.0;

/// Registry holding every built-in task.
pub fn registry() -> TaskRegistry {
    TaskRegistry::new()
        .with("rpc", rpc)
        .with("echo", echo)
        .with("logs", logs)
        .with("sleep", sleep)
        .with("fail", fail)
}

/// `rpc(address, service, method, **kwargs)`: one automation call.
///
/// Returns `{"ack": bool, "payload": ...}`; the payload is the decoded JSON
/// response, or `null` when the device declined.
pub fn rpc(session: &mut Session, args: &TaskArgs) -> Result<Value, TaskFailure> {
    let address = address(args)?;
    let service: String = args.require(1, "service")?;
    let method: String = args.require(2, "method")?;
    let kwargs = args.remaining_kwargs(&["address", "service", "method"]);

    let reply = session.open(&address)?.call(&service, &method, &kwargs)?;
    info!(%address, %service, %method, ack = reply.ack, "rpc task complete");
    Ok(json!({
        "ack": reply.ack,
        "payload": payload_value(&reply.payload),
    }))
}

/// `echo(address, msg)`: round trip through the diagnostic echo service.
pub fn echo(session: &mut Session, args: &TaskArgs) -> Result<Value, TaskFailure> {
    let address = address(args)?;
    let msg: String = args.require(1, "msg")?;

    let (ack, reply) = session.open(&address)?.echo(&msg)?;
    Ok(json!({ "ack": ack, "msg": reply }))
}

/// `logs(address, seconds=1.0)`: device log lines seen during the window.
pub fn logs(session: &mut Session, args: &TaskArgs) -> Result<Value, TaskFailure> {
    let address = address(args)?;
    let window = seconds(args.get(1, "seconds")?.unwrap_or(DEFAULT_LOG_WINDOW))?;

    let transport = session.open(&address)?;
    let deadline = Instant::now() + window;
    let mut text = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        text.extend_from_slice(&transport.read(remaining));
    }

    let lines: Vec<String> = String::from_utf8_lossy(&text)
        .lines()
        .map(str::to_owned)
        .collect();
    debug!(%address, lines = lines.len(), "log window closed");
    Ok(Value::from(lines))
}

/// `sleep(seconds)`: returns `seconds` after sleeping that long.
pub fn sleep(_session: &mut Session, args: &TaskArgs) -> Result<Value, TaskFailure> {
    let raw: f64 = args.require(0, "seconds")?;
    std::thread::sleep(seconds(raw)?);
    Ok(Value::from(raw))
}

/// `fail(message, kind="TaskError")`: always fails.
pub fn fail(_session: &mut Session, args: &TaskArgs) -> Result<Value, TaskFailure> {
    let message: String = args.get(0, "message")?.unwrap_or_else(|| "task failed".to_string());
    let kind: String = args.get(1, "kind")?.unwrap_or_else(|| TASK_ERROR.to_string());
    Err(TaskFailure::new(kind, message))
}

fn address(args: &TaskArgs) -> Result<LinkAddress, TaskFailure> {
    let raw: String = args.require(0, "address")?;
    raw.parse()
        .map_err(|err| TaskFailure::new(ARGUMENT_ERROR, format!("argument \"address\": {err}")))
}

fn seconds(raw: f64) -> Result<Duration, TaskFailure> {
    Duration::try_from_secs_f64(raw)
        .map_err(|err| TaskFailure::new(ARGUMENT_ERROR, format!("invalid duration {raw}: {err}")))
}

/// Response payload as JSON; text that is not JSON is kept as a string.
pub fn payload_value(payload: &[u8]) -> Value {
    if payload.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}

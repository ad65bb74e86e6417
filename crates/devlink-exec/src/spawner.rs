use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{ChildStderr, ChildStdout, Command, Stdio};
use std::thread;

use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::collector::TaskSender;
use crate::error::{ExecError, Result};
use crate::process::{ChildProcess, ProcessHandle};
use crate::task::TaskSpec;
use crate::worker::{WorkerMessage, LOG_LEVEL_ENV, TASK_INDEX_ENV, WORKER_ENV};

/// Launches task processes.
///
/// Every task runs in a fresh OS process: the configured program (normally
/// the current executable) re-executed in worker mode. The spec goes in on
/// stdin; results and errors come back as JSON lines on stdout, structured
/// logs on stderr.
#[derive(Debug, Clone)]
pub struct Spawner {
    program: PathBuf,
    args: Vec<OsString>,
    log_level: Option<String>,
}

impl Spawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            log_level: None,
        }
    }

    /// Spawner re-executing the running binary.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Extra argument passed to every task process.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Log level handed to task processes.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Start the task at `index`. Its report is routed to `sender`.
    pub fn spawn(&self, index: usize, spec: &TaskSpec, sender: &TaskSender) -> Result<ChildProcess> {
        let payload = serde_json::to_vec(spec)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(WORKER_ENV, "1")
            .env(TASK_INDEX_ENV, index.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(level) = &self.log_level {
            command.env(LOG_LEVEL_ENV, level);
        }

        let mut child = command
            .spawn()
            .map_err(|source| ExecError::Spawn { index, source })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();
        let mut process = ChildProcess::new(child);

        if let Err(err) = start_readers(index, stdout, stderr, sender) {
            let _ = process.kill();
            return Err(err);
        }

        if let Some(stdin) = stdin {
            if let Err(err) = spawn_reader(index, "stdin", move || hand_spec(index, stdin, &payload)) {
                let _ = process.kill();
                return Err(err);
            }
        }

        debug!(task = index, pid = process.id(), entry_point = %spec.entry_point, "task spawned");
        Ok(process)
    }
}

fn start_readers(
    index: usize,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    sender: &TaskSender,
) -> Result<()> {
    if let Some(stdout) = stdout {
        let sender = sender.clone();
        spawn_reader(index, "stdout", move || forward_reports(index, stdout, &sender))?;
    }
    if let Some(stderr) = stderr {
        spawn_reader(index, "stderr", move || forward_logs(index, stderr))?;
    }
    Ok(())
}

fn spawn_reader(index: usize, stream: &str, body: impl FnOnce() + Send + 'static) -> Result<()> {
    thread::Builder::new()
        .name(format!("devlink-task-{index}-{stream}"))
        .spawn(body)
        .map(|_| ())
        .map_err(|source| ExecError::Spawn { index, source })
}

/// Write the spec to a task's stdin. A task that exits without reading it
/// shows up as a missing result, not as a spawn failure.
fn hand_spec(index: usize, mut stdin: impl Write, payload: &[u8]) {
    if let Err(err) = stdin.write_all(payload) {
        warn!(task = index, error = %err, "failed to hand spec to task process");
    }
}

/// Route result/error lines to the collector; anything else is task chatter.
fn forward_reports(index: usize, stdout: impl Read, sender: &TaskSender) {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                debug!(task = index, error = %err, "task stdout closed");
                break;
            }
        };
        match serde_json::from_str::<WorkerMessage>(&line) {
            Ok(message) if message.index() == index => sender.send(message),
            Ok(message) => warn!(
                task = index,
                reported = message.index(),
                "dropping report tagged with another task's index"
            ),
            Err(_) => trace!(task = index, line = %line, "task stdout"),
        }
    }
}

/// Re-emit a task's JSON log records under the parent's subscriber.
fn forward_logs(index: usize, stderr: impl Read) {
    for line in BufReader::new(stderr).lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(record) if record.is_object() => emit_record(index, &record),
            _ => warn!(task = index, "{line}"),
        }
    }
}

fn emit_record(index: usize, record: &Value) {
    let level = record["level"].as_str().unwrap_or("INFO");
    let origin = record["target"].as_str().unwrap_or_default();
    let (message, fields) = split_fields(&record["fields"]);

    match level {
        "ERROR" => error!(task = index, origin, fields = %fields, "{message}"),
        "WARN" => warn!(task = index, origin, fields = %fields, "{message}"),
        "INFO" => info!(task = index, origin, fields = %fields, "{message}"),
        "DEBUG" => debug!(task = index, origin, fields = %fields, "{message}"),
        _ => trace!(task = index, origin, fields = %fields, "{message}"),
    }
}

/// Message text plus the remaining fields rendered as `key=value` pairs.
fn split_fields(fields: &Value) -> (String, String) {
    let Some(fields) = fields.as_object() else {
        return (String::new(), String::new());
    };
    let message = match fields.get("message") {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let rest = fields
        .iter()
        .filter(|(key, _)| key.as_str() != "message")
        .map(|(key, value)| match value {
            Value::String(text) => format!("{key}={text}"),
            other => format!("{key}={other}"),
        })
        .collect::<Vec<_>>()
        .join(" ");
    (message, rest)
}

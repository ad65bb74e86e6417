use std::fmt;
use std::io;

use devlink_exec::ExecError;
use devlink_link::LinkError;
use devlink_rpc::{RpcError, TransportError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Open { ref source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        LinkError::InvalidAddress(_) | LinkError::UnsupportedBaudRate(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        LinkError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    match err {
        RpcError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        RpcError::Link(err) => link_error(context, err),
        RpcError::Json(_) | RpcError::InvalidArguments(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::LinkUnavailable(err) | TransportError::Link(err) => {
            link_error(context, err)
        }
        TransportError::Rpc(err) => rpc_error(context, err),
        TransportError::AlreadyOpen | TransportError::NotOpen => {
            CliError::new(INTERNAL, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn exec_error(context: &str, err: ExecError) -> CliError {
    match err {
        ExecError::TaskFailures { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        ExecError::Io(source) => io_error(context, source),
        ExecError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use devlink_exec::TaskFailure;

    use super::*;

    #[test]
    fn missing_device_maps_to_transport_error() {
        let err = transport_error(
            "open failed",
            TransportError::LinkUnavailable(LinkError::Open {
                path: PathBuf::from("/dev/ttyACM9"),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("open failed: failed to open link /dev/ttyACM9"));
    }

    #[test]
    fn call_timeout_maps_to_timeout() {
        let err = transport_error(
            "call failed",
            TransportError::Rpc(RpcError::Timeout {
                service: "chip.rpc.Lighting".into(),
                method: "Set".into(),
                timeout: Duration::from_secs(1),
            }),
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn bad_address_is_usage() {
        let err = link_error("bad --port", LinkError::InvalidAddress("unix:".into()));
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn task_failures_are_plain_failures() {
        let err = exec_error(
            "batch failed",
            ExecError::TaskFailures {
                failures: vec![(0, TaskFailure::new("TaskError", "boom"))],
            },
        );
        assert_eq!(err.code, FAILURE);
        assert!(err.message.contains("[0] TaskError: boom"));
    }
}

use std::fmt::Write as _;
use std::time::Duration;

use devlink_frame::FrameError;
use devlink_link::LinkError;

/// Errors raised by the RPC channel.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Frame-level error while sending.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Link-level error.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Keyword arguments did not serialize to a JSON object.
    #[error("rpc arguments must be a keyword map, got {0}")]
    InvalidArguments(&'static str),

    /// No response arrived within the call timeout.
    #[error("rpc {service}.{method} timed out after {timeout:?}")]
    Timeout {
        service: String,
        method: String,
        timeout: Duration,
    },

    /// The transport closed while the call was pending.
    #[error("link closed while call was pending")]
    Disconnected,
}

/// Errors raised by the link worker lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The worker thread could not be spawned.
    #[error("failed to spawn link worker: {0}")]
    Spawn(std::io::Error),

    /// The worker did not exit within the join timeout; its thread and link
    /// descriptor are leaked.
    #[error("link worker failed to join after {0:?}")]
    JoinTimeout(Duration),

    /// The worker thread panicked.
    #[error("link worker panicked")]
    Panicked,
}

/// Errors raised by [`Transport`](crate::Transport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The link could not be acquired at open time.
    #[error("link unavailable: {0}")]
    LinkUnavailable(LinkError),

    /// Link error after the link was acquired.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// Worker lifecycle error.
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    /// RPC error.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// `open` was called on an open transport.
    #[error("transport is already open")]
    AlreadyOpen,

    /// The operation needs an open transport.
    #[error("transport is not open")]
    NotOpen,

    /// One or both close steps failed.
    #[error("{}", describe_close(.worker, .link))]
    Close {
        worker: Option<WorkerError>,
        link: Option<LinkError>,
    },
}

fn describe_close(worker: &Option<WorkerError>, link: &Option<LinkError>) -> String {
    let mut out = String::from("transport close failed");
    if let Some(err) = worker {
        let _ = write!(out, "; stopping worker: {err}");
    }
    if let Some(err) = link {
        let _ = write!(out, "; releasing link: {err}");
    }
    out
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_error_lists_every_failure() {
        let err = TransportError::Close {
            worker: Some(WorkerError::JoinTimeout(Duration::from_secs(1))),
            link: Some(LinkError::Io(std::io::Error::other("unlock failed"))),
        };
        assert_eq!(
            err.to_string(),
            "transport close failed; stopping worker: link worker failed to join after 1s; \
             releasing link: link I/O error: unlock failed"
        );
    }
}

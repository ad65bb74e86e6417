use std::path::PathBuf;

/// Errors that can occur while acquiring or using a device link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The link path could not be opened or connected.
    #[error("failed to open link {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The serial line could not be put into raw mode.
    #[error("failed to configure serial line {path}: {source}")]
    Configure {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The requested baud rate has no termios equivalent on this platform.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaudRate(u32),

    /// Another process holds the advisory lock on the link.
    #[error("link {path} is in use by another process")]
    Busy { path: PathBuf },

    /// Failed to bind a listening socket.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// A link address string could not be parsed.
    #[error("invalid link address {0:?}; expected unix:<path>, <path>@<baud> or <path>")]
    InvalidAddress(String),

    /// The medium is not available on this platform.
    #[error("{0} links are not supported on this platform")]
    Unsupported(&'static str),

    /// An I/O error occurred on the link.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;

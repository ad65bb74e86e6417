use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::LinkError;

/// Baud rate used when none is configured.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Where a link lives and how to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAddress {
    /// A serial tty at a fixed transmission rate.
    Serial { path: PathBuf, baud_rate: u32 },
    /// A Unix domain socket served by a simulator or emulator.
    Socket { path: PathBuf },
}

impl LinkAddress {
    /// Serial link at `baud_rate`.
    pub fn serial(path: impl Into<PathBuf>, baud_rate: u32) -> Self {
        Self::Serial {
            path: path.into(),
            baud_rate,
        }
    }

    /// Socket link.
    pub fn socket(path: impl Into<PathBuf>) -> Self {
        Self::Socket { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Serial { path, .. } | Self::Socket { path } => path,
        }
    }

    /// Medium name for diagnostics.
    pub fn medium(&self) -> &'static str {
        match self {
            Self::Serial { .. } => "serial",
            Self::Socket { .. } => "socket",
        }
    }
}

impl FromStr for LinkAddress {
    type Err = LinkError;

    /// Parse `unix:<path>`, `<path>@<baud>` or a bare serial `<path>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LinkError::InvalidAddress(s.to_string()));
        }
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(LinkError::InvalidAddress(s.to_string()));
            }
            return Ok(Self::socket(path));
        }
        match s.rsplit_once('@') {
            Some((path, baud)) => {
                let baud_rate = baud
                    .parse()
                    .map_err(|_| LinkError::InvalidAddress(s.to_string()))?;
                Ok(Self::serial(path, baud_rate))
            }
            None => Ok(Self::serial(s, DEFAULT_BAUD_RATE)),
        }
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { path, baud_rate } => write!(f, "{}@{baud_rate}", path.display()),
            Self::Socket { path } => write!(f, "unix:{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_medium_details() {
        assert_eq!(
            LinkAddress::serial("/dev/ttyACM0", 115_200).to_string(),
            "/dev/ttyACM0@115200"
        );
        assert_eq!(
            LinkAddress::socket("/tmp/dev.sock").to_string(),
            "unix:/tmp/dev.sock"
        );
    }

    #[test]
    fn parses_display_forms() {
        for text in ["/dev/ttyACM0@9600", "unix:/tmp/dev.sock"] {
            let address: LinkAddress = text.parse().unwrap();
            assert_eq!(address.to_string(), text);
        }
        assert_eq!(
            "/dev/ttyUSB1".parse::<LinkAddress>().unwrap(),
            LinkAddress::serial("/dev/ttyUSB1", DEFAULT_BAUD_RATE)
        );
    }

    #[test]
    fn rejects_malformed_addresses() {
        for text in ["", "unix:", "/dev/ttyACM0@fast"] {
            assert!(matches!(
                text.parse::<LinkAddress>(),
                Err(LinkError::InvalidAddress(_))
            ));
        }
    }

    #[test]
    fn medium_names() {
        assert_eq!(LinkAddress::serial("/dev/ttyUSB0", 9600).medium(), "serial");
        assert_eq!(LinkAddress::socket("/tmp/x.sock").medium(), "socket");
    }
}

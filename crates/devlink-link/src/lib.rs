//! Device link media.
//!
//! A link is the byte-stream medium carrying framed traffic to a device:
//! - Serial ttys (`/dev/ttyACM0` and friends), opened raw at a fixed baud rate
//!   (behind the default `serial` feature)
//! - Unix domain sockets, used by device simulators and emulators
//!
//! This is the lowest layer of devlink. Everything else builds on top of
//! the [`LinkStream`] type provided here. Unix only.

pub mod address;
pub mod error;
pub mod listener;
pub mod stream;

#[cfg(feature = "serial")]
mod serial;

pub use address::{LinkAddress, DEFAULT_BAUD_RATE};
pub use error::{LinkError, Result};
pub use listener::LinkListener;
pub use stream::LinkStream;

/// Link media compiled into this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub serial: bool,
    pub socket: bool,
}

impl Capabilities {
    /// Capabilities of the running build.
    pub fn detect() -> Self {
        Self {
            serial: cfg!(feature = "serial"),
            socket: true,
        }
    }

    /// Check that `address` can be opened by this build.
    pub fn check(&self, address: &LinkAddress) -> Result<()> {
        match address {
            LinkAddress::Serial { .. } if !self.serial => Err(LinkError::Unsupported("serial")),
            LinkAddress::Socket { .. } if !self.socket => Err(LinkError::Unsupported("socket")),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_medium_is_reported_by_name() {
        let caps = Capabilities {
            serial: false,
            socket: true,
        };
        let err = caps
            .check(&LinkAddress::serial("/dev/ttyACM0", DEFAULT_BAUD_RATE))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "serial links are not supported on this platform"
        );
        assert!(caps.check(&LinkAddress::socket("/tmp/sim.sock")).is_ok());
    }
}

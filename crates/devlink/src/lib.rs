//! Device automation over serial and socket links.
//!
//! devlink talks to an embedded device over a single byte stream: framed
//! RPC calls and device log text share one link, and batches of device
//! tasks run in parallel, one OS process per task, under a shared deadline.
//!
//! # Crate Structure
//!
//! - [`link`]: serial tty and Unix socket media, locking, readiness polling
//! - [`frame`]: HDLC-style frame codec with CRC-32 and address routing
//! - [`rpc`]: link worker, RPC channel, device log sink and [`rpc::Transport`]
//! - [`exec`]: process-isolated parallel task execution
//! - [`tasks`]: the built-in tasks the `devlink` binary can run

/// Re-export link types.
pub mod link {
    pub use devlink_link::*;
}

/// Re-export frame types.
pub mod frame {
    pub use devlink_frame::*;
}

/// Re-export transport and RPC types.
pub mod rpc {
    pub use devlink_rpc::*;
}

/// Re-export executor types.
pub mod exec {
    pub use devlink_exec::*;
}

pub mod tasks;

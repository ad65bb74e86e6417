use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use devlink_link::LinkAddress;
use devlink_rpc::{RpcConfig, TimeoutPolicy, Transport, TransportConfig};
use tracing::warn;

use crate::exit::{link_error, transport_error, CliError, CliResult, USAGE};
use crate::logging::LogLevel;
use crate::output::OutputFormat;

pub mod echo;
pub mod logs;
pub mod rpc;
pub mod run;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Call an automation RPC on a device.
    Rpc(RpcArgs),
    /// Round-trip a message through the device's echo service.
    Echo(EchoArgs),
    /// Print device log lines.
    Logs(LogsArgs),
    /// Run a batch of tasks in parallel, one process per task.
    Run(RunArgs),
    /// Serve a simulated device on a Unix socket.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, log_level: LogLevel) -> CliResult<i32> {
    match command {
        Command::Rpc(args) => rpc::run(args, format),
        Command::Echo(args) => echo::run(args, format),
        Command::Logs(args) => logs::run(args, format),
        Command::Run(args) => run::run(args, format, log_level),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Device link: `/dev/ttyACM0`, `/dev/ttyACM0@115200` or `unix:<socket>`.
    #[arg(long, short = 'p', env = "DEVLINK_PORT")]
    pub port: String,
    /// Baud rate for a serial port given without one.
    #[arg(long, env = "DEVLINK_BAUD")]
    pub baud: Option<u32>,
    /// RPC call timeout (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s")]
    pub call_timeout: String,
    /// Treat a call timeout as a declined call instead of an error.
    #[arg(long)]
    pub nack_on_timeout: bool,
}

impl LinkArgs {
    pub fn address(&self) -> CliResult<LinkAddress> {
        let address: LinkAddress = self
            .port
            .parse()
            .map_err(|err| link_error("invalid --port", err))?;
        match (address, self.baud) {
            (LinkAddress::Serial { path, .. }, Some(baud)) if !self.port.contains('@') => {
                Ok(LinkAddress::serial(path, baud))
            }
            (address, _) => Ok(address),
        }
    }

    pub fn transport_config(&self) -> CliResult<TransportConfig> {
        let timeout_policy = if self.nack_on_timeout {
            TimeoutPolicy::Nack
        } else {
            TimeoutPolicy::Error
        };
        Ok(TransportConfig {
            rpc: RpcConfig {
                call_timeout: parse_duration(&self.call_timeout)?,
                timeout_policy,
                ..RpcConfig::default()
            },
            ..TransportConfig::new(self.address()?)
        })
    }

    /// Open a transport to the device.
    pub fn open(&self) -> CliResult<Transport> {
        let mut transport = Transport::new(self.transport_config()?);
        transport
            .open()
            .map_err(|err| transport_error("open failed", err))?;
        Ok(transport)
    }
}

/// Close `transport`; the command's outcome is already decided.
pub fn close_transport(mut transport: Transport) {
    if let Err(err) = transport.close() {
        warn!(error = %err, "transport close failed");
    }
}

#[derive(Args, Debug)]
pub struct RpcArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Service name, relative to the automation namespace (e.g. Lighting).
    pub service: String,
    /// Method name (e.g. Set).
    pub method: String,
    /// Keyword arguments as key=value; values parse as JSON, else as text.
    #[arg(value_name = "KEY=VALUE")]
    pub kwargs: Vec<String>,
    /// Send to a fully qualified service name, ignoring the namespace.
    #[arg(long)]
    pub qualified: bool,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Message to echo.
    pub msg: String,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Stop after this long (e.g. 10s). Default: until interrupted.
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON file holding an array of task specs, or `-` for stdin.
    pub batch: PathBuf,
    /// Deadline for the whole batch (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
    /// Report failed tasks in their slots instead of failing the batch.
    #[arg(long)]
    pub collect: bool,
    /// Grace period between SIGTERM and SIGKILL for overdue tasks.
    #[arg(long, default_value = "3s")]
    pub terminate_grace: String,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Exit after serving N connections.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(port: &str, baud: Option<u32>) -> LinkArgs {
        LinkArgs {
            port: port.to_string(),
            baud,
            call_timeout: "1s".to_string(),
            nack_on_timeout: false,
        }
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn baud_applies_to_bare_serial_ports() {
        assert_eq!(
            link("/dev/ttyACM0", Some(9600)).address().unwrap(),
            LinkAddress::serial("/dev/ttyACM0", 9600)
        );
        assert_eq!(
            link("/dev/ttyACM0@57600", Some(9600)).address().unwrap(),
            LinkAddress::serial("/dev/ttyACM0", 57600)
        );
        assert_eq!(
            link("unix:/tmp/dev.sock", Some(9600)).address().unwrap(),
            LinkAddress::socket("/tmp/dev.sock")
        );
    }

    #[test]
    fn transport_config_carries_call_settings() {
        let mut args = link("unix:/tmp/dev.sock", None);
        args.call_timeout = "250ms".to_string();
        args.nack_on_timeout = true;
        let config = args.transport_config().unwrap();
        assert_eq!(config.rpc.call_timeout, Duration::from_millis(250));
        assert_eq!(config.rpc.timeout_policy, TimeoutPolicy::Nack);
    }
}

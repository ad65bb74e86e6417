use std::path::PathBuf;

use devlink_link::{LinkAddress, LinkListener};
use devlink_rpc::Simulator;
use serde::Serialize;

use crate::cmd::SimulateArgs;
use crate::exit::{link_error, rpc_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct ListeningOutput {
    address: String,
    max_connections: Option<usize>,
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let listener = LinkListener::bind(&args.path).map_err(|err| link_error("bind failed", err))?;
    install_ctrlc_handler(args.path.clone())?;

    let address = LinkAddress::socket(&args.path).to_string();
    match format {
        OutputFormat::Json => print_json(&ListeningOutput {
            address,
            max_connections: args.count,
        }),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("simulating device on {address}")
        }
    }

    Simulator::demo()
        .run(&listener, args.count)
        .map_err(|err| rpc_error("simulator failed", err))?;
    Ok(SUCCESS)
}

/// The accept loop blocks, so Ctrl-C exits directly after removing the
/// socket file the listener would otherwise clean up on drop.
fn install_ctrlc_handler(path: PathBuf) -> CliResult<()> {
    ctrlc::set_handler(move || {
        let _ = std::fs::remove_file(&path);
        std::process::exit(SUCCESS);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

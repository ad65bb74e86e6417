use serde_json::json;

use crate::cmd::{close_transport, EchoArgs};
use crate::exit::{transport_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_reply, OutputFormat, ReplyOutput};

pub fn run(args: EchoArgs, format: OutputFormat) -> CliResult<i32> {
    let transport = args.link.open()?;
    let echoed = transport.echo(&args.msg);
    let address = transport.address().to_string();
    close_transport(transport);
    let (ack, msg) = echoed.map_err(|err| transport_error("echo failed", err))?;

    print_reply(
        &ReplyOutput {
            address,
            service: devlink_rpc::ECHO_SERVICE,
            method: devlink_rpc::ECHO_METHOD,
            ack,
            payload: json!({ "msg": msg }),
        },
        format,
    );
    Ok(if ack && msg == args.msg { SUCCESS } else { FAILURE })
}

use devlink::tasks::payload_value;
use serde_json::{Map, Value};

use crate::cmd::{close_transport, RpcArgs};
use crate::exit::{transport_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_reply, OutputFormat, ReplyOutput};

pub fn run(args: RpcArgs, format: OutputFormat) -> CliResult<i32> {
    let kwargs = parse_kwargs(&args.kwargs)?;
    let transport = args.link.open()?;

    let reply = if args.qualified {
        transport
            .rpc()
            .and_then(|rpc| Ok(rpc.call_qualified(&args.service, &args.method, &kwargs)?))
    } else {
        transport.call(&args.service, &args.method, &kwargs)
    };
    let address = transport.address().to_string();
    close_transport(transport);
    let reply = reply.map_err(|err| transport_error("call failed", err))?;

    print_reply(
        &ReplyOutput {
            address,
            service: &args.service,
            method: &args.method,
            ack: reply.ack,
            payload: payload_value(&reply.payload),
        },
        format,
    );
    Ok(if reply.ack { SUCCESS } else { FAILURE })
}

/// `key=value` pairs; a value that is not JSON is taken as a string.
fn parse_kwargs(pairs: &[String]) -> CliResult<Map<String, Value>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, raw) = pair.split_once('=').ok_or_else(|| {
                CliError::new(USAGE, format!("expected KEY=VALUE, got {pair:?}"))
            })?;
            if key.is_empty() {
                return Err(CliError::new(USAGE, format!("empty key in {pair:?}")));
            }
            let value =
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

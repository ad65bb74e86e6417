use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("devlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: devlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("DEVLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    let capabilities = devlink_link::Capabilities::detect();
    println!(
        "media: serial={}, socket={}",
        capabilities.serial, capabilities.socket
    );
    let registry = devlink::tasks::registry();
    println!("tasks: {}", registry.names().collect::<Vec<_>>().join(", "));

    Ok(SUCCESS)
}

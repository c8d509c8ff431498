use wsmux_frame::{DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_CHUNK_SIZE, PROTOCOL_VERSION};
use wsmux_peer::DEFAULT_MAX_MESSAGE_SIZE;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("wsmux {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: wsmux");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("protocol_version: {PROTOCOL_VERSION}");
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "build_target: {}",
        option_env!("WSMUX_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("default_max_chunk_size: {DEFAULT_MAX_CHUNK_SIZE}");
    println!("default_max_body_size: {DEFAULT_MAX_BODY_SIZE}");
    println!("default_max_message_size: {DEFAULT_MAX_MESSAGE_SIZE}");
    println!("features: peer={}, cli=true", cfg!(feature = "peer"));

    Ok(SUCCESS)
}

use mculink_frame::{MAX_ENCODED_FRAME, MAX_PAYLOAD};
use mculink_transport::DEFAULT_BAUD_RATE;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("mculink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: mculink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("MCULINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: update={}, sim={}, async={}, cli=true",
        cfg!(feature = "update"),
        cfg!(feature = "sim"),
        cfg!(feature = "async")
    );
    println!(
        "link: {DEFAULT_BAUD_RATE} baud, payload <= {MAX_PAYLOAD} bytes, frame <= {MAX_ENCODED_FRAME} bytes"
    );

    Ok(SUCCESS)
}

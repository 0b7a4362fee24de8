use std::fs;

use mculink_update::{Bitstream, FpgaUpdater};
use tracing::info;

use crate::cmd::{run_update, FpgaArgs, LinkArgs};
use crate::exit::{CliError, CliResult, DATA_INVALID};
use crate::output::OutputFormat;

pub fn run(args: FpgaArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let blob = fs::read(&args.bitstream).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("cannot read {}: {err}", args.bitstream.display()),
        )
    })?;
    let bitstream = Bitstream::new(blob)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid bitstream: {err}")))?;
    info!(bytes = bitstream.len(), "loaded FPGA bitstream");

    run_update(FpgaUpdater::new(bitstream), &args.update, link, format)
}

use std::fs;

use mculink_update::dspic::PAGE_SIZE;
use mculink_update::{DspicUpdater, FirmwareImage, ImageError, VersionPrefix};
use tracing::info;

use crate::cmd::{run_update, FlashArgs, LinkArgs};
use crate::exit::{CliError, CliResult, DATA_INVALID};
use crate::output::OutputFormat;

pub fn run(args: FlashArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let blob = fs::read(&args.image).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("cannot read {}: {err}", args.image.display()),
        )
    })?;
    let prefix = if args.versioned {
        VersionPrefix::NulTerminated
    } else {
        VersionPrefix::None
    };
    let invalid = |err: ImageError| CliError::new(DATA_INVALID, format!("invalid firmware image: {err}"));
    let image = FirmwareImage::parse(blob, PAGE_SIZE, prefix).map_err(invalid)?;
    info!(
        pages = image.page_count(),
        version = image.version().unwrap_or("none"),
        crc32 = format_args!("{:08x}", image.crc32()),
        "loaded firmware image"
    );

    let updater = DspicUpdater::new(image).map_err(invalid)?;
    run_update(updater, &args.update, link, format)
}

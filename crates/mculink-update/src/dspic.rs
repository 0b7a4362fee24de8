//! dsPIC controller firmware update through its UART bootloader.
//!
//! The bootloader speaks `Firmware` frames whose first payload byte is a
//! bootloader command; it answers every frame with a `FirmwareAck` result
//! code and ignores the identifier.

use mculink_channel::ids::{command, param};
use mculink_channel::{is_bootloader_reply, ChannelError};
use tracing::{debug, error, info, warn};

use crate::error::{ImageError, Result, UpdateError};
use crate::image::FirmwareImage;
use crate::procedure::{AttemptContext, UpdateOutcome, UpdateProcedure};

/// Bootloader command bytes.
pub mod bootloader {
    pub const WRITE_PM: u8 = 0x03;
    pub const START_APP: u8 = 0x08;
    pub const READ_ID: u8 = 0x09;
    pub const APP_DELETE: u8 = 0x0B;
    pub const WRITE_HEADER: u8 = 0x0C;
}

/// Bytes of program data per `WRITE_PM` frame.
pub const PAGE_SIZE: usize = 64;
/// Word address of the first application page.
pub const APP_START: u32 = 0x3C00;
/// Result code for an accepted step.
pub const ACK_OK: u8 = 0;

const HEADER_VERSION: u8 = 1;

/// Addresses where the bootloader answers a good write with a legacy code.
const COMPATIBILITY_ACKS: &[(u32, u8)] = &[(0x13000, 16)];

/// Word address of page `index`. Two bytes of data per program word.
pub fn page_address(index: usize) -> u32 {
    APP_START + (index * PAGE_SIZE / 2) as u32
}

/// Whether `code` acknowledges a page write at `address`.
pub fn page_accepted(address: u32, code: u8) -> bool {
    code == ACK_OK || COMPATIBILITY_ACKS.contains(&(address, code))
}

/// `[WRITE_PM][address LE][data]`
pub fn page_payload(address: u32, page: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + 4 + page.len());
    payload.push(bootloader::WRITE_PM);
    payload.extend_from_slice(&address.to_le_bytes());
    payload.extend_from_slice(page);
    payload
}

/// `[WRITE_HEADER][version][size LE][crc32 LE]`
pub fn header_payload(image: &FirmwareImage) -> Vec<u8> {
    let mut payload = Vec::with_capacity(10);
    payload.push(bootloader::WRITE_HEADER);
    payload.push(HEADER_VERSION);
    payload.extend_from_slice(&(image.len() as u32).to_le_bytes());
    payload.extend_from_slice(&image.crc32().to_le_bytes());
    payload
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Application,
    Bootloader,
}

/// Flashes a [`FirmwareImage`] into the dsPIC controller.
#[derive(Debug, Clone)]
pub struct DspicUpdater {
    image: FirmwareImage,
}

impl DspicUpdater {
    pub fn new(image: FirmwareImage) -> std::result::Result<Self, ImageError> {
        if image.page_size() != PAGE_SIZE {
            return Err(ImageError::PageSize {
                size: image.page_size(),
                expected: PAGE_SIZE,
            });
        }
        Ok(Self { image })
    }

    pub fn image(&self) -> &FirmwareImage {
        &self.image
    }

    fn check_mode(&self, ctx: &AttemptContext<'_>) -> Result<Mode> {
        ctx.check()?;
        match ctx.engine.read_parameter(param::MODE) {
            Ok(_) => Ok(Mode::Application),
            Err(err) if is_bootloader_reply(&err) => Ok(Mode::Bootloader),
            Err(ChannelError::ReplyTimeout(_)) => {
                debug!("no answer to mode read, probing for bootloader");
                ctx.check()?;
                let code = ctx.engine.send_firmware(&[bootloader::READ_ID])?;
                debug!(code, "bootloader answered id probe");
                Ok(Mode::Bootloader)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Compare the running application version with the image's.
    fn running_version_matches(&self, ctx: &AttemptContext<'_>) -> Result<bool> {
        let Some(expected) = self.image.version() else {
            info!("image carries no version, programming unconditionally");
            return Ok(false);
        };
        ctx.check()?;
        let running = ctx
            .engine
            .read_string(param::SMART_MAINBOARD_APP_SW_VERSION)?;
        info!(running = %running, expected, "controller application version");
        Ok(running == expected)
    }

    fn enter_bootloader(&self, ctx: &AttemptContext<'_>) -> Result<()> {
        ctx.check()?;
        info!("requesting bootloader");
        let ack = ctx.engine.send_command(command::UPGRADE_MCU_FIRMWARE)?;
        if let Some(&code) = ack.first() {
            if code != ACK_OK {
                warn!(code, "controller refused to enter bootloader");
                return Err(UpdateError::Rejected {
                    step: "enter bootloader",
                    code,
                });
            }
        }

        for attempt in 1..=ctx.policy.bootloader_confirm_tries {
            ctx.pause(ctx.policy.boot_delay)?;
            match ctx.engine.send_firmware(&[bootloader::READ_ID]) {
                Ok(code) => {
                    info!(code, attempt, "bootloader confirmed");
                    return Ok(());
                }
                Err(err) if err.is_timeout() || matches!(err, ChannelError::UnexpectedReply { .. }) => {
                    debug!(attempt, error = %err, "bootloader not answering yet");
                }
                Err(err) => return Err(err.into()),
            }
        }

        error!(
            tries = ctx.policy.bootloader_confirm_tries,
            "controller never answered from its bootloader"
        );
        Err(UpdateError::BootloaderNotConfirmed)
    }

    fn firmware_step(&self, ctx: &AttemptContext<'_>, step: &'static str, payload: &[u8]) -> Result<()> {
        ctx.check()?;
        let code = ctx.engine.send_firmware(payload)?;
        if code != ACK_OK {
            warn!(step, code, "bootloader rejected step");
            return Err(UpdateError::Rejected { step, code });
        }
        Ok(())
    }

    /// Write every page in increasing address order, stopping at the first
    /// rejected page. Returns the number of pages written.
    fn transfer_pages(&self, ctx: &AttemptContext<'_>) -> Result<usize> {
        let total = self.image.page_count();
        info!(pages = total, bytes = self.image.len(), "transferring image");

        for (index, page) in self.image.pages().enumerate() {
            ctx.check()?;
            let address = page_address(index);
            let code = ctx.engine.send_firmware(&page_payload(address, page))?;
            if !page_accepted(address, code) {
                error!(page = index, address, code, "page rejected, abandoning transfer");
                return Err(UpdateError::PageRejected {
                    page: index,
                    address,
                    code,
                });
            }
            debug!(page = index, address, remaining = total - index - 1, "page written");
        }
        Ok(total)
    }

    /// Ask the bootloader to start the application and wait for it to
    /// answer a mode read.
    fn boot_application(&self, ctx: &AttemptContext<'_>) -> Result<bool> {
        ctx.check()?;
        info!("starting application");
        let code = ctx.engine.send_firmware(&[bootloader::START_APP])?;
        if code != ACK_OK {
            warn!(code, "bootloader refused to start application");
            return Ok(false);
        }

        for attempt in 1..=ctx.policy.bootloader_confirm_tries {
            ctx.pause(ctx.policy.boot_delay)?;
            match ctx.engine.read_parameter(param::MODE) {
                Ok(_) => {
                    info!(attempt, "application running");
                    return Ok(true);
                }
                Err(err) if err.is_timeout() || is_bootloader_reply(&err) => {
                    debug!(attempt, error = %err, "application not up yet");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(false)
    }

    fn verify_boot(&self, ctx: &AttemptContext<'_>) -> Result<()> {
        let Some(expected) = self.image.version() else {
            return Ok(());
        };
        ctx.check()?;
        let found = ctx
            .engine
            .read_string(param::SMART_MAINBOARD_APP_SW_VERSION)?;
        if found != expected {
            error!(found = %found, expected, "unexpected version after update");
            return Err(UpdateError::VersionMismatch {
                expected: expected.to_owned(),
                found,
            });
        }
        Ok(())
    }

    /// Erase, transfer, write header, boot, verify. Nothing is erased
    /// before this point.
    fn program(&self, ctx: &AttemptContext<'_>) -> Result<()> {
        info!("erasing application");
        self.firmware_step(ctx, "erase", &[bootloader::APP_DELETE])?;
        self.transfer_pages(ctx)?;
        info!(crc = self.image.crc32(), size = self.image.len(), "writing image header");
        self.firmware_step(ctx, "write header", &header_payload(&self.image))?;
        if !self.boot_application(ctx)? {
            return Err(UpdateError::AppDidNotStart);
        }
        self.verify_boot(ctx)?;
        info!("controller firmware updated");
        Ok(())
    }
}

impl UpdateProcedure for DspicUpdater {
    fn family(&self) -> &'static str {
        "dspic"
    }

    fn run(&self, ctx: &AttemptContext<'_>) -> Result<UpdateOutcome> {
        match self.check_mode(ctx)? {
            Mode::Bootloader => {
                info!("controller is in its bootloader");
                if self.boot_application(ctx)? {
                    if self.running_version_matches(ctx)? {
                        return Ok(UpdateOutcome::AlreadyCurrent);
                    }
                    self.enter_bootloader(ctx)?;
                }
                self.program(ctx)?;
            }
            Mode::Application => {
                if self.running_version_matches(ctx)? {
                    info!("controller firmware is current");
                    return Ok(UpdateOutcome::AlreadyCurrent);
                }
                self.enter_bootloader(ctx)?;
                self.program(ctx)?;
            }
        }
        Ok(UpdateOutcome::Updated)
    }
}

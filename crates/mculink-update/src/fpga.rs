//! FPGA bitstream configuration through the controller.
//!
//! Only iCE40 boards need a bitstream from the host; MAX10 boards configure
//! themselves from flash. The bitstream goes out as `Command` frames
//! carrying `[counter u16 BE][count u8][data]`.

use mculink_channel::ids::{command, param};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::{Result, UpdateError};
use crate::image::Bitstream;
use crate::procedure::{AttemptContext, UpdateOutcome, UpdateProcedure};

/// Bitstream bytes per command frame.
pub const CHUNK_SIZE: usize = 111;

/// FPGA fitted on the controller board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FpgaType {
    Max10,
    Ice40,
    Unknown(u8),
}

impl FpgaType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Max10,
            1 => Self::Ice40,
            other => Self::Unknown(other),
        }
    }

    pub fn needs_bitstream(self) -> bool {
        self == Self::Ice40
    }
}

/// `[counter BE][count][data]`
pub fn chunk_payload(counter: u16, chunk: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(3 + chunk.len());
    payload.extend_from_slice(&counter.to_be_bytes());
    payload.push(chunk.len() as u8);
    payload.extend_from_slice(chunk);
    payload
}

/// Configures the FPGA from a [`Bitstream`] when the controller asks for it.
#[derive(Debug, Clone)]
pub struct FpgaUpdater {
    bitstream: Bitstream,
}

impl FpgaUpdater {
    pub fn new(bitstream: Bitstream) -> Self {
        Self { bitstream }
    }

    fn needs_configuration(&self, ctx: &AttemptContext<'_>) -> Result<bool> {
        ctx.check()?;
        Ok(ctx.engine.read_u8(param::FPGA_NEEDS_CONFIGURATION)? != 0)
    }

    /// Stream every chunk; any reply other than a command ack aborts.
    fn stream(&self, ctx: &AttemptContext<'_>) -> Result<usize> {
        let total = self.bitstream.chunk_count(CHUNK_SIZE);
        info!(chunks = total, bytes = self.bitstream.len(), "streaming FPGA bitstream");

        for (index, chunk) in self.bitstream.chunks(CHUNK_SIZE).enumerate() {
            ctx.check()?;
            // The controller's counter is 16 bits and wraps the same way.
            let counter = index as u16;
            if let Err(err) = ctx
                .engine
                .send_command_with(command::FPGA_BITSTREAM_DATA, &chunk_payload(counter, chunk))
            {
                error!(chunk = index, error = %err, "bitstream chunk failed");
                return Err(err.into());
            }
            debug!(chunk = index, len = chunk.len(), of = total, "bitstream chunk sent");
        }
        Ok(total)
    }
}

impl UpdateProcedure for FpgaUpdater {
    fn family(&self) -> &'static str {
        "fpga"
    }

    fn run(&self, ctx: &AttemptContext<'_>) -> Result<UpdateOutcome> {
        ctx.check()?;
        let fpga = FpgaType::from_code(ctx.engine.read_u8(param::FPGA_TYPE)?);
        info!(fpga = ?fpga, "FPGA type");
        if !fpga.needs_bitstream() {
            return Ok(UpdateOutcome::NotRequired);
        }

        if !self.needs_configuration(ctx)? {
            info!("FPGA already configured");
            return Ok(UpdateOutcome::AlreadyCurrent);
        }

        self.stream(ctx)?;

        if self.needs_configuration(ctx)? {
            error!("FPGA still unconfigured after bitstream");
            return Err(UpdateError::StillUnconfigured);
        }
        info!("FPGA configured");
        Ok(UpdateOutcome::Updated)
    }
}

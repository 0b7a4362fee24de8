//! Firmware update orchestration for the controller MCU.
//!
//! Each controller family implements [`UpdateProcedure`]: detect what the
//! device is running, transfer fixed-size pages or chunks, then verify.
//! A [`Supervisor`] runs the procedure on a worker thread with a per-attempt
//! timeout, retries with linear back-off, and always leaves the request
//! channel free.
//!
//! A failed run never reports partial success. Nothing is erased before
//! the transfer is about to start, and boot plus version verification gate
//! acceptance, so the previous firmware stays in place on failure.

pub mod dspic;
pub mod error;
pub mod fpga;
pub mod image;
pub mod procedure;
pub mod supervisor;

pub use dspic::DspicUpdater;
pub use error::{ImageError, Result, UpdateError};
pub use fpga::{FpgaType, FpgaUpdater};
pub use image::{Bitstream, FirmwareImage, VersionPrefix};
pub use procedure::{AttemptContext, CancelToken, UpdateOutcome, UpdateProcedure};
pub use supervisor::{AttemptOutcome, AttemptRecord, Supervisor, UpdatePolicy, UpdateReport};

//! Host side of the charger's controller MCU link.
//!
//! mculink talks to the Controller MCU over a UART: COBS-framed,
//! CRC-checked messages, one request in flight at a time, plus firmware
//! update for the controller (dsPIC) and its FPGA.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial port and in-memory byte streams
//! - [`frame`]: message codec, frame parser, reader/writer
//! - [`channel`]: single-flight request engine and typed parameter API
//! - [`update`]: supervised firmware update (behind `update` feature)

/// Re-export transport types.
pub mod transport {
    pub use mculink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use mculink_frame::*;
}

/// Re-export channel types.
pub mod channel {
    pub use mculink_channel::*;
}

/// Re-export update types (requires `update` feature).
#[cfg(feature = "update")]
pub mod update {
    pub use mculink_update::*;
}

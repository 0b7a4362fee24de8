//! Byte-stream link to the Controller MCU.
//!
//! Provides a unified stream type over the ways the application processor
//! can reach the controller:
//! - A UART exposed as a serial port device
//! - An in-process memory pair (tests, device simulation)
//!
//! This is the lowest layer of mculink. Everything else builds on top of
//! the [`McuStream`] type provided here.

pub mod error;
pub mod memory;
pub mod serial;
pub mod stream;

pub use error::{Result, TransportError};
pub use serial::{LinkConfig, SerialLink, DEFAULT_BAUD_RATE};
pub use stream::McuStream;

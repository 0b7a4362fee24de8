//! Single-flight request channel to the controller MCU.
//!
//! This is the "just works" layer. Start a [`ProtocolEngine`] on a stream,
//! then read parameters, write parameters and send commands with typed
//! helpers. Every wait is bounded; every failure is counted in
//! [`LinkStats`].
//!
//! ```no_run
//! use mculink_channel::{ids::param, ProtocolEngine};
//! use mculink_transport::SerialLink;
//!
//! let engine = ProtocolEngine::start(SerialLink::open("/dev/ttymxc2")?)?;
//! let max_current = engine.read_f32(param::CURRENT_IN_MAXIMUM)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod ids;
pub mod params;
pub mod stats;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use config::ChannelConfig;
pub use engine::{ProtocolEngine, ReplyGuard};
pub use error::{ChannelError, Result};
pub use params::is_bootloader_reply;
pub use stats::LinkStats;

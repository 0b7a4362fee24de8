use std::path::Path;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPortInfo, StopBits};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::McuStream;

/// UART speed used between the application processor and the controller.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Configuration for opening a serial link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Line speed. Default: 115200.
    pub baud_rate: u32,
    /// Read timeout applied to the opened handle.
    pub read_timeout: Duration,
    /// Write timeout applied to the opened handle.
    pub write_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(20),
            write_timeout: Duration::from_millis(500),
        }
    }
}

/// UART link to the Controller MCU through a serial port device.
///
/// Opens the port 8N1 without flow control, matching the controller's
/// fixed line settings.
pub struct SerialLink;

impl SerialLink {
    /// Open a serial port device with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<McuStream> {
        Self::open_with_config(path, &LinkConfig::default())
    }

    /// Open a serial port device with explicit settings.
    pub fn open_with_config(path: impl AsRef<Path>, config: &LinkConfig) -> Result<McuStream> {
        let path = path.as_ref();
        let name = path.to_string_lossy();

        let port = serialport::new(name.as_ref(), config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.read_timeout)
            .open()
            .map_err(|source| TransportError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        info!(?path, baud = config.baud_rate, "opened serial link");
        Ok(McuStream::from_serial(port))
    }

    /// List serial port devices visible to this host.
    pub fn available_ports() -> Result<Vec<SerialPortInfo>> {
        let ports = serialport::available_ports()?;
        debug!(count = ports.len(), "enumerated serial ports");
        Ok(ports)
    }

    /// Transport name for diagnostics.
    pub fn transport_name() -> &'static str {
        "serial"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_controller_uart() {
        let cfg = LinkConfig::default();
        assert_eq!(cfg.baud_rate, 115_200);
        assert!(cfg.read_timeout < cfg.write_timeout);
    }

    #[test]
    fn open_missing_device_reports_path() {
        let path = std::env::temp_dir().join(format!(
            "mculink-missing-tty-{}",
            std::process::id()
        ));
        let err = SerialLink::open(&path).unwrap_err();
        match err {
            TransportError::Open { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }
}

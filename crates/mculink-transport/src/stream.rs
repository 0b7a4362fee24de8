use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};

use crate::error::Result;
use crate::memory::MemoryStream;

/// Stand-in for "no timeout" on serial handles, which always need one.
const BLOCKING_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// How often a flush re-checks the serial output queue.
const DRAIN_POLL: Duration = Duration::from_millis(1);

/// Wait for `queued` to report an empty output queue, giving up with
/// `TimedOut` once `timeout` has passed. `None` waits indefinitely.
fn drain_within(
    timeout: Option<Duration>,
    mut queued: impl FnMut() -> std::io::Result<u32>,
) -> std::io::Result<()> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let pending = queued()?;
        if pending == 0 {
            return Ok(());
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(std::io::Error::new(
                ErrorKind::TimedOut,
                format!("{pending} bytes still queued for transmission"),
            ));
        }
        thread::sleep(DRAIN_POLL);
    }
}

/// A connected link to the Controller MCU; implements Read + Write.
///
/// This is the fundamental I/O type returned by transport operations.
/// The transport task reads from one clone while the request path writes
/// to another, so every backend must support [`McuStream::try_clone`].
pub struct McuStream {
    inner: McuStreamInner,
    write_timeout: Option<Duration>,
}

enum McuStreamInner {
    Serial(Box<dyn SerialPort>),
    Memory(MemoryStream),
}

impl Read for McuStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            McuStreamInner::Serial(port) => port.read(buf),
            McuStreamInner::Memory(stream) => stream.read(buf),
        }
    }
}

impl Write for McuStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            McuStreamInner::Serial(port) => port.write(buf),
            McuStreamInner::Memory(stream) => stream.write(buf),
        }
    }

    /// On serial links this waits for the output queue to empty, bounded
    /// by the write timeout rather than left to the driver's drain.
    fn flush(&mut self) -> std::io::Result<()> {
        let timeout = self.write_timeout;
        match &mut self.inner {
            McuStreamInner::Serial(port) => {
                drain_within(timeout, || port.bytes_to_write().map_err(Into::into))
            }
            McuStreamInner::Memory(stream) => stream.flush(),
        }
    }
}

impl McuStream {
    pub(crate) fn from_serial(port: Box<dyn SerialPort>) -> Self {
        Self {
            inner: McuStreamInner::Serial(port),
            write_timeout: None,
        }
    }

    pub(crate) fn from_memory(stream: MemoryStream) -> Self {
        Self {
            inner: McuStreamInner::Memory(stream),
            write_timeout: None,
        }
    }

    /// Create two connected in-memory endpoints.
    ///
    /// Bytes written to one side are read from the other. Dropping every
    /// clone of one side makes the other side observe end-of-stream.
    pub fn pair() -> (Self, Self) {
        let (left, right) = MemoryStream::pair();
        (Self::from_memory(left), Self::from_memory(right))
    }

    /// Set read timeout on the underlying stream.
    ///
    /// Serial handles share one timeout for both directions, so the last
    /// call on a given clone wins.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            McuStreamInner::Serial(port) => {
                port.set_timeout(timeout.unwrap_or(BLOCKING_TIMEOUT))?;
                Ok(())
            }
            McuStreamInner::Memory(stream) => {
                stream.set_read_timeout(timeout);
                Ok(())
            }
        }
    }

    /// Set write timeout on the underlying stream.
    ///
    /// Also bounds how long a flush waits for queued bytes to reach the
    /// line.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.write_timeout = timeout;
        match &mut self.inner {
            McuStreamInner::Serial(port) => {
                port.set_timeout(timeout.unwrap_or(BLOCKING_TIMEOUT))?;
                Ok(())
            }
            // Memory writes never block.
            McuStreamInner::Memory(_) => Ok(()),
        }
    }

    /// Discard any bytes received but not yet read.
    pub fn clear_input(&mut self) -> Result<()> {
        match &mut self.inner {
            McuStreamInner::Serial(port) => {
                port.clear(ClearBuffer::Input)?;
                Ok(())
            }
            McuStreamInner::Memory(stream) => {
                stream.clear_input();
                Ok(())
            }
        }
    }

    /// Try to clone this stream (a second handle to the same link).
    pub fn try_clone(&self) -> Result<Self> {
        let mut clone = match &self.inner {
            McuStreamInner::Serial(port) => Self::from_serial(port.try_clone()?),
            McuStreamInner::Memory(stream) => Self::from_memory(stream.clone()),
        };
        clone.write_timeout = self.write_timeout;
        Ok(clone)
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            McuStreamInner::Serial(_) => "serial",
            McuStreamInner::Memory(_) => "memory",
        }
    }
}

impl std::fmt::Debug for McuStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            McuStreamInner::Serial(port) => f
                .debug_struct("McuStream")
                .field("type", &"serial")
                .field("name", &port.name())
                .finish(),
            McuStreamInner::Memory(_) => f
                .debug_struct("McuStream")
                .field("type", &"memory")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_roundtrip_through_clones() {
        let (mut host, device) = McuStream::pair();
        let mut device_reader = device.try_clone().unwrap();
        let mut device_writer = device;

        host.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        device_reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        device_writer.write_all(b"pong").unwrap();
        host.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn read_timeout_reports_timed_out() {
        let (mut host, _device) = McuStream::pair();
        host.set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        let mut buf = [0u8; 1];
        let err = host.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn clear_input_discards_pending_bytes() {
        let (mut host, mut device) = McuStream::pair();
        device.write_all(b"stale").unwrap();
        host.clear_input().unwrap();
        device.write_all(b"x").unwrap();

        let mut buf = [0u8; 8];
        let n = host.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"x");
    }

    #[test]
    fn drain_waits_for_queue_to_empty() {
        let mut queued = [64u32, 12, 0].into_iter();
        drain_within(Some(Duration::from_secs(1)), || Ok(queued.next().unwrap_or(0))).unwrap();
        assert_eq!(queued.next(), None);
    }

    #[test]
    fn drain_gives_up_after_write_timeout() {
        let started = Instant::now();
        let err = drain_within(Some(Duration::from_millis(20)), || Ok(5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn drain_passes_on_query_errors() {
        let err = drain_within(None, || Err(std::io::Error::other("gone"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[test]
    fn clone_keeps_write_timeout() {
        let (mut host, _device) = McuStream::pair();
        host.set_write_timeout(Some(Duration::from_millis(40)))
            .unwrap();
        let clone = host.try_clone().unwrap();
        assert_eq!(clone.write_timeout, Some(Duration::from_millis(40)));
    }

    #[test]
    fn transport_name_and_debug() {
        let (host, _device) = McuStream::pair();
        assert_eq!(host.transport_name(), "memory");
        assert!(format!("{host:?}").contains("memory"));
    }
}

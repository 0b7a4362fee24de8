//! In-process link endpoints.
//!
//! Used by tests and the device simulator in place of a UART. Reads block
//! until data arrives, the configured read timeout elapses (`TimedOut`), or
//! the peer endpoint is dropped (EOF).

use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Default)]
struct PipeState {
    data: VecDeque<u8>,
    closed: bool,
}

/// One direction of the link.
#[derive(Default)]
struct Pipe {
    state: Mutex<PipeState>,
    ready: Condvar,
}

impl Pipe {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        // A poisoned pipe only means a test thread panicked mid-write; the
        // byte queue itself is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }
}

/// Shared by every clone of one side; closes both directions on drop.
struct Endpoint {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.tx.close();
        self.rx.close();
    }
}

/// One side of an in-memory link.
#[derive(Clone)]
pub struct MemoryStream {
    end: Arc<Endpoint>,
    read_timeout: Option<Duration>,
}

impl MemoryStream {
    pub(crate) fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Pipe::default());
        let b_to_a = Arc::new(Pipe::default());
        let left = Self {
            end: Arc::new(Endpoint {
                rx: Arc::clone(&b_to_a),
                tx: Arc::clone(&a_to_b),
            }),
            read_timeout: None,
        };
        let right = Self {
            end: Arc::new(Endpoint {
                rx: a_to_b,
                tx: b_to_a,
            }),
            read_timeout: None,
        };
        (left, right)
    }

    pub(crate) fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub(crate) fn clear_input(&self) {
        self.end.rx.lock().data.clear();
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let pipe = &self.end.rx;
        let deadline = self.read_timeout.map(|t| Instant::now() + t);
        let mut state = pipe.lock();

        while state.data.is_empty() {
            if state.closed {
                return Ok(0);
            }
            state = match deadline {
                None => pipe.ready.wait(state).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(io::Error::from(ErrorKind::TimedOut));
                    }
                    pipe.ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }

        let n = buf.len().min(state.data.len());
        for (slot, byte) in buf.iter_mut().zip(state.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let pipe = &self.end.tx;
        let mut state = pipe.lock();
        if state.closed {
            return Err(io::Error::from(ErrorKind::BrokenPipe));
        }
        state.data.extend(buf.iter().copied());
        drop(state);
        pipe.ready.notify_all();
        Ok(buf.len())
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

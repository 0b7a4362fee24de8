use std::fmt;
use std::io::{ErrorKind, Read};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mculink_frame::{FrameConfig, FrameParser, FrameStats, FrameWriter, Message};
use mculink_transport::McuStream;
use tracing::{debug, error, info, trace, warn};

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::stats::{LinkCounters, LinkStats};

const RX_CHUNK_SIZE: usize = 256;

/// Poisoning only means another caller panicked while holding the lock;
/// the guarded state is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// The single-request gate.
///
/// `std::sync::Mutex` has no timed lock, so the hold is an `Option<token>`
/// behind a mutex with a condvar. Each acquisition gets a fresh token, so a
/// guard whose hold was force-released cannot release a later holder.
struct Gate {
    holder: Mutex<Option<u64>>,
    freed: Condvar,
    next_token: AtomicU64,
}

impl Gate {
    fn new() -> Self {
        Self {
            holder: Mutex::new(None),
            freed: Condvar::new(),
            next_token: AtomicU64::new(0),
        }
    }

    fn acquire(&self, timeout: Duration) -> Option<u64> {
        let deadline = Instant::now() + timeout;
        let mut holder = lock(&self.holder);
        while holder.is_some() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            holder = self
                .freed
                .wait_timeout(holder, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        *holder = Some(token);
        Some(token)
    }

    fn release(&self, token: u64) -> bool {
        let mut holder = lock(&self.holder);
        if *holder != Some(token) {
            return false;
        }
        *holder = None;
        drop(holder);
        self.freed.notify_one();
        true
    }

    /// Run `f` under the holder lock if `token` still holds the gate, so no
    /// later holder can be acquired while it runs.
    fn while_current(&self, token: u64, f: impl FnOnce()) -> bool {
        let holder = lock(&self.holder);
        if *holder != Some(token) {
            return false;
        }
        f();
        true
    }

    /// Take the gate from whoever holds it, running `on_taken` before the
    /// next caller can acquire.
    fn force_release(&self, on_taken: impl FnOnce()) -> bool {
        let mut holder = lock(&self.holder);
        let was_held = holder.take().is_some();
        if was_held {
            on_taken();
        }
        drop(holder);
        self.freed.notify_one();
        was_held
    }

    fn is_held(&self) -> bool {
        lock(&self.holder).is_some()
    }
}

/// State shared between request callers and the transport task.
#[derive(Default)]
struct RxState {
    /// A request is outstanding; frames are replies, not noise.
    awaiting: AtomicBool,
    /// Drop any partial record before parsing the next chunk.
    resync: AtomicBool,
    shutdown: AtomicBool,
    frames: Arc<FrameStats>,
    counters: LinkCounters,
}

impl RxState {
    fn deliver(&self, replies: &SyncSender<Message>, msg: Message) {
        if !self.awaiting.load(Ordering::Acquire) {
            LinkCounters::bump(&self.counters.unsolicited);
            debug!(kind = %msg.kind, id = msg.identifier, "discarding frame with no request outstanding");
            return;
        }

        match replies.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                LinkCounters::bump(&self.counters.dropped_replies);
                warn!(
                    kind = %msg.kind,
                    id = msg.identifier,
                    "reply queue full, dropping frame (link out of sync)"
                );
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Transport task: drain the link, parse, hand completed frames to the
/// reply queue. Runs until shutdown, end-of-stream, or a hard read error.
fn run_transport_task(mut stream: McuStream, state: Arc<RxState>, replies: SyncSender<Message>) {
    let mut parser = FrameParser::with_stats(Arc::clone(&state.frames));
    let mut chunk = [0u8; RX_CHUNK_SIZE];
    debug!("transport task running");

    while !state.shutdown.load(Ordering::Acquire) {
        let n = match stream.read(&mut chunk) {
            Ok(0) => {
                info!("link closed by peer");
                break;
            }
            Ok(n) => n,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(err) => {
                error!(error = %err, "link read failed, stopping transport task");
                break;
            }
        };

        if state.resync.swap(false, Ordering::AcqRel) {
            parser.reset();
        }
        trace!(bytes = n, "rx chunk");
        parser.feed(&chunk[..n], |msg| state.deliver(&replies, msg));
    }

    debug!("transport task stopped");
}

struct Shared {
    config: ChannelConfig,
    gate: Gate,
    writer: Mutex<FrameWriter<McuStream>>,
    replies: Mutex<Receiver<Message>>,
    rx: Arc<RxState>,
    rx_task: Mutex<Option<JoinHandle<()>>>,
    transport: &'static str,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.rx.shutdown.store(true, Ordering::Release);
    }
}

enum Outgoing<'a> {
    Message(&'a Message),
    Encoded(&'a [u8]),
}

impl Shared {
    /// Forget anything received before this request.
    fn prepare_rx(&self) -> Result<()> {
        self.rx.awaiting.store(false, Ordering::Release);
        lock(&self.writer).get_mut().clear_input()?;
        self.rx.resync.store(true, Ordering::Release);

        let replies = lock(&self.replies);
        let mut stale = 0usize;
        while replies.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "drained stale replies");
        }

        self.rx.awaiting.store(true, Ordering::Release);
        Ok(())
    }

    fn transmit(&self, out: Outgoing<'_>) -> Result<()> {
        let mut writer = lock(&self.writer);
        let result = match out {
            Outgoing::Message(msg) => {
                debug!(kind = %msg.kind, id = msg.identifier, len = msg.len(), "request");
                writer.write_message(msg)
            }
            Outgoing::Encoded(bytes) => {
                debug!(bytes = bytes.len(), "request (pre-encoded)");
                writer.write_encoded(bytes)
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_timeout() => {
                LinkCounters::bump(&self.rx.counters.tx_timeouts);
                warn!(timeout = ?self.config.tx_timeout, "request transmit timed out");
                Err(ChannelError::TxTimeout(self.config.tx_timeout))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Stop treating frames as replies, unless `token` lost the channel to
    /// a force-release and someone else's request is now outstanding.
    fn finish_request(&self, token: u64) {
        let cleared = self
            .gate
            .while_current(token, || self.rx.awaiting.store(false, Ordering::Release));
        if !cleared {
            debug!(token, "request finished after losing the channel");
        }
    }

    fn await_reply(&self) -> Result<Message> {
        match lock(&self.replies).recv_timeout(self.config.reply_timeout) {
            Ok(msg) => {
                debug!(kind = %msg.kind, id = msg.identifier, len = msg.len(), "reply");
                Ok(msg)
            }
            Err(RecvTimeoutError::Timeout) => {
                LinkCounters::bump(&self.rx.counters.reply_timeouts);
                warn!(timeout = ?self.config.reply_timeout, "no reply from controller");
                Err(ChannelError::ReplyTimeout(self.config.reply_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        }
    }
}

/// Owns the link to the controller and serializes every request on it.
///
/// Cheap to clone; all clones share one channel. At most one request is in
/// flight at any time across all clones and threads.
#[derive(Clone)]
pub struct ProtocolEngine {
    shared: Arc<Shared>,
}

impl ProtocolEngine {
    /// Start the engine with default timeouts.
    pub fn start(stream: McuStream) -> Result<Self> {
        Self::start_with_config(stream, ChannelConfig::default())
    }

    /// Start the engine on `stream`, spawning the `mcu-rx` transport task.
    pub fn start_with_config(stream: McuStream, config: ChannelConfig) -> Result<Self> {
        let transport = stream.transport_name();

        let mut rx_stream = stream.try_clone()?;
        rx_stream.set_read_timeout(Some(config.rx_poll_interval))?;
        let writer = FrameWriter::with_config_mcu(
            stream,
            FrameConfig {
                write_timeout: Some(config.tx_timeout),
                ..FrameConfig::default()
            },
        )?;

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let rx = Arc::new(RxState::default());
        let task = {
            let rx = Arc::clone(&rx);
            thread::Builder::new()
                .name("mcu-rx".to_string())
                .spawn(move || run_transport_task(rx_stream, rx, reply_tx))
                .map_err(ChannelError::Spawn)?
        };

        info!(transport, "protocol engine started");
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                gate: Gate::new(),
                writer: Mutex::new(writer),
                replies: Mutex::new(reply_rx),
                rx,
                rx_task: Mutex::new(Some(task)),
                transport,
            }),
        })
    }

    /// Send `msg` and wait for the next frame from the controller.
    ///
    /// The returned guard holds the channel until it is dropped or
    /// released; read what you need from it first. On any error the hold,
    /// if one was taken, is already released. Correlation is temporal: the
    /// reply is whatever frame arrives next, and its identifier is not
    /// checked here.
    pub fn request(&self, msg: &Message) -> Result<ReplyGuard> {
        self.transact(Outgoing::Message(msg))
    }

    /// Like [`ProtocolEngine::request`] for bytes that are already a
    /// complete wire frame.
    pub fn request_encoded(&self, frame: &[u8]) -> Result<ReplyGuard> {
        self.transact(Outgoing::Encoded(frame))
    }

    fn transact(&self, out: Outgoing<'_>) -> Result<ReplyGuard> {
        let shared = &self.shared;
        let Some(token) = shared.gate.acquire(shared.config.lock_timeout) else {
            LinkCounters::bump(&shared.rx.counters.starvations);
            error!(
                timeout = ?shared.config.lock_timeout,
                "request channel starved; holder is stuck or leaked"
            );
            return Err(ChannelError::Starvation(shared.config.lock_timeout));
        };

        let hold = Hold {
            shared: Arc::clone(shared),
            token,
        };
        LinkCounters::bump(&shared.rx.counters.requests);

        shared.prepare_rx()?;
        let reply = shared.transmit(out).and_then(|()| shared.await_reply());
        shared.finish_request(token);

        Ok(ReplyGuard { hold, reply: reply? })
    }

    /// Free the channel regardless of who holds it.
    ///
    /// For supervisors tearing down a worker that may have died mid-request.
    /// The abandoned guard's later drop is a no-op. Returns whether a hold
    /// was actually taken away.
    pub fn force_release(&self) -> bool {
        let rx = &self.shared.rx;
        let was_held = self
            .shared
            .gate
            .force_release(|| rx.awaiting.store(false, Ordering::Release));
        if was_held {
            LinkCounters::bump(&self.shared.rx.counters.forced_releases);
            warn!("request channel force-released");
        }
        was_held
    }

    /// Whether some caller currently holds the channel.
    pub fn is_held(&self) -> bool {
        self.shared.gate.is_held()
    }

    /// Link health counters.
    pub fn stats(&self) -> LinkStats {
        let rx = &self.shared.rx;
        rx.counters.snapshot(rx.frames.snapshot())
    }

    /// Whether the transport task is still draining the link.
    pub fn is_running(&self) -> bool {
        lock(&self.shared.rx_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the transport task and wait for it to exit.
    pub fn shutdown(&self) {
        self.shared.rx.shutdown.store(true, Ordering::Release);
        let task = lock(&self.shared.rx_task).take();
        if let Some(task) = task {
            if task.join().is_err() {
                error!("transport task panicked");
            }
            info!("protocol engine stopped");
        }
    }

    /// Current timeouts.
    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    /// Transport backend name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        self.shared.transport
    }
}

impl fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("transport", &self.shared.transport)
            .field("held", &self.is_held())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Releases the gate when dropped, unless it was force-released meanwhile.
struct Hold {
    shared: Arc<Shared>,
    token: u64,
}

impl Drop for Hold {
    fn drop(&mut self) {
        if !self.shared.gate.release(self.token) {
            debug!(token = self.token, "hold was force-released earlier");
        }
    }
}

/// A reply together with the hold on the request channel.
///
/// Derefs to the reply [`Message`]. The channel stays taken until the guard
/// is dropped, [`ReplyGuard::release`]d, or turned into the message.
pub struct ReplyGuard {
    hold: Hold,
    reply: Message,
}

impl ReplyGuard {
    /// The reply.
    pub fn message(&self) -> &Message {
        &self.reply
    }

    /// Take the reply and release the channel.
    pub fn into_message(self) -> Message {
        let Self { hold, reply } = self;
        drop(hold);
        reply
    }

    /// Release the channel.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for ReplyGuard {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.reply
    }
}

impl fmt::Debug for ReplyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyGuard")
            .field("token", &self.hold.token)
            .field("reply", &self.reply)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Barrier;

    use mculink_frame::{encode_frame, MessageType};

    use super::*;
    use crate::sim::{DeviceSim, Registers, SimReply};

    fn fast_config() -> ChannelConfig {
        ChannelConfig {
            lock_timeout: Duration::from_millis(300),
            tx_timeout: Duration::from_millis(200),
            reply_timeout: Duration::from_millis(200),
            rx_poll_interval: Duration::from_millis(5),
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn request_returns_reply_and_holds_until_drop() {
        let registers = Registers::new().with_f32(510, 32.0);
        let (engine, _sim) = DeviceSim::attach(registers, fast_config()).unwrap();

        let reply = engine.request(&Message::read(510)).unwrap();
        assert_eq!(reply.kind, MessageType::ReadAck);
        assert_eq!(reply.as_f32(), Some(32.0));
        assert!(engine.is_held());

        drop(reply);
        assert!(!engine.is_held());
    }

    #[test]
    fn release_and_into_message_free_the_channel() {
        let registers = Registers::new().with_u8(0, 1);
        let (engine, _sim) = DeviceSim::attach(registers, fast_config()).unwrap();

        engine.request(&Message::read(0)).unwrap().release();
        assert!(!engine.is_held());

        let msg = engine.request(&Message::read(0)).unwrap().into_message();
        assert_eq!(msg.as_u8(), Some(1));
        assert!(!engine.is_held());
    }

    #[test]
    fn reply_timeout_releases_hold() {
        let (engine, _sim) =
            DeviceSim::attach(|_: &Message| SimReply::Silence, fast_config()).unwrap();

        let err = engine.request(&Message::read(1)).unwrap_err();
        assert!(matches!(err, ChannelError::ReplyTimeout(_)));
        assert!(!engine.is_held());
        assert_eq!(engine.stats().reply_timeouts, 1);
    }

    #[test]
    fn starvation_when_channel_is_held() {
        let registers = Registers::new().with_u8(1, 5);
        let config = ChannelConfig {
            lock_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let (engine, _sim) = DeviceSim::attach(registers, config).unwrap();

        let held = engine.request(&Message::read(1)).unwrap();
        let other = engine.clone();
        let err = thread::spawn(move || other.request(&Message::read(1)).unwrap_err())
            .join()
            .unwrap();
        assert!(matches!(err, ChannelError::Starvation(_)));
        assert_eq!(engine.stats().starvations, 1);

        drop(held);
        assert_eq!(engine.request(&Message::read(1)).unwrap().as_u8(), Some(5));
    }

    #[test]
    fn stale_guard_cannot_release_new_holder() {
        let registers = Registers::new().with_u8(2, 9);
        let (engine, _sim) = DeviceSim::attach(registers, fast_config()).unwrap();

        let abandoned = engine.request(&Message::read(2)).unwrap();
        assert!(engine.force_release());
        assert!(!engine.is_held());

        let current = engine.request(&Message::read(2)).unwrap();
        drop(abandoned);
        assert!(engine.is_held());

        drop(current);
        assert!(!engine.is_held());
        assert!(!engine.force_release());
        assert_eq!(engine.stats().forced_releases, 1);
    }

    #[test]
    fn force_released_request_leaves_next_request_awaiting() {
        let registers = Registers::new().with_u8(3, 1);
        let (engine, _sim) = DeviceSim::attach(registers, fast_config()).unwrap();
        let shared = &engine.shared;
        let timeout = Duration::from_millis(50);

        let stale = shared.gate.acquire(timeout).unwrap();
        shared.prepare_rx().unwrap();
        assert!(engine.force_release());
        assert!(!shared.rx.awaiting.load(Ordering::Acquire));

        let current = shared.gate.acquire(timeout).unwrap();
        shared.prepare_rx().unwrap();

        // The abandoned request winds down after the next one has started.
        shared.finish_request(stale);
        assert!(shared.rx.awaiting.load(Ordering::Acquire));

        shared.finish_request(current);
        assert!(!shared.rx.awaiting.load(Ordering::Acquire));
        assert!(shared.gate.release(current));
    }

    #[test]
    fn gate_runs_closure_only_for_current_holder() {
        let gate = Gate::new();
        let first = gate.acquire(Duration::ZERO).unwrap();
        let mut ran = 0;
        assert!(gate.force_release(|| ran += 1));
        assert!(!gate.force_release(|| ran += 1));
        assert_eq!(ran, 1);

        let second = gate.acquire(Duration::ZERO).unwrap();
        assert_ne!(first, second);
        assert!(!gate.while_current(first, || ran += 10));
        assert!(gate.while_current(second, || ran += 100));
        assert_eq!(ran, 101);
    }

    #[test]
    fn concurrent_callers_are_serialized() {
        const CALLERS: u16 = 8;
        let mut registers = Registers::new();
        for id in 0..CALLERS {
            registers = registers.with_u16(600 + id, 1000 + id);
        }
        let config = fast_config().with_lock_timeout(Duration::from_secs(5));
        let (engine, sim) = DeviceSim::attach(registers, config).unwrap();

        let barrier = Arc::new(Barrier::new(usize::from(CALLERS)));
        let handles: Vec<_> = (0..CALLERS)
            .map(|i| {
                let engine = engine.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let reply = engine.request(&Message::read(600 + i)).unwrap();
                    (reply.identifier, reply.as_u16())
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let (id, value) = handle.join().unwrap();
            let i = i as u16;
            assert_eq!(id, 600 + i);
            assert_eq!(value, Some(1000 + i));
        }

        assert_eq!(sim.received().len(), usize::from(CALLERS));
        let stats = engine.stats();
        assert_eq!(stats.requests, u64::from(CALLERS));
        assert_eq!(stats.frames.completed, u64::from(CALLERS));
    }

    #[test]
    fn unsolicited_frames_are_discarded() {
        let (host, mut device) = McuStream::pair();
        let engine = ProtocolEngine::start_with_config(host, fast_config()).unwrap();

        let mut wire = bytes::BytesMut::new();
        encode_frame(&Message::read(77), &mut wire).unwrap();
        device.write_all(&wire).unwrap();

        assert!(wait_until(|| engine.stats().unsolicited == 1));
        assert_eq!(engine.stats().frames.completed, 1);
    }

    #[test]
    fn second_reply_is_dropped_when_queue_is_full() {
        let state = RxState::default();
        state.awaiting.store(true, Ordering::Release);
        let (tx, rx) = mpsc::sync_channel(1);

        state.deliver(&tx, Message::read(1));
        state.deliver(&tx, Message::read(2));

        assert_eq!(rx.try_recv().unwrap().identifier, 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(state.counters.snapshot(Default::default()).dropped_replies, 1);
    }

    #[test]
    fn garbage_before_request_does_not_corrupt_reply() {
        let registers = Registers::new().with_u8(3, 42);
        let (host, device) = McuStream::pair();
        let mut noise = device.try_clone().unwrap();
        let _sim = DeviceSim::spawn(device, registers).unwrap();
        let engine = ProtocolEngine::start_with_config(host, fast_config()).unwrap();

        // An unterminated partial record sitting in the link.
        noise.write_all(&[0x05, 0x11, 0x22]).unwrap();
        thread::sleep(Duration::from_millis(20));

        let reply = engine.request(&Message::read(3)).unwrap();
        assert_eq!(reply.as_u8(), Some(42));
    }

    #[test]
    fn pre_encoded_request() {
        let registers = Registers::new().with_u32(4, 0xDEAD_BEEF);
        let (engine, _sim) = DeviceSim::attach(registers, fast_config()).unwrap();

        let frame = mculink_frame::codec::encode_to_bytes(&Message::read(4)).unwrap();
        let reply = engine.request_encoded(&frame).unwrap();
        assert_eq!(reply.as_u32(), Some(0xDEAD_BEEF));
    }

    #[test]
    fn shutdown_stops_transport_task() {
        let (engine, _sim) = DeviceSim::attach(Registers::new(), fast_config()).unwrap();
        assert!(engine.is_running());

        engine.shutdown();
        assert!(!engine.is_running());
        let err = engine.request(&Message::read(1)).unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
    }

    #[test]
    fn peer_drop_stops_transport_task() {
        let (host, device) = McuStream::pair();
        let engine = ProtocolEngine::start_with_config(host, fast_config()).unwrap();
        drop(device);

        assert!(wait_until(|| !engine.is_running()));
    }
}

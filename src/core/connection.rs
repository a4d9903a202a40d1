//! Script-facing connection: message backlog, buffered reader, and lifecycle.
//!
//! A connection holds one `ResourceGuard` slot from creation until its close
//! path runs. Reads drain the backlog oldest-first before touching the
//! network; one underlying read may decode several frames, and every data
//! frame is queued in arrival order. At most one read and one write may be
//! outstanding at a time.
//!
//! State machine: `Open` (read/write/close admitted) → `Closing` (close
//! scheduled, new reads/writes fail fast) → `Closed` (terminal).

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::async_pool::{AsyncPool, Job};
use crate::core::context::{ContextResource, ExecutionContext, ResourceTracker};
use crate::core::deferred::{DeferredResult, DeferredStatus};
use crate::core::guard::{GuardSlot, ResourceGuard};
use crate::core::telemetry::{Sample, TelemetryEmitter};
use crate::core::transport::{Frame, MessageReader, MessageWriter, Transport};
use crate::core::{BridgeError, StateError};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Reads, writes, and close are admitted.
    Open,
    /// Close scheduled; new reads and writes fail fast.
    Closing,
    /// Terminal.
    Closed,
}

/// The script-visible operation surface of a connection.
pub trait ConnectionOps {
    /// Next message in network arrival order.
    fn read(&self, ctx: &ExecutionContext) -> DeferredResult<Vec<u8>>;

    /// Send `payload` as one message.
    fn write(&self, ctx: &ExecutionContext, payload: Vec<u8>) -> DeferredResult<()>;

    /// Release the guard slot and close the socket.
    fn close(&self, ctx: &ExecutionContext) -> DeferredResult<()>;
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Read,
    Write,
}

struct ReadHalf {
    reader: Option<Box<dyn MessageReader>>,
    /// Messages already read from the network but not yet delivered.
    backlog: VecDeque<Vec<u8>>,
}

struct ConnectionInner {
    addr: String,
    protocol: &'static str,
    state: Mutex<ConnectionState>,
    read_half: Mutex<ReadHalf>,
    writer: Mutex<Option<Box<dyn MessageWriter>>>,
    slot: Mutex<Option<GuardSlot>>,
    reading: AtomicBool,
    writing: AtomicBool,
    telemetry: TelemetryEmitter,
}

impl ConnectionInner {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn ensure_open(&self) -> Result<(), StateError> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            ConnectionState::Closing | ConnectionState::Closed => Err(StateError::ConnectionClosed),
        }
    }

    /// Open → Closing. False if the close path was already started.
    fn begin_close(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ConnectionState::Open {
            *state = ConnectionState::Closing;
            true
        } else {
            false
        }
    }

    const fn flag(&self, direction: Direction) -> &AtomicBool {
        match direction {
            Direction::Read => &self.reading,
            Direction::Write => &self.writing,
        }
    }

    fn sample(&self) -> Sample {
        Sample::new(self.protocol).tag("addr", self.addr.clone())
    }

    fn next_message(&self) -> Result<Vec<u8>, BridgeError> {
        let mut half = self.read_half.lock();
        let ReadHalf { reader, backlog } = &mut *half;

        if let Some(message) = backlog.pop_front() {
            return Ok(message);
        }

        let reader = reader.as_mut().ok_or(StateError::ConnectionClosed)?;
        let frames = reader.read_frames()?;
        backlog.extend(frames.into_iter().filter(Frame::is_data).map(|f| f.payload));
        if let Some(message) = backlog.pop_front() {
            return Ok(message);
        }

        // Only control frames arrived: wait for exactly one data message.
        reader.read_message()
    }

    /// First half of the close path: return the slot, then close the socket.
    ///
    /// Never waits behind a worker. Closing the socket unblocks a read parked
    /// on the network; a write holding the writer leaves the socket to
    /// `finish_close`.
    fn release_now(&self) -> Result<(), BridgeError> {
        let slot_result = self.slot.lock().take().map_or(Ok(()), GuardSlot::release);
        let writer = self.writer.try_lock().and_then(|mut writer| writer.take());
        let close_result = writer.map_or(Ok(()), |mut writer| writer.close());
        slot_result.and(close_result)
    }

    /// Second half of the close path: return the reader and mark `Closed`.
    ///
    /// Waits for any read still holding the read half.
    fn finish_close(&self) -> Result<(), BridgeError> {
        let writer = self.writer.lock().take();
        let close_result = writer.map_or(Ok(()), |mut writer| writer.close());

        {
            let mut half = self.read_half.lock();
            if let Some(mut reader) = half.reader.take() {
                reader.release();
            }
            half.backlog.clear();
        }

        *self.state.lock() = ConnectionState::Closed;
        info!(addr = %self.addr, protocol = self.protocol, "connection closed");
        close_result
    }
}

impl ContextResource for ConnectionInner {
    fn abandon(self: Arc<Self>, pool: &AsyncPool) {
        if !self.begin_close() {
            return;
        }
        debug!(addr = %self.addr, "closing connection for terminated context");
        if let Err(err) = self.release_now() {
            warn!(addr = %self.addr, error = %err, "close of abandoned connection failed");
        }
        let inner = Arc::clone(&self);
        let job: Job = Box::new(move || {
            if let Err(err) = inner.finish_close() {
                warn!(addr = %inner.addr, error = %err, "close of abandoned connection failed");
            }
        });
        if let Err(err) = pool.submit(job) {
            warn!(addr = %self.addr, error = %err, "pool refused close job, finishing inline");
            if let Err(err) = self.finish_close() {
                warn!(addr = %self.addr, error = %err, "close of abandoned connection failed");
            }
        }
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if *self.state.get_mut() == ConnectionState::Closed {
            return;
        }
        if let Some(mut writer) = self.writer.get_mut().take() {
            if let Err(err) = writer.close() {
                warn!(addr = %self.addr, error = %err, "socket close on drop failed");
            }
        }
        if let Some(mut reader) = self.read_half.get_mut().reader.take() {
            reader.release();
        }
        debug!(addr = %self.addr, "connection dropped without close");
        // A slot still held is released when `self.slot` drops.
    }
}

/// Marks one direction busy until dropped.
struct InFlight {
    inner: Arc<ConnectionInner>,
    direction: Direction,
}

impl InFlight {
    fn claim(inner: &Arc<ConnectionInner>, direction: Direction) -> Option<Self> {
        inner
            .flag(direction)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                inner: Arc::clone(inner),
                direction,
            })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner.flag(self.direction).store(false, Ordering::Release);
    }
}

fn byte_len(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

/// Handle to one transport connection. Clones share the connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wrap an established transport, holding `slot` until the connection closes.
    pub fn open<T: Transport>(
        ctx: &ExecutionContext,
        slot: GuardSlot,
        addr: impl Into<String>,
        transport: T,
    ) -> Self {
        Self::build(
            ctx.resources(),
            ctx.telemetry().clone(),
            slot,
            addr.into(),
            transport,
        )
    }

    /// Take a slot from `guard` (blocking the script until one is free), then
    /// establish the transport on the pool.
    ///
    /// If `dialer` fails, the slot is released before the error reaches the script.
    pub fn dial<T, D>(
        ctx: &ExecutionContext,
        guard: &Arc<ResourceGuard>,
        addr: impl Into<String>,
        dialer: D,
    ) -> DeferredResult<Self>
    where
        T: Transport,
        D: FnOnce(&str) -> Result<T, BridgeError> + Send + 'static,
    {
        let addr = addr.into();
        let slot = guard.acquire();
        let tracker = ctx.resources().clone();
        let telemetry = ctx.telemetry().clone();
        ctx.schedule(move || {
            let transport = dialer(&addr)?;
            Ok(Self::build(&tracker, telemetry, slot, addr, transport))
        })
    }

    fn build<T: Transport>(
        tracker: &ResourceTracker,
        telemetry: TelemetryEmitter,
        slot: GuardSlot,
        addr: String,
        transport: T,
    ) -> Self {
        let protocol = transport.protocol();
        let (reader, writer) = transport.into_split();
        let inner = Arc::new(ConnectionInner {
            addr,
            protocol,
            state: Mutex::new(ConnectionState::Open),
            read_half: Mutex::new(ReadHalf {
                reader: Some(reader),
                backlog: VecDeque::new(),
            }),
            writer: Mutex::new(Some(writer)),
            slot: Mutex::new(Some(slot)),
            reading: AtomicBool::new(false),
            writing: AtomicBool::new(false),
            telemetry,
        });
        let weak: Weak<dyn ContextResource> = Arc::downgrade(&inner) as Weak<dyn ContextResource>;
        tracker.track(weak);
        info!(addr = %inner.addr, protocol, "connection opened");
        Self { inner }
    }

    /// Remote address.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Protocol name used for telemetry.
    #[must_use]
    pub fn protocol(&self) -> &'static str {
        self.inner.protocol
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Messages read from the network but not yet delivered.
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.inner.read_half.lock().backlog.len()
    }

    /// Deliver the next message in network arrival order.
    ///
    /// Fails fast with `StateError::ConnectionClosed` once closing, and with
    /// `StateError::ReadInProgress` if a read is already outstanding.
    pub fn read(&self, ctx: &ExecutionContext) -> DeferredResult<Vec<u8>> {
        if let Err(err) = self.inner.ensure_open() {
            return ctx.fail(err);
        }
        let Some(flight) = InFlight::claim(&self.inner, Direction::Read) else {
            return ctx.fail(StateError::ReadInProgress);
        };
        ctx.schedule(move || {
            let inner = &flight.inner;
            let message = inner.next_message()?;
            inner
                .telemetry
                .emit(inner.sample().int_field("read", byte_len(message.len())));
            Ok(message)
        })
    }

    /// Send `payload` as a single message.
    ///
    /// Fails fast with `StateError::ConnectionClosed` once closing, and with
    /// `StateError::WriteInProgress` if a write is already outstanding.
    pub fn write(&self, ctx: &ExecutionContext, payload: impl Into<Vec<u8>>) -> DeferredResult<()> {
        if let Err(err) = self.inner.ensure_open() {
            return ctx.fail(err);
        }
        let Some(flight) = InFlight::claim(&self.inner, Direction::Write) else {
            return ctx.fail(StateError::WriteInProgress);
        };
        let payload = payload.into();
        self.inner
            .telemetry
            .emit(self.inner.sample().int_field("write", byte_len(payload.len())));
        ctx.defer(move || {
            let mut writer = flight.inner.writer.lock();
            writer
                .as_mut()
                .ok_or(StateError::ConnectionClosed)?
                .write_message(&payload)
        })
    }

    /// Release the guard slot and close the socket.
    ///
    /// The slot and the socket are released on the calling thread before
    /// anything is scheduled, so a close is never stuck behind busy workers.
    /// Only the reader cleanup runs on the pool. If the pool refuses that job
    /// it runs inline and the returned result carries the refusal.
    ///
    /// A second call fails with `StateError::AlreadyClosed`; the slot is only
    /// ever released once.
    pub fn close(&self, ctx: &ExecutionContext) -> DeferredResult<()> {
        if !self.inner.begin_close() {
            return ctx.fail(StateError::AlreadyClosed);
        }
        let released = self.inner.release_now();
        let inner = Arc::clone(&self.inner);
        let deferred = ctx.defer(move || {
            let finished = inner.finish_close();
            released.and(finished)
        });
        if deferred.status() == DeferredStatus::Failed {
            if let Err(err) = self.inner.finish_close() {
                warn!(addr = %self.inner.addr, error = %err, "inline close failed");
            }
        }
        deferred
    }
}

impl ConnectionOps for Connection {
    fn read(&self, ctx: &ExecutionContext) -> DeferredResult<Vec<u8>> {
        Self::read(self, ctx)
    }

    fn write(&self, ctx: &ExecutionContext, payload: Vec<u8>) -> DeferredResult<()> {
        Self::write(self, ctx, payload)
    }

    fn close(&self, ctx: &ExecutionContext) -> DeferredResult<()> {
        Self::close(self, ctx)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.inner.addr)
            .field("protocol", &self.inner.protocol)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

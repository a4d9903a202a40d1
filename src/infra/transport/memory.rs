//! In-memory transport driven by a script of frame batches.
//!
//! Each pushed batch is what one underlying network read returns, so a test can
//! reproduce a read that decodes several frames at once. Reads block until a
//! batch arrives or either side hangs up.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::core::{BridgeError, Frame, MessageReader, MessageWriter, Transport};

#[derive(Debug, Default)]
struct ScriptState {
    batches: VecDeque<Vec<Frame>>,
    written: Vec<Vec<u8>>,
    network_reads: usize,
    socket_closed: bool,
    remote_closed: bool,
    reader_released: bool,
    fail_writes: bool,
}

impl ScriptState {
    const fn hung_up(&self) -> bool {
        self.socket_closed || self.remote_closed
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<ScriptState>,
    arrived: Condvar,
}

impl Shared {
    /// Block until a batch is queued, then apply `take` to the state.
    fn next<T>(
        &self,
        mut take: impl FnMut(&mut ScriptState) -> Option<T>,
    ) -> Result<T, BridgeError> {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = take(&mut *state) {
                return Ok(value);
            }
            if state.hung_up() {
                return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed").into());
            }
            self.arrived.wait(&mut state);
        }
    }
}

/// Inspection and control side of a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    shared: Arc<Shared>,
}

impl ScriptHandle {
    /// Queue frames that one underlying read will return together.
    pub fn push_frames(&self, frames: Vec<Frame>) {
        self.shared.state.lock().batches.push_back(frames);
        self.shared.arrived.notify_all();
    }

    /// Queue a single text message as its own read.
    pub fn push_message(&self, payload: impl Into<Vec<u8>>) {
        self.push_frames(vec![Frame::text(payload)]);
    }

    /// The peer hangs up: blocked and future reads fail.
    pub fn hang_up(&self) {
        self.shared.state.lock().remote_closed = true;
        self.shared.arrived.notify_all();
    }

    /// Make subsequent writes fail with a broken pipe.
    pub fn fail_writes(&self, fail: bool) {
        self.shared.state.lock().fail_writes = fail;
    }

    /// Messages written so far, in order.
    #[must_use]
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared.state.lock().written.clone()
    }

    /// Underlying reads performed (`read_frames` and `read_message` calls that returned).
    #[must_use]
    pub fn network_reads(&self) -> usize {
        self.shared.state.lock().network_reads
    }

    /// Batches not yet read.
    #[must_use]
    pub fn pending_batches(&self) -> usize {
        self.shared.state.lock().batches.len()
    }

    /// True once the socket was closed from our side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().socket_closed
    }

    /// True once the buffered reader was returned.
    #[must_use]
    pub fn reader_released(&self) -> bool {
        self.shared.state.lock().reader_released
    }
}

/// A `Transport` whose traffic is scripted through a [`ScriptHandle`].
#[derive(Debug)]
pub struct ScriptedTransport {
    protocol: &'static str,
    latency: Duration,
    shared: Arc<Shared>,
}

impl ScriptedTransport {
    /// New transport reporting itself as `"websocket"`, plus its control handle.
    #[must_use]
    pub fn pair() -> (Self, ScriptHandle) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                protocol: "websocket",
                latency: Duration::ZERO,
                shared: Arc::clone(&shared),
            },
            ScriptHandle { shared },
        )
    }

    /// Protocol name used for telemetry.
    #[must_use]
    pub const fn with_protocol(mut self, protocol: &'static str) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sleep this long before each read and write.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl Transport for ScriptedTransport {
    fn protocol(&self) -> &'static str {
        self.protocol
    }

    fn into_split(self) -> (Box<dyn MessageReader>, Box<dyn MessageWriter>) {
        (
            Box::new(ScriptedReader {
                shared: Arc::clone(&self.shared),
                latency: self.latency,
            }),
            Box::new(ScriptedWriter {
                shared: self.shared,
                latency: self.latency,
            }),
        )
    }
}

fn simulate_latency(latency: Duration) {
    if !latency.is_zero() {
        thread::sleep(latency);
    }
}

struct ScriptedReader {
    shared: Arc<Shared>,
    latency: Duration,
}

impl MessageReader for ScriptedReader {
    fn read_frames(&mut self) -> Result<Vec<Frame>, BridgeError> {
        simulate_latency(self.latency);
        self.shared.next(|state| {
            let batch = state.batches.pop_front()?;
            state.network_reads += 1;
            Some(batch)
        })
    }

    fn read_message(&mut self) -> Result<Vec<u8>, BridgeError> {
        simulate_latency(self.latency);
        self.shared.next(|state| loop {
            let batch = state.batches.front_mut()?;
            if let Some(pos) = batch.iter().position(Frame::is_data) {
                let frame = batch.drain(..=pos).last()?;
                if batch.is_empty() {
                    state.batches.pop_front();
                }
                state.network_reads += 1;
                return Some(frame.payload);
            }
            // Control frames only: consumed without producing a message.
            state.batches.pop_front();
        })
    }

    fn release(&mut self) {
        self.shared.state.lock().reader_released = true;
    }
}

struct ScriptedWriter {
    shared: Arc<Shared>,
    latency: Duration,
}

impl MessageWriter for ScriptedWriter {
    fn write_message(&mut self, payload: &[u8]) -> Result<(), BridgeError> {
        simulate_latency(self.latency);
        let mut state = self.shared.state.lock();
        if state.socket_closed || state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write on broken connection").into());
        }
        state.written.push(payload.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<(), BridgeError> {
        self.shared.state.lock().socket_closed = true;
        self.shared.arrived.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OpCode;

    #[test]
    fn test_one_batch_per_read() {
        let (transport, handle) = ScriptedTransport::pair();
        handle.push_frames(vec![Frame::text("a"), Frame::text("b")]);
        let (mut reader, _writer) = transport.into_split();
        assert_eq!(reader.read_frames().unwrap().len(), 2);
        assert_eq!(handle.network_reads(), 1);
    }

    #[test]
    fn test_read_message_skips_control_frames() {
        let (transport, handle) = ScriptedTransport::pair();
        handle.push_frames(vec![Frame::control(OpCode::Ping)]);
        handle.push_frames(vec![Frame::control(OpCode::Pong), Frame::text("x"), Frame::text("y")]);
        let (mut reader, _writer) = transport.into_split();
        assert_eq!(reader.read_message().unwrap(), b"x");
        assert_eq!(reader.read_message().unwrap(), b"y");
        assert_eq!(handle.pending_batches(), 0);
    }

    #[test]
    fn test_close_unblocks_reader() {
        let (transport, handle) = ScriptedTransport::pair();
        let (mut reader, mut writer) = transport.into_split();
        let blocked = thread::spawn(move || reader.read_frames());
        thread::sleep(Duration::from_millis(20));
        writer.close().unwrap();
        assert!(matches!(blocked.join().unwrap(), Err(BridgeError::Transport(_))));
        assert!(handle.is_closed());
    }

    #[test]
    fn test_writes_recorded_until_closed() {
        let (transport, handle) = ScriptedTransport::pair();
        let (_reader, mut writer) = transport.into_split();
        writer.write_message(b"hello").unwrap();
        writer.close().unwrap();
        assert!(writer.write_message(b"late").is_err());
        assert_eq!(handle.written(), vec![b"hello".to_vec()]);
    }
}

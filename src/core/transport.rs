//! Transport contract consumed by `Connection`.
//!
//! Wire-level framing belongs to the transport. The connection only needs one
//! underlying read to yield zero or more decoded frames, and one write to send
//! exactly one message.

use crate::core::BridgeError;

/// Frame kind as decoded by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Continuation of a fragmented data message.
    Continuation,
    /// UTF-8 text message.
    Text,
    /// Binary message.
    Binary,
    /// Close control frame.
    Close,
    /// Ping control frame.
    Ping,
    /// Pong control frame.
    Pong,
}

impl OpCode {
    /// True for frames that carry application data.
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Continuation | Self::Text | Self::Binary)
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind.
    pub opcode: OpCode,
    /// Frame payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Text data frame.
    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode: OpCode::Text,
            payload: payload.into(),
        }
    }

    /// Binary data frame.
    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode: OpCode::Binary,
            payload: payload.into(),
        }
    }

    /// Control frame with an empty payload.
    #[must_use]
    pub const fn control(opcode: OpCode) -> Self {
        Self {
            opcode,
            payload: Vec::new(),
        }
    }

    /// True for frames that carry application data.
    #[must_use]
    pub const fn is_data(&self) -> bool {
        self.opcode.is_data()
    }
}

/// Read half of a transport: the buffered frame reader.
pub trait MessageReader: Send + 'static {
    /// Perform one underlying network read and return every frame it decoded.
    fn read_frames(&mut self) -> Result<Vec<Frame>, BridgeError>;

    /// Block until exactly one data message is available and return it.
    fn read_message(&mut self) -> Result<Vec<u8>, BridgeError>;

    /// Return pooled buffers held by the reader.
    fn release(&mut self) {}
}

/// Write half of a transport: the socket.
pub trait MessageWriter: Send + 'static {
    /// Send `payload` as one message.
    fn write_message(&mut self, payload: &[u8]) -> Result<(), BridgeError>;

    /// Close the socket.
    fn close(&mut self) -> Result<(), BridgeError>;
}

/// An established byte-stream connection that can be split into halves.
pub trait Transport: Send + 'static {
    /// Name used for telemetry samples, e.g. `"websocket"`.
    fn protocol(&self) -> &'static str;

    /// Split into independently lockable read and write halves.
    fn into_split(self) -> (Box<dyn MessageReader>, Box<dyn MessageWriter>);
}

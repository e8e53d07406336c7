use framelink_frame::{ElementType, FrameError};

/// A message that is well-formed on the wire but not valid in the
/// connection's current state. Ends the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Array metadata arrived while another array was still being received.
    #[error("metadata for '{incoming}' received while '{pending}' is still incomplete")]
    MetadataWhileOpen { pending: String, incoming: String },

    /// A data chunk arrived with no array announced.
    #[error("data chunk received without preceding metadata")]
    ChunkWithoutOpenArray,

    /// A data chunk reaches past the announced element count.
    #[error("data chunk [{start}, {end}) exceeds array of {len} elements")]
    ChunkOutOfBounds { start: u64, end: u64, len: usize },

    /// A data chunk carries a different element type than announced.
    #[error("{got:?} data chunk for a {expected:?} array")]
    ChunkTypeMismatch {
        expected: ElementType,
        got: ElementType,
    },

    /// The announced shape is empty, overflows or is otherwise unusable.
    #[error("invalid array dimensions: {0}")]
    InvalidDimensions(String),

    /// The frame layer rejected the message.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Errors surfaced by the server and client API.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("transport error: {0}")]
    Transport(#[from] framelink_transport::TransportError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// The background runtime could not be created or the thread died.
    #[error("server runtime error: {0}")]
    Runtime(String),

    /// The consumer side of a delivery queue is gone.
    #[error("delivery queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, IpcError>;

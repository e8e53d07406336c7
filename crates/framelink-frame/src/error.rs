use crate::message::MessageType;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload carries a type byte outside the schema.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// The payload is empty and has no type byte.
    #[error("empty message")]
    EmptyMessage,

    /// The message body failed verification.
    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: MessageType, reason: String },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

pub(crate) fn transport_to_frame_error(err: framelink_transport::TransportError) -> FrameError {
    match err {
        framelink_transport::TransportError::Io(io)
        | framelink_transport::TransportError::Accept(io) => FrameError::Io(io),
        framelink_transport::TransportError::Bind { source, .. }
        | framelink_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

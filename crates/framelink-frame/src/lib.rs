//! Length-prefixed message framing for framelink IPC.
//!
//! Every message on the wire is:
//! - A 4-byte little-endian payload length
//! - A payload starting with a one-byte message type, followed by the
//!   message body
//!
//! Bodies are strict fixed-width bincode; decoding doubles as the buffer
//! verifier, so trailing or missing bytes are rejected.

pub mod codec;
pub mod error;
pub mod message;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{decode_frame, encode_frame, FrameConfig, HEADER_SIZE, MAX_MESSAGE_SIZE};
pub use error::{FrameError, Result};
pub use message::{
    ArrayMetadata, ArrayMetadataFlow, DataChunk, ElementType, Filepaths, Message, MessageType,
    PointsVideo, Request, RequestKind,
};
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::MessageCodec;

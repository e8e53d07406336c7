//! Tagged message schema.
//!
//! A payload is one type byte followed by the bincode-encoded body of that
//! message kind.

use std::fmt;

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::codec::MAX_MESSAGE_SIZE;
use crate::error::{FrameError, Result};

/// Message type discriminator, the first payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Filepaths = 1,
    ArrayMetadata = 2,
    ArrayMetadataFlow = 3,
    ChunkF32 = 4,
    ChunkU16 = 5,
    ChunkU8 = 6,
    PointsVideo = 7,
    Request = 8,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            1 => Self::Filepaths,
            2 => Self::ArrayMetadata,
            3 => Self::ArrayMetadataFlow,
            4 => Self::ChunkF32,
            5 => Self::ChunkU16,
            6 => Self::ChunkU8,
            7 => Self::PointsVideo,
            8 => Self::Request,
            other => return Err(FrameError::UnknownMessageType(other)),
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filepaths => "filepaths",
            Self::ArrayMetadata => "array-metadata",
            Self::ArrayMetadataFlow => "array-metadata-flow",
            Self::ChunkF32 => "chunk-f32",
            Self::ChunkU16 => "chunk-u16",
            Self::ChunkU8 => "chunk-u8",
            Self::PointsVideo => "points-video",
            Self::Request => "request",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar type of an announced array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    Float32,
    Uint16,
    Uint8,
}

impl ElementType {
    pub fn size(self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Uint16 => 2,
            Self::Uint8 => 1,
        }
    }
}

/// Files the receiving instance should load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filepaths {
    pub paths: Vec<String>,
}

/// Announces an array that follows as data chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMetadata {
    pub element_type: ElementType,
    pub nx: u32,
    pub ny: u32,
    pub nt: u32,
    pub name: String,
    /// Seconds.
    pub duration: f32,
    pub fps: f32,
    pub date: String,
    pub comment: String,
    /// 0 = autodetect.
    pub bit_range: u8,
    /// 0 = default.
    pub color_map: u8,
    pub vmin: Option<f32>,
    pub vmax: Option<f32>,
    pub parent_name: Option<String>,
    pub opacity: Option<u8>,
    pub metadata: Vec<(String, String)>,
}

impl ArrayMetadata {
    /// Metadata with everything but shape and name left at defaults.
    pub fn new(
        element_type: ElementType,
        nx: u32,
        ny: u32,
        nt: u32,
        name: impl Into<String>,
    ) -> Self {
        Self {
            element_type,
            nx,
            ny,
            nt,
            name: name.into(),
            duration: 0.0,
            fps: 0.0,
            date: String::new(),
            comment: String::new(),
            bit_range: 0,
            color_map: 0,
            vmin: None,
            vmax: None,
            parent_name: None,
            opacity: None,
            metadata: Vec::new(),
        }
    }

    /// `nx * ny * nt`, or `None` on overflow.
    pub fn element_count(&self) -> Option<usize> {
        element_count(self.nx, self.ny, self.nt)
    }
}

/// Announces a float32 flow field.
///
/// `nt` counts component planes: a field of `T` vector frames has `nt = 2 * T`
/// and interleaved u/v values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMetadataFlow {
    pub nx: u32,
    pub ny: u32,
    pub nt: u32,
    pub name: String,
    pub parent_name: Option<String>,
    pub color: Option<[f32; 4]>,
}

impl ArrayMetadataFlow {
    pub fn element_count(&self) -> Option<usize> {
        element_count(self.nx, self.ny, self.nt)
    }
}

fn element_count(nx: u32, ny: u32, nt: u32) -> Option<usize> {
    (nx as usize)
        .checked_mul(ny as usize)?
        .checked_mul(nt as usize)
}

/// A run of array elements starting at `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChunk<T> {
    pub start: u64,
    pub data: Vec<T>,
}

/// Point positions per frame, drawn on top of a parent array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsVideo {
    pub name: String,
    pub parent_name: Option<String>,
    pub color: [f32; 4],
    pub point_size: f32,
    /// Flattened `(x, y)` pairs.
    pub points: Vec<f32>,
    /// Exclusive end index (in points) of each frame.
    pub time_idxs: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Close,
    CloseAll,
    TracePosition,
}

/// A command for the receiving instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub kind: RequestKind,
    pub arg: Option<String>,
}

/// One decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Filepaths(Filepaths),
    ArrayMetadata(ArrayMetadata),
    ArrayMetadataFlow(ArrayMetadataFlow),
    ChunkF32(DataChunk<f32>),
    ChunkU16(DataChunk<u16>),
    ChunkU8(DataChunk<u8>),
    PointsVideo(PointsVideo),
    Request(Request),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Filepaths(_) => MessageType::Filepaths,
            Self::ArrayMetadata(_) => MessageType::ArrayMetadata,
            Self::ArrayMetadataFlow(_) => MessageType::ArrayMetadataFlow,
            Self::ChunkF32(_) => MessageType::ChunkF32,
            Self::ChunkU16(_) => MessageType::ChunkU16,
            Self::ChunkU8(_) => MessageType::ChunkU8,
            Self::PointsVideo(_) => MessageType::PointsVideo,
            Self::Request(_) => MessageType::Request,
        }
    }

    /// Encode to a payload: type byte + body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let kind = self.message_type();
        let mut out = vec![kind as u8];
        let written = match self {
            Self::Filepaths(body) => body_options().serialize_into(&mut out, body),
            Self::ArrayMetadata(body) => body_options().serialize_into(&mut out, body),
            Self::ArrayMetadataFlow(body) => body_options().serialize_into(&mut out, body),
            Self::ChunkF32(body) => body_options().serialize_into(&mut out, body),
            Self::ChunkU16(body) => body_options().serialize_into(&mut out, body),
            Self::ChunkU8(body) => body_options().serialize_into(&mut out, body),
            Self::PointsVideo(body) => body_options().serialize_into(&mut out, body),
            Self::Request(body) => body_options().serialize_into(&mut out, body),
        };
        written.map_err(|err| malformed(kind, err.to_string()))?;
        Ok(out)
    }

    /// Decode and verify a payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (&type_byte, body) = payload.split_first().ok_or(FrameError::EmptyMessage)?;
        let kind = MessageType::from_byte(type_byte)?;
        let message = match kind {
            MessageType::Filepaths => Self::Filepaths(decode_body(kind, body)?),
            MessageType::ArrayMetadata => Self::ArrayMetadata(decode_body(kind, body)?),
            MessageType::ArrayMetadataFlow => Self::ArrayMetadataFlow(decode_body(kind, body)?),
            MessageType::ChunkF32 => Self::ChunkF32(decode_body(kind, body)?),
            MessageType::ChunkU16 => Self::ChunkU16(decode_body(kind, body)?),
            MessageType::ChunkU8 => Self::ChunkU8(decode_body(kind, body)?),
            MessageType::PointsVideo => Self::PointsVideo(decode_body(kind, body)?),
            MessageType::Request => Self::Request(decode_body(kind, body)?),
        };
        message.verify()?;
        Ok(message)
    }

    /// Structural checks the encoding alone cannot express.
    fn verify(&self) -> Result<()> {
        match self {
            Self::PointsVideo(points) => {
                if points.points.len() % 2 != 0 {
                    return Err(malformed(
                        MessageType::PointsVideo,
                        "odd number of point coordinates",
                    ));
                }
                let pairs = (points.points.len() / 2) as u64;
                let mut last = 0u64;
                for &end in &points.time_idxs {
                    if end < last || end > pairs {
                        return Err(malformed(
                            MessageType::PointsVideo,
                            format!("time index {end} out of order or beyond {pairs} points"),
                        ));
                    }
                    last = end;
                }
                Ok(())
            }
            Self::ArrayMetadataFlow(meta) => match meta.color {
                Some(color) if color.iter().any(|v| !v.is_finite()) => {
                    Err(malformed(MessageType::ArrayMetadataFlow, "non-finite color"))
                }
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

fn body_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_MESSAGE_SIZE as u64)
        .with_little_endian()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

fn decode_body<T: DeserializeOwned>(kind: MessageType, body: &[u8]) -> Result<T> {
    body_options()
        .deserialize(body)
        .map_err(|err| malformed(kind, err.to_string()))
}

fn malformed(kind: MessageType, reason: impl Into<String>) -> FrameError {
    FrameError::Malformed {
        kind,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> ArrayMetadata {
        let mut meta = ArrayMetadata::new(ElementType::Uint16, 64, 32, 3, "stack");
        meta.fps = 50.0;
        meta.bit_range = 4;
        meta.parent_name = Some("parent".to_string());
        meta.metadata = vec![("Gain".to_string(), "2".to_string())];
        meta
    }

    #[test]
    fn type_byte_leads_payload() {
        let payload = Message::ArrayMetadata(sample_metadata()).encode().unwrap();
        assert_eq!(payload[0], MessageType::ArrayMetadata as u8);

        let decoded = Message::decode(&payload).unwrap();
        assert_eq!(decoded, Message::ArrayMetadata(sample_metadata()));
    }

    #[test]
    fn chunk_body_is_fixed_width() {
        let chunk = DataChunk {
            start: 7,
            data: vec![1.0f32, 2.0],
        };
        let payload = Message::ChunkF32(chunk).encode().unwrap();
        // type + start u64 + length u64 + 2 * f32
        assert_eq!(payload.len(), 1 + 8 + 8 + 8);
        assert_eq!(&payload[1..9], &7u64.to_le_bytes());
    }

    #[test]
    fn unknown_type_rejected() {
        let err = Message::decode(&[0x2a, 0, 0]).unwrap_err();
        assert!(matches!(err, FrameError::UnknownMessageType(0x2a)));

        let err = Message::decode(&[0x00]).unwrap_err();
        assert!(matches!(err, FrameError::UnknownMessageType(0)));
    }

    #[test]
    fn empty_payload_rejected() {
        assert!(matches!(
            Message::decode(&[]).unwrap_err(),
            FrameError::EmptyMessage
        ));
    }

    #[test]
    fn trailing_bytes_fail_verification() {
        let mut payload = Message::Request(Request {
            kind: RequestKind::CloseAll,
            arg: None,
        })
        .encode()
        .unwrap();
        payload.push(0xff);

        let err = Message::decode(&payload).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Malformed {
                kind: MessageType::Request,
                ..
            }
        ));
    }

    #[test]
    fn truncated_body_fails_verification() {
        let payload = Message::Filepaths(Filepaths {
            paths: vec!["/data/a.npy".to_string()],
        })
        .encode()
        .unwrap();

        let err = Message::decode(&payload[..payload.len() - 3]).unwrap_err();
        assert!(matches!(err, FrameError::Malformed { .. }));
    }

    #[test]
    fn chunk_length_beyond_body_rejected() {
        // Claims 1000 u16 values but carries none.
        let mut payload = vec![MessageType::ChunkU16 as u8];
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&1000u64.to_le_bytes());

        assert!(matches!(
            Message::decode(&payload).unwrap_err(),
            FrameError::Malformed { .. }
        ));
    }

    #[test]
    fn points_video_time_indices_verified() {
        let points = PointsVideo {
            name: "tracks".to_string(),
            parent_name: None,
            color: [1.0, 0.0, 0.0, 1.0],
            point_size: 3.0,
            points: vec![0.0, 0.0, 1.0, 1.0],
            time_idxs: vec![1, 3],
        };
        let payload = Message::PointsVideo(points).encode().unwrap();
        let err = Message::decode(&payload).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Malformed {
                kind: MessageType::PointsVideo,
                ..
            }
        ));
    }

    #[test]
    fn element_count_checks_overflow() {
        let meta = ArrayMetadata::new(ElementType::Float32, 10, 10, 3, "a");
        assert_eq!(meta.element_count(), Some(300));

        let flow = ArrayMetadataFlow {
            nx: 4,
            ny: 4,
            nt: 6,
            name: String::new(),
            parent_name: None,
            color: None,
        };
        assert_eq!(flow.element_count(), Some(96));
    }
}

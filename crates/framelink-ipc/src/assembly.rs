//! Per-connection reassembly of chunked arrays.
//!
//! An array arrives as one metadata message followed by data chunks. The
//! assembly holds at most one array in flight and hands it out once the
//! announced number of elements has been received.

use framelink_formats::{ArrayMeta, ArrayStorage, BitRange, ColorMap, OpacityFunction, RawArray};
use framelink_frame::{ArrayMetadata, ArrayMetadataFlow, DataChunk, ElementType, Message};
use tracing::{debug, error};

use crate::error::ProtocolError;

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for u16 {}
    impl Sealed for u8 {}
}

/// Element types that can travel as array data.
pub trait ArrayElement: sealed::Sealed + Copy + Default + Send + 'static {
    const ELEMENT_TYPE: ElementType;

    /// The backing vector when `storage` holds this type.
    fn slot(storage: &mut ArrayStorage) -> Option<&mut Vec<Self>>;

    fn storage(data: Vec<Self>) -> ArrayStorage;

    fn chunk_message(chunk: DataChunk<Self>) -> Message;
}

macro_rules! array_element {
    ($ty:ty, $elem:ident, $storage:ident, $message:ident) => {
        impl ArrayElement for $ty {
            const ELEMENT_TYPE: ElementType = ElementType::$elem;

            fn slot(storage: &mut ArrayStorage) -> Option<&mut Vec<Self>> {
                match storage {
                    ArrayStorage::$storage(v) => Some(v),
                    _ => None,
                }
            }

            fn storage(data: Vec<Self>) -> ArrayStorage {
                ArrayStorage::$storage(data)
            }

            fn chunk_message(chunk: DataChunk<Self>) -> Message {
                Message::$message(chunk)
            }
        }
    };
}

array_element!(f32, Float32, F32, ChunkF32);
array_element!(u16, Uint16, U16, ChunkU16);
array_element!(u8, Uint8, U8, ChunkU8);

struct Pending {
    meta: ArrayMeta,
    element_type: ElementType,
    data: ArrayStorage,
    total: usize,
    filled: usize,
}

/// Receives at most one array at a time.
#[derive(Default)]
pub struct ArrayAssembly {
    pending: Option<Pending>,
}

fn zeroed<T: ArrayElement>(len: usize) -> Result<ArrayStorage, ProtocolError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|_| {
        ProtocolError::InvalidDimensions(format!("cannot allocate {len} elements"))
    })?;
    data.resize(len, T::default());
    Ok(T::storage(data))
}

fn allocate(element_type: ElementType, len: usize) -> Result<ArrayStorage, ProtocolError> {
    match element_type {
        ElementType::Float32 => zeroed::<f32>(len),
        ElementType::Uint16 => zeroed::<u16>(len),
        ElementType::Uint8 => zeroed::<u8>(len),
    }
}

fn checked_len(nx: u32, ny: u32, nt: u32, count: Option<usize>) -> Result<usize, ProtocolError> {
    match count {
        Some(0) => Err(ProtocolError::InvalidDimensions(format!(
            "{nx}x{ny}x{nt} has no elements"
        ))),
        Some(n) => Ok(n),
        None => Err(ProtocolError::InvalidDimensions(format!(
            "{nx}x{ny}x{nt} overflows"
        ))),
    }
}

impl ArrayAssembly {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.pending.is_some()
    }

    /// Name of the array being received.
    pub fn pending_name(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.meta.name.as_str())
    }

    fn ensure_idle(&self, incoming: &str) -> Result<(), ProtocolError> {
        match &self.pending {
            Some(pending) => Err(ProtocolError::MetadataWhileOpen {
                pending: pending.meta.name.clone(),
                incoming: incoming.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn open(&mut self, meta: ArrayMeta, element_type: ElementType, total: usize) -> Result<(), ProtocolError> {
        let data = allocate(element_type, total)?;
        debug!(name = %meta.name, total, ?element_type, "array announced");
        self.pending = Some(Pending {
            meta,
            element_type,
            data,
            total,
            filled: 0,
        });
        Ok(())
    }

    /// Announce a scalar array.
    pub fn accept_metadata(&mut self, wire: ArrayMetadata) -> Result<Option<RawArray>, ProtocolError> {
        self.ensure_idle(&wire.name)?;
        let total = checked_len(wire.nx, wire.ny, wire.nt, wire.element_count())?;

        let mut meta = ArrayMeta::new(wire.name, wire.nx as usize, wire.ny as usize, wire.nt as usize);
        meta.duration = wire.duration;
        meta.fps = wire.fps;
        meta.date = wire.date;
        meta.comment = wire.comment;
        meta.bit_range = BitRange::from_code(wire.bit_range);
        meta.color_map = ColorMap::from_code(wire.color_map);
        meta.vmin = wire.vmin;
        meta.vmax = wire.vmax;
        meta.opacity = wire.opacity.and_then(OpacityFunction::from_code);
        meta.parent_name = wire.parent_name;
        meta.metadata = wire.metadata;

        self.open(meta, wire.element_type, total)?;
        Ok(None)
    }

    /// Announce a float32 flow field of `nt` interleaved component planes.
    pub fn accept_flow_metadata(
        &mut self,
        wire: ArrayMetadataFlow,
    ) -> Result<Option<RawArray>, ProtocolError> {
        self.ensure_idle(&wire.name)?;
        let total = checked_len(wire.nx, wire.ny, wire.nt, wire.element_count())?;
        if wire.nt % 2 != 0 {
            return Err(ProtocolError::InvalidDimensions(format!(
                "flow field with odd plane count {}",
                wire.nt
            )));
        }

        let mut meta = ArrayMeta::new(wire.name, wire.nx as usize, wire.ny as usize, wire.nt as usize);
        meta.parent_name = wire.parent_name;
        meta.color = wire.color;
        meta.is_flow = true;

        self.open(meta, ElementType::Float32, total)?;
        Ok(None)
    }

    /// Copy a chunk into the pending array. Returns the array once complete.
    pub fn accept_chunk<T: ArrayElement>(
        &mut self,
        chunk: DataChunk<T>,
    ) -> Result<Option<RawArray>, ProtocolError> {
        let pending = self
            .pending
            .as_mut()
            .ok_or(ProtocolError::ChunkWithoutOpenArray)?;
        if pending.element_type != T::ELEMENT_TYPE {
            return Err(ProtocolError::ChunkTypeMismatch {
                expected: pending.element_type,
                got: T::ELEMENT_TYPE,
            });
        }

        let len = chunk.data.len();
        let range = usize::try_from(chunk.start)
            .ok()
            .and_then(|start| Some((start, start.checked_add(len)?)))
            .filter(|&(_, end)| end <= pending.total);
        let Some((start, end)) = range else {
            return Err(ProtocolError::ChunkOutOfBounds {
                start: chunk.start,
                end: chunk.start.saturating_add(len as u64),
                len: pending.total,
            });
        };

        let Some(slot) = T::slot(&mut pending.data) else {
            return Err(ProtocolError::ChunkTypeMismatch {
                expected: pending.element_type,
                got: T::ELEMENT_TYPE,
            });
        };
        slot[start..end].copy_from_slice(&chunk.data);
        pending.filled += len;

        if pending.filled < pending.total {
            return Ok(None);
        }
        let Some(done) = self.pending.take() else {
            return Ok(None);
        };
        debug!(name = %done.meta.name, elements = done.total, "array complete");
        Ok(Some(RawArray::new(done.meta, done.data)))
    }
}

impl Drop for ArrayAssembly {
    fn drop(&mut self) {
        if let Some(pending) = &self.pending {
            error!(
                name = %pending.meta.name,
                received = pending.filled,
                expected = pending.total,
                "client disconnected before full array was received"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use framelink_formats::{FrameSource, InMemoryArray};

    use super::*;

    fn chunk<T>(start: u64, data: Vec<T>) -> DataChunk<T> {
        DataChunk { start, data }
    }

    #[test]
    fn assembles_chunks_in_order() {
        let mut assembly = ArrayAssembly::new();
        let mut wire = ArrayMetadata::new(ElementType::Uint16, 2, 2, 2, "stack");
        wire.bit_range = BitRange::to_code(Some(BitRange::U12));
        wire.metadata = vec![("Gain".into(), "2".into())];
        assert!(assembly.accept_metadata(wire).unwrap().is_none());
        assert_eq!(assembly.pending_name(), Some("stack"));

        assert!(assembly.accept_chunk(chunk(0, vec![1u16, 2, 3])).unwrap().is_none());
        let array = assembly
            .accept_chunk(chunk(3, vec![4u16, 5, 6, 7, 8]))
            .unwrap()
            .expect("array should be complete");
        assert!(!assembly.is_open());

        assert_eq!(array.data, ArrayStorage::U16(vec![1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(array.meta.bit_range, Some(BitRange::U12));
        assert_eq!(array.meta.metadata[0].1, "2");
        let source = InMemoryArray::new(array);
        assert!(source.good());
        assert_eq!(source.length(), 2);

        assert!(matches!(
            assembly.accept_chunk(chunk(0, vec![9u16])).unwrap_err(),
            ProtocolError::ChunkWithoutOpenArray
        ));
    }

    #[test]
    fn chunk_past_the_end_is_a_violation() {
        let mut assembly = ArrayAssembly::new();
        assembly
            .accept_metadata(ArrayMetadata::new(ElementType::Float32, 10, 10, 1, "grid"))
            .unwrap();
        assert!(assembly.accept_chunk(chunk(0, vec![0.0f32; 90])).unwrap().is_none());
        assert!(matches!(
            assembly.accept_chunk(chunk(90, vec![1.0f32; 20])).unwrap_err(),
            ProtocolError::ChunkOutOfBounds { start: 90, end: 110, len: 100 }
        ));
    }

    #[test]
    fn second_metadata_is_a_violation() {
        let mut assembly = ArrayAssembly::new();
        assembly
            .accept_metadata(ArrayMetadata::new(ElementType::Float32, 1, 1, 1, "a"))
            .unwrap();
        let err = assembly
            .accept_metadata(ArrayMetadata::new(ElementType::Float32, 1, 1, 1, "b"))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MetadataWhileOpen { .. }));
    }

    #[test]
    fn chunk_errors() {
        let mut assembly = ArrayAssembly::new();
        assert!(matches!(
            assembly.accept_chunk(chunk(0, vec![1.0f32])).unwrap_err(),
            ProtocolError::ChunkWithoutOpenArray
        ));

        assembly
            .accept_metadata(ArrayMetadata::new(ElementType::Float32, 2, 2, 1, "a"))
            .unwrap();
        assert!(matches!(
            assembly.accept_chunk(chunk(3, vec![1.0f32, 2.0])).unwrap_err(),
            ProtocolError::ChunkOutOfBounds { start: 3, end: 5, len: 4 }
        ));
        assert!(matches!(
            assembly.accept_chunk(chunk(u64::MAX, vec![1.0f32])).unwrap_err(),
            ProtocolError::ChunkOutOfBounds { .. }
        ));
        assert!(matches!(
            assembly.accept_chunk(chunk(0, vec![1u8])).unwrap_err(),
            ProtocolError::ChunkTypeMismatch {
                expected: ElementType::Float32,
                got: ElementType::Uint8
            }
        ));
    }

    #[test]
    fn invalid_shapes() {
        let mut assembly = ArrayAssembly::new();
        assert!(matches!(
            assembly
                .accept_metadata(ArrayMetadata::new(ElementType::Uint8, 0, 4, 1, "empty"))
                .unwrap_err(),
            ProtocolError::InvalidDimensions(_)
        ));

        let flow = ArrayMetadataFlow {
            nx: 2,
            ny: 2,
            nt: 3,
            name: "flow".into(),
            parent_name: None,
            color: None,
        };
        assert!(matches!(
            assembly.accept_flow_metadata(flow).unwrap_err(),
            ProtocolError::InvalidDimensions(_)
        ));
        assert!(!assembly.is_open());
    }

    #[test]
    fn flow_field() {
        let mut assembly = ArrayAssembly::new();
        let flow = ArrayMetadataFlow {
            nx: 1,
            ny: 1,
            nt: 4,
            name: "flow".into(),
            parent_name: Some("video".into()),
            color: Some([1.0, 0.0, 0.0, 1.0]),
        };
        assembly.accept_flow_metadata(flow).unwrap();
        let array = assembly
            .accept_chunk(chunk(0, vec![0.5f32, -0.5, 1.0, -1.0]))
            .unwrap()
            .unwrap();
        assert!(array.meta.is_flow);
        assert_eq!(array.meta.parent_name.as_deref(), Some("video"));

        let source = InMemoryArray::new(array);
        assert!(source.is_flow());
        assert_eq!(source.length(), 2);
        assert_eq!(source.nc(), 2);
        assert_eq!(source.color(), Some([1.0, 0.0, 0.0, 1.0]));
    }
}

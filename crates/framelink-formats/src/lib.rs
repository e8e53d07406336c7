//! Multi-frame scientific image formats behind one frame source interface.
//!
//! Every loader implements [`FrameSource`]: shape, descriptive metadata and
//! per-frame access as `f32` planes, whatever the on-disk element type.
//!
//! # Formats
//!
//! - [`recording`] : proprietary camera recordings (`.dat` with 1024-byte header)
//! - [`npy`] : NumPy `.npy` arrays
//! - [`raw`] : headerless float32 `.dat` files with dimensions in the name
//! - [`tiff_stack`] : multi-page TIFF files
//! - [`tiff_series`] : folders of single-page TIFF files
//! - [`memory`] : arrays assembled in memory (e.g. received over IPC)
//! - [`single`] : a one-frame view of another source
//!
//! [`Dispatcher`] picks the right loader for a path.

pub mod dispatch;
pub mod error;
pub mod mapped;
pub mod memory;
pub mod npy;
pub mod pixel;
pub mod raw;
pub mod recording;
pub mod sidecar;
pub mod single;
pub mod source;
pub mod strided;
pub mod tiff_series;
pub mod tiff_stack;

#[cfg(test)]
mod test_support;

pub use dispatch::{
    Dispatched, Dispatcher, LoggingPluginRunner, PluginRunner, PLUGIN_FOLDER, PLUGIN_FOLDER_DICOM,
    PLUGIN_TIFF,
};
pub use error::{FormatError, Result};
pub use memory::{ArrayMeta, ArrayStorage, InMemoryArray, RawArray};
pub use mapped::MappedFile;
pub use npy::{parse_header, NpyFile, NpyHeader};
pub use pixel::{detect_bit_range, range_to_float, BitRange, ColorMap, OpacityFunction, PixelScalar};
pub use raw::{dims_from_filename, RawFile};
pub use recording::RecordingFile;
pub use single::SingleFrameView;
pub use source::{Capabilities, FrameSource, Plane, SharedSource, SourceSummary};
pub use sidecar::Sidecar;
pub use strided::FrameLayout;
pub use tiff_series::{is_tiff_path, list_tiff_files, TiffSeries};
pub use tiff_stack::TiffStack;

//! NumPy `.npy` arrays.
//!
//! Supported shapes, C order only:
//!
//! - `(ny, nx)`: one grayscale frame
//! - `(nt, ny, nx)`: grayscale frames
//! - `(nt, ny, nx, 2)` float32: flow field
//! - `(nt, ny, nx, 3)`: color

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::error::{FormatError, Result};
use crate::mapped::{MappedFile, MappedFrames};
use crate::pixel::{detect_bit_range, BitRange, PixelScalar};
use crate::source::{Capabilities, FrameSource, Plane};
use crate::strided::FrameLayout;

pub const MAGIC: &[u8] = b"\x93NUMPY";

/// The parsed header dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub descr: String,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
    /// Offset of the first data byte.
    pub data_offset: usize,
}

struct HeaderRegex {
    descr: Regex,
    fortran: Regex,
    shape: Regex,
}

static HEADER_REGEX: OnceLock<HeaderRegex> = OnceLock::new();

fn header_regex() -> &'static HeaderRegex {
    HEADER_REGEX.get_or_init(|| HeaderRegex {
        descr: Regex::new(r"'descr'\s*:\s*'([^']*)'").expect("descr regex should compile"),
        fortran: Regex::new(r"'fortran_order'\s*:\s*(True|False)")
            .expect("fortran_order regex should compile"),
        shape: Regex::new(r"'shape'\s*:\s*\(([^)]*)\)").expect("shape regex should compile"),
    })
}

/// Parse the magic, version and header dictionary at the start of `bytes`.
pub fn parse_header(bytes: &[u8]) -> Result<NpyHeader> {
    let invalid = |reason: &str| FormatError::Validation(format!("Invalid .npy header: {reason}"));

    if !bytes.starts_with(MAGIC) {
        return Err(invalid("missing magic string"));
    }
    let major = *bytes.get(6).ok_or_else(|| invalid("truncated"))?;
    let (len, start) = match major {
        1 => {
            let b = bytes.get(8..10).ok_or_else(|| invalid("truncated"))?;
            (usize::from(u16::from_le_bytes([b[0], b[1]])), 10)
        }
        2 | 3 => {
            let b = bytes.get(8..12).ok_or_else(|| invalid("truncated"))?;
            (u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize, 12)
        }
        other => {
            return Err(FormatError::Unsupported(format!(
                "Unsupported .npy version {other}"
            )))
        }
    };
    let dict = bytes
        .get(start..start + len)
        .ok_or_else(|| invalid("truncated"))?;
    let dict = std::str::from_utf8(dict).map_err(|_| invalid("header is not text"))?;

    let re = header_regex();
    let descr = re
        .descr
        .captures(dict)
        .and_then(|c| c.get(1))
        .ok_or_else(|| invalid("no 'descr'"))?
        .as_str()
        .to_string();
    let fortran_order = re
        .fortran
        .captures(dict)
        .and_then(|c| c.get(1))
        .ok_or_else(|| invalid("no 'fortran_order'"))?
        .as_str()
        == "True";
    let shape = re
        .shape
        .captures(dict)
        .and_then(|c| c.get(1))
        .ok_or_else(|| invalid("no 'shape'"))?
        .as_str()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| invalid("bad shape")))
        .collect::<Result<Vec<_>>>()?;

    Ok(NpyHeader {
        descr,
        fortran_order,
        shape,
        data_offset: start + len,
    })
}

/// A memory-mapped `.npy` file.
#[derive(Debug)]
pub struct NpyFile {
    path: PathBuf,
    error_msg: String,
    inner: Option<(MappedFrames, Option<BitRange>)>,
    plane: Plane,
}

impl NpyFile {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let result = load(&path).and_then(|(frames, bit_range)| {
            let layout = frames.layout();
            Ok((Plane::try_zeros(layout.nx, layout.ny)?, frames, bit_range))
        });
        match result {
            Ok((plane, frames, bit_range)) => Self {
                path,
                error_msg: String::new(),
                inner: Some((frames, bit_range)),
                plane,
            },
            Err(e) => Self {
                path,
                error_msg: e.to_string(),
                inner: None,
                plane: Plane::zeros(0, 0),
            },
        }
    }

    fn frames(&self) -> Result<&MappedFrames> {
        self.inner
            .as_ref()
            .map(|(frames, _)| frames)
            .ok_or_else(|| FormatError::NotLoaded(self.error_msg.clone()))
    }
}

fn load(path: &Path) -> Result<(MappedFrames, Option<BitRange>)> {
    let map = MappedFile::open(path)?;
    let header = parse_header(map.bytes())?;
    if header.fortran_order {
        return Err(FormatError::Unsupported(
            "Fortran-ordered arrays are not supported".into(),
        ));
    }
    let scalar = PixelScalar::from_npy_descr(&header.descr)
        .ok_or_else(|| FormatError::Unsupported("Unsupported data type".into()))?;

    let unsupported_dims = || FormatError::Unsupported("Unsupported array dimensions".into());
    let (nt, layout) = match header.shape[..] {
        [ny, nx] => (1, FrameLayout::gray(nx, ny)),
        [nt, ny, nx] => (nt, FrameLayout::gray(nx, ny)),
        [nt, ny, nx, 2] if scalar == PixelScalar::F32 => (nt, FrameLayout::interleaved(nx, ny, 2)),
        [nt, ny, nx, 3] => (nt, FrameLayout::interleaved(nx, ny, 3)),
        _ => return Err(unsupported_dims()),
    };
    if layout.nx == 0 || layout.ny == 0 || nt == 0 {
        return Err(FormatError::Validation(format!(
            "Invalid array dimensions ({nt}, {}, {})",
            layout.ny, layout.nx
        )));
    }

    let size_mismatch =
        || FormatError::Validation("File size does not match expected dimensions".into());
    let data_len = map.len().saturating_sub(header.data_offset);
    let frame_bytes = layout
        .checked_frame_bytes(scalar)
        .ok_or_else(size_mismatch)?;
    let available = data_len / frame_bytes;
    if data_len % frame_bytes != 0 || available < nt || (available > nt && nt != 1) {
        return Err(size_mismatch());
    }
    if available > nt {
        debug!(path = %path.display(), frames = available, "frame count taken from file size");
    }

    let frames = MappedFrames::new(
        map,
        header.data_offset,
        scalar,
        available * layout.stride,
        layout,
    );
    let bit_range = match scalar {
        _ if frames.is_flow() => None,
        PixelScalar::Bool => Some(BitRange::Float),
        _ => detect_bit_range(frames.sample(2)),
    };
    debug!(
        path = %path.display(),
        descr = %header.descr,
        shape = ?header.shape,
        "opened npy"
    );
    Ok((frames, bit_range))
}

impl FrameSource for NpyFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn good(&self) -> bool {
        self.inner.is_some()
    }

    fn error_msg(&self) -> &str {
        &self.error_msg
    }

    fn nx(&self) -> usize {
        self.plane.nx
    }

    fn ny(&self) -> usize {
        self.plane.ny
    }

    fn nc(&self) -> usize {
        self.frames().map_or(1, |f| f.layout().nc)
    }

    fn length(&self) -> usize {
        self.frames().map_or(0, MappedFrames::length)
    }

    fn bit_range(&self) -> Option<BitRange> {
        self.inner.as_ref()?.1
    }

    fn scalar(&self) -> Option<PixelScalar> {
        self.frames().ok().map(MappedFrames::scalar)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::AS_FLOW
    }

    fn is_flow(&self) -> bool {
        self.frames().is_ok_and(MappedFrames::is_flow)
    }

    fn set_flow(&mut self, flow: bool) -> bool {
        self.inner
            .as_mut()
            .is_some_and(|(frames, _)| frames.set_flow(flow))
    }

    fn read_frame(&mut self, t: usize, c: usize) -> Result<&Plane> {
        let (frames, _) = self
            .inner
            .as_ref()
            .ok_or_else(|| FormatError::NotLoaded(self.error_msg.clone()))?;
        frames.read(t, c, &mut self.plane.data)?;
        Ok(&self.plane)
    }

    fn get_pixel(&mut self, t: usize, x: usize, y: usize) -> Result<f32> {
        self.frames()?.pixel(t, x, y)
    }
}

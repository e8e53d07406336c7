//! Headerless float32 files with the dimensions encoded in the file name.
//!
//! `prefix_{width}x{height}x{frames}f_suffix.dat`, where the frame count
//! is optional. Width comes first, unlike NumPy's shape order.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{FormatError, Result};
use crate::mapped::{MappedFile, MappedFrames};
use crate::pixel::{detect_bit_range, BitRange, PixelScalar};
use crate::source::{Capabilities, FrameSource, Plane};
use crate::strided::FrameLayout;

static DIMS_REGEX: OnceLock<Regex> = OnceLock::new();

/// `(width, height, frames)` from a file name such as `foo_128x64x300f_bar.dat`.
///
/// A missing frame count is 1. `None` when the name does not follow the
/// convention or a dimension is zero.
pub fn dims_from_filename(path: &Path) -> Option<(usize, usize, usize)> {
    let regex = DIMS_REGEX.get_or_init(|| {
        Regex::new(r"^.*?_(\d+)x(\d+)(x(\d+))?f?.*?\.dat$").expect("dimension regex should compile")
    });
    let name = path.file_name()?.to_str()?;
    let caps = regex.captures(name)?;
    let nx = caps.get(1)?.as_str().parse().ok()?;
    let ny = caps.get(2)?.as_str().parse().ok()?;
    let nt = match caps.get(4) {
        Some(m) => m.as_str().parse().ok()?,
        None => 1,
    };
    (nx > 0 && ny > 0 && nt > 0).then_some((nx, ny, nt))
}

/// A headerless `.dat` file of little-endian float32 frames.
#[derive(Debug)]
pub struct RawFile {
    path: PathBuf,
    error_msg: String,
    inner: Option<(MappedFrames, Option<BitRange>)>,
    plane: Plane,
}

impl RawFile {
    /// Open with dimensions parsed from the file name.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let dims = dims_from_filename(&path);
        Self::with_dims(path, dims)
    }

    /// Open with explicit `(width, height, frames)`.
    pub fn with_dims(path: impl Into<PathBuf>, dims: Option<(usize, usize, usize)>) -> Self {
        let path = path.into();
        let result = match dims {
            Some(dims) => load(&path, dims),
            None => Err(FormatError::Validation(
                "Unable to determine dimensions from file name".into(),
            )),
        };
        let result = result.and_then(|frames| {
            let layout = frames.layout();
            Ok((Plane::try_zeros(layout.nx, layout.ny)?, frames))
        });
        match result {
            Ok((plane, frames)) => {
                let bit_range = detect_bit_range(frames.sample(2));
                Self {
                    path,
                    error_msg: String::new(),
                    inner: Some((frames, bit_range)),
                    plane,
                }
            }
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

fn load(path: &Path, (nx, ny, declared): (usize, usize, usize)) -> Result<MappedFrames> {
    let size_mismatch =
        || FormatError::Validation("File size does not match expected dimensions".into());
    let map = MappedFile::open(path)?;
    let layout = FrameLayout::gray(nx, ny);
    let frame_bytes = layout
        .checked_frame_bytes(PixelScalar::F32)
        .ok_or_else(size_mismatch)?;
    let available = map.len() / frame_bytes;
    if map.len() % frame_bytes != 0 || available < declared {
        return Err(size_mismatch());
    }
    if available > declared {
        if declared != 1 {
            warn!(
                path = %path.display(),
                declared,
                found = available,
                "frame count in name does not match file size"
            );
        } else {
            debug!(path = %path.display(), frames = available, "frame count taken from file size");
        }
    }

    Ok(MappedFrames::new(
        map,
        0,
        PixelScalar::F32,
        available,
        layout,
    ))
}

impl FrameSource for RawFile {
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

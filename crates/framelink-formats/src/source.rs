//! The frame source contract shared by every loader.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitflags::bitflags;
use serde::Serialize;

use crate::error::{FormatError, Result};
use crate::pixel::{BitRange, ColorMap, OpacityFunction, PixelScalar};

bitflags! {
    /// Optional behaviors of a source.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// `set_comment` persists a new comment.
        const SET_COMMENT = 1 << 0;
        /// The source may be reinterpreted as a flow (2D vector) field.
        const AS_FLOW = 1 << 1;
    }
}

/// One channel of one frame, row-major: `data[y * nx + x]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub nx: usize,
    pub ny: usize,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn zeros(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            data: vec![0.0; nx * ny],
        }
    }

    /// Like [`Plane::zeros`] for dimensions read from a file: an oversized
    /// or unallocatable plane is a validation error.
    pub fn try_zeros(nx: usize, ny: usize) -> Result<Self> {
        let too_large = || FormatError::Validation(format!("Frame size {nx}x{ny} is too large"));
        let len = nx.checked_mul(ny).ok_or_else(too_large)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| too_large())?;
        data.resize(len, 0.0);
        Ok(Self { nx, ny, data })
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.nx + x]
    }

    /// Extent ignoring NaNs; `None` if every value is NaN.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((f32::min(lo, v), f32::max(hi, v))),
            })
    }

    /// Mean ignoring NaNs.
    pub fn mean(&self) -> Option<f32> {
        let (sum, n) = self
            .data
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0f64, 0usize), |(sum, n), &v| (sum + f64::from(v), n + 1));
        (n > 0).then(|| (sum / n as f64) as f32)
    }
}

/// A multi-frame array with uniform per-frame access.
///
/// Construction never fails: a loader that cannot read its input yields a
/// source with `good() == false` and a non-empty [`error_msg`](Self::error_msg).
/// A good source may still carry a warning in `error_msg`.
///
/// `read_frame` reuses one internal buffer, so a source must be driven from a
/// single owner at a time (see [`SharedSource`]).
pub trait FrameSource: Send {
    /// Source path; empty for in-memory sources.
    fn path(&self) -> &Path;
    fn good(&self) -> bool;
    /// Error when not good, warning (or empty) otherwise.
    fn error_msg(&self) -> &str;

    fn nx(&self) -> usize;
    fn ny(&self) -> usize;
    /// 1 = grayscale, 2 = flow field, 3 = color.
    fn nc(&self) -> usize {
        1
    }
    fn length(&self) -> usize;

    fn date(&self) -> String {
        String::new()
    }
    fn comment(&self) -> String {
        String::new()
    }
    fn duration(&self) -> Duration {
        Duration::ZERO
    }
    fn fps(&self) -> f32 {
        0.0
    }
    /// Ordered `(key, label)` pairs.
    fn metadata(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn bit_range(&self) -> Option<BitRange>;
    /// Element type the values are stored as; `None` when unknown.
    fn scalar(&self) -> Option<PixelScalar> {
        None
    }
    fn color_map(&self) -> Option<ColorMap> {
        None
    }
    fn vmin(&self) -> Option<f32> {
        None
    }
    fn vmax(&self) -> Option<f32> {
        None
    }
    fn opacity(&self) -> Option<OpacityFunction> {
        None
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    /// Persist a new comment. No-op without [`Capabilities::SET_COMMENT`].
    fn set_comment(&mut self, _comment: &str) -> Result<()> {
        Ok(())
    }

    fn is_flow(&self) -> bool {
        false
    }

    /// Toggle flow interpretation; returns whether the request was honored.
    fn set_flow(&mut self, _flow: bool) -> bool {
        false
    }

    /// Materialize channel `c` of frame `t` into the internal buffer.
    fn read_frame(&mut self, t: usize, c: usize) -> Result<&Plane>;

    /// Value at `(x, y)` of channel 0 of frame `t`.
    fn get_pixel(&mut self, t: usize, x: usize, y: usize) -> Result<f32>;

    /// Mean over the block at `origin` with `size`, clipped to the frame.
    fn get_block(&mut self, t: usize, origin: (usize, usize), size: (usize, usize)) -> Result<f32> {
        let (x0, y0) = origin;
        let x1 = x0.saturating_add(size.0).min(self.nx());
        let y1 = y0.saturating_add(size.1).min(self.ny());
        if x0 >= x1 || y0 >= y1 {
            return Err(FormatError::PixelOutOfRange { x: x0, y: y0 });
        }

        let mut sum = 0f64;
        for y in y0..y1 {
            for x in x0..x1 {
                sum += f64::from(self.get_pixel(t, x, y)?);
            }
        }
        Ok((sum / ((x1 - x0) * (y1 - y0)) as f64) as f32)
    }

    /// Serializable snapshot of shape and metadata.
    fn summary(&self) -> SourceSummary {
        SourceSummary {
            path: self.path().display().to_string(),
            good: self.good(),
            message: self.error_msg().to_string(),
            nx: self.nx(),
            ny: self.ny(),
            nc: self.nc(),
            length: self.length(),
            date: self.date(),
            comment: self.comment(),
            duration_ms: self.duration().as_millis() as u64,
            fps: self.fps(),
            bit_range: self.bit_range(),
            color_map: self.color_map(),
            vmin: self.vmin(),
            vmax: self.vmax(),
            opacity: self.opacity(),
            flow: self.is_flow(),
            set_comment: self.capabilities().contains(Capabilities::SET_COMMENT),
            metadata: self.metadata(),
        }
    }
}

/// A source shared between owners, serialized by a mutex.
pub type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

/// Snapshot of a source, as printed by tooling.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub path: String,
    pub good: bool,
    pub message: String,
    pub nx: usize,
    pub ny: usize,
    pub nc: usize,
    pub length: usize,
    pub date: String,
    pub comment: String,
    pub duration_ms: u64,
    pub fps: f32,
    pub bit_range: Option<BitRange>,
    pub color_map: Option<ColorMap>,
    pub vmin: Option<f32>,
    pub vmax: Option<f32>,
    pub opacity: Option<OpacityFunction>,
    pub flow: bool,
    pub set_comment: bool,
    pub metadata: Vec<(String, String)>,
}

/// Bounds check for frame/channel arguments.
pub(crate) fn check_frame(t: usize, c: usize, length: usize, nc: usize) -> Result<()> {
    if t >= length {
        return Err(FormatError::TimeOutOfRange { t, length });
    }
    if c >= nc {
        return Err(FormatError::ChannelOutOfRange { c, nc });
    }
    Ok(())
}

/// Bounds check for pixel arguments.
pub(crate) fn check_pixel(
    t: usize,
    x: usize,
    y: usize,
    length: usize,
    nx: usize,
    ny: usize,
) -> Result<()> {
    if t >= length {
        return Err(FormatError::TimeOutOfRange { t, length });
    }
    if x >= nx || y >= ny {
        return Err(FormatError::PixelOutOfRange { x, y });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    /// Ramp source: value = t * 100 + y * nx + x.
    struct Ramp {
        path: PathBuf,
        plane: Plane,
    }

    impl FrameSource for Ramp {
        fn path(&self) -> &Path {
            &self.path
        }
        fn good(&self) -> bool {
            true
        }
        fn error_msg(&self) -> &str {
            ""
        }
        fn nx(&self) -> usize {
            4
        }
        fn ny(&self) -> usize {
            3
        }
        fn length(&self) -> usize {
            2
        }
        fn bit_range(&self) -> Option<BitRange> {
            None
        }
        fn read_frame(&mut self, t: usize, c: usize) -> Result<&Plane> {
            check_frame(t, c, 2, 1)?;
            for (i, v) in self.plane.data.iter_mut().enumerate() {
                *v = (t * 100 + i) as f32;
            }
            Ok(&self.plane)
        }
        fn get_pixel(&mut self, t: usize, x: usize, y: usize) -> Result<f32> {
            check_pixel(t, x, y, 2, 4, 3)?;
            Ok((t * 100 + y * 4 + x) as f32)
        }
    }

    fn ramp() -> Ramp {
        Ramp {
            path: PathBuf::new(),
            plane: Plane::zeros(4, 3),
        }
    }

    #[test]
    fn default_block_is_mean_of_pixels() {
        let mut src = ramp();
        // pixels 0,1,4,5 of frame 1
        let mean = src.get_block(1, (0, 0), (2, 2)).unwrap();
        assert_eq!(mean, 102.5);
    }

    #[test]
    fn block_is_clipped_to_frame() {
        let mut src = ramp();
        // only (3,2) = 11 remains
        assert_eq!(src.get_block(0, (3, 2), (5, 5)).unwrap(), 11.0);
        assert!(matches!(
            src.get_block(0, (4, 0), (1, 1)),
            Err(FormatError::PixelOutOfRange { .. })
        ));
    }

    #[test]
    fn default_set_comment_is_noop() {
        let mut src = ramp();
        assert!(src.capabilities().is_empty());
        src.set_comment("ignored").unwrap();
        assert_eq!(src.comment(), "");
    }

    #[test]
    fn index_checks() {
        let mut src = ramp();
        assert!(matches!(
            src.read_frame(2, 0),
            Err(FormatError::TimeOutOfRange { t: 2, length: 2 })
        ));
        assert!(matches!(
            src.read_frame(0, 1),
            Err(FormatError::ChannelOutOfRange { c: 1, nc: 1 })
        ));
    }

    #[test]
    fn plane_statistics_skip_nan() {
        let plane = Plane {
            nx: 2,
            ny: 2,
            data: vec![1.0, f32::NAN, 3.0, 5.0],
        };
        assert_eq!(plane.min_max(), Some((1.0, 5.0)));
        assert_eq!(plane.mean(), Some(3.0));
        assert_eq!(plane.get(0, 1), 3.0);
    }

    #[test]
    fn summary_serializes() {
        let summary = ramp().summary();
        assert_eq!((summary.nx, summary.ny, summary.length), (4, 3, 2));
        assert!(!summary.set_comment);
    }

    #[test]
    fn oversized_plane_is_validation_error() {
        assert_eq!(Plane::try_zeros(3, 2).unwrap(), Plane::zeros(3, 2));
        assert!(matches!(
            Plane::try_zeros(usize::MAX, 2),
            Err(FormatError::Validation(_))
        ));
        assert!(matches!(
            Plane::try_zeros(usize::MAX / 4, 1),
            Err(FormatError::Validation(_))
        ));
    }
}

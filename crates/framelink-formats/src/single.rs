//! One frame of another source, exposed as a source of length 1.

use std::path::{Path, PathBuf};
use std::sync::{MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{FormatError, Result};
use crate::pixel::{BitRange, ColorMap, OpacityFunction, PixelScalar};
use crate::source::{FrameSource, Plane, SharedSource};

/// Frame `t` of a shared source.
///
/// Every accessor locks the underlying source, so a view must not be read
/// while the caller already holds that lock.
pub struct SingleFrameView {
    source: SharedSource,
    t: usize,
    path: PathBuf,
    error_msg: String,
    good: bool,
    plane: Plane,
}

impl std::fmt::Debug for SingleFrameView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFrameView")
            .field("path", &self.path)
            .field("t", &self.t)
            .field("good", &self.good)
            .finish_non_exhaustive()
    }
}

impl SingleFrameView {
    pub fn new(source: SharedSource, t: usize) -> Self {
        let (path, error_msg, good) = {
            let inner = source.lock().unwrap_or_else(PoisonError::into_inner);
            let error_msg = if t < inner.length() {
                inner.error_msg().to_string()
            } else {
                format!(
                    "Frame {t} is out of range for a source with {} frames",
                    inner.length()
                )
            };
            (
                inner.path().to_path_buf(),
                error_msg,
                inner.good() && t < inner.length(),
            )
        };
        Self {
            source,
            t,
            path,
            error_msg,
            good,
            plane: Plane::zeros(0, 0),
        }
    }

    /// Frame index in the underlying source.
    pub fn frame_index(&self) -> usize {
        self.t
    }

    fn inner(&self) -> MutexGuard<'_, Box<dyn FrameSource>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, t: usize) -> Result<()> {
        if !self.good {
            return Err(FormatError::NotLoaded(self.error_msg.clone()));
        }
        if t != 0 {
            return Err(FormatError::TimeOutOfRange { t, length: 1 });
        }
        Ok(())
    }
}

impl FrameSource for SingleFrameView {
    fn path(&self) -> &Path {
        &self.path
    }

    fn good(&self) -> bool {
        self.good
    }

    fn error_msg(&self) -> &str {
        &self.error_msg
    }

    fn nx(&self) -> usize {
        self.inner().nx()
    }

    fn ny(&self) -> usize {
        self.inner().ny()
    }

    fn nc(&self) -> usize {
        self.inner().nc()
    }

    fn length(&self) -> usize {
        1
    }

    fn date(&self) -> String {
        self.inner().date()
    }

    fn comment(&self) -> String {
        self.inner().comment()
    }

    fn duration(&self) -> Duration {
        self.inner().duration()
    }

    fn fps(&self) -> f32 {
        self.inner().fps()
    }

    fn metadata(&self) -> Vec<(String, String)> {
        self.inner().metadata()
    }

    fn bit_range(&self) -> Option<BitRange> {
        self.inner().bit_range()
    }

    fn scalar(&self) -> Option<PixelScalar> {
        self.inner().scalar()
    }

    fn color_map(&self) -> Option<ColorMap> {
        self.inner().color_map()
    }

    fn vmin(&self) -> Option<f32> {
        self.inner().vmin()
    }

    fn vmax(&self) -> Option<f32> {
        self.inner().vmax()
    }

    fn opacity(&self) -> Option<OpacityFunction> {
        self.inner().opacity()
    }

    fn read_frame(&mut self, t: usize, c: usize) -> Result<&Plane> {
        self.check(t)?;
        let plane = {
            let mut inner = self.source.lock().unwrap_or_else(PoisonError::into_inner);
            let frame = inner.read_frame(self.t, c)?;
            self.plane.nx = frame.nx;
            self.plane.ny = frame.ny;
            self.plane.data.clear();
            self.plane.data.extend_from_slice(&frame.data);
            &self.plane
        };
        Ok(plane)
    }

    fn get_pixel(&mut self, t: usize, x: usize, y: usize) -> Result<f32> {
        self.check(t)?;
        self.inner().get_pixel(self.t, x, y)
    }

    fn get_block(&mut self, t: usize, origin: (usize, usize), size: (usize, usize)) -> Result<f32> {
        self.check(t)?;
        self.inner().get_block(self.t, origin, size)
    }
}

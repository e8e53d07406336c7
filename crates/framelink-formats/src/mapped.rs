//! Read-only memory-mapped files.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{FormatError, Result};
use crate::pixel::PixelScalar;
use crate::source::{check_frame, check_pixel};
use crate::strided::{copy_strided_bytes, FrameLayout};

/// A file mapped read-only for the lifetime of the value.
#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    map: Mmap,
}

impl MappedFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| FormatError::io(path, e))?;
        // SAFETY: the map is read-only and callers only read through bounds
        // checked slices; truncation by another process is not guarded against.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| FormatError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            map,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// Bytes from `offset` to the end; empty past the end.
    pub fn tail(&self, offset: usize) -> &[u8] {
        self.map.get(offset..).unwrap_or_default()
    }
}

/// Frames of one scalar type stored back to back in a mapped file.
///
/// The data is a sequence of `nx * ny` element planes. Interpreted as
/// grayscale every plane is a frame; as a flow field (or color) the
/// components are interleaved per pixel.
#[derive(Debug)]
pub(crate) struct MappedFrames {
    map: MappedFile,
    data_offset: usize,
    scalar: PixelScalar,
    planes: usize,
    layout: FrameLayout,
}

impl MappedFrames {
    pub fn new(
        map: MappedFile,
        data_offset: usize,
        scalar: PixelScalar,
        planes: usize,
        layout: FrameLayout,
    ) -> Self {
        Self {
            map,
            data_offset,
            scalar,
            planes,
            layout,
        }
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn scalar(&self) -> PixelScalar {
        self.scalar
    }

    pub fn length(&self) -> usize {
        self.planes / self.layout.stride.max(1)
    }

    pub fn is_flow(&self) -> bool {
        self.layout.nc == 2
    }

    /// Switch between grayscale and flow interpretation.
    ///
    /// Color data never switches; flow needs an even number of planes.
    pub fn set_flow(&mut self, flow: bool) -> bool {
        let FrameLayout { nx, ny, nc, .. } = self.layout;
        match (nc, flow) {
            (3, _) => false,
            (2, true) | (1, false) => true,
            (_, true) if self.planes % 2 != 0 => false,
            (_, true) => {
                self.layout = FrameLayout::interleaved(nx, ny, 2);
                true
            }
            (_, false) => {
                self.layout = FrameLayout::gray(nx, ny);
                true
            }
        }
    }

    fn data(&self) -> &[u8] {
        self.map.tail(self.data_offset)
    }

    pub fn read(&self, t: usize, c: usize, dst: &mut [f32]) -> Result<()> {
        check_frame(t, c, self.length(), self.layout.nc)?;
        let (offset, stride) = self.layout.channel(t, c);
        copy_strided_bytes(self.data(), self.scalar, offset, stride, dst);
        Ok(())
    }

    pub fn pixel(&self, t: usize, x: usize, y: usize) -> Result<f32> {
        let FrameLayout { nx, ny, .. } = self.layout;
        check_pixel(t, x, y, self.length(), nx, ny)?;
        let size = self.scalar.size();
        let at = self.layout.pixel(t, x, y) * size;
        let bytes = self
            .data()
            .get(at..at + size)
            .ok_or(FormatError::PixelOutOfRange { x, y })?;
        Ok(self.scalar.decode(bytes))
    }

    /// Elements of the first `frames` frames, for value-range detection.
    pub fn sample(&self, frames: usize) -> impl Iterator<Item = f32> + '_ {
        let size = self.scalar.size();
        let n = frames.min(self.length()) * self.layout.frame_elements();
        self.data()
            .chunks_exact(size)
            .take(n)
            .map(move |bytes| self.scalar.decode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::unique_temp_dir;

    #[test]
    fn maps_file_contents() {
        let dir = unique_temp_dir("mapped");
        let path = dir.join("data.bin");
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();

        let mapped = MappedFile::open(&path).expect("mapping should succeed");
        assert_eq!(mapped.len(), 4);
        assert_eq!(mapped.tail(2), &[3, 4]);
        assert!(mapped.tail(9).is_empty());
        assert_eq!(mapped.path(), path);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_file_reports_path() {
        let err = MappedFile::open("/nonexistent/framelink/data.bin").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/framelink/data.bin"));
    }

    #[test]
    fn frames_switch_to_flow_and_back() {
        let dir = unique_temp_dir("mapped-flow");
        let path = dir.join("data.bin");
        // two 2x1 planes: u = [1, 3], v = [2, 4] interleaved
        let bytes: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        std::fs::write(&path, bytes).unwrap();

        let map = MappedFile::open(&path).unwrap();
        let mut frames = MappedFrames::new(map, 0, PixelScalar::F32, 2, FrameLayout::gray(2, 1));
        assert_eq!(frames.length(), 2);

        assert!(frames.set_flow(true));
        assert_eq!(frames.length(), 1);
        let mut dst = [0.0; 2];
        frames.read(0, 1, &mut dst).unwrap();
        assert_eq!(dst, [2.0, 4.0]);
        assert_eq!(frames.pixel(0, 1, 0).unwrap(), 3.0);

        assert!(frames.set_flow(false));
        frames.read(1, 0, &mut dst).unwrap();
        assert_eq!(dst, [3.0, 4.0]);
        assert_eq!(frames.sample(1).collect::<Vec<_>>(), vec![1.0, 2.0]);

        std::fs::remove_dir_all(dir).ok();
    }
}

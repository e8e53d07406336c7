//! Fixed-stride extraction of one channel out of interleaved storage.

use crate::pixel::PixelScalar;

/// Iterator over every `stride`-th element of a slice, starting at `offset`.
#[derive(Debug, Clone)]
pub struct StridedIter<'a, T> {
    data: &'a [T],
    pos: usize,
    stride: usize,
}

impl<'a, T> StridedIter<'a, T> {
    /// `stride` of 0 is treated as 1.
    pub fn new(data: &'a [T], offset: usize, stride: usize) -> Self {
        Self {
            data,
            pos: offset,
            stride: stride.max(1),
        }
    }
}

impl<'a, T> Iterator for StridedIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let item = self.data.get(self.pos)?;
        self.pos = self.pos.saturating_add(self.stride);
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.data.len().saturating_sub(self.pos).div_ceil(self.stride);
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for StridedIter<'_, T> {}

/// Fill `dst` from `src[offset]`, `src[offset + stride]`, ...
///
/// Returns the number of elements written; fewer than `dst.len()` only when
/// `src` runs out.
pub fn copy_strided<T: Copy>(
    src: &[T],
    offset: usize,
    stride: usize,
    dst: &mut [f32],
    convert: impl Fn(T) -> f32,
) -> usize {
    if stride <= 1 {
        let src = src.get(offset..).unwrap_or_default();
        let n = src.len().min(dst.len());
        for (d, &s) in dst[..n].iter_mut().zip(src) {
            *d = convert(s);
        }
        return n;
    }

    let mut written = 0;
    for (d, &s) in dst.iter_mut().zip(StridedIter::new(src, offset, stride)) {
        *d = convert(s);
        written += 1;
    }
    written
}

/// Like [`copy_strided`], over little-endian encoded elements.
///
/// `offset` and `stride` count elements, not bytes.
pub fn copy_strided_bytes(
    src: &[u8],
    scalar: PixelScalar,
    offset: usize,
    stride: usize,
    dst: &mut [f32],
) -> usize {
    let size = scalar.size();
    let stride = stride.max(1);
    let mut written = 0;
    for (i, d) in dst.iter_mut().enumerate() {
        let Some(bytes) = i
            .checked_mul(stride)
            .and_then(|n| n.checked_add(offset))
            .and_then(|n| n.checked_mul(size))
            .and_then(|start| src.get(start..start.checked_add(size)?))
        else {
            break;
        };
        *d = scalar.decode(bytes);
        written += 1;
    }
    written
}

/// Placement of frames and channels in a flat element buffer.
///
/// Channel `c` of pixel `(x, y)` in frame `t` sits at
/// `t * frame_elements() + (y * nx + x) * stride + c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub nx: usize,
    pub ny: usize,
    pub nc: usize,
    /// Elements per pixel; at least `nc`.
    pub stride: usize,
}

impl FrameLayout {
    pub fn gray(nx: usize, ny: usize) -> Self {
        Self::interleaved(nx, ny, 1)
    }

    pub fn interleaved(nx: usize, ny: usize, nc: usize) -> Self {
        Self {
            nx,
            ny,
            nc,
            stride: nc,
        }
    }

    pub fn pixels(&self) -> usize {
        self.nx * self.ny
    }

    pub fn frame_elements(&self) -> usize {
        self.pixels() * self.stride
    }

    /// Bytes per frame of `scalar` elements; `None` when the product
    /// does not fit in `usize`.
    pub fn checked_frame_bytes(&self, scalar: PixelScalar) -> Option<usize> {
        self.nx
            .checked_mul(self.ny)?
            .checked_mul(self.stride)?
            .checked_mul(scalar.size())
    }

    /// `(offset, stride)` of channel `c` of frame `t`.
    pub fn channel(&self, t: usize, c: usize) -> (usize, usize) {
        (t * self.frame_elements() + c, self.stride)
    }

    /// Element index of channel 0 at `(x, y)` in frame `t`.
    pub fn pixel(&self, t: usize, x: usize, y: usize) -> usize {
        t * self.frame_elements() + (y * self.nx + x) * self.stride
    }
}

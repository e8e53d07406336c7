//! Arrays assembled in memory, typically received over IPC.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FormatError, Result};
use crate::pixel::{detect_bit_range, BitRange, ColorMap, OpacityFunction, PixelScalar};
use crate::source::{check_frame, check_pixel, Capabilities, FrameSource, Plane};
use crate::strided::{copy_strided, FrameLayout};

/// Descriptive metadata of an in-memory array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayMeta {
    pub name: String,
    pub nx: usize,
    pub ny: usize,
    /// Planes in the buffer; for flow fields twice the number of frames.
    pub nt: usize,
    /// Seconds.
    pub duration: f32,
    /// Hz.
    pub fps: f32,
    pub date: String,
    pub comment: String,
    pub bit_range: Option<BitRange>,
    pub color_map: Option<ColorMap>,
    pub vmin: Option<f32>,
    pub vmax: Option<f32>,
    pub opacity: Option<OpacityFunction>,
    /// Array this one is drawn on top of.
    pub parent_name: Option<String>,
    pub metadata: Vec<(String, String)>,
    /// Display color of a flow field.
    pub color: Option<[f32; 4]>,
    /// `u`/`v` components interleaved per pixel.
    pub is_flow: bool,
}

impl ArrayMeta {
    pub fn new(name: impl Into<String>, nx: usize, ny: usize, nt: usize) -> Self {
        Self {
            name: name.into(),
            nx,
            ny,
            nt,
            ..Self::default()
        }
    }

    /// `nx * ny * nt`, `None` on overflow.
    pub fn element_count(&self) -> Option<usize> {
        self.nx.checked_mul(self.ny)?.checked_mul(self.nt)
    }
}

/// Element storage of an in-memory array.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayStorage {
    F32(Vec<f32>),
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl ArrayStorage {
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::F32(_) => "float32",
            Self::U8(_) => "uint8",
            Self::U16(_) => "uint16",
        }
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        match self {
            Self::F32(v) => v.get(index).copied(),
            Self::U8(v) => v.get(index).copied().map(f32::from),
            Self::U16(v) => v.get(index).copied().map(f32::from),
        }
    }

    /// Strided copy into `dst`, converting to `f32`.
    pub fn copy_to(&self, offset: usize, stride: usize, dst: &mut [f32]) -> usize {
        match self {
            Self::F32(v) => copy_strided(v, offset, stride, dst, |x| x),
            Self::U8(v) => copy_strided(v, offset, stride, dst, f32::from),
            Self::U16(v) => copy_strided(v, offset, stride, dst, f32::from),
        }
    }

    /// Elements `[0, n)` as `f32`.
    pub fn head(&self, n: usize) -> Vec<f32> {
        let mut out = vec![0.0; n.min(self.len())];
        self.copy_to(0, 1, &mut out);
        out
    }
}

impl From<Vec<f32>> for ArrayStorage {
    fn from(v: Vec<f32>) -> Self {
        Self::F32(v)
    }
}

impl From<Vec<u8>> for ArrayStorage {
    fn from(v: Vec<u8>) -> Self {
        Self::U8(v)
    }
}

impl From<Vec<u16>> for ArrayStorage {
    fn from(v: Vec<u16>) -> Self {
        Self::U16(v)
    }
}

/// A complete array with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RawArray {
    pub meta: ArrayMeta,
    pub data: ArrayStorage,
}

impl RawArray {
    pub fn new(meta: ArrayMeta, data: impl Into<ArrayStorage>) -> Self {
        Self {
            meta,
            data: data.into(),
        }
    }
}

/// [`FrameSource`] over a [`RawArray`].
#[derive(Debug)]
pub struct InMemoryArray {
    path: PathBuf,
    error_msg: String,
    array: RawArray,
    layout: FrameLayout,
    plane: Plane,
}

fn flow_layout(meta: &ArrayMeta) -> FrameLayout {
    if meta.is_flow {
        FrameLayout::interleaved(meta.nx, meta.ny, 2)
    } else {
        FrameLayout::gray(meta.nx, meta.ny)
    }
}

fn validate(meta: &ArrayMeta, data: &ArrayStorage) -> Result<()> {
    if data.is_empty() {
        return Err(FormatError::Validation("Empty array loaded".into()));
    }
    if meta.element_count() != Some(data.len()) {
        return Err(FormatError::Validation(format!(
            "Array of {} elements does not match its dimensions {}x{}x{}",
            data.len(),
            meta.nx,
            meta.ny,
            meta.nt
        )));
    }
    if meta.is_flow && meta.nt % 2 != 0 {
        return Err(FormatError::Validation(
            "Flow field needs an even number of planes".into(),
        ));
    }
    Ok(())
}

impl InMemoryArray {
    pub fn new(mut array: RawArray) -> Self {
        let error_msg = match validate(&array.meta, &array.data) {
            Ok(()) => String::new(),
            Err(e) => e.to_string(),
        };
        let good = error_msg.is_empty();

        if good && array.meta.bit_range.is_none() && !array.meta.is_flow {
            let frame = array.meta.nx * array.meta.ny;
            array.meta.bit_range = detect_bit_range(array.data.head(frame));
        }

        let layout = flow_layout(&array.meta);
        let plane = if good {
            Plane::zeros(array.meta.nx, array.meta.ny)
        } else {
            Plane::zeros(0, 0)
        };
        Self {
            path: PathBuf::from(&array.meta.name),
            error_msg,
            array,
            layout,
            plane,
        }
    }

    pub fn meta(&self) -> &ArrayMeta {
        &self.array.meta
    }

    pub fn array(&self) -> &RawArray {
        &self.array
    }

    pub fn into_array(self) -> RawArray {
        self.array
    }

    /// Display color when the array is a flow field.
    pub fn color(&self) -> Option<[f32; 4]> {
        self.array.meta.color
    }

    fn ensure_good(&self) -> Result<()> {
        if self.good() {
            Ok(())
        } else {
            Err(FormatError::NotLoaded(self.error_msg.clone()))
        }
    }
}

impl FrameSource for InMemoryArray {
    fn path(&self) -> &Path {
        &self.path
    }

    fn good(&self) -> bool {
        self.error_msg.is_empty()
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
        self.layout.nc
    }

    fn length(&self) -> usize {
        if !self.good() {
            return 0;
        }
        self.array.meta.nt / self.layout.stride
    }

    fn date(&self) -> String {
        self.array.meta.date.clone()
    }

    fn comment(&self) -> String {
        self.array.meta.comment.clone()
    }

    fn duration(&self) -> Duration {
        Duration::try_from_secs_f32(self.array.meta.duration).unwrap_or_default()
    }

    fn fps(&self) -> f32 {
        self.array.meta.fps
    }

    fn metadata(&self) -> Vec<(String, String)> {
        self.array.meta.metadata.clone()
    }

    fn bit_range(&self) -> Option<BitRange> {
        self.array.meta.bit_range
    }

    fn scalar(&self) -> Option<PixelScalar> {
        Some(match self.array.data {
            ArrayStorage::F32(_) => PixelScalar::F32,
            ArrayStorage::U8(_) => PixelScalar::U8,
            ArrayStorage::U16(_) => PixelScalar::U16,
        })
    }

    fn color_map(&self) -> Option<ColorMap> {
        self.array.meta.color_map
    }

    fn vmin(&self) -> Option<f32> {
        self.array.meta.vmin
    }

    fn vmax(&self) -> Option<f32> {
        self.array.meta.vmax
    }

    fn opacity(&self) -> Option<OpacityFunction> {
        self.array.meta.opacity
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::AS_FLOW
    }

    fn is_flow(&self) -> bool {
        self.array.meta.is_flow
    }

    fn set_flow(&mut self, flow: bool) -> bool {
        if flow && self.array.meta.nt % 2 != 0 {
            return false;
        }
        self.array.meta.is_flow = flow;
        self.layout = flow_layout(&self.array.meta);
        true
    }

    fn read_frame(&mut self, t: usize, c: usize) -> Result<&Plane> {
        self.ensure_good()?;
        check_frame(t, c, self.length(), self.nc())?;
        let (offset, stride) = self.layout.channel(t, c);
        self.array.data.copy_to(offset, stride, &mut self.plane.data);
        Ok(&self.plane)
    }

    fn get_pixel(&mut self, t: usize, x: usize, y: usize) -> Result<f32> {
        self.ensure_good()?;
        check_pixel(t, x, y, self.length(), self.nx(), self.ny())?;
        self.array
            .data
            .get(self.layout.pixel(t, x, y))
            .ok_or(FormatError::PixelOutOfRange { x, y })
    }
}

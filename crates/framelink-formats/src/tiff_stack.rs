//! Multi-page TIFF files.
//!
//! Every page (image file directory) is one frame. Pages are decoded on
//! first access into a per-page byte cache guarded by one mutex, which makes
//! [`TiffStack`] usable from several threads through the `*_shared`
//! accessors. The file is closed as soon as every page has been decoded.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::{debug, warn};

use crate::error::{FormatError, Result};
use crate::pixel::{BitRange, ColorMap, PixelScalar};
use crate::source::{check_frame, check_pixel, FrameSource, Plane};
use crate::strided::copy_strided_bytes;

type TiffDecoder = Decoder<BufReader<File>>;

const PHOTOMETRIC_MINISWHITE: u16 = 0;
const PHOTOMETRIC_MINISBLACK: u16 = 1;
const PHOTOMETRIC_RGB: u16 = 2;

/// Compression schemes the decoder handles: none, LZW, Deflate, PackBits.
const SUPPORTED_COMPRESSION: [u16; 5] = [1, 5, 8, 32946, 32773];

/// Largest decoded page accepted, in cache bytes.
pub const MAX_FRAME_BYTES: usize = 1 << 30;

#[derive(Debug, Clone)]
struct Info {
    nx: usize,
    ny: usize,
    /// Samples per pixel on disk: 1, 3 or 4.
    samples: usize,
    nt: usize,
    bits: u16,
    planar: bool,
    photometric: u16,
    /// Element type of the cache.
    scalar: PixelScalar,
    /// Cached bytes of one page.
    frame_bytes: usize,
    date: String,
    comment: String,
}

impl Info {
    /// Channels exposed; alpha is dropped.
    fn nc(&self) -> usize {
        self.samples.min(3)
    }

    /// `(offset, stride)` of channel `c` inside one cached frame.
    fn channel(&self, c: usize) -> (usize, usize) {
        if self.planar {
            (c * self.nx * self.ny, 1)
        } else {
            (c, self.samples)
        }
    }
}

struct Cache {
    decoder: Option<TiffDecoder>,
    /// Decoded pages, `None` until first access.
    frames: Vec<Option<Vec<u8>>>,
}

impl Cache {
    fn frame<'a>(&'a mut self, info: &Info, t: usize) -> Result<&'a [u8]> {
        if self.frames[t].is_none() {
            self.decode(info, t)?;
        }
        Ok(self.frames[t].as_deref().unwrap_or_default())
    }

    fn decode(&mut self, info: &Info, t: usize) -> Result<()> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| FormatError::Validation("TIFF file is already closed".into()))?;
        decoder.seek_to_image(t)?;
        let (nx, ny) = decoder.dimensions()?;
        if (nx as usize, ny as usize) != (info.nx, info.ny) {
            return Err(FormatError::Validation(
                "TIFF file images have different dimensions".into(),
            ));
        }

        let bytes = if info.planar {
            read_planes(decoder, info)?
        } else {
            decoded_bytes(decoder.read_image()?, info)?
        };
        if bytes.len() != info.frame_bytes {
            return Err(FormatError::Validation("Buffer size mismatch".into()));
        }
        self.frames[t] = Some(bytes);

        if self.frames.iter().all(Option::is_some) {
            self.decoder = None;
            debug!(frames = info.nt, "all TIFF frames cached, file closed");
        }
        Ok(())
    }
}

/// Separate planes are stored as their own strips, plane after plane.
fn read_planes(decoder: &mut TiffDecoder, info: &Info) -> Result<Vec<u8>> {
    let mismatch = || FormatError::Validation("Buffer size mismatch".into());
    let ny = u32::try_from(info.ny).map_err(|_| mismatch())?;
    let rows_per_strip = decoder
        .find_tag_unsigned::<u32>(Tag::RowsPerStrip)?
        .unwrap_or(ny)
        .clamp(1, ny);
    let per_plane = ny.div_ceil(rows_per_strip);
    let strips = u32::try_from(info.samples)
        .ok()
        .and_then(|samples| per_plane.checked_mul(samples))
        .ok_or_else(mismatch)?;

    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(info.frame_bytes)
        .map_err(|_| mismatch())?;
    for strip in 0..strips {
        bytes.extend(decoded_bytes(decoder.read_chunk(strip)?, info)?);
    }
    Ok(bytes)
}

/// Cache encoding of one decoded page, little-endian.
fn decoded_bytes(result: DecodingResult, info: &Info) -> Result<Vec<u8>> {
    let bytes = match result {
        DecodingResult::U8(data) if info.bits == 1 => unpack_bits(&data, info),
        DecodingResult::U8(data) => data,
        DecodingResult::I8(data) => data.into_iter().map(|v| v as u8).collect(),
        DecodingResult::U16(data) => data.into_iter().flat_map(u16::to_le_bytes).collect(),
        DecodingResult::I16(data) => data.into_iter().flat_map(i16::to_le_bytes).collect(),
        DecodingResult::U32(data) => data
            .into_iter()
            .flat_map(|v| (v as f32).to_le_bytes())
            .collect(),
        DecodingResult::I32(data) => data
            .into_iter()
            .flat_map(|v| (v as f32).to_le_bytes())
            .collect(),
        DecodingResult::F32(data) => data.into_iter().flat_map(f32::to_le_bytes).collect(),
        _ => {
            return Err(FormatError::Unsupported(
                "Unsupported bits per sample".into(),
            ))
        }
    };
    Ok(bytes)
}

/// Expand 1-bit rows (MSB first, padded to whole bytes) to one byte per sample.
fn unpack_bits(packed: &[u8], info: &Info) -> Vec<u8> {
    let row_samples = info.nx * if info.planar { 1 } else { info.samples };
    let row_bytes = row_samples.div_ceil(8);
    packed
        .chunks(row_bytes)
        .flat_map(|row| (0..row_samples).map(move |i| (row[i / 8] >> (7 - i % 8)) & 1))
        .collect()
}

/// A multi-page TIFF file.
pub struct TiffStack {
    path: PathBuf,
    error_msg: String,
    info: Option<Info>,
    cache: Mutex<Cache>,
    plane: Plane,
}

impl std::fmt::Debug for TiffStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiffStack")
            .field("path", &self.path)
            .field("error_msg", &self.error_msg)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

fn unsupported(msg: impl Into<String>) -> FormatError {
    FormatError::Unsupported(msg.into())
}

fn first_or(values: Option<Vec<u16>>, default: u16) -> u16 {
    values.and_then(|v| v.first().copied()).unwrap_or(default)
}

/// Validate the first page and count pages.
fn inspect(decoder: &mut TiffDecoder) -> Result<Info> {
    let (nx, ny) = decoder
        .dimensions()
        .map_err(|_| FormatError::Validation("Could not read image dimensions".into()))?;
    let (nx, ny) = (nx as usize, ny as usize);
    let samples = decoder
        .find_tag_unsigned::<u16>(Tag::SamplesPerPixel)?
        .unwrap_or(1) as usize;
    if nx == 0 || ny == 0 || samples == 0 {
        return Err(FormatError::Validation("Invalid dimensions".into()));
    }
    if !matches!(samples, 1 | 3 | 4) {
        return Err(unsupported("Unsupported number of channels"));
    }

    let bits = first_or(decoder.find_tag_unsigned_vec::<u16>(Tag::BitsPerSample)?, 1);
    if !matches!(bits, 1 | 8 | 16 | 32) {
        return Err(unsupported("Unsupported bits per sample"));
    }
    let sample_format = first_or(decoder.find_tag_unsigned_vec::<u16>(Tag::SampleFormat)?, 1);
    let scalar = match (sample_format, bits) {
        (1 | 2, 1) => PixelScalar::U8,
        (1, 8) => PixelScalar::U8,
        (2, 8) => PixelScalar::I8,
        (1, 16) => PixelScalar::U16,
        (2, 16) => PixelScalar::I16,
        (1..=3, 32) => PixelScalar::F32,
        (1..=3, _) => return Err(unsupported("Unsupported bits per sample")),
        (other, _) => return Err(unsupported(format!("Unsupported sample format: {other}"))),
    };
    let frame_bytes = nx
        .checked_mul(ny)
        .and_then(|n| n.checked_mul(samples))
        .and_then(|n| n.checked_mul(scalar.size()))
        .filter(|&n| n <= MAX_FRAME_BYTES)
        .ok_or_else(|| {
            FormatError::Validation(format!(
                "TIFF frame {nx}x{ny}x{samples} exceeds the {MAX_FRAME_BYTES} byte limit"
            ))
        })?;

    let photometric = decoder
        .find_tag_unsigned::<u16>(Tag::PhotometricInterpretation)?
        .unwrap_or(PHOTOMETRIC_MINISWHITE);
    if !matches!(
        photometric,
        PHOTOMETRIC_MINISWHITE | PHOTOMETRIC_MINISBLACK | PHOTOMETRIC_RGB
    ) {
        return Err(unsupported(format!(
            "Unsupported photometric interpretation: {photometric}"
        )));
    }
    let compression = decoder
        .find_tag_unsigned::<u16>(Tag::Compression)?
        .unwrap_or(1);
    if !SUPPORTED_COMPRESSION.contains(&compression) {
        return Err(unsupported("Unsupported compression type"));
    }
    let planar = match decoder
        .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)?
        .unwrap_or(1)
    {
        1 => false,
        2 => true,
        _ => return Err(unsupported("Unsupported planar configuration")),
    };

    if decoder.find_tag(Tag::TileWidth)?.is_some() {
        return Err(unsupported("Tiled TIFF files are not supported"));
    }
    if decoder.find_tag_unsigned::<u16>(Tag::FillOrder)?.unwrap_or(1) != 1 {
        return Err(unsupported("!MSB2LSB TIFF files are not supported"));
    }

    let comment = decoder
        .find_tag(Tag::ImageDescription)?
        .map(|v| v.into_string())
        .transpose()?
        .unwrap_or_default();
    let date = decoder
        .find_tag(Tag::DateTime)?
        .map(|v| v.into_string())
        .transpose()?
        .unwrap_or_default();

    let mut nt = 1;
    while decoder.more_images() {
        decoder.next_image()?;
        let (w, h) = decoder.dimensions()?;
        if (w as usize, h as usize) != (nx, ny) {
            return Err(FormatError::Validation(
                "TIFF file images have different dimensions".into(),
            ));
        }
        nt += 1;
    }
    decoder.seek_to_image(0)?;

    Ok(Info {
        nx,
        ny,
        samples,
        nt,
        bits,
        planar,
        photometric,
        scalar,
        frame_bytes,
        date,
        comment,
    })
}

fn open_decoder(path: &Path) -> Result<TiffDecoder> {
    let failed = |reason: String| {
        debug!(path = %path.display(), %reason, "cannot open TIFF");
        FormatError::Validation("Failed to open TIFF file.".into())
    };
    let file = File::open(path).map_err(|e| failed(e.to_string()))?;
    let mut limits = Limits::unlimited();
    limits.decoding_buffer_size = MAX_FRAME_BYTES;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| failed(e.to_string()))?;
    Ok(decoder.with_limits(limits))
}

impl TiffStack {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let empty_cache = || Cache {
            decoder: None,
            frames: Vec::new(),
        };

        let opened = open_decoder(&path).and_then(|mut decoder| {
            let info = inspect(&mut decoder)?;
            let mut cache = Cache {
                decoder: Some(decoder),
                frames: vec![None; info.nt],
            };
            cache.decode(&info, 0)?;
            let plane = Plane::try_zeros(info.nx, info.ny)?;
            Ok((info, cache, plane))
        });

        match opened {
            Ok((info, cache, plane)) => {
                debug!(
                    path = %path.display(),
                    nx = info.nx,
                    ny = info.ny,
                    nt = info.nt,
                    samples = info.samples,
                    bits = info.bits,
                    "opened TIFF"
                );
                Self {
                    path,
                    error_msg: String::new(),
                    info: Some(info),
                    cache: Mutex::new(cache),
                    plane,
                }
            }
            Err(e) => Self {
                path,
                error_msg: e.to_string(),
                info: None,
                cache: Mutex::new(empty_cache()),
                plane: Plane::zeros(0, 0),
            },
        }
    }

    fn info(&self) -> Result<&Info> {
        self.info
            .as_ref()
            .ok_or_else(|| FormatError::NotLoaded(self.error_msg.clone()))
    }

    fn lock(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn fill(&self, t: usize, c: usize, dst: &mut [f32]) -> Result<()> {
        let info = self.info()?;
        check_frame(t, c, info.nt, info.nc())?;
        let mut cache = self.lock();
        let frame = cache.frame(info, t).inspect_err(|e| {
            warn!(path = %self.path.display(), t, error = %e, "failed to decode TIFF frame");
        })?;
        let (offset, stride) = info.channel(c);
        copy_strided_bytes(frame, info.scalar, offset, stride, dst);
        Ok(())
    }

    /// Channel `c` of frame `t` as a new plane; callable from any thread.
    pub fn frame_shared(&self, t: usize, c: usize) -> Result<Plane> {
        let info = self.info()?;
        let mut plane = Plane::zeros(info.nx, info.ny);
        self.fill(t, c, &mut plane.data)?;
        Ok(plane)
    }

    /// Channel 0 at `(x, y)` of frame `t`; callable from any thread.
    pub fn pixel_shared(&self, t: usize, x: usize, y: usize) -> Result<f32> {
        let info = self.info()?;
        check_pixel(t, x, y, info.nt, info.nx, info.ny)?;
        let mut cache = self.lock();
        let frame = cache.frame(info, t)?;
        let index = if info.planar {
            y * info.nx + x
        } else {
            (y * info.nx + x) * info.samples
        };
        let size = info.scalar.size();
        Ok(info.scalar.decode(&frame[index * size..]))
    }

    /// Whether every frame has been decoded and the file released.
    pub fn fully_cached(&self) -> bool {
        let cache = self.lock();
        !cache.frames.is_empty() && cache.decoder.is_none()
    }
}

impl FrameSource for TiffStack {
    fn path(&self) -> &Path {
        &self.path
    }

    fn good(&self) -> bool {
        self.info.is_some()
    }

    fn error_msg(&self) -> &str {
        &self.error_msg
    }

    fn nx(&self) -> usize {
        self.info.as_ref().map_or(0, |i| i.nx)
    }

    fn ny(&self) -> usize {
        self.info.as_ref().map_or(0, |i| i.ny)
    }

    fn nc(&self) -> usize {
        self.info.as_ref().map_or(1, Info::nc)
    }

    fn length(&self) -> usize {
        self.info.as_ref().map_or(0, |i| i.nt)
    }

    fn date(&self) -> String {
        self.info.as_ref().map(|i| i.date.clone()).unwrap_or_default()
    }

    fn comment(&self) -> String {
        self.info
            .as_ref()
            .map(|i| i.comment.clone())
            .unwrap_or_default()
    }

    fn bit_range(&self) -> Option<BitRange> {
        match self.info.as_ref()?.bits {
            8 => Some(BitRange::U8),
            16 => Some(BitRange::U16),
            32 => Some(BitRange::Float),
            _ => None,
        }
    }

    /// 1-bit pages are cached as `U8` and 32-bit integers as `F32`.
    fn scalar(&self) -> Option<PixelScalar> {
        self.info.as_ref().map(|i| i.scalar)
    }

    fn color_map(&self) -> Option<ColorMap> {
        match self.info.as_ref()?.photometric {
            PHOTOMETRIC_MINISBLACK | PHOTOMETRIC_MINISWHITE => Some(ColorMap::Gray),
            _ => None,
        }
    }

    fn read_frame(&mut self, t: usize, c: usize) -> Result<&Plane> {
        let mut data = std::mem::take(&mut self.plane.data);
        let filled = self.fill(t, c, &mut data);
        self.plane.data = data;
        filled?;
        Ok(&self.plane)
    }

    fn get_pixel(&mut self, t: usize, x: usize, y: usize) -> Result<f32> {
        self.pixel_shared(t, x, y)
    }
}

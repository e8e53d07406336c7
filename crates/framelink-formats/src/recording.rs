//! Camera recordings: a 1024-byte header followed by timestamped frames.
//!
//! ```text
//! offset  size  field
//! 0       1     version, always 'f'
//! 1       4     byte-order mark 0x1A2B3C4D
//! 5       4     frame count
//! 9       4     width
//! 13      4     height
//! 17      4     pixel format (1 = u8, 3 = u16)
//! 21      4     bin count (unused)
//! 25      4     sample frequency
//! 29      ..    date, NUL-terminated
//! ..      ..    comment, NUL-terminated
//! 1024    ..    frames, each followed by a u64 timestamp in ms
//! ```
//!
//! All integers are little-endian.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{FormatError, Result};
use crate::mapped::MappedFile;
use crate::pixel::{BitRange, ColorMap, PixelScalar};
use crate::sidecar::{self, Sidecar};
use crate::source::{check_frame, check_pixel, Capabilities, FrameSource, Plane};
use crate::strided::copy_strided_bytes;

pub const VERSION: u8 = b'f';
pub const BYTE_ORDER_MARK: u32 = 0x1A2B_3C4D;
pub const HEADER_LEN: usize = 1024;
/// Timestamp stored after every frame.
pub const FRAME_TAIL_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Depth {
    U8,
    U16,
}

impl Depth {
    fn scalar(self) -> PixelScalar {
        match self {
            Self::U8 => PixelScalar::U8,
            Self::U16 => PixelScalar::U16,
        }
    }
}

#[derive(Debug)]
struct Loaded {
    map: MappedFile,
    nx: usize,
    ny: usize,
    length: usize,
    depth: Depth,
    frame_bytes: usize,
    date: String,
    comment: String,
    duration: Duration,
    fps: f32,
    metadata: Vec<(String, String)>,
    sidecar: Option<Sidecar>,
}

impl Loaded {
    fn frame(&self, t: usize) -> &[u8] {
        let start = HEADER_LEN + t * (self.frame_bytes + FRAME_TAIL_LEN);
        self.map
            .bytes()
            .get(start..start + self.frame_bytes)
            .unwrap_or_default()
    }
}

/// A camera recording (`.dat` with a binary header).
#[derive(Debug)]
pub struct RecordingFile {
    path: PathBuf,
    error_msg: String,
    inner: Option<Loaded>,
    plane: Plane,
}

impl RecordingFile {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut error_msg = String::new();
        let result = load(&path, &mut error_msg)
            .and_then(|loaded| Ok((Plane::try_zeros(loaded.nx, loaded.ny)?, loaded)));
        let (inner, plane) = match result {
            Ok((plane, loaded)) => (Some(loaded), plane),
            Err(e) => {
                if error_msg.is_empty() {
                    error_msg = e.to_string();
                }
                (None, Plane::zeros(0, 0))
            }
        };
        Self {
            path,
            error_msg,
            inner,
            plane,
        }
    }

    fn loaded(&self) -> Result<&Loaded> {
        self.inner
            .as_ref()
            .ok_or_else(|| FormatError::NotLoaded(self.error_msg.clone()))
    }

    /// Path of the XML sidecar, if one was loaded.
    pub fn sidecar_path(&self) -> Option<&Path> {
        self.inner.as_ref()?.sidecar.as_ref().map(Sidecar::path)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn u8(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn u32(&mut self) -> Option<u32> {
        let b = self.bytes.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstr(&mut self) -> String {
        let rest = self.bytes.get(self.pos..).unwrap_or_default();
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        self.pos += (end + 1).min(rest.len());
        String::from_utf8_lossy(&rest[..end]).into_owned()
    }
}

fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let b = bytes.get(at..at + 8)?;
    Some(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

/// Complete frames after the header; 0 when `frame_bytes` is unknown.
fn frames_in(file_size: usize, frame_bytes: Option<usize>) -> usize {
    frame_bytes
        .and_then(|n| n.checked_add(FRAME_TAIL_LEN))
        .map_or(0, |step| (file_size - HEADER_LEN) / step)
}

fn frame_bytes_for(nx: usize, ny: usize, depth: Depth) -> Option<usize> {
    nx.checked_mul(ny)?.checked_mul(depth.scalar().size())
}

fn fps_for(frames: usize, duration: Duration) -> f32 {
    let secs = duration.as_secs_f32();
    if secs > 0.0 {
        frames as f32 / secs
    } else {
        0.0
    }
}

/// Parse and validate; `warning` receives the size-repair message.
fn load(path: &Path, warning: &mut String) -> Result<Loaded> {
    let not_a_file = || FormatError::Validation("ERROR: Path does not seem to be a file!".into());
    if !path.is_file() {
        return Err(not_a_file());
    }
    let map = MappedFile::open(path)?;
    let file_size = map.len();
    if file_size <= HEADER_LEN {
        return Err(not_a_file());
    }

    let mut header = Cursor {
        bytes: &map.bytes()[..HEADER_LEN],
        pos: 0,
    };
    let version = header.u8().ok_or_else(not_a_file)?;
    if version != VERSION {
        return Err(FormatError::Validation(format!(
            "Unsupported file version '{}'.",
            char::from(version)
        )));
    }
    let bom = header.u32().ok_or_else(not_a_file)?;
    if bom != BYTE_ORDER_MARK {
        return Err(FormatError::Validation(format!(
            "Unsupported byte order '{bom}'"
        )));
    }

    let mut fields = [0u32; 6];
    for field in &mut fields {
        *field = header.u32().ok_or_else(not_a_file)?;
    }
    let [declared, nx, ny, format, _bin, _frequency] = fields;
    let (declared, nx, ny) = (declared as usize, nx as usize, ny as usize);
    if nx == 0 || ny == 0 {
        return Err(FormatError::Validation(format!(
            "ERROR: Invalid frame dimensions {nx}x{ny}"
        )));
    }

    let depth = match format {
        // Some legacy writers used 1 for 16-bit data; trust the file size if it agrees.
        1 if frames_in(file_size, frame_bytes_for(nx, ny, Depth::U16)) == declared => {
            Depth::U16
        }
        1 => Depth::U8,
        3 => Depth::U16,
        other => {
            return Err(FormatError::Unsupported(format!(
                "ERROR: Unknown pixel format '{other}', expected '3' (for uint16) or '1' (for uint8)."
            )))
        }
    };
    let frame_bytes = frame_bytes_for(nx, ny, depth);
    let length = frames_in(file_size, frame_bytes);
    let frame_bytes = match frame_bytes {
        Some(n) if length > 0 => n,
        _ => {
            return Err(FormatError::Validation(
                "ERROR: File does not contain a complete frame".into(),
            ))
        }
    };

    let date = header.cstr();
    let mut comment = header.cstr();

    let first = read_u64(map.bytes(), HEADER_LEN + frame_bytes).unwrap_or(0);
    let last = read_u64(map.bytes(), file_size - FRAME_TAIL_LEN).unwrap_or(0);

    if length != declared {
        *warning = format!(
            "WARNING: Header says there should be {declared} frames, but found {length} in file! \
             The file might be corrupted."
        );
        warn!(path = %path.display(), declared, found = length, "recording size mismatch");
    }

    let mut duration = Duration::from_millis(last.saturating_sub(first));
    let mut fps = fps_for(length, duration);
    let mut metadata = Vec::new();

    let sidecar = match sidecar::locate(path) {
        Some((xml_path, model)) if xml_path.is_file() => match Sidecar::load(&xml_path) {
            Ok(doc) => {
                if comment.is_empty() {
                    comment = doc.comment().unwrap_or_default();
                }
                if let Some(ms) = doc.recording_time_ms() {
                    duration = Duration::from_millis(ms);
                    fps = fps_for(length, duration);
                }
                if let Some(rate) = doc
                    .profile_value(&model, "Framerate")
                    .and_then(|v| v.trim().parse::<f32>().ok())
                {
                    fps = rate;
                }
                if let Some(gain) = doc.profile_value(&model, "Gain") {
                    metadata.push(("Gain".to_string(), gain));
                }
                if let Some(exposure) = doc
                    .profile_value(&model, "Exposure")
                    .and_then(|v| v.trim().parse::<f32>().ok())
                {
                    metadata.push(("Exposure".to_string(), format!("{exposure:.2} ms")));
                }
                Some(doc)
            }
            Err(e) => {
                warn!(path = %xml_path.display(), error = %e, "ignoring unreadable sidecar");
                None
            }
        },
        Some((xml_path, _)) => {
            debug!(path = %xml_path.display(), "sidecar not found");
            None
        }
        None => None,
    };

    debug!(
        path = %path.display(),
        nx, ny, length, ?depth, "opened recording"
    );

    Ok(Loaded {
        map,
        nx,
        ny,
        length,
        depth,
        frame_bytes,
        date,
        comment,
        duration,
        fps,
        metadata,
        sidecar,
    })
}

impl FrameSource for RecordingFile {
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
        self.inner.as_ref().map_or(0, |l| l.nx)
    }

    fn ny(&self) -> usize {
        self.inner.as_ref().map_or(0, |l| l.ny)
    }

    fn length(&self) -> usize {
        self.inner.as_ref().map_or(0, |l| l.length)
    }

    fn date(&self) -> String {
        self.inner.as_ref().map(|l| l.date.clone()).unwrap_or_default()
    }

    fn comment(&self) -> String {
        self.inner
            .as_ref()
            .map(|l| l.comment.clone())
            .unwrap_or_default()
    }

    fn duration(&self) -> Duration {
        self.inner.as_ref().map_or(Duration::ZERO, |l| l.duration)
    }

    fn fps(&self) -> f32 {
        self.inner.as_ref().map_or(0.0, |l| l.fps)
    }

    fn metadata(&self) -> Vec<(String, String)> {
        self.inner
            .as_ref()
            .map(|l| l.metadata.clone())
            .unwrap_or_default()
    }

    fn bit_range(&self) -> Option<BitRange> {
        let l = self.inner.as_ref()?;
        Some(match l.depth {
            Depth::U8 => BitRange::U8,
            // 128x128 sensors write the full 16 bits, the others 12
            Depth::U16 if l.nx == 128 && l.ny == 128 => BitRange::U16,
            Depth::U16 => BitRange::U12,
        })
    }

    fn scalar(&self) -> Option<PixelScalar> {
        self.inner.as_ref().map(|l| l.depth.scalar())
    }

    fn color_map(&self) -> Option<ColorMap> {
        Some(ColorMap::Gray)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SET_COMMENT
    }

    fn set_comment(&mut self, comment: &str) -> Result<()> {
        let Some(loaded) = self.inner.as_mut() else {
            return Err(FormatError::NotLoaded(self.error_msg.clone()));
        };
        loaded.comment = comment.to_string();
        if let Some(sidecar) = loaded.sidecar.as_mut() {
            sidecar.set_comment(comment)?;
        }
        Ok(())
    }

    fn read_frame(&mut self, t: usize, c: usize) -> Result<&Plane> {
        let loaded = self
            .inner
            .as_ref()
            .ok_or_else(|| FormatError::NotLoaded(self.error_msg.clone()))?;
        check_frame(t, c, loaded.length, 1)?;
        copy_strided_bytes(
            loaded.frame(t),
            loaded.depth.scalar(),
            0,
            1,
            &mut self.plane.data,
        );
        Ok(&self.plane)
    }

    fn get_pixel(&mut self, t: usize, x: usize, y: usize) -> Result<f32> {
        let loaded = self.loaded()?;
        check_pixel(t, x, y, loaded.length, loaded.nx, loaded.ny)?;
        let scalar = loaded.depth.scalar();
        let at = (y * loaded.nx + x) * scalar.size();
        Ok(scalar.decode(&loaded.frame(t)[at..]))
    }

    fn get_block(&mut self, t: usize, origin: (usize, usize), size: (usize, usize)) -> Result<f32> {
        let loaded = self.loaded()?;
        let (x0, y0) = origin;
        let x1 = x0.saturating_add(size.0).min(loaded.nx);
        let y1 = y0.saturating_add(size.1).min(loaded.ny);
        check_pixel(t, x0, y0, loaded.length, x1, y1)?;

        let scalar = loaded.depth.scalar();
        let frame = loaded.frame(t);
        let mut sum = 0f64;
        for y in y0..y1 {
            let row = &frame[(y * loaded.nx + x0) * scalar.size()..(y * loaded.nx + x1) * scalar.size()];
            sum += row
                .chunks_exact(scalar.size())
                .map(|px| f64::from(scalar.decode(px)))
                .sum::<f64>();
        }
        Ok((sum / ((x1 - x0) * (y1 - y0)) as f64) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sidecar::SAMPLE;
    use crate::test_support::{unique_temp_dir, RecordingFixture};

    fn write(dir: &Path, name: &str, fixture: &RecordingFixture) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, fixture.bytes()).unwrap();
        path
    }

    #[test]
    fn opens_u16_recording() {
        let dir = unique_temp_dir("rec-u16");
        let mut fixture = RecordingFixture::u16_frames(4, 3, 5);
        fixture.comment = "baseline";
        let path = write(&dir, "rec.dat", &fixture);

        let mut rec = RecordingFile::open(&path);
        assert!(rec.good(), "{}", rec.error_msg());
        assert!(rec.error_msg().is_empty());
        assert_eq!((rec.nx(), rec.ny(), rec.length()), (4, 3, 5));
        assert_eq!(rec.bit_range(), Some(BitRange::U12));
        assert_eq!(rec.color_map(), Some(ColorMap::Gray));
        assert_eq!(rec.date(), "2021-04-01 10:00");
        assert_eq!(rec.comment(), "baseline");
        // timestamps 0..40 ms
        assert_eq!(rec.duration(), Duration::from_millis(40));
        assert!((rec.fps() - 125.0).abs() < 1e-3);

        let plane = rec.read_frame(2, 0).unwrap().clone();
        assert_eq!(plane.get(0, 0), 2000.0);
        assert_eq!(plane.get(3, 2), 2011.0);
        assert_eq!(rec.read_frame(2, 0).unwrap(), &plane);
        assert_eq!(rec.get_pixel(4, 1, 1).unwrap(), 4005.0);
        // mean of 1000, 1001, 1004, 1005
        assert_eq!(rec.get_block(1, (0, 0), (2, 2)).unwrap(), 1002.5);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn u8_format_code() {
        let dir = unique_temp_dir("rec-u8");
        let fixture = RecordingFixture {
            format: 1,
            declared_frames: 3,
            nx: 2,
            ny: 2,
            date: "",
            comment: "",
            frames: (0..3u8).map(|t| vec![t, t + 1, t + 2, 200]).collect(),
        };
        let path = write(&dir, "rec.dat", &fixture);

        let mut rec = RecordingFile::open(&path);
        assert!(rec.good(), "{}", rec.error_msg());
        assert_eq!(rec.scalar(), Some(PixelScalar::U8));
        assert_eq!(rec.bit_range(), Some(BitRange::U8));
        assert_eq!(rec.read_frame(1, 0).unwrap().data, vec![1.0, 2.0, 3.0, 200.0]);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn legacy_format_code_reclassified_as_u16() {
        let dir = unique_temp_dir("rec-legacy");
        let mut fixture = RecordingFixture::u16_frames(128, 128, 2);
        fixture.format = 1;
        let path = write(&dir, "rec.dat", &fixture);

        let mut rec = RecordingFile::open(&path);
        assert!(rec.good(), "{}", rec.error_msg());
        assert_eq!(rec.scalar(), Some(PixelScalar::U16));
        assert_eq!(rec.bit_range(), Some(BitRange::U16));
        assert_eq!(rec.length(), 2);
        assert_eq!(rec.get_pixel(1, 5, 0).unwrap(), 1005.0);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn size_mismatch_is_repaired_with_warning() {
        let dir = unique_temp_dir("rec-repair");
        let mut fixture = RecordingFixture::u16_frames(4, 4, 9);
        fixture.declared_frames = 10;
        let path = write(&dir, "rec.dat", &fixture);

        let rec = RecordingFile::open(&path);
        assert!(rec.good());
        assert_eq!(rec.length(), 9);
        assert_eq!(
            rec.error_msg(),
            "WARNING: Header says there should be 10 frames, but found 9 in file! \
             The file might be corrupted."
        );

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn header_validation_errors() {
        let dir = unique_temp_dir("rec-invalid");
        let fixture = RecordingFixture::u16_frames(2, 2, 1);

        let mut bytes = fixture.bytes();
        bytes[0] = b'e';
        std::fs::write(dir.join("version.dat"), &bytes).unwrap();
        let rec = RecordingFile::open(dir.join("version.dat"));
        assert!(!rec.good());
        assert_eq!(rec.error_msg(), "Unsupported file version 'e'.");

        let mut bytes = fixture.bytes();
        bytes[1..5].copy_from_slice(&7u32.to_le_bytes());
        std::fs::write(dir.join("bom.dat"), &bytes).unwrap();
        let rec = RecordingFile::open(dir.join("bom.dat"));
        assert_eq!(rec.error_msg(), "Unsupported byte order '7'");

        let mut bad_format = RecordingFixture::u16_frames(2, 2, 1);
        bad_format.format = 2;
        std::fs::write(dir.join("format.dat"), bad_format.bytes()).unwrap();
        let rec = RecordingFile::open(dir.join("format.dat"));
        assert!(rec.error_msg().starts_with("ERROR: Unknown pixel format '2'"));

        std::fs::write(dir.join("short.dat"), vec![b'f'; 100]).unwrap();
        let rec = RecordingFile::open(dir.join("short.dat"));
        assert_eq!(rec.error_msg(), "ERROR: Path does not seem to be a file!");

        let rec = RecordingFile::open(&dir);
        assert!(!rec.good());
        assert!(matches!(
            RecordingFile::open(&dir).read_frame(0, 0),
            Err(FormatError::NotLoaded(_))
        ));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn oversized_header_dimensions_are_error() {
        let dir = unique_temp_dir("rec-huge");
        for format in [1, 3] {
            let fixture = RecordingFixture {
                format,
                declared_frames: 1,
                nx: u32::MAX,
                ny: u32::MAX,
                date: "",
                comment: "",
                frames: vec![vec![0; 64]],
            };
            let path = write(&dir, "rec.dat", &fixture);

            let rec = RecordingFile::open(&path);
            assert!(!rec.good());
            assert_eq!(rec.error_msg(), "ERROR: File does not contain a complete frame");
            assert_eq!((rec.nx(), rec.ny()), (0, 0));
        }

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn index_errors() {
        let dir = unique_temp_dir("rec-range");
        let path = write(&dir, "rec.dat", &RecordingFixture::u16_frames(2, 2, 2));
        let mut rec = RecordingFile::open(&path);

        assert!(matches!(
            rec.read_frame(2, 0),
            Err(FormatError::TimeOutOfRange { t: 2, length: 2 })
        ));
        assert!(matches!(
            rec.read_frame(0, 1),
            Err(FormatError::ChannelOutOfRange { .. })
        ));
        assert!(matches!(
            rec.get_pixel(0, 2, 0),
            Err(FormatError::PixelOutOfRange { .. })
        ));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn sidecar_metadata_and_comment_edit() {
        let dir = unique_temp_dir("rec-sidecar");
        let path = write(
            &dir,
            "a_b_c_Cam_X2.dat",
            &RecordingFixture::u16_frames(2, 2, 4),
        );
        std::fs::write(dir.join("a_b_c.xml"), SAMPLE).unwrap();

        let mut rec = RecordingFile::open(&path);
        assert!(rec.good(), "{}", rec.error_msg());
        assert_eq!(rec.comment(), "from xml");
        assert_eq!(rec.duration(), Duration::from_millis(2000));
        assert_eq!(rec.fps(), 250.5);
        assert_eq!(
            rec.metadata(),
            vec![
                ("Gain".to_string(), "12".to_string()),
                ("Exposure".to_string(), "1.23 ms".to_string()),
            ]
        );

        rec.set_comment("edited").expect("comment edit should succeed");
        assert_eq!(rec.comment(), "edited");
        assert!(dir.join("a_b_c.xml.original").is_file());
        assert_eq!(RecordingFile::open(&path).comment(), "edited");

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn comment_edit_without_sidecar_is_in_memory() {
        let dir = unique_temp_dir("rec-comment");
        let path = write(&dir, "rec.dat", &RecordingFixture::u16_frames(2, 2, 1));

        let mut rec = RecordingFile::open(&path);
        assert!(rec.capabilities().contains(Capabilities::SET_COMMENT));
        rec.set_comment("note").unwrap();
        assert_eq!(rec.comment(), "note");
        assert!(rec.sidecar_path().is_none());

        std::fs::remove_dir_all(dir).ok();
    }
}

//! Folders of single-page TIFF files, one file per frame.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{FormatError, Result};
use crate::pixel::{BitRange, ColorMap, PixelScalar};
use crate::source::{check_frame, FrameSource, Plane};
use crate::tiff_stack::TiffStack;

const EXTENSIONS: [&str; 4] = ["tif", "tiff", "TIF", "TIFF"];

/// Whether `path` has one of the TIFF extensions.
pub fn is_tiff_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e))
}

/// TIFF files directly inside `dir`, in natural order of their stems.
pub fn list_tiff_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| FormatError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| FormatError::io(dir, e))?.path();
        if path.is_file() && is_tiff_path(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| natord::compare(&stem(a), &stem(b)));
    Ok(files)
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// A folder of TIFF files viewed as one stack.
#[derive(Debug)]
pub struct TiffSeries {
    path: PathBuf,
    error_msg: String,
    files: Vec<TiffStack>,
    plane: Plane,
}

impl TiffSeries {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let path = dir.into();
        match load(&path) {
            Ok(files) => {
                let plane = Plane::zeros(files[0].nx(), files[0].ny());
                debug!(path = %path.display(), frames = files.len(), "opened TIFF folder");
                Self {
                    path,
                    error_msg: String::new(),
                    files,
                    plane,
                }
            }
            Err(e) => Self {
                path,
                error_msg: e.to_string(),
                files: Vec::new(),
                plane: Plane::zeros(0, 0),
            },
        }
    }

    /// Files backing the frames, in frame order.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(FrameSource::path)
    }

    fn first(&self) -> Option<&TiffStack> {
        self.files.first()
    }
}

fn load(dir: &Path) -> Result<Vec<TiffStack>> {
    let paths = list_tiff_files(dir)?;
    if paths.is_empty() {
        return Err(FormatError::Validation("No TIFF files found in folder".into()));
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = TiffStack::open(&path);
        if !file.good() {
            debug!(path = %path.display(), error = file.error_msg(), "TIFF file in folder failed");
            return Err(FormatError::Validation(format!(
                "Failed to load TIFF file: {}",
                path.display()
            )));
        }
        if file.length() != 1 {
            return Err(FormatError::Validation(
                "Image folder contains multiple frames per file".into(),
            ));
        }
        files.push(file);
    }

    let shape = |f: &TiffStack| (f.nx(), f.ny(), f.nc());
    let expected = shape(&files[0]);
    if files.iter().any(|f| shape(f) != expected) {
        return Err(FormatError::Validation(
            "Inconsistent dimensions in TIFF files".into(),
        ));
    }
    Ok(files)
}

impl FrameSource for TiffSeries {
    fn path(&self) -> &Path {
        &self.path
    }

    fn good(&self) -> bool {
        !self.files.is_empty()
    }

    fn error_msg(&self) -> &str {
        &self.error_msg
    }

    fn nx(&self) -> usize {
        self.first().map_or(0, FrameSource::nx)
    }

    fn ny(&self) -> usize {
        self.first().map_or(0, FrameSource::ny)
    }

    fn nc(&self) -> usize {
        self.first().map_or(1, FrameSource::nc)
    }

    fn length(&self) -> usize {
        self.files.len()
    }

    fn date(&self) -> String {
        self.first().map(FrameSource::date).unwrap_or_default()
    }

    fn comment(&self) -> String {
        self.first().map(FrameSource::comment).unwrap_or_default()
    }

    fn metadata(&self) -> Vec<(String, String)> {
        self.first().map(FrameSource::metadata).unwrap_or_default()
    }

    fn bit_range(&self) -> Option<BitRange> {
        self.first()?.bit_range()
    }

    fn scalar(&self) -> Option<PixelScalar> {
        self.first()?.scalar()
    }

    fn color_map(&self) -> Option<ColorMap> {
        self.first()?.color_map()
    }

    fn read_frame(&mut self, t: usize, c: usize) -> Result<&Plane> {
        if !self.good() {
            return Err(FormatError::NotLoaded(self.error_msg.clone()));
        }
        check_frame(t, c, self.length(), self.nc())?;
        self.files[t].fill(0, c, &mut self.plane.data)?;
        Ok(&self.plane)
    }

    fn get_pixel(&mut self, t: usize, x: usize, y: usize) -> Result<f32> {
        if !self.good() {
            return Err(FormatError::NotLoaded(self.error_msg.clone()));
        }
        let length = self.length();
        let file = self
            .files
            .get(t)
            .ok_or(FormatError::TimeOutOfRange { t, length })?;
        file.pixel_shared(0, x, y)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use tiff::encoder::{colortype, TiffEncoder};

    use super::*;
    use crate::test_support::unique_temp_dir;

    fn write_gray8(path: &Path, nx: u32, ny: u32, value: u8) {
        let data = vec![value; (nx * ny) as usize];
        TiffEncoder::new(File::create(path).unwrap())
            .unwrap()
            .write_image::<colortype::Gray8>(nx, ny, &data)
            .unwrap();
    }

    #[test]
    fn natural_order_and_frames() {
        let dir = unique_temp_dir("series");
        for (name, value) in [("img10.tif", 10), ("img2.TIFF", 2), ("img1.tiff", 1)] {
            write_gray8(&dir.join(name), 3, 2, value);
        }
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let mut series = TiffSeries::open(&dir);
        assert!(series.good(), "{}", series.error_msg());
        assert_eq!((series.nx(), series.ny(), series.length()), (3, 2, 3));
        assert_eq!(series.bit_range(), Some(BitRange::U8));

        let names: Vec<_> = series
            .files()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["img1.tiff", "img2.TIFF", "img10.tif"]);

        assert_eq!(series.read_frame(2, 0).unwrap().data, vec![10.0; 6]);
        assert_eq!(series.get_pixel(1, 2, 1).unwrap(), 2.0);
        assert!(matches!(
            series.read_frame(3, 0),
            Err(FormatError::TimeOutOfRange { .. })
        ));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn inconsistent_dimensions() {
        let dir = unique_temp_dir("series-dims");
        write_gray8(&dir.join("a1.tif"), 3, 2, 0);
        write_gray8(&dir.join("a2.tif"), 2, 2, 0);

        let series = TiffSeries::open(&dir);
        assert!(!series.good());
        assert_eq!(series.error_msg(), "Inconsistent dimensions in TIFF files");

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn multi_page_files_are_rejected() {
        let dir = unique_temp_dir("series-pages");
        let mut encoder = TiffEncoder::new(File::create(dir.join("a.tif")).unwrap()).unwrap();
        for _ in 0..2 {
            encoder
                .write_image::<colortype::Gray8>(1, 1, &[0])
                .unwrap();
        }
        drop(encoder);

        let series = TiffSeries::open(&dir);
        assert_eq!(
            series.error_msg(),
            "Image folder contains multiple frames per file"
        );

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn broken_or_missing_files() {
        let dir = unique_temp_dir("series-broken");
        assert_eq!(
            TiffSeries::open(&dir).error_msg(),
            "No TIFF files found in folder"
        );

        let broken = dir.join("broken.tif");
        std::fs::write(&broken, "nope").unwrap();
        assert_eq!(
            TiffSeries::open(&dir).error_msg(),
            format!("Failed to load TIFF file: {}", broken.display())
        );

        std::fs::remove_dir_all(dir).ok();
    }
}

//! Picks the loader for a path.
//!
//! Native formats are opened in-process. Everything else that has a known
//! extension is handed to an external plugin through a [`PluginRunner`];
//! its result arrives later through the regular ingestion path.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::npy::NpyFile;
use crate::raw::RawFile;
use crate::recording::RecordingFile;
use crate::source::FrameSource;
use crate::tiff_series::{list_tiff_files, TiffSeries};
use crate::tiff_stack::TiffStack;

pub const PLUGIN_TIFF: &str = "load_tiff";
pub const PLUGIN_FOLDER: &str = "load_folder";
pub const PLUGIN_FOLDER_DICOM: &str = "load_folder_dcm";

const BUILTIN_PLUGINS: &[(&str, &[&str])] = &[
    ("load_mat", &[".mat"]),
    ("load_image", &[".png", ".jpg", ".jpeg", ".bmp", ".gif"]),
    (
        "load_encoded_video",
        &[".mp4", ".avi", ".mov", ".mkv", ".webm", ".wmv"],
    ),
    ("load_image_itk", &[".nii", ".nii.gz", ".nrrd", ".mha", ".mhd"]),
    ("load_micam", &[".gsd", ".gsh", ".rsh", ".rsm", ".rsd"]),
];

/// Launches an external loader. Fire-and-forget.
pub trait PluginRunner: Send + Sync {
    fn launch(&self, plugin: &str, path: &Path);
}

/// Runner that only records the request in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPluginRunner;

impl PluginRunner for LoggingPluginRunner {
    fn launch(&self, plugin: &str, path: &Path) {
        info!(plugin, path = %path.display(), "plugin load requested");
    }
}

/// Outcome of [`Dispatcher::dispatch`].
#[derive(Default)]
pub struct Dispatched {
    /// The loaded source; always `good()` when present.
    pub source: Option<Box<dyn FrameSource>>,
    /// User-facing errors and warnings, in order.
    pub messages: Vec<String>,
    /// Plugin the path was handed to.
    pub delegated: Option<String>,
}

impl std::fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatched")
            .field("source", &self.source.as_ref().map(|s| s.path().to_path_buf()))
            .field("messages", &self.messages)
            .field("delegated", &self.delegated)
            .finish()
    }
}

pub struct Dispatcher {
    /// `(extension with leading dot, plugin)`, lower case.
    plugins: Vec<(String, String)>,
    runner: Box<dyn PluginRunner>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

fn failure_message(path: &Path, error: &str) -> String {
    if error.is_empty() {
        format!(
            "ERROR: file loading has failed with unknown error.\nFile: {}",
            path.display()
        )
    } else {
        format!(
            "ERROR: file loading failed: \"{error}\"\nFile: {}",
            path.display()
        )
    }
}

impl Dispatcher {
    /// Built-in plugin table with a [`LoggingPluginRunner`].
    pub fn new() -> Self {
        Self::with_runner(LoggingPluginRunner)
    }

    pub fn with_runner(runner: impl PluginRunner + 'static) -> Self {
        let plugins = BUILTIN_PLUGINS
            .iter()
            .flat_map(|(plugin, exts)| exts.iter().map(move |e| (e.to_string(), plugin.to_string())))
            .collect();
        Self {
            plugins,
            runner: Box::new(runner),
        }
    }

    /// Map `extension` (e.g. `.h5`) to `plugin`, replacing earlier entries.
    pub fn register(&mut self, extension: &str, plugin: &str) {
        let mut extension = extension.to_lowercase();
        if !extension.starts_with('.') {
            extension.insert(0, '.');
        }
        self.plugins.retain(|(e, _)| *e != extension);
        self.plugins.push((extension, plugin.to_string()));
    }

    /// Plugin responsible for a file, by its longest matching extension.
    pub fn plugin_for(&self, path: &Path) -> Option<&str> {
        let name = path.file_name()?.to_str()?.to_lowercase();
        self.plugins
            .iter()
            .filter(|(ext, _)| name.ends_with(ext.as_str()))
            .max_by_key(|(ext, _)| ext.len())
            .map(|(_, plugin)| plugin.as_str())
    }

    /// Open `path` with the right loader.
    pub fn dispatch(&self, path: &Path) -> Dispatched {
        let mut out = Dispatched::default();
        if path.is_dir() {
            self.dispatch_dir(path, &mut out);
        } else if path.is_file() {
            self.dispatch_file(path, &mut out);
        } else {
            out.messages
                .push(format!("File not found: {}", path.display()));
        }
        out
    }

    fn dispatch_file(&self, path: &Path, out: &mut Dispatched) {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        let source: Box<dyn FrameSource> = match ext.as_str() {
            "npy" => Box::new(NpyFile::open(path)),
            "dat" => {
                let raw = RawFile::open(path);
                if raw.good() {
                    Box::new(raw)
                } else {
                    debug!(path = %path.display(), reason = raw.error_msg(), "not a raw file, trying recording");
                    Box::new(RecordingFile::open(path))
                }
            }
            "tif" | "tiff" => {
                let stack = TiffStack::open(path);
                if !stack.good() {
                    self.discard(path, &stack, out);
                    self.delegate(PLUGIN_TIFF, path, out);
                    return;
                }
                Box::new(stack)
            }
            _ => {
                match self.plugin_for(path) {
                    Some(plugin) => self.delegate(plugin, path, out),
                    None => out.messages.push(format!(
                        "ERROR: Unable to load file, it has an unknown extension.\nFile: {}",
                        path.display()
                    )),
                }
                return;
            }
        };
        self.accept(path, source, out);
    }

    fn dispatch_dir(&self, path: &Path, out: &mut Dispatched) {
        let tiffs = match list_tiff_files(path) {
            Ok(files) => files,
            Err(e) => {
                out.messages.push(failure_message(path, &e.to_string()));
                return;
            }
        };
        if !tiffs.is_empty() {
            let series = TiffSeries::open(path);
            if series.good() {
                self.accept(path, Box::new(series), out);
            } else {
                self.discard(path, &series, out);
                self.delegate(PLUGIN_TIFF, path, out);
            }
            return;
        }

        let entries: Vec<_> = std::fs::read_dir(path)
            .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default();
        let is_dicom = |p: &Path| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("dcm"))
        };
        if entries.iter().any(|p| is_dicom(p)) {
            self.delegate(PLUGIN_FOLDER_DICOM, path, out);
        } else if entries.iter().any(|p| p.is_file()) {
            self.delegate(PLUGIN_FOLDER, path, out);
        } else {
            out.messages.push(format!(
                "ERROR: Folder does not contain any loadable files.\nFile: {}",
                path.display()
            ));
        }
    }

    fn accept(&self, path: &Path, source: Box<dyn FrameSource>, out: &mut Dispatched) {
        if !source.good() {
            self.discard(path, source.as_ref(), out);
            return;
        }
        if !source.error_msg().is_empty() {
            out.messages.push(source.error_msg().to_string());
        }
        debug!(
            path = %path.display(),
            nx = source.nx(),
            ny = source.ny(),
            length = source.length(),
            "source loaded"
        );
        out.source = Some(source);
    }

    fn discard(&self, path: &Path, source: &dyn FrameSource, out: &mut Dispatched) {
        warn!(path = %path.display(), reason = source.error_msg(), "discarding source");
        out.messages.push(failure_message(path, source.error_msg()));
    }

    fn delegate(&self, plugin: &str, path: &Path, out: &mut Dispatched) {
        self.runner.launch(plugin, path);
        out.delegated = Some(plugin.to_string());
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use tiff::encoder::{colortype, TiffEncoder};

    use super::*;
    use crate::test_support::{f32_bytes, npy_bytes, unique_temp_dir, RecordingFixture};

    #[derive(Default, Clone)]
    struct Recorder(Arc<Mutex<Vec<(String, PathBuf)>>>);

    impl PluginRunner for Recorder {
        fn launch(&self, plugin: &str, path: &Path) {
            self.0
                .lock()
                .unwrap()
                .push((plugin.to_string(), path.to_path_buf()));
        }
    }

    #[test]
    fn plugin_table_lookup() {
        let mut dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.plugin_for(Path::new("a.MAT")), Some("load_mat"));
        assert_eq!(
            dispatcher.plugin_for(Path::new("brain.nii.gz")),
            Some("load_image_itk")
        );
        assert_eq!(dispatcher.plugin_for(Path::new("clip.webm")), Some("load_encoded_video"));
        assert_eq!(dispatcher.plugin_for(Path::new("x.gz")), None);

        dispatcher.register("h5", "load_hdf5");
        assert_eq!(dispatcher.plugin_for(Path::new("x.h5")), Some("load_hdf5"));
        dispatcher.register(".png", "load_png");
        assert_eq!(dispatcher.plugin_for(Path::new("x.png")), Some("load_png"));
    }

    #[test]
    fn dat_prefers_raw_then_recording() {
        let dir = unique_temp_dir("dispatch-dat");
        let raw = dir.join("cam_2x2x1.dat");
        std::fs::write(&raw, f32_bytes([0.0, 0.25, 0.5, 1.0])).unwrap();
        let rec = dir.join("recording.dat");
        std::fs::write(&rec, RecordingFixture::u16_frames(2, 2, 3).bytes()).unwrap();

        let dispatcher = Dispatcher::new();
        let out = dispatcher.dispatch(&raw);
        let source = out.source.expect("raw file should load");
        assert_eq!(source.length(), 1);
        assert!(out.messages.is_empty());

        let out = dispatcher.dispatch(&rec);
        let source = out.source.expect("recording should load");
        assert_eq!(source.length(), 3);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn warnings_and_failures_become_messages() {
        let dir = unique_temp_dir("dispatch-msg");
        let mut fixture = RecordingFixture::u16_frames(2, 2, 2);
        fixture.declared_frames = 5;
        let repaired = dir.join("repaired.dat");
        std::fs::write(&repaired, fixture.bytes()).unwrap();
        let broken = dir.join("broken.npy");
        std::fs::write(&broken, b"not numpy").unwrap();

        let dispatcher = Dispatcher::new();
        let out = dispatcher.dispatch(&repaired);
        assert!(out.source.is_some());
        assert_eq!(out.messages.len(), 1);
        assert!(out.messages[0].starts_with("WARNING: Header says there should be 5 frames"));

        let out = dispatcher.dispatch(&broken);
        assert!(out.source.is_none());
        assert_eq!(out.messages.len(), 1);
        assert!(out.messages[0].starts_with("ERROR: file loading failed:"));

        let out = dispatcher.dispatch(&dir.join("missing.npy"));
        assert!(out.source.is_none());
        assert!(out.messages[0].starts_with("File not found"));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn npy_and_tiff_files() {
        let dir = unique_temp_dir("dispatch-native");
        let npy = dir.join("a.npy");
        std::fs::write(&npy, npy_bytes("|u1", false, &[2, 2], &[1, 2, 3, 4])).unwrap();
        let tif = dir.join("a.TIF");
        TiffEncoder::new(File::create(&tif).unwrap())
            .unwrap()
            .write_image::<colortype::Gray8>(2, 2, &[1, 2, 3, 4])
            .unwrap();

        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.dispatch(&npy).source.unwrap().nx(), 2);
        assert_eq!(dispatcher.dispatch(&tif).source.unwrap().length(), 1);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn unsupported_files_go_to_plugins() {
        let dir = unique_temp_dir("dispatch-plugin");
        let video = dir.join("clip.mp4");
        std::fs::write(&video, b"").unwrap();
        let bad_tiff = dir.join("bad.tiff");
        std::fs::write(&bad_tiff, b"nope").unwrap();
        let unknown = dir.join("notes.xyz");
        std::fs::write(&unknown, b"").unwrap();

        let recorder = Recorder::default();
        let dispatcher = Dispatcher::with_runner(recorder.clone());

        let out = dispatcher.dispatch(&video);
        assert!(out.source.is_none());
        assert_eq!(out.delegated.as_deref(), Some("load_encoded_video"));
        assert!(out.messages.is_empty());

        let out = dispatcher.dispatch(&bad_tiff);
        assert_eq!(out.delegated.as_deref(), Some(PLUGIN_TIFF));
        assert_eq!(out.messages.len(), 1);

        let out = dispatcher.dispatch(&unknown);
        assert!(out.delegated.is_none());
        assert!(out.messages[0].contains("unknown extension"));

        let launched = recorder.0.lock().unwrap().clone();
        assert_eq!(
            launched,
            vec![
                ("load_encoded_video".to_string(), video),
                (PLUGIN_TIFF.to_string(), bad_tiff),
            ]
        );

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn folders() {
        let root = unique_temp_dir("dispatch-dir");
        let tiffs = root.join("tiffs");
        std::fs::create_dir(&tiffs).unwrap();
        for i in 0..2u8 {
            TiffEncoder::new(File::create(tiffs.join(format!("f{i}.tif"))).unwrap())
                .unwrap()
                .write_image::<colortype::Gray8>(1, 1, &[i])
                .unwrap();
        }
        let dicom = root.join("dicom");
        std::fs::create_dir(&dicom).unwrap();
        std::fs::write(dicom.join("slice1.DCM"), b"").unwrap();
        let pngs = root.join("pngs");
        std::fs::create_dir(&pngs).unwrap();
        std::fs::write(pngs.join("a.png"), b"").unwrap();
        let empty = root.join("empty");
        std::fs::create_dir(&empty).unwrap();

        let recorder = Recorder::default();
        let dispatcher = Dispatcher::with_runner(recorder.clone());

        assert_eq!(dispatcher.dispatch(&tiffs).source.unwrap().length(), 2);
        assert_eq!(
            dispatcher.dispatch(&dicom).delegated.as_deref(),
            Some(PLUGIN_FOLDER_DICOM)
        );
        assert_eq!(
            dispatcher.dispatch(&pngs).delegated.as_deref(),
            Some(PLUGIN_FOLDER)
        );
        let out = dispatcher.dispatch(&empty);
        assert!(out.delegated.is_none());
        assert_eq!(out.messages.len(), 1);
        assert_eq!(recorder.0.lock().unwrap().len(), 2);

        std::fs::remove_dir_all(root).ok();
    }
}

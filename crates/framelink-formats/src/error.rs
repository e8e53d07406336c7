use std::path::PathBuf;

/// Errors that can occur while loading or reading a frame source.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The file content violates the format (bad magic, size mismatch, ...).
    #[error("{0}")]
    Validation(String),

    /// The file is well-formed but uses a feature we do not read.
    #[error("{0}")]
    Unsupported(String),

    /// Frame index outside `[0, length)`.
    #[error("Time index out of range ({t} >= {length})")]
    TimeOutOfRange { t: usize, length: usize },

    /// Channel index outside `[0, nc)`.
    #[error("Channel index out of range ({c} >= {nc})")]
    ChannelOutOfRange { c: usize, nc: usize },

    /// Pixel or block outside the frame.
    #[error("Pixel ({x}, {y}) out of range")]
    PixelOutOfRange { x: usize, y: usize },

    /// The source failed to load; carries its error message.
    #[error("source not loaded: {0}")]
    NotLoaded(String),

    /// Failed to open or read a file.
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TIFF decoder error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Sidecar metadata could not be parsed or written.
    #[error("XML error in {path}: {reason}")]
    Xml { path: PathBuf, reason: String },
}

impl FormatError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, FormatError>;

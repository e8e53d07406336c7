use std::path::PathBuf;
use std::time::Duration;

use framelink_frame::MAX_MESSAGE_SIZE;
use framelink_transport::default_socket_path;
use tracing::warn;

/// Environment variable overriding [`IpcConfig::queue_capacity`].
pub const QUEUE_CAPACITY_ENV: &str = "FRAMELINK_QUEUE_CAPACITY";

pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// Upper bound of one wire message when streaming arrays.
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

/// Settings shared by [`crate::IpcServer`] and the client functions.
#[derive(Debug, Clone)]
pub struct IpcConfig {
    /// Socket the server binds and clients connect to.
    pub socket_path: PathBuf,
    /// Capacity of each delivery queue.
    pub queue_capacity: usize,
    /// Largest payload the server accepts.
    pub max_message_size: usize,
    /// Largest wire message the client produces for array data.
    pub chunk_bytes: usize,
    /// Client-side write timeout.
    pub write_timeout: Option<Duration>,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_message_size: MAX_MESSAGE_SIZE,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            write_timeout: None,
        }
    }
}

impl IpcConfig {
    /// Defaults plus environment overrides.
    ///
    /// The socket path honors `FRAMELINK_SOCKET` through
    /// [`default_socket_path`]. An unparsable queue capacity is ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(raw) = std::env::var_os(QUEUE_CAPACITY_ENV) {
            match raw.to_str().and_then(|s| s.trim().parse::<usize>().ok()) {
                Some(n) if n > 0 => config.queue_capacity = n,
                _ => warn!(value = ?raw, "ignoring invalid {QUEUE_CAPACITY_ENV}"),
            }
        }
        config
    }

    /// Same settings on another socket.
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }
}

use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Unix domain socket listener on a filesystem path.
///
/// The socket file is removed on drop, unless the path was replaced by
/// someone else in the meantime.
pub struct UnixDomainSocket {
    listener: UnixListener,
    guard: SocketFileGuard,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// A stale socket file left by a dead instance is removed first. A socket
    /// that still accepts connections is reported as [`TransportError::InUse`].
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        prepare_path(&path)?;

        let listener = UnixListener::bind(&path).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;
        let guard = SocketFileGuard::create(path, mode)?;

        info!(path = ?guard.path, "listening on unix domain socket");

        Ok(Self { listener, guard })
    }

    /// Connect to a listening Unix domain socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to unix domain socket");
        Ok(IpcStream::from_unix(stream))
    }

    /// Convert into a tokio listener.
    ///
    /// Must be called from within a tokio runtime. Socket file cleanup moves
    /// along with the listener.
    #[cfg(feature = "async")]
    pub fn into_async(self) -> Result<AsyncUnixSocket> {
        let Self { listener, guard } = self;
        listener.set_nonblocking(true)?;
        let listener = tokio::net::UnixListener::from_std(listener)?;
        Ok(AsyncUnixSocket { listener, guard })
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.guard.path
    }
}

/// Tokio flavor of [`UnixDomainSocket`], used by the background server.
#[cfg(feature = "async")]
pub struct AsyncUnixSocket {
    listener: tokio::net::UnixListener,
    guard: SocketFileGuard,
}

#[cfg(feature = "async")]
impl AsyncUnixSocket {
    /// Accept the next connection.
    pub async fn accept(&self) -> Result<tokio::net::UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        debug!("accepted connection");
        Ok(stream)
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.guard.path
    }
}

/// Whether something currently accepts connections on `path`.
pub fn is_listening(path: impl AsRef<Path>) -> bool {
    UnixStream::connect(path.as_ref()).is_ok()
}

fn prepare_path(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: MAX_PATH_LEN,
        });
    }

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(TransportError::Bind {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    // Never remove non-socket files.
    if !metadata.file_type().is_socket() {
        return Err(TransportError::Bind {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "existing path is not a unix socket",
            ),
        });
    }
    if is_listening(path) {
        return Err(TransportError::InUse(path.to_path_buf()));
    }

    debug!(?path, "removing stale socket");
    std::fs::remove_file(path).map_err(|e| TransportError::Bind {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Removes the socket file on drop if it still is the one we created.
struct SocketFileGuard {
    path: PathBuf,
    created_inode: (u64, u64),
}

impl SocketFileGuard {
    fn create(path: PathBuf, mode: u32) -> Result<Self> {
        let bind_err = |source| TransportError::Bind {
            path: path.clone(),
            source,
        };
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
        let created_inode = (metadata.dev(), metadata.ino());
        Ok(Self {
            path,
            created_inode,
        })
    }
}

impl Drop for SocketFileGuard {
    fn drop(&mut self) {
        let Ok(metadata) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        let (expected_dev, expected_ino) = self.created_inode;
        if metadata.file_type().is_socket()
            && metadata.dev() == expected_dev
            && metadata.ino() == expected_ino
        {
            debug!(path = ?self.path, "cleaning up socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(
                path = ?self.path,
                "socket path identity changed; skipping cleanup"
            );
        }
    }
}

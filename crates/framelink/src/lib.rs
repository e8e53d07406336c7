//! Multi-frame scientific image loading and local array hand-off.
//!
//! # Crate Structure
//!
//! - [`transport`] : per-user Unix domain socket transport
//! - [`frame`] : length-prefixed framing and the tagged message schema
//! - [`formats`] : frame sources for recordings, NumPy, raw and TIFF data
//! - [`ipc`] : background server and client calls
//!
//! The `ipc_*` functions drive one process-wide server on the endpoint from
//! [`ipc::IpcConfig::from_env`].

use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Re-export transport types.
pub mod transport {
    pub use framelink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use framelink_frame::*;
}

/// Re-export format types.
pub mod formats {
    pub use framelink_formats::*;
}

/// Re-export server and client types.
pub mod ipc {
    pub use framelink_ipc::*;
}

pub use framelink_formats::{Dispatched, Dispatcher, FrameSource};

use framelink_ipc::{ArrayElement, Inbox, IpcConfig, IpcError, IpcServer};

static SERVER: Mutex<Option<IpcServer>> = Mutex::new(None);

/// Open `path` with the built-in dispatcher.
pub fn dispatch(path: impl AsRef<Path>) -> Dispatched {
    Dispatcher::new().dispatch(path.as_ref())
}

/// Start the process-wide server and return its inbox.
pub fn ipc_start_server() -> framelink_ipc::Result<Inbox> {
    let mut slot = SERVER.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.as_ref().is_some_and(IpcServer::is_running) {
        return Err(IpcError::Runtime("server already running".into()));
    }
    let (server, inbox) = IpcServer::start(IpcConfig::from_env())?;
    *slot = Some(server);
    Ok(inbox)
}

/// Stop the process-wide server. No-op when none is running.
pub fn ipc_stop_server() {
    let server = SERVER.lock().unwrap_or_else(PoisonError::into_inner).take();
    drop(server);
}

/// Whether some process serves the configured endpoint.
pub fn ipc_is_other_instance_running() -> bool {
    framelink_ipc::is_other_instance_running(IpcConfig::from_env().socket_path)
}

/// Hand `paths` to the running instance.
pub fn ipc_send_filepaths<P: AsRef<Path>>(paths: &[P]) -> framelink_ipc::Result<()> {
    framelink_ipc::send_filepaths(&IpcConfig::from_env(), paths)
}

/// Send an `nx` x `ny` x `nt` array to the running instance.
pub fn ipc_send_array<T: ArrayElement>(
    data: &[T],
    nx: u32,
    ny: u32,
    nt: u32,
    name: &str,
) -> framelink_ipc::Result<()> {
    framelink_ipc::send_array(&IpcConfig::from_env(), data, nx, ny, nt, name)
}

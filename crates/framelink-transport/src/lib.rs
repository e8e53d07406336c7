//! Local socket transport for framelink.
//!
//! Provides the filesystem Unix domain socket used between a running framelink
//! instance and the processes that hand it files or arrays:
//! - blocking bind and connect for clients
//! - a tokio listener (behind the `async` feature) for the background server
//! - per-user endpoint resolution
//!
//! This is the lowest layer of framelink. The wire codec builds on top of the
//! [`IpcStream`] type provided here.

pub mod endpoint;
pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use endpoint::{default_socket_path, SOCKET_ENV};
pub use error::{Result, TransportError};
pub use traits::IpcStream;

#[cfg(unix)]
pub use uds::{is_listening, UnixDomainSocket};

#[cfg(all(unix, feature = "async"))]
pub use uds::AsyncUnixSocket;

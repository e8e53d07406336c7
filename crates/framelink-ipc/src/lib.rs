//! IPC between framelink instances.
//!
//! A running instance starts an [`IpcServer`] that accepts connections on a
//! per-user Unix domain socket. Other processes use the client functions to
//! hand it file paths, whole arrays, point overlays and commands. Everything
//! the server receives is queued for the owning thread, which drains it
//! through the [`Inbox`] without blocking.

pub mod assembly;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod queue;
pub mod server;

mod session;

pub use assembly::ArrayAssembly;
pub use client::{
    chunk_elements, is_other_instance_running, send_array, send_array_with, send_filepaths,
    send_flow, send_points, send_request, ArrayElement,
};
pub use command::RemoteCommand;
pub use config::{IpcConfig, DEFAULT_CHUNK_BYTES, DEFAULT_QUEUE_CAPACITY, QUEUE_CAPACITY_ENV};
pub use error::{IpcError, ProtocolError, Result};
pub use queue::{channel, Delivery, Inbox};
pub use server::IpcServer;

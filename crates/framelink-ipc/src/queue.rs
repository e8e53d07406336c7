//! Hand-off from the server thread to the owning thread.
//!
//! One bounded queue per item kind. The producer never waits: when a queue
//! is full the newest item is dropped and logged.

use std::path::PathBuf;

use framelink_formats::RawArray;
use framelink_frame::PointsVideo;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::error;

use crate::command::RemoteCommand;
use crate::error::{IpcError, Result};

/// Producer half, owned by the server sessions.
#[derive(Debug, Clone)]
pub struct Delivery {
    capacity: usize,
    arrays: mpsc::Sender<RawArray>,
    paths: mpsc::Sender<PathBuf>,
    commands: mpsc::Sender<RemoteCommand>,
    points: mpsc::Sender<PointsVideo>,
}

/// Consumer half. Every call returns immediately with at most one item.
#[derive(Debug)]
pub struct Inbox {
    arrays: mpsc::Receiver<RawArray>,
    paths: mpsc::Receiver<PathBuf>,
    commands: mpsc::Receiver<RemoteCommand>,
    points: mpsc::Receiver<PointsVideo>,
}

/// A connected pair of queues holding up to `capacity` items per kind.
pub fn channel(capacity: usize) -> (Delivery, Inbox) {
    let capacity = capacity.max(1);
    let (arrays_tx, arrays) = mpsc::channel(capacity);
    let (paths_tx, paths) = mpsc::channel(capacity);
    let (commands_tx, commands) = mpsc::channel(capacity);
    let (points_tx, points) = mpsc::channel(capacity);
    (
        Delivery {
            capacity,
            arrays: arrays_tx,
            paths: paths_tx,
            commands: commands_tx,
            points: points_tx,
        },
        Inbox {
            arrays,
            paths,
            commands,
            points,
        },
    )
}

impl Delivery {
    fn offer<T>(&self, tx: &mpsc::Sender<T>, item: T, kind: &'static str) -> Result<()> {
        match tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                error!(kind, capacity = self.capacity, "delivery queue full, dropping item");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(IpcError::QueueClosed),
        }
    }

    pub fn array(&self, array: RawArray) -> Result<()> {
        self.offer(&self.arrays, array, "array")
    }

    pub fn path(&self, path: PathBuf) -> Result<()> {
        self.offer(&self.paths, path, "path")
    }

    pub fn command(&self, command: RemoteCommand) -> Result<()> {
        self.offer(&self.commands, command, "command")
    }

    pub fn points(&self, points: PointsVideo) -> Result<()> {
        self.offer(&self.points, points, "points")
    }
}

impl Inbox {
    pub fn next_array(&mut self) -> Option<RawArray> {
        self.arrays.try_recv().ok()
    }

    pub fn next_path(&mut self) -> Option<PathBuf> {
        self.paths.try_recv().ok()
    }

    pub fn next_command(&mut self) -> Option<RemoteCommand> {
        self.commands.try_recv().ok()
    }

    pub fn next_points(&mut self) -> Option<PointsVideo> {
        self.points.try_recv().ok()
    }
}

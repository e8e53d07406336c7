//! Background server.
//!
//! One named thread runs a current-thread tokio runtime. Sessions are tasks
//! on that runtime, so no two messages are ever handled in parallel.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use framelink_frame::FrameError;
use framelink_transport::{AsyncUnixSocket, UnixDomainSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::IpcConfig;
use crate::error::{IpcError, ProtocolError, Result};
use crate::queue::{self, Delivery, Inbox};
use crate::session;

const THREAD_NAME: &str = "framelink-ipc";
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Handle to a running server. Dropping it stops the server.
#[derive(Debug)]
pub struct IpcServer {
    path: PathBuf,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl IpcServer {
    /// Bind `config.socket_path` and start serving in the background.
    ///
    /// Binding happens on the calling thread, so a busy socket is reported
    /// here. Received items show up in the returned [`Inbox`].
    pub fn start(config: IpcConfig) -> Result<(Self, Inbox)> {
        let socket = UnixDomainSocket::bind(&config.socket_path)?;
        let path = socket.path().to_path_buf();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| IpcError::Runtime(e.to_string()))?;
        let listener = {
            let _guard = runtime.enter();
            socket.into_async()?
        };

        let (delivery, inbox) = queue::channel(config.queue_capacity);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let max_message_size = config.max_message_size;
        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || {
                runtime.block_on(serve(listener, delivery, token, max_message_size));
            })
            .map_err(|e| IpcError::Runtime(e.to_string()))?;

        info!(?path, "ipc server started");
        Ok((
            Self {
                path,
                cancel,
                thread: Some(thread),
            },
            inbox,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop accepting, end all sessions and wait for the thread.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.cancel.cancel();
        if thread.join().is_err() {
            error!("ipc server thread panicked");
        }
        info!(path = ?self.path, "ipc server stopped");
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(
    listener: AsyncUnixSocket,
    delivery: Delivery,
    cancel: CancellationToken,
    max_message_size: usize,
) {
    let mut next_id = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    next_id += 1;
                    let id = next_id;
                    let delivery = delivery.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            result = session::run(stream, id, delivery, max_message_size) => {
                                report(id, result);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
    debug!(path = ?listener.path(), "accept loop finished");
}

fn report(id: u64, result: Result<()>) {
    match result {
        Ok(()) => {}
        Err(IpcError::Protocol(ProtocolError::Frame(FrameError::Io(e)))) => {
            debug!(connection = id, error = %e, "connection dropped");
        }
        Err(IpcError::Protocol(e)) => {
            error!(connection = id, error = %e, "protocol violation, closing connection");
        }
        Err(e) => error!(connection = id, error = %e, "session failed"),
    }
}

use std::path::PathBuf;

use framelink_frame::{Message, MessageCodec};
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::assembly::ArrayAssembly;
use crate::command::RemoteCommand;
use crate::error::{ProtocolError, Result};
use crate::queue::Delivery;

/// Serve one connection until it closes or misbehaves.
///
/// Messages are handled strictly in arrival order. Any error ends the
/// session; an array still being received is dropped with it.
pub(crate) async fn run<S>(stream: S, id: u64, delivery: Delivery, max_message_size: usize) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(stream, MessageCodec::with_max_payload(max_message_size));
    let mut assembly = ArrayAssembly::new();
    debug!(connection = id, "session opened");

    while let Some(message) = frames.next().await {
        let message = message.map_err(ProtocolError::from)?;
        handle(&mut assembly, &delivery, message)?;
    }
    debug!(connection = id, "session closed");
    Ok(())
}

fn handle(assembly: &mut ArrayAssembly, delivery: &Delivery, message: Message) -> Result<()> {
    let completed = match message {
        Message::Filepaths(files) => {
            for path in files.paths {
                delivery.path(PathBuf::from(path))?;
            }
            None
        }
        Message::ArrayMetadata(meta) => assembly.accept_metadata(meta)?,
        Message::ArrayMetadataFlow(meta) => assembly.accept_flow_metadata(meta)?,
        Message::ChunkF32(chunk) => assembly.accept_chunk(chunk)?,
        Message::ChunkU16(chunk) => assembly.accept_chunk(chunk)?,
        Message::ChunkU8(chunk) => assembly.accept_chunk(chunk)?,
        Message::PointsVideo(points) => {
            delivery.points(points)?;
            None
        }
        Message::Request(request) => {
            match RemoteCommand::from_request(request) {
                Some(command) => delivery.command(command)?,
                None => warn!("close request without a name ignored"),
            }
            None
        }
    };
    if let Some(array) = completed {
        delivery.array(array)?;
    }
    Ok(())
}

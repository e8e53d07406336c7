//! Blocking client calls. Each call uses its own connection.

use std::path::Path;

use framelink_frame::{
    ArrayMetadata, ArrayMetadataFlow, DataChunk, Filepaths, FrameConfig, FrameWriter, Message,
    PointsVideo,
};
use framelink_transport::{is_listening, IpcStream, TransportError, UnixDomainSocket};
use tracing::debug;

pub use crate::assembly::ArrayElement;
use crate::command::RemoteCommand;
use crate::config::IpcConfig;
use crate::error::{ProtocolError, Result};

/// Room for the frame header, type byte and chunk fields.
const CHUNK_OVERHEAD: usize = 128;

fn connect(config: &IpcConfig) -> Result<FrameWriter<IpcStream>> {
    let stream = UnixDomainSocket::connect(&config.socket_path)?;
    let frame_config = FrameConfig {
        max_payload_size: config.max_message_size,
        write_timeout: config.write_timeout,
    };
    Ok(FrameWriter::with_config_ipc(stream, frame_config)?)
}

/// Elements per data chunk so one message stays within `chunk_bytes`.
pub fn chunk_elements<T: ArrayElement>(chunk_bytes: usize) -> usize {
    (chunk_bytes.saturating_sub(CHUNK_OVERHEAD) / std::mem::size_of::<T>()).max(1)
}

/// Whether a server is listening on `path`.
pub fn is_other_instance_running(path: impl AsRef<Path>) -> bool {
    is_listening(path)
}

/// Ask the running instance to load `paths`. Relative paths are resolved
/// against the current directory.
pub fn send_filepaths<P: AsRef<Path>>(config: &IpcConfig, paths: &[P]) -> Result<()> {
    let paths = paths
        .iter()
        .map(|p| {
            std::path::absolute(p.as_ref())
                .map(|abs| abs.to_string_lossy().into_owned())
                .map_err(TransportError::from)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut writer = connect(config)?;
    debug!(count = paths.len(), "sending file paths");
    writer.send_message(&Message::Filepaths(Filepaths { paths }))?;
    writer.flush()?;
    Ok(())
}

/// Send `data` as an `nx` x `ny` x `nt` array with default metadata.
pub fn send_array<T: ArrayElement>(
    config: &IpcConfig,
    data: &[T],
    nx: u32,
    ny: u32,
    nt: u32,
    name: &str,
) -> Result<()> {
    send_array_with(config, ArrayMetadata::new(T::ELEMENT_TYPE, nx, ny, nt, name), data)
}

/// Send `data` under caller-provided metadata.
pub fn send_array_with<T: ArrayElement>(
    config: &IpcConfig,
    meta: ArrayMetadata,
    data: &[T],
) -> Result<()> {
    if meta.element_type != T::ELEMENT_TYPE {
        return Err(ProtocolError::ChunkTypeMismatch {
            expected: meta.element_type,
            got: T::ELEMENT_TYPE,
        }
        .into());
    }
    check_len(meta.element_count(), data.len())?;
    let mut writer = connect(config)?;
    debug!(name = %meta.name, elements = data.len(), "sending array");
    writer.send_message(&Message::ArrayMetadata(meta))?;
    send_chunks(&mut writer, config, data)
}

/// Send a flow field of `meta.nt` interleaved u/v planes.
pub fn send_flow(config: &IpcConfig, meta: ArrayMetadataFlow, data: &[f32]) -> Result<()> {
    if meta.nt % 2 != 0 {
        return Err(ProtocolError::InvalidDimensions(format!(
            "flow field with odd plane count {}",
            meta.nt
        ))
        .into());
    }
    check_len(meta.element_count(), data.len())?;
    let mut writer = connect(config)?;
    debug!(name = %meta.name, elements = data.len(), "sending flow field");
    writer.send_message(&Message::ArrayMetadataFlow(meta))?;
    send_chunks(&mut writer, config, data)
}

pub fn send_points(config: &IpcConfig, points: PointsVideo) -> Result<()> {
    let mut writer = connect(config)?;
    writer.send_message(&Message::PointsVideo(points))?;
    writer.flush()?;
    Ok(())
}

pub fn send_request(config: &IpcConfig, command: RemoteCommand) -> Result<()> {
    let mut writer = connect(config)?;
    writer.send_message(&Message::Request(command.into_request()))?;
    writer.flush()?;
    Ok(())
}

fn check_len(expected: Option<usize>, got: usize) -> Result<()> {
    match expected {
        Some(n) if n == got && n > 0 => Ok(()),
        _ => Err(ProtocolError::InvalidDimensions(format!(
            "{got} elements do not match the announced shape"
        ))
        .into()),
    }
}

fn send_chunks<T: ArrayElement>(
    writer: &mut FrameWriter<IpcStream>,
    config: &IpcConfig,
    data: &[T],
) -> Result<()> {
    let per_chunk = chunk_elements::<T>(config.chunk_bytes);
    for (i, part) in data.chunks(per_chunk).enumerate() {
        let chunk = DataChunk {
            start: (i * per_chunk) as u64,
            data: part.to_vec(),
        };
        writer.send_message(&T::chunk_message(chunk))?;
    }
    writer.flush()?;
    Ok(())
}

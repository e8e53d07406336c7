use framelink_formats::{BitRange, ColorMap, FrameSource, OpacityFunction, PixelScalar};
use framelink_frame::{ArrayMetadata, ArrayMetadataFlow, ElementType};
use framelink_ipc::{send_array_with, send_flow, IpcConfig};
use tracing::{info, warn};

use crate::cmd::send::ensure_running;
use crate::cmd::SendArrayArgs;
use crate::exit::{format_error, ipc_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_status, OutputFormat};

/// Unsigned integer storage travels as-is; everything else as float32.
fn element_type(scalar: Option<PixelScalar>) -> ElementType {
    match scalar {
        Some(PixelScalar::U8 | PixelScalar::Bool) => ElementType::Uint8,
        Some(PixelScalar::U16) => ElementType::Uint16,
        _ => ElementType::Float32,
    }
}

/// Every frame of channel `c`, frame after frame.
fn collect(source: &mut dyn FrameSource, c: usize) -> CliResult<Vec<f32>> {
    let frame = source.nx() * source.ny();
    let mut data = Vec::with_capacity(frame * source.length());
    for t in 0..source.length() {
        let plane = source
            .read_frame(t, c)
            .map_err(|err| format_error("read failed", err))?;
        data.extend_from_slice(&plane.data);
    }
    Ok(data)
}

/// Both flow components, interleaved per pixel.
fn collect_flow(source: &mut dyn FrameSource) -> CliResult<Vec<f32>> {
    let frame = source.nx() * source.ny();
    let mut data = vec![0.0; frame * source.length() * 2];
    for t in 0..source.length() {
        for c in 0..2 {
            let plane = source
                .read_frame(t, c)
                .map_err(|err| format_error("read failed", err))?;
            let base = t * frame * 2;
            for (i, v) in plane.data.iter().enumerate() {
                data[base + 2 * i + c] = *v;
            }
        }
    }
    Ok(data)
}

fn dims(source: &dyn FrameSource, planes: usize) -> CliResult<(u32, u32, u32)> {
    let convert = |v: usize| {
        u32::try_from(v).map_err(|_| CliError::new(DATA_INVALID, "array too large to send"))
    };
    Ok((convert(source.nx())?, convert(source.ny())?, convert(planes)?))
}

pub fn run(args: SendArrayArgs, format: OutputFormat, config: &IpcConfig) -> CliResult<i32> {
    ensure_running(config)?;
    let (mut source, _messages) = super::info::load(&args.path)?;
    let name = args.name.unwrap_or_else(|| {
        args.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| args.path.display().to_string())
    });

    if source.is_flow() {
        let (nx, ny, nt) = dims(source.as_ref(), source.length() * 2)?;
        let data = collect_flow(source.as_mut())?;
        let meta = ArrayMetadataFlow {
            nx,
            ny,
            nt,
            name: name.clone(),
            parent_name: None,
            color: None,
        };
        send_flow(config, meta, &data).map_err(|err| ipc_error("send failed", err))?;
        info!(%name, nt, "flow field sent");
        print_status("sent", &name, format);
        return Ok(SUCCESS);
    }

    if source.nc() > 1 {
        warn!(channels = source.nc(), "only the first channel is sent");
    }
    let (nx, ny, nt) = dims(source.as_ref(), source.length())?;
    let data = collect(source.as_mut(), 0)?;
    let element_type = element_type(source.scalar());

    let mut meta = ArrayMetadata::new(element_type, nx, ny, nt, name.clone());
    meta.duration = source.duration().as_secs_f32();
    meta.fps = source.fps();
    meta.date = source.date();
    meta.comment = source.comment();
    meta.bit_range = BitRange::to_code(source.bit_range());
    meta.color_map = ColorMap::to_code(source.color_map());
    meta.vmin = source.vmin();
    meta.vmax = source.vmax();
    meta.opacity = source.opacity().map(|o| OpacityFunction::to_code(Some(o)));
    meta.metadata = source.metadata();

    let sent = match element_type {
        ElementType::Uint8 => {
            let data: Vec<u8> = data.iter().map(|&v| v as u8).collect();
            send_array_with(config, meta, &data)
        }
        ElementType::Uint16 => {
            let data: Vec<u16> = data.iter().map(|&v| v as u16).collect();
            send_array_with(config, meta, &data)
        }
        ElementType::Float32 => send_array_with(config, meta, &data),
    };
    sent.map_err(|err| ipc_error("send failed", err))?;
    info!(%name, nt, ?element_type, "array sent");
    print_status("sent", &name, format);
    Ok(SUCCESS)
}

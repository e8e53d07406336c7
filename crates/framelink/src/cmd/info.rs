use std::path::Path;

use framelink_formats::{Dispatcher, FrameSource};
use tracing::debug;

use crate::cmd::InfoArgs;
use crate::exit::{format_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_info, FrameStats, OutputFormat};

/// Dispatch `path` and require a native source.
///
/// Dispatcher messages go to stderr. Paths that would need an external
/// plugin count as invalid here.
pub fn load(path: &Path) -> CliResult<(Box<dyn FrameSource>, Vec<String>)> {
    let out = Dispatcher::new().dispatch(path);
    for message in &out.messages {
        eprintln!("{message}");
    }
    match (out.source, out.delegated) {
        (Some(source), _) => Ok((source, out.messages)),
        (None, Some(plugin)) => Err(CliError::new(
            DATA_INVALID,
            format!("{} requires the {plugin} plugin", path.display()),
        )),
        (None, None) => Err(CliError::new(
            DATA_INVALID,
            format!("no frame source could be built for {}", path.display()),
        )),
    }
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let (mut source, messages) = load(&args.path)?;

    let stats = match args.frame {
        Some(t) => {
            let plane = source
                .read_frame(t, args.channel)
                .map_err(|err| format_error("read failed", err))?;
            let (min, max) = plane.min_max().unzip();
            Some(FrameStats {
                frame: t,
                channel: args.channel,
                min,
                max,
                mean: plane.mean(),
            })
        }
        None => None,
    };
    debug!(path = %args.path.display(), "source inspected");

    print_info(&source.summary(), stats.as_ref(), &messages, format);
    Ok(SUCCESS)
}

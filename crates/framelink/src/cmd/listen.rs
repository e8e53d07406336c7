use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framelink_formats::{ArrayStorage, FrameSource, InMemoryArray};
use framelink_ipc::{Inbox, IpcConfig, IpcServer, RemoteCommand};

use crate::cmd::ListenArgs;
use crate::exit::{ipc_error, CliError, CliResult, SUCCESS};
use crate::output::{print_received, OutputFormat, Received};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub fn run(args: ListenArgs, format: OutputFormat, config: &IpcConfig) -> CliResult<i32> {
    let (mut server, mut inbox) =
        IpcServer::start(config.clone()).map_err(|err| ipc_error("server start failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let Some(item) = next(&mut inbox) else {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        };
        print_received(&item, format);
        printed = printed.saturating_add(1);

        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    server.stop();
    Ok(SUCCESS)
}

fn next(inbox: &mut Inbox) -> Option<Received> {
    if let Some(path) = inbox.next_path() {
        return Some(Received::Path {
            path: path.display().to_string(),
        });
    }
    if let Some(command) = inbox.next_command() {
        let command = match command {
            RemoteCommand::Close(name) => format!("close {name}"),
            RemoteCommand::CloseAll => "close-all".to_string(),
            RemoteCommand::TracePosition(Some(name)) => format!("trace-position {name}"),
            RemoteCommand::TracePosition(None) => "trace-position".to_string(),
        };
        return Some(Received::Command { command });
    }
    if let Some(array) = inbox.next_array() {
        let name = array.meta.name.clone();
        let element_type = array.data.type_name();
        let range = value_range(&array.data);
        let source = InMemoryArray::new(array);
        return Some(Received::Array {
            name,
            element_type,
            range,
            summary: source.summary(),
        });
    }
    inbox.next_points().map(|points| Received::Points {
        name: points.name,
        parent_name: points.parent_name,
        points: points.points.len() / 2,
        frames: points.time_idxs.len(),
    })
}

fn value_range(data: &ArrayStorage) -> Option<[f32; 2]> {
    data.head(data.len())
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| match acc {
            None => Some([v, v]),
            Some([lo, hi]) => Some([lo.min(v), hi.max(v)]),
        })
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_skips_nan() {
        let data = ArrayStorage::F32(vec![f32::NAN, 0.4, 100.7, -2.5]);
        assert_eq!(value_range(&data), Some([-2.5, 100.7]));
        assert_eq!(value_range(&ArrayStorage::U16(vec![7, 3])), Some([3.0, 7.0]));
        assert_eq!(value_range(&ArrayStorage::F32(vec![f32::NAN])), None);
    }
}

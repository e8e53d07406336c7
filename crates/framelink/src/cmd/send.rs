use framelink_ipc::{is_other_instance_running, send_filepaths, IpcConfig};

use crate::cmd::SendArgs;
use crate::exit::{ipc_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_status, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat, config: &IpcConfig) -> CliResult<i32> {
    ensure_running(config)?;
    send_filepaths(config, &args.paths).map_err(|err| ipc_error("send failed", err))?;
    print_status("sent", &args.paths.len().to_string(), format);
    Ok(SUCCESS)
}

pub fn ensure_running(config: &IpcConfig) -> CliResult<()> {
    if is_other_instance_running(&config.socket_path) {
        Ok(())
    } else {
        Err(CliError::new(
            FAILURE,
            format!(
                "no running instance at {}",
                config.socket_path.display()
            ),
        ))
    }
}

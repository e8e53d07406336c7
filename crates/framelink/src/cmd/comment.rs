use framelink_formats::Capabilities;

use crate::cmd::info::load;
use crate::cmd::CommentArgs;
use crate::exit::{format_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_status, OutputFormat};

pub fn run(args: CommentArgs, format: OutputFormat) -> CliResult<i32> {
    let (mut source, _messages) = load(&args.path)?;
    if !source.capabilities().contains(Capabilities::SET_COMMENT) {
        return Err(CliError::new(
            USAGE,
            format!("{} does not support comments", args.path.display()),
        ));
    }
    source
        .set_comment(&args.text)
        .map_err(|err| format_error("comment update failed", err))?;
    print_status("comment", &source.comment(), format);
    Ok(SUCCESS)
}

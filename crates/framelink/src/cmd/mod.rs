use clap::{Args, Subcommand};
use std::path::PathBuf;

use framelink_ipc::IpcConfig;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod comment;
pub mod info;
pub mod listen;
pub mod send;
pub mod send_array;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a file or folder and print what was found.
    Info(InfoArgs),
    /// Ask the running instance to open files.
    Send(SendArgs),
    /// Load a file locally and stream it to the running instance as an array.
    SendArray(SendArrayArgs),
    /// Replace the comment of a recording.
    Comment(CommentArgs),
    /// Serve the socket and print everything received.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: &IpcConfig) -> CliResult<i32> {
    match command {
        Command::Info(args) => info::run(args, format),
        Command::Send(args) => send::run(args, format, config),
        Command::SendArray(args) => send_array::run(args, format, config),
        Command::Comment(args) => comment::run(args, format),
        Command::Listen(args) => listen::run(args, format, config),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// File or folder to load.
    pub path: PathBuf,
    /// Also report statistics of this frame.
    #[arg(long)]
    pub frame: Option<usize>,
    /// Channel of `--frame`.
    #[arg(long, default_value = "0", requires = "frame")]
    pub channel: usize,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Files or folders to open.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SendArrayArgs {
    /// File or folder to load.
    pub path: PathBuf,
    /// Array name. Default: the file stem.
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct CommentArgs {
    /// Recording to edit.
    pub path: PathBuf,
    /// New comment.
    pub text: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Exit after receiving N items.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

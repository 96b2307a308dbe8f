use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "blobmover", version, about, long_about = None)]
pub struct Cli {
    /// Directory used as the object container
    #[arg(required = true, value_parser)]
    pub root: PathBuf,

    /// Verbose mode (-v, -vv, -vvv)
    #[arg(short, action = ArgAction::Count)]
    pub verbosity: u8,

    /// Do not write error reports into the container
    #[arg(long)]
    pub no_error_reports: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Uploads a local file as an object
    Import { key: String, file: PathBuf },
    /// Takes a snapshot of an object
    Snapshot { key: String },
    /// Lists objects in the container
    #[command(alias = "ls")]
    List,
    /// Copies an object under a lease, then deletes the source
    Copy {
        source: String,
        destination: String,
        #[arg(long, default_value_t = 60)]
        lease_secs: u64,
        #[arg(long, default_value_t = 5)]
        margin_secs: u64,
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },
    /// Copies an object into `<stem>-<i><ext>` chunks under one lease
    Split {
        source: String,
        #[arg(long, default_value_t = 5)]
        chunks: usize,
    },
    /// Runs a full move job: split, then move every chunk
    Run {
        source: String,
        /// Environment variable holding the job settings as JSON
        #[arg(long)]
        settings_env: Option<String>,
    },
}

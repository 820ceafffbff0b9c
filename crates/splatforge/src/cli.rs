//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Video to Gaussian-splat job pipeline.
#[derive(Debug, Parser)]
#[command(name = "splatforge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the JSON config file.
    #[arg(long, short, global = true, env = "SPLATFORGE_CONFIG", default_value = "splatforge.json")]
    pub config: PathBuf,

    /// Owning user for uploads and listings.
    #[arg(long, global = true, default_value_t = 1)]
    pub user: i64,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stores a video and prints its id.
    Upload {
        /// `.mp4` file to upload.
        file: PathBuf,

        #[arg(long)]
        title: Option<String>,
    },

    /// Starts a work on a stored video and prints its id.
    ///
    /// Works run in this process, so the command stays up until the work
    /// reaches a terminal state.
    Start {
        video_id: i64,

        #[arg(long, default_value = "work")]
        name: String,

        /// Training iterations (defaults to the configured value).
        #[arg(long)]
        iterations: Option<u32>,
    },

    /// Starts a work and waits for it, printing progress.
    Run {
        video_id: i64,

        #[arg(long, default_value = "work")]
        name: String,

        #[arg(long)]
        iterations: Option<u32>,

        /// Echo trainer and converter output.
        #[arg(long, short)]
        follow: bool,
    },

    /// Registers an existing `.splat` file as a completed work.
    Import {
        file: PathBuf,

        #[arg(long)]
        name: Option<String>,
    },

    /// Prints a work's status as JSON.
    Status { work_id: i64 },

    /// Copies a completed work's artifact to a local path.
    Fetch {
        work_id: i64,

        #[arg(long, short)]
        output: PathBuf,
    },

    /// Lists videos, or works with `--works`.
    List {
        #[arg(long)]
        works: bool,
    },
}

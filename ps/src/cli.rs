//! CLI argument parsing for pinstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pinstore")]
#[command(author, version, about = "Inspect and maintain the pinned-slot registry record", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Registry record to operate on (overrides config)
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the registry in slot order
    Show {
        /// Print the raw versioned record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replace the registry with the empty registry
    Flush,

    /// Print the path of the registry record
    Path,

    /// Validate the record on disk
    Check,
}

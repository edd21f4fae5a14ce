use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "voxnav",
    about = "Voice-driven exploratory navigation of mobile apps",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Tail a device log file and print lines matching the keyword filter
    Watch {
        /// Log file to follow
        file: PathBuf,

        /// Keyword to match (repeatable); defaults to the system-log set
        #[arg(long = "match", value_name = "KW")]
        keywords: Vec<String>,

        /// Read the file from the beginning instead of the end
        #[arg(long)]
        from_start: bool,

        /// Stop after this many seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,

        /// Append lifecycle events to this JSON lines log
        #[arg(long, value_name = "FILE")]
        log: Option<PathBuf>,
    },

    /// Decide whether the screen changed between two captures
    Diff {
        /// OCR description before the action (JSON)
        before_json: PathBuf,
        /// Screenshot before the action
        before_png: PathBuf,
        /// OCR description after the action (JSON)
        after_json: PathBuf,
        /// Screenshot after the action
        after_png: PathBuf,
    },

    /// Print the voice grid commands that tap a region of a screenshot
    Grid {
        /// Screenshot the region belongs to
        image: PathBuf,
        x: u32,
        y: u32,
        #[arg(value_name = "W")]
        width: u32,
        #[arg(value_name = "H")]
        height: u32,
    },

    /// Show the effective configuration as JSON
    Config,
}

//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Filesystem watch server and live tree client
#[derive(Parser)]
#[command(
    name = "treesync",
    version = env!("CARGO_PKG_VERSION"),
    about = "Filesystem change notification and live directory trees",
    long_about = "Serve filesystem change events over SSE and keep directory trees in sync with them.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Quick Start:\n  $ treesync init\n  $ treesync serve\n  $ treesync watch src --base \"$PWD\"\n  $ treesync watch-file README.md --base \"$PWD\""
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .treesync directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Start the watch server
    #[command(
        about = "Start the SSE watch server",
        after_help = "Examples:\n  treesync serve\n  treesync serve --bind 0.0.0.0:3001"
    )]
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Stream directory changes from a running server
    #[command(
        about = "Print directory change events",
        after_help = "Examples:\n  treesync watch .\n  treesync watch src --base /home/me/proj --shallow"
    )]
    Watch {
        /// Directory to watch, relative to --base
        #[arg(value_name = "PATH", default_value = "")]
        path: String,

        /// Absolute base directory (defaults to the current directory)
        #[arg(long)]
        base: Option<PathBuf>,

        /// Only direct children
        #[arg(long)]
        shallow: bool,

        /// Server URL (overrides config)
        #[arg(long)]
        server: Option<String>,

        /// Keep a tree in sync and print it after every change
        #[arg(long)]
        tree: bool,
    },

    /// Stream logical events for one file
    #[command(
        name = "watch-file",
        about = "Print logical events (moves included) for a single file"
    )]
    WatchFile {
        /// File to watch, relative to --base
        #[arg(value_name = "FILE")]
        file: String,

        /// Absolute base directory (defaults to the current directory)
        #[arg(long)]
        base: Option<PathBuf>,

        /// Server URL (overrides config)
        #[arg(long)]
        server: Option<String>,
    },

    /// List a directory tree from disk
    #[command(about = "Print a directory tree")]
    Tree {
        /// Directory to list
        #[arg(value_name = "PATH", default_value = ".")]
        path: PathBuf,

        /// How many levels to expand
        #[arg(short, long, default_value = "2")]
        depth: usize,
    },
}

//! `auralinkd`'s command surface: a `clap::Parser`
//! with the subcommands named there.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "auralinkd")]
#[command(author, version, about = "Audio-routing server", long_about = None)]
pub struct Cli {
    /// Path to a TOML config file; defaults to the platform config
    /// directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server: bind the control socket, spawn the audio engine
    /// thread, and run the accept loop.
    Run(crate::commands::run::RunArgs),

    /// List audio back-end devices the default host can see.
    Devices(crate::commands::devices::DevicesArgs),

    /// Print a point-in-time engine state snapshot for debugging.
    Dump(crate::commands::dump::DumpArgs),
}

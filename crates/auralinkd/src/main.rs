//! Entry point: tracing setup, CLI parsing, and command dispatch.

mod cli;
mod commands;
mod iodev_list;
mod socket_perms;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run::run(args, cli.config),
        Commands::Devices(args) => commands::devices::run(args),
        Commands::Dump(args) => commands::dump::run(args),
    }
}

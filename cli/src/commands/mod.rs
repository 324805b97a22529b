//! CLI command definitions and dispatch.

mod build;
mod version;

use clap::{Parser, Subcommand};

/// Assemble reproducible OCI images from prebuilt layers.
#[derive(Parser)]
#[command(name = "layerforge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build an image tarball from layer blobs
    Build(build::BuildArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Build(args) => build::execute(args),
        Command::Version(args) => version::execute(args),
    }
}

//! Command-line interface definitions for the example programs

use std::path::PathBuf;

use clap::{Args, Parser};

/// Options shared by every example program
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Path to alternative meshlink config directory
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Minimal example: announce a destination on request
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct MinimalArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

/// Simple link example (server)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ServerArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// File holding the server identity; created if missing
    #[arg(long, default_value = "identity_file")]
    pub identity: PathBuf,
}

/// Simple link example (client)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ClientArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Hexadecimal hash of the server destination
    pub destination: Option<String>,
}

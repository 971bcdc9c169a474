use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rknfsd", version, about = "rknfs storage server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server, optionally from a YAML config file
    Start {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the listen address (ip:port)
        #[arg(long)]
        addr: Option<String>,
        /// Override the exported root directory
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

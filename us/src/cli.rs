//! CLI argument parsing for unitstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "us")]
#[command(author, version, about = "Inspect and edit a unit's local durable cache", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the store file (overrides config)
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the value stored under a key
    Get {
        /// Key to look up
        #[arg(required = true)]
        key: String,
    },

    /// Store a JSON value under a key
    Set {
        /// Key to write
        #[arg(required = true)]
        key: String,

        /// JSON value (bare words are stored as strings)
        #[arg(required = true)]
        value: String,
    },

    /// Remove a key
    Unset {
        /// Key to remove
        #[arg(required = true)]
        key: String,
    },

    /// List stored keys
    List {
        /// Only show keys starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },
}

//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// gcp-integration - credential-free cloud integration requests
#[derive(Parser)]
#[command(
    name = "gi",
    about = "Resolve identity, fingerprint requests, and simulate the integration relation",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve this unit's instance id and zone from the metadata endpoint
    Identity {
        /// Skip the local store (always query the endpoint, cache nothing)
        #[arg(long)]
        no_cache: bool,
    },

    /// Print the fingerprint of a JSON object
    Fingerprint {
        /// File holding the JSON object (reads stdin when omitted)
        file: Option<PathBuf>,

        /// Treat the object as a published databag and skip the `requested` marker
        #[arg(short, long)]
        databag: bool,
    },

    /// Run an in-memory requirer/provider round trip
    Simulate {
        /// Instance id the simulated requirer reports
        #[arg(long, default_value = "i-simulated")]
        instance: String,

        /// Zone path the simulated metadata endpoint returns
        #[arg(long, default_value = "projects/0/zones/us-central1-a")]
        zone: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for simulate
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate_defaults() {
        let cli = Cli::try_parse_from(["gi", "simulate"]).unwrap();
        match cli.command {
            Command::Simulate { instance, zone, format } => {
                assert_eq!(instance, "i-simulated");
                assert!(zone.ends_with("us-central1-a"));
                assert!(matches!(format, OutputFormat::Text));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["gi", "fingerprint", "req.json", "--databag", "-l", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Fingerprint { file, databag } => {
                assert_eq!(file, Some(PathBuf::from("req.json")));
                assert!(databag);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

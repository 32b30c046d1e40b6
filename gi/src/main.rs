//! gi - gcp-integration command-line entry point

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, bail};
use serde_json::{Map, Value};
use tracing::{debug, info};

use gcp_integration::cli::{Cli, Command, OutputFormat};
use gcp_integration::config::Config;
use gcp_integration::identity::{HttpMetadata, IdentityResolver};
use gcp_integration::request::{Databag, encode_value};
use gcp_integration::requirer::Readiness;
use gcp_integration::{fingerprint, request_fingerprint, run_simulation};
use unitstore::{FileStore, KeyValueStore, MemoryStore};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gcp-integration")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level).map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("gi.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(endpoint = %config.endpoint, "gi loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Identity { no_cache } => cmd_identity(&config, no_cache).await,
        Command::Fingerprint { file, databag } => cmd_fingerprint(file.as_deref(), databag),
        Command::Simulate { instance, zone, format } => cmd_simulate(&config, &instance, &zone, format).await,
    }
}

async fn cmd_identity(config: &Config, no_cache: bool) -> Result<()> {
    debug!(no_cache, "cmd_identity: called");
    let source = HttpMetadata::from_config(&config.metadata).context("Failed to build metadata client")?;

    if no_cache {
        return print_identity(IdentityResolver::new(source, MemoryStore::new(), &config.endpoint)).await;
    }

    let store = FileStore::open(&config.store.path)
        .context(format!("Failed to open store at {}", config.store.path.display()))?;
    print_identity(IdentityResolver::new(source, store, &config.endpoint)).await
}

async fn print_identity<S: KeyValueStore>(mut resolver: IdentityResolver<HttpMetadata, S>) -> Result<()> {
    let identity = resolver.resolve().await.context("Failed to resolve instance identity")?;
    println!("{} {}", "instance:".bold(), identity.instance);
    println!("{} {}", "zone:".bold(), identity.zone);
    Ok(())
}

fn cmd_fingerprint(file: Option<&Path>, databag: bool) -> Result<()> {
    debug!(?file, databag, "cmd_fingerprint: called");
    let content = match file {
        Some(path) => fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let value: Value = serde_json::from_str(&content).context("Input is not valid JSON")?;
    let Value::Object(mapping) = value else {
        bail!("Input must be a JSON object");
    };

    let digest = if databag {
        request_fingerprint(&to_databag(mapping))
    } else {
        fingerprint(&mapping)
    };
    println!("{}", digest);
    Ok(())
}

/// String values are taken as already-encoded wire values; anything else is encoded
fn to_databag(mapping: Map<String, Value>) -> Databag {
    mapping
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => (key, s),
            other => (key, encode_value(&other)),
        })
        .collect()
}

async fn cmd_simulate(config: &Config, instance: &str, zone: &str, format: OutputFormat) -> Result<()> {
    debug!(%instance, %zone, "cmd_simulate: called");
    let steps = run_simulation(config, instance, zone)
        .await
        .context("Simulation failed")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&steps)?);
        }
        OutputFormat::Text => {
            for (i, step) in steps.iter().enumerate() {
                let readiness = match step.readiness {
                    Readiness::Missing => "missing".red(),
                    Readiness::Waiting => "waiting".yellow(),
                    Readiness::Ready => "ready".green(),
                };
                println!(
                    "{:>2}. {:<40} {:<8} pending={}",
                    i + 1,
                    step.description,
                    readiness,
                    step.pending
                );
                if let Some(message) = step.readiness.status_message(&config.endpoint) {
                    println!("    {}", message.dimmed());
                }
            }
        }
    }
    Ok(())
}

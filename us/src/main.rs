use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use serde_json::Value;

use unitstore::cli::{Cli, Command};
use unitstore::config::Config;
use unitstore::{FileStore, KeyValueStore};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let store_path = cli.store.unwrap_or(config.store_path);

    let mut store = FileStore::open(&store_path).context(format!("Failed to open store at {}", store_path.display()))?;
    info!("unitstore opened {} ({} keys)", store.path().display(), store.keys().len());

    match cli.command {
        Command::Get { key } => match store.get(&key)? {
            Some(Value::String(s)) => println!("{}", s),
            Some(value) => println!("{}", value),
            None => eyre::bail!("Key not found: {}", key),
        },
        Command::Set { key, value } => {
            let parsed = serde_json::from_str(&value).unwrap_or(Value::String(value));
            store.set(&key, parsed)?;
            println!("{} Set {}", "✓".green(), key.cyan());
        }
        Command::Unset { key } => {
            store.unset(&key)?;
            println!("{} Unset {}", "✓".green(), key.cyan());
        }
        Command::List { prefix } => {
            let keys: Vec<String> = store
                .keys()
                .into_iter()
                .filter(|k| prefix.as_deref().is_none_or(|p| k.starts_with(p)))
                .collect();
            if keys.is_empty() {
                println!("No keys found");
            } else {
                for key in keys {
                    println!("{}", key);
                }
            }
        }
    }

    Ok(())
}

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use pinstore::cli::{Cli, Command};
use pinstore::config::Config;
use pinstore::{FileStore, RegistryStore};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let store_path = cli.store.unwrap_or(config.store_path);

    info!("pinstore starting (record: {})", store_path.display());

    match cli.command {
        Command::Path => {
            println!("{}", store_path.display());
        }
        Command::Show { json } => {
            let store = FileStore::open(&store_path).context("Failed to open registry record")?;
            let current = store.read().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&current)?);
            } else if current.registry.is_empty() {
                println!("No pinned resources (version {})", current.version);
            } else {
                println!("{} {}", "version".dimmed(), current.version);
                for entry in current.registry.ordered() {
                    println!(
                        "{} {} {}",
                        format!("[{}]", entry.slot).yellow(),
                        entry.title.bold(),
                        entry.locator.dimmed()
                    );
                }
            }
        }
        Command::Flush => {
            let store = FileStore::open(&store_path).context("Failed to open registry record")?;
            let version = store.write(pinstore::Registry::new()).await?;
            println!("{} Registry flushed (version {})", "✓".green(), version);
        }
        Command::Check => {
            let store = FileStore::open(&store_path).context("Failed to open registry record")?;
            match store.read().await {
                Ok(current) => {
                    println!(
                        "{} {} entries, version {}",
                        "✓".green(),
                        current.registry.len(),
                        current.version
                    );
                }
                Err(e) => {
                    println!("{} {}", "✗".red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

//! PinDaemon - shared pin registry coordinator
//!
//! CLI entry point for running the coordinator and talking to it.

use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use pindaemon::cli::{Cli, Command, OutputFormat, generate_after_help, get_log_path};
use pindaemon::config::Config;
use pindaemon::ipc::{self, DaemonClient, DaemonResponse};
use pindaemon::{LiveResource, LocalView, Server};
use pinstore::{FileStore, Slot, Versioned};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pindaemon")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
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

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("pindaemon.log"))
        .context("Failed to open log file")?;

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
    let cmd = Cli::command().after_help(generate_after_help(&ipc::get_socket_path()));
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let client = DaemonClient::with_socket_path(config.ipc.socket_path.clone());

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Serve) => cmd_serve(&config).await,
        Some(Command::Add {
            resource_id,
            locator,
            title,
            icon,
        }) => {
            let mut resource = LiveResource::new(resource_id, title, locator);
            resource.icon_ref = icon;
            run_command(&client, pindaemon::Command::add(resource)).await
        }
        Some(Command::Remove { resource_id }) => {
            run_command(
                &client,
                pindaemon::Command::Remove {
                    resource_id: resource_id.into(),
                },
            )
            .await
        }
        Some(Command::Switch { slot }) => {
            let slot = Slot::new(slot)?;
            run_command(&client, pindaemon::Command::SwitchTo { slot }).await
        }
        Some(Command::List { format }) => cmd_list(&client, format).await,
        Some(Command::Flush) => run_command(&client, pindaemon::Command::Flush).await,
        Some(Command::Sweep { format }) => cmd_sweep(&client, format).await,
        Some(Command::Watch) => cmd_watch(&client).await,
        Some(Command::Opened {
            resource_id,
            locator,
            title,
            icon,
        }) => {
            let mut resource = LiveResource::new(resource_id, title, locator);
            resource.icon_ref = icon;
            client.resource_opened(resource).await
        }
        Some(Command::Closed { resource_id }) => client.resource_closed(resource_id.into()).await,
        Some(Command::Changed {
            resource_id,
            locator,
            title,
        }) => client.resource_changed(resource_id.into(), locator, title).await,
        Some(Command::Synced) => cmd_synced(&client).await,
        Some(Command::Ping) => cmd_ping(&client).await,
        Some(Command::Stop) => cmd_stop(&client).await,
        Some(Command::Logs { follow, lines }) => cmd_logs(follow, lines),
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

/// Run the coordinator until a signal or a `Stop` request
async fn cmd_serve(config: &Config) -> Result<()> {
    debug!("cmd_serve: called");
    let store = FileStore::open(&config.storage.registry_path).context("Failed to open registry record")?;
    info!(path = %store.path().display(), "Registry record opened");

    let (listener, socket_path) = ipc::create_listener_at(&config.ipc.socket_path)?;
    info!(?socket_path, "IPC socket listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let server = Server::start(config, Arc::new(store), shutdown_tx.clone());
    let mut server_handle = tokio::spawn(server.run(listener, shutdown_rx));

    println!("{} PinDaemon running on {}", "✓".green(), socket_path.display());
    info!("Coordinator running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                warn!("SIGINT received");
                let _ = shutdown_tx.send(()).await;
            }
            _ = sigterm.recv() => {
                warn!("SIGTERM received");
                let _ = shutdown_tx.send(()).await;
            }
            result = &mut server_handle => {
                debug!("cmd_serve: server stopped on request");
                ipc::cleanup_socket(&socket_path);
                return result.context("Server task failed")?;
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        let _ = shutdown_tx.send(()).await;
    }

    info!("Coordinator shutting down...");
    let result = server_handle.await.context("Server task failed")?;
    ipc::cleanup_socket(&socket_path);
    debug!("cmd_serve: shutdown complete");
    result
}

/// Send a registry command and print the outcome
async fn run_command(client: &DaemonClient, command: pindaemon::Command) -> Result<()> {
    let name = command.name();
    match client.execute(command).await.context("Is the coordinator running? Try `pd serve`")? {
        Ok(snapshot) => {
            println!("{} {} (version {})", "✓".green(), name, snapshot.version);
            print_registry(&snapshot);
            Ok(())
        }
        Err(signal) => {
            eprintln!("{} {}", "✗".red(), signal);
            std::process::exit(1);
        }
    }
}

async fn cmd_list(client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let snapshot = match client.execute(pindaemon::Command::Query).await? {
        Ok(snapshot) => snapshot,
        Err(signal) => {
            eprintln!("{} {}", "✗".red(), signal);
            std::process::exit(1);
        }
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Text => print_registry(&snapshot),
    }
    Ok(())
}

async fn cmd_sweep(client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let report = client.sweep().await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!(
                "{} {} live, {} orphan(s) unpinned (version {})",
                "✓".green(),
                report.live,
                report.removed.len(),
                report.version
            );
            for entry in &report.removed {
                println!("  {} {}", format!("[{}]", entry.slot).dimmed(), entry.title);
            }
        }
    }
    Ok(())
}

/// Stream snapshots and activation requests until the coordinator stops
async fn cmd_watch(client: &DaemonClient) -> Result<()> {
    let mut subscription = client.subscribe().await?;
    let mut view = LocalView::new();
    while let Some(item) = subscription.next().await? {
        match item {
            DaemonResponse::Registry { snapshot } => {
                let previous = view.version();
                if view.apply(&snapshot) && previous != view.version() {
                    println!("{} {}", "version".dimmed(), snapshot.version);
                    for line in view.lines() {
                        println!("  {}", line);
                    }
                }
            }
            DaemonResponse::Activate { resource_id } => {
                println!("{} activate {}", "→".cyan(), resource_id);
            }
            DaemonResponse::Rejected { error } => {
                eprintln!("{} {}", "✗".red(), error);
            }
            other => debug!(?other, "cmd_watch: ignoring stream item"),
        }
    }
    Ok(())
}

async fn cmd_synced(client: &DaemonClient) -> Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read resource list from stdin")?;
    let resources: Vec<LiveResource> = serde_json::from_str(&input).context("Expected a JSON array of resources")?;
    let count = resources.len();
    client.resources_synced(resources).await?;
    println!("{} reported {} live resource(s)", "✓".green(), count);
    Ok(())
}

async fn cmd_ping(client: &DaemonClient) -> Result<()> {
    match client.ping().await {
        Ok(version) => {
            println!("{} PinDaemon {} is running", "✓".green(), version);
            Ok(())
        }
        Err(e) => {
            debug!(error = %e, "cmd_ping: no answer");
            println!("{} PinDaemon is not running", "✗".red());
            std::process::exit(1);
        }
    }
}

async fn cmd_stop(client: &DaemonClient) -> Result<()> {
    if !client.socket_exists() {
        println!("PinDaemon is not running");
        return Ok(());
    }
    client.shutdown().await.context("Failed to stop coordinator")?;
    println!("{} PinDaemon stopping", "✓".green());
    Ok(())
}

fn cmd_logs(follow: bool, lines: usize) -> Result<()> {
    debug!(follow, lines, "cmd_logs: called");
    let log_path = get_log_path();

    if !log_path.exists() {
        println!("No log file found at: {}", log_path.display());
        return Ok(());
    }

    if follow {
        println!("Following log file: {} (Ctrl+C to stop)", log_path.display());
        println!();

        let mut child = std::process::Command::new("tail")
            .args(["-f", "-n", &lines.to_string()])
            .arg(&log_path)
            .spawn()
            .context("Failed to run tail -f")?;

        child.wait()?;
    } else {
        let file = fs::File::open(&log_path).context("Failed to open log file")?;
        let reader = BufReader::new(file);
        let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

        let start = all_lines.len().saturating_sub(lines);
        for line in &all_lines[start..] {
            println!("{}", line);
        }
    }

    Ok(())
}

fn print_registry(snapshot: &Versioned) {
    if snapshot.registry.is_empty() {
        println!("  {}", "(no pinned resources)".dimmed());
        return;
    }
    for entry in snapshot.registry.ordered() {
        println!(
            "  {} {} {}",
            format!("[{}]", entry.slot).yellow(),
            entry.title.bold(),
            entry.locator.dimmed()
        );
    }
}

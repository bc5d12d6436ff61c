//! ferry CLI
//!
//! Share a directory over TCP, list it from another machine and download
//! files from it.

mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ferry_core::node::{ClientEngine, ClientEvent, NodeError, ServerEngine, ServerEvent};
use ferry_core::transfer::TransferProgress;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{TransferBar, format_bytes, format_duration};

/// ferry - list and download files from a shared directory
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Share a directory until interrupted
    Serve {
        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory to share (must exist)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Listen address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Print a server's file list
    List {
        /// Server host
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Download files, one after another
    Get {
        /// File names as shown by `ferry list`
        #[arg(required = true)]
        names: Vec<String>,

        /// Server host
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Output directory (created if missing)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { force } = cli.command {
        return init_config(cli.config, force);
    }

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load_or_default()?,
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Serve { port, dir, bind } => {
            serve(port, dir, bind, &config).await?;
        }
        Commands::List { host, port } => {
            let host = host.unwrap_or_else(|| config.client.host.clone());
            list(&host, port.unwrap_or(config.client.port), &config).await?;
        }
        Commands::Get {
            names,
            host,
            port,
            output,
        } => {
            let host = host.unwrap_or_else(|| config.client.host.clone());
            let output = output.unwrap_or_else(|| config.client.download_dir.clone());
            get(&names, &host, port.unwrap_or(config.client.port), &output, &config).await?;
        }
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

/// Run a standalone server
async fn serve(
    port: Option<u16>,
    dir: Option<PathBuf>,
    bind: Option<String>,
    config: &Config,
) -> anyhow::Result<()> {
    let dir = dir
        .or_else(|| config.server.shared_dir.clone())
        .context("No shared directory: pass --dir or set server.shared_dir")?;

    let mut server_config = config.server_config()?;
    if let Some(bind) = bind {
        server_config.bind_ip = bind
            .parse()
            .with_context(|| format!("Invalid bind address '{bind}'"))?;
    }

    let (server, mut events) = ServerEngine::new(server_config);
    let addr = server.start(port.unwrap_or(config.server.port), &dir).await?;

    println!("ferry server");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Sharing: {}", dir.display());
    println!("Listen: {addr}");
    println!("Press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => log_server_event(&event),
                None => break,
            },
        }
    }

    println!("\nShutting down...");
    server.stop().await?;
    Ok(())
}

fn log_server_event(event: &ServerEvent) {
    match event {
        ServerEvent::Started { addr } => tracing::debug!("Listening on {}", addr),
        ServerEvent::Stopped => tracing::debug!("Stopped"),
        ServerEvent::ClientConnected { id, peer } => {
            tracing::info!("[{}] connected from {}", id, peer);
        }
        ServerEvent::ClientDisconnected { id, peer } => {
            tracing::info!("[{}] {} disconnected", id, peer);
        }
        ServerEvent::ListServed { id, count } => {
            tracing::info!("[{}] listed {} files", id, count);
        }
        ServerEvent::FileRequested { id, name } => {
            tracing::info!("[{}] requested {:?}", id, name);
        }
        ServerEvent::SendProgress { id, name, percent } => {
            tracing::debug!("[{}] {:?} {}%", id, name, percent);
        }
        ServerEvent::FileSent { id, name, size } => {
            tracing::info!("[{}] sent {:?} ({})", id, name, format_bytes(*size));
        }
        ServerEvent::Error { id: Some(id), error } => tracing::warn!("[{}] {}", id, error),
        ServerEvent::Error { id: None, error } => tracing::warn!("{}", error),
    }
}

/// Print a server's file list
async fn list(host: &str, port: u16, config: &Config) -> anyhow::Result<()> {
    let (client, mut events) = ClientEngine::new(config.client_config());
    client.connect(host, port).await?;
    client.request_list().await?;

    let files = loop {
        match next_event(&mut events).await? {
            ClientEvent::ListReceived(files) => break files,
            ClientEvent::Error(e) => return Err(e.into()),
            ClientEvent::ConnectionStateChanged(false) => {
                anyhow::bail!("Connection closed before the list arrived")
            }
            _ => {}
        }
    };
    client.disconnect().await?;

    println!("Files on {host}:{port}:");
    println!();
    let width = files.iter().map(|f| f.name.len()).max().unwrap_or(0);
    for file in &files {
        println!("  {:<width$}  {:>12}", file.name, format_bytes(file.size));
    }
    println!();
    let total: u64 = files.iter().map(|f| f.size).sum();
    println!("{} files, {}", files.len(), format_bytes(total));

    Ok(())
}

/// Download each named file in turn over one connection, reconnecting if a
/// failure dropped it
async fn get(
    names: &[String],
    host: &str,
    port: u16,
    output: &Path,
    config: &Config,
) -> anyhow::Result<()> {
    let (client, mut events) = ClientEngine::new(config.client_config());
    client.connect(host, port).await?;
    println!("Connected to {host}:{port}, saving to {}", output.display());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut failures = 0usize;

    for name in names {
        if let Err(e) = start_download(&client, name, host, port, output).await {
            eprintln!("{name}: {e}");
            failures += 1;
            continue;
        }

        let mut bar: Option<TransferBar> = None;
        let mut stats = TransferProgress::new(name.as_str(), 0);

        loop {
            let event = tokio::select! {
                _ = &mut ctrl_c, if !interrupted => {
                    interrupted = true;
                    client.cancel().await?;
                    continue;
                }
                event = next_event(&mut events) => event?,
            };

            match event {
                ClientEvent::Progress {
                    bytes_received,
                    expected_size,
                    ..
                } => {
                    if stats.bytes_total != expected_size {
                        stats = TransferProgress::new(name.as_str(), expected_size);
                    }
                    stats.update(bytes_received);
                    bar.get_or_insert_with(|| TransferBar::new(expected_size, name))
                        .update(bytes_received);
                }
                ClientEvent::FileReceived { name, size } => {
                    stats.update(size);
                    let summary = format!(
                        "{name}: {} in {} ({})",
                        format_bytes(size),
                        format_duration(stats.elapsed()),
                        stats.speed_string()
                    );
                    match &bar {
                        Some(bar) => bar.finish_with_message(summary),
                        None => println!("{summary}"),
                    }
                    break;
                }
                ClientEvent::Cancelled {
                    name,
                    bytes_received,
                } => {
                    let msg = format!("{name}: cancelled after {}", format_bytes(bytes_received));
                    match &bar {
                        Some(bar) => bar.abandon_with_message(msg),
                        None => println!("{msg}"),
                    }
                    break;
                }
                ClientEvent::Error(e) => {
                    let msg = format!("{name}: {e}");
                    match &bar {
                        Some(bar) => bar.abandon_with_message(msg),
                        None => eprintln!("{msg}"),
                    }
                    failures += 1;
                    break;
                }
                ClientEvent::ConnectionStateChanged(_) | ClientEvent::ListReceived(_) => {}
            }
        }

        if interrupted {
            break;
        }
    }

    client.disconnect().await?;

    if interrupted {
        anyhow::bail!("Interrupted");
    }
    if failures > 0 {
        anyhow::bail!("{} of {} downloads failed", failures, names.len());
    }
    Ok(())
}

/// Send `GET name`, reconnecting first if the previous file dropped the
/// connection
async fn start_download(
    client: &ClientEngine,
    name: &str,
    host: &str,
    port: u16,
    output: &Path,
) -> Result<(), NodeError> {
    match client.request_file(name, output).await {
        Err(NodeError::NotConnected) => {
            tracing::info!("Reconnecting to {}:{}", host, port);
            client.connect(host, port).await?;
            client.request_file(name, output).await
        }
        other => other,
    }
}

async fn next_event(events: &mut UnboundedReceiver<ClientEvent>) -> anyhow::Result<ClientEvent> {
    events.recv().await.context("Client engine stopped")
}

/// Write the default configuration
fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(Config::default_path);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    Config::default().save(&path)?;
    println!("Configuration written to {}", path.display());
    Ok(())
}

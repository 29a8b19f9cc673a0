use anyhow::{anyhow, Result};
use astichat::storage::Storage;
use astichat_server::provision::provision;
use astichat_server::{JsonFileStorage, Server, ServerConfig};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const PASSPHRASE_ENV: &str = "ASTICHAT_PASSPHRASE";

#[derive(Parser, Debug)]
#[command(author, version, about = "Astichat registry server", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Account storage file (overrides the configuration)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an account and write its client credentials bundle
    Provision {
        #[arg(long)]
        username: String,
        /// Where to write the bundle, defaults to `<username>.json`
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        key_bits: Option<usize>,
    },
    /// Run the registry server
    Run {
        #[arg(long)]
        udp_addr: Option<SocketAddr>,
        #[arg(long)]
        http_addr: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(storage) = cli.storage {
        config.storage_path = Some(storage);
    }
    match cli.command {
        Commands::Provision {
            username,
            output,
            key_bits,
        } => {
            if let Some(bits) = key_bits {
                config.key_bits = bits;
            }
            provision_command(config, username, output).await
        }
        Commands::Run { udp_addr, http_addr } => {
            if let Some(addr) = udp_addr {
                config.udp_addr = addr;
            }
            if let Some(addr) = http_addr {
                config.http_addr = addr;
            }
            run_command(config).await
        }
    }
}

async fn provision_command(config: ServerConfig, username: String, output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or_else(|| PathBuf::from(format!("{username}.json")));
    if output.exists() {
        return Err(anyhow!("{} already exists", output.display()));
    }
    let storage = JsonFileStorage::open(config.storage_path()?)?;
    let passphrase = prompt_passphrase_twice(&format!("Passphrase for {username}: "))?;

    let credentials = provision(&storage, &config, &username, &passphrase).await?;
    credentials.save(&output)?;
    println!("Chatterer {} created", credentials.username);
    println!("Credentials written to {}", output.display());
    Ok(())
}

async fn run_command(config: ServerConfig) -> Result<()> {
    let storage_path = config.storage_path()?;
    let storage: Arc<dyn Storage> = Arc::new(JsonFileStorage::open(&storage_path)?);
    info!(storage = %storage_path.display(), "accounts loaded");

    let server = Server::bind(&config, storage).await?;
    let (quit_tx, quit_rx) = watch::channel(false);
    let task = tokio::spawn(server.run(quit_rx));

    shutdown_signal().await?;
    info!("server stopping");
    quit_tx.send(true).ok();
    task.await??;
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    signal::ctrl_c().await?;
    Ok(())
}

fn prompt_passphrase_twice(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) {
        if !passphrase.is_empty() {
            return Ok(Zeroizing::new(passphrase));
        }
    }
    let first = Zeroizing::new(
        rpassword::prompt_password(prompt).map_err(|e| anyhow!("passphrase prompt: {e}"))?,
    );
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm passphrase: ").map_err(|e| anyhow!("passphrase prompt: {e}"))?,
    );
    if first != second {
        return Err(anyhow!("passphrases do not match"));
    }
    Ok(first)
}

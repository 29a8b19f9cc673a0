use anyhow::{anyhow, Context, Result};
use astichat::{Clock, Credentials};
use astichat_client::{render, HttpClient, Session};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const PASSPHRASE_ENV: &str = "ASTICHAT_PASSPHRASE";
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Parser, Debug)]
#[command(author, version, about = "Astichat terminal client", long_about = None)]
struct Cli {
    /// Credentials bundle written by `astichat-server provision`
    #[arg(short, long, global = true)]
    credentials: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Join the chat and relay stdin lines to every peer
    Run {
        /// Local UDP address to listen on
        #[arg(long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
    },
    /// Print a fresh bearer token
    Token,
    /// Print the username in the credentials bundle
    Username,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let cli = Cli::parse();
    let path = match cli.credentials {
        Some(path) => path,
        None => default_credentials_path()?,
    };
    let credentials =
        Credentials::load(&path).with_context(|| format!("reading credentials {}", path.display()))?;

    match cli.command {
        Commands::Username => {
            println!("{}", credentials.username);
            Ok(())
        }
        Commands::Token => token_command(&credentials).await,
        Commands::Run { bind } => run_command(&credentials, bind).await,
    }
}

async fn token_command(credentials: &Credentials) -> Result<()> {
    let passphrase = prompt_passphrase(&credentials.username)?;
    let identity = credentials.identity(Some(passphrase.as_str()))?;
    let http = HttpClient::new(&credentials.server_http_url)?;

    let clock = Clock::new();
    clock.sync_from(&http).await.context("fetching server time")?;
    let token = http.token(&identity, &clock).await?;
    clock.stop();
    println!("{token}");
    Ok(())
}

async fn run_command(credentials: &Credentials, bind: SocketAddr) -> Result<()> {
    let passphrase = prompt_passphrase(&credentials.username)?;
    let identity = credentials.identity(Some(passphrase.as_str()))?;
    let http = HttpClient::new(&credentials.server_http_url)?;

    let (session, mut events) = Session::start(identity, credentials.server_udp_addr, bind, &http).await?;
    info!(local = %session.local_addr()?, "listening for peers");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => println!("{}", render(&event)),
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if let Err(err) = session.say(&line).await {
                        warn!(error = %err, "line not delivered");
                    }
                }
                None => break,
            },
            _ = signal::ctrl_c() => break,
        }
    }

    session.close().await
}

fn default_credentials_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "astichat", "astichat")
        .ok_or_else(|| anyhow!("cannot determine config directory, pass --credentials"))?;
    Ok(dirs.config_dir().join(CREDENTIALS_FILE))
}

fn prompt_passphrase(username: &str) -> Result<Zeroizing<String>> {
    if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) {
        if !passphrase.is_empty() {
            return Ok(Zeroizing::new(passphrase));
        }
    }
    let passphrase = rpassword::prompt_password(format!("Passphrase for {username}: "))
        .map_err(|e| anyhow!("passphrase prompt: {e}"))?;
    Ok(Zeroizing::new(passphrase))
}

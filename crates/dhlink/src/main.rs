//! dhlink
//!
//! Diffie-Hellman key agreement followed by one encrypted message, over TCP.
//! `listen` runs the responder side, `send` the initiator side.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use dhlink::{ClientSettings, ReceivedMessage, ServerSettings, SessionServer, send_message};
use dhlink_core::Config;
use dhlink_core::config::load_config;
use dhlink_core::tracing_init::init_tracing;
use dhlink_session::{AckStatus, SessionOutcome};

#[derive(Parser, Debug)]
#[command(name = "dhlink")]
#[command(version, about = "dhlink - key agreement and single-message sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true)]
    log_json: bool,

    /// Diffie-Hellman modulus size in bits (1024 or 2048).
    #[arg(long, global = true)]
    modulus_bits: Option<u32>,

    /// Cipher suite (des-ecb or chacha20-poly1305).
    #[arg(long, global = true)]
    cipher: Option<String>,

    /// Whole-session deadline in seconds (0 disables it).
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Directory containing `.dhlink/settings.json` (defaults to the current directory).
    #[arg(long, global = true, env = "DHLINK_PROJECT_DIR")]
    project_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept sessions and print each received message.
    Listen {
        /// Address to bind.
        #[arg(long)]
        addr: Option<String>,

        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Serve connections concurrently, one task each.
        #[arg(long)]
        concurrent: bool,

        /// Exit after the first session.
        #[arg(long)]
        once: bool,
    },

    /// Connect to a listener and deliver one message.
    Send {
        /// Message to encrypt and send.
        #[arg(short, long)]
        message: String,

        /// Listener address.
        #[arg(long)]
        addr: Option<String>,

        /// Listener port.
        #[arg(long)]
        port: Option<u16>,

        /// Entry port announced during the preamble.
        #[arg(long)]
        entry_port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let project_dir = match &cli.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let mut config = load_config(Some(project_dir.as_path()))?;
    apply_cli_overrides(&mut config, &cli);
    config.validate()?;

    init_tracing(&config.logging.filter, cli.log_json || config.logging.json);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        modulus_bits = config.crypto.modulus_bits,
        cipher = %config.crypto.cipher,
        "Starting dhlink"
    );

    match &cli.command {
        Command::Listen { once, .. } => listen(&config, *once).await,
        Command::Send { message, .. } => send(&config, message).await,
    }
}

/// CLI flags are the highest-priority configuration layer.
fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(bits) = cli.modulus_bits {
        config.crypto.modulus_bits = bits;
    }
    if let Some(cipher) = &cli.cipher {
        config.crypto.cipher.clone_from(cipher);
    }
    if let Some(secs) = cli.timeout {
        config.transport.session_timeout_secs = secs;
    }
    match &cli.command {
        Command::Listen {
            addr,
            port,
            concurrent,
            ..
        } => {
            if let Some(addr) = addr {
                config.server.bind_addr.clone_from(addr);
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
            if *concurrent {
                config.server.concurrent_sessions = true;
            }
        }
        Command::Send {
            addr,
            port,
            entry_port,
            ..
        } => {
            if let Some(addr) = addr {
                config.client.server_addr.clone_from(addr);
            }
            if let Some(port) = port {
                config.client.server_port = *port;
            }
            if let Some(entry_port) = entry_port {
                config.client.entry_port = *entry_port;
            }
        }
    }
}

async fn listen(config: &Config, once: bool) -> anyhow::Result<()> {
    let server = SessionServer::bind(ServerSettings::from_config(config)?).await?;

    if once {
        tokio::select! {
            result = server.serve_once() => print_received(&result?),
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
            }
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (report_tx, mut report_rx) = mpsc::channel(16);
    let serve_handle = tokio::spawn(server.serve(report_tx, shutdown_rx));

    loop {
        tokio::select! {
            Some(received) = report_rx.recv() => print_received(&received),
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    serve_handle.await??;
    info!("Listener stopped");
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_received(received: &ReceivedMessage) {
    let report = &received.report;
    match report.outcome {
        SessionOutcome::Verified => {
            println!("{}", report.message_lossy());
        }
        SessionOutcome::Mismatch => {
            warn!(peer = %received.peer, "Message delivered under a mismatched key");
            println!("[key mismatch] {}", report.message_lossy());
        }
    }
}

#[allow(clippy::print_stdout)]
async fn send(config: &Config, message: &str) -> anyhow::Result<()> {
    let settings = ClientSettings::from_config(config)?;
    let report = send_message(&settings, message).await?;
    println!("{}", report.config_line);
    println!("{}", report.ack);

    match report.ack_status {
        AckStatus::Verified => Ok(()),
        AckStatus::Mismatch => anyhow::bail!("listener reported a key mismatch"),
        AckStatus::Unrecognised => {
            warn!(ack = %report.ack, "Unrecognised acknowledgment");
            Ok(())
        }
    }
}

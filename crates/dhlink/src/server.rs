//! TCP listener for responder sessions.
//!
//! Every accepted connection gets a fresh [`ResponderSession`](dhlink_session::ResponderSession)
//! with its own keypair. A failed session is logged and the listener keeps
//! accepting.

use std::net::SocketAddr;
use std::time::Duration;

use dhlink_core::Config;
use dhlink_session::{ProtocolOptions, ResponderReport, StreamTransport, run_responder_session};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::with_deadline;

/// Pause after a failed `accept` so persistent errors such as EMFILE do not
/// spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listener settings resolved from [`Config`] and CLI overrides.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub port: u16,
    /// Spawn one task per connection instead of serving them in turn.
    pub concurrent: bool,
    pub max_frame_bytes: usize,
    pub session_timeout_secs: u64,
    pub options: ProtocolOptions,
}

impl ServerSettings {
    pub fn from_config(config: &Config) -> Result<Self, LinkError> {
        Ok(Self {
            bind_addr: config.server.bind_addr.clone(),
            port: config.server.port,
            concurrent: config.server.concurrent_sessions,
            max_frame_bytes: config.transport.max_frame_bytes,
            session_timeout_secs: config.transport.session_timeout_secs,
            options: ProtocolOptions::from_config(config.crypto.modulus_bits, &config.crypto.cipher)?,
        })
    }
}

/// A finished responder session and the peer it came from.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub peer: SocketAddr,
    pub report: ResponderReport,
}

pub struct SessionServer {
    listener: TcpListener,
    settings: ServerSettings,
}

impl SessionServer {
    pub async fn bind(settings: ServerSettings) -> Result<Self, LinkError> {
        let listener = TcpListener::bind((settings.bind_addr.as_str(), settings.port)).await?;
        info!(
            addr = %listener.local_addr()?,
            group = %settings.options.engine.group(),
            cipher = %settings.options.cipher.suite(),
            concurrent = settings.concurrent,
            "Listening for sessions"
        );
        Ok(Self { listener, settings })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.listener.local_addr()?)
    }

    pub const fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Accept a single connection and run one session on it.
    pub async fn serve_once(&self) -> Result<ReceivedMessage, LinkError> {
        let (stream, peer) = self.listener.accept().await?;
        handle_connection(stream, peer, &self.settings).await
    }

    /// Accept connections until `shutdown` changes.
    ///
    /// Completed sessions are sent to `reports`. In sequential mode a running
    /// session finishes (or times out) before shutdown is observed.
    pub async fn serve(
        self,
        reports: mpsc::Sender<ReceivedMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), LinkError> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    if self.settings.concurrent {
                        let settings = self.settings.clone();
                        let reports = reports.clone();
                        tokio::spawn(async move {
                            let result = handle_connection(stream, peer, &settings).await;
                            dispatch(result, peer, &reports).await;
                        });
                    } else {
                        let result = handle_connection(stream, peer, &self.settings).await;
                        dispatch(result, peer, &reports).await;
                    }
                }
                _ = shutdown.changed() => {
                    info!("Listener shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    settings: &ServerSettings,
) -> Result<ReceivedMessage, LinkError> {
    debug!(%peer, "Connection accepted");
    let mut transport = StreamTransport::from_stream(stream, settings.max_frame_bytes);
    let report = with_deadline(
        settings.session_timeout_secs,
        run_responder_session(&mut transport, &settings.options),
    )
    .await?;
    Ok(ReceivedMessage { peer, report })
}

async fn dispatch(
    result: Result<ReceivedMessage, LinkError>,
    peer: SocketAddr,
    reports: &mpsc::Sender<ReceivedMessage>,
) {
    match result {
        Ok(received) => {
            if reports.send(received).await.is_err() {
                debug!(%peer, "Report receiver dropped");
            }
        }
        Err(e) => warn!(%peer, error = %e, "Session failed"),
    }
}

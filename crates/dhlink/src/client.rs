//! TCP connector for initiator sessions.

use dhlink_core::Config;
use dhlink_session::{
    InitiatorReport, InitiatorRequest, ProtocolOptions, StreamTransport, run_initiator_session,
};
use tokio::net::TcpStream;
use tracing::info;

use crate::error::LinkError;
use crate::with_deadline;

/// Connector settings resolved from [`Config`] and CLI overrides.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub server_addr: String,
    pub server_port: u16,
    /// Announced to the responder in the preamble.
    pub entry_port: u16,
    pub max_frame_bytes: usize,
    pub session_timeout_secs: u64,
    pub options: ProtocolOptions,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Result<Self, LinkError> {
        Ok(Self {
            server_addr: config.client.server_addr.clone(),
            server_port: config.client.server_port,
            entry_port: config.client.entry_port,
            max_frame_bytes: config.transport.max_frame_bytes,
            session_timeout_secs: config.transport.session_timeout_secs,
            options: ProtocolOptions::from_config(config.crypto.modulus_bits, &config.crypto.cipher)?,
        })
    }
}

/// Connect to a listener and deliver `message` in one session.
///
/// The deadline covers the TCP connect as well as the session itself.
pub async fn send_message(
    settings: &ClientSettings,
    message: &str,
) -> Result<InitiatorReport, LinkError> {
    let request = InitiatorRequest {
        entry_port: settings.entry_port,
        message: message.to_string(),
    };
    with_deadline(settings.session_timeout_secs, async {
        let stream =
            TcpStream::connect((settings.server_addr.as_str(), settings.server_port)).await?;
        let peer = stream.peer_addr()?;
        info!(%peer, entry_port = settings.entry_port, "Connected to listener");

        let mut transport = StreamTransport::from_stream(stream, settings.max_frame_bytes);
        Ok::<_, LinkError>(
            run_initiator_session(&mut transport, &settings.options, &request).await?,
        )
    })
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_config() {
        let mut config = Config::default();
        config.client.server_addr = "10.0.0.7".to_string();
        config.client.entry_port = 4444;
        config.transport.session_timeout_secs = 0;

        let settings = ClientSettings::from_config(&config).unwrap();
        assert_eq!(settings.server_addr, "10.0.0.7");
        assert_eq!(settings.server_port, 5000);
        assert_eq!(settings.entry_port, 4444);
        assert_eq!(settings.session_timeout_secs, 0);
    }

    #[tokio::test]
    async fn refused_connection_is_an_io_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = Config::default();
        config.client.server_port = port;
        let settings = ClientSettings::from_config(&config).unwrap();
        let result = send_message(&settings, "hello").await;
        assert!(matches!(result, Err(LinkError::Io(_))));
    }

    #[tokio::test]
    async fn silent_listener_hits_the_deadline() {
        // Accepts the connection but never sends the prompt.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut config = Config::default();
        config.client.server_port = port;
        config.transport.session_timeout_secs = 1;
        let settings = ClientSettings::from_config(&config).unwrap();

        let (result, accepted) = tokio::join!(send_message(&settings, "hello"), listener.accept());
        let _held = accepted.unwrap();
        assert!(matches!(result, Err(LinkError::Timeout { secs: 1 })));
    }
}

//! dhlink networking
//!
//! TCP plumbing around the session protocol:
//! - `server`: listener that runs one responder session per connection
//! - `client`: connector that runs one initiator session
//!
//! Both impose the optional whole-session deadline from configuration.

pub mod client;
pub mod error;
pub mod server;

pub use client::{ClientSettings, send_message};
pub use error::LinkError;
pub use server::{ReceivedMessage, ServerSettings, SessionServer};

use std::future::Future;
use std::time::Duration;

/// Run `session` under a deadline of `secs` seconds. Zero means no deadline.
pub(crate) async fn with_deadline<T, E, F>(secs: u64, session: F) -> Result<T, LinkError>
where
    F: Future<Output = Result<T, E>>,
    LinkError: From<E>,
{
    if secs == 0 {
        return Ok(session.await?);
    }
    match tokio::time::timeout(Duration::from_secs(secs), session).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(LinkError::Timeout { secs }),
    }
}

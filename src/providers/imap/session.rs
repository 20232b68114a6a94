//! IMAP session management.
//!
//! One [`ImapStore`] is created per aggregation run and discarded at the
//! end; there is no connection pooling. Every transport fault is mapped to
//! a typed [`SessionError`] so callers pattern-match instead of inspecting
//! status strings, and nothing here can take down the run.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use super::SearchQuery;
use crate::config::ImapSettings;

/// Errors raised by mailbox access.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Login rejected or credentials invalid.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The configured folder does not exist or cannot be selected.
    #[error("folder selection failed: {0}")]
    Folder(String),

    /// A search could not be executed. Localized to one sensor pass.
    #[error("search failed: {0}")]
    Search(String),

    /// A message could not be fetched or carried no body.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// TCP or TLS setup failed.
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Result type for mailbox operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Read access to one selected mailbox folder.
///
/// The extractors only ever search and fetch, so this is the whole seam;
/// tests substitute an in-memory mailbox.
#[async_trait]
pub trait MailStore: Send {
    /// Runs a `UID SEARCH` and returns matching UIDs in ascending order.
    /// An absent result payload normalizes to an empty list.
    async fn search(&mut self, query: &SearchQuery) -> Result<Vec<u32>>;

    /// Fetches the raw RFC 5322 bytes of one message.
    async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>>;
}

/// Type alias for the IMAP session with TLS (using tokio-util compat layer).
type TlsSession = async_imap::Session<Compat<TlsStream<TcpStream>>>;

/// [`MailStore`] over a real IMAP server on a rustls TLS stream.
pub struct ImapStore {
    session: TlsSession,
}

impl ImapStore {
    /// Connects, logs in, and selects the configured folder.
    ///
    /// The three failure classes stay distinct so the aggregator can log
    /// them at the right level before short-circuiting to an empty
    /// snapshot.
    pub async fn connect(settings: &ImapSettings) -> Result<Self> {
        let tls_stream = Self::connect_tls(&settings.host, settings.port).await?;
        let client = async_imap::Client::new(tls_stream);

        let mut session = client
            .login(&settings.username, &settings.password)
            .await
            .map_err(|e| SessionError::Auth(format!("IMAP login failed: {:?}", e.0)))?;

        session.select(&settings.folder).await.map_err(|e| {
            SessionError::Folder(format!("SELECT {} failed: {}", settings.folder, e))
        })?;

        tracing::debug!(host = %settings.host, folder = %settings.folder, "IMAP session ready");
        Ok(Self { session })
    }

    /// Establishes a TLS connection with the futures compat wrapper.
    async fn connect_tls(host: &str, port: u16) -> Result<Compat<TlsStream<TcpStream>>> {
        let tcp_stream = TcpStream::connect(format!("{}:{}", host, port))
            .await
            .map_err(|e| SessionError::Connection(format!("TCP connect failed: {}", e)))?;

        let config = ClientConfig::builder()
            .with_root_certificates(tokio_rustls::rustls::RootCertStore::from_iter(
                webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
            ))
            .with_no_client_auth();

        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| SessionError::Connection(format!("invalid server name: {}", e)))?;

        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| SessionError::Connection(format!("TLS handshake failed: {}", e)))?;

        // Wrap with tokio-util compat layer for futures async read/write traits
        Ok(tls_stream.compat())
    }

    /// Best-effort logout at the end of a run.
    pub async fn logout(mut self) {
        if let Err(e) = self.session.logout().await {
            tracing::debug!(error = %e, "IMAP logout failed");
        }
    }
}

#[async_trait]
impl MailStore for ImapStore {
    async fn search(&mut self, query: &SearchQuery) -> Result<Vec<u32>> {
        // Non-ASCII subjects need an explicit charset; async-imap builds
        // the command as `UID SEARCH <criteria>`, so the charset rides in
        // front of the criteria.
        let criteria = if query.utf8 {
            format!("CHARSET UTF-8 {}", query.criteria)
        } else {
            query.criteria.clone()
        };

        let uids = self
            .session
            .uid_search(&criteria)
            .await
            .map_err(|e| SessionError::Search(format!("UID SEARCH failed: {}", e)))?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>> {
        let mut stream = self
            .session
            .uid_fetch(uid.to_string(), "(UID FLAGS BODY[])")
            .await
            .map_err(|e| SessionError::Fetch(format!("UID FETCH failed: {}", e)))?;

        while let Some(fetch_result) = stream.next().await {
            let fetch = fetch_result
                .map_err(|e| SessionError::Fetch(format!("UID FETCH stream: {}", e)))?;
            if let Some(body) = fetch.body() {
                return Ok(body.to_vec());
            }
        }

        Err(SessionError::Fetch(format!("no body returned for uid {uid}")))
    }
}

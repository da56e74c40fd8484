//! Connection seam between the dispatcher and provider transports

use async_trait::async_trait;
use embermail_common::types::ProviderConfig;
use lettre::address::Envelope;
use thiserror::Error;
use tracing::warn;

/// Connect-stage failures. Anything here means the provider cannot be used
/// at all; the remainder of the run is failed uniformly.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Credentials rejected at connect time. Reported distinctly from send
    /// failures so callers can tell a bad password from a flaky network.
    #[error("Authentication rejected by {host}: {detail}")]
    Auth { host: String, detail: String },

    #[error("Connection to {host}:{port} failed: {detail}")]
    Network {
        host: String,
        port: u16,
        detail: String,
    },

    #[error("Invalid provider configuration: {0}")]
    Config(String),
}

/// Per-send failures, isolated to one unit of work
#[derive(Error, Debug)]
pub enum SendError {
    /// The connection went away mid-run. The managed connection retries
    /// once on a fresh connection before surfacing this.
    #[error("Connection dropped: {0}")]
    ConnectionDropped(String),

    /// The provider rejected this message or recipient
    #[error("Rejected by provider: {0}")]
    Rejected(String),

    /// The recipient itself is unusable: malformed address or number,
    /// unknown carrier
    #[error("{0}")]
    Recipient(String),

    /// Gateway-SMS auto mode: every candidate domain failed
    #[error("All gateway domains failed (tried {}); last error: {last}", .tried.join(", "))]
    GatewayExhausted { tried: Vec<String>, last: String },

    /// The connection cannot carry this message type
    #[error("Unsupported message for this provider: {0}")]
    Unsupported(String),
}

/// What a successful submission reports back
#[derive(Debug, Clone, Default)]
pub struct SendReceipt {
    /// Provider-assigned detail, e.g. a cloud API message id
    pub detail: Option<String>,
}

/// A provider-native message ready to hand to a connection
#[derive(Debug, Clone)]
pub enum WireMessage {
    /// RFC 5322 bytes plus the SMTP envelope to submit them under. The
    /// envelope may carry more recipients than the visible headers (BCC
    /// batching).
    Email { envelope: Envelope, data: Vec<u8> },

    /// A cloud-API SMS
    Sms { to: String, body: String },
}

/// One live connection to a provider
#[async_trait]
pub trait ProviderConnection: Send {
    /// Submit one message. Implementations do not retry.
    async fn send(&mut self, message: &WireMessage) -> Result<SendReceipt, SendError>;

    /// Tear the connection down. Safe to call more than once.
    async fn close(&mut self);
}

/// Opens authenticated connections to providers
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(
        &self,
        provider: &ProviderConfig,
    ) -> Result<Box<dyn ProviderConnection>, ConnectError>;
}

/// A live connection plus the config that opened it. Applies the
/// reconnect-once policy: a send failing with a dropped connection is
/// retried exactly once on a fresh connection, and the second consecutive
/// failure surfaces to the caller as a per-unit error.
pub struct ManagedConnection<'a> {
    connector: &'a dyn ProviderConnector,
    provider: ProviderConfig,
    inner: Box<dyn ProviderConnection>,
}

impl<'a> ManagedConnection<'a> {
    /// Open a connection to the given provider
    pub async fn open(
        connector: &'a dyn ProviderConnector,
        provider: &ProviderConfig,
    ) -> Result<ManagedConnection<'a>, ConnectError> {
        let inner = connector.connect(provider).await?;
        Ok(ManagedConnection {
            connector,
            provider: provider.clone(),
            inner,
        })
    }

    /// The provider this connection is bound to
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Send one message, transparently reconnecting once if the server
    /// dropped the connection
    pub async fn send(&mut self, message: &WireMessage) -> Result<SendReceipt, SendError> {
        match self.inner.send(message).await {
            Err(SendError::ConnectionDropped(detail)) => {
                warn!(
                    provider = %self.provider.name,
                    %detail,
                    "Connection dropped, reconnecting once"
                );
                self.inner.close().await;
                match self.connector.connect(&self.provider).await {
                    Ok(fresh) => {
                        self.inner = fresh;
                        self.inner.send(message).await
                    }
                    Err(err) => Err(SendError::ConnectionDropped(err.to_string())),
                }
            }
            other => other,
        }
    }

    /// Close the current connection and open one to a different provider
    pub async fn rotate_to(&mut self, provider: &ProviderConfig) -> Result<(), ConnectError> {
        self.inner.close().await;
        self.inner = self.connector.connect(provider).await?;
        self.provider = provider.clone();
        Ok(())
    }

    /// Close the connection. Called on every exit path of a run.
    pub async fn close(&mut self) {
        self.inner.close().await;
    }
}

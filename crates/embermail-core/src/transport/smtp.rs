//! SMTP transport backed by lettre

use std::time::Duration;

use async_trait::async_trait;
use embermail_common::presets;
use embermail_common::types::{ProviderConfig, ProviderKind, TransportSecurity};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::{debug, info};

use super::connection::{
    ConnectError, ProviderConnection, ProviderConnector, SendError, SendReceipt, WireMessage,
};
use super::sms::CloudSmsConnection;

/// Conventional submission port that some networks block
const SUBMISSION_PORT: u16 = 587;
/// Implicit-TLS submission port used by the connect fallback
const SMTPS_PORT: u16 = 465;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Production connector: SMTP connections via lettre, or an HTTP client
/// for `cloud-sms-api` providers.
pub struct SmtpConnector;

#[async_trait]
impl ProviderConnector for SmtpConnector {
    async fn connect(
        &self,
        provider: &ProviderConfig,
    ) -> Result<Box<dyn ProviderConnection>, ConnectError> {
        if provider.kind == ProviderKind::CloudSmsApi {
            return Ok(Box::new(CloudSmsConnection::new(provider)?));
        }

        match open_transport(provider, provider.port, provider.security).await {
            Ok(transport) => Ok(Box::new(SmtpConnection::new(provider, transport))),
            Err(err) if fallback_eligible(provider, &err) => {
                info!(
                    host = %provider.host,
                    "Port 587 unreachable, retrying on 465 with implicit TLS"
                );
                let transport =
                    open_transport(provider, SMTPS_PORT, TransportSecurity::ImplicitTls).await?;
                Ok(Box::new(SmtpConnection::new(provider, transport)))
            }
            Err(err) => Err(err),
        }
    }
}

/// The 587-to-465 fallback applies only to transient network failures
/// against hosts known to answer on both ports. Auth failures and anything
/// that does not look like a blocked port pass through untouched.
fn fallback_eligible(provider: &ProviderConfig, err: &ConnectError) -> bool {
    let ConnectError::Network { detail, .. } = err else {
        return false;
    };
    provider.port == SUBMISSION_PORT
        && presets::answers_on_implicit_tls(&provider.host)
        && is_transient_network(detail)
}

fn is_transient_network(detail: &str) -> bool {
    let detail = detail.to_ascii_lowercase();
    detail.contains("timed out")
        || detail.contains("timeout")
        || detail.contains("refused")
        || detail.contains("reset")
        || detail.contains("broken pipe")
}

async fn open_transport(
    provider: &ProviderConfig,
    port: u16,
    security: TransportSecurity,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, ConnectError> {
    let network_err = |detail: String| ConnectError::Network {
        host: provider.host.clone(),
        port,
        detail,
    };

    let builder = match security {
        TransportSecurity::ImplicitTls => {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&provider.host)
                .map_err(|e| network_err(e.to_string()))?
        }
        TransportSecurity::Starttls => {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&provider.host)
                .map_err(|e| network_err(e.to_string()))?
        }
        TransportSecurity::Plain => {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&provider.host)
        }
    };

    let mut builder = builder.port(port).timeout(Some(SMTP_TIMEOUT));
    if !provider.no_auth {
        builder = builder.credentials(Credentials::new(
            provider.username().to_string(),
            provider.password.clone().unwrap_or_default(),
        ));
    }
    let transport = builder.build();

    // Drives the handshake, TLS negotiation and AUTH now, so a rejected
    // credential fails the run at the gate instead of on the first unit
    match transport.test_connection().await {
        Ok(true) => Ok(transport),
        Ok(false) => Err(network_err(
            "server closed the connection during handshake".to_string(),
        )),
        Err(err) => Err(classify_connect_error(provider, port, &err)),
    }
}

fn classify_connect_error(
    provider: &ProviderConfig,
    port: u16,
    err: &lettre::transport::smtp::Error,
) -> ConnectError {
    if !provider.no_auth && err.is_permanent() {
        ConnectError::Auth {
            host: provider.host.clone(),
            detail: err.to_string(),
        }
    } else {
        ConnectError::Network {
            host: provider.host.clone(),
            port,
            detail: err.to_string(),
        }
    }
}

/// One authenticated SMTP connection, reused across all units routed to
/// its provider until rotation or run end.
pub struct SmtpConnection {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    host: String,
}

impl SmtpConnection {
    fn new(provider: &ProviderConfig, transport: AsyncSmtpTransport<Tokio1Executor>) -> Self {
        Self {
            transport: Some(transport),
            host: provider.host.clone(),
        }
    }
}

#[async_trait]
impl ProviderConnection for SmtpConnection {
    async fn send(&mut self, message: &WireMessage) -> Result<SendReceipt, SendError> {
        let (envelope, data) = match message {
            WireMessage::Email { envelope, data } => (envelope, data),
            WireMessage::Sms { .. } => {
                return Err(SendError::Unsupported(
                    "SMTP connections carry email only".to_string(),
                ))
            }
        };
        let transport = self.transport.as_ref().ok_or_else(|| {
            SendError::ConnectionDropped("connection already closed".to_string())
        })?;

        match transport.send_raw(envelope, data).await {
            Ok(response) => {
                debug!(host = %self.host, code = %response.code(), "Message accepted");
                Ok(SendReceipt::default())
            }
            Err(err) => Err(classify_send_error(&err)),
        }
    }

    async fn close(&mut self) {
        // Dropping the transport tears the pooled connection down
        if self.transport.take().is_some() {
            debug!(host = %self.host, "SMTP connection closed");
        }
    }
}

fn classify_send_error(err: &lettre::transport::smtp::Error) -> SendError {
    if err.is_permanent() || err.is_transient() {
        // The server answered; this unit was refused but the connection
        // still stands
        SendError::Rejected(err.to_string())
    } else {
        // Timeouts, resets and TLS teardown all mean the connection is gone
        SendError::ConnectionDropped(err.to_string())
    }
}

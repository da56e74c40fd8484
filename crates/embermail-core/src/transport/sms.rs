//! Cloud SMS API transport

use std::time::Duration;

use async_trait::async_trait;
use embermail_common::types::ProviderConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::connection::{ConnectError, ProviderConnection, SendError, SendReceipt, WireMessage};

const API_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SmsRequest<'a> {
    from: &'a str,
    to: &'a str,
    message: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct SmsResponse {
    message_id: Option<String>,
    error: Option<String>,
}

/// HTTP connection to a cloud SMS API. The provider's `host` is the
/// endpoint base URL and the API key rides as a bearer token; messages go
/// to `POST {endpoint}/messages`.
pub struct CloudSmsConnection {
    client: Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl CloudSmsConnection {
    pub fn new(provider: &ProviderConfig) -> Result<Self, ConnectError> {
        let api_key = provider.api_key.clone().ok_or_else(|| {
            ConnectError::Config("cloud-sms-api provider requires an api_key".to_string())
        })?;

        let host = provider.host.trim_end_matches('/');
        let endpoint = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };

        let client = Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| ConnectError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            from: provider.sender.clone(),
        })
    }
}

#[async_trait]
impl ProviderConnection for CloudSmsConnection {
    async fn send(&mut self, message: &WireMessage) -> Result<SendReceipt, SendError> {
        let (to, body) = match message {
            WireMessage::Sms { to, body } => (to, body),
            WireMessage::Email { .. } => {
                return Err(SendError::Unsupported(
                    "cloud SMS connections carry SMS only".to_string(),
                ))
            }
        };

        let request = SmsRequest {
            from: &self.from,
            to,
            message: body,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    SendError::ConnectionDropped(e.to_string())
                } else {
                    SendError::Rejected(e.to_string())
                }
            })?;

        let status = response.status();
        let parsed: SmsResponse = response.json().await.unwrap_or_default();

        if status.is_success() {
            debug!(to = %to, id = ?parsed.message_id, "SMS accepted by API");
            let detail = parsed
                .message_id
                .map(|id| format!("Accepted by SMS API (id {id})"));
            Ok(SendReceipt { detail })
        } else {
            let detail = parsed
                .error
                .unwrap_or_else(|| format!("API returned {status}"));
            if status.is_server_error() {
                Err(SendError::ConnectionDropped(detail))
            } else {
                Err(SendError::Rejected(detail))
            }
        }
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use embermail_common::types::{ProviderKind, TransportSecurity};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(endpoint: &str) -> ProviderConfig {
        ProviderConfig {
            name: "cloud".to_string(),
            kind: ProviderKind::CloudSmsApi,
            host: endpoint.to_string(),
            port: 443,
            security: TransportSecurity::ImplicitTls,
            sender: "+15550001111".to_string(),
            username: None,
            password: None,
            no_auth: false,
            api_key: Some("test-key".to_string()),
        }
    }

    fn sms(to: &str) -> WireMessage {
        WireMessage::Sms {
            to: to.to_string(),
            body: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_posts_json_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_json(serde_json::json!({
                "from": "+15550001111",
                "to": "+15551234567",
                "message": "hello",
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "message_id": "abc123" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut conn = CloudSmsConnection::new(&provider_for(&server.uri())).unwrap();
        let receipt = conn.send(&sms("+15551234567")).await.unwrap();
        assert_eq!(
            receipt.detail.as_deref(),
            Some("Accepted by SMS API (id abc123)")
        );
    }

    #[tokio::test]
    async fn test_client_error_is_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "error": "invalid destination" })),
            )
            .mount(&server)
            .await;

        let mut conn = CloudSmsConnection::new(&provider_for(&server.uri())).unwrap();
        let err = conn.send(&sms("bogus")).await.unwrap_err();
        assert!(matches!(err, SendError::Rejected(detail) if detail == "invalid destination"));
    }

    #[tokio::test]
    async fn test_server_error_reads_as_dropped_connection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let mut conn = CloudSmsConnection::new(&provider_for(&server.uri())).unwrap();
        let err = conn.send(&sms("+15551234567")).await.unwrap_err();
        assert!(matches!(err, SendError::ConnectionDropped(_)));
    }

    #[test]
    fn test_missing_api_key_is_a_config_error() {
        let mut provider = provider_for("https://sms.example.com");
        provider.api_key = None;
        assert!(matches!(
            CloudSmsConnection::new(&provider),
            Err(ConnectError::Config(_))
        ));
    }
}

//! Core domain types for the dispatch engine

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A single message destination: an email address, or a phone number with
/// its carrier (or the `auto` sentinel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipient {
    Email { address: String },
    Phone { number: String, carrier: String },
}

impl Recipient {
    /// Create an email recipient
    pub fn email(address: impl Into<String>) -> Self {
        Self::Email {
            address: address.into(),
        }
    }

    /// Create a phone recipient
    pub fn phone(number: impl Into<String>, carrier: impl Into<String>) -> Self {
        Self::Phone {
            number: number.into(),
            carrier: carrier.into(),
        }
    }

    /// Normalize and validate the recipient. Emails are trimmed and
    /// lower-cased and must have a non-empty local part and domain; phone
    /// numbers must contain at least ten digits. Returns `None` for
    /// malformed entries, which are dropped before a run.
    pub fn normalized(&self) -> Option<Self> {
        match self {
            Self::Email { address } => {
                let address = address.trim().to_ascii_lowercase();
                let (local, domain) = address.split_once('@')?;
                if local.is_empty() || domain.is_empty() {
                    return None;
                }
                Some(Self::Email { address })
            }
            Self::Phone { number, carrier } => {
                let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.len() < 10 {
                    return None;
                }
                Some(Self::Phone {
                    number: number.trim().to_string(),
                    carrier: carrier.trim().to_string(),
                })
            }
        }
    }

    /// Key used to collapse duplicates: the normalized email address, or
    /// the last ten digits of the phone number.
    pub fn dedupe_key(&self) -> String {
        match self {
            Self::Email { address } => address.trim().to_ascii_lowercase(),
            Self::Phone { number, .. } => {
                let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
                let start = digits.len().saturating_sub(10);
                digits[start..].to_string()
            }
        }
    }

    /// Last ten digits of a phone recipient, as used for gateway
    /// addressing. `None` for email recipients or short numbers.
    pub fn phone_digits(&self) -> Option<String> {
        match self {
            Self::Email { .. } => None,
            Self::Phone { number, .. } => {
                let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.len() < 10 {
                    None
                } else {
                    Some(digits[digits.len() - 10..].to_string())
                }
            }
        }
    }

    /// The raw identity string, as shown in results and used by the
    /// `{email}` template token.
    pub fn identity(&self) -> &str {
        match self {
            Self::Email { address } => address,
            Self::Phone { number, .. } => number,
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identity())
    }
}

/// Normalize, validate and dedupe a raw recipient set. Malformed entries
/// are dropped, the first occurrence of a duplicate wins, and input order
/// is otherwise preserved.
pub fn normalize_recipients(raw: &[Recipient]) -> Vec<Recipient> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for recipient in raw {
        if let Some(normalized) = recipient.normalized() {
            if seen.insert(normalized.dedupe_key()) {
                out.push(normalized);
            }
        }
    }
    out
}

/// What kind of endpoint a provider is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// SMTP submission endpoint used for regular email
    SmtpEmail,
    /// SMTP submission endpoint used to reach carrier email-to-SMS gateways
    SmtpSmsGateway,
    /// HTTP SMS API endpoint
    CloudSmsApi,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SmtpEmail => write!(f, "smtp-email"),
            Self::SmtpSmsGateway => write!(f, "smtp-sms-gateway"),
            Self::CloudSmsApi => write!(f, "cloud-sms-api"),
        }
    }
}

/// Transport security for the SMTP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportSecurity {
    /// Cleartext, no upgrade
    Plain,
    /// Cleartext connect, upgraded in place
    Starttls,
    /// TLS-wrapped socket from the first byte
    ImplicitTls,
}

/// Connection and authentication parameters for one messaging provider.
/// Immutable once a dispatch run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name used in logs and results
    pub name: String,

    #[serde(default = "default_provider_kind")]
    pub kind: ProviderKind,

    /// SMTP host, or endpoint base URL for `cloud-sms-api`
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_security")]
    pub security: TransportSecurity,

    /// Sender identity: an email address for SMTP kinds, the from-number
    /// for a cloud SMS API
    pub sender: String,

    /// Login username; defaults to `sender` when absent
    pub username: Option<String>,

    pub password: Option<String>,

    /// Skip authentication (e.g. Office 365 Direct Send)
    #[serde(default)]
    pub no_auth: bool,

    /// API key for `cloud-sms-api` providers
    pub api_key: Option<String>,
}

fn default_provider_kind() -> ProviderKind {
    ProviderKind::SmtpEmail
}

fn default_port() -> u16 {
    587
}

fn default_security() -> TransportSecurity {
    TransportSecurity::Starttls
}

impl ProviderConfig {
    /// Validate the configuration before a run starts
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Provider '{}' has no host",
                self.name
            )));
        }
        if self.port == 0 {
            return Err(Error::Validation(format!(
                "Provider '{}' port must be 1-65535",
                self.name
            )));
        }
        match self.kind {
            ProviderKind::SmtpEmail | ProviderKind::SmtpSmsGateway => {
                if !self.sender.contains('@') {
                    return Err(Error::Validation(format!(
                        "Provider '{}' sender must be an email address",
                        self.name
                    )));
                }
                if !self.no_auth && self.password.is_none() {
                    return Err(Error::Validation(format!(
                        "Provider '{}' requires a password unless no_auth is set",
                        self.name
                    )));
                }
                if self.kind == ProviderKind::SmtpSmsGateway && crate::gateways::all().is_empty() {
                    return Err(Error::Validation(
                        "No carrier gateway table available".to_string(),
                    ));
                }
            }
            ProviderKind::CloudSmsApi => {
                if self.api_key.is_none() {
                    return Err(Error::Validation(format!(
                        "Provider '{}' requires an api_key",
                        self.name
                    )));
                }
                if self.sender.trim().is_empty() {
                    return Err(Error::Validation(format!(
                        "Provider '{}' requires a from-number sender",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Login username, falling back to the sender address
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.sender)
    }

    /// Domain of the sender address, used for Message-ID generation
    pub fn sender_domain(&self) -> &str {
        self.sender
            .split_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or("localhost")
    }
}

/// One binary attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
}

/// The message to deliver, before per-recipient personalization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageTemplate {
    /// Subject line; ignored for SMS
    pub subject: Option<String>,

    /// Plain-text body
    #[serde(default)]
    pub text_body: String,

    /// HTML alternative body
    pub html_body: Option<String>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    /// Display name for the From header
    pub sender_name: Option<String>,
}

impl MessageTemplate {
    /// At least one of the plain/HTML bodies must be non-empty
    pub fn validate(&self) -> Result<()> {
        let has_text = !self.text_body.trim().is_empty();
        let has_html = self
            .html_body
            .as_ref()
            .is_some_and(|html| !html.trim().is_empty());
        if !has_text && !has_html {
            return Err(Error::Validation(
                "Message template has no body".to_string(),
            ));
        }
        Ok(())
    }
}

/// How recipients are turned into wire sends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SendMode {
    /// One message per recipient
    #[default]
    Direct,
    /// One message per batch, recipients in the envelope only. Content is
    /// personalized to the first recipient of each batch; provider BCC
    /// size limits are the caller's concern.
    BccBatch,
    /// Carrier email-to-SMS gateway per recipient
    Gateway,
}

/// Throughput and behavior knobs for one dispatch run. The defaults
/// preserve single-connection, no-delay, no-rotation behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPolicy {
    #[serde(default)]
    pub mode: SendMode,

    /// Recipients per BCC batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between units, in seconds; 0 disables pacing
    #[serde(default)]
    pub delay_seconds: u64,

    /// Pause only after every N units; 0 pauses after every unit
    #[serde(default)]
    pub delay_every_n: u32,

    /// Rotate to the next provider after N units; 0 disables rotation
    #[serde(default)]
    pub rotate_after_n: u32,

    #[serde(default)]
    pub enable_tracking: bool,

    #[serde(default)]
    pub enable_patterns: bool,

    /// Base URL of the tracking endpoint; without it, tracking falls back
    /// to an inert HTML comment marker
    pub tracking_url: Option<String>,
}

fn default_batch_size() -> usize {
    50
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            mode: SendMode::Direct,
            batch_size: default_batch_size(),
            delay_seconds: 0,
            delay_every_n: 0,
            rotate_after_n: 0,
            enable_tracking: false,
            enable_patterns: false,
            tracking_url: None,
        }
    }
}

/// One record per recipient per run. Append-only; never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub recipient: String,
    pub success: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryResult {
    /// Record a successful delivery
    pub fn sent(
        recipient: &Recipient,
        detail: impl Into<String>,
        tracking_id: Option<String>,
        provider: &str,
    ) -> Self {
        Self {
            recipient: recipient.identity().to_string(),
            success: true,
            detail: detail.into(),
            tracking_id,
            provider: Some(provider.to_string()),
            timestamp: Utc::now(),
        }
    }

    /// Record a failed delivery
    pub fn failed(recipient: &Recipient, detail: impl Into<String>, provider: Option<&str>) -> Self {
        Self {
            recipient: recipient.identity().to_string(),
            success: false,
            detail: detail.into(),
            tracking_id: None,
            provider: provider.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    /// Override the timestamp, e.g. to stamp a whole batch with its send
    /// time
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_email_normalization() {
        let recipient = Recipient::email("  User@Example.COM ");
        assert_eq!(
            recipient.normalized(),
            Some(Recipient::email("user@example.com"))
        );
        assert_eq!(Recipient::email("bad-email").normalized(), None);
        assert_eq!(Recipient::email("@example.com").normalized(), None);
        assert_eq!(Recipient::email("user@").normalized(), None);
    }

    #[test]
    fn test_phone_normalization() {
        let recipient = Recipient::phone("(321) 367-5667", "Verizon");
        assert_eq!(
            recipient.normalized(),
            Some(Recipient::phone("(321) 367-5667", "Verizon"))
        );
        assert_eq!(recipient.phone_digits().as_deref(), Some("3213675667"));
        assert_eq!(Recipient::phone("12345", "Verizon").normalized(), None);
    }

    #[test]
    fn test_phone_dedupe_key_uses_last_ten_digits() {
        let a = Recipient::phone("+1 321-367-5667", "att");
        let b = Recipient::phone("3213675667", "verizon");
        assert_eq!(a.dedupe_key(), b.dedupe_key());
    }

    #[test]
    fn test_normalize_recipients_drops_and_dedupes() {
        let raw = vec![
            Recipient::email("a@x.com"),
            Recipient::email("bad-email"),
            Recipient::email("b@x.com"),
            Recipient::email("A@X.com"),
        ];
        let unique = normalize_recipients(&raw);
        assert_eq!(
            unique,
            vec![Recipient::email("a@x.com"), Recipient::email("b@x.com")]
        );
    }

    #[test]
    fn test_provider_validation() {
        let mut provider = ProviderConfig {
            name: "test".to_string(),
            kind: ProviderKind::SmtpEmail,
            host: "smtp.example.com".to_string(),
            port: 587,
            security: TransportSecurity::Starttls,
            sender: "sender@example.com".to_string(),
            username: None,
            password: Some("secret".to_string()),
            no_auth: false,
            api_key: None,
        };
        assert!(provider.validate().is_ok());
        assert_eq!(provider.username(), "sender@example.com");
        assert_eq!(provider.sender_domain(), "example.com");

        provider.port = 0;
        assert!(provider.validate().is_err());
        provider.port = 587;

        provider.password = None;
        assert!(provider.validate().is_err());
        provider.no_auth = true;
        assert!(provider.validate().is_ok());
    }

    #[test]
    fn test_cloud_provider_requires_api_key() {
        let provider = ProviderConfig {
            name: "sms".to_string(),
            kind: ProviderKind::CloudSmsApi,
            host: "https://sms.example.com".to_string(),
            port: 443,
            security: TransportSecurity::ImplicitTls,
            sender: "+15550001111".to_string(),
            username: None,
            password: None,
            no_auth: false,
            api_key: None,
        };
        assert!(provider.validate().is_err());
    }

    #[test]
    fn test_template_requires_a_body() {
        let mut template = MessageTemplate::default();
        assert!(template.validate().is_err());
        template.text_body = "hello".to_string();
        assert!(template.validate().is_ok());

        let html_only = MessageTemplate {
            html_body: Some("<p>hello</p>".to_string()),
            ..MessageTemplate::default()
        };
        assert!(html_only.validate().is_ok());
    }

    #[test]
    fn test_policy_defaults_preserve_legacy_behavior() {
        let policy = DispatchPolicy::default();
        assert_eq!(policy.mode, SendMode::Direct);
        assert_eq!(policy.batch_size, 50);
        assert_eq!(policy.delay_seconds, 0);
        assert_eq!(policy.rotate_after_n, 0);
        assert!(!policy.enable_tracking);
        assert!(!policy.enable_patterns);
    }

    #[test]
    fn test_delivery_result_roundtrip() {
        let result = DeliveryResult::sent(
            &Recipient::email("a@x.com"),
            "Sent successfully",
            Some("abc".to_string()),
            "gmail",
        );
        let json = serde_json::to_string(&result).unwrap();
        let parsed: DeliveryResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.recipient, "a@x.com");
        assert!(parsed.success);
        assert_eq!(parsed.provider.as_deref(), Some("gmail"));
    }
}

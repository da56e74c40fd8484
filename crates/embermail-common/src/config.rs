//! Configuration for embermail

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{
    Attachment, DispatchPolicy, MessageTemplate, ProviderConfig, ProviderKind, TransportSecurity,
};
use crate::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Sending providers, in rotation order
    #[serde(default, rename = "provider")]
    pub providers: Vec<ProviderEntry>,

    /// Throughput and behavior policy
    #[serde(default)]
    pub policy: DispatchPolicy,

    /// Message content
    #[serde(default)]
    pub message: MessageConfig,

    /// Recipient list source
    pub recipients: RecipientsConfig,

    /// Result ledger
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter, overridable via `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info,embermail=debug".to_string()
}

/// One provider entry: either a preset reference with credentials, or a
/// fully spelled-out endpoint. Explicit fields override preset values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: Option<String>,

    /// Name of a built-in preset to start from
    pub preset: Option<String>,

    pub kind: Option<ProviderKind>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub security: Option<TransportSecurity>,
    pub sender: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub no_auth: bool,
    pub api_key: Option<String>,
}

impl ProviderEntry {
    /// Resolve the entry into a validated provider config
    pub fn resolve(&self) -> Result<ProviderConfig> {
        let mut provider = match &self.preset {
            Some(preset_name) => ProviderConfig::from_preset(
                preset_name,
                self.sender.clone(),
                self.username.clone(),
                self.password.clone(),
            )
            .ok_or_else(|| Error::Config(format!("Unknown provider preset: {preset_name}")))?,
            None => {
                let security = self.security.unwrap_or(TransportSecurity::Starttls);
                ProviderConfig {
                    name: String::new(),
                    kind: self.kind.unwrap_or(ProviderKind::SmtpEmail),
                    host: self.host.clone().unwrap_or_default(),
                    port: self.port.unwrap_or(default_port_for(security)),
                    security,
                    sender: self.sender.clone(),
                    username: self.username.clone(),
                    password: self.password.clone(),
                    no_auth: self.no_auth,
                    api_key: self.api_key.clone(),
                }
            }
        };

        // Explicit fields win over preset values
        if let Some(kind) = self.kind {
            provider.kind = kind;
        }
        if let Some(host) = &self.host {
            provider.host = host.clone();
        }
        if let Some(port) = self.port {
            provider.port = port;
        }
        if let Some(security) = self.security {
            provider.security = security;
        }
        if self.no_auth {
            provider.no_auth = true;
        }
        if let Some(api_key) = &self.api_key {
            provider.api_key = Some(api_key.clone());
        }
        provider.name = self
            .name
            .clone()
            .or_else(|| self.preset.clone())
            .unwrap_or_else(|| provider.host.clone());

        provider.validate()?;
        Ok(provider)
    }
}

fn default_port_for(security: TransportSecurity) -> u16 {
    match security {
        TransportSecurity::Plain => 25,
        TransportSecurity::Starttls => 587,
        TransportSecurity::ImplicitTls => 465,
    }
}

/// Message content configuration. Bodies can be given inline or as file
/// paths; attachments are always file paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageConfig {
    pub subject: Option<String>,
    pub text_body: Option<String>,
    pub text_file: Option<PathBuf>,
    pub html_file: Option<PathBuf>,
    #[serde(default)]
    pub attachments: Vec<PathBuf>,
    pub sender_name: Option<String>,
}

impl MessageConfig {
    /// Materialize the message template, reading body and attachment files
    pub fn load_template(&self) -> Result<MessageTemplate> {
        let text_body = match (&self.text_body, &self.text_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Failed to read text body {}: {e}", path.display()))
            })?,
            (None, None) => String::new(),
        };

        let html_body = match &self.html_file {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Failed to read HTML body {}: {e}", path.display()))
            })?),
            None => None,
        };

        let mut attachments = Vec::with_capacity(self.attachments.len());
        for path in &self.attachments {
            let data = std::fs::read(path).map_err(|e| {
                Error::Config(format!("Failed to read attachment {}: {e}", path.display()))
            })?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    Error::Config(format!("Attachment path {} has no filename", path.display()))
                })?;
            attachments.push(Attachment { filename, data });
        }

        let template = MessageTemplate {
            subject: self.subject.clone(),
            text_body,
            html_body,
            attachments,
            sender_name: self.sender_name.clone(),
        };
        template.validate()?;
        Ok(template)
    }
}

/// What kind of recipient list the file contains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientSource {
    /// Emails, one per line or comma-separated
    #[default]
    Email,
    /// `phone,carrier` CSV rows
    Sms,
}

/// Recipient list configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientsConfig {
    /// Path to the recipient list file
    pub file: PathBuf,

    #[serde(default)]
    pub kind: RecipientSource,
}

/// Result ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Path of the JSON-lines result ledger
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("sent_messages.jsonl")
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        let paths = [
            PathBuf::from("./embermail.toml"),
            PathBuf::from("/etc/embermail/embermail.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(Error::Config("No configuration file found".to_string()))
    }

    /// Resolve all provider entries, in rotation order
    pub fn resolve_providers(&self) -> Result<Vec<ProviderConfig>> {
        self.providers.iter().map(ProviderEntry::resolve).collect()
    }
}

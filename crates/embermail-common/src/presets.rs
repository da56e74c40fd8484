//! Built-in catalog of well-known SMTP submission endpoints

use crate::types::{ProviderConfig, ProviderKind, TransportSecurity};

/// Connection parameters for a well-known provider
#[derive(Debug, Clone, Copy)]
pub struct SmtpPreset {
    pub name: &'static str,
    pub host: &'static str,
    pub port: u16,
    pub security: TransportSecurity,
    pub no_auth: bool,
}

/// The preset catalog. The Office 365 direct-send host is a placeholder;
/// replace it with the tenant's MX record.
pub const PRESETS: &[SmtpPreset] = &[
    SmtpPreset {
        name: "gmail",
        host: "smtp.gmail.com",
        port: 587,
        security: TransportSecurity::Starttls,
        no_auth: false,
    },
    SmtpPreset {
        name: "outlook",
        host: "smtp-mail.outlook.com",
        port: 587,
        security: TransportSecurity::Starttls,
        no_auth: false,
    },
    SmtpPreset {
        name: "office365",
        host: "smtp.office365.com",
        port: 587,
        security: TransportSecurity::Starttls,
        no_auth: false,
    },
    SmtpPreset {
        name: "office365-direct-send",
        host: "yourdomain-com.mail.protection.outlook.com",
        port: 25,
        security: TransportSecurity::Starttls,
        no_auth: true,
    },
    SmtpPreset {
        name: "yahoo",
        host: "smtp.mail.yahoo.com",
        port: 587,
        security: TransportSecurity::Starttls,
        no_auth: false,
    },
    SmtpPreset {
        name: "icloud",
        host: "smtp.mail.me.com",
        port: 587,
        security: TransportSecurity::Starttls,
        no_auth: false,
    },
    SmtpPreset {
        name: "sendgrid",
        host: "smtp.sendgrid.net",
        port: 587,
        security: TransportSecurity::Starttls,
        no_auth: false,
    },
    SmtpPreset {
        name: "mailgun",
        host: "smtp.mailgun.org",
        port: 587,
        security: TransportSecurity::Starttls,
        no_auth: false,
    },
    SmtpPreset {
        name: "ses-us-east",
        host: "email-smtp.us-east-1.amazonaws.com",
        port: 587,
        security: TransportSecurity::Starttls,
        no_auth: false,
    },
    SmtpPreset {
        name: "ses-eu-west",
        host: "email-smtp.eu-west-1.amazonaws.com",
        port: 587,
        security: TransportSecurity::Starttls,
        no_auth: false,
    },
    SmtpPreset {
        name: "zoho",
        host: "smtp.zoho.com",
        port: 587,
        security: TransportSecurity::Starttls,
        no_auth: false,
    },
    SmtpPreset {
        name: "protonmail-bridge",
        host: "127.0.0.1",
        port: 1025,
        security: TransportSecurity::Plain,
        no_auth: false,
    },
    SmtpPreset {
        name: "fastmail",
        host: "smtp.fastmail.com",
        port: 587,
        security: TransportSecurity::Starttls,
        no_auth: false,
    },
    SmtpPreset {
        name: "godaddy",
        host: "smtpout.secureserver.net",
        port: 465,
        security: TransportSecurity::ImplicitTls,
        no_auth: false,
    },
    SmtpPreset {
        name: "brevo",
        host: "smtp-relay.brevo.com",
        port: 587,
        security: TransportSecurity::Starttls,
        no_auth: false,
    },
    SmtpPreset {
        name: "postmark",
        host: "smtp.postmarkapp.com",
        port: 587,
        security: TransportSecurity::Starttls,
        no_auth: false,
    },
];

/// Hosts from the catalog known to accept implicit-TLS submission on 465
/// in addition to STARTTLS on 587. Drives the connect-time port fallback
/// for networks that block 587.
const DUAL_PORT_HOSTS: &[&str] = &[
    "smtp.gmail.com",
    "smtp-mail.outlook.com",
    "smtp.office365.com",
    "smtp.mail.yahoo.com",
    "smtp.mail.me.com",
    "smtp.sendgrid.net",
    "smtp.mailgun.org",
    "email-smtp.us-east-1.amazonaws.com",
    "email-smtp.eu-west-1.amazonaws.com",
    "smtp.zoho.com",
    "smtp.fastmail.com",
    "smtp-relay.brevo.com",
    "smtp.postmarkapp.com",
];

/// Look up a preset by name, case-insensitively
pub fn find(name: &str) -> Option<&'static SmtpPreset> {
    let key = name.trim();
    PRESETS
        .iter()
        .find(|preset| preset.name.eq_ignore_ascii_case(key))
}

/// Whether the host is known to answer on port 465 with implicit TLS
pub fn answers_on_implicit_tls(host: &str) -> bool {
    DUAL_PORT_HOSTS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(host.trim()))
}

impl ProviderConfig {
    /// Build a provider config from a catalog preset
    pub fn from_preset(
        preset_name: &str,
        sender: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Option<Self> {
        let preset = find(preset_name)?;
        Some(Self {
            name: preset.name.to_string(),
            kind: ProviderKind::SmtpEmail,
            host: preset.host.to_string(),
            port: preset.port,
            security: preset.security,
            sender: sender.into(),
            username,
            password,
            no_auth: preset.no_auth,
            api_key: None,
        })
    }
}

//! Delivery strategies: units of work and provider-native message building

use embermail_common::types::{
    Attachment as FileAttachment, DispatchPolicy, MessageTemplate, ProviderConfig, ProviderKind,
    Recipient, SendMode,
};
use lettre::address::Envelope;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Attachment, Body, Mailbox, Message, MessageBuilder, MultiPart, SinglePart};
use lettre::Address;
use uuid::Uuid;

use crate::transport::connection::{SendError, WireMessage};

/// Which send variant a unit goes through, selected by provider kind and
/// policy mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStrategy {
    /// One message per recipient
    Direct,
    /// One message per batch of envelope-only recipients
    BccBatch,
    /// Carrier email-to-SMS gateway per recipient
    GatewaySms,
    /// HTTP SMS API per recipient
    CloudSms,
}

impl DeliveryStrategy {
    pub fn select(kind: ProviderKind, mode: SendMode) -> Self {
        match kind {
            ProviderKind::CloudSmsApi => Self::CloudSms,
            ProviderKind::SmtpSmsGateway => Self::GatewaySms,
            ProviderKind::SmtpEmail => match mode {
                SendMode::Direct => Self::Direct,
                SendMode::BccBatch => Self::BccBatch,
                SendMode::Gateway => Self::GatewaySms,
            },
        }
    }
}

/// One unit of work: the granularity at which rotation, pacing, progress
/// and results are tracked
#[derive(Debug, Clone)]
pub enum WorkUnit {
    Single(Recipient),
    Batch(Vec<Recipient>),
}

impl WorkUnit {
    /// Recipients carried by this unit
    pub fn recipients(&self) -> &[Recipient] {
        match self {
            Self::Single(recipient) => std::slice::from_ref(recipient),
            Self::Batch(batch) => batch,
        }
    }
}

/// Partition recipients into units: one per recipient for direct and SMS
/// modes, `batch_size` chunks for BCC batching
pub fn partition_units(recipients: &[Recipient], policy: &DispatchPolicy) -> Vec<WorkUnit> {
    match policy.mode {
        SendMode::BccBatch => recipients
            .chunks(policy.batch_size.max(1))
            .map(|chunk| WorkUnit::Batch(chunk.to_vec()))
            .collect(),
        SendMode::Direct | SendMode::Gateway => recipients
            .iter()
            .cloned()
            .map(WorkUnit::Single)
            .collect(),
    }
}

/// Template content after per-unit personalization
#[derive(Debug, Clone)]
pub struct RenderedContent {
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

/// `X-Tracking-ID`, attached only when tracking is enabled so idle runs
/// carry no empty header
#[derive(Debug, Clone)]
struct TrackingIdHeader(String);

impl Header for TrackingIdHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Tracking-ID")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// `Disposition-Notification-To`: asks the carrier for a delivery receipt
#[derive(Debug, Clone)]
struct DispositionNotificationTo(String);

impl Header for DispositionNotificationTo {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Disposition-Notification-To")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

#[derive(Debug, Clone)]
struct ReturnReceiptTo(String);

impl Header for ReturnReceiptTo {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Return-Receipt-To")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// Build a one-recipient message with the standard deliverability headers
/// (`Date`, `Message-ID`, `Reply-To`)
pub fn build_direct_email(
    provider: &ProviderConfig,
    template: &MessageTemplate,
    recipient: &Recipient,
    content: &RenderedContent,
    tracking_id: Option<&str>,
    tracking_url: Option<&str>,
) -> Result<WireMessage, SendError> {
    let to: Address = recipient.identity().parse().map_err(|e| {
        SendError::Recipient(format!(
            "Invalid email address '{}': {e}",
            recipient.identity()
        ))
    })?;
    let from = sender_mailbox(provider, template)?;

    let builder = base_builder(provider, &from)
        .to(Mailbox::new(None, to.clone()))
        .subject(content.subject.clone());
    let builder = match tracking_id {
        Some(id) => builder.header(TrackingIdHeader(id.to_string())),
        None => builder,
    };

    let html = content.html_body.as_deref().map(|html| match tracking_id {
        Some(id) => inject_tracking_marker(html, &tracking_marker(id, tracking_url)),
        None => html.to_string(),
    });

    let message = build_body(builder, &content.text_body, html.as_deref(), &template.attachments)?;
    let envelope = Envelope::new(Some(from.email.clone()), vec![to])
        .map_err(|e| SendError::Recipient(e.to_string()))?;
    Ok(WireMessage::Email {
        envelope,
        data: message.formatted(),
    })
}

/// Build one message for a whole batch. The visible `To` is the sender
/// itself; the batch rides in the envelope only, so no recipient sees
/// another.
pub fn build_batch_email(
    provider: &ProviderConfig,
    template: &MessageTemplate,
    batch: &[Recipient],
    content: &RenderedContent,
    tracking_id: Option<&str>,
    tracking_url: Option<&str>,
) -> Result<WireMessage, SendError> {
    let from = sender_mailbox(provider, template)?;

    let mut rcpts: Vec<Address> = Vec::with_capacity(batch.len() + 1);
    rcpts.push(from.email.clone());
    for recipient in batch {
        rcpts.push(recipient.identity().parse().map_err(|e| {
            SendError::Recipient(format!(
                "Invalid email address '{}': {e}",
                recipient.identity()
            ))
        })?);
    }

    let builder = base_builder(provider, &from)
        .to(Mailbox::new(None, from.email.clone()))
        .subject(content.subject.clone());
    let builder = match tracking_id {
        Some(id) => builder.header(TrackingIdHeader(id.to_string())),
        None => builder,
    };

    let html = content.html_body.as_deref().map(|html| match tracking_id {
        Some(id) => inject_tracking_marker(html, &tracking_marker(id, tracking_url)),
        None => html.to_string(),
    });

    let message = build_body(builder, &content.text_body, html.as_deref(), &template.attachments)?;
    let envelope = Envelope::new(Some(from.email.clone()), rcpts)
        .map_err(|e| SendError::Recipient(e.to_string()))?;
    Ok(WireMessage::Email {
        envelope,
        data: message.formatted(),
    })
}

/// Build one gateway-SMS message: plain text only, empty subject. With a
/// tracking id the body gets an `[ID:..]` suffix and the message asks for
/// a delivery receipt.
pub fn build_gateway_sms(
    provider: &ProviderConfig,
    destination: &str,
    body: &str,
    tracking_id: Option<&str>,
) -> Result<WireMessage, SendError> {
    let from: Address = provider.sender.parse().map_err(|e| {
        SendError::Recipient(format!("Invalid sender address '{}': {e}", provider.sender))
    })?;
    let to: Address = destination.parse().map_err(|e| {
        SendError::Recipient(format!("Invalid gateway address '{destination}': {e}"))
    })?;

    let mut text = body.to_string();
    if let Some(id) = tracking_id {
        text.push_str(&format!("\n[ID:{id}]"));
    }

    let mut builder = Message::builder()
        .from(Mailbox::new(None, from.clone()))
        .to(Mailbox::new(None, to.clone()))
        .subject("")
        .date_now()
        .message_id(Some(fresh_message_id(provider)));
    if tracking_id.is_some() {
        builder = builder
            .header(DispositionNotificationTo(provider.sender.clone()))
            .header(ReturnReceiptTo(provider.sender.clone()));
    }

    let message = builder
        .header(ContentType::TEXT_PLAIN)
        .body(text)
        .map_err(|e| SendError::Rejected(format!("Failed to build message: {e}")))?;
    let envelope =
        Envelope::new(Some(from), vec![to]).map_err(|e| SendError::Recipient(e.to_string()))?;
    Ok(WireMessage::Email {
        envelope,
        data: message.formatted(),
    })
}

/// Build a cloud-API SMS, normalizing the destination to E.164
pub fn build_cloud_sms(recipient: &Recipient, body: &str) -> Result<WireMessage, SendError> {
    let to = e164(recipient.identity())?;
    Ok(WireMessage::Sms {
        to,
        body: body.to_string(),
    })
}

/// Normalize a phone number to E.164, assuming NANP for bare ten-digit
/// numbers
pub fn e164(number: &str) -> Result<String, SendError> {
    let trimmed = number.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 {
        return Err(SendError::Recipient(format!(
            "Invalid phone number: {trimmed}"
        )));
    }
    if digits.len() == 10 && !trimmed.starts_with('+') {
        Ok(format!("+1{digits}"))
    } else {
        Ok(format!("+{digits}"))
    }
}

fn sender_mailbox(
    provider: &ProviderConfig,
    template: &MessageTemplate,
) -> Result<Mailbox, SendError> {
    let address: Address = provider.sender.parse().map_err(|e| {
        SendError::Recipient(format!("Invalid sender address '{}': {e}", provider.sender))
    })?;
    Ok(Mailbox::new(template.sender_name.clone(), address))
}

fn base_builder(provider: &ProviderConfig, from: &Mailbox) -> MessageBuilder {
    Message::builder()
        .from(from.clone())
        .reply_to(Mailbox::new(None, from.email.clone()))
        .date_now()
        .message_id(Some(fresh_message_id(provider)))
}

fn fresh_message_id(provider: &ProviderConfig) -> String {
    format!("<{}@{}>", Uuid::new_v4(), provider.sender_domain())
}

fn build_body(
    builder: MessageBuilder,
    text: &str,
    html: Option<&str>,
    attachments: &[FileAttachment],
) -> Result<Message, SendError> {
    let alternative = |text: &str, html: &str| {
        MultiPart::alternative()
            .singlepart(SinglePart::plain(text.to_string()))
            .singlepart(SinglePart::html(html.to_string()))
    };

    let built = if attachments.is_empty() {
        match html {
            Some(html) => builder.multipart(alternative(text, html)),
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(text.to_string()),
        }
    } else {
        let mut mixed = match html {
            Some(html) => MultiPart::mixed().multipart(alternative(text, html)),
            None => MultiPart::mixed().singlepart(SinglePart::plain(text.to_string())),
        };
        for attachment in attachments {
            let content_type = ContentType::parse("application/octet-stream")
                .map_err(|e| SendError::Rejected(format!("Invalid content type: {e}")))?;
            mixed = mixed.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(Body::new(attachment.data.clone()), content_type),
            );
        }
        builder.multipart(mixed)
    };

    built.map_err(|e| SendError::Rejected(format!("Failed to build message: {e}")))
}

/// HTML marker for a tracking id: a remote pixel when a tracking URL is
/// configured, otherwise an inert comment
pub fn tracking_marker(tracking_id: &str, tracking_url: Option<&str>) -> String {
    match tracking_url {
        Some(base) => format!(
            r#"<img src="{}/track/{}" width="1" height="1" style="display:none" alt="" />"#,
            base.trim_end_matches('/'),
            tracking_id
        ),
        None => format!("<!-- tracking-id: {tracking_id} -->"),
    }
}

/// Insert the marker immediately before the closing body tag, matched
/// case-insensitively, or append it when the tag is absent
pub fn inject_tracking_marker(html: &str, marker: &str) -> String {
    if let Some(idx) = html.to_ascii_lowercase().rfind("</body>") {
        let mut out = String::with_capacity(html.len() + marker.len());
        out.push_str(&html[..idx]);
        out.push_str(marker);
        out.push_str(&html[idx..]);
        out
    } else {
        let mut out = html.to_string();
        out.push_str(marker);
        out
    }
}

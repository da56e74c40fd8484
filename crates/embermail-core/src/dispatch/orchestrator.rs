//! Dispatch orchestrator: drives units of work through the transport

use chrono::Utc;
use embermail_common::gateways;
use embermail_common::types::{
    normalize_recipients, DeliveryResult, DispatchPolicy, MessageTemplate, ProviderConfig,
    ProviderKind, Recipient, SendMode,
};
use embermail_storage::Ledger;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::rotation::RotationController;
use super::strategy::{self, DeliveryStrategy, RenderedContent, WorkUnit};
use super::template::TemplateExpander;
use crate::transport::connection::{ManagedConnection, ProviderConnector, SendError};

/// Whole-call failures, reported once instead of per recipient
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The recipient set is empty after normalization and dedupe
    #[error("No recipients to dispatch")]
    NoRecipients,

    #[error("Invalid dispatch input: {0}")]
    Invalid(String),
}

/// Receives `completed / total` after every unit of work
pub type ProgressSink = dyn Fn(f64) + Send + Sync;

/// Drives one dispatch run: partitions recipients into units, renders
/// content, sends through a managed connection, rotates and paces per the
/// policy, and appends one result per recipient to the ledger as it is
/// produced.
///
/// Processing is sequential by design: SMTP connections are stateful and
/// most providers rate-limit per connection, so there is exactly one
/// in-flight send per run.
pub struct Dispatcher<'a> {
    connector: &'a dyn ProviderConnector,
    ledger: &'a dyn Ledger,
    progress: Option<&'a ProgressSink>,
    cancel: CancellationToken,
}

impl<'a> Dispatcher<'a> {
    pub fn new(connector: &'a dyn ProviderConnector, ledger: &'a dyn Ledger) -> Self {
        Self {
            connector,
            ledger,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Install a progress callback
    pub fn with_progress(mut self, sink: &'a ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Install a cancellation token, checked between units. Recipients not
    /// yet attempted when the token fires still get a (failed) result.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run one dispatch. Returns one `DeliveryResult` per unique recipient,
    /// in enumeration order; per-unit failures never abort the run, while
    /// connect/auth failures fail every pending recipient uniformly.
    pub async fn dispatch(
        &self,
        recipients: &[Recipient],
        template: &MessageTemplate,
        providers: &[ProviderConfig],
        policy: &DispatchPolicy,
    ) -> Result<Vec<DeliveryResult>, DispatchError> {
        let recipients = normalize_recipients(recipients);
        if recipients.is_empty() {
            return Err(DispatchError::NoRecipients);
        }

        template
            .validate()
            .map_err(|e| DispatchError::Invalid(e.to_string()))?;

        if providers.is_empty() {
            warn!("Dispatch requested with no providers configured");
            return Ok(self
                .fail_all(&recipients, "No sending provider configured", None)
                .await);
        }
        for provider in providers {
            provider
                .validate()
                .map_err(|e| DispatchError::Invalid(e.to_string()))?;
        }
        if policy.mode == SendMode::BccBatch
            && providers.iter().any(|p| p.kind != ProviderKind::SmtpEmail)
        {
            return Err(DispatchError::Invalid(
                "bcc-batch mode requires smtp-email providers".to_string(),
            ));
        }

        let units = strategy::partition_units(&recipients, policy);
        let total = units.len();
        let mut rotation = RotationController::new(policy, providers.len());
        let expander = TemplateExpander::new();

        info!(
            recipients = recipients.len(),
            units = total,
            providers = providers.len(),
            mode = ?policy.mode,
            "Starting dispatch run"
        );

        // Gate connect: an unreachable or unauthenticated provider fails
        // the whole run before any unit is attempted
        let mut connection = match ManagedConnection::open(self.connector, &providers[0]).await {
            Ok(connection) => connection,
            Err(err) => {
                warn!(provider = %providers[0].name, error = %err, "Initial connect failed, aborting run");
                return Ok(self
                    .fail_all(&recipients, &err.to_string(), Some(&providers[0].name))
                    .await);
            }
        };

        let mut results: Vec<DeliveryResult> = Vec::with_capacity(recipients.len());
        let mut abort: Option<(usize, String)> = None;

        for (idx, unit) in units.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("Dispatch cancelled, failing remaining recipients");
                abort = Some((idx, "Dispatch cancelled".to_string()));
                break;
            }

            if let Some(next_index) = rotation.check_rotation() {
                let next = &providers[next_index];
                debug!(provider = %next.name, "Rotating to next provider");
                if let Err(err) = connection.rotate_to(next).await {
                    warn!(provider = %next.name, error = %err, "Rotation connect failed, aborting run");
                    abort = Some((idx, err.to_string()));
                    break;
                }
            }

            for result in self.send_unit(&mut connection, unit, template, policy, &expander).await {
                self.append_to_ledger(&result).await;
                results.push(result);
            }

            if let Some(sink) = self.progress {
                sink((idx + 1) as f64 / total as f64);
            }

            if let Some(pause) = rotation.record_sent() {
                debug!(seconds = pause.as_secs(), "Pacing delay");
                tokio::time::sleep(pause).await;
            }
        }

        connection.close().await;

        if let Some((from, reason)) = abort {
            for unit in &units[from..] {
                for recipient in unit.recipients() {
                    let result = DeliveryResult::failed(recipient, reason.clone(), None);
                    self.append_to_ledger(&result).await;
                    results.push(result);
                }
            }
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(
            total = results.len(),
            succeeded,
            failed = results.len() - succeeded,
            "Dispatch run complete"
        );
        Ok(results)
    }

    async fn send_unit(
        &self,
        connection: &mut ManagedConnection<'_>,
        unit: &WorkUnit,
        template: &MessageTemplate,
        policy: &DispatchPolicy,
        expander: &TemplateExpander,
    ) -> Vec<DeliveryResult> {
        let provider = connection.provider().clone();
        match (DeliveryStrategy::select(provider.kind, policy.mode), unit) {
            (DeliveryStrategy::BccBatch, WorkUnit::Batch(batch)) => {
                self.send_batch(connection, &provider, batch, template, policy, expander)
                    .await
            }
            (DeliveryStrategy::CloudSms, _) => {
                let recipient = &unit.recipients()[0];
                vec![
                    self.send_cloud_sms(connection, &provider, recipient, template, policy, expander)
                        .await,
                ]
            }
            (DeliveryStrategy::GatewaySms, _) => {
                let recipient = &unit.recipients()[0];
                vec![
                    self.send_gateway_sms(connection, &provider, recipient, template, policy, expander)
                        .await,
                ]
            }
            (DeliveryStrategy::Direct | DeliveryStrategy::BccBatch, _) => {
                let recipient = &unit.recipients()[0];
                vec![
                    self.send_direct(connection, &provider, recipient, template, policy, expander)
                        .await,
                ]
            }
        }
    }

    async fn send_direct(
        &self,
        connection: &mut ManagedConnection<'_>,
        provider: &ProviderConfig,
        recipient: &Recipient,
        template: &MessageTemplate,
        policy: &DispatchPolicy,
        expander: &TemplateExpander,
    ) -> DeliveryResult {
        let tracking_id = policy.enable_tracking.then(|| Uuid::new_v4().to_string());
        let content = render_content(template, policy, expander, Some(recipient));

        let message = match strategy::build_direct_email(
            provider,
            template,
            recipient,
            &content,
            tracking_id.as_deref(),
            policy.tracking_url.as_deref(),
        ) {
            Ok(message) => message,
            Err(err) => return DeliveryResult::failed(recipient, err.to_string(), Some(&provider.name)),
        };

        match connection.send(&message).await {
            Ok(receipt) => DeliveryResult::sent(
                recipient,
                receipt
                    .detail
                    .unwrap_or_else(|| "Sent successfully".to_string()),
                tracking_id,
                &provider.name,
            ),
            Err(err) => {
                warn!(recipient = %recipient, error = %err, "Delivery failed");
                DeliveryResult::failed(recipient, err.to_string(), Some(&provider.name))
            }
        }
    }

    async fn send_batch(
        &self,
        connection: &mut ManagedConnection<'_>,
        provider: &ProviderConfig,
        batch: &[Recipient],
        template: &MessageTemplate,
        policy: &DispatchPolicy,
        expander: &TemplateExpander,
    ) -> Vec<DeliveryResult> {
        let tracking_id = policy.enable_tracking.then(|| Uuid::new_v4().to_string());
        // Batch-level personalization: every recipient in the batch gets
        // content rendered for the first one
        let content = render_content(template, policy, expander, batch.first());

        let message = match strategy::build_batch_email(
            provider,
            template,
            batch,
            &content,
            tracking_id.as_deref(),
            policy.tracking_url.as_deref(),
        ) {
            Ok(message) => message,
            Err(err) => {
                let detail = err.to_string();
                return batch
                    .iter()
                    .map(|r| DeliveryResult::failed(r, detail.clone(), Some(&provider.name)))
                    .collect();
            }
        };

        let outcome = connection.send(&message).await;
        let stamp = Utc::now();
        match outcome {
            Ok(_) => batch
                .iter()
                .map(|r| {
                    DeliveryResult::sent(r, "Sent successfully", tracking_id.clone(), &provider.name)
                        .at(stamp)
                })
                .collect(),
            Err(err) => {
                warn!(batch = batch.len(), error = %err, "Batch delivery failed");
                let detail = err.to_string();
                batch
                    .iter()
                    .map(|r| {
                        DeliveryResult::failed(r, detail.clone(), Some(&provider.name)).at(stamp)
                    })
                    .collect()
            }
        }
    }

    async fn send_gateway_sms(
        &self,
        connection: &mut ManagedConnection<'_>,
        provider: &ProviderConfig,
        recipient: &Recipient,
        template: &MessageTemplate,
        policy: &DispatchPolicy,
        expander: &TemplateExpander,
    ) -> DeliveryResult {
        let Recipient::Phone { carrier, .. } = recipient else {
            return DeliveryResult::failed(
                recipient,
                "Gateway SMS requires a phone recipient",
                Some(&provider.name),
            );
        };
        let Some(digits) = recipient.phone_digits() else {
            return DeliveryResult::failed(
                recipient,
                format!("Invalid phone number: {}", recipient.identity()),
                Some(&provider.name),
            );
        };

        let domains: Vec<String> = if gateways::is_auto(carrier) {
            gateways::AUTO_DOMAINS.iter().map(|d| d.to_string()).collect()
        } else {
            match gateways::resolve(carrier) {
                Some(domain) => vec![domain],
                None => {
                    return DeliveryResult::failed(
                        recipient,
                        format!("Unknown carrier: {carrier}"),
                        Some(&provider.name),
                    )
                }
            }
        };

        let tracking_id = policy.enable_tracking.then(|| {
            let id = Uuid::new_v4().simple().to_string();
            id[..8].to_string()
        });
        let body = if policy.enable_patterns {
            expander.expand(&template.text_body, Some(recipient))
        } else {
            template.text_body.clone()
        };

        // Failed domains are absorbed into the retry loop; only the final
        // outcome produces a result record
        let mut tried = Vec::new();
        let mut last_err: Option<SendError> = None;
        for domain in &domains {
            let destination = format!("{digits}@{domain}");
            let message = match strategy::build_gateway_sms(
                provider,
                &destination,
                &body,
                tracking_id.as_deref(),
            ) {
                Ok(message) => message,
                Err(err) => {
                    return DeliveryResult::failed(recipient, err.to_string(), Some(&provider.name))
                }
            };

            match connection.send(&message).await {
                Ok(_) => {
                    return DeliveryResult::sent(
                        recipient,
                        format!("Sent to {destination}"),
                        tracking_id,
                        &provider.name,
                    )
                }
                Err(err) => {
                    debug!(%destination, error = %err, "Gateway attempt failed");
                    tried.push(domain.clone());
                    last_err = Some(err);
                }
            }
        }

        let last = last_err.map(|e| e.to_string()).unwrap_or_default();
        let detail = if tried.len() > 1 {
            SendError::GatewayExhausted { tried, last }.to_string()
        } else {
            last
        };
        DeliveryResult::failed(recipient, detail, Some(&provider.name))
    }

    async fn send_cloud_sms(
        &self,
        connection: &mut ManagedConnection<'_>,
        provider: &ProviderConfig,
        recipient: &Recipient,
        template: &MessageTemplate,
        policy: &DispatchPolicy,
        expander: &TemplateExpander,
    ) -> DeliveryResult {
        let body = if policy.enable_patterns {
            expander.expand(&template.text_body, Some(recipient))
        } else {
            template.text_body.clone()
        };

        let message = match strategy::build_cloud_sms(recipient, &body) {
            Ok(message) => message,
            Err(err) => return DeliveryResult::failed(recipient, err.to_string(), Some(&provider.name)),
        };

        match connection.send(&message).await {
            Ok(receipt) => DeliveryResult::sent(
                recipient,
                receipt
                    .detail
                    .unwrap_or_else(|| "Accepted by SMS API".to_string()),
                None,
                &provider.name,
            ),
            Err(err) => {
                warn!(recipient = %recipient, error = %err, "SMS delivery failed");
                DeliveryResult::failed(recipient, err.to_string(), Some(&provider.name))
            }
        }
    }

    async fn fail_all(
        &self,
        recipients: &[Recipient],
        reason: &str,
        provider: Option<&str>,
    ) -> Vec<DeliveryResult> {
        let mut results = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let result = DeliveryResult::failed(recipient, reason, provider);
            self.append_to_ledger(&result).await;
            results.push(result);
        }
        results
    }

    /// Ledger writes must never abort a run; a failed append is logged and
    /// the result still returned to the caller
    async fn append_to_ledger(&self, result: &DeliveryResult) {
        if let Err(err) = self.ledger.append(result).await {
            warn!(error = %err, "Failed to append result to ledger");
        }
    }
}

fn render_content(
    template: &MessageTemplate,
    policy: &DispatchPolicy,
    expander: &TemplateExpander,
    recipient: Option<&Recipient>,
) -> RenderedContent {
    let subject = template.subject.clone().unwrap_or_default();
    if policy.enable_patterns {
        RenderedContent {
            subject: expander.expand(&subject, recipient),
            text_body: expander.expand(&template.text_body, recipient),
            html_body: template
                .html_body
                .as_ref()
                .map(|html| expander.expand(html, recipient)),
        }
    } else {
        RenderedContent {
            subject,
            text_body: template.text_body.clone(),
            html_body: template.html_body.clone(),
        }
    }
}

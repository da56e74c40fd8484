//! Embermail - bulk messaging dispatch entry point

use anyhow::{Context, Result};
use embermail_common::config::{Config, RecipientSource};
use embermail_core::{recipients, Dispatcher, SmtpConnector};
use embermail_storage::FileLedger;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_logging(&config.logging.filter);

    info!("Starting embermail dispatch...");

    let providers = config.resolve_providers()?;
    let template = config.message.load_template()?;

    let content = std::fs::read_to_string(&config.recipients.file).with_context(|| {
        format!(
            "Failed to read recipients file {}",
            config.recipients.file.display()
        )
    })?;
    let recipients = match config.recipients.kind {
        RecipientSource::Email => recipients::parse_email_text(&content),
        RecipientSource::Sms => recipients::parse_sms_csv(&content),
    };
    info!(count = recipients.len(), "Recipient list loaded");

    let ledger = FileLedger::new(&config.ledger.path)?;
    let connector = SmtpConnector;

    // Ctrl-C cancels between units; recipients not yet attempted still get
    // a result record
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Shutdown signal received, finishing current unit");
                cancel.cancel();
            }
        });
    }

    let progress = |fraction: f64| {
        info!(percent = (fraction * 100.0).round() as u32, "Dispatch progress");
    };

    let dispatcher = Dispatcher::new(&connector, &ledger)
        .with_progress(&progress)
        .with_cancellation(cancel);

    let results = dispatcher
        .dispatch(&recipients, &template, &providers, &config.policy)
        .await?;

    let succeeded = results.iter().filter(|r| r.success).count();
    info!(
        total = results.len(),
        succeeded,
        failed = results.len() - succeeded,
        ledger = %config.ledger.path.display(),
        "Dispatch finished"
    );

    Ok(())
}

fn init_logging(filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter.to_string()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}

//! Bulk dispatch engine: takes a recipient set, a message template, a set
//! of provider credentials and a throughput policy, and drives delivery
//! attempts with connection reuse, batching, delay pacing and provider
//! rotation, producing one result record per recipient.

pub mod dispatch;
pub mod recipients;
pub mod transport;

pub use dispatch::orchestrator::{DispatchError, Dispatcher, ProgressSink};
pub use dispatch::rotation::RotationController;
pub use dispatch::template::TemplateExpander;
pub use transport::connection::{
    ConnectError, ManagedConnection, ProviderConnection, ProviderConnector, SendError,
    SendReceipt, WireMessage,
};
pub use transport::smtp::SmtpConnector;

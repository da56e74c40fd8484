//! Provider transports: SMTP via lettre, cloud SMS over HTTP

pub mod connection;
pub mod sms;
pub mod smtp;

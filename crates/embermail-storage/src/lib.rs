//! Result ledger storage for embermail

pub mod ledger;

pub use ledger::{FileLedger, Ledger, MemoryLedger};

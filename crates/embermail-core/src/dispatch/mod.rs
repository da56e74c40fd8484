//! Dispatch engine: template expansion, delivery strategies, rotation and
//! the orchestrator driving one run

pub mod orchestrator;
pub mod rotation;
pub mod strategy;
pub mod template;

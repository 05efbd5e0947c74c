pub mod applier;
pub mod evaluator;
pub mod matcher;
pub mod orchestrator;
pub mod scores;

pub use orchestrator::{RunSummary, SettlementJob};

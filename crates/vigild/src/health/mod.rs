//! Health aggregation

mod aggregator;
pub mod escalation;

pub use aggregator::{HealthAggregator, HealthSettings, DEADLINE_CEILING};
pub use escalation::escalate;

//! vigild - dependency health aggregation and recommendation orchestration
//!
//! Library half of the daemon, exposed so integration tests can drive the
//! components (and their fakes) directly.

pub mod cache;
pub mod config;
pub mod health;
pub mod http_client;
pub mod metrics;
pub mod orchestrator;
pub mod probe;
pub mod routes;
pub mod server;

pub use config::Config;
pub use health::{HealthAggregator, HealthSettings};
pub use orchestrator::{Orchestrator, WorkflowSettings};
pub use server::{router, AppState};

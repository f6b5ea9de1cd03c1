//! Vigil Common - wire types shared by the daemon and the control client.
//!
//! Everything here is plain data: health reports, workflow requests/results
//! and the error taxonomy both sides agree on.

pub mod error;
pub mod health;
pub mod workflow;

pub use error::*;
pub use health::*;
pub use workflow::*;

/// Crate version reported in health documents
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service identity reported by the summary endpoint
pub const SERVICE_NAME: &str = "vigil";

/// Default listen address of vigild
pub const DEFAULT_BIND: &str = "127.0.0.1:7870";

/// Default base URL used by vigilctl
pub const DEFAULT_URL: &str = "http://127.0.0.1:7870";

//! Fake checker for deterministic tests
//!
//! ```rust,ignore
//! let check = Arc::new(FakeCheck::new(FakeBehavior::Hang));
//! let dep = Dependency::critical("inference", check.clone());
//! // ... aggregate ...
//! assert_eq!(check.calls(), 1);
//! ```

use super::{CheckSignal, HealthCheck, ProbeError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scripted checker behaviour
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    Healthy,
    Degraded(String),
    Fail(ProbeError),
    /// Never completes
    Hang,
    /// Healthy after a delay
    Delay(Duration),
    /// First call fails, every later call succeeds
    FailThenSucceed(ProbeError),
    Panic,
}

pub struct FakeCheck {
    behavior: FakeBehavior,
    calls: AtomicUsize,
}

impl FakeCheck {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn healthy() -> Self {
        Self::new(FakeBehavior::Healthy)
    }

    pub fn refused() -> Self {
        Self::new(FakeBehavior::Fail(ProbeError::ConnectionRefused(
            "fake refused".to_string(),
        )))
    }

    /// Number of `check` invocations so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for FakeCheck {
    fn kind(&self) -> &'static str {
        "fake"
    }

    async fn check(&self) -> Result<CheckSignal, ProbeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        match &self.behavior {
            FakeBehavior::Healthy => Ok(CheckSignal::Healthy),
            FakeBehavior::Degraded(reason) => Ok(CheckSignal::Degraded(reason.clone())),
            FakeBehavior::Fail(err) => Err(err.clone()),
            FakeBehavior::Hang => std::future::pending().await,
            FakeBehavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(CheckSignal::Healthy)
            }
            FakeBehavior::FailThenSucceed(err) if call == 0 => Err(err.clone()),
            FakeBehavior::FailThenSucceed(_) => Ok(CheckSignal::Healthy),
            FakeBehavior::Panic => panic!("fake checker panicked"),
        }
    }
}

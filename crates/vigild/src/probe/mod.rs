//! Dependency probes
//!
//! A probe is one bounded liveness check against one dependency. Whatever
//! the checker does (error, hang, panic) the caller always gets a
//! normalized `ProbeResult` back.

pub mod checks;
pub mod fake;
pub mod registry;

pub use checks::{CacheCheck, HttpCheck, TcpCheck};
pub use registry::{DependencyRegistry, RegistryError};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vigil_common::{Criticality, ErrorKind, ProbeResult};

/// Default per-dependency probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("timed out")]
    Timeout,

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("probe cancelled")]
    Cancelled,

    #[error("internal probe failure: {0}")]
    Internal(String),
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout | Self::Cancelled => ErrorKind::Timeout,
            Self::ConnectionRefused(_) | Self::ConnectionReset(_) | Self::Unreachable(_) => {
                ErrorKind::ConnectionRefused
            }
            Self::Protocol(_) => ErrorKind::ProtocolError,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Only refused/reset connections earn the single immediate retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionRefused(_) | Self::ConnectionReset(_))
    }

    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::ConnectionRefused => Self::ConnectionRefused(err.to_string()),
            Io::ConnectionReset | Io::ConnectionAborted | Io::BrokenPipe => {
                Self::ConnectionReset(err.to_string())
            }
            Io::TimedOut => Self::Timeout,
            Io::InvalidData | Io::UnexpectedEof => Self::Protocol(err.to_string()),
            _ => Self::Unreachable(err.to_string()),
        }
    }
}

/// What a checker observed when it reached the dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckSignal {
    Healthy,
    Degraded(String),
}

/// Liveness capability implemented once per dependency kind
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Short kind label (`http`, `tcp`, `cache`, ...)
    fn kind(&self) -> &'static str;

    /// One attempt; timeouts and retries are applied by the caller
    async fn check(&self) -> Result<CheckSignal, ProbeError>;
}

/// A registered dependency. Immutable after startup.
#[derive(Clone)]
pub struct Dependency {
    pub name: String,
    pub criticality: Criticality,
    pub timeout: Duration,
    /// Latency above which a successful check reports `degraded`
    pub degraded_after: Option<Duration>,
    pub checker: Arc<dyn HealthCheck>,
}

impl Dependency {
    pub fn new(
        name: impl Into<String>,
        criticality: Criticality,
        checker: Arc<dyn HealthCheck>,
    ) -> Self {
        Self {
            name: name.into(),
            criticality,
            timeout: DEFAULT_PROBE_TIMEOUT,
            degraded_after: None,
            checker,
        }
    }

    pub fn critical(name: impl Into<String>, checker: Arc<dyn HealthCheck>) -> Self {
        Self::new(name, Criticality::Critical, checker)
    }

    pub fn optional(name: impl Into<String>, checker: Arc<dyn HealthCheck>) -> Self {
        Self::new(name, Criticality::Optional, checker)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_degraded_after(mut self, threshold: Duration) -> Self {
        self.degraded_after = Some(threshold);
        self
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("name", &self.name)
            .field("criticality", &self.criticality)
            .field("kind", &self.checker.kind())
            .field("timeout", &self.timeout)
            .field("degraded_after", &self.degraded_after)
            .finish()
    }
}

/// Probe one dependency.
///
/// The dependency timeout bounds the whole attempt sequence (first try plus
/// at most one immediate retry on a transient connection error). Response
/// time is measured end to end. Never fails.
pub async fn run_probe(dep: &Dependency, cancel: &CancellationToken) -> ProbeResult {
    let started = Instant::now();

    let attempts = async {
        match dep.checker.check().await {
            Err(e) if e.is_transient() => {
                debug!("Probe {} transient failure ({}), retrying once", dep.name, e);
                dep.checker.check().await
            }
            other => other,
        }
    };

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProbeError::Cancelled),
        res = tokio::time::timeout(dep.timeout, attempts) => res.unwrap_or(Err(ProbeError::Timeout)),
    };

    normalize(dep, outcome, started.elapsed())
}

/// Run a probe on its own task so a panicking checker cannot take the
/// caller down with it.
pub fn spawn_probe(dep: Arc<Dependency>, cancel: CancellationToken) -> JoinHandle<ProbeResult> {
    tokio::spawn(async move { run_probe(&dep, &cancel).await })
}

/// Probe on a separate task and fold a panic into `internal_error`
pub async fn probe_isolated(dep: Arc<Dependency>, cancel: CancellationToken) -> ProbeResult {
    let started = Instant::now();
    let name = dep.name.clone();
    match spawn_probe(dep, cancel).await {
        Ok(result) => result,
        Err(join_err) => ProbeResult::unavailable(
            &name,
            started.elapsed(),
            ErrorKind::InternalError,
            format!("probe task failed: {}", join_err),
        ),
    }
}

fn normalize(
    dep: &Dependency,
    outcome: Result<CheckSignal, ProbeError>,
    elapsed: Duration,
) -> ProbeResult {
    let result = match outcome {
        Ok(CheckSignal::Healthy) => match dep.degraded_after {
            Some(threshold) if elapsed > threshold => ProbeResult::degraded(
                &dep.name,
                elapsed,
                format!(
                    "slow response: {} ms (threshold {} ms)",
                    elapsed.as_millis(),
                    threshold.as_millis()
                ),
            ),
            _ => ProbeResult::available(&dep.name, elapsed),
        },
        Ok(CheckSignal::Degraded(reason)) => ProbeResult::degraded(&dep.name, elapsed, reason),
        Err(e) => ProbeResult::unavailable(&dep.name, elapsed, e.kind(), e.to_string()),
    };

    debug!(
        "Probe {} ({}) -> {} in {} ms",
        dep.name,
        dep.checker.kind(),
        result.status.as_str(),
        elapsed.as_millis()
    );
    result
}

#[cfg(test)]
mod tests {
    use super::fake::{FakeBehavior, FakeCheck};
    use super::*;
    use vigil_common::ProbeStatus;

    fn dep(check: &Arc<FakeCheck>) -> Dependency {
        Dependency::critical("svc", check.clone())
    }

    #[tokio::test]
    async fn test_healthy_probe() {
        let check = Arc::new(FakeCheck::new(FakeBehavior::Healthy));
        let result = run_probe(&dep(&check), &CancellationToken::new()).await;

        assert_eq!(result.name, "svc");
        assert_eq!(result.status, ProbeStatus::Available);
        assert!(result.error.is_none());
        assert_eq!(check.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_once_on_refused() {
        let check = Arc::new(FakeCheck::new(FakeBehavior::FailThenSucceed(
            ProbeError::ConnectionRefused("first".into()),
        )));
        let result = run_probe(&dep(&check), &CancellationToken::new()).await;

        assert_eq!(result.status, ProbeStatus::Available);
        assert_eq!(check.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_second_retry() {
        let check = Arc::new(FakeCheck::new(FakeBehavior::Fail(
            ProbeError::ConnectionReset("again".into()),
        )));
        let result = run_probe(&dep(&check), &CancellationToken::new()).await;

        assert_eq!(result.status, ProbeStatus::Unavailable);
        assert_eq!(result.error, Some(ErrorKind::ConnectionRefused));
        assert_eq!(check.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_retry_on_protocol_error() {
        let check = Arc::new(FakeCheck::new(FakeBehavior::Fail(ProbeError::Protocol(
            "HTTP 500".into(),
        ))));
        let result = run_probe(&dep(&check), &CancellationToken::new()).await;

        assert_eq!(result.error, Some(ErrorKind::ProtocolError));
        assert_eq!(check.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_probe() {
        let check = Arc::new(FakeCheck::new(FakeBehavior::Hang));
        let dep = dep(&check).with_timeout(Duration::from_millis(300));

        let result = run_probe(&dep, &CancellationToken::new()).await;

        assert_eq!(result.status, ProbeStatus::Unavailable);
        assert_eq!(result.error, Some(ErrorKind::Timeout));
        assert!(result.response_time >= Duration::from_millis(300));
        assert!(result.response_time < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_success_is_degraded() {
        let check = Arc::new(FakeCheck::new(FakeBehavior::Delay(Duration::from_millis(
            500,
        ))));
        let dep = dep(&check).with_degraded_after(Duration::from_millis(200));

        let result = run_probe(&dep, &CancellationToken::new()).await;

        assert_eq!(result.status, ProbeStatus::Degraded);
        assert!(result.message.unwrap().contains("slow response"));
    }

    #[tokio::test]
    async fn test_checker_reported_degraded() {
        let check = Arc::new(FakeCheck::new(FakeBehavior::Degraded("read-only".into())));
        let result = run_probe(&dep(&check), &CancellationToken::new()).await;
        assert_eq!(result.status, ProbeStatus::Degraded);
        assert_eq!(result.message.as_deref(), Some("read-only"));
    }

    #[tokio::test]
    async fn test_cancelled_probe_returns_promptly() {
        let check = Arc::new(FakeCheck::new(FakeBehavior::Hang));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_probe(&dep(&check), &cancel).await;
        assert_eq!(result.status, ProbeStatus::Unavailable);
        assert_eq!(result.error, Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_panicking_checker_is_contained() {
        let check = Arc::new(FakeCheck::new(FakeBehavior::Panic));
        let result = probe_isolated(Arc::new(dep(&check)), CancellationToken::new()).await;

        assert_eq!(result.status, ProbeStatus::Unavailable);
        assert_eq!(result.error, Some(ErrorKind::InternalError));
    }

    #[test]
    fn test_io_error_mapping() {
        use std::io::{Error, ErrorKind as Io};
        assert!(ProbeError::from_io(&Error::from(Io::ConnectionRefused)).is_transient());
        assert!(ProbeError::from_io(&Error::from(Io::ConnectionReset)).is_transient());
        assert_eq!(
            ProbeError::from_io(&Error::from(Io::TimedOut)),
            ProbeError::Timeout
        );
        assert_eq!(
            ProbeError::from_io(&Error::from(Io::AddrNotAvailable)).kind(),
            ErrorKind::ConnectionRefused
        );
    }
}

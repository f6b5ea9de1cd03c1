//! Health aggregator
//!
//! Fans out one probe task per registered dependency, waits for them up to a
//! global deadline, and folds the results into a `HealthReport`. Reports are
//! debounced for a short TTL; concurrent callers during a refresh share it.

use super::escalation::escalate;
use crate::metrics::{CustomMetricsSource, MetricsCollector, Telemetry};
use crate::orchestrator::AvailabilitySource;
use crate::probe::{probe_isolated, spawn_probe, DependencyRegistry};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_common::{ErrorKind, HealthReport, ProbeResult, ProbeStatus, SERVICE_NAME, VERSION};

/// Hard upper bound for the aggregate deadline
pub const DEADLINE_CEILING: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub deadline: Duration,
    pub debounce_ttl: Duration,
    pub service: String,
    pub version: String,
}

impl HealthSettings {
    /// Deadline clamped into (0, DEADLINE_CEILING]
    pub fn effective_deadline(&self) -> Duration {
        if self.deadline.is_zero() {
            Self::default().deadline
        } else {
            self.deadline.min(DEADLINE_CEILING)
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(5),
            debounce_ttl: Duration::from_secs(2),
            service: SERVICE_NAME.to_string(),
            version: VERSION.to_string(),
        }
    }
}

pub struct HealthAggregator {
    registry: Arc<DependencyRegistry>,
    collector: Arc<dyn MetricsCollector>,
    custom: Option<Arc<dyn CustomMetricsSource>>,
    telemetry: Option<Telemetry>,
    settings: HealthSettings,
    started_at: Instant,
    latest: RwLock<Option<(Arc<HealthReport>, Instant)>>,
    refresh: Mutex<()>,
}

impl HealthAggregator {
    pub fn new(
        registry: Arc<DependencyRegistry>,
        collector: Arc<dyn MetricsCollector>,
        settings: HealthSettings,
    ) -> Self {
        Self {
            registry,
            collector,
            custom: None,
            telemetry: None,
            settings,
            started_at: Instant::now(),
            latest: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    pub fn with_custom_metrics(mut self, source: Arc<dyn CustomMetricsSource>) -> Self {
        self.custom = Some(source);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn registry(&self) -> &DependencyRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    /// Debounced report; at most one fan-out runs at a time
    pub async fn aggregate(&self) -> Arc<HealthReport> {
        if let Some(report) = self.fresh().await {
            return report;
        }

        let _refreshing = self.refresh.lock().await;
        // Another caller may have refreshed while we waited
        if let Some(report) = self.fresh().await {
            return report;
        }

        let report = Arc::new(self.check_now().await);
        *self.latest.write().await = Some((Arc::clone(&report), Instant::now()));
        report
    }

    /// Latest report if still within the debounce TTL
    pub async fn fresh(&self) -> Option<Arc<HealthReport>> {
        let latest = self.latest.read().await;
        match latest.as_ref() {
            Some((report, at)) if at.elapsed() < self.settings.debounce_ttl => {
                Some(Arc::clone(report))
            }
            _ => None,
        }
    }

    /// Run a full fan-out now, bypassing the debounce
    pub async fn check_now(&self) -> HealthReport {
        let started = Instant::now();
        let deadline = started + self.settings.effective_deadline();
        let cancel = CancellationToken::new();

        debug!("Probing {} dependencies", self.registry.len());

        let handles: Vec<_> = self
            .registry
            .iter()
            .map(|dep| (Arc::clone(dep), spawn_probe(Arc::clone(dep), cancel.child_token())))
            .collect();

        let collector = Arc::clone(&self.collector);
        let metrics_task = tokio::task::spawn_blocking(move || collector.collect());
        let custom_task = self.custom.clone().map(|source| {
            tokio::spawn(async move { source.snapshot().await })
        });

        // Fan-in in registration order; the deadline is shared, so the total
        // wait never exceeds it
        let mut dependencies = Vec::with_capacity(handles.len());
        for (dep, handle) in handles {
            let result = match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => {
                    warn!("Probe task for {} failed: {}", dep.name, join_err);
                    ProbeResult::unavailable(
                        &dep.name,
                        started.elapsed(),
                        ErrorKind::InternalError,
                        format!("probe task failed: {}", join_err),
                    )
                }
                Err(_) => {
                    // Dropping the handle detaches the task
                    warn!("Probe {} still running at the aggregate deadline", dep.name);
                    ProbeResult::timed_out(&dep.name, started.elapsed())
                }
            };

            if let Some(telemetry) = &self.telemetry {
                telemetry.record_probe(&result);
            }
            dependencies.push(result);
        }
        cancel.cancel();

        let metrics = match tokio::time::timeout_at(deadline, metrics_task).await {
            Ok(Ok(metrics)) => metrics,
            Ok(Err(e)) => {
                warn!("Metrics collection failed: {}", e);
                BTreeMap::new()
            }
            Err(_) => {
                warn!("Metrics collection missed the aggregate deadline");
                BTreeMap::new()
            }
        };

        let custom_metrics = match custom_task {
            Some(task) => match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(Some(values))) => Some(values),
                Ok(Ok(None)) => None,
                Ok(Err(e)) => {
                    warn!("Custom metrics source failed: {}", e);
                    None
                }
                Err(_) => {
                    warn!("Custom metrics missed the aggregate deadline");
                    None
                }
            },
            None => None,
        }
        .map(|values| {
            values
                .into_iter()
                .filter(|(_, v)| v.is_finite())
                .collect::<BTreeMap<_, _>>()
        })
        .filter(|values| !values.is_empty());

        let status = escalate(
            self.registry
                .iter()
                .zip(&dependencies)
                .map(|(dep, result)| (dep.criticality, result.status)),
        );

        if let Some(telemetry) = &self.telemetry {
            telemetry.record_health(status);
        }
        info!(
            "Health {} ({} dependencies, {} ms)",
            status.as_str(),
            dependencies.len(),
            started.elapsed().as_millis()
        );

        HealthReport {
            status,
            timestamp: Utc::now(),
            service: self.settings.service.clone(),
            version: self.settings.version.clone(),
            uptime: self.started_at.elapsed().as_secs(),
            dependencies,
            metrics,
            custom_metrics,
        }
    }

    /// Status of one dependency: debounced knowledge when fresh, otherwise a
    /// direct probe. `None` for unknown names.
    pub async fn dependency_status(&self, name: &str) -> Option<ProbeStatus> {
        if let Some(report) = self.fresh().await {
            if let Some(result) = report.dependency(name) {
                return Some(result.status);
            }
        }

        let dep = Arc::clone(self.registry.get(name)?);
        let result = probe_isolated(dep, CancellationToken::new()).await;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_probe(&result);
        }
        Some(result.status)
    }
}

#[async_trait]
impl AvailabilitySource for HealthAggregator {
    async fn status_of(&self, name: &str) -> Option<ProbeStatus> {
        self.dependency_status(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::StaticMetrics;
    use crate::probe::fake::{FakeBehavior, FakeCheck};
    use crate::probe::Dependency;
    use vigil_common::OverallStatus;

    fn aggregator(deps: Vec<Dependency>, settings: HealthSettings) -> HealthAggregator {
        HealthAggregator::new(
            Arc::new(DependencyRegistry::new(deps).unwrap()),
            Arc::new(StaticMetrics::new([("cpu_usage", 5.0)])),
            settings,
        )
    }

    #[test]
    fn test_deadline_clamped() {
        let mut settings = HealthSettings::default();
        settings.deadline = Duration::from_secs(120);
        assert_eq!(settings.effective_deadline(), DEADLINE_CEILING);

        settings.deadline = Duration::ZERO;
        assert_eq!(settings.effective_deadline(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_empty_registry_healthy() {
        let agg = aggregator(Vec::new(), HealthSettings::default());
        let report = agg.check_now().await;
        assert_eq!(report.status, OverallStatus::Healthy);
        assert!(report.dependencies.is_empty());
        assert_eq!(report.metrics["cpu_usage"], 5.0);
        assert!(report.custom_metrics.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_reuses_report() {
        let check = Arc::new(FakeCheck::healthy());
        let agg = aggregator(
            vec![Dependency::critical("db", check.clone())],
            HealthSettings::default(),
        );

        let first = agg.aggregate().await;
        let second = agg.aggregate().await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(check.calls(), 1);

        tokio::time::advance(Duration::from_secs(3)).await;
        agg.aggregate().await;
        assert_eq!(check.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_coalesce() {
        let check = Arc::new(FakeCheck::new(FakeBehavior::Delay(Duration::from_millis(50))));
        let agg = Arc::new(aggregator(
            vec![Dependency::optional("search", check.clone())],
            HealthSettings::default(),
        ));

        let calls: Vec<_> = (0..8)
            .map(|_| {
                let agg = Arc::clone(&agg);
                tokio::spawn(async move { agg.aggregate().await })
            })
            .collect();
        for call in calls {
            call.await.unwrap();
        }

        assert_eq!(check.calls(), 1);
    }

    #[tokio::test]
    async fn test_dependency_status_direct_probe() {
        let check = Arc::new(FakeCheck::refused());
        let agg = aggregator(
            vec![Dependency::critical("inference", check.clone())],
            HealthSettings::default(),
        );

        assert_eq!(
            agg.dependency_status("inference").await,
            Some(ProbeStatus::Unavailable)
        );
        assert_eq!(agg.dependency_status("unknown").await, None);
    }

    #[tokio::test]
    async fn test_dependency_status_uses_fresh_report() {
        let check = Arc::new(FakeCheck::healthy());
        let agg = aggregator(
            vec![Dependency::critical("inference", check.clone())],
            HealthSettings::default(),
        );

        agg.aggregate().await;
        assert_eq!(
            agg.dependency_status("inference").await,
            Some(ProbeStatus::Available)
        );
        assert_eq!(check.calls(), 1);
    }
}

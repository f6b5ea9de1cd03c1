//! Prometheus metrics for probes, workflows and the result cache

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_with_registry, Encoder, HistogramVec, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};
use vigil_common::{OverallStatus, ProbeResult, WorkflowResult};

#[derive(Clone)]
pub struct Telemetry {
    pub probe_duration_seconds: HistogramVec,
    pub probe_outcomes_total: IntCounterVec,
    pub workflow_outcomes_total: IntCounterVec,
    pub cache_lookups_total: IntCounterVec,
    /// 0 = healthy, 1 = degraded, 2 = unhealthy
    pub health_status: IntGauge,

    registry: Registry,
}

impl Telemetry {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let probe_duration_seconds = register_histogram_vec_with_registry!(
            "vigil_probe_duration_seconds",
            "Dependency probe duration in seconds",
            &["dependency"],
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0],
            registry
        )?;

        let probe_outcomes_total = register_int_counter_vec_with_registry!(
            "vigil_probe_outcomes_total",
            "Probe results by dependency and status",
            &["dependency", "status"],
            registry
        )?;

        let workflow_outcomes_total = register_int_counter_vec_with_registry!(
            "vigil_workflow_outcomes_total",
            "Recommendation workflows by final status and error kind",
            &["status", "error"],
            registry
        )?;

        let cache_lookups_total = register_int_counter_vec_with_registry!(
            "vigil_cache_lookups_total",
            "Result cache lookups by outcome (hit, miss, error)",
            &["outcome"],
            registry
        )?;

        let health_status = register_int_gauge_with_registry!(
            "vigil_health_status",
            "Overall health (0=healthy, 1=degraded, 2=unhealthy)",
            registry
        )?;

        Ok(Self {
            probe_duration_seconds,
            probe_outcomes_total,
            workflow_outcomes_total,
            cache_lookups_total,
            health_status,
            registry,
        })
    }

    pub fn record_probe(&self, result: &ProbeResult) {
        self.probe_duration_seconds
            .with_label_values(&[&result.name])
            .observe(result.response_time.as_secs_f64());
        self.probe_outcomes_total
            .with_label_values(&[&result.name, result.status.as_str()])
            .inc();
    }

    pub fn record_health(&self, status: OverallStatus) {
        let value = match status {
            OverallStatus::Healthy => 0,
            OverallStatus::Degraded => 1,
            OverallStatus::Unhealthy => 2,
        };
        self.health_status.set(value);
    }

    pub fn record_workflow(&self, result: &WorkflowResult) {
        let error = result.error_kind().map(|k| k.as_str()).unwrap_or("none");
        self.workflow_outcomes_total
            .with_label_values(&[result.status.as_str(), error])
            .inc();
    }

    pub fn record_cache_lookup(&self, outcome: &str) {
        self.cache_lookups_total.with_label_values(&[outcome]).inc();
    }

    /// Prometheus text exposition
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

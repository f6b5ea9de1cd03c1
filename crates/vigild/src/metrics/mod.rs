//! Metrics collection
//!
//! Resource percentages sampled on demand for health reports, plus the
//! application counters surfaced as `custom_metrics`.

pub mod counters;
pub mod exporter;

pub use counters::AppCounters;
pub use exporter::Telemetry;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use sysinfo::{Disks, System};
use tracing::warn;

/// Point-in-time resource sampler. Every value is a percentage in [0, 100];
/// unreadable metrics are omitted.
pub trait MetricsCollector: Send + Sync {
    fn collect(&self) -> BTreeMap<String, f64>;
}

/// Application-level numbers; `None` means the source could not answer
#[async_trait]
pub trait CustomMetricsSource: Send + Sync {
    async fn snapshot(&self) -> Option<BTreeMap<String, f64>>;
}

/// Host metrics via sysinfo
///
/// The `System` handle persists between calls so CPU usage is the average
/// since the previous sample. No background refresh thread.
pub struct SystemMetrics {
    system: Mutex<System>,
    disks: Mutex<Disks>,
}

impl SystemMetrics {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();

        Self {
            system: Mutex::new(system),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        }
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector for SystemMetrics {
    fn collect(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();

        match self.system.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();

                let cpus = sys.cpus();
                if !cpus.is_empty() {
                    let avg = cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>()
                        / cpus.len() as f64;
                    insert_pct(&mut out, "cpu_usage", avg);

                    let load = System::load_average();
                    insert_pct(&mut out, "load_average", load.one / cpus.len() as f64 * 100.0);
                }

                if let Some(pct) = ratio_pct(sys.used_memory(), sys.total_memory()) {
                    insert_pct(&mut out, "memory_usage", pct);
                }
                if let Some(pct) = ratio_pct(sys.used_swap(), sys.total_swap()) {
                    insert_pct(&mut out, "swap_usage", pct);
                }
            }
            Err(_) => warn!("System metrics lock poisoned; skipping CPU and memory"),
        }

        match self.disks.lock() {
            Ok(mut disks) => {
                disks.refresh();
                let (total, available) = disks
                    .list()
                    .iter()
                    .fold((0u64, 0u64), |(t, a), d| {
                        (t + d.total_space(), a + d.available_space())
                    });
                if let Some(pct) = ratio_pct(total.saturating_sub(available), total) {
                    insert_pct(&mut out, "disk_usage", pct);
                }
            }
            Err(_) => warn!("Disk metrics lock poisoned; skipping disk usage"),
        }

        out
    }
}

/// Fixed metrics for tests and for hosts where sampling is disabled
#[derive(Debug, Clone, Default)]
pub struct StaticMetrics(pub BTreeMap<String, f64>);

impl StaticMetrics {
    pub fn new<'a>(values: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self(values.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

impl MetricsCollector for StaticMetrics {
    fn collect(&self) -> BTreeMap<String, f64> {
        self.0.clone()
    }
}

fn ratio_pct(used: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| used as f64 / total as f64 * 100.0)
}

/// Insert a finite value clamped into [0, 100]; NaN is dropped
fn insert_pct(out: &mut BTreeMap<String, f64>, name: &str, value: f64) {
    if value.is_finite() {
        out.insert(name.to_string(), value.clamp(0.0, 100.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_metrics_in_range() {
        let metrics = SystemMetrics::new().collect();
        for (name, value) in &metrics {
            assert!(
                (0.0..=100.0).contains(value),
                "{} out of range: {}",
                name,
                value
            );
        }
    }

    #[test]
    fn test_clamp_and_nan() {
        let mut out = BTreeMap::new();
        insert_pct(&mut out, "over", 250.0);
        insert_pct(&mut out, "nan", f64::NAN);
        insert_pct(&mut out, "under", -3.0);

        assert_eq!(out.get("over"), Some(&100.0));
        assert_eq!(out.get("under"), Some(&0.0));
        assert!(!out.contains_key("nan"));
    }

    #[test]
    fn test_ratio_without_total() {
        assert_eq!(ratio_pct(5, 0), None);
        assert_eq!(ratio_pct(1, 4), Some(25.0));
    }

    #[test]
    fn test_static_metrics() {
        let metrics = StaticMetrics::new([("cpu_usage", 10.0), ("memory_usage", 20.0)]);
        assert_eq!(metrics.collect().len(), 2);
    }
}

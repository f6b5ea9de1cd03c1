//! Application counters reported as `custom_metrics`

use super::CustomMetricsSource;
use crate::cache::SharedCache;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Workflow and catalog counters shared between the orchestrator and the
/// health report
pub struct AppCounters {
    active_workflows: AtomicI64,
    workflows_total: AtomicU64,
    /// -1 until inference reports a catalog size
    catalog_size: AtomicI64,
    cache: Option<SharedCache>,
}

impl AppCounters {
    pub fn new(cache: Option<SharedCache>) -> Self {
        Self {
            active_workflows: AtomicI64::new(0),
            workflows_total: AtomicU64::new(0),
            catalog_size: AtomicI64::new(-1),
            cache,
        }
    }

    /// Count a workflow as active until the guard drops
    pub fn workflow_started(self: &Arc<Self>) -> ActiveWorkflow {
        self.active_workflows.fetch_add(1, Ordering::Relaxed);
        self.workflows_total.fetch_add(1, Ordering::Relaxed);
        ActiveWorkflow {
            counters: Arc::clone(self),
        }
    }

    pub fn active_workflows(&self) -> i64 {
        self.active_workflows.load(Ordering::Relaxed)
    }

    pub fn workflows_total(&self) -> u64 {
        self.workflows_total.load(Ordering::Relaxed)
    }

    pub fn set_catalog_size(&self, size: u64) {
        self.catalog_size
            .store(i64::try_from(size).unwrap_or(i64::MAX), Ordering::Relaxed);
    }

    pub fn catalog_size(&self) -> Option<u64> {
        u64::try_from(self.catalog_size.load(Ordering::Relaxed)).ok()
    }
}

impl Default for AppCounters {
    fn default() -> Self {
        Self::new(None)
    }
}

/// RAII marker for one in-flight workflow
pub struct ActiveWorkflow {
    counters: Arc<AppCounters>,
}

impl Drop for ActiveWorkflow {
    fn drop(&mut self) {
        self.counters.active_workflows.fetch_sub(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl CustomMetricsSource for AppCounters {
    async fn snapshot(&self) -> Option<BTreeMap<String, f64>> {
        let mut out = BTreeMap::new();
        out.insert("active_workflows".to_string(), self.active_workflows() as f64);
        out.insert("workflows_total".to_string(), self.workflows_total() as f64);

        if let Some(size) = self.catalog_size() {
            out.insert("catalog_size".to_string(), size as f64);
        }

        if let Some(cache) = &self.cache {
            if let Some(stats) = cache.stats().await {
                out.insert("cache_entries".to_string(), stats.entries as f64);
                if let Some(ratio) = stats.hit_ratio() {
                    out.insert("cache_hit_ratio".to_string(), ratio);
                }
            }
        }

        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryCache};
    use std::time::Duration;

    #[tokio::test]
    async fn test_active_guard() {
        let counters = Arc::new(AppCounters::default());
        {
            let _a = counters.workflow_started();
            let _b = counters.workflow_started();
            assert_eq!(counters.active_workflows(), 2);
        }
        assert_eq!(counters.active_workflows(), 0);
        assert_eq!(counters.workflows_total(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_includes_cache_stats() {
        let cache = Arc::new(MemoryCache::new(8));
        cache
            .set("k", b"v".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();
        cache.get("k").await.unwrap();

        let counters = AppCounters::new(Some(cache));
        let snap = counters.snapshot().await.unwrap();
        assert_eq!(snap["cache_entries"], 1.0);
        assert_eq!(snap["cache_hit_ratio"], 1.0);
        assert!(!snap.contains_key("catalog_size"));

        counters.set_catalog_size(1200);
        let snap = counters.snapshot().await.unwrap();
        assert_eq!(snap["catalog_size"], 1200.0);
    }
}

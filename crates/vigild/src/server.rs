//! HTTP server for vigild

use crate::cache::{MemoryCache, RespCache, SharedCache};
use crate::config::{CacheBackend, CheckKind, Config};
use crate::health::{HealthAggregator, HealthSettings};
use crate::http_client::build_client;
use crate::metrics::{AppCounters, SystemMetrics, Telemetry};
use crate::orchestrator::{
    AvailabilitySource, HttpInferenceClient, HttpMetadataClient, Orchestrator, WorkflowSettings,
};
use crate::probe::{CacheCheck, Dependency, DependencyRegistry, HealthCheck, HttpCheck, TcpCheck};
use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use vigil_common::{Criticality, VERSION};

/// How often expired entries are swept from the memory cache
const CACHE_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Application state shared across handlers
pub struct AppState {
    pub aggregator: Arc<HealthAggregator>,
    pub orchestrator: Arc<Orchestrator>,
    pub telemetry: Telemetry,
    /// Cancelled on shutdown; request tokens are children of it
    pub shutdown: CancellationToken,
    memory_cache: Option<Arc<MemoryCache>>,
}

pub type AppStateArc = Arc<AppState>;

impl AppState {
    pub fn new(
        aggregator: Arc<HealthAggregator>,
        orchestrator: Arc<Orchestrator>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            aggregator,
            orchestrator,
            telemetry,
            shutdown: CancellationToken::new(),
            memory_cache: None,
        }
    }

    /// Wire every component from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let telemetry = Telemetry::new().context("Failed to create metrics registry")?;

        let (cache, memory_cache): (SharedCache, Option<Arc<MemoryCache>>) =
            match config.cache.backend {
                CacheBackend::Memory => {
                    let memory = Arc::new(MemoryCache::new(config.cache.capacity));
                    (memory.clone() as SharedCache, Some(memory))
                }
                CacheBackend::Resp => (
                    Arc::new(RespCache::new(
                        config.cache.address.clone(),
                        Duration::from_millis(config.cache.io_timeout_ms),
                    )) as SharedCache,
                    None,
                ),
            };
        info!("Result cache backend: {}", cache.backend());

        let probe_client =
            build_client(config.deadline()).context("Failed to build probe HTTP client")?;

        let dependencies = config.dependencies.iter().map(|dep| {
            let checker: Arc<dyn HealthCheck> = match dep.kind {
                CheckKind::Http => Arc::new(HttpCheck::new(probe_client.clone(), dep.target.clone())),
                CheckKind::Tcp => Arc::new(TcpCheck::new(dep.target.clone())),
                CheckKind::Cache => Arc::new(CacheCheck::new(cache.clone())),
            };
            let criticality = if dep.critical {
                Criticality::Critical
            } else {
                Criticality::Optional
            };

            let mut dependency = Dependency::new(dep.name.clone(), criticality, checker)
                .with_timeout(config.probe_timeout(dep));
            if let Some(ms) = dep.degraded_after_ms {
                dependency = dependency.with_degraded_after(Duration::from_millis(ms));
            }
            debug!("Registered dependency {:?}", dependency);
            dependency
        });
        let registry =
            DependencyRegistry::new(dependencies).context("Invalid dependency registry")?;
        info!("Registered {} dependencies: {}", registry.len(), registry.names().join(", "));

        let counters = Arc::new(AppCounters::new(Some(cache.clone())));
        let aggregator = Arc::new(
            HealthAggregator::new(
                Arc::new(registry),
                Arc::new(SystemMetrics::new()),
                HealthSettings {
                    deadline: config.deadline(),
                    debounce_ttl: Duration::from_millis(config.health.debounce_ms),
                    service: config.server.service.clone(),
                    version: VERSION.to_string(),
                },
            )
            .with_custom_metrics(counters.clone())
            .with_telemetry(telemetry.clone()),
        );

        let workflow = &config.workflow;
        let inference_timeout = Duration::from_millis(workflow.inference_timeout_ms);
        let enrichment_timeout = Duration::from_millis(workflow.enrichment_timeout_ms);
        let client = build_client(inference_timeout.max(enrichment_timeout))
            .context("Failed to build workflow HTTP client")?;
        let metadata_base = reqwest::Url::parse(&workflow.metadata_url)
            .with_context(|| format!("Invalid metadata URL: {}", workflow.metadata_url))?;

        let availability: Arc<dyn AvailabilitySource> = aggregator.clone();
        let orchestrator = Orchestrator::new(
            Arc::new(HttpInferenceClient::new(client.clone(), workflow.inference_url.clone())),
            Arc::new(HttpMetadataClient::new(client, metadata_base)),
            cache,
            availability,
            WorkflowSettings {
                inference_dependency: workflow.inference_dependency.clone(),
                inference_timeout,
                enrichment_timeout,
                cache_ttl: Duration::from_secs(workflow.cache_ttl_secs),
            },
        )
        .with_counters(counters)
        .with_telemetry(telemetry.clone());

        Ok(Self {
            aggregator,
            orchestrator: Arc::new(orchestrator),
            telemetry,
            shutdown: CancellationToken::new(),
            memory_cache,
        })
    }
}

/// Build the router
pub fn router(state: AppStateArc) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::workflow_routes())
        .merge(routes::metrics_routes())
        .fallback(routes::not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until ctrl-c or until `state.shutdown` is cancelled
pub async fn run(state: AppState, bind: &str) -> Result<()> {
    let state = Arc::new(state);

    if let Some(cache) = state.memory_cache.clone() {
        tokio::spawn(prune_periodically(cache, state.shutdown.clone()));
    }

    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", listener.local_addr()?);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
            // In-flight workflows observe this through their child tokens
            shutdown.cancel();
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn prune_periodically(cache: Arc<MemoryCache>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(CACHE_PRUNE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let pruned = cache.prune_expired().await;
                if pruned > 0 {
                    debug!("Pruned {} expired cache entries", pruned);
                }
            }
        }
    }
}

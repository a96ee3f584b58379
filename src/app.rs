//! # Application Assembly
//!
//! Wires configuration into running services: connects the counter store
//! and database, builds the three cache instances and the provider
//! registry, assembles the pipeline, and manages the lifecycle (serve,
//! scheduled aggregation, graceful shutdown).
//!
//! Startup degrades instead of failing where the service contract allows
//! it: an unreachable Redis falls back to in-process counters with a loud
//! log line, since tracker writes are best-effort anyway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::ai::chat::ChatCompletionProvider;
use crate::ai::streaming::StreamingChatProvider;
use crate::ai::{AnalysisProvider, ProviderRegistry};
use crate::api::{create_router, AppState};
use crate::auth::CredentialService;
use crate::cache::{CacheConfig, MemoryCache};
use crate::config::{ServiceConfig, TierConfig};
use crate::db::Database;
use crate::pipeline::{AiResultCache, FilterPipeline, ResponseCache};
use crate::ratelimit::FixedWindowLimiter;
use crate::stats::aggregator::AggregationWorker;
use crate::stats::query::StatsQueryService;
use crate::stats::tracker::RequestTracker;
use crate::store::{CounterStore, MemoryCounterStore, RedisCounterStore};

/// The assembled application.
pub struct App {
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
    background: Vec<JoinHandle<()>>,
}

impl App {
    /// Connect dependencies and build every service.
    pub async fn new(config: ServiceConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let store = connect_store(&config).await;
        let db = Database::connect(
            &config.database_url,
            config.db_max_connections,
            config.db_min_connections,
        )
        .await?;

        let cache_config = |name: &str| CacheConfig {
            name: name.to_string(),
            max_entries: config.cache_max_entries,
            max_bytes: config.cache_max_bytes,
            ..Default::default()
        };

        let response_cache = Arc::new(ResponseCache::new(
            cache_config("response-cache"),
            config.response_cache_ttl,
        ));
        let result_cache = Arc::new(AiResultCache::new(cache_config("ai-result-cache")));
        let credential_cache = MemoryCache::new(cache_config("credential-cache"));

        let registry = Arc::new(ProviderRegistry::new(
            build_provider(&config.tier_fast, config.ai_timeout),
            build_provider(&config.tier_normal, config.ai_timeout),
            build_provider(&config.tier_pro, config.ai_timeout),
        ));

        let credentials = Arc::new(CredentialService::new(
            db.clone(),
            Arc::clone(&store),
            credential_cache,
        ));
        let limiter = Arc::new(FixedWindowLimiter::new(
            Arc::clone(&store),
            config.rate_limit,
        ));
        let tracker = Arc::new(RequestTracker::new(
            Arc::clone(&store),
            config.latency_retention,
        ));
        let aggregator = Arc::new(AggregationWorker::new(
            Arc::clone(&store),
            db.clone(),
            config.latency_retention,
        ));
        let query = Arc::new(StatsQueryService::new(db.clone(), Arc::clone(&store)));

        let pipeline = Arc::new(FilterPipeline::new(
            Arc::clone(&registry),
            Arc::clone(&credentials),
            limiter,
            tracker,
            Arc::clone(&response_cache),
            Arc::clone(&result_cache),
        ));

        let state = AppState {
            config: Arc::clone(&config),
            pipeline,
            credentials,
            query,
            aggregator: Arc::clone(&aggregator),
            registry,
            response_cache,
            result_cache,
        };

        let (shutdown_tx, _) = watch::channel(false);
        let mut background = Vec::new();

        if !config.aggregation_interval.is_zero() {
            background.push(spawn_aggregation_schedule(
                aggregator,
                config.aggregation_interval,
                shutdown_tx.subscribe(),
            ));
        }

        Ok(Self {
            state,
            shutdown_tx,
            background,
        })
    }

    /// Shared state, for tests that drive the router directly.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Bind and serve until ctrl-c, then drain.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.state.config.server_address();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        log::info!("listening on {}", addr);

        let router = create_router(self.state.clone());
        let shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await?;

        self.shutdown().await;
        Ok(())
    }

    /// Signal background tasks, stop cache maintenance, close pools.
    pub async fn shutdown(&self) {
        log::info!("shutting down");
        let _ = self.shutdown_tx.send(true);

        for handle in &self.background {
            handle.abort();
        }

        self.state.response_cache.destroy();
        self.state.result_cache.destroy();

        log::info!("shutdown complete");
    }
}

async fn connect_store(config: &ServiceConfig) -> Arc<dyn CounterStore> {
    match &config.redis_url {
        Some(url) => match RedisCounterStore::connect(url).await {
            Ok(store) => {
                log::info!("connected to counter store at {}", url);
                Arc::new(store)
            }
            Err(e) => {
                log::error!(
                    "counter store unreachable ({}), falling back to in-process counters",
                    e
                );
                Arc::new(MemoryCounterStore::new())
            }
        },
        None => {
            log::warn!("REDIS_URL not set, using in-process counters");
            Arc::new(MemoryCounterStore::new())
        }
    }
}

fn build_provider(tier: &TierConfig, timeout: Duration) -> Arc<dyn AnalysisProvider> {
    if tier.streaming {
        Arc::new(
            StreamingChatProvider::new(&tier.base_url, &tier.api_key, &tier.model)
                .with_timeout(timeout),
        )
    } else {
        Arc::new(
            ChatCompletionProvider::new(&tier.base_url, &tier.api_key, &tier.model)
                .with_timeout(timeout),
        )
    }
}

fn spawn_aggregation_schedule(
    aggregator: Arc<AggregationWorker>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate first tick

        log::info!("aggregation scheduled every {:?}", interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match aggregator.run(false).await {
                        Ok(report) if report.success => {
                            log::debug!("scheduled aggregation finished");
                        }
                        Ok(report) => {
                            log::warn!("scheduled aggregation errors: {:?}", report.errors);
                        }
                        Err(e) => log::warn!("scheduled aggregation skipped: {}", e),
                    }
                }
                _ = shutdown_rx.changed() => {
                    log::info!("aggregation schedule stopping");
                    break;
                }
            }
        }
    })
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("received ctrl-c");
        }
        _ = shutdown_rx.changed() => {}
    }
}

use anyhow::{Context, Result};
use orris_redis::{
    RedisConfig, RedisEventBus, RedisQuotaCache, RedisTrafficCache,
};
use orris_server::{create_router, AppState, PresenceLogger};
use orris_sync::{
    ConfigSyncEngine, ConnectSyncHandler, DomainEventKind, EventDispatcher, EventPublisher,
    Hub, MemoryStore, QuotaEnforcer, RemoteChangeHandler, SubscriptionRepository,
    SubscriptionSyncEngine, SyncConfig, TrafficAggregator, TrafficCache, VersionOracle,
};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting Orris control plane");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let sync_config = SyncConfig::from_env()?;
    let redis_config = RedisConfig::from_env()?;

    // Connect to redis and verify before anything depends on it
    let (redis_client, redis_conn) = orris_redis::connect(&redis_config).await?;
    orris_redis::health_check(&redis_conn).await?;
    info!("Redis connection established and verified");

    // Repositories. Persistent storage is wired in by the service layer;
    // the core consumes the repository traits only.
    let store = Arc::new(MemoryStore::new());

    let publisher: Arc<dyn EventPublisher> =
        Arc::new(RedisEventBus::new(redis_conn.clone()));
    let hub = Arc::new(Hub::new(sync_config.instance_id.clone(), publisher.clone()));
    let oracle = Arc::new(VersionOracle::new());

    let config_sync = Arc::new(ConfigSyncEngine::new(
        hub.clone(),
        store.clone(),
        oracle.clone(),
    ));
    let subscription_sync = Arc::new(SubscriptionSyncEngine::new(
        hub.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        publisher.clone(),
        sync_config.jwt_secret.clone(),
    ));

    // Traffic aggregation with its periodic flusher
    let traffic_cache: Arc<dyn TrafficCache> =
        Arc::new(RedisTrafficCache::new(redis_conn.clone()));
    let aggregator = Arc::new(TrafficAggregator::new(
        traffic_cache.clone(),
        sync_config.traffic.clone(),
    ));
    Arc::clone(&aggregator).start();
    info!("Traffic aggregator started");

    // In-process dispatcher: node connects trigger full config and
    // subscription syncs
    let dispatcher = Arc::new(EventDispatcher::new(sync_config.event_buffer_size));
    let connect_handler = Arc::new(ConnectSyncHandler::new(
        config_sync.clone(),
        subscription_sync.clone(),
    ));
    dispatcher.subscribe(DomainEventKind::NodeConnected, connect_handler.clone());
    dispatcher.subscribe(DomainEventKind::NodeDisconnected, connect_handler);
    let _dispatch_task = dispatcher.start();

    // Cross-instance event bus listeners
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let change_handler = Arc::new(RemoteChangeHandler::new(
        store.clone(),
        subscription_sync.clone(),
    ));
    let _bus_task = orris_redis::spawn_subscription_listener(
        redis_client.clone(),
        change_handler,
        shutdown_rx.clone(),
    );
    let _status_task = orris_redis::spawn_hub_status_listener(
        redis_client,
        Arc::new(PresenceLogger),
        shutdown_rx.clone(),
    );
    info!("Event bus listeners started");

    // Quota sweep - walks active subscriptions on an interval; on-demand
    // checks go through the same enforcer
    let enforcer = Arc::new(QuotaEnforcer::new(
        store.clone(),
        store.clone(),
        store.clone(),
        traffic_cache,
        Arc::new(RedisQuotaCache::new(redis_conn)),
        subscription_sync.clone(),
    ));
    let sweep_interval_seconds: u64 = std::env::var("QUOTA_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v: &u64| *v > 0)
        .unwrap_or(300);
    let sweep_store = store.clone();
    let sweep_enforcer = enforcer.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(sweep_interval_seconds));
        loop {
            ticker.tick().await;
            let subscriptions = match sweep_store.list_active().await {
                Ok(subscriptions) => subscriptions,
                Err(err) => {
                    tracing::error!("Quota sweep failed to list subscriptions: {err}");
                    continue;
                }
            };
            for subscription in subscriptions {
                if let Err(err) = sweep_enforcer.check_and_enforce(subscription.id).await {
                    tracing::warn!(
                        subscription_id = subscription.id,
                        "Quota check failed: {err}"
                    );
                }
            }
        }
    });
    info!(sweep_interval_seconds, "Quota sweep task started");

    // Get port from environment or use default
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = format!("0.0.0.0:{}", port);

    let state = Arc::new(AppState {
        hub,
        oracle,
        nodes: store,
        aggregator: aggregator.clone(),
        dispatcher,
    });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            result.context("server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    // Stop listeners, then drain the aggregator with its final flush
    let _ = shutdown_tx.send(true);
    aggregator.stop().await;
    info!("Shutdown complete");

    Ok(())
}

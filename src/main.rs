//! Kinship Relayer - sharded marriage and family-tree command service
//!
//! Serves the relationship commands for the shards configured on this
//! process and replays cross-shard commands received over the event bus.

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tracing::{error, info, warn};

use kinship_relayer::api::{self, AppState};
use kinship_relayer::bus::{
    EventBus, MemoryTransport, PgTransport, PubSubTransport, CHAT_INBOUND, RUN_GLOBAL_COMMAND,
    TREE_MEMBER_UPDATE,
};
use kinship_relayer::chat::{ChatPlatform, GatewayBridge, MessageHub};
use kinship_relayer::commands::CommandSurface;
use kinship_relayer::config::{Settings, TransportKind};
use kinship_relayer::metrics::{self, MetricsServer};
use kinship_relayer::relationship::{
    CoordinatorConfig, PatternClassifier, ProposalCoordinator, TreeCache,
};
use kinship_relayer::shard::ShardCommandRouter;
use kinship_relayer::state::StateManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Kinship Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for instance {} (shards {:?} of {})",
        settings.relayer.instance_id, settings.relayer.shard_ids, settings.relayer.shard_count
    );

    // Initialize database connection
    let state_manager = Arc::new(StateManager::new(&settings.database).await?);
    info!("Database connection established");

    // Run migrations
    state_manager.run_migrations().await?;
    info!("Database migrations complete");

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Event bus
    let transport: Arc<dyn PubSubTransport> = match settings.bus.transport {
        TransportKind::Postgres => Arc::new(PgTransport::new(state_manager.pool().clone())),
        TransportKind::Memory => {
            warn!("Using in-process bus transport; other shard processes will not be reached");
            Arc::new(MemoryTransport::new(settings.bus.channel_capacity))
        }
    };
    let bus = Arc::new(EventBus::new(
        transport.clone(),
        settings.bus.reconnect_delay(),
    ));

    // Chat platform view fed by the gateway
    let hub = MessageHub::new(settings.bus.channel_capacity);
    let bridge = Arc::new(GatewayBridge::new(
        &settings.relayer,
        settings.bus.message_cache_size,
        hub.clone(),
        transport,
    ));
    let platform: Arc<dyn ChatPlatform> = bridge.clone();

    // Relationship services
    let tree_cache = Arc::new(TreeCache::new(state_manager.clone()));
    let coordinator = Arc::new(
        ProposalCoordinator::new(
            state_manager.clone(),
            tree_cache.clone(),
            Arc::new(PatternClassifier),
            hub.clone(),
            CoordinatorConfig::from_settings(&settings.relayer, &settings.proposals),
        )
        .with_tree_updates(bus.clone()),
    );
    let commands = Arc::new(CommandSurface::new(
        coordinator.clone(),
        platform.clone(),
        settings.relayer.command_prefix.clone(),
    ));
    let router = Arc::new(ShardCommandRouter::new(platform, commands.clone()));
    info!("Relationship services initialized");

    // Bus subscriptions
    bus.subscribe(CHAT_INBOUND, bridge).await?;
    bus.subscribe(TREE_MEMBER_UPDATE, tree_cache).await?;
    bus.subscribe(RUN_GLOBAL_COMMAND, router).await?;
    info!("Subscribed to {} bus channels", bus.channels().len());

    // Start command listener
    let listener_handle = tokio::spawn(commands.listen(hub.subscribe()));

    // Start API server
    let api_handle = tokio::spawn({
        let state = AppState {
            state_manager: state_manager.clone(),
            bus: bus.clone(),
            coordinator: coordinator.clone(),
            relayer: settings.relayer.clone(),
            started_at: Instant::now(),
        };
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let state_manager = state_manager.clone();
        let bus = bus.clone();
        let interval = settings.relayer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                for channel in [CHAT_INBOUND, TREE_MEMBER_UPDATE, RUN_GLOBAL_COMMAND] {
                    if !bus.is_subscribed(channel) {
                        warn!("Bus channel {} has no active subscription", channel);
                    }
                }

                match state_manager.health_check().await {
                    Ok(()) => metrics::record_health_check(),
                    Err(e) => {
                        warn!("Database health check failed: {}", e);
                        metrics::record_health_check_failure();
                    }
                }
            }
        }
    });

    info!("Kinship Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    bus.shutdown().await;

    // Abort background tasks
    listener_handle.abort();
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Kinship Relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,kinship_relayer=debug,sqlx=warn,hyper=warn")
    });

    let json = std::env::var("KINSHIP_LOG_FORMAT").is_ok_and(|v| v == "json");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

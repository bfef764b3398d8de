use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use k1s0_auth_session::config::Config;
use k1s0_auth_session::logging::init_logging;
use k1s0_auth_session::{AppState, InMemoryStore, Reconciler, SharedStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());
    let cfg = Config::load(&config_path)?;
    init_logging(&cfg.logging)?;

    info!(
        name = %cfg.app.name,
        version = %cfg.app.version,
        environment = %cfg.app.environment,
        "starting auth-session worker"
    );

    let store = build_store(&cfg).await?;
    store
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("shared store health check failed: {e}"))?;

    let state = AppState::from_config(&cfg, store.clone());
    info!(
        policies = cfg.rate_limit.policy_table().len(),
        tokens_enabled = state.tokens_enabled(),
        outage_policy = ?cfg.rate_limit.outage_policy,
        session_ttl_secs = cfg.session.ttl_seconds,
        max_sessions_per_user = cfg.session.max_sessions_per_user,
        "configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = if cfg.reconcile.enabled {
        let reconciler = Reconciler::new(store);
        let interval = cfg.reconcile.interval();
        Some(tokio::spawn(async move {
            reconciler.run(interval, shutdown_rx).await;
        }))
    } else {
        info!("reconciliation disabled");
        None
    };

    // コンポーネントはシャットダウンまで保持する
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    if let Some(worker) = worker {
        worker.await?;
    }
    drop(state);

    Ok(())
}

#[cfg(feature = "redis")]
async fn build_store(cfg: &Config) -> anyhow::Result<Arc<dyn SharedStore>> {
    use k1s0_auth_session::RedisStore;

    if let Some(redis_cfg) = &cfg.redis {
        info!(url = %redis_cfg.url, "connecting to Redis");
        let store = RedisStore::connect(
            &redis_cfg.url,
            redis_cfg.connect_timeout(),
            redis_cfg.command_timeout(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to Redis: {e}"))?;
        info!("Redis connection established");
        return Ok(Arc::new(store));
    }
    info!("Redis not configured, using InMemory store");
    Ok(Arc::new(InMemoryStore::new()))
}

#[cfg(not(feature = "redis"))]
async fn build_store(cfg: &Config) -> anyhow::Result<Arc<dyn SharedStore>> {
    if cfg.redis.is_some() {
        anyhow::bail!("redis configured but the `redis` feature is disabled");
    }
    info!("Redis not configured, using InMemory store");
    Ok(Arc::new(InMemoryStore::new()))
}

//! Gateway entrypoint: wire configuration, stores, and services, then serve.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use shellgate::assistant::AssistantBridge;
use shellgate::auth::{PasswordService, RateLimiter, TokenService};
use shellgate::config::GatewayConfig;
use shellgate::server::{router, AppState};
use shellgate::ssh::ConnectionManager;
use shellgate::store::{self, AiQueryStore, ProfileStore, SessionStore, UserStore};
use shellgate::vault::CredentialVault;
use shellgate::init_logging;

/// Auth endpoints: 5 attempts per window, then a window-long block
const AUTH_RATE_LIMIT_ATTEMPTS: u32 = 5;

/// How often idle rate-limit buckets are pruned
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging();

    let config = GatewayConfig::from_env();

    let pool = match store::connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to open database {}: {}", config.database_url, e);
            std::process::exit(1);
        }
    };

    let window = Duration::from_millis(config.rate_limit_window_ms);
    let global_limiter = Arc::new(RateLimiter::new(config.rate_limit_max_requests, window));
    let auth_limiter = Arc::new(RateLimiter::with_block(
        AUTH_RATE_LIMIT_ATTEMPTS,
        window,
        window,
    ));
    spawn_limiter_prune(global_limiter.clone(), auth_limiter.clone());

    let manager = Arc::new(ConnectionManager::new());
    manager.spawn_idle_reaper();

    let state = AppState {
        users: UserStore::new(pool.clone()),
        profiles: ProfileStore::new(pool.clone()),
        sessions: SessionStore::new(pool.clone()),
        queries: AiQueryStore::new(pool),
        vault: Arc::new(CredentialVault::new(&config.encryption_key)),
        tokens: TokenService::new(&config.jwt_secret),
        passwords: PasswordService::new(),
        manager,
        assistant: Arc::new(AssistantBridge::from_config(&config)),
        global_limiter,
        auth_limiter,
        started_at: Instant::now(),
    };

    let app = router(state, config.cors_origin.as_deref());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Gateway listening on {}", addr);

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Keep the per-source rate-limit maps from growing unbounded.
fn spawn_limiter_prune(global: Arc<RateLimiter>, auth: Arc<RateLimiter>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIMITER_PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            global.prune();
            auth.prune();
        }
    });
}

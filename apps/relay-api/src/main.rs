use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_api::config::Config;
use relay_api::gateway::dispatcher::Dispatcher;
use relay_api::identity::{IdentityProvider, PassthroughProvider};
use relay_api::store::{MemoryStore, MessageStore};
use relay_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    // In-memory store and passthrough identity for Phase 1. Replace with
    // the platform's document database and session service when wired up.
    let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::new());
    let identity: Arc<dyn IdentityProvider> = Arc::new(PassthroughProvider);
    tracing::warn!("running with in-memory store and passthrough identity");

    let dispatcher = Arc::new(Dispatcher::new(store, &config));

    // Periodic cleanup of stale typing rate-limit stamps.
    let sweeper = dispatcher.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let pruned = sweeper.prune_typing(Duration::from_secs(60));
            if pruned > 0 {
                tracing::debug!(pruned, "pruned typing stamps");
            }
        }
    });

    let state = AppState {
        config: Arc::new(config),
        identity,
        dispatcher,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(relay_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "relay-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}

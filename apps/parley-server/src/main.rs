use std::net::SocketAddr;
use std::path::Path;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parley_server::config::Config;
use parley_server::gateway::sweeper::spawn_request_sweeper;
use parley_server::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    // An unexpected panic leaves room state in an unknown shape; stop the
    // process instead of serving from it.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "unrecoverable panic, exiting");
        std::process::exit(1);
    }));

    let config = Config::from_env();
    let port = config.port;

    tracing::info!(
        lobby = %config.lobby_room,
        join_policy = ?config.join_policy,
        join_request_ttl_secs = config.join_request_ttl.map(|ttl| ttl.as_secs()),
        production = config.production,
        "parley-server configured"
    );

    let cors = cors_layer(&config);
    let state = AppState::new(config);

    if let Some(ttl) = state.config.join_request_ttl {
        spawn_request_sweeper(state.clone(), ttl);
    }

    let app = Router::new()
        .merge(parley_server::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "parley-server listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

/// Outside production any origin may connect; in production only the
/// configured ones.
fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if !config.production {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler; run until killed.
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

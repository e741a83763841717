use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trip_matcher::cache::{CacheConfig, CachedDistanceOracle};
use trip_matcher::events::{WorkerConfig, spawn_worker};
use trip_matcher::matcher::{MatchEngine, MatcherConfig};
use trip_matcher::oracle::{DistanceOracle, MockDistanceOracle, OracleConfig, RouteMatrixClient};
use trip_matcher::store::MemoryTripStore;
use trip_matcher::web::{AppState, create_router};

/// How often the in-memory store is written to its snapshot file.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("trip_matcher=info,tower_http=info")),
        )
        .with_target(false)
        .init();

    let snapshot = std::env::var("TRIP_STORE_SNAPSHOT").ok();
    let store = match &snapshot {
        Some(path) => MemoryTripStore::load(path).await?,
        None => MemoryTripStore::new(),
    };
    let store = Arc::new(store);

    if let Some(path) = snapshot {
        let store = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SNAPSHOT_INTERVAL);
            interval.tick().await; // First tick is immediate, skip it
            loop {
                interval.tick().await;
                if let Err(e) = store.save(&path).await {
                    warn!(path, error = %e, "failed to save store snapshot");
                }
            }
        });
    }

    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()?;

    if std::env::var("ORACLE_MODE").is_ok_and(|m| m == "mock") {
        warn!("using the mock distance oracle, distances are great-circle");
        serve(store, MockDistanceOracle::new(), addr).await
    } else {
        let api_key = std::env::var("ROUTE_MATRIX_API_KEY").unwrap_or_else(|_| {
            warn!("ROUTE_MATRIX_API_KEY not set, distance lookups will fail");
            String::new()
        });
        let mut config = OracleConfig::new(api_key);
        if let Ok(url) = std::env::var("ROUTE_MATRIX_BASE_URL") {
            config = config.with_base_url(url);
        }
        let client = RouteMatrixClient::new(config)?;
        serve(store, CachedDistanceOracle::new(client, &CacheConfig::default()), addr).await
    }
}

async fn serve<O: DistanceOracle>(
    store: Arc<MemoryTripStore>,
    oracle: O,
    addr: SocketAddr,
) -> Result<(), Box<dyn Error>> {
    let engine = Arc::new(MatchEngine::new(
        store.clone(),
        Arc::new(oracle),
        MatcherConfig::default(),
    ));
    let (events, _worker) = spawn_worker(engine, WorkerConfig::default());
    let app = create_router(AppState::new(store, events));

    info!("trip matcher listening on http://{addr}");
    info!("  GET  /health");
    info!("  PUT  /trips/:id        create or edit a trip");
    info!("  POST /trips/:id/pay    mark a trip paid");
    info!("  GET  /trips/:id");
    info!("  GET  /groups/:id");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

mod auth;
mod config;
mod error;
mod groups;
mod handlers;
mod heading;
mod mail;
mod persistence;
mod proximity;
mod push;
mod scoring;
mod state;
mod store;
mod tracker;
mod trips;
mod visibility;
mod weather;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use axum::http::HeaderValue;
use axum::routing::get;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use auth::AuthEngine;
use config::TelemetryConfig;
use groups::GroupHub;
use handlers::AppState;
use heading::HeadingCache;
use mail::Mailer;
use persistence::{load_store, save_store};
use proximity::ProximityEngine;
use push::{run_push_worker, PushOutbox, PushTransport};
use store::SharedStore;
use tracker::Tracker;
use trips::TripLogger;
use weather::WeatherService;

// ─── Global startup time (for uptime reporting) ──────────────────────────────
static STARTUP_MS: AtomicU64 = AtomicU64::new(0);

// ─── Health Endpoint ──────────────────────────────────────────────────────────
// GET /health → { status, version, uptimeSecs }

async fn health_check() -> axum::Json<serde_json::Value> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let startup = STARTUP_MS.load(Ordering::Relaxed);
    let uptime_secs = if startup > 0 { (now_ms - startup) / 1000 } else { 0 };
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": uptime_secs,
    }))
}

// ─── Snapshot Flush Task ──────────────────────────────────────────────────────

async fn run_snapshot_loop(store: SharedStore, path: std::path::PathBuf) {
    let mut interval = tokio::time::interval(Duration::from_secs(15));
    loop {
        interval.tick().await;
        let guard = store.read().await;
        if let Err(e) = save_store(&path, &guard).await {
            warn!("Snapshot flush failed: {e}");
        }
    }
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let startup_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    STARTUP_MS.store(startup_ms, Ordering::Relaxed);

    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldtrace_backend=info".into()),
        )
        .init();

    // Required database location — refuse to boot without it
    let config = Arc::new(TelemetryConfig::from_env()?);
    info!(
        "🦌 Fieldtrace Backend v{} starting — store: {}",
        env!("CARGO_PKG_VERSION"),
        config.snapshot_path().display()
    );

    // Load persisted store
    let snapshot_path = config.snapshot_path();
    let store: SharedStore = store::shared(load_store(&snapshot_path).await);

    // Push outbox + background delivery worker
    let transport = Arc::new(PushTransport::from_vapid(config.vapid.clone()));
    if !transport.is_enabled() {
        info!("VAPID keypair absent — push outbox runs journal-only");
    }
    let (outbox, push_rx) = PushOutbox::new(store.clone(), transport);
    tokio::spawn(run_push_worker(outbox.clone(), push_rx));

    // Engines
    let proximity = Arc::new(ProximityEngine::new(&config));
    let tracker = Arc::new(Tracker::new(
        store.clone(),
        proximity.clone(),
        outbox.clone(),
    ));
    let trips = Arc::new(TripLogger::new(store.clone(), Mailer::new()));
    let heading = Arc::new(HeadingCache::new(
        store.clone(),
        WeatherService::new(),
        config.demo_pois,
    ));
    let groups = Arc::new(GroupHub::new(store.clone()));
    let auth = AuthEngine::new(config.auth_secret.clone(), store.clone());

    // Periodic snapshot flush
    tokio::spawn(run_snapshot_loop(store.clone(), snapshot_path));

    // CORS — local dev origins by default; set CORS_ORIGINS=* for open access
    let cors = if config.cors_origins.trim() == "*" {
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .split(',')
            .filter_map(|o| o.trim().parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app_state = AppState {
        store: store.clone(),
        config: config.clone(),
        auth,
        tracker,
        trips,
        heading,
        groups,
        proximity,
        outbox,
    };

    let app = handlers::router(app_state)
        .route("/health", get(health_check))
        .layer(cors);

    let addr = format!("0.0.0.0:{}", config.port);
    info!("🚀 Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

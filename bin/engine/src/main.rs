//! Binary entrypoint for the eventide scheduling engine: loads
//! configuration, wires the stores and bus, starts the four background
//! workers, and serves the admin HTTP surface.

mod admin;

use eventide_scheduler::EngineConfig;
use eventide_store::{InMemoryAnalyticsStore, InMemoryCStore, InMemoryDStore, InMemoryKStore};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env().expect("failed to load configuration");
    tracing::info!(bus_url = %config.bus_url, health_bind_addr = %config.health_bind_addr, "loaded configuration");

    let d_store: Arc<dyn eventide_store::DStore> = Arc::new(InMemoryDStore::new());
    let c_store: Arc<dyn eventide_store::CStore> = Arc::new(InMemoryCStore::new());
    let k_store: Arc<dyn eventide_store::KStore> = Arc::new(InMemoryKStore::new());
    let analytics_store: Arc<dyn eventide_store::AnalyticsStore> =
        Arc::new(InMemoryAnalyticsStore::new());

    let bus: Arc<dyn eventide_bus::Bus> =
        match eventide_bus::NatsBus::new(eventide_bus::NatsConfig::new(config.bus_url.clone())).await {
            Ok(bus) => {
                tracing::info!("connected to NATS");
                Arc::new(bus)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to connect to NATS, falling back to an in-memory bus");
                Arc::new(eventide_bus::InMemoryBus::new())
            }
        };

    if let Some(path) = &config.event_registry_path {
        match eventide_scheduler::load_manifest(path) {
            Ok(manifest) => {
                tracing::info!(entries = manifest.entries.len(), "loaded startup cron manifest");
                eventide_scheduler::upsert_manifest(&d_store, &manifest).await;
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "failed to load startup cron manifest");
            }
        }
    }

    let node_id = std::env::var("EVENTIDE_NODE_ID").unwrap_or_else(|_| ulid::Ulid::new().to_string());
    let engine = Arc::new(eventide_scheduler::Engine::new(
        d_store,
        c_store,
        k_store,
        analytics_store,
        bus,
        config.clone(),
        node_id,
    ));

    let handle = engine.start();

    let app = admin::router(engine.clone());
    let listener = tokio::net::TcpListener::bind(&config.health_bind_addr)
        .await
        .expect("failed to bind admin HTTP listener");
    tracing::info!(addr = %config.health_bind_addr, "admin surface listening");

    let shutdown = tokio::signal::ctrl_c();
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "admin server exited with an error");
            }
        }
        _ = shutdown => {
            tracing::info!("shutdown signal received");
        }
    }

    handle.stop();
}

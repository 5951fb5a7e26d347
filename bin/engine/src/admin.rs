//! Admin HTTP surface: health, aggregated stats, manual worker triggers, and
//! Prometheus metrics exposition (§6/§10.3). External per the Scheduling
//! API's scope; no authentication is applied here, same as the scheduling
//! API itself.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::{get, post}};
use eventide_scheduler::Engine;
use serde::Serialize;
use std::sync::Arc;

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .route("/admin/trigger/promote", post(trigger_promote))
        .route("/admin/trigger/dispatch", post(trigger_dispatch))
        .route("/admin/trigger/janitor", post(trigger_janitor))
        .with_state(engine)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct StatsResponse {
    active_cron_definitions: u64,
    c_pending: u64,
    c_promoted: u64,
    k_ready: u64,
    k_overdue: u64,
    k_future: u64,
    queue_healthy: bool,
    bus_circuit_state: String,
}

async fn stats(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    match engine.status().await {
        Ok(status) => Json(StatsResponse {
            active_cron_definitions: status.active_cron_definitions,
            c_pending: status.c_pending,
            c_promoted: status.c_promoted,
            k_ready: status.queue_health.ready_count,
            k_overdue: status.queue_health.overdue_count,
            k_future: status.queue_health.future_count,
            queue_healthy: status.queue_health.healthy,
            bus_circuit_state: format!("{:?}", status.bus_circuit_state),
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn metrics(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    use prometheus::{Encoder, IntGauge, Registry, TextEncoder};

    let Ok(status) = engine.status().await else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to collect status").into_response();
    };

    let registry = Registry::new();
    let gauges = [
        ("eventide_active_cron_definitions", status.active_cron_definitions),
        ("eventide_c_pending", status.c_pending),
        ("eventide_c_promoted", status.c_promoted),
        ("eventide_k_ready", status.queue_health.ready_count),
        ("eventide_k_overdue", status.queue_health.overdue_count),
        ("eventide_k_future", status.queue_health.future_count),
        ("eventide_queue_healthy", u64::from(status.queue_health.healthy)),
    ];
    for (name, value) in gauges {
        let gauge = IntGauge::new(name, name).expect("static metric name is valid");
        gauge.set(value as i64);
        registry.register(Box::new(gauge)).expect("metric name is unique within this registry");
    }

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    let content_type = encoder.format_type().to_string();
    ([("content-type", content_type)], buffer).into_response()
}

async fn trigger_promote(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    trigger(engine.trigger_manual_promotion().await)
}

async fn trigger_dispatch(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    trigger(engine.trigger_manual_dispatch().await)
}

async fn trigger_janitor(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    trigger(engine.trigger_manual_janitor_sweep().await)
}

fn trigger(result: Result<(), eventide_scheduler::WorkerError>) -> impl IntoResponse {
    match result {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

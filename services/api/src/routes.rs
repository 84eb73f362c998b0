use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;

use fareflow::cancellation::fine_router;
use fareflow::fare::Coordinates;
use fareflow::gps::gps_router;
use fareflow::rides::{ride_router, DriverId};
use fareflow::settlement::settlement_router;

use crate::infra::{AppState, Services};

/// Compose every module router plus the operational endpoints.
pub(crate) fn app_router(services: &Services) -> Router {
    let lifecycle = services.lifecycle.clone();
    let cash = lifecycle.cash_service();
    let split = lifecycle.split_service();

    ride_router(lifecycle)
        .merge(settlement_router(cash, split))
        .merge(gps_router(services.recorder.clone()))
        .merge(fine_router(services.policy.clone()))
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .route(
            "/api/v1/drivers/presence",
            axum::routing::post(presence_endpoint),
        )
        .layer(Extension(services.drivers.clone()))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[derive(Debug, Deserialize)]
struct PresenceUpdate {
    driver_id: String,
    lat: f64,
    lng: f64,
    #[serde(default = "default_available")]
    available: bool,
}

fn default_available() -> bool {
    true
}

/// Driver presence feed: upstream location pings land here so the matcher
/// has a pool to search.
async fn presence_endpoint(
    Extension(registry): Extension<Arc<crate::infra::InMemoryDriverRegistry>>,
    Json(payload): Json<PresenceUpdate>,
) -> impl IntoResponse {
    registry.upsert(
        DriverId(payload.driver_id.clone()),
        Coordinates::new(payload.lat, payload.lng),
        payload.available,
    );
    (
        StatusCode::ACCEPTED,
        Json(json!({ "driver_id": payload.driver_id, "available": payload.available })),
    )
}

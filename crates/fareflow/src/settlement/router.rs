use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::cash::{CashResolution, CashSettlementError, CashSettlementService};
use super::split::{SplitFareService, SplitSettlementError};
use crate::rides::{
    Actor, NotificationSink, PaymentGateway, RideId, RideRepository, RiderId, Role,
};

type SettlementState<R, P, N> = (
    Arc<CashSettlementService<R, P, N>>,
    Arc<SplitFareService<R, P, N>>,
);

/// Router builder for the cash dual-confirmation and split-fare endpoints.
pub fn settlement_router<R, P, N>(
    cash: Arc<CashSettlementService<R, P, N>>,
    split: Arc<SplitFareService<R, P, N>>,
) -> Router
where
    R: RideRepository + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
{
    Router::new()
        .route(
            "/api/v1/rides/:ride_id/cash-confirmation",
            post(cash_submit_handler::<R, P, N>).get(cash_status_handler::<R, P, N>),
        )
        .route(
            "/api/v1/rides/:ride_id/cash-confirmation/resolve",
            post(cash_resolve_handler::<R, P, N>),
        )
        .route(
            "/api/v1/rides/:ride_id/split",
            get(split_allocation_handler::<R, P, N>),
        )
        .route(
            "/api/v1/rides/:ride_id/split/confirm-cash",
            post(split_confirm_cash_handler::<R, P, N>),
        )
        .route(
            "/api/v1/rides/:ride_id/split/mobile-callback",
            post(split_mobile_callback_handler::<R, P, N>),
        )
        .route(
            "/api/v1/rides/:ride_id/split/retry",
            post(split_retry_handler::<R, P, N>),
        )
        .with_state((cash, split))
}

fn cash_error_response(err: CashSettlementError) -> Response {
    let status = match &err {
        CashSettlementError::Forbidden(_) | CashSettlementError::NotParticipant => {
            StatusCode::FORBIDDEN
        }
        CashSettlementError::NotCompleted { .. } => StatusCode::CONFLICT,
        CashSettlementError::NotFound => StatusCode::NOT_FOUND,
        CashSettlementError::NotCashRide => StatusCode::UNPROCESSABLE_ENTITY,
        CashSettlementError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, axum::Json(json!({ "error": err.to_string() }))).into_response()
}

fn split_error_response(err: SplitSettlementError) -> Response {
    let status = match &err {
        SplitSettlementError::Forbidden(_) => StatusCode::FORBIDDEN,
        SplitSettlementError::NotCompleted { .. } | SplitSettlementError::WrongLegState { .. } => {
            StatusCode::CONFLICT
        }
        SplitSettlementError::NotFound => StatusCode::NOT_FOUND,
        SplitSettlementError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, axum::Json(json!({ "error": err.to_string() }))).into_response()
}

#[derive(Debug, Deserialize)]
struct CashSubmission {
    user_id: String,
    role: Role,
    confirmed: bool,
}

#[derive(Debug, Deserialize)]
struct CashArbitration {
    admin_id: String,
    resolution: CashResolution,
}

#[derive(Debug, Deserialize)]
struct ParticipantAction {
    rider_id: String,
}

#[derive(Debug, Deserialize)]
struct MobileCallback {
    rider_id: String,
    success: bool,
}

async fn cash_submit_handler<R, P, N>(
    State((cash, _)): State<SettlementState<R, P, N>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<CashSubmission>,
) -> Response
where
    R: RideRepository + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
{
    let actor = Actor::new(payload.user_id, payload.role);
    match cash.submit(&RideId(ride_id), &actor, payload.confirmed) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => cash_error_response(err),
    }
}

async fn cash_status_handler<R, P, N>(
    State((cash, _)): State<SettlementState<R, P, N>>,
    Path(ride_id): Path<String>,
) -> Response
where
    R: RideRepository + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
{
    match cash.status(&RideId(ride_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => cash_error_response(err),
    }
}

async fn cash_resolve_handler<R, P, N>(
    State((cash, _)): State<SettlementState<R, P, N>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<CashArbitration>,
) -> Response
where
    R: RideRepository + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
{
    let actor = Actor::admin(payload.admin_id);
    match cash.resolve(&RideId(ride_id), &actor, payload.resolution) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => cash_error_response(err),
    }
}

async fn split_allocation_handler<R, P, N>(
    State((_, split)): State<SettlementState<R, P, N>>,
    Path(ride_id): Path<String>,
) -> Response
where
    R: RideRepository + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
{
    match split.allocation(&RideId(ride_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => split_error_response(err),
    }
}

async fn split_confirm_cash_handler<R, P, N>(
    State((_, split)): State<SettlementState<R, P, N>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<ParticipantAction>,
) -> Response
where
    R: RideRepository + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
{
    match split.confirm_cash(&RideId(ride_id), &Actor::rider(payload.rider_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => split_error_response(err),
    }
}

async fn split_mobile_callback_handler<R, P, N>(
    State((_, split)): State<SettlementState<R, P, N>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<MobileCallback>,
) -> Response
where
    R: RideRepository + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
{
    match split.resolve_mobile(
        &RideId(ride_id),
        &RiderId(payload.rider_id),
        payload.success,
    ) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => split_error_response(err),
    }
}

async fn split_retry_handler<R, P, N>(
    State((_, split)): State<SettlementState<R, P, N>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<ParticipantAction>,
) -> Response
where
    R: RideRepository + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
{
    match split.retry_mobile(&RideId(ride_id), &Actor::rider(payload.rider_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => split_error_response(err),
    }
}

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

use super::domain::{Actor, PaymentMethod, Place, RideId, RideRequest, ShareSpec};
use super::gateways::{DriverDirectory, NotificationSink, PaymentGateway};
use super::repository::RideRepository;
use super::service::{LifecycleError, RideLifecycleService};
use crate::cancellation::CancellationStore;
use crate::fare::RideClass;
use crate::settlement::SplitSettlementError;

/// Router builder exposing the ride lifecycle over HTTP. Actor identity
/// arrives pre-authenticated in the request body; the service re-checks the
/// capability it needs.
pub fn ride_router<R, D, P, N, S>(service: Arc<RideLifecycleService<R, D, P, N, S>>) -> Router
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    Router::new()
        .route("/api/v1/rides", post(create_handler::<R, D, P, N, S>))
        .route("/api/v1/rides/:ride_id", get(fetch_handler::<R, D, P, N, S>))
        .route(
            "/api/v1/rides/:ride_id/accept",
            post(accept_handler::<R, D, P, N, S>),
        )
        .route(
            "/api/v1/rides/:ride_id/decline",
            post(decline_handler::<R, D, P, N, S>),
        )
        .route(
            "/api/v1/rides/:ride_id/start",
            post(start_handler::<R, D, P, N, S>),
        )
        .route(
            "/api/v1/rides/:ride_id/complete",
            post(complete_handler::<R, D, P, N, S>),
        )
        .route(
            "/api/v1/rides/:ride_id/cancel",
            post(cancel_handler::<R, D, P, N, S>),
        )
        .route(
            "/api/v1/rides/:ride_id/driver-cancel",
            post(driver_cancel_handler::<R, D, P, N, S>),
        )
        .route(
            "/api/v1/rides/:ride_id/no-show",
            post(no_show_handler::<R, D, P, N, S>),
        )
        .route(
            "/api/v1/rides/:ride_id/destination",
            post(destination_handler::<R, D, P, N, S>),
        )
        .route(
            "/api/v1/rides/:ride_id/retry-search",
            post(retry_search_handler::<R, D, P, N, S>),
        )
        .route(
            "/api/v1/rides/:ride_id/emergency",
            post(emergency_handler::<R, D, P, N, S>),
        )
        .route(
            "/api/v1/rides/:ride_id/retry-payment",
            post(retry_payment_handler::<R, D, P, N, S>),
        )
        .route(
            "/api/v1/fares/estimate",
            post(estimate_handler::<R, D, P, N, S>),
        )
        .with_state(service)
}

pub(crate) fn lifecycle_error_response(err: LifecycleError) -> Response {
    let status = match &err {
        LifecycleError::Forbidden(_)
        | LifecycleError::FineOutstanding { .. }
        | LifecycleError::NotAssignedDriver
        | LifecycleError::NotRideOwner => StatusCode::FORBIDDEN,
        LifecycleError::ActiveRideExists { .. }
        | LifecycleError::RideUnavailable
        | LifecycleError::InvalidTransition { .. }
        | LifecycleError::PaymentAlreadySettled => StatusCode::CONFLICT,
        LifecycleError::NotFound => StatusCode::NOT_FOUND,
        LifecycleError::Fare(_) | LifecycleError::NotImmediatePath => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        LifecycleError::Split(split) => match split {
            SplitSettlementError::Repository(_) | SplitSettlementError::NotFound => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        },
        LifecycleError::Cancellation(_) | LifecycleError::Repository(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, axum::Json(json!({ "error": err.to_string() }))).into_response()
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlacePayload {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

impl From<PlacePayload> for Place {
    fn from(payload: PlacePayload) -> Self {
        Place {
            coords: crate::fare::Coordinates::new(payload.lat, payload.lng),
            address: payload.address,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SharePayload {
    pub rider_id: String,
    pub amount: u32,
    pub method: crate::rides::SplitPaymentMethod,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRideRequest {
    pub rider_id: String,
    pub pickup: PlacePayload,
    pub destination: PlacePayload,
    pub ride_class: RideClass,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub split_shares: Option<Vec<SharePayload>>,
}

#[derive(Debug, Deserialize)]
struct DriverAction {
    driver_id: String,
}

#[derive(Debug, Deserialize)]
struct RiderAction {
    rider_id: String,
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    rider_id: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct DriverCancelRequest {
    driver_id: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct DestinationRequest {
    rider_id: String,
    destination: PlacePayload,
}

#[derive(Debug, Deserialize)]
struct EmergencyRequest {
    user_id: String,
    role: crate::rides::Role,
    detail: String,
}

#[derive(Debug, Deserialize)]
struct RetryPaymentRequest {
    rider_id: String,
    method: PaymentMethod,
}

#[derive(Debug, Deserialize)]
struct EstimateRequest {
    pickup: PlacePayload,
    destination: PlacePayload,
    ride_class: RideClass,
}

async fn create_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    axum::Json(payload): axum::Json<CreateRideRequest>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    let actor = Actor::rider(payload.rider_id);
    let request = RideRequest {
        pickup: payload.pickup.into(),
        destination: payload.destination.into(),
        ride_class: payload.ride_class,
        payment_method: payload.payment_method,
        split_shares: payload.split_shares.map(|shares| {
            shares
                .into_iter()
                .map(|share| ShareSpec {
                    rider_id: crate::rides::RiderId(share.rider_id),
                    amount: share.amount,
                    method: share.method,
                })
                .collect()
        }),
    };

    match service.create(&actor, request) {
        Ok(created) => (StatusCode::CREATED, axum::Json(created)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

async fn fetch_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    Path(ride_id): Path<String>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    match service.fetch(&RideId(ride_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

async fn accept_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<DriverAction>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    match service.accept(&RideId(ride_id), &Actor::driver(payload.driver_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

async fn decline_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<DriverAction>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    match service.decline(&RideId(ride_id), &Actor::driver(payload.driver_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

async fn start_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<DriverAction>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    match service.start(&RideId(ride_id), &Actor::driver(payload.driver_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

async fn complete_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<DriverAction>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    match service.complete(&RideId(ride_id), &Actor::driver(payload.driver_id)) {
        Ok(completed) => (StatusCode::OK, axum::Json(completed)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

async fn cancel_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<CancelRequest>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    match service.cancel(
        &RideId(ride_id),
        &Actor::rider(payload.rider_id),
        &payload.reason,
    ) {
        Ok(cancelled) => (StatusCode::OK, axum::Json(cancelled)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

async fn driver_cancel_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<DriverCancelRequest>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    match service.driver_cancel(
        &RideId(ride_id),
        &Actor::driver(payload.driver_id),
        &payload.reason,
    ) {
        Ok(result) => (StatusCode::OK, axum::Json(result)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

async fn no_show_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<DriverAction>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    match service.report_no_show(&RideId(ride_id), &Actor::driver(payload.driver_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

async fn destination_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<DestinationRequest>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    match service.change_destination(
        &RideId(ride_id),
        &Actor::rider(payload.rider_id),
        payload.destination.into(),
    ) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

async fn retry_search_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<RiderAction>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    match service.retry_driver_search(&RideId(ride_id), &Actor::rider(payload.rider_id)) {
        Ok(result) => (StatusCode::OK, axum::Json(result)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

async fn emergency_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<EmergencyRequest>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    let actor = Actor::new(payload.user_id, payload.role);
    match service.report_emergency(&RideId(ride_id), &actor, &payload.detail) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

async fn retry_payment_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    Path(ride_id): Path<String>,
    axum::Json(payload): axum::Json<RetryPaymentRequest>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    match service.retry_payment(
        &RideId(ride_id),
        &Actor::rider(payload.rider_id),
        payload.method,
    ) {
        Ok(dispatch) => (StatusCode::OK, axum::Json(dispatch)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

async fn estimate_handler<R, D, P, N, S>(
    State(service): State<Arc<RideLifecycleService<R, D, P, N, S>>>,
    axum::Json(payload): axum::Json<EstimateRequest>,
) -> Response
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    match service.estimate(
        &payload.pickup.into(),
        &payload.destination.into(),
        payload.ride_class,
    ) {
        Ok(quote) => (StatusCode::OK, axum::Json(quote)).into_response(),
        Err(err) => lifecycle_error_response(err),
    }
}

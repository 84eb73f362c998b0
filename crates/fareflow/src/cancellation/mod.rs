//! Escalating cancellation-fine policy.
//!
//! Every rider carries a cumulative cancellation count. Cancellations inside
//! the free quota cost nothing; once the count exceeds the quota a flat fine
//! is applied in the same atomic mutation as the increment, and an unpaid
//! fine gates both further cancellations and new ride requests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::rides::{
    Actor, PaymentError, PaymentGateway, PaymentMethod, RepositoryError, RiderId, Role, RoleError,
};

/// Quota and fine dials, passed in at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationConfig {
    pub free_quota: u32,
    pub fine_amount: u32,
    pub currency: String,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            free_quota: 5,
            fine_amount: 200,
            currency: "KSH".to_string(),
        }
    }
}

/// Per-rider cancellation record. Persists indefinitely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationState {
    pub rider_id: RiderId,
    pub count: u32,
    pub has_active_fine: bool,
    pub fine_amount: u32,
    pub fine_paid_at: Option<DateTime<Utc>>,
}

impl CancellationState {
    pub fn fresh(rider_id: RiderId) -> Self {
        Self {
            rider_id,
            count: 0,
            has_active_fine: false,
            fine_amount: 0,
            fine_paid_at: None,
        }
    }
}

/// Storage abstraction for cancellation state.
///
/// `modify` is an atomic read-modify-write upsert: the mutation closure runs
/// against the stored record (a fresh one when the rider is unknown) under
/// the store's exclusion, so increment-and-fine is a single step.
pub trait CancellationStore: Send + Sync {
    fn fetch(&self, rider: &RiderId) -> Result<Option<CancellationState>, RepositoryError>;

    fn modify(
        &self,
        rider: &RiderId,
        mutate: &mut dyn FnMut(&mut CancellationState),
    ) -> Result<CancellationState, RepositoryError>;
}

/// Error raised by the cancellation policy.
#[derive(Debug, thiserror::Error)]
pub enum CancellationError {
    #[error(
        "outstanding cancellation fine of {amount} {currency}; pay it before cancelling or requesting rides"
    )]
    FineOutstanding { amount: u32, currency: String },
    #[error("no outstanding fine to pay")]
    NoActiveFine,
    #[error(transparent)]
    Forbidden(#[from] RoleError),
    #[error("fine payment failed: {0}")]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result of processing one cancellation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationOutcome {
    pub count: u32,
    /// Fine amount applied by this cancellation, if it tipped over the quota.
    pub fine_applied: Option<u32>,
}

/// Read view of a rider's fine standing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FineStatusView {
    pub rider_id: String,
    pub cancellation_count: u32,
    pub free_quota: u32,
    pub has_active_fine: bool,
    pub fine_amount: u32,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fine_paid_at: Option<DateTime<Utc>>,
}

/// Policy service over a [`CancellationStore`] and the payment gateway.
pub struct CancellationPolicy<S, P> {
    store: Arc<S>,
    gateway: Arc<P>,
    config: CancellationConfig,
}

impl<S, P> CancellationPolicy<S, P>
where
    S: CancellationStore + 'static,
    P: PaymentGateway + 'static,
{
    pub fn new(store: Arc<S>, gateway: Arc<P>, config: CancellationConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    pub fn config(&self) -> &CancellationConfig {
        &self.config
    }

    /// Gate shared by cancellation and ride creation: an unpaid fine blocks
    /// both until cleared.
    pub fn check_eligibility(&self, rider: &RiderId) -> Result<(), CancellationError> {
        match self.store.fetch(rider)? {
            Some(state) if state.has_active_fine => Err(CancellationError::FineOutstanding {
                amount: state.fine_amount,
                currency: self.config.currency.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Record one passenger-initiated cancellation. The count increments
    /// unconditionally; crossing the quota applies the fine in the same
    /// mutation.
    pub fn process_cancellation(
        &self,
        rider: &RiderId,
    ) -> Result<CancellationOutcome, CancellationError> {
        let quota = self.config.free_quota;
        let fine = self.config.fine_amount;
        let mut fine_applied = None;

        let state = self.store.modify(rider, &mut |state| {
            state.count += 1;
            if state.count > quota && !state.has_active_fine {
                state.has_active_fine = true;
                state.fine_amount = fine;
                state.fine_paid_at = None;
                fine_applied = Some(fine);
            }
        })?;

        if fine_applied.is_some() {
            info!(rider = %rider.0, count = state.count, fine, "cancellation fine applied");
        }

        Ok(CancellationOutcome {
            count: state.count,
            fine_applied,
        })
    }

    /// Clear the fine once the underlying payment succeeds. Cash settles
    /// immediately; every other method goes through the gateway first.
    pub fn pay_fine(
        &self,
        rider: &RiderId,
        method: PaymentMethod,
    ) -> Result<FineStatusView, CancellationError> {
        let state = self
            .store
            .fetch(rider)?
            .filter(|state| state.has_active_fine)
            .ok_or(CancellationError::NoActiveFine)?;

        if method != PaymentMethod::Cash {
            self.gateway.create_payment(
                &rider.0,
                state.fine_amount,
                &self.config.currency,
                method,
                "cancellation fine",
            )?;
        }

        let now = Utc::now();
        let state = self.store.modify(rider, &mut |state| {
            state.has_active_fine = false;
            state.fine_paid_at = Some(now);
        })?;

        info!(rider = %rider.0, method = method.label(), "cancellation fine cleared");
        Ok(self.view(state))
    }

    /// Admin override clearing count and fine together, independent of
    /// payment.
    pub fn reset(&self, rider: &RiderId, actor: &Actor) -> Result<FineStatusView, CancellationError> {
        actor.require(Role::Admin)?;

        let state = self.store.modify(rider, &mut |state| {
            state.count = 0;
            state.has_active_fine = false;
            state.fine_amount = 0;
        })?;

        Ok(self.view(state))
    }

    pub fn fine_status(&self, rider: &RiderId) -> Result<FineStatusView, CancellationError> {
        let state = self
            .store
            .fetch(rider)?
            .unwrap_or_else(|| CancellationState::fresh(rider.clone()));
        Ok(self.view(state))
    }

    fn view(&self, state: CancellationState) -> FineStatusView {
        FineStatusView {
            rider_id: state.rider_id.0,
            cancellation_count: state.count,
            free_quota: self.config.free_quota,
            has_active_fine: state.has_active_fine,
            fine_amount: state.fine_amount,
            currency: self.config.currency.clone(),
            fine_paid_at: state.fine_paid_at,
        }
    }
}


/// Router builder for fine status, fine payment, and the admin reset.
pub fn fine_router<S, P>(policy: Arc<CancellationPolicy<S, P>>) -> axum::Router
where
    S: CancellationStore + 'static,
    P: PaymentGateway + 'static,
{
    use axum::routing::{get, post};

    axum::Router::new()
        .route(
            "/api/v1/riders/:rider_id/fine",
            get(fine_status_handler::<S, P>),
        )
        .route(
            "/api/v1/riders/:rider_id/fine/pay",
            post(pay_fine_handler::<S, P>),
        )
        .route(
            "/api/v1/riders/:rider_id/cancellations/reset",
            post(reset_handler::<S, P>),
        )
        .with_state(policy)
}

fn cancellation_error_response(err: CancellationError) -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let status = match &err {
        CancellationError::Forbidden(_) | CancellationError::FineOutstanding { .. } => {
            StatusCode::FORBIDDEN
        }
        CancellationError::NoActiveFine => StatusCode::CONFLICT,
        CancellationError::Payment(_) => StatusCode::BAD_GATEWAY,
        CancellationError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        axum::Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

#[derive(Debug, serde::Deserialize)]
struct PayFineRequest {
    method: PaymentMethod,
}

#[derive(Debug, serde::Deserialize)]
struct ResetRequest {
    admin_id: String,
}

async fn fine_status_handler<S, P>(
    axum::extract::State(policy): axum::extract::State<Arc<CancellationPolicy<S, P>>>,
    axum::extract::Path(rider_id): axum::extract::Path<String>,
) -> axum::response::Response
where
    S: CancellationStore + 'static,
    P: PaymentGateway + 'static,
{
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    match policy.fine_status(&RiderId(rider_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => cancellation_error_response(err),
    }
}

async fn pay_fine_handler<S, P>(
    axum::extract::State(policy): axum::extract::State<Arc<CancellationPolicy<S, P>>>,
    axum::extract::Path(rider_id): axum::extract::Path<String>,
    axum::Json(payload): axum::Json<PayFineRequest>,
) -> axum::response::Response
where
    S: CancellationStore + 'static,
    P: PaymentGateway + 'static,
{
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    match policy.pay_fine(&RiderId(rider_id), payload.method) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => cancellation_error_response(err),
    }
}

async fn reset_handler<S, P>(
    axum::extract::State(policy): axum::extract::State<Arc<CancellationPolicy<S, P>>>,
    axum::extract::Path(rider_id): axum::extract::Path<String>,
    axum::Json(payload): axum::Json<ResetRequest>,
) -> axum::response::Response
where
    S: CancellationStore + 'static,
    P: PaymentGateway + 'static,
{
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    match policy.reset(&RiderId(rider_id), &Actor::admin(payload.admin_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => cancellation_error_response(err),
    }
}

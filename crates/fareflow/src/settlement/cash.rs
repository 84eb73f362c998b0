//! Dual-confirmation settlement for cash-paid rides.
//!
//! Driver and rider each attest whether cash changed hands. Submissions are
//! idempotent overwrites of that party's tri-state value; the derived outcome
//! moves commission, escalates a dispute, or keeps waiting. Disputes are
//! valid outcomes resolved only by admin arbitration, never by timeout.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::rides::{
    deliver, Actor, DriverId, Notification, NotificationCategory, NotificationSink, PaymentGateway,
    RepositoryError, Ride, RideId, RideRepository, RideStatus, Role, RoleError, SettlementPath,
    ADMIN_QUEUE,
};

/// Derived confirmation outcome. Computed from the ride, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CashOutcome {
    Pending,
    BothConfirmed,
    BothDenied,
    Disputed,
}

impl CashOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            CashOutcome::Pending => "pending",
            CashOutcome::BothConfirmed => "both_confirmed",
            CashOutcome::BothDenied => "both_denied",
            CashOutcome::Disputed => "disputed",
        }
    }
}

/// Outcome derivation table. Deduction failures surface as `Disputed` even
/// when both parties agreed.
pub fn derive_outcome(ride: &Ride) -> CashOutcome {
    match (ride.driver_cash_confirm, ride.rider_cash_confirm) {
        (Some(true), Some(true)) => {
            if ride.commission_deducted {
                CashOutcome::BothConfirmed
            } else if ride.dispute_flagged {
                CashOutcome::Disputed
            } else {
                CashOutcome::BothConfirmed
            }
        }
        (Some(false), Some(false)) => CashOutcome::BothDenied,
        _ => {
            if ride.dispute_flagged {
                CashOutcome::Disputed
            } else {
                CashOutcome::Pending
            }
        }
    }
}

/// Admin arbitration verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashResolution {
    Confirm,
    Deny,
}

/// Error raised by the cash settlement service.
#[derive(Debug, thiserror::Error)]
pub enum CashSettlementError {
    #[error(transparent)]
    Forbidden(#[from] RoleError),
    #[error("ride not found")]
    NotFound,
    #[error("ride is not settled in cash")]
    NotCashRide,
    #[error("cash can only be confirmed on a completed ride (currently {status})")]
    NotCompleted { status: &'static str },
    #[error("actor is not a party to this ride")]
    NotParticipant,
    #[error(transparent)]
    Repository(RepositoryError),
}

impl CashSettlementError {
    fn from_repo(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => CashSettlementError::NotFound,
            other => CashSettlementError::Repository(other),
        }
    }
}

/// State of the confirmation protocol for one ride.
#[derive(Debug, Clone, Serialize)]
pub struct CashConfirmationView {
    pub ride_id: String,
    pub driver_confirmed: Option<bool>,
    pub rider_confirmed: Option<bool>,
    pub outcome: &'static str,
    pub commission_deducted: bool,
    pub dispute_flagged: bool,
}

fn view_of(ride: &Ride) -> CashConfirmationView {
    CashConfirmationView {
        ride_id: ride.id.0.clone(),
        driver_confirmed: ride.driver_cash_confirm,
        rider_confirmed: ride.rider_cash_confirm,
        outcome: derive_outcome(ride).label(),
        commission_deducted: ride.commission_deducted,
        dispute_flagged: ride.dispute_flagged,
    }
}

/// Settlement service for cash-paid rides.
pub struct CashSettlementService<R, P, N> {
    rides: Arc<R>,
    gateway: Arc<P>,
    notifications: Arc<N>,
}

impl<R, P, N> CashSettlementService<R, P, N>
where
    R: RideRepository + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(rides: Arc<R>, gateway: Arc<P>, notifications: Arc<N>) -> Self {
        Self {
            rides,
            gateway,
            notifications,
        }
    }

    /// Prompt both parties when a cash ride completes. No state change; the
    /// tri-state fields start unset.
    pub fn initialize(&self, ride: &Ride) {
        if let Some(driver) = &ride.driver_id {
            deliver(
                self.notifications.as_ref(),
                Notification::new(
                    &driver.0,
                    "Confirm cash payment",
                    format!(
                        "Confirm that you received {} {} in cash for ride {}",
                        ride.fare.final_amount, ride.fare.currency, ride.id
                    ),
                    NotificationCategory::Payment,
                )
                .with("ride_id", &ride.id.0),
            );
        }
        deliver(
            self.notifications.as_ref(),
            Notification::new(
                &ride.rider_id.0,
                "Confirm cash payment",
                format!("Confirm that you paid cash for ride {}", ride.id),
                NotificationCategory::Payment,
            )
            .with("ride_id", &ride.id.0),
        );
    }

    /// Record one party's attestation and act on the converged outcome.
    pub fn submit(
        &self,
        ride_id: &RideId,
        actor: &Actor,
        confirmed: bool,
    ) -> Result<CashConfirmationView, CashSettlementError> {
        actor.require_one_of(&[Role::Driver, Role::Rider])?;

        let ride = self.fetch_cash_ride(ride_id)?;
        if ride.status != RideStatus::Completed {
            return Err(CashSettlementError::NotCompleted {
                status: ride.status.label(),
            });
        }

        let is_driver = actor.role == Role::Driver;
        let is_party = if is_driver {
            ride.is_assigned_to(&DriverId(actor.id.clone()))
        } else {
            ride.rider_id.0 == actor.id
        };
        if !is_party {
            return Err(CashSettlementError::NotParticipant);
        }

        let ride = self
            .rides
            .update_if_status(ride_id, RideStatus::Completed, &mut |ride| {
                if is_driver {
                    ride.driver_cash_confirm = Some(confirmed);
                } else {
                    ride.rider_cash_confirm = Some(confirmed);
                }
            })
            .map_err(CashSettlementError::from_repo)?;

        let ride = self.settle(ride)?;
        Ok(view_of(&ride))
    }

    /// Admin arbitration: force either terminal outcome regardless of the
    /// parties' values. Confirming always (re-)attempts the deduction.
    pub fn resolve(
        &self,
        ride_id: &RideId,
        actor: &Actor,
        resolution: CashResolution,
    ) -> Result<CashConfirmationView, CashSettlementError> {
        actor.require(Role::Admin)?;
        let ride = self.fetch_cash_ride(ride_id)?;
        if ride.status != RideStatus::Completed {
            return Err(CashSettlementError::NotCompleted {
                status: ride.status.label(),
            });
        }

        let verdict = match resolution {
            CashResolution::Confirm => true,
            CashResolution::Deny => false,
        };
        let admin = actor.id.clone();
        let ride = self
            .rides
            .update_with(ride_id, &mut |ride| {
                ride.driver_cash_confirm = Some(verdict);
                ride.rider_cash_confirm = Some(verdict);
                ride.dispute_flagged = false;
                ride.metadata
                    .insert("cash_resolution_by".to_string(), admin.clone());
            })
            .map_err(CashSettlementError::from_repo)?;

        let ride = if verdict {
            self.settle(ride)?
        } else {
            info!(ride = %ride.id, "cash dispute closed as denied by admin");
            ride
        };
        Ok(view_of(&ride))
    }

    pub fn status(&self, ride_id: &RideId) -> Result<CashConfirmationView, CashSettlementError> {
        let ride = self.fetch_cash_ride(ride_id)?;
        Ok(view_of(&ride))
    }

    fn fetch_cash_ride(&self, ride_id: &RideId) -> Result<Ride, CashSettlementError> {
        let ride = self
            .rides
            .fetch(ride_id)
            .map_err(CashSettlementError::from_repo)?
            .ok_or(CashSettlementError::NotFound)?;
        if ride.settlement != SettlementPath::CashDualConfirm {
            return Err(CashSettlementError::NotCashRide);
        }
        Ok(ride)
    }

    /// Act on the current confirmation pair.
    fn settle(&self, ride: Ride) -> Result<Ride, CashSettlementError> {
        match (ride.driver_cash_confirm, ride.rider_cash_confirm) {
            (Some(true), Some(true)) => self.deduct_commission(ride),
            (Some(false), Some(false)) => self.flag_dispute(ride, "both parties denied cash payment"),
            (Some(_), None) | (None, Some(_)) | (Some(_), Some(_)) => {
                self.remind_outstanding_party(&ride);
                Ok(ride)
            }
            (None, None) => Ok(ride),
        }
    }

    /// Claim-then-deduct so two converging submissions cannot move the
    /// commission twice; a failed gateway call reverts the claim and raises a
    /// dispute instead of leaving a confirmed-but-unsettled ride.
    fn deduct_commission(&self, ride: Ride) -> Result<Ride, CashSettlementError> {
        let mut claimed = false;
        let ride = self
            .rides
            .update_with(&ride.id, &mut |ride| {
                if !ride.commission_deducted {
                    ride.commission_deducted = true;
                    claimed = true;
                }
            })
            .map_err(CashSettlementError::from_repo)?;

        if !claimed {
            return Ok(ride);
        }

        let Some(driver) = ride.driver_id.clone() else {
            return self.flag_dispute(ride, "cash ride has no assigned driver");
        };

        let commission = ride.fare.commission;
        let memo = format!("commission for cash ride {}", ride.id);
        match self
            .gateway
            .add_to_payout_balance(&driver, -i64::from(commission), &memo)
        {
            Ok(()) => {
                info!(ride = %ride.id, commission, "cash commission deducted");
                let ride = self
                    .rides
                    .update_with(&ride.id, &mut |ride| {
                        ride.dispute_flagged = false;
                        ride.metadata.insert(
                            "cash_commission".to_string(),
                            commission.to_string(),
                        );
                    })
                    .map_err(CashSettlementError::from_repo)?;
                Ok(ride)
            }
            Err(err) => {
                warn!(ride = %ride.id, %err, "commission deduction failed");
                let ride = self
                    .rides
                    .update_with(&ride.id, &mut |ride| {
                        ride.commission_deducted = false;
                    })
                    .map_err(CashSettlementError::from_repo)?;
                self.flag_dispute(ride, "commission deduction failed")
            }
        }
    }

    fn flag_dispute(&self, ride: Ride, reason: &str) -> Result<Ride, CashSettlementError> {
        let ride = self
            .rides
            .update_with(&ride.id, &mut |ride| {
                ride.dispute_flagged = true;
                ride.metadata
                    .insert("dispute_reason".to_string(), reason.to_string());
            })
            .map_err(CashSettlementError::from_repo)?;

        deliver(
            self.notifications.as_ref(),
            Notification::new(
                ADMIN_QUEUE,
                "Cash payment dispute",
                format!("Ride {}: {reason}", ride.id),
                NotificationCategory::Dispute,
            )
            .with("ride_id", &ride.id.0),
        );
        Ok(ride)
    }

    fn remind_outstanding_party(&self, ride: &Ride) {
        let outstanding = match (ride.driver_cash_confirm, ride.rider_cash_confirm) {
            (Some(_), None) => Some(ride.rider_id.0.clone()),
            (None, Some(_)) => ride.driver_id.as_ref().map(|driver| driver.0.clone()),
            // Parties disagree: nudge whoever denied to revisit.
            (Some(true), Some(false)) => Some(ride.rider_id.0.clone()),
            (Some(false), Some(true)) => ride.driver_id.as_ref().map(|driver| driver.0.clone()),
            _ => None,
        };

        if let Some(user) = outstanding {
            deliver(
                self.notifications.as_ref(),
                Notification::new(
                    user,
                    "Cash confirmation outstanding",
                    format!("Ride {} is waiting on your cash confirmation", ride.id),
                    NotificationCategory::Payment,
                )
                .with("ride_id", &ride.id.0),
            );
        }
    }
}

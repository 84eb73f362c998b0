//! Multi-party split-fare settlement.
//!
//! The fare is escrowed from creation (`funds_locked`) and allocated across
//! participants whose legs settle independently: mobile-money legs through
//! the gateway's async callback flow, cash legs through the participant's own
//! confirmation. Funds release to the driver exactly once, when every leg
//! reaches `completed`.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::rides::{
    deliver, Actor, Notification, NotificationCategory, NotificationSink,
    ParticipantPaymentStatus, PaymentGateway, PaymentMethod, RepositoryError, Ride, RideId,
    RideRepository, RideStatus, RiderId, Role, RoleError, SettlementPath, ShareSpec,
    SplitFareAllocation, SplitParticipant, SplitPaymentMethod, ADMIN_QUEUE,
};

/// Error raised by split-fare validation and settlement.
#[derive(Debug, thiserror::Error)]
pub enum SplitSettlementError {
    #[error("split fare requires at least two participants")]
    TooFewParticipants,
    #[error("participant {rider} has a non-positive amount")]
    NonPositiveAmount { rider: String },
    #[error("participant amounts total {sum} but the fare is {total} {currency}")]
    SumMismatch {
        sum: u32,
        total: u32,
        currency: String,
    },
    #[error("ride is not a split-fare ride")]
    NotSplitFare,
    #[error("ride has no allocation for participant {rider}")]
    UnknownParticipant { rider: String },
    #[error("split legs settle after the ride completes (currently {status})")]
    NotCompleted { status: &'static str },
    #[error("participant leg is not awaiting {expected}")]
    WrongLegState { expected: &'static str },
    #[error("ride not found")]
    NotFound,
    #[error(transparent)]
    Forbidden(#[from] RoleError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl SplitSettlementError {
    fn from_repo(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => SplitSettlementError::NotFound,
            other => SplitSettlementError::Repository(other),
        }
    }
}

/// Creation-time invariant: at least two positive shares summing exactly to
/// the fare. No rounding tolerance.
pub fn validate_shares(
    shares: &[ShareSpec],
    total: u32,
    currency: &str,
) -> Result<(), SplitSettlementError> {
    if shares.len() < 2 {
        return Err(SplitSettlementError::TooFewParticipants);
    }
    for share in shares {
        if share.amount == 0 {
            return Err(SplitSettlementError::NonPositiveAmount {
                rider: share.rider_id.0.clone(),
            });
        }
    }
    let sum: u32 = shares.iter().map(|share| share.amount).sum();
    if sum != total {
        return Err(SplitSettlementError::SumMismatch {
            sum,
            total,
            currency: currency.to_string(),
        });
    }
    Ok(())
}

/// Split `total` into `participants` integer shares, handing the remainder
/// out one unit at a time from the front so the sum is exact.
pub fn equal_split(total: u32, participants: usize) -> Vec<u32> {
    if participants == 0 {
        return Vec::new();
    }
    let count = participants as u32;
    let base = total / count;
    let remainder = total % count;
    (0..count)
        .map(|index| if index < remainder { base + 1 } else { base })
        .collect()
}

/// Build the allocation recorded on the ride at creation.
pub fn build_allocation(
    shares: &[ShareSpec],
    total: u32,
    currency: &str,
) -> Result<SplitFareAllocation, SplitSettlementError> {
    validate_shares(shares, total, currency)?;
    Ok(SplitFareAllocation {
        participants: shares
            .iter()
            .map(|share| SplitParticipant {
                rider_id: share.rider_id.clone(),
                amount: share.amount,
                method: share.method,
                status: ParticipantPaymentStatus::Pending,
                receipt: None,
            })
            .collect(),
        created_at: Utc::now(),
    })
}

/// One participant's leg for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct SplitLegView {
    pub rider_id: String,
    pub amount: u32,
    pub method: &'static str,
    pub status: &'static str,
}

/// Allocation state for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct SplitAllocationView {
    pub ride_id: String,
    pub total: u32,
    pub currency: String,
    pub participants: Vec<SplitLegView>,
    pub funds_locked: bool,
    pub funds_released: bool,
}

fn view_of(ride: &Ride, allocation: &SplitFareAllocation) -> SplitAllocationView {
    SplitAllocationView {
        ride_id: ride.id.0.clone(),
        total: ride.fare.final_amount,
        currency: ride.fare.currency.clone(),
        participants: allocation
            .participants
            .iter()
            .map(|participant| SplitLegView {
                rider_id: participant.rider_id.0.clone(),
                amount: participant.amount,
                method: participant.method.label(),
                status: participant.status.label(),
            })
            .collect(),
        funds_locked: ride.funds_locked,
        funds_released: ride.funds_released,
    }
}

/// Settlement service for split-fare rides.
pub struct SplitFareService<R, P, N> {
    rides: Arc<R>,
    gateway: Arc<P>,
    notifications: Arc<N>,
}

impl<R, P, N> SplitFareService<R, P, N>
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

    /// Kick off every leg once the ride completes: initiate mobile-money
    /// charges, prompt cash participants. Per-leg gateway failures mark that
    /// leg `failed` and never abort the others.
    pub fn finalize(&self, ride: &Ride) -> Result<(), SplitSettlementError> {
        let allocation = ride
            .split_allocation
            .as_ref()
            .ok_or(SplitSettlementError::NotSplitFare)?;

        for participant in &allocation.participants {
            match participant.method {
                SplitPaymentMethod::MobileMoney => {
                    self.initiate_mobile_leg(ride, &participant.rider_id, participant.amount);
                }
                SplitPaymentMethod::Cash => {
                    deliver(
                        self.notifications.as_ref(),
                        Notification::new(
                            &participant.rider_id.0,
                            "Confirm your share",
                            format!(
                                "Confirm your {} {} cash share of ride {}",
                                participant.amount, ride.fare.currency, ride.id
                            ),
                            NotificationCategory::Payment,
                        )
                        .with("ride_id", &ride.id.0),
                    );
                }
            }
        }
        Ok(())
    }

    /// A cash participant confirms their own share. Single-sided: the
    /// aggregate gate is every leg individually settled.
    pub fn confirm_cash(
        &self,
        ride_id: &RideId,
        actor: &Actor,
    ) -> Result<SplitAllocationView, SplitSettlementError> {
        actor.require(Role::Rider)?;
        let participant = RiderId(actor.id.clone());

        let ride = self.update_leg(ride_id, &participant, &mut |leg| match leg.method {
            SplitPaymentMethod::Cash => {
                leg.status = ParticipantPaymentStatus::Completed;
                Ok(())
            }
            SplitPaymentMethod::MobileMoney => Err(SplitSettlementError::WrongLegState {
                expected: "cash confirmation",
            }),
        })?;

        let ride = self.release_if_settled(ride)?;
        let allocation = ride
            .split_allocation
            .as_ref()
            .ok_or(SplitSettlementError::NotSplitFare)?;
        Ok(view_of(&ride, allocation))
    }

    /// Gateway callback for a mobile-money leg: the poll/push result arrives
    /// here and the leg lands `completed` or `failed`.
    pub fn resolve_mobile(
        &self,
        ride_id: &RideId,
        participant: &RiderId,
        success: bool,
    ) -> Result<SplitAllocationView, SplitSettlementError> {
        let ride = self.update_leg(ride_id, participant, &mut |leg| match leg.method {
            SplitPaymentMethod::MobileMoney => {
                leg.status = if success {
                    ParticipantPaymentStatus::Completed
                } else {
                    ParticipantPaymentStatus::Failed
                };
                Ok(())
            }
            SplitPaymentMethod::Cash => Err(SplitSettlementError::WrongLegState {
                expected: "a mobile-money callback",
            }),
        })?;

        if !success {
            deliver(
                self.notifications.as_ref(),
                Notification::new(
                    &participant.0,
                    "Payment failed",
                    format!("Your share of ride {} could not be collected; retry when ready", ride.id),
                    NotificationCategory::Payment,
                )
                .with("ride_id", &ride.id.0),
            );
        }

        let ride = self.release_if_settled(ride)?;
        let allocation = ride
            .split_allocation
            .as_ref()
            .ok_or(SplitSettlementError::NotSplitFare)?;
        Ok(view_of(&ride, allocation))
    }

    /// Participant-initiated retry of a failed mobile-money leg.
    pub fn retry_mobile(
        &self,
        ride_id: &RideId,
        actor: &Actor,
    ) -> Result<SplitAllocationView, SplitSettlementError> {
        actor.require(Role::Rider)?;
        let participant = RiderId(actor.id.clone());

        let ride = self.fetch_split_ride(ride_id)?;
        let allocation = ride
            .split_allocation
            .as_ref()
            .ok_or(SplitSettlementError::NotSplitFare)?;
        let leg = allocation
            .participants
            .iter()
            .find(|leg| leg.rider_id == participant)
            .ok_or_else(|| SplitSettlementError::UnknownParticipant {
                rider: participant.0.clone(),
            })?;
        if leg.method != SplitPaymentMethod::MobileMoney
            || leg.status != ParticipantPaymentStatus::Failed
        {
            return Err(SplitSettlementError::WrongLegState {
                expected: "a failed mobile-money leg",
            });
        }

        self.initiate_mobile_leg(&ride, &participant, leg.amount);
        let ride = self.fetch_split_ride(ride_id)?;
        let allocation = ride
            .split_allocation
            .as_ref()
            .ok_or(SplitSettlementError::NotSplitFare)?;
        Ok(view_of(&ride, allocation))
    }

    pub fn allocation(&self, ride_id: &RideId) -> Result<SplitAllocationView, SplitSettlementError> {
        let ride = self.fetch_split_ride(ride_id)?;
        let allocation = ride
            .split_allocation
            .as_ref()
            .ok_or(SplitSettlementError::NotSplitFare)?;
        Ok(view_of(&ride, allocation))
    }

    fn fetch_split_ride(&self, ride_id: &RideId) -> Result<Ride, SplitSettlementError> {
        let ride = self
            .rides
            .fetch(ride_id)
            .map_err(SplitSettlementError::from_repo)?
            .ok_or(SplitSettlementError::NotFound)?;
        if ride.settlement != SettlementPath::SplitFare {
            return Err(SplitSettlementError::NotSplitFare);
        }
        Ok(ride)
    }

    /// Charge one mobile-money leg; the eventual outcome arrives through
    /// [`Self::resolve_mobile`]. Initiation failure marks the leg failed.
    fn initiate_mobile_leg(&self, ride: &Ride, participant: &RiderId, amount: u32) {
        let description = format!("split fare share of ride {}", ride.id);
        let initiated = self.gateway.create_payment(
            &participant.0,
            amount,
            &ride.fare.currency,
            PaymentMethod::MobileMoney,
            &description,
        );

        let (status, receipt) = match initiated {
            Ok(receipt) => (ParticipantPaymentStatus::Processing, Some(receipt.payment_id)),
            Err(err) => {
                warn!(ride = %ride.id, participant = %participant.0, %err, "mobile-money leg initiation failed");
                (ParticipantPaymentStatus::Failed, None)
            }
        };

        let update = self.rides.update_with(&ride.id, &mut |ride| {
            if let Some(allocation) = ride.split_allocation.as_mut() {
                if let Some(leg) = allocation.participant_mut(participant) {
                    leg.status = status;
                    leg.receipt = receipt.clone();
                }
            }
        });
        if let Err(err) = update {
            warn!(ride = %ride.id, %err, "failed to record mobile-money leg state");
        }
    }

    /// Apply a fallible mutation to one leg inside a single atomic ride
    /// update.
    fn update_leg(
        &self,
        ride_id: &RideId,
        participant: &RiderId,
        mutate: &mut dyn FnMut(&mut SplitParticipant) -> Result<(), SplitSettlementError>,
    ) -> Result<Ride, SplitSettlementError> {
        // Immutable facts (path, membership, completion) are validated before
        // the atomic write; the write itself re-keys on the leg.
        let ride = self.fetch_split_ride(ride_id)?;
        if ride.status != RideStatus::Completed {
            return Err(SplitSettlementError::NotCompleted {
                status: ride.status.label(),
            });
        }

        let mut outcome: Result<(), SplitSettlementError> = Ok(());
        let ride = self
            .rides
            .update_with(ride_id, &mut |ride| {
                let Some(allocation) = ride.split_allocation.as_mut() else {
                    outcome = Err(SplitSettlementError::NotSplitFare);
                    return;
                };
                match allocation.participant_mut(participant) {
                    Some(leg) => outcome = mutate(leg),
                    None => {
                        outcome = Err(SplitSettlementError::UnknownParticipant {
                            rider: participant.0.clone(),
                        })
                    }
                }
            })
            .map_err(SplitSettlementError::from_repo)?;

        outcome?;
        Ok(ride)
    }

    /// Release escrow to the driver exactly once, the moment every leg is
    /// `completed`. The claim rides on `funds_released` inside one atomic
    /// update, so a second all-completed check is a no-op.
    fn release_if_settled(&self, ride: Ride) -> Result<Ride, SplitSettlementError> {
        let mut claimed = false;
        let ride = self
            .rides
            .update_with(&ride.id, &mut |ride| {
                let all_completed = ride
                    .split_allocation
                    .as_ref()
                    .map(SplitFareAllocation::all_completed)
                    .unwrap_or(false);
                if all_completed && !ride.funds_released {
                    ride.funds_released = true;
                    ride.funds_locked = false;
                    claimed = true;
                }
            })
            .map_err(SplitSettlementError::from_repo)?;

        if !claimed {
            return Ok(ride);
        }

        let Some(driver) = ride.driver_id.clone() else {
            warn!(ride = %ride.id, "split fare settled with no assigned driver");
            return Ok(ride);
        };

        let earnings = ride.fare.driver_earnings;
        let memo = format!("split fare payout for ride {}", ride.id);
        match self
            .gateway
            .add_to_payout_balance(&driver, i64::from(earnings), &memo)
        {
            Ok(()) => {
                info!(ride = %ride.id, earnings, "split fare escrow released to driver");
                deliver(
                    self.notifications.as_ref(),
                    Notification::new(
                        &driver.0,
                        "Split fare settled",
                        format!(
                            "All shares of ride {} are paid; {} {} added to your payout balance",
                            ride.id, earnings, ride.fare.currency
                        ),
                        NotificationCategory::Payment,
                    )
                    .with("ride_id", &ride.id.0),
                );
                Ok(ride)
            }
            Err(err) => {
                warn!(ride = %ride.id, %err, "escrow release failed; reverting claim");
                let ride = self
                    .rides
                    .update_with(&ride.id, &mut |ride| {
                        ride.funds_released = false;
                        ride.funds_locked = true;
                        ride.dispute_flagged = true;
                        ride.metadata.insert(
                            "dispute_reason".to_string(),
                            "split fare payout failed".to_string(),
                        );
                    })
                    .map_err(SplitSettlementError::from_repo)?;
                deliver(
                    self.notifications.as_ref(),
                    Notification::new(
                        ADMIN_QUEUE,
                        "Split fare payout failed",
                        format!("Ride {} settled but the driver payout failed", ride.id),
                        NotificationCategory::Dispute,
                    )
                    .with("ride_id", &ride.id.0),
                );
                Ok(ride)
            }
        }
    }
}

//! The ride lifecycle state machine and settlement dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    Actor, DriverId, PaymentMethod, Place, Ride, RideId, RideRequest, RideStatus, RideView,
    RiderId, Role, RoleError, SettlementPath,
};
use super::gateways::{
    deliver, DriverDirectory, Notification, NotificationCategory, NotificationSink,
    PaymentGateway, ADMIN_QUEUE,
};
use super::repository::{RepositoryError, RideRepository};
use crate::cancellation::{CancellationError, CancellationOutcome, CancellationPolicy, CancellationStore};
use crate::fare::{FareEngine, FareError, FareQuote};
use crate::settlement::{CashSettlementService, SplitFareService, SplitSettlementError};

/// Lifecycle dials, passed in at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    /// Hint returned with a `no_drivers` outcome.
    pub retry_after_secs: u64,
    /// Flat fee charged to the rider on a driver-reported no-show.
    pub no_show_fee: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retry_after_secs: 120,
            no_show_fee: 100,
        }
    }
}

/// Error raised by lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Forbidden(#[from] RoleError),
    #[error("outstanding cancellation fine of {amount} {currency}; clear it before requesting or cancelling rides")]
    FineOutstanding { amount: u32, currency: String },
    #[error("rider already has an active ride ({ride_id})")]
    ActiveRideExists { ride_id: String },
    #[error("ride is no longer available")]
    RideUnavailable,
    #[error("ride is not {expected} (currently {actual})")]
    InvalidTransition {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("actor is not the assigned driver for this ride")]
    NotAssignedDriver,
    #[error("actor is not the rider on this ride")]
    NotRideOwner,
    #[error("payment is already settled for this ride")]
    PaymentAlreadySettled,
    #[error("payment retries apply only to immediate-settlement rides")]
    NotImmediatePath,
    #[error("ride not found")]
    NotFound,
    #[error(transparent)]
    Fare(#[from] FareError),
    #[error(transparent)]
    Split(#[from] SplitSettlementError),
    #[error(transparent)]
    Cancellation(CancellationError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl LifecycleError {
    fn from_repo(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => LifecycleError::NotFound,
            RepositoryError::StatusMismatch { expected, actual } => {
                LifecycleError::InvalidTransition { expected, actual }
            }
            other => LifecycleError::Repository(other),
        }
    }

    fn from_cancellation(err: CancellationError) -> Self {
        match err {
            CancellationError::FineOutstanding { amount, currency } => {
                LifecycleError::FineOutstanding { amount, currency }
            }
            other => LifecycleError::Cancellation(other),
        }
    }
}

/// How settlement was dispatched when a ride completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PaymentDispatch {
    Settled {
        payment_id: String,
    },
    /// The charge failed; the ride stays completed and these methods can be
    /// retried.
    Failed {
        reason: String,
        alternatives: Vec<&'static str>,
    },
    AwaitingCashConfirmation,
    SplitInProgress,
}

/// Response to a ride request.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedRide {
    pub ride: RideView,
    /// Present when no drivers were found: retry after this many seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Response to a completion.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedRide {
    pub ride: RideView,
    pub payment: PaymentDispatch,
}

/// Response to a passenger cancellation.
#[derive(Debug, Clone, Serialize)]
pub struct CancelledRide {
    pub ride: RideView,
    pub cancellation: CancellationOutcome,
}

static RIDE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_ride_id() -> RideId {
    let id = RIDE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RideId(format!("ride-{id:06}"))
}

/// Orchestrator over the repository, driver directory, payment gateway,
/// notification sink, and cancellation store.
pub struct RideLifecycleService<R, D, P, N, S> {
    rides: Arc<R>,
    drivers: Arc<D>,
    gateway: Arc<P>,
    notifications: Arc<N>,
    fare: Arc<FareEngine>,
    cancellation: Arc<CancellationPolicy<S, P>>,
    split: Arc<SplitFareService<R, P, N>>,
    cash: Arc<CashSettlementService<R, P, N>>,
    config: LifecycleConfig,
}

impl<R, D, P, N, S> RideLifecycleService<R, D, P, N, S>
where
    R: RideRepository + 'static,
    D: DriverDirectory + 'static,
    P: PaymentGateway + 'static,
    N: NotificationSink + 'static,
    S: CancellationStore + 'static,
{
    pub fn new(
        rides: Arc<R>,
        drivers: Arc<D>,
        gateway: Arc<P>,
        notifications: Arc<N>,
        fare: Arc<FareEngine>,
        cancellation: Arc<CancellationPolicy<S, P>>,
        config: LifecycleConfig,
    ) -> Self {
        let split = Arc::new(SplitFareService::new(
            rides.clone(),
            gateway.clone(),
            notifications.clone(),
        ));
        let cash = Arc::new(CashSettlementService::new(
            rides.clone(),
            gateway.clone(),
            notifications.clone(),
        ));
        Self {
            rides,
            drivers,
            gateway,
            notifications,
            fare,
            cancellation,
            split,
            cash,
            config,
        }
    }

    /// The settlement services sharing this lifecycle's collaborators.
    pub fn split_service(&self) -> Arc<SplitFareService<R, P, N>> {
        self.split.clone()
    }

    pub fn cash_service(&self) -> Arc<CashSettlementService<R, P, N>> {
        self.cash.clone()
    }

    /// Price a leg without creating anything.
    pub fn estimate(
        &self,
        pickup: &Place,
        destination: &Place,
        class: crate::fare::RideClass,
    ) -> Result<FareQuote, LifecycleError> {
        Ok(self.fare.quote(pickup.coords, destination.coords, class)?)
    }

    /// Request a ride. The quote is computed and attached before the ride is
    /// persisted, so no ride is ever visible without one.
    pub fn create(&self, actor: &Actor, request: RideRequest) -> Result<CreatedRide, LifecycleError> {
        actor.require(Role::Rider)?;
        let rider = RiderId(actor.id.clone());

        self.cancellation
            .check_eligibility(&rider)
            .map_err(LifecycleError::from_cancellation)?;

        if let Some(active) = self
            .rides
            .active_ride_for_rider(&rider)
            .map_err(LifecycleError::from_repo)?
        {
            return Err(LifecycleError::ActiveRideExists {
                ride_id: active.id.0,
            });
        }

        let quote = self.fare.quote(
            request.pickup.coords,
            request.destination.coords,
            request.ride_class,
        )?;

        let allocation = match &request.split_shares {
            Some(shares) => Some(crate::settlement::build_allocation(
                shares,
                quote.final_amount,
                &quote.currency,
            )?),
            None => None,
        };

        let ride = Ride::new(next_ride_id(), rider, &request, quote, allocation, Utc::now());
        let ride = self
            .rides
            .insert(ride)
            .map_err(LifecycleError::from_repo)?;
        info!(ride = %ride.id, settlement = ride.settlement.label(), "ride requested");

        let (ride, retry_after_secs) = self.run_driver_search(ride)?;
        Ok(CreatedRide {
            ride: ride.view(),
            retry_after_secs,
        })
    }

    /// Driver claims a pending ride. The compare-and-set on status decides
    /// races: exactly one concurrent acceptance wins, the rest see
    /// `RideUnavailable`.
    pub fn accept(&self, ride_id: &RideId, actor: &Actor) -> Result<RideView, LifecycleError> {
        actor.require(Role::Driver)?;
        let driver = DriverId(actor.id.clone());
        let now = Utc::now();

        let ride = self
            .rides
            .update_if_status(ride_id, RideStatus::Pending, &mut |ride| {
                ride.driver_id = Some(driver.clone());
                ride.status = RideStatus::Accepted;
                ride.accepted_at = Some(now);
            })
            .map_err(|err| match err {
                RepositoryError::StatusMismatch { .. } => LifecycleError::RideUnavailable,
                other => LifecycleError::from_repo(other),
            })?;

        self.drivers.reserve(&driver);
        info!(ride = %ride.id, driver = %driver.0, "ride accepted");
        deliver(
            self.notifications.as_ref(),
            Notification::new(
                &ride.rider_id.0,
                "Driver on the way",
                format!("Driver {} accepted your ride", driver.0),
                NotificationCategory::RideUpdate,
            )
            .with("ride_id", &ride.id.0),
        );
        Ok(ride.view())
    }

    /// Driver turns the request down. Terminal.
    pub fn decline(&self, ride_id: &RideId, actor: &Actor) -> Result<RideView, LifecycleError> {
        actor.require(Role::Driver)?;
        let driver = actor.id.clone();

        let ride = self
            .rides
            .update_if_status(ride_id, RideStatus::Pending, &mut |ride| {
                ride.status = RideStatus::Declined;
                ride.metadata
                    .insert("declined_by".to_string(), driver.clone());
            })
            .map_err(LifecycleError::from_repo)?;

        deliver(
            self.notifications.as_ref(),
            Notification::new(
                &ride.rider_id.0,
                "Request declined",
                "The driver declined your request; please try again",
                NotificationCategory::RideUpdate,
            )
            .with("ride_id", &ride.id.0),
        );
        Ok(ride.view())
    }

    /// Assigned driver picks the rider up.
    pub fn start(&self, ride_id: &RideId, actor: &Actor) -> Result<RideView, LifecycleError> {
        actor.require(Role::Driver)?;
        let driver = DriverId(actor.id.clone());
        let ride = self.fetch_ride(ride_id)?;
        if !ride.is_assigned_to(&driver) {
            return Err(LifecycleError::NotAssignedDriver);
        }

        let now = Utc::now();
        let ride = self
            .rides
            .update_if_status(ride_id, RideStatus::Accepted, &mut |ride| {
                ride.status = RideStatus::Started;
                ride.started_at = Some(now);
            })
            .map_err(LifecycleError::from_repo)?;

        info!(ride = %ride.id, "ride started");
        Ok(ride.view())
    }

    /// Assigned driver drops the rider off. Completion frees the driver and
    /// dispatches the settlement path chosen at creation; a failed immediate
    /// charge never rolls the completion back.
    pub fn complete(&self, ride_id: &RideId, actor: &Actor) -> Result<CompletedRide, LifecycleError> {
        actor.require(Role::Driver)?;
        let driver = DriverId(actor.id.clone());
        let ride = self.fetch_ride(ride_id)?;
        if !ride.is_assigned_to(&driver) {
            return Err(LifecycleError::NotAssignedDriver);
        }

        let now = Utc::now();
        let ride = self
            .rides
            .update_if_status(ride_id, RideStatus::Started, &mut |ride| {
                ride.status = RideStatus::Completed;
                ride.completed_at = Some(now);
            })
            .map_err(LifecycleError::from_repo)?;

        self.drivers.release(&driver);
        info!(ride = %ride.id, settlement = ride.settlement.label(), "ride completed");

        let payment = match ride.settlement {
            SettlementPath::Immediate => self.charge_immediate(&ride),
            SettlementPath::CashDualConfirm => {
                self.cash.initialize(&ride);
                PaymentDispatch::AwaitingCashConfirmation
            }
            SettlementPath::SplitFare => {
                if let Err(err) = self.split.finalize(&ride) {
                    warn!(ride = %ride.id, %err, "split finalization stumbled");
                }
                PaymentDispatch::SplitInProgress
            }
        };

        let ride = self.fetch_ride(ride_id)?;
        Ok(CompletedRide {
            ride: ride.view(),
            payment,
        })
    }

    /// Passenger cancels. An outstanding fine blocks this entirely;
    /// otherwise cancellation always succeeds and the policy decides whether
    /// this one is free.
    pub fn cancel(
        &self,
        ride_id: &RideId,
        actor: &Actor,
        reason: &str,
    ) -> Result<CancelledRide, LifecycleError> {
        actor.require(Role::Rider)?;
        let rider = RiderId(actor.id.clone());
        let ride = self.fetch_ride(ride_id)?;
        if ride.rider_id != rider {
            return Err(LifecycleError::NotRideOwner);
        }

        self.cancellation
            .check_eligibility(&rider)
            .map_err(LifecycleError::from_cancellation)?;

        let now = Utc::now();
        let reason = reason.to_string();
        let mut refused: Option<&'static str> = None;
        let ride = self
            .rides
            .update_with(ride_id, &mut |ride| {
                if ride.status.is_active() {
                    ride.status = RideStatus::CancelledByPassenger;
                    ride.cancelled_at = Some(now);
                    ride.metadata
                        .insert("cancellation_reason".to_string(), reason.clone());
                } else {
                    refused = Some(ride.status.label());
                }
            })
            .map_err(LifecycleError::from_repo)?;
        if let Some(actual) = refused {
            return Err(LifecycleError::InvalidTransition {
                expected: "pending, accepted or started",
                actual,
            });
        }

        let outcome = self
            .cancellation
            .process_cancellation(&rider)
            .map_err(LifecycleError::from_cancellation)?;

        let ride = if let Some(fine) = outcome.fine_applied {
            self.rides
                .update_with(ride_id, &mut |ride| {
                    ride.metadata
                        .insert("cancellation_fine".to_string(), fine.to_string());
                })
                .map_err(LifecycleError::from_repo)?
        } else {
            ride
        };

        if let Some(driver) = &ride.driver_id {
            self.drivers.release(driver);
            deliver(
                self.notifications.as_ref(),
                Notification::new(
                    &driver.0,
                    "Ride cancelled",
                    format!("The rider cancelled ride {}", ride.id),
                    NotificationCategory::RideUpdate,
                )
                .with("ride_id", &ride.id.0),
            );
        }

        info!(ride = %ride.id, count = outcome.count, fined = outcome.fine_applied.is_some(), "ride cancelled by passenger");
        Ok(CancelledRide {
            ride: ride.view(),
            cancellation: outcome,
        })
    }

    /// Assigned driver backs out before pickup. The ride re-enters the
    /// driver search rather than dying.
    pub fn driver_cancel(
        &self,
        ride_id: &RideId,
        actor: &Actor,
        reason: &str,
    ) -> Result<CreatedRide, LifecycleError> {
        actor.require(Role::Driver)?;
        let driver = DriverId(actor.id.clone());
        let ride = self.fetch_ride(ride_id)?;
        if !ride.is_assigned_to(&driver) {
            return Err(LifecycleError::NotAssignedDriver);
        }

        let reason = reason.to_string();
        let departed = driver.0.clone();
        let ride = self
            .rides
            .update_if_status(ride_id, RideStatus::Accepted, &mut |ride| {
                ride.status = RideStatus::CancelledByDriver;
                ride.driver_id = None;
                ride.accepted_at = None;
                ride.metadata.insert(
                    "driver_cancellation".to_string(),
                    format!("{departed}: {reason}"),
                );
            })
            .map_err(LifecycleError::from_repo)?;

        deliver(
            self.notifications.as_ref(),
            Notification::new(
                &ride.rider_id.0,
                "Finding you a new driver",
                "Your driver had to cancel; searching again",
                NotificationCategory::RideUpdate,
            )
            .with("ride_id", &ride.id.0),
        );

        // Logically still pending: straight back into the search. The
        // departing driver is released only afterwards, so the search cannot
        // hand the ride straight back to them.
        let ride = self
            .rides
            .update_if_status(ride_id, RideStatus::CancelledByDriver, &mut |ride| {
                ride.status = RideStatus::Pending;
            })
            .map_err(LifecycleError::from_repo)?;
        let (ride, retry_after_secs) = self.run_driver_search(ride)?;
        self.drivers.release(&driver);
        Ok(CreatedRide {
            ride: ride.view(),
            retry_after_secs,
        })
    }

    /// Driver reports the rider never showed. Terminal, with a fixed fee
    /// charged to the rider; a failed charge is recorded, never blocking.
    pub fn report_no_show(&self, ride_id: &RideId, actor: &Actor) -> Result<RideView, LifecycleError> {
        actor.require(Role::Driver)?;
        let driver = DriverId(actor.id.clone());
        let ride = self.fetch_ride(ride_id)?;
        if !ride.is_assigned_to(&driver) {
            return Err(LifecycleError::NotAssignedDriver);
        }

        let ride = self
            .rides
            .update_if_status(ride_id, RideStatus::Accepted, &mut |ride| {
                ride.status = RideStatus::NoShow;
            })
            .map_err(LifecycleError::from_repo)?;

        self.drivers.release(&driver);

        let fee = self.config.no_show_fee;
        let charge = self.gateway.create_payment(
            &ride.rider_id.0,
            fee,
            &ride.fare.currency,
            ride.payment_method,
            "no-show fee",
        );
        let fee_note = match charge {
            Ok(receipt) => format!("charged ({})", receipt.payment_id),
            Err(err) => {
                warn!(ride = %ride.id, %err, "no-show fee charge failed");
                format!("charge failed: {err}")
            }
        };
        let ride = self
            .rides
            .update_with(ride_id, &mut |ride| {
                ride.metadata
                    .insert("no_show_fee".to_string(), format!("{fee} {fee_note}"));
            })
            .map_err(LifecycleError::from_repo)?;

        deliver(
            self.notifications.as_ref(),
            Notification::new(
                &ride.rider_id.0,
                "Marked as no-show",
                format!("Your driver reported a no-show; a {fee} {} fee applies", ride.fare.currency),
                NotificationCategory::Payment,
            )
            .with("ride_id", &ride.id.0),
        );
        Ok(ride.view())
    }

    /// Rider redirects a ride in progress. The fare is re-quoted for the new
    /// destination with the original class; the delta is recorded. Driver
    /// assignment is not re-validated.
    pub fn change_destination(
        &self,
        ride_id: &RideId,
        actor: &Actor,
        destination: Place,
    ) -> Result<RideView, LifecycleError> {
        actor.require(Role::Rider)?;
        let rider = RiderId(actor.id.clone());
        let ride = self.fetch_ride(ride_id)?;
        if ride.rider_id != rider {
            return Err(LifecycleError::NotRideOwner);
        }
        if ride.status != RideStatus::Started {
            return Err(LifecycleError::InvalidTransition {
                expected: "started",
                actual: ride.status.label(),
            });
        }

        let quote = self
            .fare
            .quote(ride.pickup.coords, destination.coords, ride.ride_class)?;
        let previous = ride.fare.final_amount;
        let delta = i64::from(quote.final_amount) - i64::from(previous);

        let ride = self
            .rides
            .update_if_status(ride_id, RideStatus::Started, &mut |ride| {
                ride.metadata
                    .insert("previous_fare".to_string(), previous.to_string());
                ride.metadata
                    .insert("fare_delta".to_string(), format!("{delta:+}"));
                ride.destination = destination.clone();
                ride.fare = quote.clone();
            })
            .map_err(LifecycleError::from_repo)?;

        if let Some(driver) = &ride.driver_id {
            deliver(
                self.notifications.as_ref(),
                Notification::new(
                    &driver.0,
                    "Destination changed",
                    format!("New destination: {}", ride.destination.address),
                    NotificationCategory::RideUpdate,
                )
                .with("ride_id", &ride.id.0),
            );
        }
        Ok(ride.view())
    }

    /// Re-run the search for a ride stuck in `no_drivers`.
    pub fn retry_driver_search(
        &self,
        ride_id: &RideId,
        actor: &Actor,
    ) -> Result<CreatedRide, LifecycleError> {
        actor.require(Role::Rider)?;
        let rider = RiderId(actor.id.clone());
        let ride = self.fetch_ride(ride_id)?;
        if ride.rider_id != rider {
            return Err(LifecycleError::NotRideOwner);
        }

        let ride = self
            .rides
            .update_if_status(ride_id, RideStatus::NoDrivers, &mut |ride| {
                ride.status = RideStatus::Pending;
            })
            .map_err(LifecycleError::from_repo)?;

        let (ride, retry_after_secs) = self.run_driver_search(ride)?;
        Ok(CreatedRide {
            ride: ride.view(),
            retry_after_secs,
        })
    }

    /// Either party raises an emergency on a ride underway. Recorded on the
    /// ride and escalated immediately.
    pub fn report_emergency(
        &self,
        ride_id: &RideId,
        actor: &Actor,
        detail: &str,
    ) -> Result<RideView, LifecycleError> {
        actor.require_one_of(&[Role::Rider, Role::Driver])?;
        let ride = self.fetch_ride(ride_id)?;
        let is_party = match actor.role {
            Role::Rider => ride.rider_id.0 == actor.id,
            Role::Driver => ride.is_assigned_to(&DriverId(actor.id.clone())),
            Role::Admin => false,
        };
        if !is_party {
            return Err(LifecycleError::NotRideOwner);
        }
        if !matches!(ride.status, RideStatus::Accepted | RideStatus::Started) {
            return Err(LifecycleError::InvalidTransition {
                expected: "accepted or started",
                actual: ride.status.label(),
            });
        }

        let record = format!("{} ({}): {detail} at {}", actor.id, actor.role.label(), Utc::now());
        let ride = self
            .rides
            .update_with(ride_id, &mut |ride| {
                ride.metadata
                    .insert("emergency_record".to_string(), record.clone());
            })
            .map_err(LifecycleError::from_repo)?;

        deliver(
            self.notifications.as_ref(),
            Notification::new(
                ADMIN_QUEUE,
                "Emergency reported",
                format!("Ride {}: {detail}", ride.id),
                NotificationCategory::Emergency,
            )
            .with("ride_id", &ride.id.0)
            .with("reported_by", &actor.id),
        );
        Ok(ride.view())
    }

    /// Rider retries a failed immediate charge with another method. Cash
    /// means the driver was paid directly, so the platform recovers its
    /// commission from the driver's payout balance instead.
    pub fn retry_payment(
        &self,
        ride_id: &RideId,
        actor: &Actor,
        method: PaymentMethod,
    ) -> Result<PaymentDispatch, LifecycleError> {
        actor.require(Role::Rider)?;
        let rider = RiderId(actor.id.clone());
        let ride = self.fetch_ride(ride_id)?;
        if ride.rider_id != rider {
            return Err(LifecycleError::NotRideOwner);
        }
        if ride.settlement != SettlementPath::Immediate {
            return Err(LifecycleError::NotImmediatePath);
        }
        if ride.status != RideStatus::Completed {
            return Err(LifecycleError::InvalidTransition {
                expected: "completed",
                actual: ride.status.label(),
            });
        }
        if ride.metadata.get("payment_status").map(String::as_str) == Some("settled") {
            return Err(LifecycleError::PaymentAlreadySettled);
        }

        let dispatch = match method {
            PaymentMethod::Cash => {
                let Some(driver) = ride.driver_id.clone() else {
                    return Err(LifecycleError::NotAssignedDriver);
                };
                let memo = format!("commission recovery for cash-settled ride {}", ride.id);
                match self
                    .gateway
                    .add_to_payout_balance(&driver, -i64::from(ride.fare.commission), &memo)
                {
                    Ok(()) => PaymentDispatch::Settled {
                        payment_id: format!("cash:{}", ride.id),
                    },
                    Err(err) => PaymentDispatch::Failed {
                        reason: err.to_string(),
                        alternatives: vec!["mobile_money", "card", "wallet"],
                    },
                }
            }
            other => self.charge(&ride, other),
        };

        self.record_dispatch(ride_id, &dispatch)?;
        Ok(dispatch)
    }

    pub fn fetch(&self, ride_id: &RideId) -> Result<RideView, LifecycleError> {
        Ok(self.fetch_ride(ride_id)?.view())
    }

    fn fetch_ride(&self, ride_id: &RideId) -> Result<Ride, LifecycleError> {
        self.rides
            .fetch(ride_id)
            .map_err(LifecycleError::from_repo)?
            .ok_or(LifecycleError::NotFound)
    }

    /// Find candidate drivers for a pending ride, or park it in `no_drivers`
    /// with a retry hint.
    fn run_driver_search(&self, ride: Ride) -> Result<(Ride, Option<u64>), LifecycleError> {
        let nearby = self.drivers.available_near(ride.pickup.coords);
        if nearby.is_empty() {
            let ride = self
                .rides
                .update_if_status(&ride.id, RideStatus::Pending, &mut |ride| {
                    ride.status = RideStatus::NoDrivers;
                })
                .map_err(LifecycleError::from_repo)?;
            info!(ride = %ride.id, "no drivers available");
            return Ok((ride, Some(self.config.retry_after_secs)));
        }

        for driver in &nearby {
            deliver(
                self.notifications.as_ref(),
                Notification::new(
                    &driver.0,
                    "New ride request",
                    format!("Pickup at {}", ride.pickup.address),
                    NotificationCategory::RideUpdate,
                )
                .with("ride_id", &ride.id.0),
            );
        }
        Ok((ride, None))
    }

    /// Immediate settlement on completion. The ride is already `completed`;
    /// whatever happens here is surfaced, not rolled back.
    fn charge_immediate(&self, ride: &Ride) -> PaymentDispatch {
        let dispatch = self.charge(ride, ride.payment_method);
        if let Err(err) = self.record_dispatch(&ride.id, &dispatch) {
            warn!(ride = %ride.id, %err, "failed to record payment outcome");
        }
        dispatch
    }

    fn charge(&self, ride: &Ride, method: PaymentMethod) -> PaymentDispatch {
        let description = format!("fare for ride {}", ride.id);
        match self.gateway.create_payment(
            &ride.rider_id.0,
            ride.fare.final_amount,
            &ride.fare.currency,
            method,
            &description,
        ) {
            Ok(receipt) => {
                if let Some(driver) = &ride.driver_id {
                    let memo = format!("earnings for ride {}", ride.id);
                    if let Err(err) = self.gateway.add_to_payout_balance(
                        driver,
                        i64::from(ride.fare.driver_earnings),
                        &memo,
                    ) {
                        warn!(ride = %ride.id, %err, "driver payout credit failed");
                    }
                }
                deliver(
                    self.notifications.as_ref(),
                    Notification::new(
                        &ride.rider_id.0,
                        "Payment received",
                        format!("{} {} charged for ride {}", ride.fare.final_amount, ride.fare.currency, ride.id),
                        NotificationCategory::Payment,
                    )
                    .with("payment_id", &receipt.payment_id),
                );
                PaymentDispatch::Settled {
                    payment_id: receipt.payment_id,
                }
            }
            Err(err) => {
                warn!(ride = %ride.id, %err, "immediate charge failed; ride stays completed");
                deliver(
                    self.notifications.as_ref(),
                    Notification::new(
                        &ride.rider_id.0,
                        "Payment failed",
                        "We could not collect your fare; please retry with another method",
                        NotificationCategory::Payment,
                    )
                    .with("ride_id", &ride.id.0),
                );
                PaymentDispatch::Failed {
                    reason: err.to_string(),
                    alternatives: vec!["mobile_money", "card", "wallet", "cash"],
                }
            }
        }
    }

    fn record_dispatch(
        &self,
        ride_id: &RideId,
        dispatch: &PaymentDispatch,
    ) -> Result<(), LifecycleError> {
        let (status, detail) = match dispatch {
            PaymentDispatch::Settled { payment_id } => ("settled", payment_id.clone()),
            PaymentDispatch::Failed { reason, .. } => ("failed", reason.clone()),
            PaymentDispatch::AwaitingCashConfirmation => ("awaiting_cash", String::new()),
            PaymentDispatch::SplitInProgress => ("split_in_progress", String::new()),
        };
        self.rides
            .update_with(ride_id, &mut |ride| {
                ride.metadata
                    .insert("payment_status".to_string(), status.to_string());
                if !detail.is_empty() {
                    ride.metadata
                        .insert("payment_detail".to_string(), detail.clone());
                }
            })
            .map_err(LifecycleError::from_repo)?;
        Ok(())
    }
}

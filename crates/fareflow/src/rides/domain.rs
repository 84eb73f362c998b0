use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fare::{Coordinates, FareQuote, RideClass};

/// Identifier wrapper for rides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RideId(pub String);

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier wrapper for riders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RiderId(pub String);

/// Identifier wrapper for drivers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriverId(pub String);

/// Capability claimed by the caller. Authentication happens upstream; every
/// service operation re-checks the role it needs before touching state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Rider,
    Driver,
    Admin,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Rider => "rider",
            Role::Driver => "driver",
            Role::Admin => "admin",
        }
    }
}

/// The acting user for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn rider(id: impl Into<String>) -> Self {
        Self::new(id, Role::Rider)
    }

    pub fn driver(id: impl Into<String>) -> Self {
        Self::new(id, Role::Driver)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn require(&self, role: Role) -> Result<(), RoleError> {
        if self.role == role {
            Ok(())
        } else {
            Err(RoleError {
                required: role.label(),
                actual: self.role.label(),
            })
        }
    }

    /// Accept any of the listed roles.
    pub fn require_one_of(&self, roles: &[Role]) -> Result<(), RoleError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(RoleError {
                required: roles.first().map(|role| role.label()).unwrap_or("any"),
                actual: self.role.label(),
            })
        }
    }
}

/// Raised when an actor lacks the capability an operation demands.
#[derive(Debug, thiserror::Error)]
#[error("operation requires the {required} role (actor holds {actual})")]
pub struct RoleError {
    pub required: &'static str,
    pub actual: &'static str,
}

/// A geographic point with its human-readable address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub coords: Coordinates,
    pub address: String,
}

/// How the rider intends to pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    Card,
    Wallet,
}

impl PaymentMethod {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::Card => "card",
            PaymentMethod::Wallet => "wallet",
        }
    }
}

/// Settlement path fixed at creation. Exactly one is active per ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementPath {
    /// Charge the rider's chosen method when the ride completes.
    Immediate,
    /// Driver and rider both attest that cash changed hands.
    CashDualConfirm,
    /// The fare is escrowed and split across several paying participants.
    SplitFare,
}

impl SettlementPath {
    pub const fn label(self) -> &'static str {
        match self {
            SettlementPath::Immediate => "immediate",
            SettlementPath::CashDualConfirm => "cash_dual_confirm",
            SettlementPath::SplitFare => "split_fare",
        }
    }

    pub fn for_request(request: &RideRequest) -> Self {
        if request.split_shares.is_some() {
            SettlementPath::SplitFare
        } else if request.payment_method == PaymentMethod::Cash {
            SettlementPath::CashDualConfirm
        } else {
            SettlementPath::Immediate
        }
    }
}

/// Ride state machine vocabulary.
///
/// Happy path `pending -> accepted -> started -> completed`; every branch state
/// is terminal except `cancelled_by_driver`, which re-enters the driver
/// search. `payment_failed` is terminal for rides whose settlement ultimately
/// could not be collected; ride fulfilment never transitions into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    Accepted,
    Started,
    Completed,
    Declined,
    NoDrivers,
    CancelledByPassenger,
    CancelledByDriver,
    NoShow,
    PaymentFailed,
}

impl RideStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::Started => "started",
            RideStatus::Completed => "completed",
            RideStatus::Declined => "declined",
            RideStatus::NoDrivers => "no_drivers",
            RideStatus::CancelledByPassenger => "cancelled_by_passenger",
            RideStatus::CancelledByDriver => "cancelled_by_driver",
            RideStatus::NoShow => "no_show",
            RideStatus::PaymentFailed => "payment_failed",
        }
    }

    /// A ride the rider is still committed to: blocks requesting another.
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            RideStatus::Pending | RideStatus::Accepted | RideStatus::Started
        )
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(
            self,
            RideStatus::Pending
                | RideStatus::Accepted
                | RideStatus::Started
                | RideStatus::CancelledByDriver
        )
    }
}

/// Payment method chosen by one split-fare participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPaymentMethod {
    MobileMoney,
    Cash,
}

impl SplitPaymentMethod {
    pub const fn label(self) -> &'static str {
        match self {
            SplitPaymentMethod::MobileMoney => "mobile_money",
            SplitPaymentMethod::Cash => "cash",
        }
    }
}

/// Per-participant payment progress for a split-fare ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantPaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ParticipantPaymentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ParticipantPaymentStatus::Pending => "pending",
            ParticipantPaymentStatus::Processing => "processing",
            ParticipantPaymentStatus::Completed => "completed",
            ParticipantPaymentStatus::Failed => "failed",
        }
    }
}

/// Requested share for one participant, supplied at ride creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareSpec {
    pub rider_id: RiderId,
    pub amount: u32,
    pub method: SplitPaymentMethod,
}

/// One participant's leg of a split fare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitParticipant {
    pub rider_id: RiderId,
    pub amount: u32,
    pub method: SplitPaymentMethod,
    pub status: ParticipantPaymentStatus,
    pub receipt: Option<String>,
}

/// Allocation of one ride's fare across participants. Lives on the ride so
/// leg updates and the all-completed release check share one atomic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitFareAllocation {
    pub participants: Vec<SplitParticipant>,
    pub created_at: DateTime<Utc>,
}

impl SplitFareAllocation {
    pub fn all_completed(&self) -> bool {
        !self.participants.is_empty()
            && self
                .participants
                .iter()
                .all(|participant| participant.status == ParticipantPaymentStatus::Completed)
    }

    pub fn participant_mut(&mut self, rider: &RiderId) -> Option<&mut SplitParticipant> {
        self.participants
            .iter_mut()
            .find(|participant| &participant.rider_id == rider)
    }
}

/// Inbound ride request, validated by the lifecycle service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub pickup: Place,
    pub destination: Place,
    pub ride_class: RideClass,
    pub payment_method: PaymentMethod,
    /// Present iff this is a split-fare ride.
    pub split_shares: Option<Vec<ShareSpec>>,
}

/// The ride record. Never hard-deleted; branch statuses are terminal marks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: RideId,
    pub rider_id: RiderId,
    pub driver_id: Option<DriverId>,
    pub pickup: Place,
    pub destination: Place,
    pub status: RideStatus,
    pub ride_class: RideClass,
    pub payment_method: PaymentMethod,
    pub settlement: SettlementPath,
    pub fare: FareQuote,
    /// Post-ride GPS recalculation; the original quote above is retained.
    pub recalculated_fare: Option<FareQuote>,
    pub split_allocation: Option<SplitFareAllocation>,
    pub dispute_flagged: bool,
    pub commission_deducted: bool,
    pub funds_locked: bool,
    pub funds_released: bool,
    pub driver_cash_confirm: Option<bool>,
    pub rider_cash_confirm: Option<bool>,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

impl Ride {
    pub fn new(
        id: RideId,
        rider_id: RiderId,
        request: &RideRequest,
        fare: FareQuote,
        allocation: Option<SplitFareAllocation>,
        requested_at: DateTime<Utc>,
    ) -> Self {
        let settlement = SettlementPath::for_request(request);
        Self {
            id,
            rider_id,
            driver_id: None,
            pickup: request.pickup.clone(),
            destination: request.destination.clone(),
            status: RideStatus::Pending,
            ride_class: request.ride_class,
            payment_method: request.payment_method,
            settlement,
            fare,
            recalculated_fare: None,
            split_allocation: allocation,
            dispute_flagged: false,
            commission_deducted: false,
            // Split fares are escrowed from the moment the ride exists.
            funds_locked: settlement == SettlementPath::SplitFare,
            funds_released: false,
            driver_cash_confirm: None,
            rider_cash_confirm: None,
            requested_at,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn is_assigned_to(&self, driver: &DriverId) -> bool {
        self.driver_id.as_ref() == Some(driver)
    }

    pub fn view(&self) -> RideView {
        RideView {
            ride_id: self.id.0.clone(),
            rider_id: self.rider_id.0.clone(),
            driver_id: self.driver_id.as_ref().map(|driver| driver.0.clone()),
            status: self.status.label(),
            ride_class: self.ride_class.label(),
            payment_method: self.payment_method.label(),
            settlement: self.settlement.label(),
            fare_amount: self.fare.final_amount,
            recalculated_fare_amount: self
                .recalculated_fare
                .as_ref()
                .map(|quote| quote.final_amount),
            currency: self.fare.currency.clone(),
            warnings: self
                .fare
                .warnings
                .iter()
                .map(|warning| warning.summary())
                .collect(),
            dispute_flagged: self.dispute_flagged,
            commission_deducted: self.commission_deducted,
            funds_locked: self.funds_locked,
            funds_released: self.funds_released,
            metadata: self.metadata.clone(),
        }
    }
}

/// Sanitized ride representation for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct RideView {
    pub ride_id: String,
    pub rider_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    pub status: &'static str,
    pub ride_class: &'static str,
    pub payment_method: &'static str,
    pub settlement: &'static str,
    pub fare_amount: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recalculated_fare_amount: Option<u32>,
    pub currency: String,
    pub warnings: Vec<String>,
    pub dispute_flagged: bool,
    pub commission_deducted: bool,
    pub funds_locked: bool,
    pub funds_released: bool,
    pub metadata: BTreeMap<String, String>,
}

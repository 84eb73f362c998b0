use std::sync::Arc;

use chrono::Utc;

use crate::fare::RideClass;
use crate::rides::{
    DriverId, PaymentMethod, Ride, RideId, RideRequest, RideStatus, RiderId, ShareSpec,
    SplitPaymentMethod,
};
use crate::settlement::{
    build_allocation, CashSettlementService, SplitFareService,
};
use crate::test_helpers::{
    nairobi_cbd, quote_for, westlands, MemoryNotificationSink, MemoryPaymentGateway,
    MemoryRideRepository,
};

pub(super) const DRIVER: &str = "driver-1";
pub(super) const RIDER: &str = "rider-1";

pub(super) fn request(payment_method: PaymentMethod, shares: Option<Vec<ShareSpec>>) -> RideRequest {
    RideRequest {
        pickup: nairobi_cbd(),
        destination: westlands(),
        ride_class: RideClass::Car,
        payment_method,
        split_shares: shares,
    }
}

/// A completed 10 km car ride paid in cash: fare 900, commission 170.
pub(super) fn completed_cash_ride(id: &str) -> Ride {
    let mut ride = Ride::new(
        RideId(id.to_string()),
        RiderId(RIDER.to_string()),
        &request(PaymentMethod::Cash, None),
        quote_for(10.0, 22.0, RideClass::Car),
        None,
        Utc::now(),
    );
    ride.driver_id = Some(DriverId(DRIVER.to_string()));
    ride.status = RideStatus::Completed;
    ride.completed_at = Some(Utc::now());
    ride
}

pub(super) fn share(rider: &str, amount: u32, method: SplitPaymentMethod) -> ShareSpec {
    ShareSpec {
        rider_id: RiderId(rider.to_string()),
        amount,
        method,
    }
}

/// A completed 10 km split car ride: total 900 across the given shares.
pub(super) fn completed_split_ride(id: &str, shares: Vec<ShareSpec>) -> Ride {
    let quote = quote_for(10.0, 22.0, RideClass::Car);
    let allocation =
        build_allocation(&shares, quote.final_amount, &quote.currency).expect("valid shares");
    let mut ride = Ride::new(
        RideId(id.to_string()),
        RiderId(RIDER.to_string()),
        &request(PaymentMethod::MobileMoney, Some(shares)),
        quote,
        Some(allocation),
        Utc::now(),
    );
    ride.driver_id = Some(DriverId(DRIVER.to_string()));
    ride.status = RideStatus::Completed;
    ride.completed_at = Some(Utc::now());
    ride
}

pub(super) struct SettlementHarness {
    pub rides: Arc<MemoryRideRepository>,
    pub gateway: Arc<MemoryPaymentGateway>,
    pub notifications: Arc<MemoryNotificationSink>,
    pub cash: CashSettlementService<MemoryRideRepository, MemoryPaymentGateway, MemoryNotificationSink>,
    pub split: SplitFareService<MemoryRideRepository, MemoryPaymentGateway, MemoryNotificationSink>,
}

pub(super) fn harness() -> SettlementHarness {
    let rides = Arc::new(MemoryRideRepository::default());
    let gateway = Arc::new(MemoryPaymentGateway::default());
    let notifications = Arc::new(MemoryNotificationSink::default());
    let cash = CashSettlementService::new(rides.clone(), gateway.clone(), notifications.clone());
    let split = SplitFareService::new(rides.clone(), gateway.clone(), notifications.clone());
    SettlementHarness {
        rides,
        gateway,
        notifications,
        cash,
        split,
    }
}

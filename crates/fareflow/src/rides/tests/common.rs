use std::sync::Arc;

use crate::cancellation::{CancellationConfig, CancellationPolicy};
use crate::fare::{
    DistanceResolver, FareConfig, FareEngine, GreatCircleProvider, RideClass,
};
use crate::rides::{
    Actor, CreatedRide, LifecycleConfig, PaymentMethod, RideId, RideLifecycleService, RideRequest,
    ShareSpec, SplitPaymentMethod,
};
use crate::test_helpers::{
    fixed_distance_engine, nairobi_cbd, westlands, MemoryCancellationStore, MemoryDriverDirectory,
    MemoryNotificationSink, MemoryPaymentGateway, MemoryRideRepository,
};

pub(super) const RIDER: &str = "rider-1";
pub(super) const DRIVER: &str = "driver-1";

pub(super) type Lifecycle = RideLifecycleService<
    MemoryRideRepository,
    MemoryDriverDirectory,
    MemoryPaymentGateway,
    MemoryNotificationSink,
    MemoryCancellationStore,
>;

pub(super) struct LifecycleHarness {
    pub rides: Arc<MemoryRideRepository>,
    pub drivers: Arc<MemoryDriverDirectory>,
    pub gateway: Arc<MemoryPaymentGateway>,
    pub notifications: Arc<MemoryNotificationSink>,
    pub service: Arc<Lifecycle>,
}

/// Harness quoting a fixed 10 km / 22 min leg (car fare 900, commission 170).
pub(super) fn harness_with_drivers(driver_ids: &[&str]) -> LifecycleHarness {
    harness(driver_ids, Arc::new(fixed_distance_engine(10.0, 22.0)))
}

/// Harness quoting real great-circle distances, for destination changes.
pub(super) fn haversine_harness(driver_ids: &[&str]) -> LifecycleHarness {
    let engine = FareEngine::new(
        DistanceResolver::new(Vec::new(), GreatCircleProvider::new(40.0)),
        FareConfig::default(),
    );
    harness(driver_ids, Arc::new(engine))
}

fn harness(driver_ids: &[&str], engine: Arc<FareEngine>) -> LifecycleHarness {
    let rides = Arc::new(MemoryRideRepository::default());
    let drivers = Arc::new(MemoryDriverDirectory::with_drivers(driver_ids));
    let gateway = Arc::new(MemoryPaymentGateway::default());
    let notifications = Arc::new(MemoryNotificationSink::default());
    let cancellation = Arc::new(CancellationPolicy::new(
        Arc::new(MemoryCancellationStore::default()),
        gateway.clone(),
        CancellationConfig::default(),
    ));

    let service = Arc::new(RideLifecycleService::new(
        rides.clone(),
        drivers.clone(),
        gateway.clone(),
        notifications.clone(),
        engine,
        cancellation,
        LifecycleConfig::default(),
    ));

    LifecycleHarness {
        rides,
        drivers,
        gateway,
        notifications,
        service,
    }
}

pub(super) fn request(payment_method: PaymentMethod) -> RideRequest {
    RideRequest {
        pickup: nairobi_cbd(),
        destination: westlands(),
        ride_class: RideClass::Car,
        payment_method,
        split_shares: None,
    }
}

pub(super) fn split_request(shares: Vec<(&str, u32, SplitPaymentMethod)>) -> RideRequest {
    let mut request = request(PaymentMethod::MobileMoney);
    request.split_shares = Some(
        shares
            .into_iter()
            .map(|(rider, amount, method)| ShareSpec {
                rider_id: crate::rides::RiderId(rider.to_string()),
                amount,
                method,
            })
            .collect(),
    );
    request
}

pub(super) fn rider() -> Actor {
    Actor::rider(RIDER)
}

pub(super) fn driver() -> Actor {
    Actor::driver(DRIVER)
}

pub(super) fn create(harness: &LifecycleHarness, payment_method: PaymentMethod) -> CreatedRide {
    harness
        .service
        .create(&rider(), request(payment_method))
        .expect("ride creates")
}

pub(super) fn ride_id(created: &CreatedRide) -> RideId {
    RideId(created.ride.ride_id.clone())
}

/// Drive a fresh ride to `started`.
pub(super) fn started_ride(harness: &LifecycleHarness, payment_method: PaymentMethod) -> RideId {
    let id = ride_id(&create(harness, payment_method));
    harness.service.accept(&id, &driver()).expect("accepts");
    harness.service.start(&id, &driver()).expect("starts");
    id
}

/// Drive a fresh ride all the way to `completed`.
pub(super) fn completed_ride(harness: &LifecycleHarness, payment_method: PaymentMethod) -> RideId {
    let id = started_ride(harness, payment_method);
    harness.service.complete(&id, &driver()).expect("completes");
    id
}

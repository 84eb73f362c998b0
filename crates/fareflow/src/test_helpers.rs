//! In-memory collaborators for tests (feature `test-helpers`, on by default).
//!
//! These fakes honor the concurrency contracts of the real traits: every
//! mutation runs under one lock per store, so compare-and-set transitions and
//! read-modify-write updates are serialized exactly as a database-backed
//! implementation would serialize them.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;

use crate::fare::{
    Coordinates, DistanceConfig, DistanceMethod, DistanceResolver, FareConfig, FareEngine,
    FareQuote, GreatCircleProvider, RideClass,
};
use crate::gps::{GpsTrack, TrackStore};
use crate::cancellation::{CancellationState, CancellationStore};
use crate::rides::{
    DriverId, Notification, NotificationError, NotificationSink, PaymentError, PaymentGateway,
    PaymentMethod, PaymentReceipt, Place, RepositoryError, Ride, RideId, RideRepository,
    RideStatus, RiderId,
};

/// Mutex-backed ride store.
#[derive(Default)]
pub struct MemoryRideRepository {
    rides: Mutex<HashMap<RideId, Ride>>,
}

impl RideRepository for MemoryRideRepository {
    fn insert(&self, ride: Ride) -> Result<Ride, RepositoryError> {
        let mut guard = self.rides.lock().expect("ride store mutex poisoned");
        if guard.contains_key(&ride.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(ride.id.clone(), ride.clone());
        Ok(ride)
    }

    fn fetch(&self, id: &RideId) -> Result<Option<Ride>, RepositoryError> {
        let guard = self.rides.lock().expect("ride store mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn update_with(
        &self,
        id: &RideId,
        mutate: &mut dyn FnMut(&mut Ride),
    ) -> Result<Ride, RepositoryError> {
        let mut guard = self.rides.lock().expect("ride store mutex poisoned");
        let ride = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        mutate(ride);
        Ok(ride.clone())
    }

    fn update_if_status(
        &self,
        id: &RideId,
        expected: RideStatus,
        mutate: &mut dyn FnMut(&mut Ride),
    ) -> Result<Ride, RepositoryError> {
        let mut guard = self.rides.lock().expect("ride store mutex poisoned");
        let ride = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if ride.status != expected {
            return Err(RepositoryError::StatusMismatch {
                expected: expected.label(),
                actual: ride.status.label(),
            });
        }
        mutate(ride);
        Ok(ride.clone())
    }

    fn active_ride_for_rider(&self, rider: &RiderId) -> Result<Option<Ride>, RepositoryError> {
        let guard = self.rides.lock().expect("ride store mutex poisoned");
        Ok(guard
            .values()
            .find(|ride| &ride.rider_id == rider && ride.status.is_active())
            .cloned())
    }
}

/// Mutex-backed cancellation store with atomic upsert.
#[derive(Default)]
pub struct MemoryCancellationStore {
    states: Mutex<HashMap<RiderId, CancellationState>>,
}

impl CancellationStore for MemoryCancellationStore {
    fn fetch(&self, rider: &RiderId) -> Result<Option<CancellationState>, RepositoryError> {
        let guard = self.states.lock().expect("cancellation mutex poisoned");
        Ok(guard.get(rider).cloned())
    }

    fn modify(
        &self,
        rider: &RiderId,
        mutate: &mut dyn FnMut(&mut CancellationState),
    ) -> Result<CancellationState, RepositoryError> {
        let mut guard = self.states.lock().expect("cancellation mutex poisoned");
        let state = guard
            .entry(rider.clone())
            .or_insert_with(|| CancellationState::fresh(rider.clone()));
        mutate(state);
        Ok(state.clone())
    }
}

/// Mutex-backed GPS track store.
#[derive(Default)]
pub struct MemoryTrackStore {
    tracks: Mutex<HashMap<RideId, GpsTrack>>,
}

impl TrackStore for MemoryTrackStore {
    fn fetch(&self, ride_id: &RideId) -> Result<Option<GpsTrack>, RepositoryError> {
        let guard = self.tracks.lock().expect("track store mutex poisoned");
        Ok(guard.get(ride_id).cloned())
    }

    fn append(
        &self,
        ride_id: &RideId,
        sample: crate::gps::GpsSample,
    ) -> Result<GpsTrack, RepositoryError> {
        let mut guard = self.tracks.lock().expect("track store mutex poisoned");
        let track = guard
            .entry(ride_id.clone())
            .or_insert_with(|| GpsTrack::open(ride_id.clone(), sample.recorded_at));
        track.samples.push(sample);
        Ok(track.clone())
    }
}

/// Gateway fake with a failure toggle and full charge/payout ledgers.
#[derive(Default)]
pub struct MemoryPaymentGateway {
    pub fail_payments: Mutex<bool>,
    pub fail_payouts: Mutex<bool>,
    pub charges: Mutex<Vec<(String, u32, PaymentMethod)>>,
    pub payouts: Mutex<Vec<(String, i64, String)>>,
}

impl MemoryPaymentGateway {
    pub fn failing_payments() -> Self {
        let gateway = Self::default();
        *gateway.fail_payments.lock().expect("toggle poisoned") = true;
        gateway
    }

    pub fn set_fail_payouts(&self, fail: bool) {
        *self.fail_payouts.lock().expect("toggle poisoned") = fail;
    }

    pub fn charges(&self) -> Vec<(String, u32, PaymentMethod)> {
        self.charges.lock().expect("ledger poisoned").clone()
    }

    pub fn payouts(&self) -> Vec<(String, i64, String)> {
        self.payouts.lock().expect("ledger poisoned").clone()
    }

    pub fn payout_total(&self, driver: &str) -> i64 {
        self.payouts()
            .iter()
            .filter(|(user, _, _)| user == driver)
            .map(|(_, amount, _)| amount)
            .sum()
    }
}

impl PaymentGateway for MemoryPaymentGateway {
    fn create_payment(
        &self,
        user_id: &str,
        amount: u32,
        _currency: &str,
        method: PaymentMethod,
        _description: &str,
    ) -> Result<PaymentReceipt, PaymentError> {
        if *self.fail_payments.lock().expect("toggle poisoned") {
            return Err(PaymentError::Declined("card declined".to_string()));
        }
        let mut charges = self.charges.lock().expect("ledger poisoned");
        charges.push((user_id.to_string(), amount, method));
        Ok(PaymentReceipt {
            payment_id: format!("pay-{:04}", charges.len()),
        })
    }

    fn add_to_payout_balance(
        &self,
        driver: &DriverId,
        amount: i64,
        memo: &str,
    ) -> Result<(), PaymentError> {
        if *self.fail_payouts.lock().expect("toggle poisoned") {
            return Err(PaymentError::Unavailable("ledger offline".to_string()));
        }
        self.payouts
            .lock()
            .expect("ledger poisoned")
            .push((driver.0.clone(), amount, memo.to_string()));
        Ok(())
    }

    fn can_afford(&self, _user_id: &str, _amount: u32) -> bool {
        !*self.fail_payments.lock().expect("toggle poisoned")
    }
}

/// Notification fake capturing every delivery.
#[derive(Default)]
pub struct MemoryNotificationSink {
    pub events: Mutex<Vec<Notification>>,
    pub fail: Mutex<bool>,
}

impl MemoryNotificationSink {
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().expect("sink mutex poisoned").clone()
    }

    pub fn for_user(&self, user: &str) -> Vec<Notification> {
        self.events()
            .into_iter()
            .filter(|event| event.user_id == user)
            .collect()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().expect("sink mutex poisoned") = fail;
    }
}

impl NotificationSink for MemoryNotificationSink {
    fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        if *self.fail.lock().expect("sink mutex poisoned") {
            return Err(NotificationError::Transport("push service down".to_string()));
        }
        self.events
            .lock()
            .expect("sink mutex poisoned")
            .push(notification);
        Ok(())
    }
}

/// Driver presence fake: a flat set of free drivers.
#[derive(Default)]
pub struct MemoryDriverDirectory {
    available: Mutex<HashSet<DriverId>>,
}

impl MemoryDriverDirectory {
    pub fn with_drivers(ids: &[&str]) -> Self {
        let directory = Self::default();
        {
            let mut guard = directory.available.lock().expect("directory poisoned");
            for id in ids {
                guard.insert(DriverId(id.to_string()));
            }
        }
        directory
    }

    pub fn is_available(&self, driver: &DriverId) -> bool {
        self.available
            .lock()
            .expect("directory poisoned")
            .contains(driver)
    }
}

impl crate::rides::DriverDirectory for MemoryDriverDirectory {
    fn available_near(&self, _origin: Coordinates) -> Vec<DriverId> {
        let mut drivers: Vec<DriverId> = self
            .available
            .lock()
            .expect("directory poisoned")
            .iter()
            .cloned()
            .collect();
        drivers.sort_by(|a, b| a.0.cmp(&b.0));
        drivers
    }

    fn reserve(&self, driver: &DriverId) {
        self.available
            .lock()
            .expect("directory poisoned")
            .remove(driver);
    }

    fn release(&self, driver: &DriverId) {
        self.available
            .lock()
            .expect("directory poisoned")
            .insert(driver.clone());
    }
}

/// A fare engine quoting a fixed distance, bypassing the network chain.
pub fn fixed_distance_engine(distance_km: f64, duration_min: f64) -> FareEngine {
    struct Fixed {
        distance_km: f64,
        duration_min: f64,
    }

    impl crate::fare::DistanceProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn road_distance(
            &self,
            _origin: Coordinates,
            _destination: Coordinates,
        ) -> Result<crate::fare::RoadDistance, crate::fare::ProviderError> {
            Ok(crate::fare::RoadDistance {
                distance_km: self.distance_km,
                duration_min: self.duration_min,
            })
        }
    }

    FareEngine::new(
        DistanceResolver::new(
            vec![Box::new(Fixed {
                distance_km,
                duration_min,
            })],
            GreatCircleProvider::new(DistanceConfig::default().fallback_speed_kmh),
        ),
        FareConfig::default(),
    )
}

/// A quote priced by the default tariff without touching any resolver.
pub fn quote_for(distance_km: f64, duration_min: f64, class: RideClass) -> FareQuote {
    let config = FareConfig::default();
    let multiplier = config.multiplier(class);
    let base_raw = distance_km * config.rate_per_km;
    let final_amount = (base_raw * multiplier).round() as u32;
    let commission = (distance_km * config.commission_per_km).round() as u32;
    FareQuote {
        distance_km,
        duration_min,
        ride_class: class,
        multiplier,
        base_amount: base_raw.round() as u32,
        final_amount,
        currency: config.currency,
        commission,
        driver_earnings: final_amount.saturating_sub(commission),
        method: DistanceMethod::Primary,
        warnings: Vec::new(),
        quoted_at: Utc::now(),
    }
}

pub fn place(lat: f64, lng: f64, address: &str) -> Place {
    Place {
        coords: Coordinates::new(lat, lng),
        address: address.to_string(),
    }
}

pub fn nairobi_cbd() -> Place {
    place(-1.2864, 36.8172, "Moi Avenue, Nairobi")
}

pub fn westlands() -> Place {
    place(-1.2672, 36.8070, "Westlands, Nairobi")
}

//! In-memory infrastructure behind the service: stores honoring the atomic
//! mutation contracts, a toy payment ledger, a driver presence registry, and
//! a notification sink that logs deliveries. A deployment swaps these for
//! database- and gateway-backed adapters without touching the engine.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use fareflow::cancellation::{
    CancellationConfig, CancellationPolicy, CancellationState, CancellationStore,
};
use fareflow::config::AppConfig;
use fareflow::fare::{Coordinates, DistanceResolver, FareEngine};
use fareflow::gps::{GpsRecorder, GpsSample, GpsTrack, TrackStore};
use fareflow::rides::{
    DriverDirectory, DriverId, Notification, NotificationError, NotificationSink, PaymentError,
    PaymentGateway, PaymentMethod, PaymentReceipt, RepositoryError, Ride, RideId,
    RideLifecycleService, RideRepository, RideStatus, RiderId,
};

/// Search radius for driver matching, in kilometres.
const MATCH_RADIUS_KM: f64 = 25.0;

/// Deviation threshold handed to the GPS reconciler, in kilometres.
const DEVIATION_THRESHOLD_KM: f64 = 0.5;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type Lifecycle = RideLifecycleService<
    InMemoryRideRepository,
    InMemoryDriverRegistry,
    InMemoryPaymentGateway,
    LoggingNotificationSink,
    InMemoryCancellationStore,
>;

pub(crate) type Recorder = GpsRecorder<InMemoryTrackStore, InMemoryRideRepository>;

pub(crate) type Policy = CancellationPolicy<InMemoryCancellationStore, InMemoryPaymentGateway>;

/// Everything the routers need, built over shared in-memory stores.
pub(crate) struct Services {
    pub(crate) drivers: Arc<InMemoryDriverRegistry>,
    pub(crate) gateway: Arc<InMemoryPaymentGateway>,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) recorder: Arc<Recorder>,
    pub(crate) policy: Arc<Policy>,
}

pub(crate) fn build_services(config: &AppConfig) -> Services {
    let rides = Arc::new(InMemoryRideRepository::default());
    let drivers = Arc::new(InMemoryDriverRegistry::default());
    let gateway = Arc::new(InMemoryPaymentGateway::default());
    let notifications = Arc::new(LoggingNotificationSink);
    let tracks = Arc::new(InMemoryTrackStore::default());

    let engine = Arc::new(FareEngine::new(
        DistanceResolver::from_config(&config.distance),
        config.fare.clone(),
    ));
    let policy = Arc::new(CancellationPolicy::new(
        Arc::new(InMemoryCancellationStore::default()),
        gateway.clone(),
        config.cancellation.clone(),
    ));
    let lifecycle = Arc::new(RideLifecycleService::new(
        rides.clone(),
        drivers.clone(),
        gateway.clone(),
        notifications,
        engine.clone(),
        policy.clone(),
        config.lifecycle.clone(),
    ));
    let recorder = Arc::new(GpsRecorder::new(
        tracks,
        rides,
        engine,
        DEVIATION_THRESHOLD_KM,
    ));

    Services {
        drivers,
        gateway,
        lifecycle,
        recorder,
        policy,
    }
}

pub(crate) fn demo_services() -> Services {
    let config = AppConfig {
        environment: fareflow::config::AppEnvironment::Development,
        server: fareflow::config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        telemetry: fareflow::config::TelemetryConfig {
            log_level: "warn".to_string(),
        },
        fare: Default::default(),
        distance: Default::default(),
        cancellation: CancellationConfig::default(),
        lifecycle: Default::default(),
    };
    build_services(&config)
}

#[derive(Default)]
pub(crate) struct InMemoryRideRepository {
    rides: Mutex<HashMap<RideId, Ride>>,
}

impl RideRepository for InMemoryRideRepository {
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

struct DriverPresence {
    coords: Coordinates,
    available: bool,
}

/// Driver presence fed over the presence endpoint (or demo seeding).
#[derive(Default)]
pub(crate) struct InMemoryDriverRegistry {
    drivers: Mutex<HashMap<DriverId, DriverPresence>>,
}

impl InMemoryDriverRegistry {
    pub(crate) fn upsert(&self, driver: DriverId, coords: Coordinates, available: bool) {
        let mut guard = self.drivers.lock().expect("registry mutex poisoned");
        guard.insert(driver, DriverPresence { coords, available });
    }
}

impl DriverDirectory for InMemoryDriverRegistry {
    fn available_near(&self, origin: Coordinates) -> Vec<DriverId> {
        let guard = self.drivers.lock().expect("registry mutex poisoned");
        let mut nearby: Vec<(DriverId, f64)> = guard
            .iter()
            .filter(|(_, presence)| presence.available)
            .map(|(driver, presence)| (driver.clone(), origin.haversine_km(presence.coords)))
            .filter(|(_, km)| *km <= MATCH_RADIUS_KM)
            .collect();
        nearby.sort_by(|a, b| a.1.total_cmp(&b.1));
        nearby.into_iter().map(|(driver, _)| driver).collect()
    }

    fn reserve(&self, driver: &DriverId) {
        let mut guard = self.drivers.lock().expect("registry mutex poisoned");
        if let Some(presence) = guard.get_mut(driver) {
            presence.available = false;
        }
    }

    fn release(&self, driver: &DriverId) {
        let mut guard = self.drivers.lock().expect("registry mutex poisoned");
        if let Some(presence) = guard.get_mut(driver) {
            presence.available = true;
        }
    }
}

#[derive(Default)]
pub(crate) struct InMemoryCancellationStore {
    states: Mutex<HashMap<RiderId, CancellationState>>,
}

impl CancellationStore for InMemoryCancellationStore {
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

#[derive(Default)]
pub(crate) struct InMemoryTrackStore {
    tracks: Mutex<HashMap<RideId, GpsTrack>>,
}

impl TrackStore for InMemoryTrackStore {
    fn fetch(&self, ride_id: &RideId) -> Result<Option<GpsTrack>, RepositoryError> {
        let guard = self.tracks.lock().expect("track store mutex poisoned");
        Ok(guard.get(ride_id).cloned())
    }

    fn append(&self, ride_id: &RideId, sample: GpsSample) -> Result<GpsTrack, RepositoryError> {
        let mut guard = self.tracks.lock().expect("track store mutex poisoned");
        let track = guard
            .entry(ride_id.clone())
            .or_insert_with(|| GpsTrack::open(ride_id.clone(), sample.recorded_at));
        track.samples.push(sample);
        Ok(track.clone())
    }
}

/// Toy ledger: wallets charge against an optional balance, payouts accrue per
/// driver and may go negative (commission recovery).
#[derive(Default)]
pub(crate) struct InMemoryPaymentGateway {
    wallets: Mutex<HashMap<String, i64>>,
    payouts: Mutex<HashMap<String, i64>>,
}

impl InMemoryPaymentGateway {
    pub(crate) fn fund_wallet(&self, user_id: &str, amount: i64) {
        let mut guard = self.wallets.lock().expect("wallet mutex poisoned");
        *guard.entry(user_id.to_string()).or_insert(0) += amount;
    }

    pub(crate) fn payout_balance(&self, driver: &str) -> i64 {
        let guard = self.payouts.lock().expect("payout mutex poisoned");
        guard.get(driver).copied().unwrap_or(0)
    }
}

impl PaymentGateway for InMemoryPaymentGateway {
    fn create_payment(
        &self,
        user_id: &str,
        amount: u32,
        currency: &str,
        method: PaymentMethod,
        description: &str,
    ) -> Result<PaymentReceipt, PaymentError> {
        if method != PaymentMethod::Cash {
            let mut guard = self.wallets.lock().expect("wallet mutex poisoned");
            if let Some(balance) = guard.get_mut(user_id) {
                if *balance < i64::from(amount) {
                    return Err(PaymentError::Declined(format!(
                        "insufficient funds for {amount} {currency}"
                    )));
                }
                *balance -= i64::from(amount);
            }
        }

        info!(user = user_id, amount, method = method.label(), description, "payment captured");
        Ok(PaymentReceipt {
            payment_id: format!("pay-{user_id}-{amount}"),
        })
    }

    fn add_to_payout_balance(
        &self,
        driver: &DriverId,
        amount: i64,
        memo: &str,
    ) -> Result<(), PaymentError> {
        let mut guard = self.payouts.lock().expect("payout mutex poisoned");
        *guard.entry(driver.0.clone()).or_insert(0) += amount;
        info!(driver = %driver.0, amount, memo, "payout balance adjusted");
        Ok(())
    }

    fn can_afford(&self, user_id: &str, amount: u32) -> bool {
        let guard = self.wallets.lock().expect("wallet mutex poisoned");
        guard
            .get(user_id)
            .map(|balance| *balance >= i64::from(amount))
            .unwrap_or(true)
    }
}

/// Push delivery is out of scope; deliveries are logged so operators can
/// trace what would have been sent.
pub(crate) struct LoggingNotificationSink;

impl NotificationSink for LoggingNotificationSink {
    fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            user = %notification.user_id,
            category = ?notification.category,
            title = %notification.title,
            body = %notification.body,
            "notification dispatched"
        );
        Ok(())
    }
}

//! GPS track capture and post-ride fare reconciliation.
//!
//! Samples are accepted only while the ride is underway; once complete the
//! track is read-only ground truth. Metrics are derived on read, and the
//! reconciler feeds them back into the fare engine for a second quote.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fare::{Coordinates, FareEngine, FareError};
use crate::rides::{
    Actor, DriverId, RepositoryError, Ride, RideId, RideRepository, RideStatus, RideView, Role,
    RoleError,
};

/// One location fix reported by the driver's device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsSample {
    pub coords: Coordinates,
    pub recorded_at: DateTime<Utc>,
    pub accuracy_m: Option<f64>,
    pub speed_kmh: Option<f64>,
}

/// Ordered sample sequence for one ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsTrack {
    pub ride_id: RideId,
    pub started_at: DateTime<Utc>,
    pub samples: Vec<GpsSample>,
}

impl GpsTrack {
    pub fn open(ride_id: RideId, started_at: DateTime<Utc>) -> Self {
        Self {
            ride_id,
            started_at,
            samples: Vec::new(),
        }
    }

    pub fn metrics(&self) -> TrackMetrics {
        TrackMetrics::from_samples(&self.samples)
    }
}

/// Derived travel figures; computed on read, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackMetrics {
    pub distance_km: f64,
    pub duration_min: f64,
    pub avg_speed_kmh: f64,
    pub max_speed_kmh: f64,
}

impl TrackMetrics {
    pub fn from_samples(samples: &[GpsSample]) -> Self {
        let mut distance_km = 0.0;
        let mut max_speed_kmh: f64 = 0.0;

        for pair in samples.windows(2) {
            let leg_km = pair[0].coords.haversine_km(pair[1].coords);
            distance_km += leg_km;

            let leg_speed = match pair[1].speed_kmh {
                Some(reported) => reported,
                None => {
                    let hours = (pair[1].recorded_at - pair[0].recorded_at)
                        .num_milliseconds()
                        .max(0) as f64
                        / 3_600_000.0;
                    if hours > 0.0 {
                        leg_km / hours
                    } else {
                        0.0
                    }
                }
            };
            max_speed_kmh = max_speed_kmh.max(leg_speed);
        }

        let duration_min = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => {
                (last.recorded_at - first.recorded_at).num_seconds().max(0) as f64 / 60.0
            }
            _ => 0.0,
        };
        let avg_speed_kmh = if duration_min > 0.0 {
            distance_km / (duration_min / 60.0)
        } else {
            0.0
        };

        Self {
            distance_km,
            duration_min,
            avg_speed_kmh,
            max_speed_kmh,
        }
    }
}

/// Route-deviation verdict against the planned pickup-to-destination leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviationReport {
    pub deviated: bool,
    /// Fraction of samples beyond the threshold.
    pub off_route_ratio: f64,
    pub threshold_km: f64,
}

/// Flag the track when more than 10% of samples stray beyond `threshold_km`
/// from the planned leg.
pub fn check_deviation(
    samples: &[GpsSample],
    planned_from: Coordinates,
    planned_to: Coordinates,
    threshold_km: f64,
) -> DeviationReport {
    if samples.is_empty() {
        return DeviationReport {
            deviated: false,
            off_route_ratio: 0.0,
            threshold_km,
        };
    }

    let off_route = samples
        .iter()
        .filter(|sample| {
            sample
                .coords
                .distance_to_leg_km(planned_from, planned_to)
                > threshold_km
        })
        .count();
    let ratio = off_route as f64 / samples.len() as f64;

    DeviationReport {
        deviated: ratio > 0.10,
        off_route_ratio: ratio,
        threshold_km,
    }
}

/// Storage abstraction for GPS tracks. `append` upserts atomically, opening
/// the track on the first sample of a ride.
pub trait TrackStore: Send + Sync {
    fn fetch(&self, ride_id: &RideId) -> Result<Option<GpsTrack>, RepositoryError>;

    fn append(&self, ride_id: &RideId, sample: GpsSample) -> Result<GpsTrack, RepositoryError>;
}

/// Error raised by GPS capture and reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum GpsError {
    #[error("ride not found")]
    NotFound,
    #[error("gps samples are only accepted while the ride is underway (currently {status})")]
    RideNotInProgress { status: &'static str },
    #[error("fare reconciliation needs a completed ride (currently {status})")]
    NotCompleted { status: &'static str },
    #[error("no gps track recorded for this ride")]
    NoTrack,
    #[error("track needs at least two samples to reconcile")]
    TooFewSamples,
    #[error(transparent)]
    Forbidden(#[from] RoleError),
    #[error(transparent)]
    Fare(#[from] FareError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl GpsError {
    fn from_repo(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => GpsError::NotFound,
            other => GpsError::Repository(other),
        }
    }
}

/// Track view with derived figures.
#[derive(Debug, Clone, Serialize)]
pub struct GpsTrackView {
    pub ride_id: String,
    pub samples: usize,
    pub metrics: TrackMetrics,
    pub deviation: DeviationReport,
}

/// Capture service plus post-ride reconciler.
pub struct GpsRecorder<T, R> {
    tracks: Arc<T>,
    rides: Arc<R>,
    engine: Arc<FareEngine>,
    deviation_threshold_km: f64,
}

impl<T, R> GpsRecorder<T, R>
where
    T: TrackStore + 'static,
    R: RideRepository + 'static,
{
    pub fn new(
        tracks: Arc<T>,
        rides: Arc<R>,
        engine: Arc<FareEngine>,
        deviation_threshold_km: f64,
    ) -> Self {
        Self {
            tracks,
            rides,
            engine,
            deviation_threshold_km,
        }
    }

    /// Ingest one sample. Accepted only between acceptance and completion;
    /// the first sample opens the track.
    pub fn append(&self, ride_id: &RideId, sample: GpsSample) -> Result<GpsTrackView, GpsError> {
        let ride = self.fetch_ride(ride_id)?;
        if !matches!(ride.status, RideStatus::Accepted | RideStatus::Started) {
            return Err(GpsError::RideNotInProgress {
                status: ride.status.label(),
            });
        }

        let track = self
            .tracks
            .append(ride_id, sample)
            .map_err(GpsError::from_repo)?;
        Ok(self.view(&ride, &track))
    }

    pub fn track(&self, ride_id: &RideId) -> Result<GpsTrackView, GpsError> {
        let ride = self.fetch_ride(ride_id)?;
        let track = self
            .tracks
            .fetch(ride_id)
            .map_err(GpsError::from_repo)?
            .ok_or(GpsError::NoTrack)?;
        Ok(self.view(&ride, &track))
    }

    /// Post-ride reconciliation: measured distance and time re-price the
    /// ride, attaching a second quote alongside the untouched original.
    pub fn reconcile(&self, ride_id: &RideId, actor: &Actor) -> Result<RideView, GpsError> {
        actor.require_one_of(&[Role::Driver, Role::Admin])?;

        let ride = self.fetch_ride(ride_id)?;
        if ride.status != RideStatus::Completed {
            return Err(GpsError::NotCompleted {
                status: ride.status.label(),
            });
        }
        if actor.role == Role::Driver && !ride.is_assigned_to(&DriverId(actor.id.clone())) {
            return Err(GpsError::Forbidden(RoleError {
                required: "assigned driver",
                actual: "driver",
            }));
        }

        let track = self
            .tracks
            .fetch(ride_id)
            .map_err(GpsError::from_repo)?
            .ok_or(GpsError::NoTrack)?;
        if track.samples.len() < 2 {
            return Err(GpsError::TooFewSamples);
        }

        let metrics = track.metrics();
        let deviation = check_deviation(
            &track.samples,
            ride.pickup.coords,
            ride.destination.coords,
            self.deviation_threshold_km,
        );
        let measured = self
            .engine
            .recalculate(&ride.fare, metrics.distance_km, metrics.duration_min)?;

        let quoted = ride.fare.final_amount;
        let delta = i64::from(measured.final_amount) - i64::from(quoted);
        let ride = self
            .rides
            .update_with(ride_id, &mut |ride| {
                ride.recalculated_fare = Some(measured.clone());
                ride.metadata.insert(
                    "gps_adjustment".to_string(),
                    format!(
                        "measured {:.2} km in {:.1} min; fare {} -> {} ({:+})",
                        metrics.distance_km,
                        metrics.duration_min,
                        quoted,
                        measured.final_amount,
                        delta
                    ),
                );
                if deviation.deviated {
                    ride.metadata.insert(
                        "route_deviation".to_string(),
                        format!("{:.0}% of samples off route", deviation.off_route_ratio * 100.0),
                    );
                }
            })
            .map_err(GpsError::from_repo)?;

        info!(ride = %ride.id, delta, "fare reconciled from gps track");
        Ok(ride.view())
    }

    fn fetch_ride(&self, ride_id: &RideId) -> Result<Ride, GpsError> {
        self.rides
            .fetch(ride_id)
            .map_err(GpsError::from_repo)?
            .ok_or(GpsError::NotFound)
    }

    fn view(&self, ride: &Ride, track: &GpsTrack) -> GpsTrackView {
        GpsTrackView {
            ride_id: track.ride_id.0.clone(),
            samples: track.samples.len(),
            metrics: track.metrics(),
            deviation: check_deviation(
                &track.samples,
                ride.pickup.coords,
                ride.destination.coords,
                self.deviation_threshold_km,
            ),
        }
    }
}


/// Router builder for GPS capture and fare reconciliation.
pub fn gps_router<T, R>(recorder: Arc<GpsRecorder<T, R>>) -> axum::Router
where
    T: TrackStore + 'static,
    R: RideRepository + 'static,
{
    use axum::routing::{get, post};

    axum::Router::new()
        .route(
            "/api/v1/rides/:ride_id/gps",
            post(append_handler::<T, R>).get(track_handler::<T, R>),
        )
        .route(
            "/api/v1/rides/:ride_id/gps/recalculate",
            post(recalculate_handler::<T, R>),
        )
        .with_state(recorder)
}

fn gps_error_response(err: GpsError) -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let status = match &err {
        GpsError::Forbidden(_) => StatusCode::FORBIDDEN,
        GpsError::RideNotInProgress { .. } | GpsError::NotCompleted { .. } => StatusCode::CONFLICT,
        GpsError::NotFound | GpsError::NoTrack => StatusCode::NOT_FOUND,
        GpsError::TooFewSamples | GpsError::Fare(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GpsError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        axum::Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct SamplePayload {
    lat: f64,
    lng: f64,
    #[serde(default)]
    recorded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    accuracy_m: Option<f64>,
    #[serde(default)]
    speed_kmh: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RecalculateRequest {
    user_id: String,
    role: Role,
}

async fn append_handler<T, R>(
    axum::extract::State(recorder): axum::extract::State<Arc<GpsRecorder<T, R>>>,
    axum::extract::Path(ride_id): axum::extract::Path<String>,
    axum::Json(payload): axum::Json<SamplePayload>,
) -> axum::response::Response
where
    T: TrackStore + 'static,
    R: RideRepository + 'static,
{
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let sample = GpsSample {
        coords: Coordinates::new(payload.lat, payload.lng),
        recorded_at: payload.recorded_at.unwrap_or_else(Utc::now),
        accuracy_m: payload.accuracy_m,
        speed_kmh: payload.speed_kmh,
    };
    match recorder.append(&RideId(ride_id), sample) {
        Ok(view) => (StatusCode::ACCEPTED, axum::Json(view)).into_response(),
        Err(err) => gps_error_response(err),
    }
}

async fn track_handler<T, R>(
    axum::extract::State(recorder): axum::extract::State<Arc<GpsRecorder<T, R>>>,
    axum::extract::Path(ride_id): axum::extract::Path<String>,
) -> axum::response::Response
where
    T: TrackStore + 'static,
    R: RideRepository + 'static,
{
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    match recorder.track(&RideId(ride_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => gps_error_response(err),
    }
}

async fn recalculate_handler<T, R>(
    axum::extract::State(recorder): axum::extract::State<Arc<GpsRecorder<T, R>>>,
    axum::extract::Path(ride_id): axum::extract::Path<String>,
    axum::Json(payload): axum::Json<RecalculateRequest>,
) -> axum::response::Response
where
    T: TrackStore + 'static,
    R: RideRepository + 'static,
{
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let actor = Actor::new(payload.user_id, payload.role);
    match recorder.reconcile(&RideId(ride_id), &actor) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => gps_error_response(err),
    }
}

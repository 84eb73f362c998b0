use serde::{Deserialize, Serialize};

/// Vehicle class requested by the rider. Determines the fare multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideClass {
    Boda,
    Car,
    Premium,
}

impl RideClass {
    pub const fn label(self) -> &'static str {
        match self {
            RideClass::Boda => "boda",
            RideClass::Car => "car",
            RideClass::Premium => "premium",
        }
    }
}

/// Tariff dials and validation bounds applied by the fare engine.
///
/// Constructed explicitly and handed to [`super::FareEngine`]; nothing in the
/// pricing path reads global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareConfig {
    pub rate_per_km: f64,
    pub commission_per_km: f64,
    pub currency: String,
    pub boda_multiplier: f64,
    pub car_multiplier: f64,
    pub premium_multiplier: f64,
    pub min_distance_km: f64,
    pub max_distance_km: f64,
    pub min_fare: u32,
    pub max_fare: u32,
    /// Trips longer than this carry a long-trip advisory.
    pub long_trip_km: f64,
    /// Trips shorter than this carry a trivial-trip advisory.
    pub trivial_trip_km: f64,
    /// Estimated minutes-per-km above which a quote carries a heavy-traffic advisory.
    pub heavy_traffic_min_per_km: f64,
}

impl FareConfig {
    pub fn multiplier(&self, class: RideClass) -> f64 {
        match class {
            RideClass::Boda => self.boda_multiplier,
            RideClass::Car => self.car_multiplier,
            RideClass::Premium => self.premium_multiplier,
        }
    }
}

impl Default for FareConfig {
    fn default() -> Self {
        Self {
            rate_per_km: 60.0,
            commission_per_km: 17.0,
            currency: "KSH".to_string(),
            boda_multiplier: 1.0,
            car_multiplier: 1.5,
            premium_multiplier: 2.0,
            min_distance_km: 0.3,
            max_distance_km: 350.0,
            min_fare: 15,
            max_fare: 100_000,
            long_trip_km: 80.0,
            trivial_trip_km: 1.0,
            heavy_traffic_min_per_km: 4.0,
        }
    }
}

/// Endpoints and timeouts for the road-distance provider chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceConfig {
    /// Primary routing endpoint (OSRM-compatible), e.g. `http://localhost:5000`.
    pub primary_endpoint: Option<String>,
    /// Secondary routing endpoint tried when the primary stage fails.
    pub secondary_endpoint: Option<String>,
    /// Per-stage HTTP timeout in seconds.
    pub timeout_secs: u64,
    /// Average city speed used to estimate duration on the great-circle fallback.
    pub fallback_speed_kmh: f64,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            primary_endpoint: None,
            secondary_endpoint: None,
            timeout_secs: 5,
            fallback_speed_kmh: 40.0,
        }
    }
}

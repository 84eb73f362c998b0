//! Fare computation: distance in, priced quote out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::{FareConfig, RideClass};
use super::distance::{Coordinates, DistanceMethod, DistanceResolver};

/// Non-blocking advisory attached to a quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FareWarning {
    /// Every network stage failed; the distance is a great-circle estimate.
    FallbackDistance,
    LongTrip { distance_km: f64 },
    TrivialTrip { distance_km: f64 },
    HeavyTraffic { min_per_km: f64 },
}

impl FareWarning {
    pub fn summary(&self) -> String {
        match self {
            FareWarning::FallbackDistance => {
                "distance estimated locally; routing providers unavailable".to_string()
            }
            FareWarning::LongTrip { distance_km } => {
                format!("long trip: {distance_km:.1} km")
            }
            FareWarning::TrivialTrip { distance_km } => {
                format!("very short trip: {distance_km:.1} km")
            }
            FareWarning::HeavyTraffic { min_per_km } => {
                format!("heavy traffic expected: {min_per_km:.1} min/km")
            }
        }
    }
}

/// Priced leg. Immutable once attached to a ride; a post-ride recalculation
/// produces a second quote rather than mutating this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareQuote {
    pub distance_km: f64,
    pub duration_min: f64,
    pub ride_class: RideClass,
    pub multiplier: f64,
    /// `distance_km * rate_per_km`, rounded to whole currency units.
    pub base_amount: u32,
    /// `round(base * multiplier)`, what the rider pays.
    pub final_amount: u32,
    pub currency: String,
    /// `round(distance_km * commission_per_km)`, the platform's cut.
    pub commission: u32,
    pub driver_earnings: u32,
    pub method: DistanceMethod,
    pub warnings: Vec<FareWarning>,
    pub quoted_at: DateTime<Utc>,
}

/// Quote rejected by the validation bounds. Reported, never clamped.
#[derive(Debug, thiserror::Error)]
pub enum FareError {
    #[error("distance {found:.2} km outside the allowed {min:.1}-{max:.1} km range")]
    DistanceOutOfBounds { found: f64, min: f64, max: f64 },
    #[error("fare {found} {currency} outside the allowed {min}-{max} range")]
    FareOutOfBounds {
        found: u32,
        min: u32,
        max: u32,
        currency: String,
    },
}

/// Stateless pricer over a [`DistanceResolver`] and a [`FareConfig`].
pub struct FareEngine {
    resolver: DistanceResolver,
    config: FareConfig,
}

impl FareEngine {
    pub fn new(resolver: DistanceResolver, config: FareConfig) -> Self {
        Self { resolver, config }
    }

    pub fn config(&self) -> &FareConfig {
        &self.config
    }

    /// Quote a leg. The distance chain never fails; bounds violations do.
    pub fn quote(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        class: RideClass,
    ) -> Result<FareQuote, FareError> {
        let resolved = self.resolver.resolve(origin, destination);
        self.price(
            resolved.distance_km,
            resolved.duration_min,
            class,
            resolved.method,
        )
    }

    /// Re-price a ride from measured distance and time, preserving the
    /// original class and multiplier. The caller keeps the original quote.
    pub fn recalculate(
        &self,
        original: &FareQuote,
        distance_km: f64,
        duration_min: f64,
    ) -> Result<FareQuote, FareError> {
        self.price(
            distance_km,
            duration_min,
            original.ride_class,
            DistanceMethod::Measured,
        )
    }

    fn price(
        &self,
        distance_km: f64,
        duration_min: f64,
        class: RideClass,
        method: DistanceMethod,
    ) -> Result<FareQuote, FareError> {
        let config = &self.config;

        if distance_km < config.min_distance_km || distance_km > config.max_distance_km {
            return Err(FareError::DistanceOutOfBounds {
                found: distance_km,
                min: config.min_distance_km,
                max: config.max_distance_km,
            });
        }

        let multiplier = config.multiplier(class);
        let base_raw = distance_km * config.rate_per_km;
        let base_amount = base_raw.round() as u32;
        let final_amount = (base_raw * multiplier).round() as u32;

        if final_amount < config.min_fare || final_amount > config.max_fare {
            return Err(FareError::FareOutOfBounds {
                found: final_amount,
                min: config.min_fare,
                max: config.max_fare,
                currency: config.currency.clone(),
            });
        }

        let commission = (distance_km * config.commission_per_km).round() as u32;
        let driver_earnings = final_amount.saturating_sub(commission);

        let mut warnings = Vec::new();
        if method == DistanceMethod::Fallback {
            warnings.push(FareWarning::FallbackDistance);
        }
        if distance_km > config.long_trip_km {
            warnings.push(FareWarning::LongTrip { distance_km });
        }
        if distance_km < config.trivial_trip_km {
            warnings.push(FareWarning::TrivialTrip { distance_km });
        }
        let min_per_km = if distance_km > 0.0 {
            duration_min / distance_km
        } else {
            0.0
        };
        if min_per_km > config.heavy_traffic_min_per_km {
            warnings.push(FareWarning::HeavyTraffic { min_per_km });
        }

        Ok(FareQuote {
            distance_km,
            duration_min,
            ride_class: class,
            multiplier,
            base_amount,
            final_amount,
            currency: config.currency.clone(),
            commission,
            driver_earnings,
            method,
            warnings,
            quoted_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fare::distance::{
        DistanceProvider, GreatCircleProvider, ProviderError, RoadDistance,
    };

    struct FixedProvider(RoadDistance);

    impl DistanceProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn road_distance(
            &self,
            _origin: Coordinates,
            _destination: Coordinates,
        ) -> Result<RoadDistance, ProviderError> {
            Ok(self.0)
        }
    }

    fn engine_with(distance_km: f64, duration_min: f64) -> FareEngine {
        let resolver = DistanceResolver::new(
            vec![Box::new(FixedProvider(RoadDistance {
                distance_km,
                duration_min,
            }))],
            GreatCircleProvider::new(40.0),
        );
        FareEngine::new(resolver, FareConfig::default())
    }

    fn anywhere() -> (Coordinates, Coordinates) {
        (
            Coordinates::new(-1.2864, 36.8172),
            Coordinates::new(-1.2672, 36.8070),
        )
    }

    #[test]
    fn car_fare_for_ten_km_matches_tariff() {
        let engine = engine_with(10.0, 22.0);
        let (origin, destination) = anywhere();

        let quote = engine
            .quote(origin, destination, RideClass::Car)
            .expect("within bounds");

        assert_eq!(quote.base_amount, 600);
        assert_eq!(quote.final_amount, 900);
        assert_eq!(quote.commission, 170);
        assert_eq!(quote.driver_earnings, 730);
        assert_eq!(quote.currency, "KSH");
        assert_eq!(quote.method, DistanceMethod::Primary);
        assert!(quote.warnings.is_empty());
    }

    #[test]
    fn final_amount_is_rounded_base_times_multiplier() {
        // 1.01 km * 60 = 60.6; * 1.5 = 90.9 rounds to 91.
        let engine = engine_with(1.01, 3.0);
        let (origin, destination) = anywhere();

        let quote = engine
            .quote(origin, destination, RideClass::Car)
            .expect("within bounds");

        assert_eq!(quote.base_amount, 61);
        assert_eq!(quote.final_amount, 91);
    }

    #[test]
    fn distance_below_minimum_is_rejected_not_clamped() {
        let engine = engine_with(0.1, 1.0);
        let (origin, destination) = anywhere();

        match engine.quote(origin, destination, RideClass::Boda) {
            Err(FareError::DistanceOutOfBounds { found, .. }) => {
                assert!((found - 0.1).abs() < f64::EPSILON)
            }
            other => panic!("expected distance bound violation, got {other:?}"),
        }
    }

    #[test]
    fn fare_above_maximum_is_rejected() {
        let mut config = FareConfig::default();
        config.max_fare = 500;
        let resolver = DistanceResolver::new(
            vec![Box::new(FixedProvider(RoadDistance {
                distance_km: 20.0,
                duration_min: 40.0,
            }))],
            GreatCircleProvider::new(40.0),
        );
        let engine = FareEngine::new(resolver, config);
        let (origin, destination) = anywhere();

        match engine.quote(origin, destination, RideClass::Car) {
            Err(FareError::FareOutOfBounds { found, max, .. }) => {
                assert_eq!(found, 1800);
                assert_eq!(max, 500);
            }
            other => panic!("expected fare bound violation, got {other:?}"),
        }
    }

    #[test]
    fn advisories_for_long_trips_and_heavy_traffic() {
        let engine = engine_with(120.0, 600.0);
        let (origin, destination) = anywhere();

        let quote = engine
            .quote(origin, destination, RideClass::Car)
            .expect("within bounds");

        assert!(quote
            .warnings
            .iter()
            .any(|warning| matches!(warning, FareWarning::LongTrip { .. })));
        assert!(quote
            .warnings
            .iter()
            .any(|warning| matches!(warning, FareWarning::HeavyTraffic { .. })));
    }

    #[test]
    fn fallback_distance_is_advisory_not_error() {
        let resolver = DistanceResolver::new(Vec::new(), GreatCircleProvider::new(40.0));
        let engine = FareEngine::new(resolver, FareConfig::default());
        // ~11 km apart on the equator.
        let origin = Coordinates::new(0.0, 36.8);
        let destination = Coordinates::new(0.0, 36.9);

        let quote = engine
            .quote(origin, destination, RideClass::Boda)
            .expect("fallback still quotes");

        assert_eq!(quote.method, DistanceMethod::Fallback);
        assert!(quote
            .warnings
            .iter()
            .any(|warning| matches!(warning, FareWarning::FallbackDistance)));
    }

    #[test]
    fn recalculation_preserves_class_and_multiplier() {
        let engine = engine_with(10.0, 22.0);
        let (origin, destination) = anywhere();
        let original = engine
            .quote(origin, destination, RideClass::Car)
            .expect("within bounds");

        let measured = engine
            .recalculate(&original, 12.5, 31.0)
            .expect("within bounds");

        assert_eq!(measured.ride_class, RideClass::Car);
        assert!((measured.multiplier - original.multiplier).abs() < f64::EPSILON);
        assert_eq!(measured.method, DistanceMethod::Measured);
        assert_eq!(measured.final_amount, 1125);
        // The original quote is untouched.
        assert_eq!(original.final_amount, 900);
    }
}

//! Road-distance resolution: an ordered chain of providers with fallback.
//!
//! Each stage is tried in order with its own timeout; a stage that errors or
//! returns a non-success status is skipped and the next stage attempted. The
//! chain never fails: the last stage is a local great-circle computation, so
//! every resolution produces a distance tagged with the method that won.

use std::time::Duration;

use geo::{Closest, ClosestPoint, HaversineDistance, Line, Point};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::config::DistanceConfig;

/// WGS-84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    fn to_point(self) -> Point<f64> {
        Point::new(self.lng, self.lat)
    }

    /// Great-circle distance to `other` in kilometres.
    pub fn haversine_km(self, other: Coordinates) -> f64 {
        self.to_point().haversine_distance(&other.to_point()) / 1000.0
    }

    /// Great-circle distance in kilometres from `self` to the nearest point on
    /// the straight leg between `from` and `to`.
    pub fn distance_to_leg_km(self, from: Coordinates, to: Coordinates) -> f64 {
        let leg = Line::new(from.to_point(), to.to_point());
        let nearest = match leg.closest_point(&self.to_point()) {
            Closest::Intersection(point) | Closest::SinglePoint(point) => point,
            Closest::Indeterminate => from.to_point(),
        };
        self.to_point().haversine_distance(&nearest) / 1000.0
    }
}

/// Distance and free-flow duration for one leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoadDistance {
    pub distance_km: f64,
    pub duration_min: f64,
}

/// Which stage of the chain produced a distance figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMethod {
    Primary,
    Secondary,
    Fallback,
    /// Ground truth measured from the GPS track after the ride.
    Measured,
}

impl DistanceMethod {
    pub const fn label(self) -> &'static str {
        match self {
            DistanceMethod::Primary => "primary",
            DistanceMethod::Secondary => "secondary",
            DistanceMethod::Fallback => "fallback",
            DistanceMethod::Measured => "measured",
        }
    }
}

/// Failure raised by a single provider stage. Absorbed by the resolver.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("provider answered with status {0}")]
    BadStatus(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// One stage of the resolution chain. Implementations must be `Send + Sync`
/// so a resolver can be shared across request handlers.
pub trait DistanceProvider: Send + Sync {
    fn name(&self) -> &str;

    fn road_distance(
        &self,
        origin: Coordinates,
        destination: Coordinates,
    ) -> Result<RoadDistance, ProviderError>;
}

/// Network stage speaking the OSRM `route/v1/driving` dialect.
///
/// The embedded client carries the per-stage timeout; a stage that exceeds it
/// surfaces as a transport error and the chain moves on.
pub struct HttpDistanceProvider {
    name: String,
    endpoint: String,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct RouteResponse {
    code: String,
    routes: Option<Vec<RouteLeg>>,
}

#[derive(Deserialize)]
struct RouteLeg {
    /// Metres.
    distance: f64,
    /// Seconds.
    duration: f64,
}

impl HttpDistanceProvider {
    pub fn new(name: &str, endpoint: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl DistanceProvider for HttpDistanceProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn road_distance(
        &self,
        origin: Coordinates,
        destination: Coordinates,
    ) -> Result<RoadDistance, ProviderError> {
        let url = format!(
            "{}/route/v1/driving/{},{};{},{}?overview=false",
            self.endpoint, origin.lng, origin.lat, destination.lng, destination.lat,
        );

        let response: RouteResponse = self
            .client
            .get(&url)
            .send()
            .map_err(|err| ProviderError::Transport(err.to_string()))?
            .json()
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;

        if response.code != "Ok" {
            return Err(ProviderError::BadStatus(response.code));
        }

        let leg = response
            .routes
            .and_then(|routes| routes.into_iter().next())
            .ok_or_else(|| ProviderError::Malformed("empty route list".to_string()))?;

        Ok(RoadDistance {
            distance_km: leg.distance / 1000.0,
            duration_min: leg.duration / 60.0,
        })
    }
}

/// Terminal stage: great-circle distance with duration estimated at a
/// configured average city speed.
pub struct GreatCircleProvider {
    speed_kmh: f64,
}

impl GreatCircleProvider {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    pub fn estimate(&self, origin: Coordinates, destination: Coordinates) -> RoadDistance {
        let distance_km = origin.haversine_km(destination);
        let duration_min = if distance_km > 0.0 && self.speed_kmh > 0.0 {
            (distance_km / self.speed_kmh) * 60.0
        } else {
            0.0
        };

        RoadDistance {
            distance_km,
            duration_min,
        }
    }
}

/// Distance produced by the chain, tagged with the winning stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedDistance {
    pub distance_km: f64,
    pub duration_min: f64,
    pub method: DistanceMethod,
}

/// Ordered fallback chain over [`DistanceProvider`] stages.
pub struct DistanceResolver {
    providers: Vec<Box<dyn DistanceProvider>>,
    fallback: GreatCircleProvider,
}

impl DistanceResolver {
    pub fn new(providers: Vec<Box<dyn DistanceProvider>>, fallback: GreatCircleProvider) -> Self {
        Self {
            providers,
            fallback,
        }
    }

    /// Build the chain described by a [`DistanceConfig`]: primary and
    /// secondary network stages when endpoints are configured, great-circle
    /// fallback always.
    pub fn from_config(config: &DistanceConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut providers: Vec<Box<dyn DistanceProvider>> = Vec::new();

        for (name, endpoint) in [
            ("primary-routing", config.primary_endpoint.as_deref()),
            ("secondary-routing", config.secondary_endpoint.as_deref()),
        ] {
            if let Some(endpoint) = endpoint {
                match HttpDistanceProvider::new(name, endpoint, timeout) {
                    Ok(provider) => providers.push(Box::new(provider)),
                    Err(err) => warn!(provider = name, %err, "skipping unusable distance provider"),
                }
            }
        }

        Self::new(
            providers,
            GreatCircleProvider::new(config.fallback_speed_kmh),
        )
    }

    /// Resolve a road distance. Never fails: failing stages are logged and
    /// skipped, and the local great-circle stage answers when every network
    /// stage is down.
    pub fn resolve(&self, origin: Coordinates, destination: Coordinates) -> ResolvedDistance {
        for (position, provider) in self.providers.iter().enumerate() {
            match provider.road_distance(origin, destination) {
                Ok(road) => {
                    let method = if position == 0 {
                        DistanceMethod::Primary
                    } else {
                        DistanceMethod::Secondary
                    };
                    return ResolvedDistance {
                        distance_km: road.distance_km,
                        duration_min: road.duration_min,
                        method,
                    };
                }
                Err(err) => {
                    warn!(provider = provider.name(), %err, "distance stage failed, trying next");
                }
            }
        }

        let road = self.fallback.estimate(origin, destination);
        ResolvedDistance {
            distance_km: road.distance_km,
            duration_min: road.duration_min,
            method: DistanceMethod::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        name: &'static str,
        road: RoadDistance,
    }

    impl DistanceProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn road_distance(
            &self,
            _origin: Coordinates,
            _destination: Coordinates,
        ) -> Result<RoadDistance, ProviderError> {
            Ok(self.road)
        }
    }

    struct FailingProvider {
        name: &'static str,
    }

    impl DistanceProvider for FailingProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn road_distance(
            &self,
            _origin: Coordinates,
            _destination: Coordinates,
        ) -> Result<RoadDistance, ProviderError> {
            Err(ProviderError::Transport("connection refused".to_string()))
        }
    }

    fn nairobi() -> Coordinates {
        Coordinates::new(-1.2864, 36.8172)
    }

    fn westlands() -> Coordinates {
        Coordinates::new(-1.2672, 36.8070)
    }

    #[test]
    fn haversine_matches_known_distance() {
        // One degree of longitude on the equator is ~111.19 km.
        let a = Coordinates::new(0.0, 36.8);
        let b = Coordinates::new(0.0, 37.8);
        let km = a.haversine_km(b);
        assert!((km - 111.19).abs() < 0.5, "got {km}");
    }

    #[test]
    fn first_healthy_stage_wins_and_is_tagged_primary() {
        let resolver = DistanceResolver::new(
            vec![
                Box::new(FixedProvider {
                    name: "a",
                    road: RoadDistance {
                        distance_km: 7.2,
                        duration_min: 14.0,
                    },
                }),
                Box::new(FixedProvider {
                    name: "b",
                    road: RoadDistance {
                        distance_km: 9.9,
                        duration_min: 20.0,
                    },
                }),
            ],
            GreatCircleProvider::new(40.0),
        );

        let resolved = resolver.resolve(nairobi(), westlands());
        assert_eq!(resolved.method, DistanceMethod::Primary);
        assert!((resolved.distance_km - 7.2).abs() < f64::EPSILON);
    }

    #[test]
    fn failed_primary_falls_through_to_secondary() {
        let resolver = DistanceResolver::new(
            vec![
                Box::new(FailingProvider { name: "a" }),
                Box::new(FixedProvider {
                    name: "b",
                    road: RoadDistance {
                        distance_km: 9.9,
                        duration_min: 20.0,
                    },
                }),
            ],
            GreatCircleProvider::new(40.0),
        );

        let resolved = resolver.resolve(nairobi(), westlands());
        assert_eq!(resolved.method, DistanceMethod::Secondary);
        assert!((resolved.distance_km - 9.9).abs() < f64::EPSILON);
    }

    #[test]
    fn all_network_stages_down_still_resolves_with_fallback_tag() {
        let resolver = DistanceResolver::new(
            vec![
                Box::new(FailingProvider { name: "a" }),
                Box::new(FailingProvider { name: "b" }),
            ],
            GreatCircleProvider::new(40.0),
        );

        let resolved = resolver.resolve(nairobi(), westlands());
        assert_eq!(resolved.method, DistanceMethod::Fallback);
        assert!(resolved.distance_km > 0.0);
        assert!(resolved.duration_min > 0.0);
    }

    #[test]
    fn empty_chain_goes_straight_to_fallback() {
        let resolver = DistanceResolver::new(Vec::new(), GreatCircleProvider::new(40.0));
        let resolved = resolver.resolve(nairobi(), westlands());
        assert_eq!(resolved.method, DistanceMethod::Fallback);
    }

    #[test]
    fn point_on_leg_has_near_zero_deviation() {
        let from = Coordinates::new(0.0, 36.0);
        let to = Coordinates::new(0.0, 37.0);
        let midpoint = Coordinates::new(0.0, 36.5);
        assert!(midpoint.distance_to_leg_km(from, to) < 0.01);

        let off_route = Coordinates::new(0.1, 36.5);
        let km = off_route.distance_to_leg_km(from, to);
        assert!(km > 10.0, "got {km}");
    }
}

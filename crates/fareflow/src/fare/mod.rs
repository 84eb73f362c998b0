//! Fare computation chain: road-distance resolution with provider fallback,
//! tariff application, and post-ride recalculation.

mod config;
pub mod distance;
mod engine;

pub use config::{DistanceConfig, FareConfig, RideClass};
pub use distance::{
    Coordinates, DistanceMethod, DistanceProvider, DistanceResolver, GreatCircleProvider,
    HttpDistanceProvider, ProviderError, ResolvedDistance, RoadDistance,
};
pub use engine::{FareEngine, FareError, FareQuote, FareWarning};

use std::env;
use std::net::{IpAddr, SocketAddr};

use crate::cancellation::CancellationConfig;
use crate::fare::{DistanceConfig, FareConfig};
use crate::rides::LifecycleConfig;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the service, loaded from the environment.
/// Engine dials (`fare`, `distance`, `cancellation`, `lifecycle`) are plain
/// structs handed to the engines at construction; nothing reads them through
/// globals.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub fare: FareConfig,
    pub distance: DistanceConfig,
    pub cancellation: CancellationConfig,
    pub lifecycle: LifecycleConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let mut fare = FareConfig::default();
        if let Some(rate) = read_f64("FARE_RATE_PER_KM")? {
            fare.rate_per_km = rate;
        }
        if let Some(rate) = read_f64("FARE_COMMISSION_PER_KM")? {
            fare.commission_per_km = rate;
        }

        let mut distance = DistanceConfig::default();
        distance.primary_endpoint = env::var("DISTANCE_PRIMARY_URL").ok();
        distance.secondary_endpoint = env::var("DISTANCE_SECONDARY_URL").ok();
        if let Some(secs) = read_u64("DISTANCE_TIMEOUT_SECS")? {
            distance.timeout_secs = secs;
        }

        let mut cancellation = CancellationConfig::default();
        if let Some(quota) = read_u64("CANCELLATION_FREE_QUOTA")? {
            cancellation.free_quota = quota as u32;
        }
        if let Some(fine) = read_u64("CANCELLATION_FINE")? {
            cancellation.fine_amount = fine as u32;
        }

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            fare,
            distance,
            cancellation,
            lifecycle: LifecycleConfig::default(),
        })
    }
}

fn read_f64(key: &'static str) -> Result<Option<f64>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(None),
    }
}

fn read_u64(key: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(None),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("APP_PORT must be a valid u16")]
    InvalidPort,
    #[error("APP_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost { source: std::net::AddrParseError },
    #[error("{key} must be numeric")]
    InvalidNumber { key: &'static str },
}

//! Core engine for a ride-hailing marketplace: the ride lifecycle state
//! machine, fare computation with provider fallback, the cancellation-fine
//! policy, cash and split-fare settlement, and GPS-based reconciliation.
//!
//! External concerns (payments, notifications, persistence, driver presence)
//! are traits in [`rides::gateways`] and the per-module repository contracts,
//! so the whole engine runs against in-memory fakes in tests and against real
//! adapters in `services/api`.

pub mod cancellation;
pub mod config;
pub mod error;
pub mod fare;
pub mod gps;
pub mod rides;
pub mod settlement;
pub mod telemetry;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;

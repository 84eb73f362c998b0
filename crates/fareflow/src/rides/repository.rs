use super::domain::{Ride, RideId, RideStatus, RiderId};

/// Storage abstraction for ride records.
///
/// The two mutation entry points carry the concurrency contract of the
/// lifecycle: `update_if_status` is a single atomic compare-and-set on the
/// status (driver acceptance races are decided here), and `update_with` is an
/// atomic read-modify-write (cash confirmations and split-leg updates go
/// through it so derived all-parties checks never race a concurrent write).
/// In-memory implementations serialize on one lock; a database-backed one
/// would use optimistic versioning.
pub trait RideRepository: Send + Sync {
    fn insert(&self, ride: Ride) -> Result<Ride, RepositoryError>;

    fn fetch(&self, id: &RideId) -> Result<Option<Ride>, RepositoryError>;

    /// Atomically mutate a ride and return the updated record.
    fn update_with(
        &self,
        id: &RideId,
        mutate: &mut dyn FnMut(&mut Ride),
    ) -> Result<Ride, RepositoryError>;

    /// Atomically mutate a ride only if its status matches `expected`;
    /// `StatusMismatch` otherwise, with nothing written.
    fn update_if_status(
        &self,
        id: &RideId,
        expected: RideStatus,
        mutate: &mut dyn FnMut(&mut Ride),
    ) -> Result<Ride, RepositoryError>;

    /// The rider's ride in a non-terminal status, if any.
    fn active_ride_for_rider(&self, rider: &RiderId) -> Result<Option<Ride>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("ride is not {expected} (currently {actual})")]
    StatusMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

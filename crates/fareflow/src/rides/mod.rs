//! Ride lifecycle: the domain model, the storage and collaborator contracts,
//! the orchestrating state machine, and its HTTP surface.

pub mod domain;
pub mod gateways;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{
    Actor, DriverId, ParticipantPaymentStatus, PaymentMethod, Place, Ride, RideId, RideRequest,
    RideStatus, RideView, RiderId, Role, RoleError, SettlementPath, ShareSpec,
    SplitFareAllocation, SplitParticipant, SplitPaymentMethod,
};
pub use gateways::{
    deliver, DriverDirectory, Notification, NotificationCategory, NotificationError,
    NotificationSink, PaymentError, PaymentGateway, PaymentReceipt, ADMIN_QUEUE,
};
pub use repository::{RepositoryError, RideRepository};
pub use router::ride_router;
pub use service::{
    CancelledRide, CompletedRide, CreatedRide, LifecycleConfig, LifecycleError, PaymentDispatch,
    RideLifecycleService,
};

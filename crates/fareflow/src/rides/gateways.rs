//! External collaborators consumed by the settlement and lifecycle services:
//! the payment gateway, the notification sink, and the driver presence
//! directory. All are traits so the engine can be exercised against in-memory
//! fakes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::{DriverId, PaymentMethod};
use crate::fare::Coordinates;

/// Synthetic user id receiving dispute and emergency escalations.
pub const ADMIN_QUEUE: &str = "admin-queue";

/// Proof of a successful charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment_id: String,
}

/// Failure surfaced by the payment gateway. Retryable from the caller's
/// point of view; the ride itself is never rolled back over one.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment declined: {0}")]
    Declined(String),
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

/// Charges riders and moves money on driver payout balances.
pub trait PaymentGateway: Send + Sync {
    fn create_payment(
        &self,
        user_id: &str,
        amount: u32,
        currency: &str,
        method: PaymentMethod,
        description: &str,
    ) -> Result<PaymentReceipt, PaymentError>;

    /// Credit (positive) or deduct (negative) a driver's payout balance.
    fn add_to_payout_balance(
        &self,
        driver: &DriverId,
        amount: i64,
        memo: &str,
    ) -> Result<(), PaymentError>;

    fn can_afford(&self, user_id: &str, amount: u32) -> bool;
}

/// Outbound user notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub category: NotificationCategory,
    pub data: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        category: NotificationCategory,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            title: title.into(),
            body: body.into(),
            category,
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    RideUpdate,
    Payment,
    Dispute,
    Emergency,
}

/// Notification dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Delivery channel for user notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Fire-and-forget wrapper: a dropped notification is logged and never fails
/// the state transition that produced it.
pub fn deliver<N: NotificationSink>(sink: &N, notification: Notification) {
    let user = notification.user_id.clone();
    if let Err(err) = sink.notify(notification) {
        warn!(%user, %err, "notification dropped");
    }
}

/// Driver presence index used for matching and availability bookkeeping.
pub trait DriverDirectory: Send + Sync {
    /// Drivers currently free to take a ride near the pickup point.
    fn available_near(&self, origin: Coordinates) -> Vec<DriverId>;

    /// Mark a driver as committed to a ride.
    fn reserve(&self, driver: &DriverId);

    /// Free a driver for new assignments.
    fn release(&self, driver: &DriverId);
}

use super::common::*;
use crate::rides::{Actor, RepositoryError, RideRepository, RideStatus, ADMIN_QUEUE};
use crate::settlement::{CashResolution, CashSettlementError};

fn driver() -> Actor {
    Actor::driver(DRIVER)
}

fn rider() -> Actor {
    Actor::rider(RIDER)
}

#[test]
fn both_confirmations_deduct_commission_exactly_once() {
    let harness = harness();
    let ride = completed_cash_ride("ride-cash-1");
    harness.rides.insert(ride.clone()).expect("inserts");

    let view = harness
        .cash
        .submit(&ride.id, &driver(), true)
        .expect("driver submits");
    assert_eq!(view.outcome, "pending");
    assert!(!view.commission_deducted);

    let view = harness
        .cash
        .submit(&ride.id, &rider(), true)
        .expect("rider submits");
    assert_eq!(view.outcome, "both_confirmed");
    assert!(view.commission_deducted);
    assert!(!view.dispute_flagged);

    // Commission leaves the driver's payout balance once.
    assert_eq!(harness.gateway.payouts().len(), 1);
    assert_eq!(harness.gateway.payout_total(DRIVER), -170);
}

#[test]
fn resubmitting_the_same_value_is_idempotent() {
    let harness = harness();
    let ride = completed_cash_ride("ride-cash-2");
    harness.rides.insert(ride.clone()).expect("inserts");

    harness
        .cash
        .submit(&ride.id, &driver(), true)
        .expect("first submit");
    let first = harness
        .cash
        .submit(&ride.id, &driver(), true)
        .expect("second submit");
    assert_eq!(first.outcome, "pending");

    harness
        .cash
        .submit(&ride.id, &rider(), true)
        .expect("rider submits");
    let again = harness
        .cash
        .submit(&ride.id, &rider(), true)
        .expect("replayed submit");
    assert_eq!(again.outcome, "both_confirmed");
    assert_eq!(harness.gateway.payouts().len(), 1, "no double deduction");
}

#[test]
fn disagreement_stays_pending_without_commission_or_dispute() {
    let harness = harness();
    let ride = completed_cash_ride("ride-cash-3");
    harness.rides.insert(ride.clone()).expect("inserts");

    harness
        .cash
        .submit(&ride.id, &driver(), true)
        .expect("driver submits");
    let view = harness
        .cash
        .submit(&ride.id, &rider(), false)
        .expect("rider denies");

    assert_eq!(view.outcome, "pending");
    assert!(!view.commission_deducted);
    assert!(!view.dispute_flagged);
    assert!(harness.gateway.payouts().is_empty());
}

#[test]
fn both_denials_flag_a_dispute_and_alert_the_admin_queue() {
    let harness = harness();
    let ride = completed_cash_ride("ride-cash-4");
    harness.rides.insert(ride.clone()).expect("inserts");

    harness
        .cash
        .submit(&ride.id, &driver(), false)
        .expect("driver denies");
    let view = harness
        .cash
        .submit(&ride.id, &rider(), false)
        .expect("rider denies");

    assert_eq!(view.outcome, "both_denied");
    assert!(view.dispute_flagged);
    assert!(!view.commission_deducted);
    assert!(harness.gateway.payouts().is_empty());

    let escalations = harness.notifications.for_user(ADMIN_QUEUE);
    assert_eq!(escalations.len(), 1);
    assert!(escalations[0].body.contains("both parties denied"));

    let stored = harness
        .rides
        .fetch(&ride.id)
        .expect("fetches")
        .expect("present");
    assert_eq!(
        stored.metadata.get("dispute_reason").map(String::as_str),
        Some("both parties denied cash payment")
    );
}

#[test]
fn failed_deduction_raises_a_dispute_instead_of_silent_debt() {
    let harness = harness();
    let ride = completed_cash_ride("ride-cash-5");
    harness.rides.insert(ride.clone()).expect("inserts");
    harness.gateway.set_fail_payouts(true);

    harness
        .cash
        .submit(&ride.id, &driver(), true)
        .expect("driver submits");
    let view = harness
        .cash
        .submit(&ride.id, &rider(), true)
        .expect("rider submits");

    // Both confirmed must never coexist with "not deducted and not disputed".
    assert_eq!(view.outcome, "disputed");
    assert!(!view.commission_deducted);
    assert!(view.dispute_flagged);
    assert_eq!(harness.notifications.for_user(ADMIN_QUEUE).len(), 1);

    // Admin confirmation re-attempts the deduction once the ledger is back.
    harness.gateway.set_fail_payouts(false);
    let resolved = harness
        .cash
        .resolve(&ride.id, &Actor::admin("ops-1"), CashResolution::Confirm)
        .expect("admin resolves");
    assert_eq!(resolved.outcome, "both_confirmed");
    assert!(resolved.commission_deducted);
    assert!(!resolved.dispute_flagged);
    assert_eq!(harness.gateway.payout_total(DRIVER), -170);
}

#[test]
fn admin_denial_closes_the_case_without_moving_commission() {
    let harness = harness();
    let ride = completed_cash_ride("ride-cash-6");
    harness.rides.insert(ride.clone()).expect("inserts");

    harness
        .cash
        .submit(&ride.id, &driver(), false)
        .expect("driver denies");
    harness
        .cash
        .submit(&ride.id, &rider(), false)
        .expect("rider denies");

    let view = harness
        .cash
        .resolve(&ride.id, &Actor::admin("ops-1"), CashResolution::Deny)
        .expect("admin denies");
    assert_eq!(view.outcome, "both_denied");
    assert!(!view.dispute_flagged);
    assert!(!view.commission_deducted);
    assert!(harness.gateway.payouts().is_empty());
}

#[test]
fn confirmation_requires_a_completed_ride() {
    let harness = harness();
    let mut ride = completed_cash_ride("ride-cash-7");
    ride.status = RideStatus::Started;
    harness.rides.insert(ride.clone()).expect("inserts");

    match harness.cash.submit(&ride.id, &driver(), true) {
        Err(CashSettlementError::NotCompleted { status }) => assert_eq!(status, "started"),
        other => panic!("expected not-completed error, got {other:?}"),
    }
}

#[test]
fn strangers_cannot_confirm() {
    let harness = harness();
    let ride = completed_cash_ride("ride-cash-8");
    harness.rides.insert(ride.clone()).expect("inserts");

    match harness.cash.submit(&ride.id, &Actor::driver("driver-9"), true) {
        Err(CashSettlementError::NotParticipant) => {}
        other => panic!("expected not-participant error, got {other:?}"),
    }

    match harness.cash.submit(&ride.id, &Actor::admin("ops-1"), true) {
        Err(CashSettlementError::Forbidden(_)) => {}
        other => panic!("expected forbidden, got {other:?}"),
    }
}

#[test]
fn non_cash_rides_are_rejected() {
    let harness = harness();
    let mut ride = completed_cash_ride("ride-cash-9");
    ride.settlement = crate::rides::SettlementPath::Immediate;
    harness.rides.insert(ride.clone()).expect("inserts");

    match harness.cash.submit(&ride.id, &driver(), true) {
        Err(CashSettlementError::NotCashRide) => {}
        other => panic!("expected not-cash-ride error, got {other:?}"),
    }
}

#[test]
fn missing_ride_maps_to_not_found() {
    let harness = harness();
    match harness
        .cash
        .status(&crate::rides::RideId("ride-none".to_string()))
    {
        Err(CashSettlementError::NotFound) => {}
        other => panic!("expected not found, got {other:?}"),
    }
    // Repository errors other than not-found pass through untouched.
    let err = CashSettlementError::Repository(RepositoryError::Unavailable("down".to_string()));
    assert!(err.to_string().contains("down"));
}

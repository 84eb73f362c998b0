use std::thread;

use super::common::*;
use crate::rides::gateways::DriverDirectory;
use crate::rides::{
    Actor, DriverId, LifecycleError, PaymentMethod, RideRepository, RideStatus,
};
use crate::test_helpers::westlands;

#[test]
fn creation_attaches_a_quote_before_the_ride_is_visible() {
    let harness = harness_with_drivers(&[DRIVER]);
    let created = create(&harness, PaymentMethod::MobileMoney);

    assert_eq!(created.ride.status, "pending");
    assert_eq!(created.ride.fare_amount, 900);
    assert_eq!(created.ride.currency, "KSH");
    assert_eq!(created.ride.settlement, "immediate");
    assert!(created.retry_after_secs.is_none());

    let stored = harness
        .rides
        .fetch(&ride_id(&created))
        .expect("fetches")
        .expect("present");
    assert_eq!(stored.fare.base_amount, 600);
    assert_eq!(stored.fare.commission, 170);
    assert_eq!(stored.fare.driver_earnings, 730);

    // Nearby drivers are prompted as a side effect, never as a precondition.
    assert_eq!(harness.notifications.for_user(DRIVER).len(), 1);
}

#[test]
fn settlement_path_is_fixed_at_creation() {
    let harness = harness_with_drivers(&[DRIVER]);
    let cash = create(&harness, PaymentMethod::Cash);
    assert_eq!(cash.ride.settlement, "cash_dual_confirm");

    // The rider already has an active ride, so use another rider for splits.
    let split = harness
        .service
        .create(
            &Actor::rider("rider-2"),
            split_request(vec![
                ("rider-2", 450, crate::rides::SplitPaymentMethod::MobileMoney),
                ("rider-3", 450, crate::rides::SplitPaymentMethod::Cash),
            ]),
        )
        .expect("split ride creates");
    assert_eq!(split.ride.settlement, "split_fare");
    assert!(split.ride.funds_locked, "escrowed from creation");
}

#[test]
fn split_creation_rejects_a_mismatched_allocation() {
    let harness = harness_with_drivers(&[DRIVER]);
    let result = harness.service.create(
        &rider(),
        split_request(vec![
            ("rider-1", 400, crate::rides::SplitPaymentMethod::MobileMoney),
            ("rider-2", 400, crate::rides::SplitPaymentMethod::Cash),
        ]),
    );
    match result {
        Err(LifecycleError::Split(_)) => {}
        other => panic!("expected split validation error, got {other:?}"),
    }
}

#[test]
fn a_rider_carries_at_most_one_active_ride() {
    let harness = harness_with_drivers(&[DRIVER]);
    let first = create(&harness, PaymentMethod::MobileMoney);

    match harness.service.create(&rider(), request(PaymentMethod::Cash)) {
        Err(LifecycleError::ActiveRideExists { ride_id }) => {
            assert_eq!(ride_id, first.ride.ride_id)
        }
        other => panic!("expected active-ride conflict, got {other:?}"),
    }
}

#[test]
fn no_drivers_parks_the_ride_with_a_retry_hint() {
    let harness = harness_with_drivers(&[]);
    let created = create(&harness, PaymentMethod::MobileMoney);

    assert_eq!(created.ride.status, "no_drivers");
    assert_eq!(created.retry_after_secs, Some(120));

    // A parked ride is terminal: it does not block the rider's next request.
    let second = create(&harness, PaymentMethod::MobileMoney);
    assert_eq!(second.ride.status, "no_drivers");
}

#[test]
fn retry_search_recovers_once_a_driver_appears() {
    let harness = harness_with_drivers(&[]);
    let created = create(&harness, PaymentMethod::MobileMoney);
    let id = ride_id(&created);

    // Still nobody around: parked again, same hint.
    let retried = harness
        .service
        .retry_driver_search(&id, &rider())
        .expect("retry runs");
    assert_eq!(retried.ride.status, "no_drivers");
    assert_eq!(retried.retry_after_secs, Some(120));

    harness.drivers.release(&DriverId(DRIVER.to_string()));
    let retried = harness
        .service
        .retry_driver_search(&id, &rider())
        .expect("retry runs");
    assert_eq!(retried.ride.status, "pending");
    assert!(retried.retry_after_secs.is_none());

    // Retry is only valid from no_drivers.
    match harness.service.retry_driver_search(&id, &rider()) {
        Err(LifecycleError::InvalidTransition { actual, .. }) => assert_eq!(actual, "pending"),
        other => panic!("expected invalid transition, got {other:?}"),
    }
}

#[test]
fn exactly_one_of_two_concurrent_acceptances_wins() {
    let harness = harness_with_drivers(&["driver-a", "driver-b"]);
    let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));

    let service_a = harness.service.clone();
    let service_b = harness.service.clone();
    let id_a = id.clone();
    let id_b = id.clone();

    let a = thread::spawn(move || service_a.accept(&id_a, &Actor::driver("driver-a")));
    let b = thread::spawn(move || service_b.accept(&id_b, &Actor::driver("driver-b")));
    let results = [a.join().expect("thread a"), b.join().expect("thread b")];

    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1, "exactly one acceptance may win");
    assert!(results
        .iter()
        .any(|result| matches!(result, Err(LifecycleError::RideUnavailable))));

    let stored = harness.rides.fetch(&id).expect("fetches").expect("present");
    assert_eq!(stored.status, RideStatus::Accepted);
    assert!(stored.driver_id.is_some());
}

#[test]
fn accepting_a_ride_twice_reports_it_unavailable() {
    let harness = harness_with_drivers(&["driver-a", "driver-b"]);
    let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));

    harness
        .service
        .accept(&id, &Actor::driver("driver-a"))
        .expect("first wins");
    match harness.service.accept(&id, &Actor::driver("driver-b")) {
        Err(LifecycleError::RideUnavailable) => {}
        other => panic!("expected unavailable, got {other:?}"),
    }
}

#[test]
fn declining_is_terminal() {
    let harness = harness_with_drivers(&[DRIVER]);
    let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));

    let view = harness.service.decline(&id, &driver()).expect("declines");
    assert_eq!(view.status, "declined");

    match harness.service.accept(&id, &driver()) {
        Err(LifecycleError::RideUnavailable) => {}
        other => panic!("expected unavailable, got {other:?}"),
    }
}

#[test]
fn only_the_assigned_driver_may_start_or_complete() {
    let harness = harness_with_drivers(&[DRIVER, "driver-2"]);
    let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));
    harness.service.accept(&id, &driver()).expect("accepts");

    match harness.service.start(&id, &Actor::driver("driver-2")) {
        Err(LifecycleError::NotAssignedDriver) => {}
        other => panic!("expected not-assigned error, got {other:?}"),
    }
    match harness.service.start(&id, &rider()) {
        Err(LifecycleError::Forbidden(_)) => {}
        other => panic!("expected forbidden, got {other:?}"),
    }

    harness.service.start(&id, &driver()).expect("starts");
    match harness.service.complete(&id, &Actor::driver("driver-2")) {
        Err(LifecycleError::NotAssignedDriver) => {}
        other => panic!("expected not-assigned error, got {other:?}"),
    }
}

#[test]
fn completion_needs_a_started_ride() {
    let harness = harness_with_drivers(&[DRIVER]);
    let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));
    harness.service.accept(&id, &driver()).expect("accepts");

    match harness.service.complete(&id, &driver()) {
        Err(LifecycleError::InvalidTransition { expected, actual }) => {
            assert_eq!(expected, "started");
            assert_eq!(actual, "accepted");
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
}

#[test]
fn completion_frees_the_driver() {
    let harness = harness_with_drivers(&[DRIVER]);
    let id = started_ride(&harness, PaymentMethod::MobileMoney);
    assert!(!harness.drivers.is_available(&DriverId(DRIVER.to_string())));

    harness.service.complete(&id, &driver()).expect("completes");
    assert!(harness.drivers.is_available(&DriverId(DRIVER.to_string())));
}

#[test]
fn cancellation_works_from_every_active_state_and_no_further() {
    for advance in 0..3 {
        let harness = harness_with_drivers(&[DRIVER]);
        let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));
        if advance >= 1 {
            harness.service.accept(&id, &driver()).expect("accepts");
        }
        if advance >= 2 {
            harness.service.start(&id, &driver()).expect("starts");
        }

        let cancelled = harness
            .service
            .cancel(&id, &rider(), "change of plans")
            .expect("cancels");
        assert_eq!(cancelled.ride.status, "cancelled_by_passenger");
        assert_eq!(
            cancelled.ride.metadata.get("cancellation_reason").map(String::as_str),
            Some("change of plans")
        );
    }

    let harness = harness_with_drivers(&[DRIVER]);
    let id = completed_ride(&harness, PaymentMethod::MobileMoney);
    match harness.service.cancel(&id, &rider(), "too late") {
        Err(LifecycleError::InvalidTransition { actual, .. }) => assert_eq!(actual, "completed"),
        other => panic!("expected invalid transition, got {other:?}"),
    }
}

#[test]
fn sixth_cancellation_fines_and_blocks_the_rider() {
    let harness = harness_with_drivers(&[DRIVER]);

    for round in 1..=6 {
        let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));
        let cancelled = harness
            .service
            .cancel(&id, &rider(), "testing patience")
            .expect("cancels");
        assert_eq!(cancelled.cancellation.count, round);
        if round <= 5 {
            assert_eq!(cancelled.cancellation.fine_applied, None);
        } else {
            assert_eq!(cancelled.cancellation.fine_applied, Some(200));
            assert_eq!(
                cancelled.ride.metadata.get("cancellation_fine").map(String::as_str),
                Some("200")
            );
        }
    }

    // The unpaid fine now gates both new requests and cancellations.
    match harness.service.create(&rider(), request(PaymentMethod::MobileMoney)) {
        Err(LifecycleError::FineOutstanding { amount, currency }) => {
            assert_eq!(amount, 200);
            assert_eq!(currency, "KSH");
        }
        other => panic!("expected fine gate, got {other:?}"),
    }
}

#[test]
fn cancellation_releases_and_informs_the_driver() {
    let harness = harness_with_drivers(&[DRIVER]);
    let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));
    harness.service.accept(&id, &driver()).expect("accepts");
    assert!(!harness.drivers.is_available(&DriverId(DRIVER.to_string())));

    harness
        .service
        .cancel(&id, &rider(), "found a matatu")
        .expect("cancels");
    assert!(harness.drivers.is_available(&DriverId(DRIVER.to_string())));
    assert!(harness
        .notifications
        .for_user(DRIVER)
        .iter()
        .any(|note| note.title == "Ride cancelled"));
}

#[test]
fn strangers_cannot_cancel_someone_elses_ride() {
    let harness = harness_with_drivers(&[DRIVER]);
    let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));

    match harness.service.cancel(&id, &Actor::rider("rider-9"), "nope") {
        Err(LifecycleError::NotRideOwner) => {}
        other => panic!("expected not-owner error, got {other:?}"),
    }
}

#[test]
fn driver_cancellation_reenters_the_search() {
    let harness = harness_with_drivers(&["driver-a", "driver-b"]);
    let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));
    harness
        .service
        .accept(&id, &Actor::driver("driver-a"))
        .expect("accepts");

    let result = harness
        .service
        .driver_cancel(&id, &Actor::driver("driver-a"), "puncture")
        .expect("driver cancels");
    assert_eq!(result.ride.status, "pending");
    assert!(result.ride.driver_id.is_none());
    assert!(result.retry_after_secs.is_none());
    assert!(result
        .ride
        .metadata
        .get("driver_cancellation")
        .is_some_and(|detail| detail.contains("puncture")));

    // driver-b can pick it up like any pending ride.
    harness
        .service
        .accept(&id, &Actor::driver("driver-b"))
        .expect("second driver accepts");
}

#[test]
fn driver_cancellation_with_an_empty_market_parks_the_ride() {
    let harness = harness_with_drivers(&[DRIVER]);
    let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));
    harness.service.accept(&id, &driver()).expect("accepts");

    // The only driver in town is the one cancelling; the search must not
    // hand the ride straight back to them.
    let result = harness
        .service
        .driver_cancel(&id, &driver(), "going home")
        .expect("driver cancels");
    assert_eq!(result.ride.status, "no_drivers");
    assert_eq!(result.retry_after_secs, Some(120));
    // They are free again for other rides afterwards.
    assert!(harness.drivers.is_available(&DriverId(DRIVER.to_string())));
}

#[test]
fn no_show_is_terminal_and_charges_the_fee() {
    let harness = harness_with_drivers(&[DRIVER]);
    let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));
    harness.service.accept(&id, &driver()).expect("accepts");

    let view = harness
        .service
        .report_no_show(&id, &driver())
        .expect("reports");
    assert_eq!(view.status, "no_show");
    assert!(view
        .metadata
        .get("no_show_fee")
        .is_some_and(|note| note.starts_with("100 charged")));
    assert!(harness
        .gateway
        .charges()
        .iter()
        .any(|(user, amount, _)| user == RIDER && *amount == 100));
    assert!(harness.drivers.is_available(&DriverId(DRIVER.to_string())));
}

#[test]
fn failed_no_show_fee_never_blocks_the_transition() {
    let harness = harness_with_drivers(&[DRIVER]);
    let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));
    harness.service.accept(&id, &driver()).expect("accepts");
    *harness.gateway.fail_payments.lock().expect("toggle") = true;

    let view = harness
        .service
        .report_no_show(&id, &driver())
        .expect("still transitions");
    assert_eq!(view.status, "no_show");
    assert!(view
        .metadata
        .get("no_show_fee")
        .is_some_and(|note| note.contains("charge failed")));
}

#[test]
fn destination_changes_requote_and_record_the_delta() {
    let harness = haversine_harness(&[DRIVER]);
    let id = started_ride(&harness, PaymentMethod::MobileMoney);
    let before = harness.rides.fetch(&id).expect("fetches").expect("present");

    // Karen is much farther out than Westlands.
    let view = harness
        .service
        .change_destination(
            &id,
            &rider(),
            crate::test_helpers::place(-1.3194, 36.7085, "Karen, Nairobi"),
        )
        .expect("destination changes");

    assert!(view.fare_amount > before.fare.final_amount);
    assert_eq!(
        view.metadata.get("previous_fare").map(String::as_str),
        Some(before.fare.final_amount.to_string().as_str())
    );
    let delta = view.metadata.get("fare_delta").expect("delta recorded");
    assert!(delta.starts_with('+'));
    assert!(harness
        .notifications
        .for_user(DRIVER)
        .iter()
        .any(|note| note.title == "Destination changed"));
}

#[test]
fn destination_changes_are_rejected_outside_started() {
    let harness = haversine_harness(&[DRIVER]);
    let id = ride_id(&create(&harness, PaymentMethod::MobileMoney));

    match harness
        .service
        .change_destination(&id, &rider(), westlands())
    {
        Err(LifecycleError::InvalidTransition { expected, actual }) => {
            assert_eq!(expected, "started");
            assert_eq!(actual, "pending");
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
}

#[test]
fn emergencies_are_recorded_and_escalated() {
    let harness = harness_with_drivers(&[DRIVER]);
    let id = started_ride(&harness, PaymentMethod::MobileMoney);

    let view = harness
        .service
        .report_emergency(&id, &rider(), "vehicle stopped on the highway")
        .expect("reports");
    assert!(view.metadata.contains_key("emergency_record"));

    let escalations = harness
        .notifications
        .for_user(crate::rides::ADMIN_QUEUE);
    assert_eq!(escalations.len(), 1);
    assert!(escalations[0].body.contains("vehicle stopped"));

    match harness
        .service
        .report_emergency(&id, &Actor::driver("driver-9"), "not my ride")
    {
        Err(LifecycleError::NotRideOwner) => {}
        other => panic!("expected not-owner error, got {other:?}"),
    }
}

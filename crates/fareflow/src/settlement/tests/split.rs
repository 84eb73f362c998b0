use super::common::*;
use crate::rides::{
    Actor, ParticipantPaymentStatus, RideRepository, RiderId, SplitPaymentMethod, ADMIN_QUEUE,
};
use crate::settlement::{equal_split, validate_shares, SplitSettlementError};

#[test]
fn equal_split_distributes_the_remainder_from_the_front() {
    assert_eq!(equal_split(400, 2), vec![200, 200]);
    assert_eq!(equal_split(400, 3), vec![134, 133, 133]);
    assert_eq!(equal_split(5, 4), vec![2, 1, 1, 1]);
    assert_eq!(equal_split(900, 1), vec![900]);
    assert!(equal_split(900, 0).is_empty());

    // The helper always reassembles the exact total.
    for (total, n) in [(401_u32, 3_usize), (999, 7), (1, 2)] {
        let shares = equal_split(total, n);
        assert_eq!(shares.iter().sum::<u32>(), total);
    }
}

#[test]
fn share_validation_rejects_bad_allocations() {
    let currency = "KSH";
    match validate_shares(&[share("a", 900, SplitPaymentMethod::Cash)], 900, currency) {
        Err(SplitSettlementError::TooFewParticipants) => {}
        other => panic!("expected too-few error, got {other:?}"),
    }

    let shares = vec![
        share("a", 900, SplitPaymentMethod::Cash),
        share("b", 0, SplitPaymentMethod::Cash),
    ];
    match validate_shares(&shares, 900, currency) {
        Err(SplitSettlementError::NonPositiveAmount { rider }) => assert_eq!(rider, "b"),
        other => panic!("expected non-positive error, got {other:?}"),
    }

    let shares = vec![
        share("a", 500, SplitPaymentMethod::Cash),
        share("b", 500, SplitPaymentMethod::Cash),
    ];
    match validate_shares(&shares, 900, currency) {
        Err(SplitSettlementError::SumMismatch { sum, total, .. }) => {
            assert_eq!(sum, 1000);
            assert_eq!(total, 900);
        }
        other => panic!("expected sum mismatch, got {other:?}"),
    }

    let shares = vec![
        share("a", 450, SplitPaymentMethod::MobileMoney),
        share("b", 450, SplitPaymentMethod::Cash),
    ];
    assert!(validate_shares(&shares, 900, currency).is_ok());
}

#[test]
fn finalize_initiates_mobile_legs_and_prompts_cash_legs() {
    let harness = harness();
    let ride = completed_split_ride(
        "ride-split-1",
        vec![
            share("rider-a", 450, SplitPaymentMethod::MobileMoney),
            share("rider-b", 450, SplitPaymentMethod::Cash),
        ],
    );
    harness.rides.insert(ride.clone()).expect("inserts");

    harness.split.finalize(&ride).expect("finalizes");

    let charges = harness.gateway.charges();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].0, "rider-a");
    assert_eq!(charges[0].1, 450);

    let view = harness.split.allocation(&ride.id).expect("allocation");
    let by_rider: Vec<(&str, &str)> = view
        .participants
        .iter()
        .map(|leg| (leg.rider_id.as_str(), leg.status))
        .collect();
    assert!(by_rider.contains(&("rider-a", "processing")));
    assert!(by_rider.contains(&("rider-b", "pending")));

    assert_eq!(harness.notifications.for_user("rider-b").len(), 1);
    assert!(view.funds_locked);
    assert!(!view.funds_released);
}

#[test]
fn funds_release_exactly_once_when_every_leg_completes() {
    let harness = harness();
    let ride = completed_split_ride(
        "ride-split-2",
        vec![
            share("rider-a", 450, SplitPaymentMethod::MobileMoney),
            share("rider-b", 450, SplitPaymentMethod::Cash),
        ],
    );
    harness.rides.insert(ride.clone()).expect("inserts");
    harness.split.finalize(&ride).expect("finalizes");

    let view = harness
        .split
        .resolve_mobile(&ride.id, &RiderId("rider-a".to_string()), true)
        .expect("callback lands");
    assert!(!view.funds_released, "one leg still outstanding");

    let view = harness
        .split
        .confirm_cash(&ride.id, &Actor::rider("rider-b"))
        .expect("cash confirmed");
    assert!(view.funds_released);
    assert!(!view.funds_locked);

    // Driver receives earnings (900 fare - 170 commission) exactly once.
    assert_eq!(harness.gateway.payout_total(DRIVER), 730);
    assert_eq!(
        harness
            .gateway
            .payouts()
            .iter()
            .filter(|(user, _, _)| user == DRIVER)
            .count(),
        1
    );

    // A replayed callback after release changes nothing.
    let view = harness
        .split
        .resolve_mobile(&ride.id, &RiderId("rider-a".to_string()), true)
        .expect("replay tolerated");
    assert!(view.funds_released);
    assert_eq!(harness.gateway.payout_total(DRIVER), 730);
}

#[test]
fn failed_mobile_leg_blocks_release_until_retried() {
    let harness = harness();
    let ride = completed_split_ride(
        "ride-split-3",
        vec![
            share("rider-a", 450, SplitPaymentMethod::MobileMoney),
            share("rider-b", 450, SplitPaymentMethod::Cash),
        ],
    );
    harness.rides.insert(ride.clone()).expect("inserts");
    harness.split.finalize(&ride).expect("finalizes");

    harness
        .split
        .confirm_cash(&ride.id, &Actor::rider("rider-b"))
        .expect("cash confirmed");
    let view = harness
        .split
        .resolve_mobile(&ride.id, &RiderId("rider-a".to_string()), false)
        .expect("failure lands");
    assert!(!view.funds_released);
    assert!(view
        .participants
        .iter()
        .any(|leg| leg.rider_id == "rider-a" && leg.status == "failed"));

    let view = harness
        .split
        .retry_mobile(&ride.id, &Actor::rider("rider-a"))
        .expect("retry initiates");
    assert!(view
        .participants
        .iter()
        .any(|leg| leg.rider_id == "rider-a" && leg.status == "processing"));

    let view = harness
        .split
        .resolve_mobile(&ride.id, &RiderId("rider-a".to_string()), true)
        .expect("retry succeeds");
    assert!(view.funds_released);
    assert_eq!(harness.gateway.payout_total(DRIVER), 730);
}

#[test]
fn payout_failure_reverts_the_release_and_escalates() {
    let harness = harness();
    let ride = completed_split_ride(
        "ride-split-4",
        vec![
            share("rider-a", 450, SplitPaymentMethod::Cash),
            share("rider-b", 450, SplitPaymentMethod::Cash),
        ],
    );
    harness.rides.insert(ride.clone()).expect("inserts");
    harness.split.finalize(&ride).expect("finalizes");
    harness.gateway.set_fail_payouts(true);

    harness
        .split
        .confirm_cash(&ride.id, &Actor::rider("rider-a"))
        .expect("first confirms");
    let view = harness
        .split
        .confirm_cash(&ride.id, &Actor::rider("rider-b"))
        .expect("second confirms");

    assert!(!view.funds_released);
    assert!(view.funds_locked);
    assert_eq!(harness.notifications.for_user(ADMIN_QUEUE).len(), 1);

    let stored = harness
        .rides
        .fetch(&ride.id)
        .expect("fetches")
        .expect("present");
    assert!(stored.dispute_flagged);
}

#[test]
fn wrong_method_confirmations_are_rejected() {
    let harness = harness();
    let ride = completed_split_ride(
        "ride-split-5",
        vec![
            share("rider-a", 450, SplitPaymentMethod::MobileMoney),
            share("rider-b", 450, SplitPaymentMethod::Cash),
        ],
    );
    harness.rides.insert(ride.clone()).expect("inserts");

    match harness.split.confirm_cash(&ride.id, &Actor::rider("rider-a")) {
        Err(SplitSettlementError::WrongLegState { .. }) => {}
        other => panic!("expected wrong-leg-state, got {other:?}"),
    }

    match harness
        .split
        .resolve_mobile(&ride.id, &RiderId("rider-b".to_string()), true)
    {
        Err(SplitSettlementError::WrongLegState { .. }) => {}
        other => panic!("expected wrong-leg-state, got {other:?}"),
    }

    match harness.split.confirm_cash(&ride.id, &Actor::rider("rider-z")) {
        Err(SplitSettlementError::UnknownParticipant { rider }) => assert_eq!(rider, "rider-z"),
        other => panic!("expected unknown participant, got {other:?}"),
    }
}

#[test]
fn participant_statuses_track_the_whole_lifecycle() {
    let shares = vec![
        share("rider-a", 300, SplitPaymentMethod::MobileMoney),
        share("rider-b", 300, SplitPaymentMethod::MobileMoney),
        share("rider-c", 300, SplitPaymentMethod::Cash),
    ];
    let ride = completed_split_ride("ride-split-6", shares);
    let allocation = ride.split_allocation.as_ref().expect("allocation");
    assert_eq!(allocation.participants.len(), 3);
    assert!(allocation
        .participants
        .iter()
        .all(|leg| leg.status == ParticipantPaymentStatus::Pending));
    assert!(!allocation.all_completed());
    assert!(ride.funds_locked, "escrowed from creation");
}

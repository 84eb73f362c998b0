//! Scripted end-to-end walkthrough for stakeholder demos: one cash ride with
//! dual confirmation, one split fare, and the cancellation-fine policy.

use chrono::{Duration, Utc};

use fareflow::error::AppError;
use fareflow::fare::{Coordinates, RideClass};
use fareflow::gps::GpsSample;
use fareflow::rides::{
    Actor, PaymentMethod, Place, RideId, RideRequest, ShareSpec, SplitPaymentMethod,
};
use fareflow::settlement::equal_split;

use crate::infra::demo_services;

fn place(lat: f64, lng: f64, address: &str) -> Place {
    Place {
        coords: Coordinates::new(lat, lng),
        address: address.to_string(),
    }
}

pub(crate) fn run_demo() -> Result<(), AppError> {
    let services = demo_services();
    let lifecycle = &services.lifecycle;
    let cash = lifecycle.cash_service();
    let split = lifecycle.split_service();

    for (driver, lat, lng) in [
        ("driver-amos", -1.2850, 36.8200),
        ("driver-betty", -1.2700, 36.8100),
    ] {
        services.drivers.upsert(
            fareflow::rides::DriverId(driver.to_string()),
            Coordinates::new(lat, lng),
            true,
        );
    }

    let cbd = place(-1.2864, 36.8172, "Moi Avenue, Nairobi");
    let karen = place(-1.3194, 36.7085, "Karen, Nairobi");

    println!("Fare settlement demo");

    let quote = lifecycle
        .estimate(&cbd, &karen, RideClass::Car)
        .map_err(demo_error)?;
    println!(
        "\nEstimate CBD -> Karen: {:.1} km, {} {} (driver keeps {}, method {})",
        quote.distance_km,
        quote.final_amount,
        quote.currency,
        quote.driver_earnings,
        quote.method.label()
    );

    // A cash ride, driven end to end.
    let rider = Actor::rider("wanjiku");
    let created = lifecycle
        .create(
            &rider,
            RideRequest {
                pickup: cbd.clone(),
                destination: karen.clone(),
                ride_class: RideClass::Car,
                payment_method: PaymentMethod::Cash,
                split_shares: None,
            },
        )
        .map_err(demo_error)?;
    let ride_id = RideId(created.ride.ride_id.clone());
    println!("\nRide {} requested (cash, {} KSH)", ride_id, created.ride.fare_amount);

    let driver = Actor::driver("driver-amos");
    lifecycle.accept(&ride_id, &driver).map_err(demo_error)?;
    lifecycle.start(&ride_id, &driver).map_err(demo_error)?;
    println!("driver-amos accepted and started the trip");

    let t0 = Utc::now();
    for (minutes, lat, lng) in [(0, -1.2864, 36.8172), (9, -1.3030, 36.7600), (18, -1.3194, 36.7085)] {
        services
            .recorder
            .append(
                &ride_id,
                GpsSample {
                    coords: Coordinates::new(lat, lng),
                    recorded_at: t0 + Duration::minutes(minutes),
                    accuracy_m: Some(8.0),
                    speed_kmh: None,
                },
            )
            .map_err(demo_error)?;
    }

    let completed = lifecycle.complete(&ride_id, &driver).map_err(demo_error)?;
    println!("trip completed; settlement: {:?}", completed.payment);

    cash.submit(&ride_id, &driver, true).map_err(demo_error)?;
    let view = cash.submit(&ride_id, &rider, true).map_err(demo_error)?;
    println!(
        "cash confirmed by both parties -> outcome {}, commission deducted: {}",
        view.outcome, view.commission_deducted
    );
    println!(
        "driver-amos payout balance: {} KSH",
        services.gateway.payout_balance("driver-amos")
    );

    let reconciled = services
        .recorder
        .reconcile(&ride_id, &Actor::admin("ops"))
        .map_err(demo_error)?;
    if let Some(note) = reconciled.metadata.get("gps_adjustment") {
        println!("gps reconciliation: {note}");
    }

    // A split fare across two participants.
    let shares = equal_split(quote.final_amount, 2);
    let split_rider = Actor::rider("zawadi");
    let created = lifecycle
        .create(
            &split_rider,
            RideRequest {
                pickup: cbd.clone(),
                destination: karen.clone(),
                ride_class: RideClass::Car,
                payment_method: PaymentMethod::MobileMoney,
                split_shares: Some(vec![
                    ShareSpec {
                        rider_id: fareflow::rides::RiderId("zawadi".to_string()),
                        amount: shares[0],
                        method: SplitPaymentMethod::MobileMoney,
                    },
                    ShareSpec {
                        rider_id: fareflow::rides::RiderId("juma".to_string()),
                        amount: shares[1],
                        method: SplitPaymentMethod::Cash,
                    },
                ]),
            },
        )
        .map_err(demo_error)?;
    let split_id = RideId(created.ride.ride_id.clone());
    println!(
        "\nSplit ride {} requested: shares {:?}, escrowed: {}",
        split_id, shares, created.ride.funds_locked
    );

    let driver = Actor::driver("driver-betty");
    lifecycle.accept(&split_id, &driver).map_err(demo_error)?;
    lifecycle.start(&split_id, &driver).map_err(demo_error)?;
    lifecycle.complete(&split_id, &driver).map_err(demo_error)?;

    split
        .resolve_mobile(
            &split_id,
            &fareflow::rides::RiderId("zawadi".to_string()),
            true,
        )
        .map_err(demo_error)?;
    let allocation = split
        .confirm_cash(&split_id, &Actor::rider("juma"))
        .map_err(demo_error)?;
    println!(
        "all shares settled -> funds released: {}, driver-betty payout: {} KSH",
        allocation.funds_released,
        services.gateway.payout_balance("driver-betty")
    );

    // The cancellation-fine policy in action.
    let serial_canceller = Actor::rider("otieno");
    let mut last_count = 0;
    for _ in 0..6 {
        let created = lifecycle
            .create(
                &serial_canceller,
                RideRequest {
                    pickup: cbd.clone(),
                    destination: karen.clone(),
                    ride_class: RideClass::Boda,
                    payment_method: PaymentMethod::MobileMoney,
                    split_shares: None,
                },
            )
            .map_err(demo_error)?;
        let cancelled = lifecycle
            .cancel(
                &RideId(created.ride.ride_id),
                &serial_canceller,
                "changed my mind",
            )
            .map_err(demo_error)?;
        last_count = cancelled.cancellation.count;
        if let Some(fine) = cancelled.cancellation.fine_applied {
            println!(
                "\notieno's cancellation #{last_count} crossed the free quota: fine {fine} KSH"
            );
        }
    }

    match lifecycle.create(
        &serial_canceller,
        RideRequest {
            pickup: cbd,
            destination: karen,
            ride_class: RideClass::Boda,
            payment_method: PaymentMethod::MobileMoney,
            split_shares: None,
        },
    ) {
        Err(err) => println!("new request blocked: {err}"),
        Ok(_) => println!("unexpected: request accepted despite the fine"),
    }

    let status = services
        .policy
        .pay_fine(
            &fareflow::rides::RiderId("otieno".to_string()),
            PaymentMethod::Cash,
        )
        .map_err(demo_error)?;
    println!(
        "fine paid in cash -> active fine: {}, cancellations on record: {}",
        status.has_active_fine, status.cancellation_count
    );

    Ok(())
}

fn demo_error(err: impl std::fmt::Display) -> AppError {
    AppError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        err.to_string(),
    ))
}

//! Tests contra PostgreSQL real
//!
//! `TEST_DATABASE_URL=postgres://... cargo test --test pg_concurrency -- --ignored`

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use rental_booking::config::database::DatabaseConfig;
use rental_booking::config::EnvironmentConfig;
use rental_booking::database::connect_and_migrate;
use rental_booking::models::booking::{BookingStatus, DateRange, NewBooking, RentalType};
use rental_booking::repositories::{BookingStore, PgBookingRepository};
use rental_booking::utils::errors::AppError;

async fn setup() -> Option<(sqlx::PgPool, Uuid, Uuid)> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let mut config = EnvironmentConfig::local("pg-test");
    config.database_url = url;

    let pool = connect_and_migrate(&DatabaseConfig::from(&config)).await.unwrap();
    let branch_id = Uuid::new_v4();
    let car_id = Uuid::new_v4();

    sqlx::query("INSERT INTO branches (id, name) VALUES ($1, $2)")
        .bind(branch_id)
        .bind("Riyadh Airport")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO cars (id, branch_id, display_name, quantity, daily_rate) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(car_id)
    .bind(branch_id)
    .bind("Hyundai Elantra")
    .bind(2_i32)
    .bind(Decimal::new(15000, 2))
    .execute(&pool)
    .await
    .unwrap();

    Some((pool, branch_id, car_id))
}

fn new_booking(branch_id: Uuid, car_id: Uuid) -> NewBooking {
    NewBooking {
        branch_id,
        car_id,
        customer_id: Uuid::new_v4(),
        daily_rate: Decimal::new(15000, 2),
        range: DateRange::new(
            NaiveDate::from_ymd_opt(2030, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2030, 3, 4).unwrap(),
        )
        .unwrap(),
        rental_type: RentalType::Daily,
        discount_amount: Decimal::ZERO,
        notes: None,
        pre_approval: None,
    }
}

#[tokio::test]
#[ignore]
async fn test_row_lock_prevents_overbooking() {
    let Some((pool, branch_id, car_id)) = setup().await else {
        return;
    };
    let store: Arc<dyn BookingStore> = Arc::new(PgBookingRepository::new(pool));

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let store = store.clone();
            let new = new_booking(branch_id, car_id);
            tokio::spawn(async move { store.create_booking_atomic(new, Utc::now()).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(transition) => {
                assert_eq!(transition.booking.status, BookingStatus::Pending);
                created += 1;
            }
            Err(AppError::CapacityExceeded) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(created, 2);

    let range = new_booking(branch_id, car_id).range;
    let availability = store
        .get_actual_available_quantity(car_id, range, None)
        .await
        .unwrap();
    assert_eq!(availability.available, 0);
}

#[tokio::test]
#[ignore]
async fn test_sweeps_are_single_shot() {
    let Some((pool, branch_id, car_id)) = setup().await else {
        return;
    };
    let store = PgBookingRepository::new(pool);
    let now = Utc::now();

    let created = store
        .create_booking_atomic(new_booking(branch_id, car_id), now)
        .await
        .unwrap();
    store
        .approve_booking(created.booking.id, Uuid::new_v4(), 1, now)
        .await
        .unwrap();

    let later = now + chrono::Duration::hours(2);
    let first = store.cleanup_expired_bookings(later).await.unwrap();
    let second = store.cleanup_expired_bookings(later).await.unwrap();

    assert!(first.iter().any(|e| e.booking_id == created.booking.id));
    assert!(second.iter().all(|e| e.booking_id != created.booking.id));
    assert_eq!(
        store.get_booking(created.booking.id).await.unwrap().status,
        BookingStatus::Expired
    );
}

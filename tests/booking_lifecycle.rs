mod common;

use chrono::Duration;
use rust_decimal::Decimal;
use uuid::Uuid;

use rental_booking::models::booking::{BookingStatus, DateRange};
use rental_booking::models::notification::BookingEventKind;
use rental_booking::models::payment::{ManualPayment, PaymentStatus};
use rental_booking::repositories::{BookingStore, Settlement};
use rental_booking::services::{run_sweep, PaymentFlowStatus};
use rental_booking::utils::errors::AppError;

use common::{date, dec, TestContext};

#[tokio::test]
async fn test_full_lifecycle_blocks_overlapping_booking() {
    let ctx = TestContext::new().await;
    let bookings = ctx.bookings();

    let booking = bookings
        .create_booking(ctx.new_booking(ctx.customer_id, date(2024, 6, 10), date(2024, 6, 13)))
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.total_days, 3);
    assert_eq!(booking.final_amount, dec("300.00"));

    let approved = bookings
        .approve_booking(booking.id, ctx.manager_id, Some(24))
        .await
        .unwrap();
    assert_eq!(approved.status, BookingStatus::Confirmed);
    assert_eq!(approved.expires_at, Some(common::start_time() + Duration::hours(24)));

    let outcome = ctx
        .payments()
        .create_payment(&ctx.customer(), booking.id, "tok_visa", None)
        .await
        .unwrap();
    assert_eq!(outcome.status, PaymentFlowStatus::Paid);
    assert_eq!(outcome.booking_status, BookingStatus::Active);

    let other_customer = Uuid::new_v4();
    let err = bookings
        .create_booking(ctx.new_booking(other_customer, date(2024, 6, 12), date(2024, 6, 14)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CapacityExceeded));

    // Rango adyacente: el día de devolución queda libre
    let adjacent = bookings
        .create_booking(ctx.new_booking(other_customer, date(2024, 6, 13), date(2024, 6, 15)))
        .await
        .unwrap();
    assert_eq!(adjacent.status, BookingStatus::Pending);

    let kinds: Vec<&'static str> = ctx
        .notifier
        .events()
        .await
        .iter()
        .map(|e| e.kind.as_str())
        .collect();
    assert!(kinds.contains(&"booking_approved"));
    assert!(kinds.contains(&"payment_settled"));
}

#[tokio::test]
async fn test_unpaid_booking_expires_and_cannot_be_paid() {
    let ctx = TestContext::new().await;
    let booking = ctx.confirmed_booking().await;

    ctx.clock.advance(Duration::hours(25));

    assert_eq!(ctx.bookings().cleanup_expired_bookings().await.unwrap(), 1);
    assert_eq!(ctx.booking(booking.id).await.status, BookingStatus::Expired);
    // Segunda pasada sin efectos
    assert_eq!(ctx.bookings().cleanup_expired_bookings().await.unwrap(), 0);

    let err = ctx
        .payments()
        .create_payment(&ctx.customer(), booking.id, "tok_visa", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert!(ctx.gateway.charges().is_empty());

    // La unidad vuelve a estar disponible
    let availability = ctx
        .bookings()
        .availability(ctx.car_id, booking.range())
        .await
        .unwrap();
    assert!(availability.is_available());
}

#[tokio::test]
async fn test_concurrent_creation_never_overbooks() {
    let ctx = TestContext::with_quantity(2).await;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let service = ctx.bookings();
            let new = ctx.new_booking(Uuid::new_v4(), date(2024, 7, 1), date(2024, 7, 5));
            tokio::spawn(async move { service.create_booking(new).await })
        })
        .collect();

    let mut created = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(AppError::CapacityExceeded) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(created, 2);
    assert_eq!(rejected, 8);
}

#[tokio::test]
async fn test_approve_twice_fails_with_invalid_state() {
    let ctx = TestContext::new().await;
    let booking = ctx
        .bookings()
        .create_booking(ctx.new_booking(ctx.customer_id, date(2024, 6, 10), date(2024, 6, 12)))
        .await
        .unwrap();

    ctx.bookings()
        .approve_booking(booking.id, ctx.manager_id, None)
        .await
        .unwrap();
    let err = ctx
        .bookings()
        .approve_booking(booking.id, ctx.manager_id, None)
        .await
        .unwrap_err();

    match err {
        AppError::InvalidState { current, .. } => assert_eq!(current, BookingStatus::Confirmed),
        other => panic!("expected InvalidState, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reject_requires_reason_and_pending_status() {
    let ctx = TestContext::new().await;
    let booking = ctx
        .bookings()
        .create_booking(ctx.new_booking(ctx.customer_id, date(2024, 6, 10), date(2024, 6, 12)))
        .await
        .unwrap();

    let err = ctx.bookings().reject_booking(booking.id, "   ").await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(ctx.booking(booking.id).await.status, BookingStatus::Pending);

    let rejected = ctx
        .bookings()
        .reject_booking(booking.id, "Car in maintenance")
        .await
        .unwrap();
    assert_eq!(rejected.status, BookingStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("Car in maintenance"));

    let err = ctx.bookings().reject_booking(booking.id, "again").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));
}

#[tokio::test]
async fn test_cancel_rules() {
    let ctx = TestContext::new().await;
    let booking = ctx.confirmed_booking().await;

    let err = ctx
        .bookings()
        .cancel_booking(booking.id, Uuid::new_v4(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let cancelled = ctx
        .bookings()
        .cancel_booking(booking.id, ctx.customer_id, Some("Plans changed"))
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(cancelled.notes.unwrap_or_default().contains("Plans changed"));

    let err = ctx
        .bookings()
        .cancel_booking(booking.id, ctx.customer_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));
}

#[tokio::test]
async fn test_settlement_is_idempotent_per_reference() {
    let ctx = TestContext::new().await;
    let booking = ctx.confirmed_booking().await;
    let now = common::start_time();

    ctx.store
        .update_booking_to_payment_pending(booking.id, now)
        .await
        .unwrap();

    let settlement = Settlement {
        booking_id: booking.id,
        payment_reference: "pay_001".to_string(),
        charged_amount: dec("300.00"),
        caller: Some(ctx.customer_id),
    };

    let first = ctx
        .store
        .complete_booking_payment_transaction(settlement.clone(), now)
        .await
        .unwrap();
    assert_eq!(first.booking.status, BookingStatus::Active);
    assert!(first.payment.is_some());

    let second = ctx
        .store
        .complete_booking_payment_transaction(settlement, now)
        .await
        .unwrap();
    assert_eq!(second.booking.status, BookingStatus::Active);
    assert!(second.payment.is_none());
    assert!(second.events.is_empty());

    let payments = ctx.store.list_payments(booking.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Completed);

    let err = ctx
        .store
        .complete_booking_payment_transaction(
            Settlement {
                booking_id: booking.id,
                payment_reference: "pay_002".to_string(),
                charged_amount: dec("300.00"),
                caller: None,
            },
            now,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_settlement_rejects_amount_mismatch_and_late_payment() {
    let ctx = TestContext::new().await;
    let booking = ctx.confirmed_booking().await;
    let now = common::start_time();

    ctx.store
        .update_booking_to_payment_pending(booking.id, now)
        .await
        .unwrap();

    let err = ctx
        .store
        .complete_booking_payment_transaction(
            Settlement {
                booking_id: booking.id,
                payment_reference: "pay_short".to_string(),
                charged_amount: dec("299.99"),
                caller: None,
            },
            now,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AmountMismatch { .. }));
    assert_eq!(ctx.booking(booking.id).await.status, BookingStatus::PaymentPending);

    // Cargo tardío antes de que pase el barrido
    let late = now + Duration::hours(25);
    let err = ctx
        .store
        .complete_booking_payment_transaction(
            Settlement {
                booking_id: booking.id,
                payment_reference: "pay_late".to_string(),
                charged_amount: dec("300.00"),
                caller: None,
            },
            late,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));
    assert!(ctx.store.list_payments(booking.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_booking_cannot_be_settled() {
    let ctx = TestContext::new().await;
    let booking = ctx.confirmed_booking().await;

    ctx.store
        .update_booking_to_payment_pending(booking.id, common::start_time())
        .await
        .unwrap();
    ctx.clock.advance(Duration::hours(30));
    assert_eq!(ctx.bookings().cleanup_expired_bookings().await.unwrap(), 1);

    let err = ctx
        .store
        .complete_booking_payment_transaction(
            Settlement {
                booking_id: booking.id,
                payment_reference: "pay_after_expiry".to_string(),
                charged_amount: dec("300.00"),
                caller: None,
            },
            common::start_time() + Duration::hours(30),
        )
        .await
        .unwrap_err();

    match err {
        AppError::InvalidState { current, .. } => assert_eq!(current, BookingStatus::Expired),
        other => panic!("expected InvalidState, got {:?}", other),
    }
}

#[tokio::test]
async fn test_manual_payment_cannot_reuse_gateway_reference() {
    let ctx = TestContext::new().await;
    let booking = ctx.confirmed_booking().await;
    let outcome = ctx
        .payments()
        .create_payment(&ctx.customer(), booking.id, "tok_visa", None)
        .await
        .unwrap();
    assert_eq!(outcome.status, PaymentFlowStatus::Paid);
    let reference = outcome.gateway_payment_id.unwrap();

    let manual = |reference: &str| ManualPayment {
        amount: dec("50.00"),
        method: "bank_transfer".to_string(),
        transaction_reference: Some(reference.to_string()),
        notes: None,
        recorded_by: ctx.admin_id,
    };

    let err = ctx
        .bookings()
        .add_manual_payment(booking.id, manual(&reference))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    ctx.bookings()
        .add_manual_payment(booking.id, manual("TRF-2024-0611"))
        .await
        .unwrap();
    let err = ctx
        .bookings()
        .add_manual_payment(booking.id, manual("TRF-2024-0611"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    assert_eq!(ctx.store.list_payments(booking.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_refunds_never_exceed_paid_amount() {
    let ctx = TestContext::new().await;
    let booking = ctx.confirmed_booking().await;

    let payment = ctx
        .bookings()
        .add_manual_payment(
            booking.id,
            ManualPayment {
                amount: dec("300.00"),
                method: "cash".to_string(),
                transaction_reference: None,
                notes: Some("Paid at the counter".to_string()),
                recorded_by: ctx.admin_id,
            },
        )
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    let partial = ctx
        .bookings()
        .refund_payment(payment.id, dec("100.00"), "Damaged seat")
        .await
        .unwrap();
    assert_eq!(partial.status, PaymentStatus::PartialRefund);
    assert_eq!(partial.refundable(), dec("200.00"));

    let err = ctx
        .bookings()
        .refund_payment(payment.id, dec("200.01"), "Too much")
        .await
        .unwrap_err();
    match err {
        AppError::RefundExceedsAvailable { requested, available } => {
            assert_eq!(requested, dec("200.01"));
            assert_eq!(available, dec("200.00"));
        }
        other => panic!("expected RefundExceedsAvailable, got {:?}", other),
    }

    let full = ctx
        .bookings()
        .refund_payment(payment.id, dec("200.00"), "Trip cancelled")
        .await
        .unwrap();
    assert_eq!(full.status, PaymentStatus::Refunded);
    assert_eq!(full.refund_amount, dec("300.00"));
    assert_eq!(full.refundable(), Decimal::ZERO);

    let refunds = ctx
        .notifier
        .events()
        .await
        .into_iter()
        .filter(|e| matches!(e.kind, BookingEventKind::RefundProcessed { .. }))
        .count();
    assert_eq!(refunds, 2);
}

#[tokio::test]
async fn test_completion_sweep_runs_once() {
    let ctx = TestContext::new().await;
    let booking = ctx.confirmed_booking().await;

    ctx.payments()
        .create_payment(&ctx.customer(), booking.id, "tok_visa", None)
        .await
        .unwrap();

    // Aún en curso
    assert_eq!(ctx.bookings().complete_active_bookings().await.unwrap(), 0);

    ctx.clock.set(common::start_time() + Duration::days(12));
    assert_eq!(ctx.bookings().complete_active_bookings().await.unwrap(), 1);
    assert_eq!(ctx.bookings().complete_active_bookings().await.unwrap(), 0);
    assert_eq!(ctx.booking(booking.id).await.status, BookingStatus::Completed);

    let completed = ctx
        .notifier
        .events()
        .await
        .into_iter()
        .filter(|e| matches!(e.kind, BookingEventKind::BookingCompleted))
        .count();
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn test_staff_pre_approved_booking_gets_deadline() {
    let ctx = TestContext::new().await;
    let booking = ctx.confirmed_booking().await;

    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.approved_by, Some(ctx.manager_id));
    assert_eq!(booking.expires_at, Some(common::start_time() + Duration::hours(24)));

    let notifications = ctx.notifier.notifications().await;
    assert!(notifications.iter().any(|n| n.user_id == ctx.customer_id));
    assert!(notifications.iter().any(|n| n.user_id == ctx.manager_id));
}

#[tokio::test]
async fn test_cancelled_booking_frees_capacity() {
    let ctx = TestContext::new().await;
    let booking = ctx.confirmed_booking().await;
    let range = DateRange::new(date(2024, 6, 11), date(2024, 6, 12)).unwrap();

    let before = ctx.bookings().availability(ctx.car_id, range).await.unwrap();
    assert_eq!(before.available, 0);

    ctx.bookings()
        .cancel_booking(booking.id, ctx.customer_id, None)
        .await
        .unwrap();

    let after = ctx.bookings().availability(ctx.car_id, range).await.unwrap();
    assert_eq!(after.available, 1);
    assert!(after.is_available());
}

#[tokio::test]
async fn test_car_from_another_branch_is_rejected() {
    let ctx = TestContext::new().await;
    let mut new = ctx.new_booking(ctx.customer_id, date(2024, 6, 10), date(2024, 6, 12));
    new.branch_id = Uuid::new_v4();

    let err = ctx.bookings().create_booking(new).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert!(ctx.store.bookings().await.is_empty());
}

#[tokio::test]
async fn test_sweep_expires_and_completes_in_one_pass() {
    let ctx = TestContext::with_quantity(2).await;
    let paid = ctx.confirmed_booking().await;
    ctx.payments()
        .create_payment(&ctx.customer(), paid.id, "tok_visa", None)
        .await
        .unwrap();
    let unpaid = ctx.confirmed_booking().await;

    ctx.clock.set(common::start_time() + Duration::days(12));
    let report = run_sweep(&ctx.bookings(), &ctx.payments()).await;

    assert_eq!(report.expired, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.reconciled, 0);
    assert_eq!(ctx.booking(unpaid.id).await.status, BookingStatus::Expired);
    assert_eq!(ctx.booking(paid.id).await.status, BookingStatus::Completed);
}

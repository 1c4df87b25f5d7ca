//! Barrido periódico de mantenimiento
//!
//! Expira reservas sin pagar, completa alquileres terminados y concilia
//! intentos de cobro ambiguos. Cada paso es idempotente.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::booking_service::BookingService;
use crate::services::payment_service::PaymentService;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub expired: usize,
    pub completed: usize,
    pub reconciled: usize,
}

/// Una pasada completa; un paso fallido no detiene los siguientes
pub async fn run_sweep(bookings: &BookingService, payments: &PaymentService) -> SweepReport {
    let mut report = SweepReport::default();

    match bookings.cleanup_expired_bookings().await {
        Ok(count) => report.expired = count,
        Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
    }

    match bookings.complete_active_bookings().await {
        Ok(count) => report.completed = count,
        Err(e) => tracing::error!(error = %e, "completion sweep failed"),
    }

    match payments.reconcile_pending_payments().await {
        Ok(count) => report.reconciled = count,
        Err(e) => tracing::error!(error = %e, "payment reconciliation failed"),
    }

    tracing::info!(
        expired = report.expired,
        completed = report.completed,
        reconciled = report.reconciled,
        "maintenance sweep finished"
    );
    report
}

pub fn spawn_sweeper(
    bookings: BookingService,
    payments: PaymentService,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            run_sweep(&bookings, &payments).await;
        }
    })
}

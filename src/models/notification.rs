//! Eventos de reserva y notificaciones
//!
//! Cada transición produce un `BookingEvent`; tras el commit se traduce a
//! una o varias notificaciones para el cliente y la sucursal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingEventKind {
    BookingCreated,
    BookingApproved { expires_at: DateTime<Utc> },
    BookingRejected { reason: String },
    BookingCancelled { notes: Option<String> },
    PaymentPending,
    PaymentSettled { amount: Decimal, payment_reference: String },
    PaymentFailed { reason: String },
    BookingExpired,
    BookingCompleted,
    RefundProcessed { payment_id: Uuid, amount: Decimal },
    ManualPaymentRecorded { payment_id: Uuid, amount: Decimal },
}

impl BookingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingEventKind::BookingCreated => "booking_created",
            BookingEventKind::BookingApproved { .. } => "booking_approved",
            BookingEventKind::BookingRejected { .. } => "booking_rejected",
            BookingEventKind::BookingCancelled { .. } => "booking_cancelled",
            BookingEventKind::PaymentPending => "payment_pending",
            BookingEventKind::PaymentSettled { .. } => "payment_settled",
            BookingEventKind::PaymentFailed { .. } => "payment_failed",
            BookingEventKind::BookingExpired => "booking_expired",
            BookingEventKind::BookingCompleted => "booking_completed",
            BookingEventKind::RefundProcessed { .. } => "refund_processed",
            BookingEventKind::ManualPaymentRecorded { .. } => "manual_payment_recorded",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            BookingEventKind::BookingCreated => "Booking received",
            BookingEventKind::BookingApproved { .. } => "Booking approved",
            BookingEventKind::BookingRejected { .. } => "Booking rejected",
            BookingEventKind::BookingCancelled { .. } => "Booking cancelled",
            BookingEventKind::PaymentPending => "Payment in progress",
            BookingEventKind::PaymentSettled { .. } => "Payment received",
            BookingEventKind::PaymentFailed { .. } => "Payment failed",
            BookingEventKind::BookingExpired => "Booking expired",
            BookingEventKind::BookingCompleted => "Rental completed",
            BookingEventKind::RefundProcessed { .. } => "Refund issued",
            BookingEventKind::ManualPaymentRecorded { .. } => "Payment recorded",
        }
    }
}

/// Evento de dominio emitido por una transición confirmada
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingEvent {
    pub booking_id: Uuid,
    pub customer_id: Uuid,
    pub branch_id: Uuid,
    pub kind: BookingEventKind,
}

impl BookingEvent {
    fn message(&self) -> String {
        match &self.kind {
            BookingEventKind::BookingCreated => {
                "Your booking request was received and is awaiting approval.".to_string()
            }
            BookingEventKind::BookingApproved { expires_at } => format!(
                "Your booking was approved. Please complete payment before {}.",
                expires_at.format("%Y-%m-%d %H:%M UTC")
            ),
            BookingEventKind::BookingRejected { reason } => {
                format!("Your booking was rejected: {}", reason)
            }
            BookingEventKind::BookingCancelled { .. } => "The booking was cancelled.".to_string(),
            BookingEventKind::PaymentPending => "Your payment is being processed.".to_string(),
            BookingEventKind::PaymentSettled { amount, .. } => {
                format!("Payment of {} received. Your booking is active.", amount)
            }
            BookingEventKind::PaymentFailed { reason } => format!(
                "Your payment could not be completed ({}). You can retry before the deadline.",
                reason
            ),
            BookingEventKind::BookingExpired => {
                "The payment deadline passed and the booking expired.".to_string()
            }
            BookingEventKind::BookingCompleted => "Your rental has been completed.".to_string(),
            BookingEventKind::RefundProcessed { amount, .. } => {
                format!("A refund of {} was issued.", amount)
            }
            BookingEventKind::ManualPaymentRecorded { amount, .. } => {
                format!("A payment of {} was recorded for your booking.", amount)
            }
        }
    }

    fn notifies_branch(&self) -> bool {
        matches!(
            self.kind,
            BookingEventKind::BookingCreated
                | BookingEventKind::BookingCancelled { .. }
                | BookingEventKind::PaymentSettled { .. }
                | BookingEventKind::ManualPaymentRecorded { .. }
        )
    }

    /// Notificaciones a entregar: siempre al cliente, a la sucursal solo si procede
    pub fn notifications(&self, branch_manager: Option<Uuid>, now: DateTime<Utc>) -> Vec<Notification> {
        let metadata = json!({
            "booking_id": self.booking_id,
            "branch_id": self.branch_id,
            "event": &self.kind,
        });

        let mut recipients = vec![self.customer_id];
        if self.notifies_branch() {
            if let Some(manager) = branch_manager {
                recipients.push(manager);
            }
        }

        recipients
            .into_iter()
            .map(|user_id| Notification {
                id: Uuid::new_v4(),
                user_id,
                notification_type: self.kind.as_str().to_string(),
                title: self.kind.title().to_string(),
                message: self.message(),
                metadata: metadata.clone(),
                is_read: false,
                created_at: now,
            })
            .collect()
    }
}

/// Notificación persistida - mapea a la tabla notifications
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: BookingEventKind) -> BookingEvent {
        BookingEvent {
            booking_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            kind,
        }
    }

    #[test]
    fn test_branch_is_notified_of_new_bookings() {
        let manager = Uuid::new_v4();
        let created = event(BookingEventKind::BookingCreated);
        let notifications = created.notifications(Some(manager), Utc::now());

        assert_eq!(notifications.len(), 2);
        assert_eq!(notifications[0].user_id, created.customer_id);
        assert_eq!(notifications[1].user_id, manager);
        assert_eq!(notifications[0].notification_type, "booking_created");
    }

    #[test]
    fn test_rejection_only_notifies_customer() {
        let rejected = event(BookingEventKind::BookingRejected {
            reason: "no documents".into(),
        });
        let notifications = rejected.notifications(Some(Uuid::new_v4()), Utc::now());

        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].message.contains("no documents"));
        assert_eq!(notifications[0].metadata["event"]["type"], "booking_rejected");
    }
}

//! Servicio de reservas
//!
//! Orquesta las unidades de trabajo del almacén, lee el reloj inyectado y
//! despacha los eventos una vez confirmada cada transición.

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::booking::{Booking, DateRange, NewBooking};
use crate::models::car::{Availability, Car};
use crate::models::payment::{ManualPayment, Payment};
use crate::repositories::BookingStore;
use crate::services::notifier::{dispatch, Notifier};
use crate::utils::clock::Clock;
use crate::utils::errors::AppResult;

#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn BookingStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    default_deadline_hours: i64,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        default_deadline_hours: i64,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            default_deadline_hours,
        }
    }

    pub fn default_deadline_hours(&self) -> i64 {
        self.default_deadline_hours
    }

    pub async fn create_booking(&self, new: NewBooking) -> AppResult<Booking> {
        let transition = self
            .store
            .create_booking_atomic(new, self.clock.now())
            .await?;
        dispatch(self.notifier.as_ref(), &transition.events).await;
        Ok(transition.booking)
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> AppResult<Booking> {
        self.store.get_booking(booking_id).await
    }

    pub async fn approve_booking(
        &self,
        booking_id: Uuid,
        approver: Uuid,
        deadline_hours: Option<i64>,
    ) -> AppResult<Booking> {
        let hours = deadline_hours.unwrap_or(self.default_deadline_hours);
        let transition = self
            .store
            .approve_booking(booking_id, approver, hours, self.clock.now())
            .await?;

        tracing::info!(
            booking_id = %booking_id,
            approved_by = %approver,
            expires_at = ?transition.booking.expires_at,
            "booking approved"
        );
        dispatch(self.notifier.as_ref(), &transition.events).await;
        Ok(transition.booking)
    }

    pub async fn reject_booking(&self, booking_id: Uuid, reason: &str) -> AppResult<Booking> {
        let transition = self
            .store
            .reject_booking(booking_id, reason, self.clock.now())
            .await?;

        tracing::info!(booking_id = %booking_id, "booking rejected");
        dispatch(self.notifier.as_ref(), &transition.events).await;
        Ok(transition.booking)
    }

    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        customer_id: Uuid,
        notes: Option<&str>,
    ) -> AppResult<Booking> {
        let transition = self
            .store
            .customer_cancel_booking(booking_id, customer_id, notes, self.clock.now())
            .await?;

        tracing::info!(booking_id = %booking_id, "booking cancelled by customer");
        dispatch(self.notifier.as_ref(), &transition.events).await;
        Ok(transition.booking)
    }

    pub async fn get_car(&self, car_id: Uuid) -> AppResult<Car> {
        self.store.get_car(car_id).await
    }

    pub async fn availability(&self, car_id: Uuid, range: DateRange) -> AppResult<Availability> {
        self.store
            .get_actual_available_quantity(car_id, range, None)
            .await
    }

    pub async fn list_payments(&self, booking_id: Uuid) -> AppResult<Vec<Payment>> {
        self.store.list_payments(booking_id).await
    }

    pub async fn add_manual_payment(
        &self,
        booking_id: Uuid,
        input: ManualPayment,
    ) -> AppResult<Payment> {
        let entry = self
            .store
            .add_manual_payment(booking_id, input, self.clock.now())
            .await?;

        tracing::info!(
            booking_id = %booking_id,
            payment_id = %entry.payment.id,
            amount = %entry.payment.amount,
            method = %entry.payment.method,
            "manual payment recorded"
        );
        dispatch(self.notifier.as_ref(), std::slice::from_ref(&entry.event)).await;
        Ok(entry.payment)
    }

    pub async fn refund_payment(
        &self,
        payment_id: Uuid,
        amount: Decimal,
        reason: &str,
    ) -> AppResult<Payment> {
        let entry = self
            .store
            .process_refund(payment_id, amount, reason, self.clock.now())
            .await?;

        tracing::info!(
            booking_id = %entry.payment.booking_id,
            payment_id = %payment_id,
            amount = %amount,
            status = ?entry.payment.status,
            "refund processed"
        );
        dispatch(self.notifier.as_ref(), std::slice::from_ref(&entry.event)).await;
        Ok(entry.payment)
    }

    /// Expira las reservas con el plazo de pago vencido
    pub async fn cleanup_expired_bookings(&self) -> AppResult<usize> {
        let events = self.store.cleanup_expired_bookings(self.clock.now()).await?;
        if !events.is_empty() {
            tracing::info!(count = events.len(), "expired unpaid bookings");
        }
        dispatch(self.notifier.as_ref(), &events).await;
        Ok(events.len())
    }

    /// Completa los alquileres activos cuyo periodo ya terminó
    pub async fn complete_active_bookings(&self) -> AppResult<usize> {
        let events = self
            .store
            .complete_active_bookings(self.clock.today(), self.clock.now())
            .await?;
        if !events.is_empty() {
            tracing::info!(count = events.len(), "completed finished rentals");
        }
        dispatch(self.notifier.as_ref(), &events).await;
        Ok(events.len())
    }
}

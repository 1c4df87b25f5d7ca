//! Repositorios - acceso a datos
//!
//! `BookingStore` agrupa las unidades de trabajo transaccionales del núcleo
//! de reservas. Cada método es atómico: o se aplican todos sus efectos o
//! ninguno. Las reglas de transición viven en los modelos y ambas
//! implementaciones las comparten.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::booking::{Booking, DateRange, NewBooking};
use crate::models::car::{Availability, Car};
use crate::models::notification::BookingEvent;
use crate::models::payment::{AttemptStart, AttemptUpdate, ManualPayment, Payment, PaymentAttempt};
use crate::utils::errors::{AppError, AppResult};

pub mod booking_repository;
pub mod memory_repository;
pub mod notification_repository;

pub use booking_repository::PgBookingRepository;
pub use memory_repository::InMemoryBookingStore;
pub use notification_repository::PgNotifier;

/// Estado resultante de una transición confirmada y sus eventos
#[derive(Debug, Clone)]
pub struct Transition {
    pub booking: Booking,
    pub events: Vec<BookingEvent>,
}

/// Resultado de la validación previa al pago
#[derive(Debug, Clone)]
pub struct PaymentValidation {
    pub is_valid: bool,
    pub error_message: Option<String>,
    pub booking: Option<Booking>,
}

impl PaymentValidation {
    pub fn valid(booking: Booking) -> Self {
        Self {
            is_valid: true,
            error_message: None,
            booking: Some(booking),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error_message: Some(message.into()),
            booking: None,
        }
    }
}

/// Liquidación de un cargo confirmado por la pasarela
#[derive(Debug, Clone)]
pub struct Settlement {
    pub booking_id: Uuid,
    pub payment_reference: String,
    pub charged_amount: Decimal,
    /// Si se indica, debe ser el cliente de la reserva
    pub caller: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct SettlementResult {
    pub booking: Booking,
    /// `None` cuando la reserva ya estaba liquidada con esta referencia
    pub payment: Option<Payment>,
    pub events: Vec<BookingEvent>,
}

/// Cargo rechazado de forma definitiva
#[derive(Debug, Clone)]
pub struct PaymentFailure {
    pub booking_id: Uuid,
    pub payment_reference: Option<String>,
    pub reason: String,
}

/// Resultado de un ajuste sobre el libro de pagos
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub payment: Payment,
    pub event: BookingEvent,
}

/// La referencia ya pertenece a otro pago completado
pub(crate) fn duplicate_reference(reference: &str) -> AppError {
    AppError::Conflict(format!(
        "transaction reference '{}' is already recorded",
        reference
    ))
}

/// Validación común de pago sobre una reserva ya leída
pub(crate) fn check_payable(
    booking: &Booking,
    customer_id: Uuid,
    availability: &Availability,
    now: DateTime<Utc>,
) -> Option<String> {
    use crate::models::booking::BookingStatus;

    if booking.customer_id != customer_id {
        return Some("Booking does not belong to this customer".to_string());
    }
    if !matches!(
        booking.status,
        BookingStatus::Confirmed | BookingStatus::PaymentPending
    ) {
        return Some(format!(
            "Booking is {} and cannot be paid",
            booking.status
        ));
    }
    if booking.deadline_elapsed(now) {
        return Some("Payment deadline has elapsed".to_string());
    }
    if booking.final_amount <= Decimal::ZERO {
        return Some("Booking has no outstanding amount".to_string());
    }
    if !availability.is_available() {
        return Some("Car is no longer available for the booked dates".to_string());
    }
    None
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn get_car(&self, car_id: Uuid) -> AppResult<Car>;

    /// Gerente de la sucursal (destinatario de notificaciones)
    async fn branch_manager(&self, branch_id: Uuid) -> AppResult<Option<Uuid>>;

    async fn check_car_availability(
        &self,
        car_id: Uuid,
        range: DateRange,
        exclude_booking: Option<Uuid>,
    ) -> AppResult<bool> {
        Ok(self
            .get_actual_available_quantity(car_id, range, exclude_booking)
            .await?
            .is_available())
    }

    async fn get_actual_available_quantity(
        &self,
        car_id: Uuid,
        range: DateRange,
        exclude_booking: Option<Uuid>,
    ) -> AppResult<Availability>;

    /// Bloquea el coche, comprueba capacidad e inserta la reserva
    async fn create_booking_atomic(&self, new: NewBooking, now: DateTime<Utc>) -> AppResult<Transition>;

    async fn get_booking(&self, booking_id: Uuid) -> AppResult<Booking>;

    async fn approve_booking(
        &self,
        booking_id: Uuid,
        approver: Uuid,
        deadline_hours: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Transition>;

    async fn reject_booking(
        &self,
        booking_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Transition>;

    async fn customer_cancel_booking(
        &self,
        booking_id: Uuid,
        customer_id: Uuid,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<Transition>;

    async fn validate_and_prepare_booking_for_payment(
        &self,
        booking_id: Uuid,
        customer_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<PaymentValidation>;

    async fn update_booking_to_payment_pending(
        &self,
        booking_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Transition>;

    async fn complete_booking_payment_transaction(
        &self,
        settlement: Settlement,
        now: DateTime<Utc>,
    ) -> AppResult<SettlementResult>;

    async fn handle_payment_failure_transaction(
        &self,
        failure: PaymentFailure,
        now: DateTime<Utc>,
    ) -> AppResult<Transition>;

    /// confirmed|payment_pending con plazo vencido → expired
    async fn cleanup_expired_bookings(&self, now: DateTime<Utc>) -> AppResult<Vec<BookingEvent>>;

    /// active con `end_date <= today` → completed
    async fn complete_active_bookings(
        &self,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<BookingEvent>>;

    async fn add_manual_payment(
        &self,
        booking_id: Uuid,
        input: ManualPayment,
        now: DateTime<Utc>,
    ) -> AppResult<LedgerEntry>;

    async fn process_refund(
        &self,
        payment_id: Uuid,
        amount: Decimal,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<LedgerEntry>;

    async fn list_payments(&self, booking_id: Uuid) -> AppResult<Vec<Payment>>;

    async fn get_payment_attempt(&self, key: Uuid) -> AppResult<Option<PaymentAttempt>>;

    async fn begin_payment_attempt(
        &self,
        key: Uuid,
        booking_id: Uuid,
        amount_minor: i64,
        currency: &str,
        now: DateTime<Utc>,
    ) -> AppResult<AttemptStart>;

    async fn record_attempt_outcome(
        &self,
        key: Uuid,
        update: AttemptUpdate,
        now: DateTime<Utc>,
    ) -> AppResult<PaymentAttempt>;

    /// Intentos sin resultado definitivo no actualizados desde `older_than`
    async fn list_unresolved_attempts(&self, older_than: DateTime<Utc>) -> AppResult<Vec<PaymentAttempt>>;
}

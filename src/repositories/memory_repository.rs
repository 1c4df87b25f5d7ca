//! Almacén en memoria
//!
//! Todas las operaciones se serializan tras un único `Mutex`, lo que da la
//! misma atomicidad que una transacción. Se usa en tests y demos locales.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::booking::{Booking, DateRange, NewBooking, SettleOutcome};
use crate::models::car::{Availability, Car};
use crate::models::notification::{BookingEvent, BookingEventKind};
use crate::models::payment::{
    AttemptStart, AttemptUpdate, ManualPayment, Payment, PaymentAttempt,
};
use crate::repositories::{
    check_payable, duplicate_reference, BookingStore, LedgerEntry, PaymentFailure,
    PaymentValidation, Settlement, SettlementResult, Transition,
};
use crate::utils::errors::{forbidden_error, not_found_error, AppError, AppResult};

#[derive(Debug, Default)]
struct MemoryState {
    branch_managers: HashMap<Uuid, Uuid>,
    cars: HashMap<Uuid, Car>,
    bookings: HashMap<Uuid, Booking>,
    payments: Vec<Payment>,
    attempts: HashMap<Uuid, PaymentAttempt>,
}

impl MemoryState {
    fn car(&self, car_id: Uuid) -> AppResult<&Car> {
        self.cars
            .get(&car_id)
            .ok_or_else(|| not_found_error("Car", &car_id))
    }

    fn booking_mut(&mut self, booking_id: Uuid) -> AppResult<&mut Booking> {
        self.bookings
            .get_mut(&booking_id)
            .ok_or_else(|| not_found_error("Booking", &booking_id))
    }

    fn availability(&self, car_id: Uuid, range: &DateRange, exclude: Option<Uuid>) -> AppResult<Availability> {
        let car = self.car(car_id)?;
        Ok(Availability::compute(car, range, self.bookings.values(), exclude))
    }

    /// Aplica la transición sobre una copia y solo la guarda si tiene éxito
    fn transition<F>(&mut self, booking_id: Uuid, apply: F) -> AppResult<Transition>
    where
        F: FnOnce(&mut Booking) -> AppResult<Option<BookingEvent>>,
    {
        let stored = self.booking_mut(booking_id)?;
        let mut booking = stored.clone();
        let event = apply(&mut booking)?;
        *stored = booking.clone();

        Ok(Transition {
            booking,
            events: event.into_iter().collect(),
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBookingStore {
    state: Mutex<MemoryState>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_branch(&self, branch_id: Uuid, manager_id: Option<Uuid>) {
        let mut state = self.state.lock().await;
        if let Some(manager) = manager_id {
            state.branch_managers.insert(branch_id, manager);
        }
    }

    pub async fn add_car(&self, car: Car) {
        self.state.lock().await.cars.insert(car.id, car);
    }

    /// Inserta una reserva tal cual, sin guardas (siembra de datos)
    pub async fn insert_booking(&self, booking: Booking) {
        self.state.lock().await.bookings.insert(booking.id, booking);
    }

    pub async fn bookings(&self) -> Vec<Booking> {
        self.state.lock().await.bookings.values().cloned().collect()
    }

    pub async fn attempts(&self) -> Vec<PaymentAttempt> {
        self.state.lock().await.attempts.values().cloned().collect()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn get_car(&self, car_id: Uuid) -> AppResult<Car> {
        self.state.lock().await.car(car_id).cloned()
    }

    async fn branch_manager(&self, branch_id: Uuid) -> AppResult<Option<Uuid>> {
        Ok(self.state.lock().await.branch_managers.get(&branch_id).copied())
    }

    async fn get_actual_available_quantity(
        &self,
        car_id: Uuid,
        range: DateRange,
        exclude_booking: Option<Uuid>,
    ) -> AppResult<Availability> {
        self.state
            .lock()
            .await
            .availability(car_id, &range, exclude_booking)
    }

    async fn create_booking_atomic(&self, new: NewBooking, now: DateTime<Utc>) -> AppResult<Transition> {
        let mut state = self.state.lock().await;

        let car = state.car(new.car_id)?;
        if car.branch_id != new.branch_id {
            return Err(AppError::BadRequest(
                "car does not belong to the given branch".to_string(),
            ));
        }
        if !state.availability(new.car_id, &new.range, None)?.is_available() {
            return Err(AppError::CapacityExceeded);
        }

        let (booking, events) = Booking::create(new, now)?;
        state.bookings.insert(booking.id, booking.clone());

        Ok(Transition { booking, events })
    }

    async fn get_booking(&self, booking_id: Uuid) -> AppResult<Booking> {
        self.state
            .lock()
            .await
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| not_found_error("Booking", &booking_id))
    }

    async fn approve_booking(
        &self,
        booking_id: Uuid,
        approver: Uuid,
        deadline_hours: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Transition> {
        self.state.lock().await.transition(booking_id, |b| {
            b.approve(approver, deadline_hours, now).map(Some)
        })
    }

    async fn reject_booking(
        &self,
        booking_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Transition> {
        self.state
            .lock()
            .await
            .transition(booking_id, |b| b.reject(reason, now).map(Some))
    }

    async fn customer_cancel_booking(
        &self,
        booking_id: Uuid,
        customer_id: Uuid,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<Transition> {
        self.state.lock().await.transition(booking_id, |b| {
            b.cancel_by_customer(customer_id, notes, now).map(Some)
        })
    }

    async fn validate_and_prepare_booking_for_payment(
        &self,
        booking_id: Uuid,
        customer_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<PaymentValidation> {
        let state = self.state.lock().await;

        let booking = match state.bookings.get(&booking_id) {
            Some(b) => b.clone(),
            None => return Ok(PaymentValidation::invalid("Booking not found")),
        };
        let availability = state.availability(booking.car_id, &booking.range(), Some(booking.id))?;

        Ok(match check_payable(&booking, customer_id, &availability, now) {
            Some(message) => PaymentValidation::invalid(message),
            None => PaymentValidation::valid(booking),
        })
    }

    async fn update_booking_to_payment_pending(
        &self,
        booking_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Transition> {
        self.state
            .lock()
            .await
            .transition(booking_id, |b| b.begin_payment(now))
    }

    async fn complete_booking_payment_transaction(
        &self,
        settlement: Settlement,
        now: DateTime<Utc>,
    ) -> AppResult<SettlementResult> {
        let mut state = self.state.lock().await;
        let stored = state.booking_mut(settlement.booking_id)?;

        if let Some(caller) = settlement.caller {
            if caller != stored.customer_id {
                return Err(forbidden_error(
                    "settle payment",
                    "booking belongs to another customer",
                ));
            }
        }

        let mut booking = stored.clone();
        let event = match booking.settle(&settlement.payment_reference, settlement.charged_amount, now)? {
            SettleOutcome::AlreadySettled => {
                return Ok(SettlementResult {
                    booking,
                    payment: None,
                    events: Vec::new(),
                })
            }
            SettleOutcome::Settled(event) => event,
        };
        *stored = booking.clone();

        let payment = Payment::settled(
            booking.id,
            booking.final_amount,
            &settlement.payment_reference,
            now,
        );
        state.payments.push(payment.clone());

        Ok(SettlementResult {
            booking,
            payment: Some(payment),
            events: vec![event],
        })
    }

    async fn handle_payment_failure_transaction(
        &self,
        failure: PaymentFailure,
        now: DateTime<Utc>,
    ) -> AppResult<Transition> {
        let mut state = self.state.lock().await;
        let transition = state.transition(failure.booking_id, |b| {
            b.fail_payment(&failure.reason, now)
        })?;

        if !transition.events.is_empty() {
            let booking = &transition.booking;
            state.payments.push(Payment::failed(
                booking.id,
                booking.final_amount,
                failure.payment_reference.as_deref(),
                &failure.reason,
                now,
            ));
        }

        Ok(transition)
    }

    async fn cleanup_expired_bookings(&self, now: DateTime<Utc>) -> AppResult<Vec<BookingEvent>> {
        let mut state = self.state.lock().await;
        Ok(state
            .bookings
            .values_mut()
            .filter_map(|b| b.expire(now))
            .collect())
    }

    async fn complete_active_bookings(
        &self,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<BookingEvent>> {
        let mut state = self.state.lock().await;
        Ok(state
            .bookings
            .values_mut()
            .filter_map(|b| b.complete(today, now))
            .collect())
    }

    async fn add_manual_payment(
        &self,
        booking_id: Uuid,
        input: ManualPayment,
        now: DateTime<Utc>,
    ) -> AppResult<LedgerEntry> {
        let mut state = self.state.lock().await;
        let booking = state.booking_mut(booking_id)?.clone();

        let payment = Payment::manual(booking.id, input, now)?;
        if let Some(reference) = payment.transaction_reference.as_deref() {
            if state.payments.iter().any(|p| p.holds_reference(reference)) {
                return Err(duplicate_reference(reference));
            }
        }
        state.payments.push(payment.clone());

        let event = booking.event(BookingEventKind::ManualPaymentRecorded {
            payment_id: payment.id,
            amount: payment.amount,
        });
        Ok(LedgerEntry { payment, event })
    }

    async fn process_refund(
        &self,
        payment_id: Uuid,
        amount: Decimal,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<LedgerEntry> {
        let mut state = self.state.lock().await;

        let stored = state
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| not_found_error("Payment", &payment_id))?;
        let mut payment = stored.clone();
        payment.apply_refund(amount, reason, now)?;
        *stored = payment.clone();

        let booking = state
            .bookings
            .get(&payment.booking_id)
            .ok_or_else(|| not_found_error("Booking", &payment.booking_id))?;
        let event = booking.event(BookingEventKind::RefundProcessed {
            payment_id: payment.id,
            amount,
        });
        Ok(LedgerEntry { payment, event })
    }

    async fn list_payments(&self, booking_id: Uuid) -> AppResult<Vec<Payment>> {
        Ok(self
            .state
            .lock()
            .await
            .payments
            .iter()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn get_payment_attempt(&self, key: Uuid) -> AppResult<Option<PaymentAttempt>> {
        Ok(self.state.lock().await.attempts.get(&key).cloned())
    }

    async fn begin_payment_attempt(
        &self,
        key: Uuid,
        booking_id: Uuid,
        amount_minor: i64,
        currency: &str,
        now: DateTime<Utc>,
    ) -> AppResult<AttemptStart> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.attempts.get(&key) {
            return AttemptStart::from_existing(existing.clone(), booking_id);
        }

        let attempt = PaymentAttempt::new(key, booking_id, amount_minor, currency, now);
        state.attempts.insert(key, attempt.clone());
        Ok(AttemptStart::Started(attempt))
    }

    async fn record_attempt_outcome(
        &self,
        key: Uuid,
        update: AttemptUpdate,
        now: DateTime<Utc>,
    ) -> AppResult<PaymentAttempt> {
        let mut state = self.state.lock().await;
        let attempt = state
            .attempts
            .get_mut(&key)
            .ok_or_else(|| not_found_error("Payment attempt", &key))?;
        attempt.apply(update, now);
        Ok(attempt.clone())
    }

    async fn list_unresolved_attempts(&self, older_than: DateTime<Utc>) -> AppResult<Vec<PaymentAttempt>> {
        let state = self.state.lock().await;
        let mut attempts: Vec<PaymentAttempt> = state
            .attempts
            .values()
            .filter(|a| a.is_unresolved() && a.updated_at < older_than)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.updated_at);
        Ok(attempts)
    }
}

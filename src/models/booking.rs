//! Modelo de Booking
//!
//! Este módulo contiene la entidad Booking y su máquina de estados.
//! Mapea exactamente a la tabla `bookings`; cada transición valida el estado
//! actual antes de mutar y devuelve el evento que produce.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

use crate::models::notification::{BookingEvent, BookingEventKind};
use crate::utils::errors::{forbidden_error, invalid_state, AppError, AppResult};

/// Plazo máximo de pago que puede conceder una sucursal (30 días)
pub const MAX_PAYMENT_DEADLINE_HOURS: i64 = 720;

/// Estado de la reserva - mapea al ENUM booking_status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "booking_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    PaymentPending,
    Active,
    Completed,
    Cancelled,
    Expired,
    Rejected,
}

impl BookingStatus {
    /// Estados que reservan una unidad del inventario del coche
    pub const CAPACITY_CONSUMING: [BookingStatus; 4] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::PaymentPending,
        BookingStatus::Active,
    ];

    pub fn is_capacity_consuming(self) -> bool {
        Self::CAPACITY_CONSUMING.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::PaymentPending => "payment_pending",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
            BookingStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tipo de alquiler - mapea al ENUM rental_type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Type)]
#[sqlx(type_name = "rental_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RentalType {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Ownership,
}

/// Intervalo semiabierto `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> AppResult<Self> {
        if end <= start {
            return Err(AppError::InvalidDateRange);
        }
        Ok(Self { start, end })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// `[a,b)` y `[c,d)` se solapan si y solo si `a < d && c < b`
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Importes calculados de una reserva
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPricing {
    pub total_days: i32,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

impl BookingPricing {
    /// `total = tarifa × días`, `final = total − descuento`, nunca negativo
    pub fn compute(daily_rate: Decimal, range: &DateRange, discount: Decimal) -> AppResult<Self> {
        if daily_rate <= Decimal::ZERO {
            return Err(AppError::BadRequest("daily rate must be positive".to_string()));
        }
        if discount < Decimal::ZERO {
            return Err(AppError::BadRequest("discount cannot be negative".to_string()));
        }

        let total_days = i32::try_from(range.days())
            .map_err(|_| AppError::BadRequest("rental period is too long".to_string()))?;
        let total_amount = daily_rate * Decimal::from(total_days);

        if discount > total_amount {
            return Err(AppError::BadRequest(
                "discount cannot exceed the total amount".to_string(),
            ));
        }

        Ok(Self {
            total_days,
            total_amount,
            discount_amount: discount,
            final_amount: total_amount - discount,
        })
    }
}

/// Aprobación directa al crear (solo personal de la sucursal)
#[derive(Debug, Clone, Copy)]
pub struct PreApproval {
    pub approved_by: Uuid,
    pub deadline_hours: i64,
}

/// Datos para crear una reserva de forma atómica
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub branch_id: Uuid,
    pub car_id: Uuid,
    pub customer_id: Uuid,
    pub daily_rate: Decimal,
    pub range: DateRange,
    pub rental_type: RentalType,
    pub discount_amount: Decimal,
    pub notes: Option<String>,
    pub pre_approval: Option<PreApproval>,
}

/// Booking principal - mapea exactamente a la tabla bookings
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub car_id: Uuid,
    pub customer_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rental_type: RentalType,
    pub daily_rate: Decimal,
    pub total_days: i32,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub status: BookingStatus,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub rejection_reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Resultado de intentar liquidar el pago de una reserva
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    Settled(BookingEvent),
    AlreadySettled,
}

impl Booking {
    /// Construye la fila inicial en `pending` (y aplica la aprobación directa si existe)
    pub fn create(new: NewBooking, now: DateTime<Utc>) -> AppResult<(Self, Vec<BookingEvent>)> {
        let pricing = BookingPricing::compute(new.daily_rate, &new.range, new.discount_amount)?;

        let mut booking = Self {
            id: Uuid::new_v4(),
            branch_id: new.branch_id,
            car_id: new.car_id,
            customer_id: new.customer_id,
            start_date: new.range.start,
            end_date: new.range.end,
            rental_type: new.rental_type,
            daily_rate: new.daily_rate,
            total_days: pricing.total_days,
            total_amount: pricing.total_amount,
            discount_amount: pricing.discount_amount,
            final_amount: pricing.final_amount,
            status: BookingStatus::Pending,
            approved_by: None,
            approved_at: None,
            expires_at: None,
            payment_reference: None,
            rejection_reason: None,
            notes: new.notes.filter(|n| !n.trim().is_empty()),
            created_at: now,
            updated_at: now,
        };

        let mut events = vec![booking.event(BookingEventKind::BookingCreated)];
        if let Some(pre) = new.pre_approval {
            events.push(booking.approve(pre.approved_by, pre.deadline_hours, now)?);
        }

        Ok((booking, events))
    }

    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    pub fn event(&self, kind: BookingEventKind) -> BookingEvent {
        BookingEvent {
            booking_id: self.id,
            customer_id: self.customer_id,
            branch_id: self.branch_id,
            kind,
        }
    }

    pub fn deadline_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |deadline| deadline < now)
    }

    fn touch(&mut self, status: BookingStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    /// pending → confirmed, con plazo de pago `now + deadline_hours`
    pub fn approve(
        &mut self,
        approver: Uuid,
        deadline_hours: i64,
        now: DateTime<Utc>,
    ) -> AppResult<BookingEvent> {
        if !(1..=MAX_PAYMENT_DEADLINE_HOURS).contains(&deadline_hours) {
            return Err(AppError::BadRequest(format!(
                "payment deadline must be between 1 and {} hours",
                MAX_PAYMENT_DEADLINE_HOURS
            )));
        }
        if self.status != BookingStatus::Pending {
            return Err(invalid_state("approve", self.status, &[BookingStatus::Pending]));
        }

        let expires_at = now + Duration::hours(deadline_hours);
        self.approved_by = Some(approver);
        self.approved_at = Some(now);
        self.expires_at = Some(expires_at);
        self.touch(BookingStatus::Confirmed, now);

        Ok(self.event(BookingEventKind::BookingApproved { expires_at }))
    }

    /// pending → rejected; el motivo es obligatorio
    pub fn reject(&mut self, reason: &str, now: DateTime<Utc>) -> AppResult<BookingEvent> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::BadRequest("rejection reason is required".to_string()));
        }
        if self.status != BookingStatus::Pending {
            return Err(invalid_state("reject", self.status, &[BookingStatus::Pending]));
        }

        self.rejection_reason = Some(reason.to_string());
        self.touch(BookingStatus::Rejected, now);

        Ok(self.event(BookingEventKind::BookingRejected {
            reason: reason.to_string(),
        }))
    }

    /// pending|confirmed → cancelled, solo por el propio cliente
    pub fn cancel_by_customer(
        &mut self,
        customer_id: Uuid,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<BookingEvent> {
        if customer_id != self.customer_id {
            return Err(forbidden_error(
                "cancel booking",
                "booking belongs to another customer",
            ));
        }
        if !matches!(self.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(invalid_state(
                "cancel",
                self.status,
                &[BookingStatus::Pending, BookingStatus::Confirmed],
            ));
        }

        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        if let Some(n) = notes {
            self.notes = Some(match self.notes.take() {
                Some(existing) => format!("{existing}\nCancellation: {n}"),
                None => format!("Cancellation: {n}"),
            });
        }
        self.touch(BookingStatus::Cancelled, now);

        Ok(self.event(BookingEventKind::BookingCancelled {
            notes: notes.map(str::to_string),
        }))
    }

    /// confirmed → payment_pending; reentrante si ya está en payment_pending
    pub fn begin_payment(&mut self, now: DateTime<Utc>) -> AppResult<Option<BookingEvent>> {
        match self.status {
            BookingStatus::PaymentPending => Ok(None),
            BookingStatus::Confirmed => {
                if self.deadline_elapsed(now) {
                    return Err(AppError::BadRequest(
                        "payment deadline has elapsed".to_string(),
                    ));
                }
                self.touch(BookingStatus::PaymentPending, now);
                Ok(Some(self.event(BookingEventKind::PaymentPending)))
            }
            current => Err(invalid_state(
                "start payment",
                current,
                &[BookingStatus::Confirmed, BookingStatus::PaymentPending],
            )),
        }
    }

    /// payment_pending → active; idempotente para la misma referencia
    pub fn settle(
        &mut self,
        payment_reference: &str,
        charged_amount: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<SettleOutcome> {
        if self.status == BookingStatus::Active {
            return match self.payment_reference.as_deref() {
                Some(existing) if existing == payment_reference => Ok(SettleOutcome::AlreadySettled),
                _ => Err(AppError::Conflict(
                    "booking was already settled with a different payment".to_string(),
                )),
            };
        }
        if self.status != BookingStatus::PaymentPending {
            return Err(invalid_state(
                "settle payment",
                self.status,
                &[BookingStatus::PaymentPending],
            ));
        }
        if self.deadline_elapsed(now) {
            return Err(AppError::InvalidState {
                operation: "settle payment",
                current: self.status,
                expected: "an unexpired payment deadline".to_string(),
            });
        }
        if charged_amount != self.final_amount {
            return Err(AppError::AmountMismatch {
                charged: charged_amount,
                expected: self.final_amount,
            });
        }

        self.payment_reference = Some(payment_reference.to_string());
        self.touch(BookingStatus::Active, now);

        Ok(SettleOutcome::Settled(self.event(BookingEventKind::PaymentSettled {
            amount: self.final_amount,
            payment_reference: payment_reference.to_string(),
        })))
    }

    /// payment_pending → confirmed; el plazo original sigue corriendo
    pub fn fail_payment(
        &mut self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<BookingEvent>> {
        match self.status {
            BookingStatus::Confirmed => Ok(None),
            BookingStatus::PaymentPending => {
                self.touch(BookingStatus::Confirmed, now);
                Ok(Some(self.event(BookingEventKind::PaymentFailed {
                    reason: reason.to_string(),
                })))
            }
            current => Err(invalid_state(
                "record payment failure",
                current,
                &[BookingStatus::PaymentPending],
            )),
        }
    }

    /// confirmed|payment_pending con plazo vencido → expired
    pub fn expire(&mut self, now: DateTime<Utc>) -> Option<BookingEvent> {
        let expirable = matches!(
            self.status,
            BookingStatus::Confirmed | BookingStatus::PaymentPending
        );
        if !expirable || !self.deadline_elapsed(now) {
            return None;
        }
        self.touch(BookingStatus::Expired, now);
        Some(self.event(BookingEventKind::BookingExpired))
    }

    /// active con el periodo terminado → completed
    pub fn complete(&mut self, today: NaiveDate, now: DateTime<Utc>) -> Option<BookingEvent> {
        if self.status != BookingStatus::Active || self.end_date > today {
            return None;
        }
        self.touch(BookingStatus::Completed, now);
        Some(self.event(BookingEventKind::BookingCompleted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 10, 0, 0).unwrap()
    }

    fn new_booking(rate: i64, discount: i64) -> NewBooking {
        NewBooking {
            branch_id: Uuid::new_v4(),
            car_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            daily_rate: Decimal::from(rate),
            range: DateRange::new(date(2024, 6, 1), date(2024, 6, 5)).unwrap(),
            rental_type: RentalType::Daily,
            discount_amount: Decimal::from(discount),
            notes: None,
            pre_approval: None,
        }
    }

    fn pending() -> Booking {
        Booking::create(new_booking(125, 0), now()).unwrap().0
    }

    #[test]
    fn test_half_open_overlap() {
        let a = DateRange::new(date(2024, 6, 1), date(2024, 6, 5)).unwrap();
        let b = DateRange::new(date(2024, 6, 3), date(2024, 6, 7)).unwrap();
        let touching = DateRange::new(date(2024, 6, 5), date(2024, 6, 8)).unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&touching));
        assert!(!touching.overlaps(&a));
    }

    #[test]
    fn test_invalid_range() {
        assert!(matches!(
            DateRange::new(date(2024, 6, 5), date(2024, 6, 5)),
            Err(AppError::InvalidDateRange)
        ));
        assert!(matches!(
            DateRange::new(date(2024, 6, 5), date(2024, 6, 1)),
            Err(AppError::InvalidDateRange)
        ));
    }

    #[test]
    fn test_pricing() {
        let (booking, events) = Booking::create(new_booking(150, 100), now()).unwrap();
        assert_eq!(booking.total_days, 4);
        assert_eq!(booking.total_amount, Decimal::from(600));
        assert_eq!(booking.final_amount, Decimal::from(500));
        assert_eq!(
            booking.final_amount,
            booking.total_amount - booking.discount_amount
        );
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_discount_cannot_exceed_total() {
        assert!(Booking::create(new_booking(100, 401), now()).is_err());
        assert!(Booking::create(new_booking(100, -1), now()).is_err());
        assert!(Booking::create(new_booking(0, 0), now()).is_err());
    }

    #[test]
    fn test_approve_sets_deadline() {
        let mut booking = pending();
        let approver = Uuid::new_v4();
        let event = booking.approve(approver, 24, now()).unwrap();

        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.approved_by, Some(approver));
        assert_eq!(booking.approved_at, Some(now()));
        assert_eq!(booking.expires_at, Some(now() + Duration::hours(24)));
        assert!(matches!(event.kind, BookingEventKind::BookingApproved { .. }));
    }

    #[test]
    fn test_approve_twice_is_invalid_state() {
        let mut booking = pending();
        booking.approve(Uuid::new_v4(), 24, now()).unwrap();
        let approved_at = booking.approved_at;

        let later = now() + Duration::hours(1);
        let err = booking.approve(Uuid::new_v4(), 48, later).unwrap_err();
        assert!(matches!(err, AppError::InvalidState { .. }));
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.approved_at, approved_at);
    }

    #[test]
    fn test_approve_rejects_bad_deadline() {
        let mut booking = pending();
        assert!(booking.approve(Uuid::new_v4(), 0, now()).is_err());
        assert!(booking
            .approve(Uuid::new_v4(), MAX_PAYMENT_DEADLINE_HOURS + 1, now())
            .is_err());
        assert_eq!(booking.status, BookingStatus::Pending);
    }

    #[test]
    fn test_reject_requires_reason() {
        let mut booking = pending();
        assert!(matches!(
            booking.reject("   ", now()),
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(booking.status, BookingStatus::Pending);

        booking.reject("car under maintenance", now()).unwrap();
        assert_eq!(booking.status, BookingStatus::Rejected);
        assert_eq!(
            booking.rejection_reason.as_deref(),
            Some("car under maintenance")
        );
    }

    #[test]
    fn test_customer_cancel_guards() {
        let mut booking = pending();
        let stranger = Uuid::new_v4();
        assert!(matches!(
            booking.cancel_by_customer(stranger, None, now()),
            Err(AppError::Forbidden(_))
        ));

        let customer = booking.customer_id;
        booking
            .cancel_by_customer(customer, Some("plans changed"), now())
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert!(booking.notes.unwrap().contains("plans changed"));
    }

    #[test]
    fn test_cannot_cancel_once_paying() {
        let mut booking = pending();
        booking.approve(Uuid::new_v4(), 24, now()).unwrap();
        booking.begin_payment(now()).unwrap();
        let customer = booking.customer_id;
        assert!(matches!(
            booking.cancel_by_customer(customer, None, now()),
            Err(AppError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_begin_payment_is_reentrant() {
        let mut booking = pending();
        assert!(booking.begin_payment(now()).is_err());

        booking.approve(Uuid::new_v4(), 24, now()).unwrap();
        assert!(booking.begin_payment(now()).unwrap().is_some());
        assert!(booking.begin_payment(now()).unwrap().is_none());
        assert_eq!(booking.status, BookingStatus::PaymentPending);
    }

    #[test]
    fn test_settle_is_idempotent_per_reference() {
        let mut booking = pending();
        booking.approve(Uuid::new_v4(), 24, now()).unwrap();
        booking.begin_payment(now()).unwrap();

        let amount = booking.final_amount;
        assert!(matches!(
            booking.settle("pay_1", amount, now()).unwrap(),
            SettleOutcome::Settled(_)
        ));
        assert_eq!(
            booking.settle("pay_1", amount, now()).unwrap(),
            SettleOutcome::AlreadySettled
        );
        assert!(matches!(
            booking.settle("pay_2", amount, now()),
            Err(AppError::Conflict(_))
        ));
        assert_eq!(booking.status, BookingStatus::Active);
    }

    #[test]
    fn test_settle_rejects_amount_mismatch_and_late_payment() {
        let mut booking = pending();
        booking.approve(Uuid::new_v4(), 24, now()).unwrap();
        booking.begin_payment(now()).unwrap();

        assert!(matches!(
            booking.settle("pay_1", Decimal::ONE, now()),
            Err(AppError::AmountMismatch { .. })
        ));

        let late = now() + Duration::hours(25);
        let amount = booking.final_amount;
        assert!(matches!(
            booking.settle("pay_1", amount, late),
            Err(AppError::InvalidState { .. })
        ));
        assert_eq!(booking.status, BookingStatus::PaymentPending);
    }

    #[test]
    fn test_fail_payment_keeps_original_deadline() {
        let mut booking = pending();
        booking.approve(Uuid::new_v4(), 24, now()).unwrap();
        let deadline = booking.expires_at;
        booking.begin_payment(now()).unwrap();

        let event = booking.fail_payment("card declined", now()).unwrap();
        assert!(event.is_some());
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.expires_at, deadline);
        assert!(booking.status.is_capacity_consuming());

        assert!(booking.fail_payment("duplicate", now()).unwrap().is_none());
    }

    #[test]
    fn test_expire_and_complete() {
        let mut booking = pending();
        booking.approve(Uuid::new_v4(), 24, now()).unwrap();

        assert!(booking.expire(now() + Duration::hours(23)).is_none());
        assert!(booking.expire(now() + Duration::hours(25)).is_some());
        assert_eq!(booking.status, BookingStatus::Expired);
        assert!(!booking.status.is_capacity_consuming());

        let mut active = pending();
        active.approve(Uuid::new_v4(), 24, now()).unwrap();
        active.begin_payment(now()).unwrap();
        let amount = active.final_amount;
        active.settle("pay_9", amount, now()).unwrap();

        assert!(active.complete(date(2024, 6, 4), now()).is_none());
        assert!(active.complete(date(2024, 6, 5), now()).is_some());
        assert_eq!(active.status, BookingStatus::Completed);
        assert!(active.complete(date(2024, 6, 6), now()).is_none());
    }

    #[test]
    fn test_pre_approved_creation() {
        let mut new = new_booking(100, 0);
        let staff = Uuid::new_v4();
        new.pre_approval = Some(PreApproval {
            approved_by: staff,
            deadline_hours: 12,
        });
        let (booking, events) = Booking::create(new, now()).unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.approved_by, Some(staff));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_status_wire_values() {
        assert_eq!(
            serde_json::to_string(&BookingStatus::PaymentPending).unwrap(),
            "\"payment_pending\""
        );
        assert_eq!(
            serde_json::to_string(&RentalType::Ownership).unwrap(),
            "\"ownership\""
        );
    }
}

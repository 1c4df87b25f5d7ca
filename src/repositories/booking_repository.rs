//! Repositorio PostgreSQL del núcleo de reservas
//!
//! Cada operación compuesta es una transacción. La capacidad se comprueba
//! con la fila del coche bloqueada (`FOR UPDATE`), así que dos creaciones
//! concurrentes sobre el mismo coche se serializan. Las transiciones de una
//! reserva bloquean su fila; los barridos son un único `UPDATE` con guarda.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::models::booking::{Booking, DateRange, NewBooking, SettleOutcome};
use crate::models::car::{Availability, Car};
use crate::models::notification::{BookingEvent, BookingEventKind};
use crate::models::payment::{
    AttemptOutcome, AttemptStart, AttemptUpdate, ManualPayment, Payment, PaymentAttempt,
};
use crate::repositories::{
    check_payable, duplicate_reference, BookingStore, LedgerEntry, PaymentFailure,
    PaymentValidation, Settlement, SettlementResult, Transition,
};
use crate::utils::errors::{forbidden_error, not_found_error, AppError, AppResult};

const BOOKING_COLUMNS: &str = "id, branch_id, car_id, customer_id, start_date, end_date, \
    rental_type, daily_rate, total_days, total_amount, discount_amount, final_amount, status, \
    approved_by, approved_at, expires_at, payment_reference, rejection_reason, notes, \
    created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, booking_id, amount, method, status, transaction_reference, \
    refund_amount, refund_reason, refund_date, notes, recorded_by, created_at";

const ATTEMPT_COLUMNS: &str = "idempotency_key, booking_id, amount_minor, currency, \
    gateway_payment_id, outcome, transaction_url, message, created_at, updated_at";

/// Fila de payment_attempts; `outcome` se guarda como TEXT
#[derive(Debug, FromRow)]
struct AttemptRow {
    idempotency_key: Uuid,
    booking_id: Uuid,
    amount_minor: i64,
    currency: String,
    gateway_payment_id: Option<String>,
    outcome: String,
    transaction_url: Option<String>,
    message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AttemptRow> for PaymentAttempt {
    type Error = AppError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(Self {
            idempotency_key: row.idempotency_key,
            booking_id: row.booking_id,
            amount_minor: row.amount_minor,
            currency: row.currency,
            gateway_payment_id: row.gateway_payment_id,
            outcome: row.outcome.parse()?,
            transaction_url: row.transaction_url,
            message: row.message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    customer_id: Uuid,
    branch_id: Uuid,
}

impl EventRow {
    fn into_event(self, kind: BookingEventKind) -> BookingEvent {
        BookingEvent {
            booking_id: self.id,
            customer_id: self.customer_id,
            branch_id: self.branch_id,
            kind,
        }
    }
}

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_car(conn: &mut PgConnection, car_id: Uuid) -> AppResult<Car> {
        sqlx::query_as::<_, Car>(
            "SELECT id, branch_id, display_name, quantity, daily_rate FROM cars WHERE id = $1 FOR UPDATE",
        )
        .bind(car_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| not_found_error("Car", &car_id))
    }

    async fn count_overlapping(
        conn: &mut PgConnection,
        car_id: Uuid,
        range: &DateRange,
        exclude_booking: Option<Uuid>,
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM bookings
            WHERE car_id = $1
              AND status IN ('pending', 'confirmed', 'payment_pending', 'active')
              AND start_date < $3
              AND $2 < end_date
              AND ($4::uuid IS NULL OR id <> $4)
            "#,
        )
        .bind(car_id)
        .bind(range.start)
        .bind(range.end)
        .bind(exclude_booking)
        .fetch_one(&mut *conn)
        .await?;

        Ok(count)
    }

    async fn lock_booking(conn: &mut PgConnection, booking_id: Uuid) -> AppResult<Booking> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1 FOR UPDATE", BOOKING_COLUMNS);
        sqlx::query_as::<_, Booking>(&sql)
            .bind(booking_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| not_found_error("Booking", &booking_id))
    }

    async fn insert_booking(conn: &mut PgConnection, b: &Booking) -> AppResult<()> {
        let sql = format!(
            "INSERT INTO bookings ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)",
            BOOKING_COLUMNS
        );
        sqlx::query(&sql)
            .bind(b.id)
            .bind(b.branch_id)
            .bind(b.car_id)
            .bind(b.customer_id)
            .bind(b.start_date)
            .bind(b.end_date)
            .bind(b.rental_type)
            .bind(b.daily_rate)
            .bind(b.total_days)
            .bind(b.total_amount)
            .bind(b.discount_amount)
            .bind(b.final_amount)
            .bind(b.status)
            .bind(b.approved_by)
            .bind(b.approved_at)
            .bind(b.expires_at)
            .bind(&b.payment_reference)
            .bind(&b.rejection_reason)
            .bind(&b.notes)
            .bind(b.created_at)
            .bind(b.updated_at)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Persiste los campos mutables tras una transición
    async fn save_booking(conn: &mut PgConnection, b: &Booking) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE bookings SET
                status = $2,
                approved_by = $3,
                approved_at = $4,
                expires_at = $5,
                payment_reference = $6,
                rejection_reason = $7,
                notes = $8,
                updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(b.id)
        .bind(b.status)
        .bind(b.approved_by)
        .bind(b.approved_at)
        .bind(b.expires_at)
        .bind(&b.payment_reference)
        .bind(&b.rejection_reason)
        .bind(&b.notes)
        .bind(b.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn insert_payment(conn: &mut PgConnection, p: &Payment) -> AppResult<()> {
        let sql = format!(
            "INSERT INTO payments ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            PAYMENT_COLUMNS
        );
        sqlx::query(&sql)
            .bind(p.id)
            .bind(p.booking_id)
            .bind(p.amount)
            .bind(&p.method)
            .bind(p.status)
            .bind(&p.transaction_reference)
            .bind(p.refund_amount)
            .bind(&p.refund_reason)
            .bind(p.refund_date)
            .bind(&p.notes)
            .bind(p.recorded_by)
            .bind(p.created_at)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Aplica una transición pura sobre la reserva bloqueada y la persiste
    async fn transition<F>(&self, booking_id: Uuid, apply: F) -> AppResult<Transition>
    where
        F: FnOnce(&mut Booking) -> AppResult<Option<BookingEvent>> + Send,
    {
        let mut tx = self.pool.begin().await?;
        let mut booking = Self::lock_booking(&mut tx, booking_id).await?;

        let event = apply(&mut booking)?;
        if event.is_some() {
            Self::save_booking(&mut tx, &booking).await?;
        }
        tx.commit().await?;

        Ok(Transition {
            booking,
            events: event.into_iter().collect(),
        })
    }
}

#[async_trait]
impl BookingStore for PgBookingRepository {
    async fn get_car(&self, car_id: Uuid) -> AppResult<Car> {
        sqlx::query_as::<_, Car>(
            "SELECT id, branch_id, display_name, quantity, daily_rate FROM cars WHERE id = $1",
        )
        .bind(car_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| not_found_error("Car", &car_id))
    }

    async fn branch_manager(&self, branch_id: Uuid) -> AppResult<Option<Uuid>> {
        let manager: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT manager_id FROM branches WHERE id = $1")
                .bind(branch_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(manager.flatten())
    }

    async fn get_actual_available_quantity(
        &self,
        car_id: Uuid,
        range: DateRange,
        exclude_booking: Option<Uuid>,
    ) -> AppResult<Availability> {
        let car = self.get_car(car_id).await?;
        let mut conn = self.pool.acquire().await?;
        let overlapping = Self::count_overlapping(&mut conn, car_id, &range, exclude_booking).await?;
        Ok(Availability::new(&car, overlapping))
    }

    async fn create_booking_atomic(&self, new: NewBooking, now: DateTime<Utc>) -> AppResult<Transition> {
        let mut tx = self.pool.begin().await?;

        let car = Self::lock_car(&mut tx, new.car_id).await?;
        if car.branch_id != new.branch_id {
            return Err(AppError::BadRequest(
                "car does not belong to the given branch".to_string(),
            ));
        }

        let overlapping = Self::count_overlapping(&mut tx, car.id, &new.range, None).await?;
        if !Availability::new(&car, overlapping).is_available() {
            return Err(AppError::CapacityExceeded);
        }

        let (booking, events) = Booking::create(new, now)?;
        Self::insert_booking(&mut tx, &booking).await?;
        tx.commit().await?;

        tracing::info!(
            booking_id = %booking.id,
            car_id = %booking.car_id,
            status = %booking.status,
            "booking created"
        );

        Ok(Transition { booking, events })
    }

    async fn get_booking(&self, booking_id: Uuid) -> AppResult<Booking> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        sqlx::query_as::<_, Booking>(&sql)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found_error("Booking", &booking_id))
    }

    async fn approve_booking(
        &self,
        booking_id: Uuid,
        approver: Uuid,
        deadline_hours: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Transition> {
        self.transition(booking_id, |b| {
            b.approve(approver, deadline_hours, now).map(Some)
        })
        .await
    }

    async fn reject_booking(
        &self,
        booking_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Transition> {
        self.transition(booking_id, |b| b.reject(reason, now).map(Some))
            .await
    }

    async fn customer_cancel_booking(
        &self,
        booking_id: Uuid,
        customer_id: Uuid,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<Transition> {
        self.transition(booking_id, |b| {
            b.cancel_by_customer(customer_id, notes, now).map(Some)
        })
        .await
    }

    async fn validate_and_prepare_booking_for_payment(
        &self,
        booking_id: Uuid,
        customer_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<PaymentValidation> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        let booking = match sqlx::query_as::<_, Booking>(&sql)
            .bind(booking_id)
            .fetch_optional(&mut *tx)
            .await?
        {
            Some(b) => b,
            None => return Ok(PaymentValidation::invalid("Booking not found")),
        };

        let car = Self::lock_car(&mut tx, booking.car_id).await?;
        let overlapping =
            Self::count_overlapping(&mut tx, car.id, &booking.range(), Some(booking.id)).await?;
        let availability = Availability::new(&car, overlapping);
        tx.commit().await?;

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
        self.transition(booking_id, |b| b.begin_payment(now)).await
    }

    async fn complete_booking_payment_transaction(
        &self,
        settlement: Settlement,
        now: DateTime<Utc>,
    ) -> AppResult<SettlementResult> {
        let mut tx = self.pool.begin().await?;
        let mut booking = Self::lock_booking(&mut tx, settlement.booking_id).await?;

        if let Some(caller) = settlement.caller {
            if caller != booking.customer_id {
                return Err(forbidden_error(
                    "settle payment",
                    "booking belongs to another customer",
                ));
            }
        }

        let event = match booking.settle(&settlement.payment_reference, settlement.charged_amount, now)? {
            SettleOutcome::AlreadySettled => {
                tx.commit().await?;
                return Ok(SettlementResult {
                    booking,
                    payment: None,
                    events: Vec::new(),
                });
            }
            SettleOutcome::Settled(event) => event,
        };

        let payment = Payment::settled(
            booking.id,
            booking.final_amount,
            &settlement.payment_reference,
            now,
        );
        Self::save_booking(&mut tx, &booking).await?;
        Self::insert_payment(&mut tx, &payment).await?;
        tx.commit().await?;

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
        let mut tx = self.pool.begin().await?;
        let mut booking = Self::lock_booking(&mut tx, failure.booking_id).await?;

        let event = booking.fail_payment(&failure.reason, now)?;
        if event.is_some() {
            let payment = Payment::failed(
                booking.id,
                booking.final_amount,
                failure.payment_reference.as_deref(),
                &failure.reason,
                now,
            );
            Self::save_booking(&mut tx, &booking).await?;
            Self::insert_payment(&mut tx, &payment).await?;
        }
        tx.commit().await?;

        Ok(Transition {
            booking,
            events: event.into_iter().collect(),
        })
    }

    async fn cleanup_expired_bookings(&self, now: DateTime<Utc>) -> AppResult<Vec<BookingEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            UPDATE bookings SET status = 'expired', updated_at = $1
            WHERE status IN ('confirmed', 'payment_pending')
              AND expires_at IS NOT NULL
              AND expires_at < $1
            RETURNING id, customer_id, branch_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| r.into_event(BookingEventKind::BookingExpired))
            .collect())
    }

    async fn complete_active_bookings(
        &self,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<BookingEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            UPDATE bookings SET status = 'completed', updated_at = $2
            WHERE status = 'active' AND end_date <= $1
            RETURNING id, customer_id, branch_id
            "#,
        )
        .bind(today)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| r.into_event(BookingEventKind::BookingCompleted))
            .collect())
    }

    async fn add_manual_payment(
        &self,
        booking_id: Uuid,
        input: ManualPayment,
        now: DateTime<Utc>,
    ) -> AppResult<LedgerEntry> {
        let mut tx = self.pool.begin().await?;
        let booking = Self::lock_booking(&mut tx, booking_id).await?;

        let payment = Payment::manual(booking.id, input, now)?;
        if let Some(reference) = payment.transaction_reference.as_deref() {
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM payments \
                 WHERE transaction_reference = $1 \
                   AND status IN ('completed', 'refunded', 'partial_refund'))",
            )
            .bind(reference)
            .fetch_one(&mut *tx)
            .await?;
            if taken {
                return Err(duplicate_reference(reference));
            }
        }

        Self::insert_payment(&mut tx, &payment)
            .await
            .map_err(|e| match (e, payment.transaction_reference.as_deref()) {
                (AppError::Database(sqlx::Error::Database(db)), Some(reference))
                    if db.is_unique_violation() =>
                {
                    duplicate_reference(reference)
                }
                (e, _) => e,
            })?;
        tx.commit().await?;

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
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {} FROM payments WHERE id = $1 FOR UPDATE", PAYMENT_COLUMNS);
        let mut payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(payment_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| not_found_error("Payment", &payment_id))?;

        payment.apply_refund(amount, reason, now)?;

        sqlx::query(
            r#"
            UPDATE payments SET
                status = $2,
                refund_amount = $3,
                refund_reason = $4,
                refund_date = $5
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(payment.status)
        .bind(payment.refund_amount)
        .bind(&payment.refund_reason)
        .bind(payment.refund_date)
        .execute(&mut *tx)
        .await?;

        let booking_sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        let booking = sqlx::query_as::<_, Booking>(&booking_sql)
            .bind(payment.booking_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        let event = booking.event(BookingEventKind::RefundProcessed {
            payment_id: payment.id,
            amount,
        });
        Ok(LedgerEntry { payment, event })
    }

    async fn list_payments(&self, booking_id: Uuid) -> AppResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE booking_id = $1 ORDER BY created_at",
            PAYMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Payment>(&sql)
            .bind(booking_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_payment_attempt(&self, key: Uuid) -> AppResult<Option<PaymentAttempt>> {
        let sql = format!(
            "SELECT {} FROM payment_attempts WHERE idempotency_key = $1",
            ATTEMPT_COLUMNS
        );
        sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .map(PaymentAttempt::try_from)
            .transpose()
    }

    async fn begin_payment_attempt(
        &self,
        key: Uuid,
        booking_id: Uuid,
        amount_minor: i64,
        currency: &str,
        now: DateTime<Utc>,
    ) -> AppResult<AttemptStart> {
        let sql = format!(
            "INSERT INTO payment_attempts \
             (idempotency_key, booking_id, amount_minor, currency, outcome, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) \
             ON CONFLICT (idempotency_key) DO NOTHING \
             RETURNING {}",
            ATTEMPT_COLUMNS
        );
        let inserted = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(key)
            .bind(booking_id)
            .bind(amount_minor)
            .bind(currency)
            .bind(AttemptOutcome::Pending.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = inserted {
            return Ok(AttemptStart::Started(row.try_into()?));
        }

        let existing = self
            .get_payment_attempt(key)
            .await?
            .ok_or_else(|| AppError::Internal(format!("payment attempt {} vanished", key)))?;
        AttemptStart::from_existing(existing, booking_id)
    }

    async fn record_attempt_outcome(
        &self,
        key: Uuid,
        update: AttemptUpdate,
        now: DateTime<Utc>,
    ) -> AppResult<PaymentAttempt> {
        let sql = format!(
            "UPDATE payment_attempts SET \
                outcome = $2, \
                gateway_payment_id = COALESCE($3, gateway_payment_id), \
                transaction_url = COALESCE($4, transaction_url), \
                message = COALESCE($5, message), \
                updated_at = $6 \
             WHERE idempotency_key = $1 \
             RETURNING {}",
            ATTEMPT_COLUMNS
        );
        sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(key)
            .bind(update.outcome.as_str())
            .bind(update.gateway_payment_id)
            .bind(update.transaction_url)
            .bind(update.message)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found_error("Payment attempt", &key))?
            .try_into()
    }

    async fn list_unresolved_attempts(&self, older_than: DateTime<Utc>) -> AppResult<Vec<PaymentAttempt>> {
        let sql = format!(
            "SELECT {} FROM payment_attempts \
             WHERE outcome IN ('pending', 'initiated', 'unknown') AND updated_at < $1 \
             ORDER BY updated_at \
             LIMIT 100",
            ATTEMPT_COLUMNS
        );
        sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(older_than)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(PaymentAttempt::try_from)
            .collect()
    }
}

//! Modelo de Payment
//!
//! Pagos registrados contra una reserva y el registro de intentos
//! enviados a la pasarela (clave de idempotencia).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

use crate::utils::errors::{AppError, AppResult};

/// Método usado por la pasarela para pagos con tarjeta
pub const GATEWAY_METHOD: &str = "card";

/// Estado de un pago - mapea al ENUM payment_status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    PartialRefund,
}

/// Pago registrado - mapea exactamente a la tabla payments
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: Decimal,
    pub method: String,
    pub status: PaymentStatus,
    pub transaction_reference: Option<String>,
    pub refund_amount: Decimal,
    pub refund_reason: Option<String>,
    pub refund_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub recorded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Datos de un pago manual (efectivo, transferencia...)
#[derive(Debug, Clone)]
pub struct ManualPayment {
    pub amount: Decimal,
    pub method: String,
    pub transaction_reference: Option<String>,
    pub notes: Option<String>,
    pub recorded_by: Uuid,
}

impl Payment {
    fn base(booking_id: Uuid, amount: Decimal, method: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            amount,
            method: method.to_string(),
            status: PaymentStatus::Completed,
            transaction_reference: None,
            refund_amount: Decimal::ZERO,
            refund_reason: None,
            refund_date: None,
            notes: None,
            recorded_by: None,
            created_at: now,
        }
    }

    /// Pago completado por la pasarela al liquidar la reserva
    pub fn settled(booking_id: Uuid, amount: Decimal, reference: &str, now: DateTime<Utc>) -> Self {
        Self {
            transaction_reference: Some(reference.to_string()),
            ..Self::base(booking_id, amount, GATEWAY_METHOD, now)
        }
    }

    /// Registro de auditoría de un intento fallido
    pub fn failed(
        booking_id: Uuid,
        amount: Decimal,
        reference: Option<&str>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: PaymentStatus::Failed,
            transaction_reference: reference.map(str::to_string),
            notes: Some(reason.to_string()),
            ..Self::base(booking_id, amount, GATEWAY_METHOD, now)
        }
    }

    pub fn manual(booking_id: Uuid, input: ManualPayment, now: DateTime<Utc>) -> AppResult<Self> {
        if input.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest("payment amount must be positive".to_string()));
        }
        let method = input.method.trim();
        if method.is_empty() {
            return Err(AppError::BadRequest("payment method is required".to_string()));
        }

        Ok(Self {
            transaction_reference: input.transaction_reference,
            notes: input.notes,
            recorded_by: Some(input.recorded_by),
            ..Self::base(booking_id, input.amount, method, now)
        })
    }

    /// Ocupa la referencia de pasarela (índice único de pagos completados)
    pub fn holds_reference(&self, reference: &str) -> bool {
        self.transaction_reference.as_deref() == Some(reference)
            && matches!(
                self.status,
                PaymentStatus::Completed | PaymentStatus::Refunded | PaymentStatus::PartialRefund
            )
    }

    /// Importe que todavía se puede reembolsar
    pub fn refundable(&self) -> Decimal {
        match self.status {
            PaymentStatus::Completed | PaymentStatus::PartialRefund => {
                self.amount - self.refund_amount
            }
            _ => Decimal::ZERO,
        }
    }

    /// Aplica un reembolso; nunca supera `amount`
    pub fn apply_refund(
        &mut self,
        amount: Decimal,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest("refund amount must be positive".to_string()));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::BadRequest("refund reason is required".to_string()));
        }
        if !matches!(
            self.status,
            PaymentStatus::Completed | PaymentStatus::PartialRefund
        ) {
            return Err(AppError::Conflict(format!(
                "payment {} cannot be refunded",
                self.id
            )));
        }

        let available = self.refundable();
        if amount > available {
            return Err(AppError::RefundExceedsAvailable {
                requested: amount,
                available,
            });
        }

        self.refund_amount += amount;
        self.status = if self.refund_amount == self.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartialRefund
        };
        self.refund_reason = Some(reason.to_string());
        self.refund_date = Some(now);
        Ok(())
    }
}

/// Resultado conocido de un intento de cobro
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Registrado, todavía sin respuesta de la pasarela
    Pending,
    /// Requiere acción del cliente (3DS)
    Initiated,
    Paid,
    Failed,
    /// Timeout o respuesta ambigua, pendiente de conciliación
    Unknown,
    /// Cobrado pero no se pudo liquidar la reserva
    NeedsReview,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Pending => "pending",
            AttemptOutcome::Initiated => "initiated",
            AttemptOutcome::Paid => "paid",
            AttemptOutcome::Failed => "failed",
            AttemptOutcome::Unknown => "unknown",
            AttemptOutcome::NeedsReview => "needs_review",
        }
    }

    /// Resultado definitivo, se puede devolver tal cual en un reintento
    pub fn is_final(self) -> bool {
        matches!(
            self,
            AttemptOutcome::Paid | AttemptOutcome::Failed | AttemptOutcome::NeedsReview
        )
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptOutcome {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttemptOutcome::Pending),
            "initiated" => Ok(AttemptOutcome::Initiated),
            "paid" => Ok(AttemptOutcome::Paid),
            "failed" => Ok(AttemptOutcome::Failed),
            "unknown" => Ok(AttemptOutcome::Unknown),
            "needs_review" => Ok(AttemptOutcome::NeedsReview),
            other => Err(AppError::Internal(format!(
                "unrecognised payment attempt outcome '{}'",
                other
            ))),
        }
    }
}

/// Intento de cobro enviado a la pasarela
#[derive(Debug, Clone, Serialize)]
pub struct PaymentAttempt {
    pub idempotency_key: Uuid,
    pub booking_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub gateway_payment_id: Option<String>,
    pub outcome: AttemptOutcome,
    pub transaction_url: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Resultado de registrar (o recuperar) un intento
#[derive(Debug, Clone)]
pub enum AttemptStart {
    /// Intento nuevo, hay que llamar a la pasarela
    Started(PaymentAttempt),
    /// Ya existía sin resultado definitivo; se vuelve a consultar
    Resume(PaymentAttempt),
    /// Ya existía con resultado definitivo; se devuelve sin cobrar de nuevo
    Replay(PaymentAttempt),
}

impl AttemptStart {
    /// Clasifica un intento ya registrado con la misma clave
    pub fn from_existing(existing: PaymentAttempt, booking_id: Uuid) -> AppResult<Self> {
        if existing.booking_id != booking_id {
            return Err(AppError::Conflict(
                "idempotency key was already used for another booking".to_string(),
            ));
        }
        if existing.outcome.is_final() {
            Ok(AttemptStart::Replay(existing))
        } else {
            Ok(AttemptStart::Resume(existing))
        }
    }

    pub fn attempt(&self) -> &PaymentAttempt {
        match self {
            AttemptStart::Started(a) | AttemptStart::Resume(a) | AttemptStart::Replay(a) => a,
        }
    }
}

/// Actualización del resultado de un intento
#[derive(Debug, Clone)]
pub struct AttemptUpdate {
    pub outcome: AttemptOutcome,
    pub gateway_payment_id: Option<String>,
    pub transaction_url: Option<String>,
    pub message: Option<String>,
}

impl AttemptUpdate {
    pub fn outcome(outcome: AttemptOutcome) -> Self {
        Self {
            outcome,
            gateway_payment_id: None,
            transaction_url: None,
            message: None,
        }
    }

    pub fn gateway_payment_id(mut self, id: impl Into<String>) -> Self {
        self.gateway_payment_id = Some(id.into());
        self
    }

    pub fn transaction_url(mut self, url: Option<String>) -> Self {
        self.transaction_url = url;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl PaymentAttempt {
    pub fn new(
        key: Uuid,
        booking_id: Uuid,
        amount_minor: i64,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            idempotency_key: key,
            booking_id,
            amount_minor,
            currency: currency.to_string(),
            gateway_payment_id: None,
            outcome: AttemptOutcome::Pending,
            transaction_url: None,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Aplica la actualización conservando los datos previos no informados
    pub fn apply(&mut self, update: AttemptUpdate, now: DateTime<Utc>) {
        self.outcome = update.outcome;
        if update.gateway_payment_id.is_some() {
            self.gateway_payment_id = update.gateway_payment_id;
        }
        if update.transaction_url.is_some() {
            self.transaction_url = update.transaction_url;
        }
        if update.message.is_some() {
            self.message = update.message;
        }
        self.updated_at = now;
    }

    /// Identificador con el que consultar la pasarela
    pub fn gateway_lookup_id(&self) -> String {
        self.gateway_payment_id
            .clone()
            .unwrap_or_else(|| self.idempotency_key.to_string())
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(
            self.outcome,
            AttemptOutcome::Pending | AttemptOutcome::Initiated | AttemptOutcome::Unknown
        )
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::booking::BookingStatus;
use crate::models::payment::{Payment, PaymentStatus};
use crate::services::payment_service::{PaymentFlowStatus, PaymentOutcome};
use crate::utils::validation::{validate_not_blank, validate_positive_amount, validate_uuid};

// Request del cliente para pagar una reserva confirmada
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub booking_id: Uuid,
    /// Token opaco del método de pago (tokenizado en el cliente)
    #[validate(custom = "validate_not_blank")]
    pub token: String,
    #[validate(custom = "validate_uuid")]
    pub idempotency_key: Option<String>,
}

impl CreatePaymentRequest {
    /// Clave de idempotencia suministrada, ya validada como UUID
    pub fn idempotency_key(&self) -> Option<Uuid> {
        self.idempotency_key
            .as_deref()
            .and_then(|k| Uuid::parse_str(k).ok())
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub booking_id: Uuid,
    #[validate(custom = "validate_not_blank")]
    pub payment_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFlowResponse {
    pub success: bool,
    pub status: PaymentFlowStatus,
    pub booking_id: Uuid,
    pub booking_status: BookingStatus,
    pub payment_id: Option<String>,
    pub transaction_url: Option<String>,
    pub idempotency_key: Option<Uuid>,
    pub message: String,
}

impl From<PaymentOutcome> for PaymentFlowResponse {
    fn from(outcome: PaymentOutcome) -> Self {
        Self {
            success: outcome.status != PaymentFlowStatus::Failed,
            status: outcome.status,
            booking_id: outcome.booking_id,
            booking_status: outcome.booking_status,
            payment_id: outcome.gateway_payment_id,
            transaction_url: outcome.transaction_url,
            idempotency_key: outcome.idempotency_key,
            message: outcome.message,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ManualPaymentRequest {
    #[validate(custom = "validate_positive_amount")]
    pub amount: Decimal,
    #[validate(custom = "validate_not_blank", length(max = 50))]
    pub method: String,
    #[validate(length(max = 255))]
    pub transaction_reference: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    #[validate(custom = "validate_positive_amount")]
    pub amount: Decimal,
    #[validate(custom = "validate_not_blank", length(max = 1000))]
    pub reason: String,
}

// Response de pago registrado
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: Decimal,
    pub method: String,
    pub status: PaymentStatus,
    pub transaction_reference: Option<String>,
    pub refund_amount: Decimal,
    pub refundable_amount: Decimal,
    pub refund_reason: Option<String>,
    pub refund_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        let refundable_amount = p.refundable();
        Self {
            id: p.id,
            booking_id: p.booking_id,
            amount: p.amount,
            method: p.method,
            status: p.status,
            transaction_reference: p.transaction_reference,
            refund_amount: p.refund_amount,
            refundable_amount,
            refund_reason: p.refund_reason,
            refund_date: p.refund_date,
            notes: p.notes,
            created_at: p.created_at,
        }
    }
}

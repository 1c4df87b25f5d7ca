//! Orquestador de pagos
//!
//! Lleva una reserva confirmada al cobro y concilia la respuesta de la
//! pasarela. Cada llamada se registra en el libro de intentos con su clave
//! de idempotencia. Cualquier respuesta ambigua deja la reserva en
//! `payment_pending` para que la conciliación la resuelva después.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::clients::payment_gateway::{
    ChargeRequest, GatewayError, GatewayPayment, GatewayStatus, PaymentGateway,
};
use crate::config::environment::PaymentConfig;
use crate::models::auth::AuthenticatedUser;
use crate::models::booking::{Booking, BookingStatus};
use crate::models::payment::{AttemptOutcome, AttemptStart, AttemptUpdate, PaymentAttempt};
use crate::repositories::{BookingStore, PaymentFailure, Settlement};
use crate::services::notifier::{dispatch, Notifier};
use crate::utils::clock::Clock;
use crate::utils::errors::{forbidden_error, not_found_error, AppError, AppResult};
use crate::utils::money::{from_minor_units, to_minor_units};

const RECONCILE_CONCURRENCY: usize = 4;
const ABANDONED_MESSAGE: &str = "abandoned";

/// Resultado visible para el cliente
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFlowStatus {
    Paid,
    /// Pendiente de 3-D Secure en `transaction_url`
    Initiated,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub status: PaymentFlowStatus,
    pub booking_id: Uuid,
    pub booking_status: BookingStatus,
    pub gateway_payment_id: Option<String>,
    pub transaction_url: Option<String>,
    pub idempotency_key: Option<Uuid>,
    pub message: String,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn BookingStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: PaymentConfig,
    reconcile_after: Duration,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: PaymentConfig,
        reconcile_after: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            clock,
            config,
            reconcile_after,
        }
    }

    /// Cobra una reserva confirmada con el token del método de pago
    pub async fn create_payment(
        &self,
        user: &AuthenticatedUser,
        booking_id: Uuid,
        token: &str,
        idempotency_key: Option<Uuid>,
    ) -> AppResult<PaymentOutcome> {
        let supplied = idempotency_key.is_some();
        let key = idempotency_key.unwrap_or_else(Uuid::new_v4);
        let span = tracing::info_span!("payment", correlation_id = %key, booking_id = %booking_id);

        self.charge(user, booking_id, token, key, supplied)
            .instrument(span)
            .await
    }

    async fn charge(
        &self,
        user: &AuthenticatedUser,
        booking_id: Uuid,
        token: &str,
        key: Uuid,
        supplied: bool,
    ) -> AppResult<PaymentOutcome> {
        if supplied {
            if let Some(existing) = self.store.get_payment_attempt(key).await? {
                if existing.booking_id != booking_id {
                    return Err(AppError::Conflict(
                        "idempotency key was already used for another booking".to_string(),
                    ));
                }
                if existing.outcome.is_final() {
                    let booking = self.store.get_booking(booking_id).await?;
                    if booking.customer_id != user.user_id {
                        return Err(forbidden_error("pay booking", "booking belongs to another customer"));
                    }
                    tracing::info!(outcome = %existing.outcome, "replaying recorded payment outcome");
                    return replay(&existing, &booking);
                }
            }
        }

        let now = self.clock.now();
        let validation = self
            .store
            .validate_and_prepare_booking_for_payment(booking_id, user.user_id, now)
            .await?;
        if !validation.is_valid {
            let message = validation
                .error_message
                .unwrap_or_else(|| "Booking cannot be paid".to_string());
            tracing::info!(reason = %message, "payment validation failed");
            return Err(AppError::BadRequest(message));
        }
        let booking = validation
            .booking
            .ok_or_else(|| AppError::Internal("validated booking missing".to_string()))?;

        let amount_minor = to_minor_units(booking.final_amount)?;
        let start = self
            .store
            .begin_payment_attempt(key, booking.id, amount_minor, &self.config.currency, now)
            .await?;

        match start {
            AttemptStart::Replay(existing) => return replay(&existing, &booking),
            AttemptStart::Resume(existing) => {
                if let Some(outcome) = self.resume(&booking, &existing, user.user_id).await? {
                    return Ok(outcome);
                }
            }
            AttemptStart::Started(_) => {}
        }

        let transition = self
            .store
            .update_booking_to_payment_pending(booking.id, self.clock.now())
            .await?;
        dispatch(self.notifier.as_ref(), &transition.events).await;
        let booking = transition.booking;

        let request = ChargeRequest {
            given_id: key,
            amount_minor,
            currency: self.config.currency.clone(),
            description: format!("Car rental booking {}", booking.id),
            callback_url: self.config.callback_url.clone(),
            token: token.to_string(),
            booking_id: booking.id,
            customer_id: booking.customer_id,
        };

        tracing::info!(amount_minor, currency = %request.currency, "submitting charge to gateway");
        let result = match tokio::time::timeout(self.config.timeout, self.gateway.create_payment(&request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        };

        match result {
            Ok(payment) => {
                tracing::info!(
                    gateway_payment_id = %payment.id,
                    gateway_status = payment.status.as_str(),
                    amount_minor = payment.amount,
                    "gateway responded"
                );
                self.apply_gateway_payment(&booking, Some(key), &payment, Some(user.user_id))
                    .await
            }
            Err(e) if e.is_definite() => {
                tracing::warn!(error = %e, amount_minor, "gateway declined the charge");
                let reason = e.to_string();
                let booking_status = self.fail_booking_payment(booking.id, None, &reason).await?;
                self.mark(
                    Some(key),
                    AttemptUpdate::outcome(AttemptOutcome::Failed).message(reason.clone()),
                )
                .await;

                Ok(PaymentOutcome {
                    status: PaymentFlowStatus::Failed,
                    booking_id: booking.id,
                    booking_status,
                    gateway_payment_id: None,
                    transaction_url: None,
                    idempotency_key: Some(key),
                    message: reason,
                })
            }
            Err(e) => Err(self.ambiguous(Some(key), e).await),
        }
    }

    /// Reintento con una clave sin resultado: consulta antes de volver a cobrar
    async fn resume(
        &self,
        booking: &Booking,
        attempt: &PaymentAttempt,
        caller: Uuid,
    ) -> AppResult<Option<PaymentOutcome>> {
        match self.fetch(&attempt.gateway_lookup_id()).await {
            Ok(Some(payment)) => {
                tracing::info!(
                    gateway_payment_id = %payment.id,
                    gateway_status = payment.status.as_str(),
                    "resuming attempt from gateway state"
                );
                self.apply_gateway_payment(booking, Some(attempt.idempotency_key), &payment, Some(caller))
                    .await
                    .map(Some)
            }
            Ok(None) => Ok(None),
            Err(e) => Err(self.ambiguous(Some(attempt.idempotency_key), e).await),
        }
    }

    /// Verificación al volver de 3-D Secure; nunca confía en el estado del cliente
    pub async fn verify_payment(
        &self,
        user: &AuthenticatedUser,
        booking_id: Uuid,
        payment_id: &str,
    ) -> AppResult<PaymentOutcome> {
        let span = tracing::info_span!("payment", correlation_id = %payment_id, booking_id = %booking_id);

        async {
            let booking = self.store.get_booking(booking_id).await?;
            if booking.customer_id != user.user_id {
                return Err(forbidden_error("verify payment", "booking belongs to another customer"));
            }

            let key = Uuid::parse_str(payment_id).ok();
            let payment = match self.fetch(payment_id).await {
                Ok(Some(payment)) => payment,
                Ok(None) => return Err(not_found_error("Gateway payment", &payment_id)),
                Err(e) => return Err(self.ambiguous(key, e).await),
            };

            tracing::info!(
                gateway_payment_id = %payment.id,
                gateway_status = payment.status.as_str(),
                amount_minor = payment.amount,
                "verifying returned payment"
            );

            if payment.booking_id != Some(booking.id) {
                return Err(AppError::BadRequest(
                    "payment does not belong to this booking".to_string(),
                ));
            }
            let expected = to_minor_units(booking.final_amount)?;
            if payment.amount != expected {
                return Err(AppError::AmountMismatch {
                    charged: from_minor_units(payment.amount),
                    expected: booking.final_amount,
                });
            }

            self.apply_gateway_payment(&booking, key, &payment, Some(user.user_id))
                .await
        }
        .instrument(span)
        .await
    }

    /// Resuelve intentos ambiguos consultando la pasarela; devuelve cuántos se resolvieron
    pub async fn reconcile_pending_payments(&self) -> AppResult<usize> {
        let age = chrono::Duration::from_std(self.reconcile_after)
            .map_err(|e| AppError::Configuration(format!("invalid reconcile threshold: {}", e)))?;
        let attempts = self
            .store
            .list_unresolved_attempts(self.clock.now() - age)
            .await?;
        let checked = attempts.len();

        let results: Vec<AppResult<bool>> = stream::iter(attempts)
            .map(|attempt| self.reconcile_attempt(attempt))
            .buffer_unordered(RECONCILE_CONCURRENCY)
            .collect()
            .await;

        let mut resolved = 0;
        for result in results {
            match result {
                Ok(true) => resolved += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "payment attempt could not be reconciled"),
            }
        }

        if checked > 0 {
            tracing::info!(checked, resolved, "payment reconciliation finished");
        }
        Ok(resolved)
    }

    async fn reconcile_attempt(&self, attempt: PaymentAttempt) -> AppResult<bool> {
        let key = attempt.idempotency_key;
        let span = tracing::info_span!("payment", correlation_id = %key, booking_id = %attempt.booking_id);

        async {
            let lookup = attempt.gateway_lookup_id();
            let payment = match self.fetch(&lookup).await {
                Ok(payment) => payment,
                Err(e) => {
                    return Err(AppError::GatewayUnavailable(format!(
                        "could not fetch {}: {}",
                        lookup, e
                    )))
                }
            };

            let payment = match payment {
                Some(payment) => payment,
                None => {
                    if !matches!(attempt.outcome, AttemptOutcome::Pending | AttemptOutcome::Unknown) {
                        self.rotate(&attempt).await;
                        return Ok(false);
                    }
                    let reason = "payment not found at gateway";
                    tracing::info!(gateway_payment_id = %lookup, "{}", reason);
                    self.fail_booking_payment(attempt.booking_id, attempt.gateway_payment_id.clone(), reason)
                        .await?;
                    self.mark(
                        Some(key),
                        AttemptUpdate::outcome(AttemptOutcome::Failed).message(reason),
                    )
                    .await;
                    return Ok(true);
                }
            };

            tracing::info!(
                gateway_payment_id = %payment.id,
                gateway_status = payment.status.as_str(),
                amount_minor = payment.amount,
                "reconciling attempt"
            );

            match payment.status {
                GatewayStatus::Paid | GatewayStatus::Failed => {
                    let booking = self.store.get_booking(attempt.booking_id).await?;
                    self.apply_gateway_payment(&booking, Some(key), &payment, None)
                        .await
                        .map(|_| true)
                }
                GatewayStatus::Initiated => {
                    let booking = self.store.get_booking(attempt.booking_id).await?;
                    if booking.status == BookingStatus::PaymentPending {
                        self.rotate(&attempt).await;
                        return Ok(false);
                    }

                    // 3-D Secure sin completar y la reserva ya salió de payment_pending
                    tracing::info!(booking_status = %booking.status, "3-D Secure attempt abandoned");
                    self.mark(
                        Some(key),
                        AttemptUpdate::outcome(AttemptOutcome::Failed)
                            .gateway_payment_id(payment.id.clone())
                            .message(ABANDONED_MESSAGE),
                    )
                    .await;
                    Ok(true)
                }
                GatewayStatus::Other(_) => {
                    self.rotate(&attempt).await;
                    Ok(false)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Mueve el intento al final de la ventana de reconciliación
    async fn rotate(&self, attempt: &PaymentAttempt) {
        self.mark(Some(attempt.idempotency_key), AttemptUpdate::outcome(attempt.outcome))
            .await;
    }

    /// Aplica el estado reportado por la pasarela a la reserva
    async fn apply_gateway_payment(
        &self,
        booking: &Booking,
        key: Option<Uuid>,
        payment: &GatewayPayment,
        caller: Option<Uuid>,
    ) -> AppResult<PaymentOutcome> {
        match &payment.status {
            GatewayStatus::Paid => {
                let settlement = Settlement {
                    booking_id: booking.id,
                    payment_reference: payment.id.clone(),
                    charged_amount: from_minor_units(payment.amount),
                    caller,
                };

                match self
                    .store
                    .complete_booking_payment_transaction(settlement, self.clock.now())
                    .await
                {
                    Ok(result) => {
                        let duplicate = result.payment.is_none();
                        tracing::info!(
                            gateway_payment_id = %payment.id,
                            gateway_status = "paid",
                            amount_minor = payment.amount,
                            duplicate,
                            "booking settled"
                        );
                        self.mark(
                            key,
                            AttemptUpdate::outcome(AttemptOutcome::Paid).gateway_payment_id(payment.id.clone()),
                        )
                        .await;
                        dispatch(self.notifier.as_ref(), &result.events).await;

                        Ok(PaymentOutcome {
                            status: PaymentFlowStatus::Paid,
                            booking_id: booking.id,
                            booking_status: result.booking.status,
                            gateway_payment_id: Some(payment.id.clone()),
                            transaction_url: None,
                            idempotency_key: key,
                            message: if duplicate {
                                "Payment was already recorded".to_string()
                            } else {
                                "Payment completed".to_string()
                            },
                        })
                    }
                    Err(e) => {
                        tracing::error!(
                            gateway_payment_id = %payment.id,
                            gateway_status = "paid",
                            amount_minor = payment.amount,
                            error = %e,
                            "card was charged but the booking could not be settled; manual refund required"
                        );
                        self.mark(
                            key,
                            AttemptUpdate::outcome(AttemptOutcome::NeedsReview)
                                .gateway_payment_id(payment.id.clone())
                                .message(e.to_string()),
                        )
                        .await;
                        Err(e)
                    }
                }
            }
            GatewayStatus::Initiated => {
                self.mark(
                    key,
                    AttemptUpdate::outcome(AttemptOutcome::Initiated)
                        .gateway_payment_id(payment.id.clone())
                        .transaction_url(payment.transaction_url.clone()),
                )
                .await;

                Ok(PaymentOutcome {
                    status: PaymentFlowStatus::Initiated,
                    booking_id: booking.id,
                    booking_status: booking.status,
                    gateway_payment_id: Some(payment.id.clone()),
                    transaction_url: payment.transaction_url.clone(),
                    idempotency_key: key,
                    message: "Additional authentication required".to_string(),
                })
            }
            GatewayStatus::Failed => {
                let reason = payment
                    .message
                    .clone()
                    .unwrap_or_else(|| "Payment was declined".to_string());
                let booking_status = self
                    .fail_booking_payment(booking.id, Some(payment.id.clone()), &reason)
                    .await?;
                self.mark(
                    key,
                    AttemptUpdate::outcome(AttemptOutcome::Failed)
                        .gateway_payment_id(payment.id.clone())
                        .message(reason.clone()),
                )
                .await;

                Ok(PaymentOutcome {
                    status: PaymentFlowStatus::Failed,
                    booking_id: booking.id,
                    booking_status,
                    gateway_payment_id: Some(payment.id.clone()),
                    transaction_url: None,
                    idempotency_key: key,
                    message: reason,
                })
            }
            GatewayStatus::Other(status) => {
                tracing::warn!(
                    gateway_payment_id = %payment.id,
                    gateway_status = %status,
                    amount_minor = payment.amount,
                    "unrecognised gateway status; booking left in payment_pending"
                );
                self.mark(
                    key,
                    AttemptUpdate::outcome(AttemptOutcome::Unknown)
                        .gateway_payment_id(payment.id.clone())
                        .message(format!("unrecognised gateway status '{}'", status)),
                )
                .await;
                Err(AppError::UnknownGatewayStatus(status.clone()))
            }
        }
    }

    /// Revierte a `confirmed`; si la reserva ya salió del flujo de pago solo se registra
    async fn fail_booking_payment(
        &self,
        booking_id: Uuid,
        payment_reference: Option<String>,
        reason: &str,
    ) -> AppResult<BookingStatus> {
        let failure = PaymentFailure {
            booking_id,
            payment_reference,
            reason: reason.to_string(),
        };

        match self
            .store
            .handle_payment_failure_transaction(failure, self.clock.now())
            .await
        {
            Ok(transition) => {
                tracing::info!(reason, "payment failure recorded; booking back to confirmed");
                dispatch(self.notifier.as_ref(), &transition.events).await;
                Ok(transition.booking.status)
            }
            Err(AppError::InvalidState { current, .. }) => {
                tracing::warn!(status = %current, reason, "payment failed for a booking no longer awaiting payment");
                Ok(current)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch(&self, payment_id: &str) -> Result<Option<GatewayPayment>, GatewayError> {
        match tokio::time::timeout(self.config.timeout, self.gateway.fetch_payment(payment_id)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        }
    }

    /// Respuesta ambigua: el intento queda `unknown` y la reserva en `payment_pending`
    async fn ambiguous(&self, key: Option<Uuid>, error: GatewayError) -> AppError {
        tracing::error!(
            error = %error,
            "gateway outcome unknown; booking left in payment_pending for reconciliation"
        );
        self.mark(
            key,
            AttemptUpdate::outcome(AttemptOutcome::Unknown).message(error.to_string()),
        )
        .await;

        match error {
            GatewayError::Malformed(message) => {
                AppError::UnknownGatewayStatus(format!("malformed response: {}", message))
            }
            GatewayError::Timeout => {
                AppError::GatewayUnavailable("payment gateway timed out".to_string())
            }
            other => AppError::GatewayUnavailable(other.to_string()),
        }
    }

    /// Actualiza el libro de intentos; un fallo aquí no invalida la transición
    async fn mark(&self, key: Option<Uuid>, update: AttemptUpdate) {
        let Some(key) = key else { return };
        let outcome = update.outcome;

        match self
            .store
            .record_attempt_outcome(key, update, self.clock.now())
            .await
        {
            Ok(_) => {}
            Err(AppError::NotFound(_)) => {
                tracing::debug!(idempotency_key = %key, "no recorded attempt for this payment");
            }
            Err(e) => {
                tracing::warn!(idempotency_key = %key, outcome = %outcome, error = %e, "failed to record attempt outcome");
            }
        }
    }
}

/// Respuesta a partir de un intento con resultado definitivo
fn replay(attempt: &PaymentAttempt, booking: &Booking) -> AppResult<PaymentOutcome> {
    let status = match attempt.outcome {
        AttemptOutcome::Paid => PaymentFlowStatus::Paid,
        AttemptOutcome::Failed => PaymentFlowStatus::Failed,
        AttemptOutcome::Initiated => PaymentFlowStatus::Initiated,
        AttemptOutcome::NeedsReview => {
            return Err(AppError::Conflict(
                "payment was charged but could not be applied; it is under manual review".to_string(),
            ))
        }
        AttemptOutcome::Pending | AttemptOutcome::Unknown => {
            return Err(AppError::GatewayUnavailable(
                "payment outcome is still being confirmed".to_string(),
            ))
        }
    };

    Ok(PaymentOutcome {
        status,
        booking_id: booking.id,
        booking_status: booking.status,
        gateway_payment_id: attempt.gateway_payment_id.clone(),
        transaction_url: attempt.transaction_url.clone(),
        idempotency_key: Some(attempt.idempotency_key),
        message: attempt
            .message
            .clone()
            .unwrap_or_else(|| match status {
                PaymentFlowStatus::Paid => "Payment completed".to_string(),
                PaymentFlowStatus::Failed => "Payment failed".to_string(),
                PaymentFlowStatus::Initiated => "Additional authentication required".to_string(),
            }),
    })
}

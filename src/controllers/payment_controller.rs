use validator::Validate;

use crate::dto::payment_dto::{CreatePaymentRequest, PaymentFlowResponse, VerifyPaymentRequest};
use crate::models::auth::{AuthenticatedUser, UserRole};
use crate::services::PaymentService;
use crate::state::AppState;
use crate::utils::errors::{forbidden_error, AppError};

pub struct PaymentController {
    service: PaymentService,
}

impl PaymentController {
    pub fn new(state: &AppState) -> Self {
        Self {
            service: state.payment_service(),
        }
    }

    pub async fn create_payment(
        &self,
        user: &AuthenticatedUser,
        request: CreatePaymentRequest,
    ) -> Result<PaymentFlowResponse, AppError> {
        ensure_customer(user, "pay booking")?;
        request.validate()?;

        let outcome = self
            .service
            .create_payment(
                user,
                request.booking_id,
                &request.token,
                request.idempotency_key(),
            )
            .await?;
        Ok(outcome.into())
    }

    pub async fn verify_payment(
        &self,
        user: &AuthenticatedUser,
        request: VerifyPaymentRequest,
    ) -> Result<PaymentFlowResponse, AppError> {
        ensure_customer(user, "verify payment")?;
        request.validate()?;

        let outcome = self
            .service
            .verify_payment(user, request.booking_id, request.payment_id.trim())
            .await?;
        Ok(outcome.into())
    }
}

fn ensure_customer(user: &AuthenticatedUser, operation: &str) -> Result<(), AppError> {
    if user.role == UserRole::Customer {
        Ok(())
    } else {
        Err(forbidden_error(operation, "only customers can pay their bookings"))
    }
}

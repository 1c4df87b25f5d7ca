use crate::dto::api_response::CountResponse;
use crate::models::auth::AuthenticatedUser;
use crate::services::{BookingService, PaymentService};
use crate::state::AppState;
use crate::utils::errors::AppError;

/// Disparo manual de los barridos (solo administradores)
pub struct MaintenanceController {
    bookings: BookingService,
    payments: PaymentService,
}

impl MaintenanceController {
    pub fn new(state: &AppState) -> Self {
        Self {
            bookings: state.booking_service(),
            payments: state.payment_service(),
        }
    }

    pub async fn cleanup_expired(&self, user: &AuthenticatedUser) -> Result<CountResponse, AppError> {
        user.ensure_admin("run expiry sweep")?;
        let count = self.bookings.cleanup_expired_bookings().await?;
        Ok(CountResponse { count })
    }

    pub async fn complete_active(&self, user: &AuthenticatedUser) -> Result<CountResponse, AppError> {
        user.ensure_admin("run completion sweep")?;
        let count = self.bookings.complete_active_bookings().await?;
        Ok(CountResponse { count })
    }

    pub async fn reconcile(&self, user: &AuthenticatedUser) -> Result<CountResponse, AppError> {
        user.ensure_admin("reconcile payments")?;
        let count = self.payments.reconcile_pending_payments().await?;
        Ok(CountResponse { count })
    }
}

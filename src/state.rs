//! Shared application state
//!
//! Estado compartido que se pasa a través del router de Axum. Las
//! dependencias externas van detrás de traits para poder sustituirlas en
//! los tests.

use std::sync::Arc;

use crate::clients::PaymentGateway;
use crate::config::environment::EnvironmentConfig;
use crate::repositories::BookingStore;
use crate::services::{BookingService, Notifier, PaymentService};
use crate::utils::clock::Clock;
use crate::utils::jwt::JwtConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EnvironmentConfig>,
    pub jwt: JwtConfig,
    pub store: Arc<dyn BookingStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        config: EnvironmentConfig,
        store: Arc<dyn BookingStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let jwt = JwtConfig::from(&config);
        Self {
            config: Arc::new(config),
            jwt,
            store,
            gateway,
            notifier,
            clock,
        }
    }

    pub fn booking_service(&self) -> BookingService {
        BookingService::new(
            self.store.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            self.config.payment.deadline_hours,
        )
    }

    pub fn payment_service(&self) -> PaymentService {
        PaymentService::new(
            self.store.clone(),
            self.gateway.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            self.config.payment.clone(),
            self.config.sweep.reconcile_after,
        )
    }
}

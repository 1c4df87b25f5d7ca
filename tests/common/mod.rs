//! Utilidades compartidas por los tests de integración

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use rental_booking::clients::{
    ChargeRequest, GatewayError, GatewayPayment, GatewayStatus, PaymentGateway,
};
use rental_booking::config::EnvironmentConfig;
use rental_booking::models::auth::{AuthenticatedUser, UserRole};
use rental_booking::models::booking::{Booking, DateRange, NewBooking, PreApproval, RentalType};
use rental_booking::models::car::Car;
use rental_booking::repositories::InMemoryBookingStore;
use rental_booking::services::{BookingService, InMemoryNotifier, PaymentService};
use rental_booking::state::AppState;
use rental_booking::utils::clock::ManualClock;
use rental_booking::utils::jwt::generate_token;

pub const JWT_SECRET: &str = "integration-secret";
pub const GATEWAY_TIMEOUT: Duration = Duration::from_millis(200);

/// Respuesta programada de la pasarela para el siguiente cargo
#[derive(Debug, Clone)]
pub enum Script {
    Paid,
    Initiated,
    Declined(&'static str),
    Status(&'static str),
    /// Cobra un importe distinto al solicitado
    Overcharge(i64),
    /// 4xx explícito, sin cargo
    Rejected,
    /// Cobra pero la respuesta se pierde
    LostResponse,
    Transport,
    Malformed,
    /// Nunca responde
    Hang,
}

/// Pasarela simulada: sigue un guion y recuerda los pagos por `given_id`
#[derive(Default)]
pub struct MockGateway {
    script: Mutex<VecDeque<Script>>,
    payments: Mutex<HashMap<String, GatewayPayment>>,
    charges: Mutex<Vec<ChargeRequest>>,
}

impl MockGateway {
    pub fn push(&self, step: Script) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().unwrap().clone()
    }

    pub fn payment(&self, id: &str) -> Option<GatewayPayment> {
        self.payments.lock().unwrap().get(id).cloned()
    }

    pub fn insert(&self, payment: GatewayPayment) {
        self.payments
            .lock()
            .unwrap()
            .insert(payment.id.clone(), payment);
    }

    pub fn set_status(&self, id: &str, status: GatewayStatus) {
        if let Some(payment) = self.payments.lock().unwrap().get_mut(id) {
            payment.status = status;
        }
    }

    fn record(&self, request: &ChargeRequest, status: GatewayStatus) -> GatewayPayment {
        let id = request.given_id.to_string();
        let transaction_url = matches!(status, GatewayStatus::Initiated)
            .then(|| format!("https://gateway.test/3ds/{}", id));
        let message = match &status {
            GatewayStatus::Failed => Some("Insufficient funds".to_string()),
            _ => None,
        };
        let payment = GatewayPayment {
            id,
            status,
            amount: request.amount_minor,
            currency: request.currency.clone(),
            booking_id: Some(request.booking_id),
            transaction_url,
            message,
        };
        self.insert(payment.clone());
        payment
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_payment(&self, request: &ChargeRequest) -> Result<GatewayPayment, GatewayError> {
        self.charges.lock().unwrap().push(request.clone());

        // given_id repetido: la pasarela devuelve el pago existente
        if let Some(existing) = self.payment(&request.given_id.to_string()) {
            return Ok(existing);
        }

        let step = self.script.lock().unwrap().pop_front().unwrap_or(Script::Paid);
        match step {
            Script::Paid => Ok(self.record(request, GatewayStatus::Paid)),
            Script::Initiated => Ok(self.record(request, GatewayStatus::Initiated)),
            Script::Declined(message) => {
                let mut payment = self.record(request, GatewayStatus::Failed);
                payment.message = Some(message.to_string());
                self.insert(payment.clone());
                Ok(payment)
            }
            Script::Overcharge(extra) => {
                let mut payment = self.record(request, GatewayStatus::Paid);
                payment.amount += extra;
                self.insert(payment.clone());
                Ok(payment)
            }
            Script::Status(raw) => Ok(self.record(request, GatewayStatus::parse(raw))),
            Script::Rejected => Err(GatewayError::Rejected {
                status: 422,
                message: "card number is invalid".to_string(),
            }),
            Script::LostResponse => {
                self.record(request, GatewayStatus::Paid);
                Err(GatewayError::Timeout)
            }
            Script::Transport => Err(GatewayError::Transport("connection reset".to_string())),
            Script::Malformed => Err(GatewayError::Malformed("expected value at line 1".to_string())),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(GatewayError::Timeout)
            }
        }
    }

    async fn fetch_payment(&self, id: &str) -> Result<Option<GatewayPayment>, GatewayError> {
        Ok(self.payment(id))
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn dec(raw: &str) -> Decimal {
    raw.parse().unwrap()
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

/// Entorno completo en memoria: una sucursal, un coche y sus usuarios
pub struct TestContext {
    pub store: Arc<InMemoryBookingStore>,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<InMemoryNotifier>,
    pub clock: ManualClock,
    pub state: AppState,
    pub branch_id: Uuid,
    pub car_id: Uuid,
    pub manager_id: Uuid,
    pub admin_id: Uuid,
    pub customer_id: Uuid,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_quantity(1).await
    }

    pub async fn with_quantity(quantity: i32) -> Self {
        let store = Arc::new(InMemoryBookingStore::new());
        let gateway = Arc::new(MockGateway::default());
        let notifier = Arc::new(InMemoryNotifier::new(store.clone()));
        let clock = ManualClock::new(start_time());

        let branch_id = Uuid::new_v4();
        let car_id = Uuid::new_v4();
        let manager_id = Uuid::new_v4();
        store.add_branch(branch_id, Some(manager_id)).await;
        store
            .add_car(Car {
                id: car_id,
                branch_id,
                display_name: "Toyota Camry 2024".to_string(),
                quantity,
                daily_rate: dec("100.00"),
            })
            .await;

        let mut config = EnvironmentConfig::local(JWT_SECRET);
        config.payment.timeout = GATEWAY_TIMEOUT;

        let state = AppState::new(
            config,
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            Arc::new(clock.clone()),
        );

        Self {
            store,
            gateway,
            notifier,
            clock,
            state,
            branch_id,
            car_id,
            manager_id,
            admin_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
        }
    }

    pub fn bookings(&self) -> BookingService {
        self.state.booking_service()
    }

    pub fn payments(&self) -> PaymentService {
        self.state.payment_service()
    }

    pub fn customer(&self) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: self.customer_id,
            role: UserRole::Customer,
            branch_id: None,
        }
    }

    pub fn token(&self, user_id: Uuid, role: UserRole, branch_id: Option<Uuid>) -> String {
        generate_token(user_id, role, branch_id, &self.state.jwt).unwrap()
    }

    pub fn customer_token(&self) -> String {
        self.token(self.customer_id, UserRole::Customer, None)
    }

    pub fn manager_token(&self) -> String {
        self.token(self.manager_id, UserRole::BranchManager, Some(self.branch_id))
    }

    pub fn admin_token(&self) -> String {
        self.token(self.admin_id, UserRole::Admin, None)
    }

    pub fn new_booking(&self, customer_id: Uuid, start: NaiveDate, end: NaiveDate) -> NewBooking {
        NewBooking {
            branch_id: self.branch_id,
            car_id: self.car_id,
            customer_id,
            daily_rate: dec("100.00"),
            range: DateRange::new(start, end).unwrap(),
            rental_type: RentalType::Daily,
            discount_amount: Decimal::ZERO,
            notes: None,
            pre_approval: None,
        }
    }

    /// Reserva de 3 días (300.00) ya aprobada con plazo de 24h
    pub async fn confirmed_booking(&self) -> Booking {
        let mut new = self.new_booking(self.customer_id, date(2024, 6, 10), date(2024, 6, 13));
        new.pre_approval = Some(PreApproval {
            approved_by: self.manager_id,
            deadline_hours: 24,
        });
        self.bookings().create_booking(new).await.unwrap()
    }

    pub async fn booking(&self, id: Uuid) -> Booking {
        self.bookings().get_booking(id).await.unwrap()
    }
}

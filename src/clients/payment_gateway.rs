//! Cliente HTTP para la pasarela de pago (API Moyasar)
//!
//! Crea cargos con tarjeta tokenizada y consulta su estado. El `given_id`
//! de cada cargo es la clave de idempotencia del intento, así que la propia
//! pasarela deduplica los reintentos.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::config::environment::PaymentConfig;
use crate::utils::errors::{AppError, AppResult};

/// Errores de transporte con la pasarela
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway transport error: {0}")]
    Transport(String),

    /// Rechazo definitivo: el cargo no se realizó
    #[error("gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Solo un rechazo explícito garantiza que no hubo cargo
    pub fn is_definite(&self) -> bool {
        matches!(self, GatewayError::Rejected { .. })
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Malformed(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// Estado de un pago en la pasarela
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Paid,
    /// Pendiente de 3-D Secure
    Initiated,
    Failed,
    Other(String),
}

impl GatewayStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paid" => GatewayStatus::Paid,
            "initiated" => GatewayStatus::Initiated,
            "failed" => GatewayStatus::Failed,
            other => GatewayStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            GatewayStatus::Paid => "paid",
            GatewayStatus::Initiated => "initiated",
            GatewayStatus::Failed => "failed",
            GatewayStatus::Other(s) => s,
        }
    }
}

/// Pago tal como lo reporta la pasarela
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayPayment {
    pub id: String,
    pub status: GatewayStatus,
    /// Importe en unidades menores
    pub amount: i64,
    pub currency: String,
    pub booking_id: Option<Uuid>,
    pub transaction_url: Option<String>,
    pub message: Option<String>,
}

/// Solicitud de cargo
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub given_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub callback_url: Option<String>,
    pub token: String,
    pub booking_id: Uuid,
    pub customer_id: Uuid,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(&self, request: &ChargeRequest) -> Result<GatewayPayment, GatewayError>;

    /// `Ok(None)` si la pasarela no conoce el pago (404)
    async fn fetch_payment(&self, payment_id: &str) -> Result<Option<GatewayPayment>, GatewayError>;
}

#[derive(Debug, Serialize)]
struct CreatePaymentBody<'a> {
    given_id: Uuid,
    amount: i64,
    currency: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    source: TokenSource<'a>,
    metadata: ChargeMetadata,
}

#[derive(Debug, Serialize)]
struct TokenSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    token: &'a str,
}

#[derive(Debug, Serialize)]
struct ChargeMetadata {
    booking_id: Uuid,
    customer_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct RawPayment {
    id: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    source: Option<RawSource>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSource {
    #[serde(default)]
    transaction_url: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Option<Value>,
}

impl GatewayPayment {
    /// Interpreta el cuerpo JSON de un pago
    pub fn from_json(body: &str) -> Result<Self, GatewayError> {
        let raw: RawPayment =
            serde_json::from_str(body).map_err(|e| GatewayError::Malformed(e.to_string()))?;

        let booking_id = raw
            .metadata
            .as_ref()
            .and_then(|m| m.get("booking_id"))
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());
        let source = raw.source.unwrap_or_default();

        Ok(Self {
            id: raw.id,
            status: GatewayStatus::parse(&raw.status),
            amount: raw.amount,
            currency: raw.currency,
            booking_id,
            transaction_url: source.transaction_url,
            message: source.message,
        })
    }
}

fn rejection(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<RawError>(body)
        .ok()
        .and_then(|e| match (e.message, e.errors) {
            (Some(message), Some(errors)) => Some(format!("{} {}", message, errors)),
            (Some(message), None) => Some(message),
            (None, Some(errors)) => Some(errors.to_string()),
            (None, None) => None,
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("rejected").to_string());

    GatewayError::Rejected {
        status: status.as_u16(),
        message,
    }
}

/// Cliente de la API Moyasar
pub struct MoyasarGateway {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl MoyasarGateway {
    pub fn new(config: &PaymentConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn payments_url(&self) -> String {
        format!("{}/v1/payments", self.base_url)
    }
}

#[async_trait]
impl PaymentGateway for MoyasarGateway {
    async fn create_payment(&self, request: &ChargeRequest) -> Result<GatewayPayment, GatewayError> {
        let body = CreatePaymentBody {
            given_id: request.given_id,
            amount: request.amount_minor,
            currency: &request.currency,
            description: &request.description,
            callback_url: request.callback_url.as_deref(),
            source: TokenSource {
                kind: "token",
                token: &request.token,
            },
            metadata: ChargeMetadata {
                booking_id: request.booking_id,
                customer_id: request.customer_id,
            },
        };

        let response = self
            .client
            .post(self.payments_url())
            .basic_auth(&self.secret_key, Some(""))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            GatewayPayment::from_json(&text)
        } else if status.is_client_error() {
            Err(rejection(status, &text))
        } else {
            Err(GatewayError::Transport(format!("gateway returned {}", status)))
        }
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<Option<GatewayPayment>, GatewayError> {
        let response = self
            .client
            .get(format!("{}/{}", self.payments_url(), payment_id))
            .basic_auth(&self.secret_key, Some(""))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let text = response.text().await?;
        if status.is_success() {
            GatewayPayment::from_json(&text).map(Some)
        } else if status.is_client_error() {
            Err(rejection(status, &text))
        } else {
            Err(GatewayError::Transport(format!("gateway returned {}", status)))
        }
    }
}

//! Sistema de manejo de errores
//!
//! Este módulo define todos los tipos de errores del núcleo de reservas
//! y su conversión a respuestas HTTP apropiadas.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::booking::BookingStatus;

/// Errores principales de la aplicación
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid date range: end date must be after start date")]
    InvalidDateRange,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: booking is {current}, {operation} requires {expected}")]
    InvalidState {
        operation: &'static str,
        current: BookingStatus,
        expected: String,
    },

    #[error("Capacity exceeded: no units of this car are available for the requested dates")]
    CapacityExceeded,

    #[error("Refund exceeds available amount: requested {requested}, available {available}")]
    RefundExceedsAvailable {
        requested: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    #[error("Amount mismatch: charged {charged}, booking requires {expected}")]
    AmountMismatch {
        charged: rust_decimal::Decimal,
        expected: rust_decimal::Decimal,
    },

    #[error("Unknown gateway status: {0}")]
    UnknownGatewayStatus(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Código estable para el cliente
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DB_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::InvalidDateRange => "INVALID_DATE_RANGE",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::InvalidState { .. } => "INVALID_STATE",
            AppError::CapacityExceeded => "CAPACITY_EXCEEDED",
            AppError::RefundExceedsAvailable { .. } => "REFUND_EXCEEDS_AVAILABLE",
            AppError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            AppError::UnknownGatewayStatus(_) => "UNKNOWN_GATEWAY_STATUS",
            AppError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) | AppError::InvalidDateRange => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_)
            | AppError::InvalidState { .. }
            | AppError::CapacityExceeded
            | AppError::RefundExceedsAvailable { .. }
            | AppError::AmountMismatch { .. } => StatusCode::CONFLICT,
            AppError::UnknownGatewayStatus(_) => StatusCode::BAD_GATEWAY,
            AppError::GatewayUnavailable(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Database(_) | AppError::Configuration(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Errores esperados del dominio (no son fallos del sistema)
    pub fn is_expected(&self) -> bool {
        !matches!(
            self,
            AppError::Database(_) | AppError::Configuration(_) | AppError::Internal(_)
        )
    }
}

/// Respuesta de error para la API
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        if self.is_expected() {
            tracing::debug!(code, error = %self, "request rejected");
        } else {
            tracing::error!(code, error = %self, "request failed");
        }

        let (message, details) = match &self {
            AppError::Database(_) => (
                "An error occurred while accessing the database".to_string(),
                None,
            ),
            AppError::Internal(_) | AppError::Configuration(_) => {
                ("An unexpected error occurred".to_string(), None)
            }
            AppError::Validation(e) => (
                "The provided data is invalid".to_string(),
                Some(json!(e)),
            ),
            AppError::InvalidState {
                current, expected, ..
            } => (
                self.to_string(),
                Some(json!({ "current_status": current, "expected": expected })),
            ),
            AppError::RefundExceedsAvailable {
                requested,
                available,
            } => (
                self.to_string(),
                Some(json!({ "requested": requested, "available": available })),
            ),
            _ => (self.to_string(), None),
        };

        let body = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message,
            details,
            code,
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Resultado tipado para operaciones que pueden fallar
pub type AppResult<T> = Result<T, AppError>;

/// Función helper para crear errores de recurso no encontrado
pub fn not_found_error(resource: &str, id: &impl std::fmt::Display) -> AppError {
    AppError::NotFound(format!("{} with id '{}' not found", resource, id))
}

/// Función helper para crear errores de acceso prohibido
pub fn forbidden_error(operation: &str, reason: &str) -> AppError {
    AppError::Forbidden(format!("Cannot {}: {}", operation, reason))
}

/// Función helper para crear errores de estado inválido
pub fn invalid_state(
    operation: &'static str,
    current: BookingStatus,
    expected: &[BookingStatus],
) -> AppError {
    let expected = expected
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" or ");
    AppError::InvalidState {
        operation,
        current,
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::InvalidDateRange.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::CapacityExceeded.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::GatewayUnavailable("timeout".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::UnknownGatewayStatus("authorized".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_invalid_state_message() {
        let err = invalid_state(
            "approve",
            BookingStatus::Confirmed,
            &[BookingStatus::Pending],
        );
        assert_eq!(err.code(), "INVALID_STATE");
        assert!(err.to_string().contains("confirmed"));
        assert!(err.to_string().contains("pending"));
        assert!(err.is_expected());
    }
}

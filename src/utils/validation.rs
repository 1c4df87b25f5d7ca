//! Utilidades de validación
//!
//! Validadores personalizados usados por los DTOs con `#[validate(custom = ...)]`.

use rust_decimal::Decimal;
use uuid::Uuid;
use validator::ValidationError;

/// Validar que un string no esté vacío
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut error = ValidationError::new("not_blank");
        error.message = Some("must not be blank".into());
        return Err(error);
    }
    Ok(())
}

/// Validar que un string sea un UUID
pub fn validate_uuid(value: &str) -> Result<(), ValidationError> {
    Uuid::parse_str(value).map(|_| ()).map_err(|_| {
        let mut error = ValidationError::new("uuid");
        error.add_param("value".into(), &value.to_string());
        error.message = Some("must be a UUID".into());
        error
    })
}

/// Validar importe estrictamente positivo
pub fn validate_positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        let mut error = ValidationError::new("positive_amount");
        error.add_param("actual".into(), &value.to_string());
        return Err(error);
    }
    Ok(())
}

/// Validar importe mayor o igual que cero
pub fn validate_non_negative_amount(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut error = ValidationError::new("non_negative_amount");
        error.add_param("actual".into(), &value.to_string());
        return Err(error);
    }
    Ok(())
}

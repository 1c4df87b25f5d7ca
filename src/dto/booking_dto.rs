use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::booking::{Booking, BookingStatus, RentalType};
use crate::models::car::Availability;
use crate::utils::validation::{
    validate_non_negative_amount, validate_not_blank, validate_positive_amount,
};

// Request para crear una reserva
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub branch_id: Uuid,
    pub car_id: Uuid,
    /// Solo el personal puede reservar en nombre de un cliente
    pub customer_id: Option<Uuid>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub rental_type: RentalType,
    /// Por defecto la tarifa del coche; solo el personal puede cambiarla
    #[validate(custom = "validate_positive_amount")]
    pub daily_rate: Option<Decimal>,
    #[serde(default)]
    #[validate(custom = "validate_non_negative_amount")]
    pub discount_amount: Decimal,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    pub initial_status: Option<BookingStatus>,
    #[validate(range(min = 1, max = 720))]
    pub payment_deadline_hours: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ApproveBookingRequest {
    #[validate(range(min = 1, max = 720))]
    pub payment_deadline_hours: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RejectBookingRequest {
    #[validate(custom = "validate_not_blank", length(max = 1000))]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingRequest {
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

// Response de reserva
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub car_id: Uuid,
    pub customer_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rental_type: RentalType,
    pub daily_rate: Decimal,
    pub total_days: i32,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub status: BookingStatus,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub rejection_reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            branch_id: b.branch_id,
            car_id: b.car_id,
            customer_id: b.customer_id,
            start_date: b.start_date,
            end_date: b.end_date,
            rental_type: b.rental_type,
            daily_rate: b.daily_rate,
            total_days: b.total_days,
            total_amount: b.total_amount,
            discount_amount: b.discount_amount,
            final_amount: b.final_amount,
            status: b.status,
            approved_by: b.approved_by,
            approved_at: b.approved_at,
            expires_at: b.expires_at,
            payment_reference: b.payment_reference,
            rejection_reason: b.rejection_reason,
            notes: b.notes,
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub car_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub available: bool,
    pub available_quantity: i64,
    pub total_quantity: i32,
}

impl AvailabilityResponse {
    pub fn new(availability: Availability, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            car_id: availability.car_id,
            start_date,
            end_date,
            available: availability.is_available(),
            available_quantity: availability.available,
            total_quantity: availability.quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_request_camel_case_and_defaults() {
        let request: CreateBookingRequest = serde_json::from_value(json!({
            "branchId": Uuid::new_v4(),
            "carId": Uuid::new_v4(),
            "startDate": "2024-06-01",
            "endDate": "2024-06-05"
        }))
        .unwrap();

        assert_eq!(request.rental_type, RentalType::Daily);
        assert_eq!(request.daily_rate, None);
        assert_eq!(request.discount_amount, Decimal::ZERO);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_create_request_rejects_bad_rate_and_deadline() {
        let request: CreateBookingRequest = serde_json::from_value(json!({
            "branchId": Uuid::new_v4(),
            "carId": Uuid::new_v4(),
            "startDate": "2024-06-01",
            "endDate": "2024-06-05",
            "dailyRate": 0,
            "discountAmount": -5,
            "paymentDeadlineHours": 0
        }))
        .unwrap();

        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("daily_rate"));
        assert!(fields.contains_key("discount_amount"));
        assert!(fields.contains_key("payment_deadline_hours"));
    }

    #[test]
    fn test_reject_requires_reason() {
        let request = RejectBookingRequest {
            reason: "  ".to_string(),
        };
        assert!(request.validate().is_err());
    }
}

//! DTOs de la API HTTP (JSON en camelCase)

pub mod api_response;
pub mod booking_dto;
pub mod payment_dto;

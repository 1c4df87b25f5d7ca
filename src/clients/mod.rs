//! Clients - HTTP Clients for External APIs
//!
//! This module contains the HTTP client for the payment gateway.

pub mod payment_gateway;

// Re-export main types for convenience
pub use payment_gateway::{
    ChargeRequest, GatewayError, GatewayPayment, GatewayStatus, MoyasarGateway, PaymentGateway,
};

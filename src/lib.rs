//! Núcleo de reservas de alquiler de coches
//!
//! Ciclo de vida de la reserva, cobro con pasarela externa, liquidación,
//! reembolsos y barridos de mantenimiento.

pub mod clients;
pub mod config;
pub mod controllers;
pub mod database;
pub mod dto;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

use axum::{middleware::from_fn_with_state, response::Json, routing::get, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::middleware::{auth_middleware, cors_middleware};
use crate::state::AppState;

/// Router completo con autenticación, CORS y trazas
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(routes::payment_routes::create_checkout_router())
        .nest("/api/bookings", routes::booking_routes::create_booking_router())
        .nest("/api/payments", routes::payment_routes::create_payment_router())
        .nest("/api/cars", routes::car_routes::create_car_router())
        .nest("/api/maintenance", routes::maintenance_routes::create_maintenance_router())
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(cors_middleware(&state.config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "rental_booking",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

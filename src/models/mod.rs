//! Modelos del sistema
//!
//! Este módulo contiene todos los modelos de datos que mapean exactamente
//! al schema PostgreSQL, junto con las reglas de transición de cada entidad.

pub mod auth;
pub mod booking;
pub mod car;
pub mod notification;
pub mod payment;

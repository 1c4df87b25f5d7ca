//! Configuración del proyecto
//!
//! Este módulo contiene la configuración de base de datos, variables de entorno,
//! pasarela de pago y barrido periódico.

pub mod database;
pub mod environment;

pub use environment::*;

//! Utilidades del sistema
//!
//! Este módulo contiene utilidades para manejo de errores, validación,
//! JWT, reloj inyectable e importes.

pub mod clock;
pub mod errors;
pub mod jwt;
pub mod money;
pub mod validation;

//! Configuración de variables de entorno
//!
//! Este módulo maneja la configuración del entorno, la pasarela de pago
//! y los intervalos de los procesos de mantenimiento.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::errors::{AppError, AppResult};

/// Configuración de la pasarela de pago
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub gateway_url: String,
    pub secret_key: String,
    pub currency: String,
    pub callback_url: Option<String>,
    pub timeout: Duration,
    /// Plazo de pago por defecto al aprobar una reserva
    pub deadline_hours: i64,
}

/// Configuración del barrido periódico
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    /// Antigüedad mínima de un intento ambiguo antes de conciliarlo
    pub reconcile_after: Duration,
}

/// Configuración del entorno
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub environment: String,
    pub port: u16,
    pub host: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub cors_origins: Vec<String>,
    pub payment: PaymentConfig,
    pub sweep: SweepConfig,
}

fn required(name: &str) -> AppResult<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Configuration(format!("{} must be set", name)))
}

fn optional_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed_or<T: FromStr>(name: &str, default: T) -> AppResult<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            AppError::Configuration(format!("{} must be a valid number, got '{}'", name, raw))
        }),
        _ => Ok(default),
    }
}

impl EnvironmentConfig {
    /// Carga la configuración desde variables de entorno
    pub fn from_env() -> AppResult<Self> {
        let deadline_hours: i64 = parsed_or("PAYMENT_DEADLINE_HOURS", 24)?;
        if deadline_hours <= 0 {
            return Err(AppError::Configuration(
                "PAYMENT_DEADLINE_HOURS must be positive".to_string(),
            ));
        }

        let sweep_interval: u64 = parsed_or("SWEEP_INTERVAL_SECS", 300)?;
        if sweep_interval == 0 {
            return Err(AppError::Configuration(
                "SWEEP_INTERVAL_SECS must be positive".to_string(),
            ));
        }

        Ok(Self {
            environment: optional_or("ENVIRONMENT", "development"),
            port: parsed_or("PORT", 3000)?,
            host: optional_or("HOST", "0.0.0.0"),
            database_url: required("DATABASE_URL")?,
            db_max_connections: parsed_or("DB_MAX_CONNECTIONS", 20)?,
            jwt_secret: required("JWT_SECRET")?,
            cors_origins: optional_or("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            payment: PaymentConfig {
                gateway_url: optional_or("PAYMENT_GATEWAY_URL", "https://api.moyasar.com"),
                secret_key: required("PAYMENT_GATEWAY_SECRET_KEY")?,
                currency: optional_or("PAYMENT_CURRENCY", "SAR").to_uppercase(),
                callback_url: env::var("PAYMENT_CALLBACK_URL")
                    .ok()
                    .filter(|v| !v.trim().is_empty()),
                timeout: Duration::from_secs(parsed_or("PAYMENT_GATEWAY_TIMEOUT_SECS", 15)?),
                deadline_hours,
            },
            sweep: SweepConfig {
                interval: Duration::from_secs(sweep_interval),
                reconcile_after: Duration::from_secs(parsed_or("RECONCILE_AFTER_SECS", 600)?),
            },
        })
    }

    /// Verificar si estamos en modo desarrollo
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Verificar si estamos en modo producción
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Obtener la dirección del servidor
    pub fn server_url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Configuración mínima sin leer el entorno (tests y herramientas)
    pub fn local(jwt_secret: &str) -> Self {
        Self {
            environment: "test".to_string(),
            port: 0,
            host: "127.0.0.1".to_string(),
            database_url: String::new(),
            db_max_connections: 5,
            jwt_secret: jwt_secret.to_string(),
            cors_origins: vec!["*".to_string()],
            payment: PaymentConfig {
                gateway_url: "http://127.0.0.1:0".to_string(),
                secret_key: "sk_test".to_string(),
                currency: "SAR".to_string(),
                callback_url: None,
                timeout: Duration::from_secs(15),
                deadline_hours: 24,
            },
            sweep: SweepConfig {
                interval: Duration::from_secs(300),
                reconcile_after: Duration::from_secs(600),
            },
        }
    }
}

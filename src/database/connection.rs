//! Configuración de conexión a PostgreSQL
//!
//! Crea el pool y aplica las migraciones del esquema de reservas.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::config::database::DatabaseConfig;

/// Crear el pool y ejecutar las migraciones pendientes
pub async fn connect_and_migrate(config: &DatabaseConfig) -> Result<PgPool> {
    tracing::info!(
        database = %mask_database_url(&config.url),
        max_connections = config.max_connections,
        "connecting to database"
    );

    let pool = config
        .create_pool()
        .await
        .context("failed to connect to the database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    Ok(pool)
}

/// Enmascara las credenciales de la URL de la base de datos en logs
fn mask_database_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at_pos)) if at_pos > scheme_end => {
            format!("{}***:***@{}", &url[..scheme_end + 3], &url[at_pos + 1..])
        }
        _ => url.to_string(),
    }
}

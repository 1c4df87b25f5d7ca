use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rental_booking::{
    build_router,
    clients::MoyasarGateway,
    config::{database::DatabaseConfig, EnvironmentConfig},
    database::connect_and_migrate,
    repositories::{PgBookingRepository, PgNotifier},
    services::spawn_sweeper,
    state::AppState,
    utils::clock::SystemClock,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Cargar variables de entorno
    dotenv().ok();

    // Configurar logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚗 Rental Booking - núcleo de reservas y pagos");

    let config = EnvironmentConfig::from_env().map_err(|e| {
        error!("❌ Configuración inválida: {}", e);
        anyhow::anyhow!("invalid configuration: {}", e)
    })?;

    let pool = match connect_and_migrate(&DatabaseConfig::from(&config)).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("❌ Error conectando a la base de datos: {:#}", e);
            return Err(e);
        }
    };
    info!("✅ Base de datos lista");

    let gateway = MoyasarGateway::new(&config.payment)
        .map_err(|e| anyhow::anyhow!("payment gateway client: {}", e))?;

    let addr: SocketAddr = config.server_url().parse()?;
    let sweep_interval = config.sweep.interval;
    if !config.is_production() && config.cors_origins.iter().any(|o| o == "*") {
        warn!("⚠️ CORS abierto a cualquier origen");
    }

    let state = AppState::new(
        config,
        Arc::new(PgBookingRepository::new(pool.clone())),
        Arc::new(gateway),
        Arc::new(PgNotifier::new(pool)),
        Arc::new(SystemClock),
    );

    let sweeper = spawn_sweeper(state.booking_service(), state.payment_service(), sweep_interval);
    info!(interval_secs = sweep_interval.as_secs(), "🧹 Barrido de mantenimiento iniciado");

    let app = build_router(state);

    info!("🌐 Servidor iniciando en http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    if let Err(e) = served {
        error!("❌ Servidor terminó con error: {}", e);
        return Err(e.into());
    }

    info!("👋 Servidor terminado");
    Ok(())
}

/// Señal de apagado graceful
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("❌ No se pudo escuchar Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("❌ No se pudo instalar el manejador de señales: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("🛑 Señal Ctrl+C recibida, apagando servidor...");
        },
        _ = terminate => {
            info!("🛑 Señal de terminación recibida, apagando servidor...");
        },
    }
}

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use tour_booking_server::config::Config;
use tour_booking_server::notify::build_notifier;
use tour_booking_server::routes::create_app;
use tour_booking_server::state::AppState;
use tour_booking_server::store::PgStore;

#[tokio::main]
async fn main() {
    dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let pool = match PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            std::process::exit(2);
        }
    };
    tracing::info!("Successfully connected to database");

    if let Err(e) = sqlx::migrate!().run(&pool).await {
        tracing::error!(error = %e, "Failed to run migrations");
        std::process::exit(2);
    }
    tracing::info!("Migrations run successfully");

    let notifier = build_notifier(config.operator_mail.as_ref()).await;
    let state = match AppState::from_config(&config, Arc::new(PgStore::new(pool)), notifier) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialise payment gateways");
            std::process::exit(2);
        }
    };
    tracing::info!(gateways = ?state.gateways.methods(), "Payment gateways ready");

    let app = create_app(state, &config);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "Invalid listen address");
            std::process::exit(2);
        }
    };
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "Failed to bind address");
            std::process::exit(2);
        }
    };
    tracing::info!("Server running at http://{}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

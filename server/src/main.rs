use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use booking_server::auth::HttpAuthenticator;
use booking_server::config::Config;
use booking_server::notifications::{OutboxTrigger, ResendEmailClient};
use booking_server::payments::StripeClient;
use booking_server::routes::{create_routes, AppState};
use booking_server::store::PgLedger;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    tracing::info!("Successfully connected to database");

    sqlx::migrate!().run(&pool).await?;

    tracing::info!("Migrations run successfully");

    let ledger = Arc::new(PgLedger::new(pool));
    let trigger = OutboxTrigger::new();
    let state = AppState::new(
        &config,
        ledger,
        Arc::new(StripeClient::new(&config.stripe)),
        Arc::new(ResendEmailClient::new(&config.email)),
        Arc::new(HttpAuthenticator::new(&config.auth_api_base)),
        trigger.clone(),
    );

    state
        .outbox
        .clone()
        .spawn(config.outbox_poll_interval, trigger);
    tracing::info!(
        interval_secs = config.outbox_poll_interval.as_secs(),
        "Notification outbox processor started"
    );

    let app: Router = create_routes(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server running at http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

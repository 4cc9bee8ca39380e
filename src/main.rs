mod admin;
mod app;
mod auth;
mod config;
mod db;
mod error;
mod mail;
mod security;
mod state;
mod users;

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(config.json_logs);

    if config.uses_dev_secret() {
        tracing::warn!("JWT_SECRET not set; signing tokens with the development secret");
    }
    tracing::info!(
        environment = ?config.environment,
        allowed_hosts = ?config.allowed_hosts,
        "configuration loaded"
    );

    let state = AppState::init(config).await?;
    let app = app::build_app(state.clone());
    app::serve(app, &state.config).await
}

fn init_tracing(json_logs: bool) {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "smartpay=debug,axum=info,tower_http=info".to_string());

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

use crate::config::AppConfig;
use crate::db::{self, Store};
use crate::mail::{self, Mailer};
use anyhow::Context;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let store = db::connect(&config.database)
            .await
            .context("connect to database")?;
        store.migrate().await.context("run database migrations")?;

        let mailer = mail::from_config(&config.email)?;

        Ok(Self::from_parts(store, config, mailer))
    }

    pub fn from_parts(
        store: Arc<dyn Store>,
        config: Arc<AppConfig>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            store,
            config,
            mailer,
        }
    }

    /// In-memory SQLite, permissive hosts and a console mailer.
    #[cfg(test)]
    pub async fn fake() -> Self {
        use crate::config::{DatabaseConfig, EmailConfig, Environment, JwtConfig};
        use crate::security::AllowedHosts;

        let config = AppConfig {
            environment: Environment::Development,
            host: "127.0.0.1".into(),
            port: 0,
            json_logs: false,
            database: DatabaseConfig::Url("sqlite::memory:".into()),
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            email: EmailConfig {
                from: "webmaster@localhost".into(),
                smtp: None,
            },
            allowed_hosts: AllowedHosts::new(["*"]),
            cors_origins: Vec::new(),
        };

        Self::init(config).await.expect("test state")
    }
}

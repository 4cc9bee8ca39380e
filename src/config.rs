use std::{path::PathBuf, str::FromStr};

use anyhow::{bail, Context};
use sqlx::postgres::PgConnectOptions;

use crate::security::AllowedHosts;

pub const DEV_JWT_SECRET: &str = "dev-insecure-jwt-secret-change-me";

const DEV_ALLOWED_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "0.0.0.0"];
const VERCEL_HOSTS: [&str; 5] = [
    ".vercel.app",
    ".vercel.com",
    "smartpay-assist-ai.vercel.app",
    "localhost",
    "127.0.0.1",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "dev" | "development" => Ok(Self::Development),
            "prod" | "production" => Ok(Self::Production),
            other => bail!("unknown APP_ENV {other:?} (expected development or production)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseConfig {
    Postgres {
        name: String,
        user: String,
        password: String,
        host: String,
        port: u16,
    },
    Sqlite {
        path: PathBuf,
    },
    /// `DATABASE_URL`, used verbatim.
    Url(String),
}

impl DatabaseConfig {
    pub fn pg_options(&self) -> anyhow::Result<PgConnectOptions> {
        match self {
            DatabaseConfig::Postgres {
                name,
                user,
                password,
                host,
                port,
            } => Ok(PgConnectOptions::new()
                .host(host)
                .port(*port)
                .username(user)
                .password(password)
                .database(name)),
            DatabaseConfig::Url(url) => url
                .parse::<PgConnectOptions>()
                .context("parse DATABASE_URL"),
            DatabaseConfig::Sqlite { .. } => bail!("sqlite configuration has no postgres options"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailConfig {
    pub from: String,
    /// `None` writes mail to the log instead of sending it.
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub json_logs: bool,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub email: EmailConfig,
    pub allowed_hosts: AllowedHosts,
    /// Only consulted in production; development allows every origin.
    pub cors_origins: Vec<String>,
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: Lookup<'_>) -> anyhow::Result<Self> {
        let environment: Environment = get("APP_ENV").unwrap_or_default().parse()?;
        let production = environment.is_production();

        let database = match get("DATABASE_URL").filter(|url| !url.is_empty()) {
            Some(url) => DatabaseConfig::Url(url),
            None if production => DatabaseConfig::Postgres {
                name: required(get, "DB_NAME")?,
                user: required(get, "DB_USER")?,
                password: required(get, "DB_PASSWORD")?,
                host: required(get, "DB_HOST")?,
                port: parsed(get, "DB_PORT", 5432)?,
            },
            None if flag(get, "USE_SQLITE", false)? => DatabaseConfig::Sqlite {
                path: PathBuf::from(or_default(get, "SQLITE_PATH", "db.sqlite3")),
            },
            None => DatabaseConfig::Postgres {
                name: or_default(get, "DB_NAME", "smartpay_db"),
                user: or_default(get, "DB_USER", "postgres"),
                password: or_default(get, "DB_PASSWORD", "password"),
                host: or_default(get, "DB_HOST", "localhost"),
                port: parsed(get, "DB_PORT", 5432)?,
            },
        };

        let jwt = JwtConfig {
            secret: if production {
                required(get, "JWT_SECRET")?
            } else {
                or_default(get, "JWT_SECRET", DEV_JWT_SECRET)
            },
            issuer: or_default(get, "JWT_ISSUER", "smartpay"),
            audience: or_default(get, "JWT_AUDIENCE", "smartpay-users"),
            ttl_minutes: parsed(get, "JWT_TTL_MINUTES", 5)?,
            refresh_ttl_minutes: parsed(get, "JWT_REFRESH_TTL_MINUTES", 60 * 24)?,
        };

        let email = if production {
            EmailConfig {
                from: required(get, "DEFAULT_FROM_EMAIL")?,
                smtp: Some(SmtpConfig {
                    host: required(get, "EMAIL_HOST")?,
                    port: parsed(get, "EMAIL_PORT", 587)?,
                    use_tls: flag(get, "EMAIL_USE_TLS", true)?,
                    user: required(get, "EMAIL_HOST_USER")?,
                    password: required(get, "EMAIL_HOST_PASSWORD")?,
                }),
            }
        } else {
            EmailConfig {
                from: or_default(get, "DEFAULT_FROM_EMAIL", "webmaster@localhost"),
                smtp: None,
            }
        };

        let allowed_hosts = if production {
            production_hosts(get)
        } else {
            AllowedHosts::new(DEV_ALLOWED_HOSTS)
        };

        let cors_origins = get("CORS_ALLOWED_ORIGINS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        let json_logs = match get("LOG_FORMAT") {
            Some(format) => format.eq_ignore_ascii_case("json"),
            None => production,
        };

        Ok(Self {
            environment,
            host: or_default(get, "APP_HOST", "0.0.0.0"),
            port: parsed(get, "APP_PORT", 8080)?,
            json_logs,
            database,
            jwt,
            email,
            allowed_hosts,
            cors_origins,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt.secret == DEV_JWT_SECRET
    }
}

fn production_hosts(get: Lookup<'_>) -> AllowedHosts {
    let mut hosts = match get("ALLOWED_HOSTS").filter(|raw| !raw.is_empty()) {
        Some(raw) => split_list(&raw),
        None => vec!["*".to_string()],
    };
    if let Some(url) = get("VERCEL_URL") {
        hosts.push(url);
    }
    if get("VERCEL_ENV").is_some() {
        hosts.extend(VERCEL_HOSTS.iter().map(|h| h.to_string()));
    }
    AllowedHosts::new(hosts)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn required(get: Lookup<'_>, key: &str) -> anyhow::Result<String> {
    get(key).with_context(|| format!("missing required environment variable {key}"))
}

fn or_default(get: Lookup<'_>, key: &str, default: &str) -> String {
    get(key).unwrap_or_else(|| default.to_string())
}

fn parsed<T>(get: Lookup<'_>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value {raw:?} for {key}: {e}")),
        None => Ok(default),
    }
}

fn flag(get: Lookup<'_>, key: &str, default: bool) -> anyhow::Result<bool> {
    match get(key) {
        Some(raw) => parse_bool(&raw).with_context(|| format!("invalid boolean for {key}")),
        None => Ok(default),
    }
}

pub fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" | "" => Ok(false),
        other => bail!("not a boolean: {other:?}"),
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;

use crate::config::DatabaseConfig;

/// Generates a `Store` impl for a struct with a `pool` field. The SQL is
/// written once and shared by every backend; it sticks to the subset that
/// Postgres and SQLite both accept (`$n` binds, `RETURNING`, `ON CONFLICT`).
macro_rules! sql_store {
    ($store:ty) => {
        #[async_trait::async_trait]
        impl crate::db::Store for $store {
            async fn migrate(&self) -> Result<(), crate::db::StoreError> {
                Self::migrator()
                    .run(&self.pool)
                    .await
                    .map_err(|e| crate::db::StoreError::Database(e.into()))
            }

            async fn create_user(
                &self,
                new: crate::db::NewUser<'_>,
            ) -> Result<crate::db::User, crate::db::StoreError> {
                sqlx::query_as::<_, crate::db::User>(
                    r#"
                    INSERT INTO users (email, password_hash, first_name, last_name, is_active, is_staff, date_joined)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    RETURNING id, email, password_hash, first_name, last_name, is_active, is_staff, date_joined
                    "#,
                )
                .bind(new.email)
                .bind(new.password_hash)
                .bind(new.first_name)
                .bind(new.last_name)
                .bind(true)
                .bind(new.is_staff)
                .bind(time::OffsetDateTime::now_utc())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| crate::db::StoreError::from_insert(e, "email"))
            }

            async fn find_user_by_email(
                &self,
                email: &str,
            ) -> Result<Option<crate::db::User>, crate::db::StoreError> {
                let user = sqlx::query_as::<_, crate::db::User>(
                    r#"
                    SELECT id, email, password_hash, first_name, last_name, is_active, is_staff, date_joined
                    FROM users
                    WHERE email = $1
                    "#,
                )
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
                Ok(user)
            }

            async fn find_user_by_id(
                &self,
                id: i64,
            ) -> Result<Option<crate::db::User>, crate::db::StoreError> {
                let user = sqlx::query_as::<_, crate::db::User>(
                    r#"
                    SELECT id, email, password_hash, first_name, last_name, is_active, is_staff, date_joined
                    FROM users
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
                Ok(user)
            }

            async fn set_user_active(
                &self,
                id: i64,
                active: bool,
            ) -> Result<crate::db::User, crate::db::StoreError> {
                sqlx::query_as::<_, crate::db::User>(
                    r#"
                    UPDATE users SET is_active = $2
                    WHERE id = $1
                    RETURNING id, email, password_hash, first_name, last_name, is_active, is_staff, date_joined
                    "#,
                )
                .bind(id)
                .bind(active)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(crate::db::StoreError::NotFound)
            }

            async fn delete_user(&self, id: i64) -> Result<(), crate::db::StoreError> {
                let done = sqlx::query("DELETE FROM users WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                if done.rows_affected() == 0 {
                    return Err(crate::db::StoreError::NotFound);
                }
                Ok(())
            }

            async fn find_profile(
                &self,
                user_id: i64,
            ) -> Result<Option<crate::db::UserProfile>, crate::db::StoreError> {
                let profile = sqlx::query_as::<_, crate::db::UserProfile>(
                    r#"
                    SELECT id, user_id, avatar, preferences, created_at, updated_at
                    FROM user_profiles
                    WHERE user_id = $1
                    "#,
                )
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
                Ok(profile)
            }

            async fn get_or_create_profile(
                &self,
                user_id: i64,
            ) -> Result<crate::db::UserProfile, crate::db::StoreError> {
                let now = time::OffsetDateTime::now_utc();
                sqlx::query(
                    r#"
                    INSERT INTO user_profiles (user_id, avatar, preferences, created_at, updated_at)
                    VALUES ($1, NULL, $2, $3, $3)
                    ON CONFLICT (user_id) DO NOTHING
                    "#,
                )
                .bind(user_id)
                .bind(sqlx::types::Json(serde_json::json!({})))
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| crate::db::StoreError::from_insert(e, "user"))?;

                crate::db::Store::find_profile(self, user_id)
                    .await?
                    .ok_or(crate::db::StoreError::NotFound)
            }

            async fn save_profile(
                &self,
                profile: &crate::db::UserProfile,
            ) -> Result<crate::db::UserProfile, crate::db::StoreError> {
                sqlx::query_as::<_, crate::db::UserProfile>(
                    r#"
                    UPDATE user_profiles
                    SET avatar = $2, preferences = $3, updated_at = $4
                    WHERE user_id = $1
                    RETURNING id, user_id, avatar, preferences, created_at, updated_at
                    "#,
                )
                .bind(profile.user_id)
                .bind(profile.avatar.as_deref())
                .bind(profile.preferences.clone())
                .bind(time::OffsetDateTime::now_utc())
                .fetch_optional(&self.pool)
                .await?
                .ok_or(crate::db::StoreError::NotFound)
            }

            async fn search_profiles(
                &self,
                email_pattern: &str,
                limit: i64,
                offset: i64,
            ) -> Result<crate::db::ProfilePage, crate::db::StoreError> {
                let count = sqlx::query_scalar::<_, i64>(
                    r#"
                    SELECT COUNT(*)
                    FROM user_profiles p
                    JOIN users u ON u.id = p.user_id
                    WHERE LOWER(u.email) LIKE $1 ESCAPE '\'
                    "#,
                )
                .bind(email_pattern)
                .fetch_one(&self.pool)
                .await?;

                let results = sqlx::query_as::<_, crate::db::ProfileListing>(
                    r#"
                    SELECT p.id, p.user_id, u.email AS user_email, p.created_at
                    FROM user_profiles p
                    JOIN users u ON u.id = p.user_id
                    WHERE LOWER(u.email) LIKE $1 ESCAPE '\'
                    ORDER BY p.id DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(email_pattern)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

                Ok(crate::db::ProfilePage { count, results })
            }

            async fn blacklist_token(
                &self,
                jti: &str,
                user_id: i64,
                expires_at: time::OffsetDateTime,
            ) -> Result<(), crate::db::StoreError> {
                let now = time::OffsetDateTime::now_utc();
                sqlx::query(
                    r#"
                    INSERT INTO blacklisted_tokens (jti, user_id, expires_at, blacklisted_at)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (jti) DO NOTHING
                    "#,
                )
                .bind(jti)
                .bind(user_id)
                .bind(expires_at)
                .bind(now)
                .execute(&self.pool)
                .await?;
                crate::db::Store::purge_expired_tokens(self, now).await?;
                Ok(())
            }

            async fn purge_expired_tokens(
                &self,
                now: time::OffsetDateTime,
            ) -> Result<u64, crate::db::StoreError> {
                let done = sqlx::query("DELETE FROM blacklisted_tokens WHERE expires_at < $1")
                    .bind(now)
                    .execute(&self.pool)
                    .await?;
                Ok(done.rows_affected())
            }

            async fn is_token_blacklisted(&self, jti: &str) -> Result<bool, crate::db::StoreError> {
                let hits = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM blacklisted_tokens WHERE jti = $1",
                )
                .bind(jti)
                .fetch_one(&self.pool)
                .await?;
                Ok(hits > 0)
            }
        }
    };
}

mod postgres;
mod sqlite;

pub use postgres::PgStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{field} already exists")]
    Duplicate { field: &'static str },
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Maps unique-constraint violations on insert to `Duplicate`.
    pub(crate) fn from_insert(e: sqlx::Error, field: &'static str) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return StoreError::Duplicate { field };
            }
        }
        StoreError::Database(e)
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub date_joined: OffsetDateTime,
}

#[derive(Debug, Clone, Copy)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub is_staff: bool,
}

/// Per-user profile, one row per user.
#[derive(Debug, Clone, FromRow)]
pub struct UserProfile {
    pub id: i64,
    pub user_id: i64,
    pub avatar: Option<String>,
    pub preferences: Json<serde_json::Value>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Row of the operator profile listing.
#[derive(Debug, Clone, FromRow)]
pub struct ProfileListing {
    pub id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub created_at: OffsetDateTime,
}

impl std::fmt::Display for ProfileListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Profile for {}", self.user_email)
    }
}

#[derive(Debug, Clone)]
pub struct ProfilePage {
    pub count: i64,
    pub results: Vec<ProfileListing>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn migrate(&self) -> Result<(), StoreError>;

    async fn create_user(&self, new: NewUser<'_>) -> Result<User, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;
    async fn set_user_active(&self, id: i64, active: bool) -> Result<User, StoreError>;
    /// Deletes the user; profile and blacklist rows go with it.
    async fn delete_user(&self, id: i64) -> Result<(), StoreError>;

    async fn find_profile(&self, user_id: i64) -> Result<Option<UserProfile>, StoreError>;
    async fn get_or_create_profile(&self, user_id: i64) -> Result<UserProfile, StoreError>;
    /// Persists avatar and preferences and bumps `updated_at`.
    async fn save_profile(&self, profile: &UserProfile) -> Result<UserProfile, StoreError>;
    /// `email_pattern` is a lowercase LIKE pattern using `\` as escape.
    async fn search_profiles(
        &self,
        email_pattern: &str,
        limit: i64,
        offset: i64,
    ) -> Result<ProfilePage, StoreError>;

    async fn blacklist_token(
        &self,
        jti: &str,
        user_id: i64,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError>;
    async fn is_token_blacklisted(&self, jti: &str) -> Result<bool, StoreError>;
    /// Drops blacklist rows whose token has expired by `now`; returns how many.
    async fn purge_expired_tokens(&self, now: OffsetDateTime) -> Result<u64, StoreError>;
}

/// Opens the pool the configuration points at.
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config {
        DatabaseConfig::Sqlite { path } => Arc::new(SqliteStore::open(path).await?),
        DatabaseConfig::Url(url) if url == "sqlite::memory:" => {
            Arc::new(SqliteStore::in_memory().await?)
        }
        DatabaseConfig::Url(url) if url.starts_with("sqlite:") => {
            Arc::new(SqliteStore::connect_url(url).await?)
        }
        DatabaseConfig::Postgres { .. } | DatabaseConfig::Url(_) => {
            Arc::new(PgStore::connect_with(config.pg_options()?).await?)
        }
    };
    Ok(store)
}

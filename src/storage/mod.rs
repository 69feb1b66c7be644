use crate::config::DatabaseConfig;
use crate::domain::auth::{AccessToken, NewToken, RefreshToken};
use crate::domain::user::User;
use crate::error::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use time::OffsetDateTime;

pub mod memory;
pub mod records;
pub mod refresh_token_repo;
pub mod session_repo;
pub mod token_repo;
pub mod user_repo;

pub type DbPool = Pool<Postgres>;

/// Initializes the database connection pool.
///
/// # Errors
/// Returns `sqlx::Error` if the connection fails.
pub async fn init_pool(config: &DatabaseConfig) -> std::result::Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .connect(&config.url)
        .await
}

/// Read access to user accounts, plus creation for provisioning.
#[async_trait]
pub trait UserStore: Send + Sync + std::fmt::Debug {
    /// Inserts a new user.
    ///
    /// # Errors
    /// Returns `AppError::Conflict` if the username is taken.
    async fn create(&self, username: &str, password_hash: &str) -> Result<User>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>>;
}

/// Persistence for issued access tokens.
///
/// Stores never judge expiry; they only keep rows and enforce uniqueness of the token hash.
#[async_trait]
pub trait AccessTokenStore: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// Returns `AppError::DuplicateToken` if the hash already exists.
    async fn create(&self, token: NewToken<'_>) -> Result<AccessToken>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<AccessToken>>;

    /// Removes the row, returning whether one existed.
    async fn delete(&self, token_hash: &str) -> Result<bool>;

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64>;
}

/// Persistence for issued refresh tokens.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// Returns `AppError::DuplicateToken` if the hash already exists.
    async fn create(&self, token: NewToken<'_>) -> Result<RefreshToken>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>>;

    /// Removes the row, returning whether one existed.
    async fn delete(&self, token_hash: &str) -> Result<bool>;

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64>;
}

/// Writes that span both token tables and must land together.
///
/// A failure leaves both tables as they were before the call.
#[async_trait]
pub trait SessionStore: Send + Sync + std::fmt::Debug {
    /// Inserts an access/refresh pair, or neither.
    ///
    /// # Errors
    /// Returns `AppError::DuplicateToken` if either hash already exists, or the store failure.
    async fn issue(&self, access: NewToken<'_>, refresh: NewToken<'_>) -> Result<(AccessToken, RefreshToken)>;

    /// Consumes `consumed` and inserts its replacement pair in one unit.
    ///
    /// Returns `None` without inserting anything when the consumed row is already gone.
    ///
    /// # Errors
    /// Returns the store failure, in which case no replacement pair exists.
    async fn rotate(
        &self,
        consumed: &RefreshToken,
        access: NewToken<'_>,
        refresh: NewToken<'_>,
    ) -> Result<Option<(AccessToken, RefreshToken)>>;
}

/// Maps a unique-constraint violation on insert to `AppError::DuplicateToken`.
pub(crate) fn map_token_insert_error(err: sqlx::Error) -> crate::error::AppError {
    match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => crate::error::AppError::DuplicateToken,
        other => crate::error::AppError::Database(other),
    }
}

use crate::domain::auth::{NewToken, RefreshToken};
use crate::error::Result;
use crate::storage::records::RefreshTokenRecord;
use crate::storage::{DbPool, RefreshTokenStore, map_token_insert_error};
use async_trait::async_trait;
use sqlx::{Executor, Postgres};
use time::OffsetDateTime;

#[derive(Clone, Debug)]
pub struct RefreshTokenRepository {
    pool: DbPool,
}

impl RefreshTokenRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Creates a new refresh token record.
    /// Note: We store the HASH, not the raw token.
    pub(crate) async fn insert<'e, E>(executor: E, token: NewToken<'_>) -> Result<RefreshToken>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, token_hash, created_at, expires_at
            "#,
        )
        .bind(token.user_id)
        .bind(token.token_hash)
        .bind(token.created_at)
        .bind(token.expires_at)
        .fetch_one(executor)
        .await
        .map_err(map_token_insert_error)?;

        Ok(record.into())
    }

    /// Single-statement delete; of two concurrent consumers only one observes `true`.
    ///
    /// Inside a transaction the row lock is held until commit, so a competing
    /// consumer waits and then sees the row gone.
    pub(crate) async fn remove<'e, E>(executor: E, token_hash: &str) -> Result<bool>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RefreshTokenStore for RefreshTokenRepository {
    #[tracing::instrument(level = "debug", skip(self, token), fields(user_id = %token.user_id), err)]
    async fn create(&self, token: NewToken<'_>) -> Result<RefreshToken> {
        Self::insert(&self.pool, token).await
    }

    #[tracing::instrument(level = "debug", skip(self, token_hash), err)]
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT id, user_id, token_hash, created_at, expires_at FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self, token_hash), err)]
    async fn delete(&self, token_hash: &str) -> Result<bool> {
        Self::remove(&self.pool, token_hash).await
    }

    /// Deletes all expired refresh tokens.
    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1").bind(now).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

use crate::domain::auth::{AccessToken, NewToken};
use crate::error::Result;
use crate::storage::records::AccessTokenRecord;
use crate::storage::{AccessTokenStore, DbPool, map_token_insert_error};
use async_trait::async_trait;
use sqlx::{Executor, Postgres};
use time::OffsetDateTime;

/// Postgres-backed access token table.
#[derive(Clone, Debug)]
pub struct TokenRepository {
    pool: DbPool,
}

impl TokenRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts an access token row on any executor, so callers can enlist it in a transaction.
    pub(crate) async fn insert<'e, E>(executor: E, token: NewToken<'_>) -> Result<AccessToken>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let record = sqlx::query_as::<_, AccessTokenRecord>(
            r#"
            INSERT INTO tokens (user_id, token_hash, created_at, expires_at)
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
}

#[async_trait]
impl AccessTokenStore for TokenRepository {
    #[tracing::instrument(level = "debug", skip(self, token), fields(user_id = %token.user_id), err)]
    async fn create(&self, token: NewToken<'_>) -> Result<AccessToken> {
        Self::insert(&self.pool, token).await
    }

    #[tracing::instrument(level = "debug", skip(self, token_hash), err)]
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<AccessToken>> {
        let record = sqlx::query_as::<_, AccessTokenRecord>(
            "SELECT id, user_id, token_hash, created_at, expires_at FROM tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self, token_hash), err)]
    async fn delete(&self, token_hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tokens WHERE token_hash = $1").bind(token_hash).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes all access tokens whose deadline has passed.
    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tokens WHERE expires_at < $1").bind(now).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

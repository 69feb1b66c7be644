use crate::domain::auth::{AccessToken, NewToken, RefreshToken};
use crate::error::Result;
use crate::storage::refresh_token_repo::RefreshTokenRepository;
use crate::storage::token_repo::TokenRepository;
use crate::storage::{DbPool, SessionStore};
use async_trait::async_trait;

/// Runs session writes spanning `tokens` and `refresh_tokens` in one transaction.
#[derive(Clone, Debug)]
pub struct SessionRepository {
    pool: DbPool,
}

impl SessionRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    #[tracing::instrument(level = "debug", skip(self, access, refresh), fields(user_id = %access.user_id), err)]
    async fn issue(&self, access: NewToken<'_>, refresh: NewToken<'_>) -> Result<(AccessToken, RefreshToken)> {
        let mut tx = self.pool.begin().await?;
        let access = TokenRepository::insert(&mut *tx, access).await?;
        let refresh = RefreshTokenRepository::insert(&mut *tx, refresh).await?;
        tx.commit().await?;

        Ok((access, refresh))
    }

    #[tracing::instrument(level = "debug", skip(self, consumed, access, refresh), fields(user_id = %consumed.user_id), err)]
    async fn rotate(
        &self,
        consumed: &RefreshToken,
        access: NewToken<'_>,
        refresh: NewToken<'_>,
    ) -> Result<Option<(AccessToken, RefreshToken)>> {
        let mut tx = self.pool.begin().await?;

        // Dropping `tx` on any early return rolls the delete back.
        if !RefreshTokenRepository::remove(&mut *tx, &consumed.token_hash).await? {
            return Ok(None);
        }

        let access = TokenRepository::insert(&mut *tx, access).await?;
        let refresh = RefreshTokenRepository::insert(&mut *tx, refresh).await?;
        tx.commit().await?;

        Ok(Some((access, refresh)))
    }
}

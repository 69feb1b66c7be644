use crate::domain::auth::{AccessToken, RefreshToken};
use time::OffsetDateTime;

#[derive(sqlx::FromRow)]
pub(crate) struct AccessTokenRecord {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl From<AccessTokenRecord> for AccessToken {
    fn from(record: AccessTokenRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            token_hash: record.token_hash,
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RefreshTokenRecord {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl From<RefreshTokenRecord> for RefreshToken {
    fn from(record: RefreshTokenRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            token_hash: record.token_hash,
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

//! In-process stores with the same contracts as the Postgres repositories.

use crate::domain::auth::{AccessToken, NewToken, RefreshToken};
use crate::domain::user::User;
use crate::error::{AppError, Result};
use crate::storage::{AccessTokenStore, RefreshTokenStore, SessionStore, UserStore};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use time::OffsetDateTime;

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: DashMap<String, User>,
    next_id: AtomicI64,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, username: &str, password_hash: &str) -> Result<User> {
        match self.users.entry(username.to_string()) {
            Entry::Occupied(_) => Err(AppError::Conflict("Username already exists".into())),
            Entry::Vacant(slot) => {
                let user = User {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
                    username: username.to_string(),
                    password_hash: password_hash.to_string(),
                    created_at: OffsetDateTime::now_utc(),
                };
                slot.insert(user.clone());
                Ok(user)
            }
        }
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.users.get(username).map(|u| u.value().clone()))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        Ok(self.users.iter().find(|u| u.id == id).map(|u| u.value().clone()))
    }
}

/// A stored token row that can be built from a [`NewToken`].
pub trait TokenRow: Clone + Send + Sync + std::fmt::Debug + 'static {
    fn from_new(id: i64, token: NewToken<'_>) -> Self;

    fn expires_at(&self) -> OffsetDateTime;
}

impl TokenRow for AccessToken {
    fn from_new(id: i64, token: NewToken<'_>) -> Self {
        Self {
            id,
            user_id: token.user_id,
            token_hash: token.token_hash.to_string(),
            created_at: token.created_at,
            expires_at: token.expires_at,
        }
    }

    fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }
}

impl TokenRow for RefreshToken {
    fn from_new(id: i64, token: NewToken<'_>) -> Self {
        Self {
            id,
            user_id: token.user_id,
            token_hash: token.token_hash.to_string(),
            created_at: token.created_at,
            expires_at: token.expires_at,
        }
    }

    fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }
}

/// Token table keyed by hash. Uniqueness comes from the entry API, single-winner deletes from `remove`.
#[derive(Debug)]
pub struct MemoryTokenStore<T> {
    tokens: DashMap<String, T>,
    next_id: AtomicI64,
}

pub type MemoryAccessTokenStore = MemoryTokenStore<AccessToken>;
pub type MemoryRefreshTokenStore = MemoryTokenStore<RefreshToken>;

impl<T: TokenRow> Default for MemoryTokenStore<T> {
    fn default() -> Self {
        Self { tokens: DashMap::new(), next_id: AtomicI64::new(0) }
    }
}

impl<T: TokenRow> MemoryTokenStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn insert(&self, token: NewToken<'_>) -> Result<T> {
        match self.tokens.entry(token.token_hash.to_string()) {
            Entry::Occupied(_) => Err(AppError::DuplicateToken),
            Entry::Vacant(slot) => {
                let record = T::from_new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1, token);
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    fn get(&self, token_hash: &str) -> Option<T> {
        self.tokens.get(token_hash).map(|t| t.value().clone())
    }

    fn remove(&self, token_hash: &str) -> bool {
        self.tokens.remove(token_hash).is_some()
    }

    fn purge_expired(&self, now: OffsetDateTime) -> u64 {
        let before = self.tokens.len();
        self.tokens.retain(|_, t| t.expires_at() >= now);
        u64::try_from(before.saturating_sub(self.tokens.len())).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl AccessTokenStore for MemoryTokenStore<AccessToken> {
    async fn create(&self, token: NewToken<'_>) -> Result<AccessToken> {
        self.insert(token)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<AccessToken>> {
        Ok(self.get(token_hash))
    }

    async fn delete(&self, token_hash: &str) -> Result<bool> {
        Ok(self.remove(token_hash))
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64> {
        Ok(self.purge_expired(now))
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryTokenStore<RefreshToken> {
    async fn create(&self, token: NewToken<'_>) -> Result<RefreshToken> {
        self.insert(token)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        Ok(self.get(token_hash))
    }

    async fn delete(&self, token_hash: &str) -> Result<bool> {
        Ok(self.remove(token_hash))
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64> {
        Ok(self.purge_expired(now))
    }
}

/// Session writes over token stores that have no transactions.
///
/// Each step that already landed is undone when a later step fails, so callers
/// observe the same all-or-nothing outcome as [`super::session_repo::SessionRepository`].
#[derive(Debug)]
pub struct MemorySessionStore {
    access_tokens: Arc<dyn AccessTokenStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(access_tokens: Arc<dyn AccessTokenStore>, refresh_tokens: Arc<dyn RefreshTokenStore>) -> Self {
        Self { access_tokens, refresh_tokens }
    }

    async fn restore(&self, consumed: &RefreshToken) {
        let token = NewToken {
            user_id: consumed.user_id,
            token_hash: &consumed.token_hash,
            created_at: consumed.created_at,
            expires_at: consumed.expires_at,
        };
        if let Err(e) = self.refresh_tokens.create(token).await {
            tracing::error!(error = %e, user_id = consumed.user_id, "Failed to restore consumed refresh token");
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn issue(&self, access: NewToken<'_>, refresh: NewToken<'_>) -> Result<(AccessToken, RefreshToken)> {
        let access = self.access_tokens.create(access).await?;

        match self.refresh_tokens.create(refresh).await {
            Ok(refresh) => Ok((access, refresh)),
            Err(e) => {
                if let Err(undo) = self.access_tokens.delete(&access.token_hash).await {
                    tracing::error!(error = %undo, "Failed to withdraw unpaired access token");
                }
                Err(e)
            }
        }
    }

    async fn rotate(
        &self,
        consumed: &RefreshToken,
        access: NewToken<'_>,
        refresh: NewToken<'_>,
    ) -> Result<Option<(AccessToken, RefreshToken)>> {
        if !self.refresh_tokens.delete(&consumed.token_hash).await? {
            return Ok(None);
        }

        match self.issue(access, refresh).await {
            Ok(pair) => Ok(Some(pair)),
            Err(e) => {
                self.restore(consumed).await;
                Err(e)
            }
        }
    }
}

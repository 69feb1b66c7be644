use crate::config::AuthConfig;
use crate::domain::auth::{NewToken, Password, RefreshToken, hash_token};
use crate::domain::auth_session::AuthSession;
use crate::domain::clock::Clock;
use crate::domain::token::TokenGenerator;
use crate::error::{AppError, Result};
use crate::storage::{AccessTokenStore, RefreshTokenStore, SessionStore, UserStore};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Verified against when the username is unknown so both failure paths cost the same.
static DUMMY_PASSWORD_HASH: OnceCell<Option<String>> = OnceCell::const_new();

async fn dummy_password_hash() -> Option<&'static str> {
    DUMMY_PASSWORD_HASH
        .get_or_init(|| async {
            tokio::task::spawn_blocking(|| Password::hash("bookmarker-timing-equalizer").ok())
                .await
                .ok()
                .flatten()
        })
        .await
        .as_deref()
}

#[derive(Clone, Debug)]
struct Metrics {
    login_total: Counter<u64>,
    login_failed_total: Counter<u64>,
    refresh_total: Counter<u64>,
    logout_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("bookmarker-server");
        Self {
            login_total: meter
                .u64_counter("auth_login_total")
                .with_description("Total number of successful login attempts")
                .build(),
            login_failed_total: meter
                .u64_counter("auth_login_failed_total")
                .with_description("Total number of rejected login attempts")
                .build(),
            refresh_total: meter
                .u64_counter("auth_refresh_total")
                .with_description("Total number of successful token rotations")
                .build(),
            logout_total: meter
                .u64_counter("auth_logout_total")
                .with_description("Total number of completed logouts")
                .build(),
        }
    }
}

/// Issues, validates, rotates and revokes store-backed session tokens.
#[derive(Clone, Debug)]
pub struct AuthService {
    config: AuthConfig,
    users: Arc<dyn UserStore>,
    access_tokens: Arc<dyn AccessTokenStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    sessions: Arc<dyn SessionStore>,
    generator: Arc<dyn TokenGenerator>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl AuthService {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserStore>,
        access_tokens: Arc<dyn AccessTokenStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        sessions: Arc<dyn SessionStore>,
        generator: Arc<dyn TokenGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { config, users, access_tokens, refresh_tokens, sessions, generator, clock, metrics: Metrics::new() }
    }

    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Verifies credentials and mints a fresh access/refresh pair.
    ///
    /// # Errors
    /// Returns `AppError::InvalidCredentials` for an unknown user or a wrong password alike.
    #[tracing::instrument(skip(self, username, password), fields(user_id = tracing::field::Empty), err(level = "warn"))]
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<AuthSession> {
        let Some(user) = self.users.find_by_username(username).await? else {
            if let Some(dummy) = dummy_password_hash().await {
                let _ = self.verify_password(password, dummy).await;
            }
            tracing::warn!("Login failed: user not found");
            self.metrics.login_failed_total.add(1, &[]);
            return Err(AppError::InvalidCredentials);
        };

        tracing::Span::current().record("user_id", user.id);

        if !self.verify_password(password, &user.password_hash).await? {
            tracing::warn!("Login failed: invalid password");
            self.metrics.login_failed_total.add(1, &[]);
            return Err(AppError::InvalidCredentials);
        }

        let session = self.mint_session(user.id, None).await?;
        self.metrics.login_total.add(1, &[]);
        Ok(session)
    }

    /// Resolves an access token to its owner.
    ///
    /// # Errors
    /// Returns `AppError::TokenNotFound` if the token was never issued or was revoked,
    /// `AppError::TokenExpired` once its deadline has passed.
    #[tracing::instrument(level = "debug", skip(self, token), err(level = "debug"))]
    pub async fn validate_access_token(&self, token: &str) -> Result<i64> {
        let record = self.access_tokens.find_by_hash(&hash_token(token)).await?.ok_or(AppError::TokenNotFound)?;

        if record.is_expired_at(self.clock.now()) {
            return Err(AppError::TokenExpired);
        }

        Ok(record.user_id)
    }

    /// Consumes a refresh token and issues a replacement pair.
    ///
    /// Deleting the presented token and inserting the replacements happen as one unit.
    /// If any step fails nothing is issued. If another caller consumed it first, this one
    /// sees `TokenNotFound`.
    /// The access token issued alongside the consumed refresh token stays valid until it expires.
    ///
    /// # Errors
    /// Returns `AppError::TokenNotFound`, `AppError::TokenExpired`, or the store failure.
    #[tracing::instrument(skip(self, refresh_token), fields(user_id = tracing::field::Empty), err(level = "warn"))]
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<AuthSession> {
        let record = self.refresh_tokens.find_by_hash(&hash_token(refresh_token)).await?.ok_or(AppError::TokenNotFound)?;

        tracing::Span::current().record("user_id", record.user_id);

        if record.is_expired_at(self.clock.now()) {
            return Err(AppError::TokenExpired);
        }

        let session = self.mint_session(record.user_id, Some(&record)).await?;

        tracing::info!("Tokens rotated successfully");
        self.metrics.refresh_total.add(1, &[]);
        Ok(session)
    }

    /// Revokes both tokens of a session. Already-absent tokens count as revoked.
    ///
    /// # Errors
    /// Returns the first store failure; both deletions are attempted regardless.
    #[tracing::instrument(skip(self, access_token, refresh_token), err)]
    pub async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        let access_hash = hash_token(access_token);
        let refresh_hash = hash_token(refresh_token);

        let (access_res, refresh_res) =
            tokio::join!(self.access_tokens.delete(&access_hash), self.refresh_tokens.delete(&refresh_hash));

        let (access_removed, refresh_removed) = (access_res?, refresh_res?);
        tracing::debug!(access_removed, refresh_removed, "Session revoked");

        self.metrics.logout_total.add(1, &[KeyValue::new("had_session", access_removed || refresh_removed)]);
        Ok(())
    }

    /// # Errors
    /// Returns `AppError::Internal` if hashing fails or the blocking task panics.
    #[tracing::instrument(err, skip(self, password))]
    pub async fn hash_password(&self, password: &str) -> Result<String> {
        let password = password.to_string();
        tokio::task::spawn_blocking(move || Password::hash(&password)).await.map_err(|_| AppError::Internal)?
    }

    /// # Errors
    /// Returns `AppError::Internal` if the stored hash is malformed or the blocking task panics.
    #[tracing::instrument(err, skip(self, password, password_hash))]
    pub async fn verify_password(&self, password: &str, password_hash: &str) -> Result<bool> {
        let password = password.to_string();
        let password_hash = password_hash.to_string();
        tokio::task::spawn_blocking(move || Password::verify(&password, &password_hash))
            .await
            .map_err(|_| AppError::Internal)?
    }

    /// Mints a fresh pair, consuming `consumed` in the same unit when rotating.
    #[tracing::instrument(level = "debug", err, skip(self, consumed), fields(user_id = %user_id))]
    async fn mint_session(&self, user_id: i64, consumed: Option<&RefreshToken>) -> Result<AuthSession> {
        let now = self.clock.now();

        let access_token = self.generator.generate();
        let refresh_token = self.generator.generate();
        let access_hash = hash_token(&access_token);
        let refresh_hash = hash_token(&refresh_token);

        let access = NewToken {
            user_id,
            token_hash: &access_hash,
            created_at: now,
            expires_at: now + self.config.access_token_ttl(),
        };
        let refresh = NewToken {
            user_id,
            token_hash: &refresh_hash,
            created_at: now,
            expires_at: now + self.config.refresh_token_ttl(),
        };

        let (access, refresh) = match consumed {
            None => self.sessions.issue(access, refresh).await?,
            Some(consumed) => self.sessions.rotate(consumed, access, refresh).await?.ok_or_else(|| {
                tracing::warn!("Refresh token consumed concurrently");
                AppError::TokenNotFound
            })?,
        };

        Ok(AuthSession {
            access_token,
            refresh_token,
            access_expires_at: access.expires_at,
            refresh_expires_at: refresh.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::auth::{NewToken, RefreshToken};
    use crate::domain::clock::ManualClock;
    use crate::domain::token::{SecureTokenGenerator, TOKEN_LENGTH};
    use crate::storage::memory::{MemoryAccessTokenStore, MemoryRefreshTokenStore, MemorySessionStore, MemoryUserStore};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use time::OffsetDateTime;

    struct Harness {
        service: AuthService,
        clock: Arc<ManualClock>,
        access: Arc<MemoryAccessTokenStore>,
        refresh: Arc<MemoryRefreshTokenStore>,
        alice_id: i64,
    }

    async fn harness_with(refresh_store: Option<Arc<dyn RefreshTokenStore>>, generator: Arc<dyn TokenGenerator>) -> Harness {
        let users = Arc::new(MemoryUserStore::new());
        let access = Arc::new(MemoryAccessTokenStore::new());
        let refresh = Arc::new(MemoryRefreshTokenStore::new());
        let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH + time::Duration::days(20_000)));

        let alice = users.create("alice", &Password::hash("correct-pw").unwrap()).await.unwrap();
        let refresh_store: Arc<dyn RefreshTokenStore> = match refresh_store {
            Some(store) => store,
            None => refresh.clone(),
        };

        let sessions = Arc::new(MemorySessionStore::new(access.clone(), Arc::clone(&refresh_store)));

        let service = AuthService::new(
            AuthConfig::default(),
            users,
            access.clone(),
            refresh_store,
            sessions,
            generator,
            clock.clone(),
        );

        Harness { service, clock, access, refresh, alice_id: alice.id }
    }

    async fn harness() -> Harness {
        harness_with(None, Arc::new(SecureTokenGenerator)).await
    }

    #[derive(Debug)]
    struct ScriptedGenerator(Mutex<VecDeque<String>>);

    impl ScriptedGenerator {
        fn new(tokens: &[&str]) -> Self {
            Self(Mutex::new(tokens.iter().map(|t| (*t).to_string()).collect()))
        }
    }

    impl TokenGenerator for ScriptedGenerator {
        fn generate(&self) -> String {
            self.0.lock().unwrap().pop_front().unwrap_or_default()
        }
    }

    /// Refresh store that can be told to fail, as during a lost connection.
    #[derive(Debug, Default)]
    struct FaultyRefreshStore {
        inner: MemoryRefreshTokenStore,
        fail_create: AtomicBool,
        fail_delete: AtomicBool,
    }

    impl FaultyRefreshStore {
        fn failing_deletes() -> Self {
            Self { fail_delete: AtomicBool::new(true), ..Self::default() }
        }
    }

    fn lost_connection() -> AppError {
        AppError::Database(sqlx::Error::PoolTimedOut)
    }

    #[async_trait]
    impl RefreshTokenStore for FaultyRefreshStore {
        async fn create(&self, token: NewToken<'_>) -> Result<RefreshToken> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(lost_connection());
            }
            self.inner.create(token).await
        }

        async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
            self.inner.find_by_hash(token_hash).await
        }

        async fn delete(&self, token_hash: &str) -> Result<bool> {
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(lost_connection());
            }
            self.inner.delete(token_hash).await
        }

        async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64> {
            self.inner.delete_expired(now).await
        }
    }

    #[tokio::test]
    async fn test_authenticate_issues_distinct_tokens() {
        let h = harness().await;
        let session = h.service.authenticate("alice", "correct-pw").await.unwrap();

        assert_eq!(session.access_token.len(), TOKEN_LENGTH);
        assert_eq!(session.refresh_token.len(), TOKEN_LENGTH);
        assert_ne!(session.access_token, session.refresh_token);
        assert_eq!(session.access_expires_at, h.clock.now() + time::Duration::minutes(30));
        assert_eq!(session.refresh_expires_at, h.clock.now() + time::Duration::days(30));

        assert_eq!(h.service.validate_access_token(&session.access_token).await.unwrap(), h.alice_id);
        assert!(h.refresh.find_by_hash(&hash_token(&session.refresh_token)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_user_are_indistinguishable() {
        let h = harness().await;

        let wrong_pw = h.service.authenticate("alice", "wrong-pw").await;
        let unknown = h.service.authenticate("mallory", "correct-pw").await;

        assert!(matches!(wrong_pw, Err(AppError::InvalidCredentials)));
        assert!(matches!(unknown, Err(AppError::InvalidCredentials)));
        assert!(h.access.is_empty());
        assert!(h.refresh.is_empty());
    }

    #[tokio::test]
    async fn test_never_issued_token_is_not_found() {
        let h = harness().await;
        let result = h.service.validate_access_token("A".repeat(TOKEN_LENGTH).as_str()).await;
        assert!(matches!(result, Err(AppError::TokenNotFound)));
    }

    #[tokio::test]
    async fn test_access_token_expires_but_row_remains() {
        let h = harness().await;
        let session = h.service.authenticate("alice", "correct-pw").await.unwrap();

        h.clock.advance(time::Duration::minutes(30));
        assert_eq!(h.service.validate_access_token(&session.access_token).await.unwrap(), h.alice_id);

        h.clock.advance(time::Duration::seconds(1));
        let result = h.service.validate_access_token(&session.access_token).await;

        assert!(matches!(result, Err(AppError::TokenExpired)));
        assert_eq!(h.access.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_token_is_single_use() {
        let h = harness().await;
        let first = h.service.authenticate("alice", "correct-pw").await.unwrap();

        let second = h.service.refresh_tokens(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert_eq!(h.service.validate_access_token(&second.access_token).await.unwrap(), h.alice_id);

        let replay = h.service.refresh_tokens(&first.refresh_token).await;
        assert!(matches!(replay, Err(AppError::TokenNotFound)));
    }

    #[tokio::test]
    async fn test_rotation_leaves_previous_access_token_live() {
        let h = harness().await;
        let first = h.service.authenticate("alice", "correct-pw").await.unwrap();

        h.service.refresh_tokens(&first.refresh_token).await.unwrap();

        assert_eq!(h.service.validate_access_token(&first.access_token).await.unwrap(), h.alice_id);
    }

    #[tokio::test]
    async fn test_expired_refresh_token_is_rejected() {
        let h = harness().await;
        let session = h.service.authenticate("alice", "correct-pw").await.unwrap();

        h.clock.advance(time::Duration::days(30) + time::Duration::seconds(1));
        let result = h.service.refresh_tokens(&session.refresh_token).await;

        assert!(matches!(result, Err(AppError::TokenExpired)));
        assert_eq!(h.access.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_mints_nothing() {
        let store = Arc::new(FaultyRefreshStore::failing_deletes());
        let h = harness_with(Some(store.clone() as Arc<dyn RefreshTokenStore>), Arc::new(SecureTokenGenerator)).await;
        let session = h.service.authenticate("alice", "correct-pw").await.unwrap();

        let result = h.service.refresh_tokens(&session.refresh_token).await;

        assert!(matches!(result, Err(AppError::Database(_))));
        assert_eq!(h.access.len(), 1);
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_token_collision_surfaces_as_store_error() {
        let generator = Arc::new(ScriptedGenerator::new(&["same", "refresh-1", "same", "refresh-2"]));
        let h = harness_with(None, generator).await;

        h.service.authenticate("alice", "correct-pw").await.unwrap();
        let result = h.service.authenticate("alice", "correct-pw").await;

        assert!(matches!(result, Err(AppError::DuplicateToken)));
        assert_eq!(h.access.len(), 1);
        assert_eq!(h.refresh.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_insert_leaves_no_access_row() {
        let store = Arc::new(FaultyRefreshStore::default());
        store.fail_create.store(true, Ordering::SeqCst);
        let h = harness_with(Some(store.clone() as Arc<dyn RefreshTokenStore>), Arc::new(SecureTokenGenerator)).await;

        let result = h.service.authenticate("alice", "correct-pw").await;

        assert!(matches!(result, Err(AppError::Database(_))));
        assert!(h.access.is_empty());
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_presented_refresh_token() {
        let generator = Arc::new(ScriptedGenerator::new(&[
            "access-1", "refresh-1", "access-2", "refresh-2", "access-3", "refresh-2", "access-4", "refresh-4",
        ]));
        let h = harness_with(None, generator).await;

        h.service.authenticate("alice", "correct-pw").await.unwrap();
        h.service.authenticate("alice", "correct-pw").await.unwrap();

        let collided = h.service.refresh_tokens("refresh-1").await;
        assert!(matches!(collided, Err(AppError::DuplicateToken)));
        assert_eq!(h.access.len(), 2);
        assert!(matches!(h.service.validate_access_token("access-3").await, Err(AppError::TokenNotFound)));

        let retried = h.service.refresh_tokens("refresh-1").await.unwrap();
        assert_eq!(retried.refresh_token, "refresh-4");
        assert_eq!(h.access.len(), 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_dummy_hash_rejects_every_password() {
        let dummy = dummy_password_hash().await.unwrap();

        assert!(!Password::verify("correct-pw", dummy).unwrap());
        assert_eq!(dummy_password_hash().await, Some(dummy));
    }

    #[tokio::test]
    async fn test_logout_revokes_and_is_idempotent() {
        let h = harness().await;
        let session = h.service.authenticate("alice", "correct-pw").await.unwrap();

        h.service.logout(&session.access_token, &session.refresh_token).await.unwrap();
        h.service.logout(&session.access_token, &session.refresh_token).await.unwrap();

        assert!(matches!(h.service.validate_access_token(&session.access_token).await, Err(AppError::TokenNotFound)));
        assert!(matches!(h.service.refresh_tokens(&session.refresh_token).await, Err(AppError::TokenNotFound)));
    }

    #[tokio::test]
    async fn test_logout_attempts_both_deletions_on_failure() {
        let store = Arc::new(FaultyRefreshStore::failing_deletes());
        let h = harness_with(Some(store as Arc<dyn RefreshTokenStore>), Arc::new(SecureTokenGenerator)).await;
        let session = h.service.authenticate("alice", "correct-pw").await.unwrap();

        let result = h.service.logout(&session.access_token, &session.refresh_token).await;

        assert!(matches!(result, Err(AppError::Database(_))));
        assert!(h.access.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_rotation_has_single_winner() {
        let h = harness().await;
        let session = h.service.authenticate("alice", "correct-pw").await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = h.service.clone();
                let token = session.refresh_token.clone();
                tokio::spawn(async move { service.refresh_tokens(&token).await })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert!(matches!(e, AppError::TokenNotFound)),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(h.refresh.len(), 1);
    }
}

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod storage;
pub mod telemetry;
pub mod workers;

use crate::api::ServiceContainer;
use crate::config::Config;
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::token::{SecureTokenGenerator, TokenGenerator};
use crate::services::auth_service::AuthService;
use crate::services::user_service::UserService;
use crate::storage::memory::{MemoryAccessTokenStore, MemoryRefreshTokenStore, MemorySessionStore, MemoryUserStore};
use crate::storage::refresh_token_repo::RefreshTokenRepository;
use crate::storage::session_repo::SessionRepository;
use crate::storage::token_repo::TokenRepository;
use crate::storage::user_repo::UserRepository;
use crate::storage::{AccessTokenStore, DbPool, RefreshTokenStore, SessionStore, UserStore};
use crate::workers::TokenCleanupWorker;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The persistence collaborators of the session core.
///
/// `sessions` writes to the same tables as `access_tokens` and `refresh_tokens`.
#[derive(Clone, Debug)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub access_tokens: Arc<dyn AccessTokenStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Stores {
    #[must_use]
    pub fn postgres(pool: &DbPool) -> Self {
        Self {
            users: Arc::new(UserRepository::new(pool.clone())),
            access_tokens: Arc::new(TokenRepository::new(pool.clone())),
            refresh_tokens: Arc::new(RefreshTokenRepository::new(pool.clone())),
            sessions: Arc::new(SessionRepository::new(pool.clone())),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        let access_tokens: Arc<dyn AccessTokenStore> = Arc::new(MemoryAccessTokenStore::new());
        let refresh_tokens: Arc<dyn RefreshTokenStore> = Arc::new(MemoryRefreshTokenStore::new());
        let sessions = Arc::new(MemorySessionStore::new(Arc::clone(&access_tokens), Arc::clone(&refresh_tokens)));

        Self { users: Arc::new(MemoryUserStore::new()), access_tokens, refresh_tokens, sessions }
    }
}

#[derive(Debug)]
pub struct Workers {
    token_cleanup: TokenCleanupWorker,
}

impl Workers {
    #[must_use]
    pub fn spawn_all(self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![tokio::spawn(self.token_cleanup.run(shutdown_rx))]
    }
}

#[derive(Debug)]
pub struct App {
    pub services: ServiceContainer,
    pub workers: Workers,
}

#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    stores: Option<Stores>,
    clock: Arc<dyn Clock>,
    generator: Arc<dyn TokenGenerator>,
}

impl AppBuilder {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config, stores: None, clock: Arc::new(SystemClock), generator: Arc::new(SecureTokenGenerator) }
    }

    #[must_use]
    pub fn with_database(self, pool: &DbPool) -> Self {
        self.with_stores(Stores::postgres(pool))
    }

    #[must_use]
    pub fn with_stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_token_generator(mut self, generator: Arc<dyn TokenGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Wires services and workers.
    ///
    /// # Errors
    /// Returns an error if no stores were configured.
    pub fn build(self) -> anyhow::Result<App> {
        let stores = self.stores.ok_or_else(|| anyhow::anyhow!("stores must be configured before build"))?;

        let auth_service = AuthService::new(
            self.config.auth.clone(),
            Arc::clone(&stores.users),
            Arc::clone(&stores.access_tokens),
            Arc::clone(&stores.refresh_tokens),
            stores.sessions,
            self.generator,
            Arc::clone(&self.clock),
        );
        let user_service = UserService::new(stores.users, auth_service.clone());

        let token_cleanup = TokenCleanupWorker::new(
            stores.access_tokens,
            stores.refresh_tokens,
            self.clock,
            self.config.cleanup.token_cleanup_interval_secs,
        );

        Ok(App { services: ServiceContainer { auth_service, user_service }, workers: Workers { token_cleanup } })
    }
}

/// Applies pending schema migrations.
///
/// # Errors
/// Returns an error if a migration fails.
pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::migrate!().run(pool).await?;
    Ok(())
}

/// Flips the shutdown channel on SIGINT or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }

        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
}

use crate::domain::clock::Clock;
use crate::error::AppError;
use crate::storage::{AccessTokenStore, RefreshTokenStore};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

#[derive(Clone, Debug)]
struct Metrics {
    expired_deleted: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("bookmarker-server");
        Self {
            expired_deleted: meter
                .u64_counter("auth_expired_tokens_deleted_total")
                .with_description("Total expired session tokens purged by housekeeping")
                .build(),
        }
    }
}

/// Purges expired access and refresh token rows.
///
/// Validation never relies on this; an expired row is rejected whether or not it is still stored.
#[derive(Debug)]
pub struct TokenCleanupWorker {
    access_tokens: Arc<dyn AccessTokenStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    clock: Arc<dyn Clock>,
    cleanup_interval_secs: u64,
    metrics: Metrics,
}

impl TokenCleanupWorker {
    #[must_use]
    pub fn new(
        access_tokens: Arc<dyn AccessTokenStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        clock: Arc<dyn Clock>,
        cleanup_interval_secs: u64,
    ) -> Self {
        Self { access_tokens, refresh_tokens, clock, cleanup_interval_secs, metrics: Metrics::new() }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if self.cleanup_interval_secs == 0 {
            tracing::info!("Token cleanup is disabled (interval = 0)");
            return;
        }

        let mut interval = tokio::time::interval(Duration::from_secs(self.cleanup_interval_secs));

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.perform_cleanup()
                        .instrument(tracing::info_span!("run_token_cleanup"))
                        .await
                    {
                        tracing::error!(error = ?e, "Token cleanup iteration failed");
                    }
                }
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("Token cleanup loop shutting down...");
    }

    /// Deletes expired rows from both token stores, returning how many were removed.
    ///
    /// # Errors
    /// Returns the first store failure after attempting both stores.
    #[tracing::instrument(skip(self), err, fields(expired_deleted = tracing::field::Empty))]
    pub async fn perform_cleanup(&self) -> Result<u64, AppError> {
        tracing::debug!("Running token cleanup...");
        let now = self.clock.now();

        let (access, refresh) =
            tokio::join!(self.access_tokens.delete_expired(now), self.refresh_tokens.delete_expired(now));

        let mut total = 0;
        for (kind, res) in [("access", &access), ("refresh", &refresh)] {
            match res {
                Ok(count) if *count > 0 => {
                    tracing::info!(count = %count, kind, "Deleted expired tokens");
                    self.metrics.expired_deleted.add(*count, &[KeyValue::new("kind", kind)]);
                    total += count;
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, kind, "Cleanup error"),
            }
        }

        tracing::Span::current().record("expired_deleted", total);
        access?;
        refresh?;
        Ok(total)
    }
}

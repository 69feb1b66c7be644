use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create a user account that can log in
    CreateUser {
        /// Login name of the new user
        username: String,
        /// Plaintext password; stored only as an Argon2 hash
        password: String,
    },
}

#[derive(Clone, Debug, Args)]
pub struct Config {
    #[command(flatten)]
    pub database: DatabaseConfig,

    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub cleanup: CleanupConfig,

    #[command(flatten)]
    pub health: HealthConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Args)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[arg(long = "database-url", env = "BOOKMARKER_DATABASE_URL")]
    pub url: String,

    /// Maximum number of pooled connections
    #[arg(long, env = "BOOKMARKER_DB_MAX_CONNECTIONS", default_value_t = 20)]
    pub max_connections: u32,

    /// Minimum number of idle connections kept open
    #[arg(long, env = "BOOKMARKER_DB_MIN_CONNECTIONS", default_value_t = 2)]
    pub min_connections: u32,

    /// How long to wait for a free connection before failing
    #[arg(long, env = "BOOKMARKER_DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    pub acquire_timeout_secs: u64,

    /// Idle connections are closed after this many seconds
    #[arg(long, env = "BOOKMARKER_DB_IDLE_TIMEOUT_SECS", default_value_t = 600)]
    pub idle_timeout_secs: u64,

    /// Connections are recycled after this many seconds
    #[arg(long, env = "BOOKMARKER_DB_MAX_LIFETIME_SECS", default_value_t = 1800)]
    pub max_lifetime_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "BOOKMARKER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "BOOKMARKER_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Port for the liveness/readiness endpoints
    #[arg(long, env = "BOOKMARKER_MGMT_PORT", default_value_t = 9090)]
    pub mgmt_port: u16,

    /// Upper bound on the time spent serving one request
    #[arg(long, env = "BOOKMARKER_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// How long to wait for background tasks after a shutdown signal
    #[arg(long, env = "BOOKMARKER_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// Comma-separated list of origins allowed to make credentialed CORS requests.
    /// When empty, any origin is allowed without credentials.
    #[arg(long, env = "BOOKMARKER_ALLOWED_CORS_ORIGINS", value_delimiter = ',')]
    pub allowed_cors_origins: Vec<String>,
}

#[derive(Clone, Debug, Args)]
pub struct AuthConfig {
    /// Access token time-to-live in seconds
    #[arg(long, env = "BOOKMARKER_ACCESS_TOKEN_TTL_SECS", default_value_t = 1800)]
    pub access_token_ttl_secs: i64,

    /// Refresh token time-to-live in days
    #[arg(long, env = "BOOKMARKER_REFRESH_TOKEN_TTL_DAYS", default_value_t = 30)]
    pub refresh_token_ttl_days: i64,

    /// Mark session cookies as Secure (HTTPS only)
    #[arg(long, env = "BOOKMARKER_COOKIE_SECURE", default_value_t = false)]
    pub cookie_secure: bool,

    /// Domain attribute for session cookies
    #[arg(long, env = "BOOKMARKER_COOKIE_DOMAIN")]
    pub cookie_domain: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { access_token_ttl_secs: 1800, refresh_token_ttl_days: 30, cookie_secure: false, cookie_domain: None }
    }
}

impl AuthConfig {
    #[must_use]
    pub const fn access_token_ttl(&self) -> time::Duration {
        time::Duration::seconds(self.access_token_ttl_secs)
    }

    #[must_use]
    pub const fn refresh_token_ttl(&self) -> time::Duration {
        time::Duration::days(self.refresh_token_ttl_days)
    }
}

#[derive(Clone, Debug, Args)]
pub struct CleanupConfig {
    /// How often expired access and refresh tokens are purged (0 disables)
    #[arg(long, env = "BOOKMARKER_TOKEN_CLEANUP_INTERVAL_SECS", default_value_t = 3600)]
    pub token_cleanup_interval_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct HealthConfig {
    /// Timeout for the readiness database ping in milliseconds
    #[arg(long = "health-db-timeout-ms", env = "BOOKMARKER_HEALTH_DB_TIMEOUT_MS", default_value_t = 2000)]
    pub db_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { db_timeout_ms: 2000 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// OTLP collector endpoint; tracing and metrics export is disabled when unset
    #[arg(long, env = "BOOKMARKER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Log output format
    #[arg(long, env = "BOOKMARKER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}

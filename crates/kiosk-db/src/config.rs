//! # Database Configuration
//!
//! Where the database file lives and how hard the layer tries before giving up.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KIOSK_DB_PATH=/data/kiosk.db                                       │
//! │     KIOSK_DB_RETRY_ATTEMPTS=8                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/kiosk-pos/database.toml (Linux)                          │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     <data dir>/SQLite/kiosk.db, 5 attempts, batches of 20              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! name = "kiosk.db"
//! busy_timeout_ms = 0
//! foreign_keys = true
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 100
//!
//! [bootstrap]
//! batch_size = 20
//! batch_delay_ms = 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};

/// Sentinel path for a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Sub-directory of the platform data dir that holds the database file.
const DATABASE_DIR: &str = "SQLite";

// =============================================================================
// Database Settings
// =============================================================================

/// Location and engine settings for the database file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// File name inside the platform data directory.
    #[serde(default = "default_database_name")]
    pub name: String,

    /// Explicit file path. Wins over `name` when set.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Engine-level busy wait before SQLITE_BUSY is reported (milliseconds).
    /// Default: 0, contention is handled by [`RetryPolicy`] instead.
    #[serde(default)]
    pub busy_timeout_ms: u64,

    /// Enforce foreign key constraints.
    #[serde(default = "default_true")]
    pub foreign_keys: bool,
}

fn default_database_name() -> String {
    "kiosk.db".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            name: default_database_name(),
            path: None,
            busy_timeout_ms: 0,
            foreign_keys: true,
        }
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Backoff schedule for lock contention.
///
/// ```text
/// attempt 1 ── fails (locked) ── sleep 100ms
/// attempt 2 ── fails (locked) ── sleep 200ms
/// attempt 3 ── fails (locked) ── sleep 400ms
/// attempt 4 ── fails (locked) ── sleep 800ms
/// attempt 5 ── fails (locked) ── error surfaces
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt (milliseconds).
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    100
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and base delay.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay_ms: u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exponent))
    }
}

// =============================================================================
// Bootstrap Settings
// =============================================================================

/// Tuning for the batched schema fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSettings {
    /// Statements per transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches (milliseconds).
    #[serde(default = "default_batch_delay")]
    pub batch_delay_ms: u64,
}

fn default_batch_size() -> usize {
    20
}

fn default_batch_delay() -> u64 {
    10
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        BootstrapSettings {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay(),
        }
    }
}

impl BootstrapSettings {
    #[inline]
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

// =============================================================================
// Main Database Configuration
// =============================================================================

/// Complete database layer configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/data/kiosk.db")
///     .retry(RetryPolicy::new(8, Duration::from_millis(50)))
///     .batch_size(50);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub bootstrap: BootstrapSettings,
}

impl DbConfig {
    /// Creates a configuration for an explicit database file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.database.path = Some(path.into());
        config
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// The database lives exactly as long as the single connection.
    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY_PATH).batch_delay(Duration::ZERO)
    }

    /// Sets the lock retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Sets the number of statements per fallback batch.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.bootstrap.batch_size = size;
        self
    }

    /// Sets the pause between fallback batches.
    pub fn batch_delay(mut self, delay: Duration) -> Self {
        self.bootstrap.batch_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the engine busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.database.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enables or disables foreign key enforcement.
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.database.foreign_keys = enabled;
        self
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (database.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading database config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| DbError::Config(format!("{}: {e}", path.display())))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load database config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.database.path.is_none() && self.database.name.trim().is_empty() {
            return Err(DbError::Config("database name must not be empty".into()));
        }

        if self.retry.max_attempts == 0 {
            return Err(DbError::Config(
                "retry.max_attempts must be greater than 0".into(),
            ));
        }

        if self.bootstrap.batch_size == 0 {
            return Err(DbError::Config(
                "bootstrap.batch_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("KIOSK_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(name) = lookup("KIOSK_DB_NAME") {
            self.database.name = name;
        }

        if let Some(attempts) = lookup("KIOSK_DB_RETRY_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(n) => self.retry.max_attempts = n,
                Err(_) => warn!(value = %attempts, "Ignoring invalid KIOSK_DB_RETRY_ATTEMPTS"),
            }
        }

        if let Some(size) = lookup("KIOSK_DB_BATCH_SIZE") {
            match size.parse::<usize>() {
                Ok(n) => self.bootstrap.batch_size = n,
                Err(_) => warn!(value = %size, "Ignoring invalid KIOSK_DB_BATCH_SIZE"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("app", "kiosk", "pos")
            .map(|dirs| dirs.config_dir().join("database.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns true for the `:memory:` sentinel path.
    pub fn is_in_memory(&self) -> bool {
        self.database.path.as_deref() == Some(Path::new(IN_MEMORY_PATH))
    }

    /// Resolves the database file location.
    ///
    /// ```text
    /// database.path set     → that path
    /// platform data dir     → <data_dir>/SQLite/<name>
    /// neither               → ./SQLite/<name>
    /// ```
    pub fn resolve_path(&self) -> PathBuf {
        if let Some(path) = &self.database.path {
            return path.clone();
        }

        match directories::ProjectDirs::from("app", "kiosk", "pos") {
            Some(dirs) => dirs.data_dir().join(DATABASE_DIR).join(&self.database.name),
            None => PathBuf::from(DATABASE_DIR).join(&self.database.name),
        }
    }

    #[inline]
    pub fn busy_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.database.busy_timeout_ms)
    }
}

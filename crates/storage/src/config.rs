use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://kasten.sqlite3";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for the `SQLite` document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_owned(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }

    /// Read settings from `KASTEN_DB_URL`, `KASTEN_DB_MAX_CONNECTIONS` and
    /// `KASTEN_DB_ACQUIRE_TIMEOUT_SECS`. Missing or unparseable values fall
    /// back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let database_url = lookup("KASTEN_DB_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.database_url);
        let max_connections = lookup("KASTEN_DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_connections);
        let acquire_timeout = lookup("KASTEN_DB_ACQUIRE_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(defaults.acquire_timeout, Duration::from_secs);

        Self {
            database_url,
            max_connections,
            acquire_timeout,
        }
    }

    /// In-memory databases vanish with their last connection, so they are
    /// always used through a single connection.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.database_url == "sqlite::memory:" || self.database_url.contains("mode=memory")
    }
}

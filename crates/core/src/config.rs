//! Configuration file support.
//!
//! ```toml
//! [database]
//! path = "/var/lib/runledger/ledger.db"
//! min_connections = 1
//! max_connections = 8
//! max_lifetime_secs = 1800
//! busy_timeout_ms = 5000
//!
//! [process_pool]
//! max_concurrent = 4
//!
//! [events]
//! default_page_size = 50
//! max_page_size = 500
//! ```

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const IN_MEMORY_PATH: &str = ":memory:";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RunledgerConfig {
    pub database: DatabaseConfig,
    pub process_pool: ProcessPoolConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:`.
    pub path: PathBuf,
    pub min_connections: usize,
    pub max_connections: usize,
    /// Connections older than this are reopened on checkout. `0` disables recycling.
    pub max_lifetime_secs: u64,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("runledger.db"),
            min_connections: 1,
            max_connections: 8,
            max_lifetime_secs: 1800,
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    /// Single shared in-memory connection.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(IN_MEMORY_PATH),
            min_connections: 1,
            max_connections: 1,
            ..Self::default()
        }
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == IN_MEMORY_PATH
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        (self.max_lifetime_secs > 0).then(|| Duration::from_secs(self.max_lifetime_secs))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_connections == 0 {
            bail!("database.min_connections must be at least 1");
        }
        if self.max_connections < self.min_connections {
            bail!(
                "database.max_connections ({}) must be >= min_connections ({})",
                self.max_connections,
                self.min_connections
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProcessPoolConfig {
    /// Concurrent external processes. `0` means unlimited.
    pub max_concurrent: usize,
}

impl Default for ProcessPoolConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EventsConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl EventsConfig {
    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_page_size == 0 || self.max_page_size == 0 {
            bail!("events page sizes must be at least 1");
        }
        if self.default_page_size > self.max_page_size {
            bail!("events.default_page_size must not exceed events.max_page_size");
        }
        Ok(())
    }
}

impl RunledgerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.events.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = RunledgerConfig::from_toml("").unwrap();
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.process_pool.max_concurrent, 4);
        assert_eq!(config.events.default_page_size, 50);
    }

    #[test]
    fn parses_all_sections() {
        let config = RunledgerConfig::from_toml(
            r#"
            [database]
            path = "/tmp/ledger.db"
            min_connections = 2
            max_connections = 4
            max_lifetime_secs = 0

            [process_pool]
            max_concurrent = 0

            [events]
            default_page_size = 10
            max_page_size = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/ledger.db"));
        assert_eq!(config.database.max_lifetime(), None);
        assert_eq!(config.process_pool.max_concurrent, 0);
        assert_eq!(config.events.page_size(Some(1000)), 20);
        assert_eq!(config.events.page_size(None), 10);
        assert_eq!(config.events.page_size(Some(0)), 1);
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = RunledgerConfig::from_toml("[database]\nmax_conns = 3\n").unwrap_err();
        assert!(format!("{err:#}").contains("max_conns"));
    }

    #[test]
    fn rejects_inverted_connection_bounds() {
        let err = RunledgerConfig::from_toml("[database]\nmin_connections = 5\nmax_connections = 2\n")
            .unwrap_err();
        assert!(format!("{err:#}").contains("max_connections"));
    }

    #[test]
    fn in_memory_is_single_connection() {
        let config = DatabaseConfig::in_memory();
        assert!(config.is_in_memory());
        assert_eq!(config.max_connections, 1);
    }
}

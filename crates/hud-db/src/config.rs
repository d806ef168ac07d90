use std::env;
use std::path::{Path, PathBuf};

/// Database configuration.
///
/// Reads from the `HUD_DATABASE_URL` environment variable, falling back to a
/// SQLite file under the platform data directory when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full SQLite connection URL (`sqlite://<path>`).
    pub database_url: String,
}

impl DbConfig {
    /// File name of the default database inside [`default_data_dir`].
    pub const DEFAULT_FILE_NAME: &str = "hud.db";

    /// Build a config from the environment.
    ///
    /// Priority: `HUD_DATABASE_URL` env var, then the default data-dir path.
    pub fn from_env() -> Self {
        let database_url =
            env::var("HUD_DATABASE_URL").unwrap_or_else(|_| Self::default_url());
        Self { database_url }
    }

    /// Build a config from an explicit URL (useful for tests and CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Build a config pointing at a database file on disk.
    pub fn for_path(path: &Path) -> Self {
        Self::new(format!("sqlite://{}", path.display()))
    }

    /// The URL used when nothing else is configured.
    pub fn default_url() -> String {
        let path = default_data_dir().join(Self::DEFAULT_FILE_NAME);
        format!("sqlite://{}", path.display())
    }

    /// Extract the filesystem path of the database from the URL.
    ///
    /// Returns `None` for in-memory databases or URLs without a path.
    pub fn database_path(&self) -> Option<PathBuf> {
        let rest = self
            .database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))?;
        let path = rest.split('?').next().unwrap_or(rest);
        if path.is_empty() || path == ":memory:" {
            return None;
        }
        Some(PathBuf::from(path))
    }

    /// Whether the URL names an in-memory database, which lives only as
    /// long as a connection to it stays open.
    pub fn is_in_memory(&self) -> bool {
        let (base, query) = self
            .database_url
            .split_once('?')
            .unwrap_or((self.database_url.as_str(), ""));
        base.ends_with(":memory:") || query.split('&').any(|param| param == "mode=memory")
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Directory holding the default database: `<data dir>/hud`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hud")
}

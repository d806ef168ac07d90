//! Configuration file management for hud.
//!
//! Provides a TOML-based config file at `~/.config/hud/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use hud_core::memory::RetentionConfig;
use hud_db::config::DbConfig;

/// Profile used when nothing else names one.
pub const DEFAULT_PROFILE: &str = "default";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub profile: ProfileSection,
    #[serde(default)]
    pub retention: RetentionSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSection {
    /// Profile used when `--profile` and `HUD_PROFILE` are absent.
    pub default: String,
}

impl Default for ProfileSection {
    fn default() -> Self {
        Self {
            default: DEFAULT_PROFILE.to_string(),
        }
    }
}

/// Retention caps; missing keys keep the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_snapshots: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload_bytes: Option<usize>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the hud config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/hud` or `~/.config/hud`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("hud");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("hud")
}

/// Return the path to the hud config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct HudConfig {
    pub db_config: DbConfig,
    pub profile_id: String,
    pub retention: RetentionConfig,
}

impl HudConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `HUD_DATABASE_URL` > `database.url` > data-dir default
    /// - Profile: `cli_profile` > `HUD_PROFILE` > `profile.default` > `"default"`
    /// - Retention: `HUD_MAX_ENTRIES` / `HUD_MAX_SNAPSHOTS` / `HUD_MAX_PAYLOAD_BYTES`
    ///   > `[retention]` > built-in caps
    pub fn resolve(cli_db_url: Option<&str>, cli_profile: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();
        Self::resolve_with(cli_db_url, cli_profile, file_config.as_ref())
    }

    /// Resolution against an already-loaded config file.
    pub fn resolve_with(
        cli_db_url: Option<&str>,
        cli_profile: Option<&str>,
        file_config: Option<&ConfigFile>,
    ) -> Result<Self> {
        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("HUD_DATABASE_URL") {
            url
        } else if let Some(cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::default_url()
        };

        let profile_id = if let Some(profile) = cli_profile {
            profile.to_string()
        } else if let Ok(profile) = std::env::var("HUD_PROFILE") {
            profile
        } else if let Some(cfg) = file_config {
            cfg.profile.default.clone()
        } else {
            DEFAULT_PROFILE.to_string()
        };
        if profile_id.trim().is_empty() {
            anyhow::bail!("profile id must not be empty");
        }

        let defaults = RetentionConfig::default();
        let section = file_config.map(|c| c.retention.clone()).unwrap_or_default();
        let retention = RetentionConfig {
            max_entries: retention_value("HUD_MAX_ENTRIES", section.max_entries)?
                .unwrap_or(defaults.max_entries),
            max_snapshots: retention_value("HUD_MAX_SNAPSHOTS", section.max_snapshots)?
                .unwrap_or(defaults.max_snapshots),
            max_payload_bytes: retention_value("HUD_MAX_PAYLOAD_BYTES", section.max_payload_bytes)?
                .unwrap_or(defaults.max_payload_bytes),
        };
        if retention.max_snapshots == 0 || retention.max_entries == 0 {
            anyhow::bail!("retention caps must be at least 1");
        }

        Ok(Self {
            db_config: DbConfig::new(db_url),
            profile_id,
            retention,
        })
    }
}

fn retention_value(var: &str, from_file: Option<usize>) -> Result<Option<usize>> {
    match std::env::var(var) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("{var} must be a non-negative integer, got {raw:?}"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(from_file),
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn clear_env() {
        for var in [
            "HUD_DATABASE_URL",
            "HUD_PROFILE",
            "HUD_MAX_ENTRIES",
            "HUD_MAX_SNAPSHOTS",
            "HUD_MAX_PAYLOAD_BYTES",
        ] {
            unsafe { std::env::remove_var(var) };
        }
    }

    fn file(url: &str, profile: &str) -> ConfigFile {
        ConfigFile {
            database: DatabaseSection {
                url: url.to_string(),
            },
            profile: ProfileSection {
                default: profile.to_string(),
            },
            retention: RetentionSection {
                max_entries: None,
                max_snapshots: Some(20),
                max_payload_bytes: None,
            },
        }
    }

    #[test]
    fn config_file_roundtrip() {
        let original = file("sqlite:///tmp/hud.db", "raid");
        let contents = toml::to_string_pretty(&original).unwrap();
        assert!(!contents.contains("max_entries"), "unset caps are omitted");

        let loaded: ConfigFile = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.database.url, original.database.url);
        assert_eq!(loaded.profile.default, "raid");
        assert_eq!(loaded.retention.max_snapshots, Some(20));
    }

    #[test]
    fn minimal_config_file_uses_defaults() {
        let loaded: ConfigFile = toml::from_str("[database]\nurl = \"sqlite://x.db\"\n").unwrap();
        assert_eq!(loaded.profile.default, DEFAULT_PROFILE);
        assert!(loaded.retention.max_entries.is_none());
    }

    #[test]
    fn resolve_with_cli_flags_overrides_all() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var("HUD_DATABASE_URL", "sqlite://env.db") };
        unsafe { std::env::set_var("HUD_PROFILE", "env-profile") };

        let cfg = file("sqlite://file.db", "file-profile");
        let resolved =
            HudConfig::resolve_with(Some("sqlite://cli.db"), Some("cli-profile"), Some(&cfg))
                .unwrap();
        assert_eq!(resolved.db_config.database_url, "sqlite://cli.db");
        assert_eq!(resolved.profile_id, "cli-profile");

        clear_env();
    }

    #[test]
    fn resolve_with_env_overrides_config_file() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var("HUD_DATABASE_URL", "sqlite://env.db") };
        unsafe { std::env::set_var("HUD_MAX_SNAPSHOTS", "7") };

        let cfg = file("sqlite://file.db", "file-profile");
        let resolved = HudConfig::resolve_with(None, None, Some(&cfg)).unwrap();
        assert_eq!(resolved.db_config.database_url, "sqlite://env.db");
        assert_eq!(resolved.profile_id, "file-profile");
        assert_eq!(resolved.retention.max_snapshots, 7);

        clear_env();
    }

    #[test]
    fn resolve_uses_config_file_then_defaults() {
        let _lock = lock_env();
        clear_env();

        let cfg = file("sqlite://file.db", "file-profile");
        let resolved = HudConfig::resolve_with(None, None, Some(&cfg)).unwrap();
        assert_eq!(resolved.db_config.database_url, "sqlite://file.db");
        assert_eq!(resolved.retention.max_snapshots, 20);
        assert_eq!(
            resolved.retention.max_entries,
            RetentionConfig::default().max_entries
        );

        let resolved = HudConfig::resolve_with(None, None, None).unwrap();
        assert_eq!(resolved.db_config.database_url, DbConfig::default_url());
        assert_eq!(resolved.profile_id, DEFAULT_PROFILE);
        assert_eq!(resolved.retention, RetentionConfig::default());
    }

    #[test]
    fn resolve_rejects_bad_values() {
        let _lock = lock_env();
        clear_env();

        assert!(HudConfig::resolve_with(None, Some("  "), None).is_err());

        unsafe { std::env::set_var("HUD_MAX_ENTRIES", "lots") };
        let err = HudConfig::resolve_with(None, None, None).unwrap_err();
        assert!(err.to_string().contains("HUD_MAX_ENTRIES"), "unexpected: {err}");

        unsafe { std::env::set_var("HUD_MAX_ENTRIES", "0") };
        assert!(HudConfig::resolve_with(None, None, None).is_err());

        clear_env();
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("hud/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}

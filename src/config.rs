//! Configuration loading.
//!
//! Configuration is loaded from TOML with the following resolution order:
//! 1. `--config <path>` (CLI flag, must exist)
//! 2. `~/.mimir/config.toml` (user)
//! 3. `/etc/mimir/config.toml` (system)
//!
//! With no explicit path and no file found, defaults apply.
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.mimir/secrets.toml` (user, must be 0600)
//! 2. `/etc/mimir/secrets.toml` (system, must be 0600)

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{self, CacheConfig, DEFAULT_MAX_FAILURES, MAX_REGISTRY_ENTRIES};
use crate::remote::gemini::DEFAULT_BASE_URL;
use crate::session::{self, SessionConfig};
use crate::{MimirError, Result};

/// Model used when neither the caller nor the session names one.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub sessions: SessionSection,
    #[serde(default)]
    pub gemini: GeminiSection,
}

/// `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Cache lease in seconds (default: 3600).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Registry entry cap (default: 500).
    #[serde(default = "default_max_registry_entries")]
    pub max_registry_entries: usize,
    /// Remembered transient failures (default: 100).
    #[serde(default = "default_max_failures")]
    pub max_failures: u64,
    /// Registry file (default: `~/.cache/mimir/context_caches.json`).
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
    /// Seconds a turn waits on an in-flight prewarm (default: 5).
    #[serde(default = "default_prewarm_wait_secs")]
    pub prewarm_wait_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_registry_entries: default_max_registry_entries(),
            max_failures: default_max_failures(),
            registry_path: None,
            prewarm_wait_secs: default_prewarm_wait_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_registry_entries() -> usize {
    MAX_REGISTRY_ENTRIES
}

fn default_max_failures() -> u64 {
    DEFAULT_MAX_FAILURES
}

fn default_prewarm_wait_secs() -> u64 {
    5
}

/// `[sessions]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// Idle timeout in seconds (default: 3600).
    #[serde(default = "default_session_timeout_secs")]
    pub timeout_secs: u64,
    /// Live sessions kept in memory (default: 50).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Turns kept per session (default: 10).
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Database file (default: `~/.cache/mimir/sessions.db`).
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout_secs(),
            max_sessions: default_max_sessions(),
            max_turns: default_max_turns(),
            db_path: None,
        }
    }
}

fn default_session_timeout_secs() -> u64 {
    3600
}

fn default_max_sessions() -> usize {
    50
}

fn default_max_turns() -> usize {
    10
}

/// `[gemini]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiSection {
    /// API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model for sessions that do not name one.
    #[serde(default = "default_model")]
    pub default_model: String,
}

impl Default for GeminiSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_model: default_model(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path that does not exist is an error; otherwise a
    /// missing file means defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse a config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MimirError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            MimirError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(MimirError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".mimir").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/mimir/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Coordinator settings, with the registry persisted at its configured
    /// or default path.
    pub fn cache_config(&self) -> CacheConfig {
        let c = &self.cache;
        CacheConfig::new()
            .ttl(Duration::from_secs(c.ttl_secs))
            .max_registry_entries(c.max_registry_entries)
            .max_failures(c.max_failures)
            .prewarm_wait(Duration::from_secs(c.prewarm_wait_secs))
            .registry_path(
                c.registry_path
                    .clone()
                    .unwrap_or_else(cache::default_registry_path),
            )
    }

    /// Session store settings, with the database at its configured or
    /// default path.
    pub fn session_config(&self) -> SessionConfig {
        let s = &self.sessions;
        SessionConfig::new()
            .timeout(Duration::from_secs(s.timeout_secs))
            .max_sessions(s.max_sessions)
            .max_turns(s.max_turns)
            .db_path(s.db_path.clone().unwrap_or_else(session::default_db_path))
    }
}

/// Secrets (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub gemini: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

/// Environment variables consulted when the secrets file has no key, in order.
const GEMINI_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY"];

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists.
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".mimir").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/mimir/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Parse a secrets file after checking its permissions.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            MimirError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            MimirError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Reject files readable by group or others.
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            MimirError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(MimirError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Gemini API key from the file, else the environment.
    pub fn gemini_api_key(&self) -> Option<String> {
        self.gemini
            .as_ref()
            .map(|s| s.api_key.clone())
            .filter(|k| !k.is_empty())
            .or_else(|| {
                GEMINI_ENV_VARS
                    .iter()
                    .find_map(|var| std::env::var(var).ok().filter(|k| !k.is_empty()))
            })
    }
}

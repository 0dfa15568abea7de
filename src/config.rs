//! Configuration file parser for ~/.config/feedpull/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, though we log a warning for each one
//! since they are usually typos.
use crate::feed::{FetchOptions, IdentityKey, MergePolicy, ReconcileOptions, DEFAULT_MAX_CONCURRENCY};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds the maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Engine-wide configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Custom Debug impl masks the HTTP password.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// User-Agent header. `None` sends `feedpull/<version>`.
    pub user_agent: Option<String>,

    /// Maximum simultaneous requests, which is also the batch size.
    pub max_concurrency: usize,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Largest accepted response body, in bytes.
    pub max_body_bytes: usize,

    /// Ask servers for gzip/deflate transfer compression.
    pub compress: bool,

    /// Redirect hops followed before giving up.
    pub max_redirects: usize,

    /// How entries seen both before and now are merged on update.
    pub merge_policy: MergePolicy,

    /// Entry fields tried, in order, to recognise an entry across polls.
    pub identity_order: Vec<IdentityKey>,

    /// HTTP Basic credentials sent with every request.
    pub http_auth: Option<AuthConfig>,
}

#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl Default for Config {
    fn default() -> Self {
        let fetch = FetchOptions::default();
        Self {
            user_agent: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout_secs: fetch.timeout.as_secs(),
            max_body_bytes: fetch.max_body_bytes,
            compress: fetch.compress,
            max_redirects: 10,
            merge_policy: MergePolicy::default(),
            identity_order: ReconcileOptions::default().identity,
            http_auth: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("user_agent", &self.user_agent)
            .field("max_concurrency", &self.max_concurrency)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("compress", &self.compress)
            .field("max_redirects", &self.max_redirects)
            .field("merge_policy", &self.merge_policy)
            .field("identity_order", &self.identity_order)
            .field(
                "http_auth",
                &self
                    .http_auth
                    .as_ref()
                    .map(|auth| (auth.username.as_str(), "[REDACTED]")),
            )
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "user_agent",
        "max_concurrency",
        "timeout_secs",
        "max_body_bytes",
        "compress",
        "max_redirects",
        "merge_policy",
        "identity_order",
        "http_auth",
    ];

    /// `~/.config/feedpull/config.toml`, or `None` when `HOME` is unset.
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(
            PathBuf::from(home)
                .join(".config")
                .join("feedpull")
                .join("config.toml"),
        )
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading so a huge file is never pulled into memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            max_concurrency = config.max_concurrency,
            merge_policy = ?config.merge_policy,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Fetch options seeded from this configuration.
    pub fn fetch_options(&self) -> FetchOptions {
        let mut options = FetchOptions::default()
            .with_compression(self.compress)
            .with_max_concurrency(self.max_concurrency)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_max_body_bytes(self.max_body_bytes);
        if let Some(user_agent) = &self.user_agent {
            options = options.with_user_agent(user_agent.clone());
        }
        if let Some(auth) = &self.http_auth {
            options = options.with_http_auth(auth.username.clone(), auth.password.clone());
        }
        options
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        let defaults = ReconcileOptions::default();
        ReconcileOptions {
            policy: self.merge_policy,
            identity: if self.identity_order.is_empty() {
                defaults.identity
            } else {
                self.identity_order.clone()
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

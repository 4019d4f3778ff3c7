//! TOML configuration file support.
//!
//! Loads from (in order):
//! 1. An explicit `--config` path
//! 2. `memberid.toml` next to the executable
//! 3. `%LOCALAPPDATA%\memberid\config.toml` (Windows) or
//!    `~/.config/memberid/config.toml`
//! 4. Environment variable overrides (e.g. `MEMBERID_KEY_URL`)
//!
//! CLI arguments always take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, ResultExt as _};
use crate::key::{HttpKeySource, KeyProvider, StaticKeySource};
use crate::policy::Policy;

pub const DEFAULT_KEY_URL: &str = "http://localhost:8000/public-key";

// ---------------------------------------------------------------------------
// Config structs (map 1-to-1 with the TOML sections)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemberIdConfig {
    pub key: KeyConfig,
    pub policy: Policy,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Endpoint serving the issuer's public key as hex text.
    pub url: String,
    /// Inline key hex.  When set, no request is made.
    pub hex: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Path to a JSON-lines log file.  Empty string means no file logging.
    pub json_log_file: String,
    /// Emit JSON to stdout instead of the human console format.
    pub json_stdout: bool,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_KEY_URL.to_string(),
            hex: None,
            timeout_secs: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_log_file: String::new(),
            json_stdout: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl MemberIdConfig {
    /// Try to load from a specific path.  Returns `Ok(default)` if the file
    /// does not exist; returns `Err` if the file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .ctx_config(&format!("read config file {}", path.display()))?;
        let cfg: MemberIdConfig = toml::from_str(&text).ctx_config("parse config TOML")?;
        Ok(cfg)
    }

    /// Load config using the standard search order (see module docs).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }

        if let Ok(exe) = std::env::current_exe() {
            let candidate = exe.with_file_name("memberid.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        #[cfg(windows)]
        {
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                let candidate = PathBuf::from(local).join("memberid").join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        #[cfg(not(windows))]
        {
            if let Some(home) = std::env::var_os("HOME") {
                let candidate = PathBuf::from(home)
                    .join(".config")
                    .join("memberid")
                    .join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        Ok(Self::default())
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("MEMBERID_KEY_URL") {
            self.key.url = url;
        }
        if let Ok(hex) = std::env::var("MEMBERID_KEY_HEX") {
            self.key.hex = Some(hex);
        }
        if let Ok(level) = std::env::var("MEMBERID_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}

impl KeyConfig {
    /// Build the key provider this section describes.  Nothing is fetched
    /// until [`KeyProvider::ensure_key_loaded`] is called.
    pub fn provider(&self) -> KeyProvider {
        match self.hex.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            Some(hex) => KeyProvider::new(StaticKeySource(hex.to_string())),
            None => KeyProvider::new(HttpKeySource::with_timeout(
                self.url.clone(),
                Duration::from_secs(self.timeout_secs),
            )),
        }
    }
}

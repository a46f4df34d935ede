//! YAML configuration loading shared by the service binaries.
//!
//! The file named by `CONFIG_PATH` (fallback `config.yaml`) is read as text,
//! `${NAME}` placeholders are replaced with environment values, and the
//! result is deserialized into the caller's `serde` type. Durations are
//! written the humane way: `500ms`, `10s`, `2m`, `1h`, or combinations such
//! as `1m30s`.

use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// Used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {reason}")]
    Io {
        /// File that was attempted.
        path: PathBuf,
        /// OS error.
        reason: String,
    },

    /// The YAML did not match the expected shape.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A value is present but unusable.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Path of the configuration file: `$CONFIG_PATH` or `config.yaml`.
#[must_use]
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .filter(|p| !p.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Read, expand and parse the file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if it does not deserialize into `T`.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let expanded = expand_env(&raw)?;
    let config = parse(&expanded)?;
    tracing::info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// Parse YAML text that has already been expanded.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] on malformed or mistyped YAML.
pub fn parse<T: DeserializeOwned>(yaml: &str) -> Result<T, ConfigError> {
    serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Replace `${NAME}` with the value of the environment variable `NAME`.
///
/// # Errors
///
/// Only fails if the placeholder pattern cannot be compiled.
pub fn expand_env(raw: &str) -> Result<String, ConfigError> {
    expand_with(raw, |name| std::env::var(name).ok())
}

/// [`expand_env`] with an explicit variable lookup. Unknown variables expand
/// to the empty string and are logged.
///
/// # Errors
///
/// Only fails if the placeholder pattern cannot be compiled.
pub fn expand_with<F>(raw: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let placeholder = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Invalid(format!("placeholder pattern: {e}")))?;

    let expanded = placeholder.replace_all(raw, |caps: &Captures<'_>| {
        let name = &caps[1];
        lookup(name).unwrap_or_else(|| {
            tracing::warn!(variable = name, "Config references an unset environment variable");
            String::new()
        })
    });
    Ok(expanded.into_owned())
}

/// Parse a humane duration: one or more `<integer><unit>` pairs with units
/// `ms`, `s`, `m`, `h`. A bare `0` is also accepted.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for empty input, a missing or unknown
/// unit, or overflow.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = |why: &str| ConfigError::Invalid(format!("duration {input:?}: {why}"));

    let text = input.trim();
    if text.is_empty() {
        return Err(invalid("empty"));
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(invalid("expected a number"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| invalid("number out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(|| invalid("overflow"))?),
            "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(|| invalid("overflow"))?),
            "" => return Err(invalid("missing unit")),
            other => return Err(invalid(&format!("unknown unit {other:?}"))),
        };
        rest = &rest[unit_len..];
        total = total.checked_add(part).ok_or_else(|| invalid("overflow"))?;
    }
    Ok(total)
}

/// `deserialize_with` adapter for [`parse_duration`].
///
/// # Errors
///
/// Fails when the value is not a string or not a valid duration.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_duration(&text).map_err(serde::de::Error::custom)
}

/// `server` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Listen addresses, e.g. `0.0.0.0:8080`.
    #[serde(default)]
    pub addrs: Vec<String>,
}

impl ServerConfig {
    /// Require at least one non-empty address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addrs.is_empty() {
            return Err(ConfigError::Invalid(
                "server.addrs must list at least one address".to_string(),
            ));
        }
        if self.addrs.iter().any(|a| a.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "server.addrs contains an empty address".to_string(),
            ));
        }
        Ok(())
    }
}

/// `metrics` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder and serve `GET /metrics`.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

const fn default_true() -> bool {
    true
}

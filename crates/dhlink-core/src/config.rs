//! Configuration resolution for dhlink.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/dhlink/settings.json)
//! 3. Project config (.dhlink/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Config files may be partial: each file is deep-merged over the layers
//! below it, so a project file that only sets `crypto.cipher` keeps every
//! other value from the global file and the defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete dhlink configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener (responder) configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Serve each accepted connection on its own task instead of one at a time.
    pub concurrent_sessions: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 5000,
            concurrent_sessions: false,
        }
    }
}

/// Connector (initiator) configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub server_addr: String,
    pub server_port: u16,
    /// Entry port announced to the responder during the preamble.
    pub entry_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1".to_string(),
            server_port: 5000,
            entry_port: 5001,
        }
    }
}

/// Key agreement and cipher selection. Both peers must agree on these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CryptoConfig {
    /// Diffie-Hellman modulus size in bits.
    pub modulus_bits: u32,
    /// Cipher suite name (`des-ecb` or `chacha20-poly1305`).
    pub cipher: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            modulus_bits: 1024,
            cipher: "des-ecb".to_string(),
        }
    }
}

/// Transport limits applied around a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    /// Longest accepted line, excluding the terminator.
    pub max_frame_bytes: usize,
    /// Whole-session deadline in seconds. 0 disables it.
    pub session_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 64 * 1024,
            session_timeout_secs: 30,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `RUST_LOG` filter when the env-var is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "dhlink=info,dhlink_session=info,dhlink_crypto=info".to_string(),
            json: false,
        }
    }
}

/// Configuration file layer, lowest priority first.
///
/// Defaults sit below these and environment variables and CLI flags above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigSource {
    Global,
    Project,
}

impl Config {
    /// Check values that would otherwise fail deep inside a session.
    pub fn validate(&self) -> Result<()> {
        if self.transport.max_frame_bytes == 0 {
            return Err(Error::Config(
                "transport.max_frame_bytes must be greater than zero".to_string(),
            ));
        }
        if self.crypto.cipher.trim().is_empty() {
            return Err(Error::Config("crypto.cipher must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let project_path = project_dir.map(|dir| dir.join(".dhlink").join("settings.json"));
    load_config_from(
        global_config_path().as_deref(),
        project_path.as_deref(),
        |key| std::env::var(key).ok(),
    )
}

/// Load configuration from explicit file locations and an environment lookup.
///
/// Missing files are skipped; files that exist but cannot be parsed are errors.
pub fn load_config_from<F>(global: Option<&Path>, project: Option<&Path>, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = serde_json::to_value(Config::default())?;

    for (source, path) in [(ConfigSource::Global, global), (ConfigSource::Project, project)] {
        let Some(path) = path else { continue };
        if !path.exists() {
            continue;
        }
        let overlay = load_config_file(path)?;
        tracing::debug!(path = %path.display(), ?source, "Loaded config layer");
        merge_values(&mut merged, overlay);
    }

    let mut config: Config = serde_json::from_value(merged).map_err(|e| {
        Error::Config(format!("Invalid configuration: {e}"))
    })?;

    apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".dhlink").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/dhlink/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("dhlink").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(Error::Config(format!(
            "Config file {} must contain a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other value replaces what was there.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw:?}")))
}

fn apply_env_overrides<F>(config: &mut Config, env: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = env("DHLINK_BIND_ADDR") {
        config.server.bind_addr = val;
    }
    if let Some(val) = env("DHLINK_PORT") {
        config.server.port = parse_env("DHLINK_PORT", &val)?;
    }
    if let Some(val) = env("DHLINK_CONCURRENT") {
        config.server.concurrent_sessions = parse_env("DHLINK_CONCURRENT", &val)?;
    }
    if let Some(val) = env("DHLINK_SERVER_ADDR") {
        config.client.server_addr = val;
    }
    if let Some(val) = env("DHLINK_SERVER_PORT") {
        config.client.server_port = parse_env("DHLINK_SERVER_PORT", &val)?;
    }
    if let Some(val) = env("DHLINK_ENTRY_PORT") {
        config.client.entry_port = parse_env("DHLINK_ENTRY_PORT", &val)?;
    }
    if let Some(val) = env("DHLINK_MODULUS_BITS") {
        config.crypto.modulus_bits = parse_env("DHLINK_MODULUS_BITS", &val)?;
    }
    if let Some(val) = env("DHLINK_CIPHER") {
        config.crypto.cipher = val;
    }
    if let Some(val) = env("DHLINK_SESSION_TIMEOUT_SECS") {
        config.transport.session_timeout_secs = parse_env("DHLINK_SESSION_TIMEOUT_SECS", &val)?;
    }
    if let Some(val) = env("DHLINK_LOG_FILTER") {
        config.logging.filter = val;
    }
    Ok(())
}

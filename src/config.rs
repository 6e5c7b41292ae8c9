//! Configuration for the watch server and client.
//!
//! Layered the same way at every entry point:
//! - Default values
//! - TOML configuration file (`.treesync/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TS_` and use double underscores
//! to separate nested levels:
//! - `TS_SERVER__BIND=0.0.0.0:4000` sets `server.bind`
//! - `TS_WATCH__MOVE_WINDOW_MS=800` sets `watch.move_window_ms`
//! - `TS_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR: &str = ".treesync";
pub const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "TS_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Server (push channel) settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Watch behaviour shared by server and client
    #[serde(default)]
    pub watch: WatchConfig,

    /// Client-side settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Seconds between heartbeat events on an open channel
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Events buffered per channel before new events are dropped for it
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// How long a removal waits for a matching add before it is reported
    /// as a deletion. Heuristic; raise it on slow filesystems.
    #[serde(default = "default_move_window_ms")]
    pub move_window_ms: u64,

    /// Default for directory watches when the request does not say
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Path components whose events are never reported
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClientConfig {
    /// Base URL of the watch server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Lifetime of cached directory listings
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for every module
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `registry = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_bind() -> String {
    "127.0.0.1:3001".to_string()
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_channel_capacity() -> usize {
    256
}
fn default_move_window_ms() -> u64 {
    500
}
fn default_ignore() -> Vec<String> {
    vec![".git".to_string(), "node_modules".to_string()]
}
fn default_server_url() -> String {
    "http://127.0.0.1:3001".to_string()
}
fn default_cache_ttl_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            server: ServerConfig::default(),
            watch: WatchConfig::default(),
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            heartbeat_secs: default_heartbeat_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            move_window_ms: default_move_window_ms(),
            recursive: true,
            ignore: default_ignore(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

impl WatchConfig {
    pub fn move_window(&self) -> Duration {
        Duration::from_millis(self.move_window_ms)
    }
}

impl ClientConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels, single underscore
            // stays inside field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.treesync/settings.toml` from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(CONFIG_FILE))
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}

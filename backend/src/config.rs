//! Configuration for the gatekeeper.

use std::env;
use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure, built once at startup and never re-read.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Upstream Ollama connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Timeout for forwarded inference calls. Generation on big models is slow.
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_secs: u64,
    /// Timeout for `/api/ps`, `/api/tags` and keep-alive directives.
    #[serde(default = "default_control_timeout")]
    pub control_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Residency granted to a model loaded through the preload route.
    #[serde(default = "default_preload_keep_alive")]
    pub preload_keep_alive_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            forward_timeout_secs: default_forward_timeout(),
            control_timeout_secs: default_control_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            preload_keep_alive_secs: default_preload_keep_alive(),
        }
    }
}

impl OllamaConfig {
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn preload_keep_alive(&self) -> Duration {
        Duration::from_secs(self.preload_keep_alive_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Administrative credential. Barred from inference routes.
    pub master_key: String,
}

/// Residency configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModelsConfig {
    /// Models kept resident for the lifetime of the process, in load order.
    #[serde(default)]
    pub pinned: Vec<String>,
    /// Serialize every residency transition behind one lock.
    #[serde(default)]
    pub serialize_transitions: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Path prefix under which requests are forwarded upstream.
    #[serde(default = "default_mount")]
    pub mount: String,
    /// Largest inbound request body accepted (it is buffered once to find the model).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            mount: default_mount(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ProxyConfig {
    /// Strip the mount prefix from an inbound path.
    ///
    /// Returns `None` when the path is outside the mount. The mount is
    /// normalized by `Config::validate`, so `"/"` becomes `""`.
    pub fn upstream_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.mount.is_empty() {
            return Some(path);
        }
        let rest = path.strip_prefix(self.mount.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Number of recent usage records returned by the stats route.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: u32,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_forward_timeout() -> u64 {
    300
}
fn default_control_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_preload_keep_alive() -> u64 {
    600
}
fn default_mount() -> String {
    "/".to_string()
}
fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_database_url() -> String {
    "sqlite:./data/gatekeeper.db".to_string()
}
fn default_recent_limit() -> u32 {
    50
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Short aliases: `OLLAMA_URL`, `API_KEY`, `PINNED_MODELS`, `DATABASE_URL`
    /// 2. Environment variables (GATEKEEPER__SECTION__KEY format)
    /// 3. gatekeeper.toml file (if present)
    /// 4. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let pinned_alias = env::var("PINNED_MODELS").ok().map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect::<Vec<_>>()
        });

        let config = ConfigLoader::builder()
            .add_source(File::with_name("gatekeeper").required(false))
            .add_source(
                Environment::with_prefix("GATEKEEPER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("models.pinned")
                    .try_parsing(true),
            )
            .set_override_option("ollama.base_url", env::var("OLLAMA_URL").ok())?
            .set_override_option("auth.master_key", env::var("API_KEY").ok())?
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?
            .set_override_option("models.pinned", pinned_alias)?
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()
    }

    /// Normalize derived fields and reject unusable values.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.auth.master_key.trim().is_empty() {
            return Err(ConfigError::Message(
                "auth.master_key must be set (GATEKEEPER__AUTH__MASTER_KEY or API_KEY)".to_string(),
            ));
        }

        if self.ollama.preload_keep_alive_secs == 0 {
            return Err(ConfigError::Message(
                "ollama.preload_keep_alive_secs must be positive (0 would unload the preloaded model)"
                    .to_string(),
            ));
        }

        let mount = self.proxy.mount.trim().trim_end_matches('/');
        self.proxy.mount = if mount.is_empty() {
            String::new()
        } else if mount.starts_with('/') {
            mount.to_string()
        } else {
            format!("/{}", mount)
        };

        self.ollama.base_url = self.ollama.base_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

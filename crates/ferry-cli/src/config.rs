//! Configuration file for the ferry CLI.

use ferry_core::node::{ClientConfig, ServerConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// ferry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server defaults for `ferry serve`
    #[serde(default)]
    pub server: ServerSection,
    /// Client defaults for `ferry list` and `ferry get`
    #[serde(default)]
    pub client: ClientSection,
    /// Transfer tuning
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Address to listen on
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory to share when `--dir` is not given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_dir: Option<PathBuf>,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Server host
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Where downloads go when `--output` is not given
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Connection attempt limit in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Server chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Client socket read buffer in bytes
    #[serde(default = "default_chunk_size")]
    pub read_buffer_size: usize,
    /// Largest listing the client will buffer, in bytes
    #[serde(default = "default_max_list_size")]
    pub max_list_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    ferry_core::DEFAULT_PORT
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("downloads"))
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_chunk_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_list_size() -> usize {
    ferry_core::MAX_LIST_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            port: default_port(),
            shared_dir: None,
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            download_dir: default_download_dir(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            read_buffer_size: default_chunk_size(),
            max_list_size: default_max_list_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ferry/config.toml")
    }

    /// Load config from the default path, falling back to built-in defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse the server bind address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_bind_ip(&self) -> anyhow::Result<IpAddr> {
        self.server
            .bind_ip
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {}", self.server.bind_ip, e))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_bind_ip()?;

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.client.host.trim().is_empty() {
            anyhow::bail!("Client host must not be empty");
        }
        if self.client.host.contains('/') || self.client.host.contains('\\') {
            anyhow::bail!("Client host '{}' contains invalid characters", self.client.host);
        }

        if self.client.connect_timeout_secs == 0 {
            anyhow::bail!("Connect timeout must be at least 1 second");
        }

        self.server_config()?.validate()?;
        self.client_config().validate()?;
        Ok(())
    }

    /// Engine configuration for `ferry serve`
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is invalid.
    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        Ok(ServerConfig {
            bind_ip: self.parse_bind_ip()?,
            chunk_size: self.transfer.chunk_size,
            ..ServerConfig::default()
        })
    }

    /// Engine configuration for `ferry list` and `ferry get`
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_secs(self.client.connect_timeout_secs),
            read_buffer_size: self.transfer.read_buffer_size,
            max_list_size: self.transfer.max_list_size,
        }
    }
}

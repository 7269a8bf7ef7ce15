use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::api::validation::{validate_base_url, validate_device_mac};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the hospital API, including the version prefix
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Upper bound for a single backend round trip in seconds (default: 10)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/api/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// MAC address the backend knows this kiosk by. A binding stored with
    /// `medscreen device bind` takes precedence.
    pub mac: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mac: None,
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_reader_kind")]
    pub kind: ReaderKind,
    /// Character device for `kind = "device"` (serial or HID wedge readers)
    pub device_path: Option<PathBuf>,
    #[serde(default)]
    pub mode: ReaderMode,
    /// Delay before retrying a reader that failed to start (default: 5)
    #[serde(default = "default_hardware_retry_secs")]
    pub hardware_retry_secs: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            kind: default_reader_kind(),
            device_path: None,
            mode: ReaderMode::default(),
            hardware_retry_secs: default_hardware_retry_secs(),
        }
    }
}

impl ReaderConfig {
    pub fn hardware_retry_delay(&self) -> Duration {
        Duration::from_secs(self.hardware_retry_secs)
    }
}

fn default_reader_kind() -> ReaderKind {
    ReaderKind::Stdin
}

fn default_hardware_retry_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReaderKind {
    Stdin,
    Device,
    Loopback,
    None,
}

/// How a line typed by a wedge reader is interpreted
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReaderMode {
    #[default]
    Auto,
    Nfc,
    Qr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Quiet period after a failed attempt before scanning re-arms
    #[serde(default = "default_error_cooldown_ms")]
    pub error_cooldown_ms: u64,
    #[serde(default = "default_network_retry_secs")]
    pub network_retry_secs: u64,
    #[serde(default = "default_max_network_retries")]
    pub max_network_retries: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            error_cooldown_ms: default_error_cooldown_ms(),
            network_retry_secs: default_network_retry_secs(),
            max_network_retries: default_max_network_retries(),
        }
    }
}

impl GateConfig {
    pub fn error_cooldown(&self) -> Duration {
        Duration::from_millis(self.error_cooldown_ms)
    }

    pub fn network_retry_delay(&self) -> Duration {
        Duration::from_secs(self.network_retry_secs)
    }
}

fn default_error_cooldown_ms() -> u64 {
    2500
}

fn default_network_retry_secs() -> u64 {
    3
}

fn default_max_network_retries() -> u32 {
    2
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

fn default_log_level() -> String {
    "info".to_string()
}

/// Prometheus exporter. Disabled unless `listen` is set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    pub listen: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            device: DeviceConfig::default(),
            reader: ReaderConfig::default(),
            gate: GateConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Check values that parse fine but would misbehave at runtime.
    /// Returns human-readable problems; an empty list means the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if let Err(e) = validate_base_url(&self.backend.base_url) {
            problems.push(format!("backend.base_url: {}", e));
        }
        if self.backend.timeout_secs == 0 {
            problems.push("backend.timeout_secs must be greater than zero".to_string());
        }
        if let Some(mac) = &self.device.mac {
            if let Err(e) = validate_device_mac(mac) {
                problems.push(format!("device.mac: {}", e));
            }
        }
        if self.reader.kind == ReaderKind::Device && self.reader.device_path.is_none() {
            problems.push("reader.device_path is required when reader.kind = \"device\"".to_string());
        }
        if !(2000..=3000).contains(&self.gate.error_cooldown_ms) {
            warn!(
                cooldown_ms = self.gate.error_cooldown_ms,
                "Error cooldown outside the 2-3 second range"
            );
            problems.push(format!(
                "gate.error_cooldown_ms = {} is outside 2000..=3000",
                self.gate.error_cooldown_ms
            ));
        }

        problems
    }
}

use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Zone camera wall-clock timestamps are interpreted in when none is configured.
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

/// A single camera: the unique name doubles as the delivery key.
#[derive(Clone, Deserialize)]
pub struct CameraConfig {
    /// Display name, unique across the registry
    pub name: String,
    /// Host or host:port of the camera's HTTP interface
    pub ip_address: String,
    /// HTTP basic auth user
    pub username: String,
    /// HTTP basic auth password
    pub password: String,
}

// Credentials stay out of logs.
impl std::fmt::Debug for CameraConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraConfig")
            .field("name", &self.name)
            .field("ip_address", &self.ip_address)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Outbound mail settings.
#[derive(Clone, Deserialize)]
pub struct SmtpReceiver {
    pub from: String,
    /// One address, or several separated by commas
    pub to: String,
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl SmtpReceiver {
    /// Recipient addresses, split on commas and trimmed.
    pub fn recipients(&self) -> Vec<&str> {
        self.to
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl std::fmt::Debug for SmtpReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpReceiver")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("server", &self.server)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, Deserialize)]
pub struct Receivers {
    pub smtp: SmtpReceiver,
}

/// Delivery tuning for the dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Notification attempts per event before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Event channel capacity; 1 keeps subscribers in lock-step with the dispatcher
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Periodic retry sweep. Unset means retries only advance when an event arrives.
    #[serde(default)]
    pub retry_interval_secs: Option<u64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            channel_capacity: default_channel_capacity(),
            retry_interval_secs: None,
        }
    }
}

impl DispatcherConfig {
    pub fn retry_interval(&self) -> Option<Duration> {
        self.retry_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_channel_capacity() -> usize {
    1
}

/// Backoff applied when a camera's event stream fails.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// Consecutive failures before the camera is marked degraded; unset retries forever
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect number `failures` (1-based), doubling up to the cap.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let initial = Duration::from_millis(self.initial_delay_ms);
        let max = Duration::from_secs(self.max_delay_secs).max(initial);
        let exp = failures.saturating_sub(1).min(16);
        initial.saturating_mul(1u32 << exp).min(max)
    }
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_secs() -> u64 {
    60
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

const DEFAULT_SNAPSHOT_DIR: &str = "/tmp";

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SNAPSHOT_DIR)
}

fn default_snapshot_timeout() -> u64 {
    10
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Cameras to watch
    pub cameras: Vec<CameraConfig>,
    /// Where notifications go
    pub receivers: Receivers,
    /// IANA zone for camera-local timestamps
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Directory snapshots are written to
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_secs: u64,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Config {
    /// Load and validate configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cameras.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one camera is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "camera name must not be empty".into(),
                ));
            }
            if camera.ip_address.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "camera '{}' has no ip_address",
                    camera.name
                )));
            }
            if !seen.insert(camera.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate camera name '{}'",
                    camera.name
                )));
            }
        }

        if self.receivers.smtp.recipients().is_empty() {
            return Err(ConfigError::ValidationError(
                "receivers.smtp.to must name at least one address".into(),
            ));
        }
        if self.dispatcher.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "dispatcher.max_attempts must be at least 1".into(),
            ));
        }
        if self.dispatcher.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "dispatcher.channel_capacity must be at least 1".into(),
            ));
        }

        self.timezone()?;
        Ok(())
    }

    /// The configured zone, resolved against the IANA database.
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone.parse::<Tz>().map_err(|e| {
            ConfigError::ValidationError(format!("unknown timezone '{}': {}", self.timezone, e))
        })
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_timeout_secs)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

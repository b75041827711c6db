use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Longest accepted delay between progress polls
pub const MAX_POLL_INTERVAL_MS: u64 = 60 * 60 * 1000;

/// Longest accepted polling window for one extraction
pub const MAX_POLL_SECONDS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbedcamConfig {
    pub backend: BackendConfig,
    pub session: SessionConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackendConfig {
    /// Base URL of the access-control REST API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Delay between extraction progress polls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on one extraction's polling in seconds (0 = poll until done or closed)
    #[serde(default = "default_max_poll_seconds")]
    pub max_poll_seconds: u64,

    /// Ask the backend to open its capture viewer when collection starts
    #[serde(default = "default_show_viewer")]
    pub show_viewer: bool,

    /// Ask the backend to drop previously collected samples when collection starts
    #[serde(default = "default_clear_existing")]
    pub clear_existing: bool,

    /// Reason string sent with stop requests
    #[serde(default = "default_stop_reason")]
    pub stop_reason: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotificationConfig {
    /// Notification bus capacity
    #[serde(default = "default_notification_capacity")]
    pub capacity: usize,
}

impl SessionConfig {
    /// Poll interval, clamped to 1ms..=[`MAX_POLL_INTERVAL_MS`] for settings that skipped validation
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(1, MAX_POLL_INTERVAL_MS))
    }

    pub fn max_poll_duration(&self) -> Option<Duration> {
        (self.max_poll_seconds > 0)
            .then(|| Duration::from_secs(self.max_poll_seconds.min(MAX_POLL_SECONDS)))
    }
}

impl EmbedcamConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("backend.base_url", default_base_url())?
            .set_default(
                "backend.request_timeout_secs",
                default_request_timeout_secs(),
            )?
            .set_default("session.poll_interval_ms", default_poll_interval_ms())?
            .set_default("session.max_poll_seconds", default_max_poll_seconds())?
            .set_default("session.show_viewer", default_show_viewer())?
            .set_default("session.clear_existing", default_clear_existing())?
            .set_default("session.stop_reason", default_stop_reason())?
            .set_default(
                "notifications.capacity",
                default_notification_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // EMBEDCAM_SESSION__POLL_INTERVAL_MS=500
            .add_source(
                Environment::with_prefix("EMBEDCAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: EmbedcamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.backend.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::Message(
                "Backend base_url must not be empty".to_string(),
            ));
        }

        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Message(format!(
                "Backend base_url must be an http(s) URL, got '{}'",
                base_url
            )));
        }

        if self.backend.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Backend request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.session.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Session poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.session.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::Message(format!(
                "Session poll_interval_ms must be at most {}",
                MAX_POLL_INTERVAL_MS
            )));
        }

        if self.session.max_poll_seconds > MAX_POLL_SECONDS {
            return Err(ConfigError::Message(format!(
                "Session max_poll_seconds must be at most {} (0 disables the limit)",
                MAX_POLL_SECONDS
            )));
        }

        if self.notifications.capacity == 0 {
            return Err(ConfigError::Message(
                "Notification capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render this configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for EmbedcamConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                base_url: default_base_url(),
                request_timeout_secs: default_request_timeout_secs(),
            },
            session: SessionConfig::default(),
            notifications: NotificationConfig {
                capacity: default_notification_capacity(),
            },
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_seconds: default_max_poll_seconds(),
            show_viewer: default_show_viewer(),
            clear_existing: default_clear_existing(),
            stop_reason: default_stop_reason(),
        }
    }
}

// Default value functions
fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_poll_seconds() -> u64 {
    0
}
fn default_show_viewer() -> bool {
    true
}
fn default_clear_existing() -> bool {
    false
}
fn default_stop_reason() -> String {
    "user".to_string()
}

fn default_notification_capacity() -> usize {
    100
}

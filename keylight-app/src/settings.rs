use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/configs/default.toml"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Http {
    /// Connect and request timeout per call
    pub timeout_ms: u64,
    /// Extra attempts for failed GETs; PUTs are never retried
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Http {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discovery {
    pub service_type: String,
    /// How long the mDNS browse stays open
    pub browse_ms: u64,
}

impl Discovery {
    pub fn browse_window(&self) -> Duration {
        Duration::from_millis(self.browse_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Control {
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
    /// How long fetched accessory info is served from cache
    pub info_stale_ms: u64,
}

impl Control {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn info_stale(&self) -> Duration {
        Duration::from_millis(self.info_stale_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identify {
    pub high: u8,
    pub low: u8,
    pub blinks: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Storage {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub http: Http,
    pub discovery: Discovery,
    pub control: Control,
    pub identify: Identify,
    #[serde(default)]
    pub storage: Storage,
}

impl Settings {
    /// Layers the built-in defaults, the user config file and `KEYLIGHT__*`
    /// environment variables.
    ///
    /// An explicitly given file must exist; the per-user file at
    /// `<config dir>/keylight/config.toml` is optional.
    pub fn new(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        match config_path {
            Some(path) => {
                builder = builder.add_source(File::from(path.to_path_buf()).required(true));
            }
            None => {
                if let Some(path) = Self::user_config_file() {
                    builder = builder.add_source(File::from(path).required(false));
                }
            }
        }

        builder
            .add_source(
                Environment::with_prefix("KEYLIGHT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// The built-in defaults alone.
    pub fn embedded() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn user_config_file() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("keylight").join("config.toml"))
    }

    /// Directory holding the persisted light list and preferences.
    pub fn data_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|dir| dir.join("keylight"))
                .unwrap_or_else(|| PathBuf::from(".keylight"))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_embedded_defaults() {
        let settings = Settings::embedded().unwrap();

        assert_eq!(settings.http.timeout(), Duration::from_secs(2));
        assert_eq!(settings.http.retries, 2);
        assert_eq!(settings.discovery.service_type, keylight_api::SERVICE_TYPE);
        assert_eq!(settings.control.debounce(), Duration::from_millis(100));
        assert_eq!(settings.identify.blinks, 3);
        assert!(settings.storage.data_dir.is_none());
    }

    #[test]
    fn test_user_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[control]\ndebounce_ms = 10\n\n[storage]\ndata_dir = \"/tmp/lights\""
        )
        .unwrap();

        let settings = Settings::new(Some(file.path())).unwrap();

        assert_eq!(settings.control.debounce(), Duration::from_millis(10));
        assert_eq!(settings.control.poll_interval(), Duration::from_secs(2));
        assert_eq!(settings.data_dir(), PathBuf::from("/tmp/lights"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Settings::new(Some(Path::new("/nonexistent/keylight.toml"))).is_err());
    }
}

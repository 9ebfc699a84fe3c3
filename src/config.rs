//! The user configuration, read from a TOML file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors. All of them stop the program before any download.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not find a valid config directory.")]
    NoConfigDir,
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed config file {path:?}: {source}")]
    Malformed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("No cookies configured. Copy the Cookie header of a logged-in browser session into `cookies`.")]
    MissingCookies,
    #[error("Invalid value for `{0}`: {1}")]
    Invalid(&'static str, String),
    #[error("Failed to create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The raw `Cookie` header of a logged-in session.
    pub cookies: String,
    pub save_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    /// Seconds between two listing requests.
    pub request_interval: f64,
    /// Attempts per stream transfer.
    pub max_retries: usize,
    pub history_file: PathBuf,
    pub temp_dir: PathBuf,
    pub concurrent_downloads: usize,
    /// Seconds between two transfer attempts.
    pub retry_delay: f64,
    /// Seconds a metadata request may take.
    pub timeout: u64,
    /// Seconds a stream transfer may stall.
    pub download_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cookies: String::new(),
            save_path: PathBuf::from("./downloads"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            request_interval: 1.5,
            max_retries: 3,
            history_file: PathBuf::from("./download_history.json"),
            temp_dir: PathBuf::from("./temp"),
            concurrent_downloads: 1,
            retry_delay: 2.0,
            timeout: 10,
            download_timeout: 30,
        }
    }
}

impl Config {
    /// `<config dir>/bilifav/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("bilifav").join("config.toml"))
    }

    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. Without one the default location is
    /// used, and a missing or empty file there yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };

        if !required && !path.is_file() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Malformed { path, source })
    }

    /// Checks the values that would otherwise fail half-way through a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cookies.trim().is_empty() {
            return Err(ConfigError::MissingCookies);
        }

        for (name, value) in [
            ("request_interval", self.request_interval),
            ("retry_delay", self.retry_delay),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(name, value.to_string()));
            }
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries", "0".to_string()));
        }
        if self.concurrent_downloads == 0 {
            return Err(ConfigError::Invalid("concurrent_downloads", "0".to_string()));
        }

        Ok(())
    }

    /// Creates the output and temporary directories.
    pub fn prepare(&self) -> Result<(), ConfigError> {
        for dir in [&self.save_path, &self.temp_dir] {
            fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn request_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_interval).unwrap_or_default()
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_delay).unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = toml::from_str("cookies = \"DedeUserID=1\"\nmax_retries = 5\n").unwrap();
        assert_eq!(config.cookies, "DedeUserID=1");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.request_interval, 1.5);
        assert_eq!(config.save_path, PathBuf::from("./downloads"));
        assert_eq!(config.history_file, PathBuf::from("./download_history.json"));
    }

    #[test]
    fn missing_cookies_is_fatal() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingCookies)));
    }

    #[test]
    fn negative_interval_is_rejected() {
        let config = Config {
            cookies: "DedeUserID=1".into(),
            request_interval: -1.0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid("request_interval", _))
        ));
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "cookies = ").unwrap();
        assert!(matches!(
            Config::load(Some(&path)),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn prepare_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            save_path: dir.path().join("out"),
            temp_dir: dir.path().join("tmp").join("nested"),
            ..Config::default()
        };

        config.prepare().unwrap();
        assert!(config.save_path.is_dir());
        assert!(config.temp_dir.is_dir());
    }
}

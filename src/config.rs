//! Configuration loading and persistence.
//!
//! Reads `config.json` from the config directory, falls back to defaults,
//! then applies `CNN_SESSION_*` environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

use crate::constants;
use crate::job::SessionKind;

/// Configuration for the session client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the processing service.
    pub server_url: String,
    /// Job-creation path for still images.
    pub tasks_path: String,
    /// Job-creation path for video sessions.
    pub offer_path: String,
    /// Mode used when the user selects none.
    pub default_mode: String,
    /// HTTP request timeout in seconds.
    pub http_timeout_secs: u64,
    /// Delay between capture ticks in milliseconds.
    pub frame_interval_ms: u64,
    /// Off-screen raster width.
    pub frame_width: u32,
    /// Off-screen raster height.
    pub frame_height: u32,
    /// JPEG quality factor for captured frames (1-100).
    pub jpeg_quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            tasks_path: constants::DEFAULT_TASKS_PATH.to_string(),
            offer_path: constants::DEFAULT_OFFER_PATH.to_string(),
            default_mode: constants::DEFAULT_MODE.to_string(),
            http_timeout_secs: constants::HTTP_REQUEST_TIMEOUT.as_secs(),
            frame_interval_ms: constants::FRAME_INTERVAL.as_millis() as u64,
            frame_width: constants::FRAME_WIDTH,
            frame_height: constants::FRAME_HEIGHT,
            jpeg_quality: constants::JPEG_QUALITY,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `CNN_SESSION_CONFIG_DIR` env var: explicit override
    /// 2. `CNN_SESSION_ENV=test`: a scratch directory under the system temp dir
    /// 3. Default: platform config dir joined with `cnn-session`
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("CNN_SESSION_CONFIG_DIR") {
            PathBuf::from(dir)
        } else if crate::env::is_test_mode() {
            std::env::temp_dir().join("cnn-session-test")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("cnn-session")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::load_from_file() {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default config: {e:#}");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid config file {}", config_path.display()))
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(server_url) = std::env::var("CNN_SESSION_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Ok(mode) = std::env::var("CNN_SESSION_MODE") {
            self.default_mode = mode;
        }

        if let Ok(timeout) = std::env::var("CNN_SESSION_HTTP_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.http_timeout_secs = secs;
            }
        }

        if let Ok(interval) = std::env::var("CNN_SESSION_FRAME_INTERVAL_MS") {
            if let Ok(ms) = interval.parse::<u64>() {
                self.frame_interval_ms = ms;
            }
        }

        if let Ok(quality) = std::env::var("CNN_SESSION_JPEG_QUALITY") {
            if let Ok(q) = quality.parse::<u8>() {
                self.jpeg_quality = q.clamp(1, 100);
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// HTTP request timeout.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Delay between capture ticks.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Full job-creation URL for a session kind.
    pub fn endpoint(&self, kind: SessionKind) -> String {
        let path = match kind {
            SessionKind::VideoStart => &self.offer_path,
            SessionKind::Still | SessionKind::VideoFrame => &self.tasks_path,
        };
        format!("{}{}", self.server_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tasks_path, "/tasks");
        assert_eq!(config.offer_path, "/offer");
        assert_eq!(config.default_mode, "edge_detect_");
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.frame_interval(), Duration::from_millis(16));
        assert_eq!((config.frame_width, config.frame_height), (320, 240));
    }

    #[test]
    fn test_endpoint_per_kind() {
        let config = Config {
            server_url: "http://cnn.local:9000/".to_string(),
            ..Config::default()
        };
        assert_eq!(config.endpoint(SessionKind::Still), "http://cnn.local:9000/tasks");
        assert_eq!(config.endpoint(SessionKind::VideoStart), "http://cnn.local:9000/offer");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"server_url":"http://a:1"}"#).unwrap();
        assert_eq!(config.server_url, "http://a:1");
        assert_eq!(config.offer_path, "/offer");
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            default_mode: "sharpen_".to_string(),
            ..Config::default()
        };
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        let loaded: Config = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, config);
    }
}

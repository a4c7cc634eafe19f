//! The server's `toml`-backed configuration file: a plain
//! `Deserialize`/`Serialize` struct with `#[serde(default = ...)]` per
//! field so a config file only needs to name what it overrides.
//!
//! Covers the socket directory and audio group, plus the scheduling knobs
//! the engine needs (idle close timeout, hotword idle limit, default
//! buffer/threshold sizes). Device selection and volume policy are handled
//! elsewhere.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Directory client/server unix-domain sockets are bound under.
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    /// Group that owns socket files; files are created mode 0770.
    #[serde(default = "default_audio_group")]
    pub audio_group: String,

    /// Scheduling and buffer-sizing knobs the audio engine uses.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_socket_dir() -> PathBuf {
    paths::default_socket_dir()
}

fn default_audio_group() -> String {
    "audio".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_dir: default_socket_dir(),
            audio_group: default_audio_group(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults for any field the file
    /// omits. Returns [`ConfigError::ReadFile`]/[`ConfigError::TomlParse`]
    /// on failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from [`paths::default_config_path`] if it exists, otherwise
    /// return the built-in defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::default_config_path();
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject configurations the engine could not run with.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.audio_group.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "audio_group",
                reason: "must not be empty".to_string(),
            });
        }
        self.engine.validate()
    }
}

/// Engine scheduling and default stream-sizing knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Default stream buffer capacity (frames) used when a client doesn't
    /// negotiate its own.
    #[serde(default = "default_buffer_frames")]
    pub default_buffer_frames: u32,

    /// Default callback threshold (frames).
    #[serde(default = "default_cb_threshold")]
    pub default_cb_threshold: u32,

    /// How long a device may sit idle with zero attached streams before
    /// the engine closes it.
    #[serde(default = "default_idle_close_secs", rename = "idle_close_timeout_secs")]
    pub idle_close_timeout_secs: u64,

    /// Idle bound on a hotword stream's device re-poll.
    #[serde(default = "default_hotword_idle_secs", rename = "hotword_idle_limit_secs")]
    pub hotword_idle_limit_secs: u64,

    /// `SCHED_FIFO` priority requested for the audio engine thread.
    #[serde(default = "default_rt_priority")]
    pub rt_priority: i32,
}

fn default_buffer_frames() -> u32 {
    480
}

fn default_cb_threshold() -> u32 {
    240
}

fn default_idle_close_secs() -> u64 {
    5
}

fn default_hotword_idle_secs() -> u64 {
    20
}

fn default_rt_priority() -> i32 {
    12
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_buffer_frames: default_buffer_frames(),
            default_cb_threshold: default_cb_threshold(),
            idle_close_timeout_secs: default_idle_close_secs(),
            hotword_idle_limit_secs: default_hotword_idle_secs(),
            rt_priority: default_rt_priority(),
        }
    }
}

impl EngineConfig {
    pub fn idle_close_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_close_timeout_secs)
    }

    pub fn hotword_idle_limit(&self) -> Duration {
        Duration::from_secs(self.hotword_idle_limit_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_cb_threshold > self.default_buffer_frames {
            return Err(ConfigError::InvalidValue {
                field: "default_cb_threshold",
                reason: format!(
                    "{} exceeds default_buffer_frames {}",
                    self.default_cb_threshold, self.default_buffer_frames
                ),
            });
        }
        if !(1..=99).contains(&self.rt_priority) {
            return Err(ConfigError::InvalidValue {
                field: "rt_priority",
                reason: format!("{} is outside the SCHED_FIFO range 1-99", self.rt_priority),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: Config = toml::from_str("audio_group = \"realtime\"\n").unwrap();
        assert_eq!(config.audio_group, "realtime");
        assert_eq!(config.engine.default_buffer_frames, 480);
    }

    #[test]
    fn rejects_threshold_exceeding_buffer() {
        let config: Config = toml::from_str(
            "[engine]\ndefault_buffer_frames = 100\ndefault_cb_threshold = 200\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_audio_group() {
        let config: Config = toml::from_str("audio_group = \"\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_errors() {
        let err = Config::load(Path::new("/nonexistent/auralink-test.toml"));
        assert!(matches!(err, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn load_round_trips_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auralink.toml");
        std::fs::write(&path, "audio_group = \"realtime\"\n[engine]\nrt_priority = 42\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.audio_group, "realtime");
        assert_eq!(config.engine.rt_priority, 42);
    }
}

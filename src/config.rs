//! Persistent configuration model, defaults, and TOML persistence.

use std::path::{Path, PathBuf};

use log::info;

use crate::error::ConfigError;

/// Root configuration persisted to `voxdeck.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Queue playback behavior.
    pub playback: PlaybackConfig,
    #[serde(default)]
    /// Search aggregation behavior.
    pub search: SearchConfig,
}

/// Queue playback tunables.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    /// Progress sampling interval while playing, in milliseconds.
    #[serde(default = "default_progress_tick_ms")]
    pub progress_tick_ms: u64,
    /// Number of records requested per history window.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            progress_tick_ms: default_progress_tick_ms(),
            history_window: default_history_window(),
        }
    }
}

/// Search aggregation tunables.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SearchConfig {
    /// Delay before remote peer/message searches fire, in milliseconds.
    #[serde(default = "default_remote_debounce_ms")]
    pub remote_debounce_ms: u64,
    /// Popular contacts shown while the section is collapsed.
    #[serde(default = "default_popular_collapsed_limit")]
    pub popular_collapsed_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            remote_debounce_ms: default_remote_debounce_ms(),
            popular_collapsed_limit: default_popular_collapsed_limit(),
        }
    }
}

fn default_progress_tick_ms() -> u64 {
    200
}

fn default_history_window() -> usize {
    100
}

fn default_remote_debounce_ms() -> u64 {
    200
}

fn default_popular_collapsed_limit() -> usize {
    5
}

/// Clamps loaded values into workable ranges.
pub fn sanitize_config(config: Config) -> Config {
    Config {
        playback: PlaybackConfig {
            progress_tick_ms: config.playback.progress_tick_ms.clamp(20, 5_000),
            history_window: config.playback.history_window.clamp(1, 1_000),
        },
        search: SearchConfig {
            remote_debounce_ms: config.search.remote_debounce_ms.min(5_000),
            popular_collapsed_limit: config.search.popular_collapsed_limit.max(1),
        },
    }
}

/// Default config file location under the platform config directory.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("voxdeck.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Loads and sanitizes the config file; a missing file yields defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        info!(
            "Config file not found, using defaults. path={}",
            path.display()
        );
        return Ok(sanitize_config(Config::default()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(sanitize_config(toml::from_str::<Config>(&content)?))
}

/// Serializes and writes the config file.
pub fn store_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let text = toml::to_string(config)?;
    std::fs::write(path, text).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.playback.progress_tick_ms, 200);
        assert_eq!(config.playback.history_window, 100);
        assert_eq!(config.search.remote_debounce_ms, 200);
        assert_eq!(config.search.popular_collapsed_limit, 5);
    }

    #[test]
    fn test_sanitize_clamps_out_of_range_values() {
        let config = sanitize_config(Config {
            playback: PlaybackConfig {
                progress_tick_ms: 1,
                history_window: 0,
            },
            search: SearchConfig {
                remote_debounce_ms: 60_000,
                popular_collapsed_limit: 0,
            },
        });

        assert_eq!(config.playback.progress_tick_ms, 20);
        assert_eq!(config.playback.history_window, 1);
        assert_eq!(config.search.remote_debounce_ms, 5_000);
        assert_eq!(config.search.popular_collapsed_limit, 1);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("voxdeck.toml");

        let config = load_config(&path).expect("load failed");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_store_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("voxdeck.toml");

        let mut config = Config::default();
        config.playback.progress_tick_ms = 250;
        config.search.remote_debounce_ms = 300;

        store_config(&path, &config).expect("store failed");
        let loaded = load_config(&path).expect("load failed");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_applies_serde_defaults_for_missing_sections() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("voxdeck.toml");
        std::fs::write(&path, "[playback]\nprogress_tick_ms = 100\n").expect("write failed");

        let config = load_config(&path).expect("load failed");
        assert_eq!(config.playback.progress_tick_ms, 100);
        assert_eq!(config.playback.history_window, 100);
        assert_eq!(config.search, SearchConfig::default());
    }
}

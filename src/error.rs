//! Error types for fallible crate surfaces.
//!
//! Internal contract violations (for example constructing a playable item
//! from a non-playable entry variant) are programming errors and abort via
//! panic instead of surfacing here.

use std::path::PathBuf;

use thiserror::Error;

/// Failures while loading or persisting the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("no config directory available on this platform")]
    NoConfigDir,
}

/// Failures while opening a local media path with the player backend.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("failed to open media at {path}: {reason}")]
    Open { path: PathBuf, reason: String },
}

//! TOML configuration for node builds and overlays.
//!
//! ```toml
//! [build]
//! endian = "little"
//! use_padding = true
//!
//! [overlay]
//! max_dirty_len = 250
//! dirty_reserve_bytes = 8192
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::node::{BuildOptions, MAX_RESERVE_BYTES};
use crate::storage::overlay::{OverlayOptions, MIN_DIRTY_LEN};

/// Build and overlay settings loaded from a TOML document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Options for [`crate::storage::node::build`].
    pub build: BuildOptions,
    /// Options for [`crate::storage::overlay::Overlay`].
    pub overlay: OverlayOptions,
}

impl NodeConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }

    /// Rejects out-of-range settings instead of letting the API adjust or fail on them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.overlay.max_dirty_len < MIN_DIRTY_LEN {
            return Err(ConfigError::Invalid {
                field: "overlay.max_dirty_len",
                reason: format!(
                    "{} is below the minimum of {MIN_DIRTY_LEN}",
                    self.overlay.max_dirty_len
                ),
            });
        }
        let reserves = [
            ("build.reserve_bytes", self.build.reserve_bytes),
            ("overlay.dirty_reserve_bytes", self.overlay.dirty_reserve_bytes),
        ];
        for (field, bytes) in reserves {
            if bytes > MAX_RESERVE_BYTES {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{bytes} is above the maximum of {MAX_RESERVE_BYTES}"),
                });
            }
        }
        Ok(())
    }
}

/// Errors raised while loading a [`NodeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read node config {path}: {source}")]
    Read {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// An in-memory document is not valid TOML for this schema.
    #[error("failed to parse node config: {source}")]
    Parse {
        /// Deserializer error.
        source: toml::de::Error,
    },
    /// A file is not valid TOML for this schema.
    #[error("failed to parse node config {path}: {source}")]
    ParseFile {
        /// File that failed to parse.
        path: PathBuf,
        /// Deserializer error.
        source: toml::de::Error,
    },
    /// Serialization back to TOML failed.
    #[error("failed to serialize node config: {source}")]
    Serialize {
        /// Serializer error.
        source: toml::ser::Error,
    },
    /// A field holds a value outside its accepted range.
    #[error("invalid node config field {field}: {reason}")]
    Invalid {
        /// Dotted field path.
        field: &'static str,
        /// Human-readable explanation.
        reason: String,
    },
}

//! Peer settings (§3): the wire-compatible knobs both sides of a
//! reconciliation session must agree on, loadable from a TOML file.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors from loading or validating peer settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("bitquantum must be at least 1 (got {0})")]
    BadBitquantum(u32),
    #[error("mbar must be at least 1 (got {0})")]
    BadMbar(u32),
    #[error("thresh_mult must be at least 1 (got {0})")]
    BadThreshMult(u32),
}

/// The settings shared by both peers in a reconciliation session. A mismatch
/// of `bitquantum` or `mbar` against a remote peer is a hard protocol abort
/// (§4.8), checked at the `Config` handshake, not here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerSettings {
    pub bitquantum: u32,
    pub mbar: u32,
    pub thresh_mult: u32,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self { bitquantum: 2, mbar: 5, thresh_mult: 10 }
    }
}

impl PeerSettings {
    /// Load and validate settings from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let text = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;
        let settings: PeerSettings = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_ref.display().to_string(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bitquantum == 0 {
            return Err(ConfigError::BadBitquantum(self.bitquantum));
        }
        if self.mbar == 0 {
            return Err(ConfigError::BadMbar(self.mbar));
        }
        if self.thresh_mult == 0 {
            return Err(ConfigError::BadThreshMult(self.thresh_mult));
        }
        Ok(())
    }

    /// Leaf capacity above which a node must split.
    pub fn split_threshold(&self) -> usize {
        (self.thresh_mult * self.mbar) as usize
    }

    /// Subtree size at or below which an interior node collapses to a leaf.
    pub fn join_threshold(&self) -> usize {
        self.split_threshold() / 2
    }

    /// Number of interpolation sample points kept per node.
    pub fn num_samples(&self) -> usize {
        (self.mbar + 1) as usize
    }
}

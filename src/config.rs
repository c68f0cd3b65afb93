//! Export/import tuning parameters

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::{BLOCK_LEN, MIN_ITERATIONS};
use crate::error::{ExportError, Result};

/// Default PBKDF2 iteration count
pub const DEFAULT_ITERATIONS: u32 = 65_536;

/// Default streaming chunk (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// What the reader does when a single entry fails authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptEntryPolicy {
    /// Stop the whole import at the first failing entry
    #[default]
    Abort,
    /// Skip the entry and continue (only after the header key check passed)
    Skip,
}

/// Export/import configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// PBKDF2 iterations written into new archives
    pub iterations: u32,
    /// Bytes processed per cipher step
    pub chunk_size: usize,
    /// Reader behaviour on a per-entry integrity failure
    pub corrupt_entry_policy: CorruptEntryPolicy,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            corrupt_entry_policy: CorruptEntryPolicy::Abort,
        }
    }
}

impl ExportConfig {
    /// Configuration for strong devices
    pub fn hardened() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS * 4,
            ..Default::default()
        }
    }

    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: ExportConfig = serde_json::from_str(&json)
            .map_err(|e| ExportError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations < MIN_ITERATIONS {
            return Err(ExportError::InvalidConfig(format!(
                "iterations must be at least {}, got {}",
                MIN_ITERATIONS, self.iterations
            )));
        }
        if self.chunk_size == 0 || self.chunk_size % BLOCK_LEN != 0 {
            return Err(ExportError::InvalidConfig(format!(
                "chunk_size must be a non-zero multiple of {}, got {}",
                BLOCK_LEN, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ExportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.iterations, 65_536);
        assert!(ExportConfig::hardened().validate().is_ok());
    }

    #[test]
    fn test_rejects_weak_iterations() {
        let config = ExportConfig {
            iterations: 1000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ExportError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_unaligned_chunk() {
        let config = ExportConfig {
            chunk_size: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ExportConfig =
            serde_json::from_str(r#"{"corrupt_entry_policy":"skip"}"#).unwrap();
        assert_eq!(config.corrupt_entry_policy, CorruptEntryPolicy::Skip);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        std::fs::write(&path, r#"{"iterations":131072}"#).unwrap();

        let config = ExportConfig::load(&path).unwrap();
        assert_eq!(config.iterations, 131_072);
    }
}

//! Error types for the vault export engine

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Password must not be empty")]
    InvalidCredentialInput,

    #[error("Secure randomness unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("Key derivation failed: {0}")]
    DerivationFailure(String),

    #[error("Failed to read source entry {path}: {source}")]
    SourceReadFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write destination: {0}")]
    DestinationWriteFailure(#[source] std::io::Error),

    #[error("Decryption failed - wrong password or corrupted archive")]
    PaddingOrAuthenticationError,

    #[error("Entry path escapes the vault root: {0}")]
    PathTraversalRejected(String),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Unsupported archive version: expected {expected}, got {got}")]
    UnsupportedVersion { expected: u16, got: u16 },

    #[error("Vault storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExportError>;

impl ExportError {
    /// Errors that end the whole export/import immediately
    pub fn is_fatal(&self) -> bool {
        !self.is_per_entry()
    }

    /// Errors recorded against a single entry while the operation continues
    pub fn is_per_entry(&self) -> bool {
        matches!(
            self,
            Self::SourceReadFailure { .. } | Self::PathTraversalRejected(_)
        )
    }

    /// Errors that point at the password rather than the data path
    pub fn is_credential_related(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentialInput | Self::PaddingOrAuthenticationError
        )
    }
}

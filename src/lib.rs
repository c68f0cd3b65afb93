//! # Vault Export
//!
//! Password-protected export and import of a sandboxed file vault.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      VAULT EXPORTER                       │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐  │
//! │  │ VaultStorage │──▶│  Container   │──▶│  Write sink  │  │
//! │  │ (dir / mem)  │   │  Writer      │   │  (.vxa file) │  │
//! │  └──────────────┘   └──────┬───────┘   └──────────────┘  │
//! │                            │                              │
//! │  ┌─────────────────────────┴────────────────────────────┐ │
//! │  │ PBKDF2-SHA256 → HKDF → K_cipher (AES-256-CBC)        │ │
//! │  │                      → K_mac    (HMAC-SHA256)        │ │
//! │  └─────────────────────────┬────────────────────────────┘ │
//! │                            │                              │
//! │  ┌──────────────┐   ┌──────┴───────┐   ┌──────────────┐  │
//! │  │ Read source  │──▶│  Container   │──▶│ RestoreTarget│  │
//! │  │              │   │  Reader      │   │ (staged)     │  │
//! │  └──────────────┘   └──────────────┘   └──────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - One salt and key per archive, a fresh IV per entry
//! - Encrypt-then-MAC per entry plus a manifest tag over the framing
//! - Wrong passwords are caught by the header key check before any file is written
//! - Restored files are staged and committed only after authentication
//! - Passwords and keys zeroized on drop

pub mod config;
pub mod container;
pub mod control;
pub mod crypto;
pub mod error;
pub mod exporter;
pub mod extraction;
pub mod report;
pub mod storage;

pub use config::{CorruptEntryPolicy, ExportConfig};
pub use container::{ArchiveListing, ContainerReader, ContainerWriter, ListedEntry};
pub use control::{CancelToken, NoProgress, ProgressObserver};
pub use crypto::{OsEntropy, Password, RandomnessSource, RngEntropy};
pub use error::{ExportError, Result};
pub use exporter::VaultExporter;
pub use extraction::{strategy_for, ExtractionStrategy};
pub use report::{
    EntryFailure, ExportOutcome, ExportSummary, ImportOutcome, ImportSummary, SkipReason,
    SkippedEntry,
};
pub use storage::{
    DirectoryVault, DiscardTarget, FileEntryDescriptor, MemoryVault, RestoreTarget, StagedFile,
    VaultPath, VaultScan, VaultStorage,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default archive file extension
pub const ARCHIVE_EXTENSION: &str = "vxa";

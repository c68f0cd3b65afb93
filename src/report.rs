//! Export/import results as shown to the user

use std::fmt;

use serde::Serialize;

use crate::error::ExportError;

/// Why one export entry did not make it into the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryFailure {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<EntryFailure>,
    /// End marker written; the archive is structurally complete
    pub complete: bool,
}

impl ExportSummary {
    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn failed_paths(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.path.as_str()).collect()
    }
}

#[derive(Debug)]
pub enum ExportOutcome {
    /// Nothing to export; the sink was never touched
    NoFiles,
    /// Refused before any I/O
    Rejected(ExportError),
    /// All entries processed and the end marker written
    Completed(ExportSummary),
    /// Fatal error; the archive has no end marker
    Aborted {
        cause: ExportError,
        summary: ExportSummary,
    },
    /// Stopped between entries; the archive has no end marker
    Cancelled(ExportSummary),
}

impl ExportOutcome {
    pub fn summary(&self) -> Option<&ExportSummary> {
        match self {
            Self::Completed(s) | Self::Cancelled(s) | Self::Aborted { summary: s, .. } => Some(s),
            Self::NoFiles | Self::Rejected(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(s) if s.failed.is_empty())
    }
}

impl fmt::Display for ExportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFiles => write!(f, "No files found to export."),
            Self::Rejected(cause) => write!(f, "Export refused: {}", cause),
            Self::Completed(s) => {
                write!(f, "Export complete: {} exported, {} failed", s.succeeded_count(), s.failed_count())?;
                for failure in &s.failed {
                    write!(f, "\n  failed: {} ({})", failure.path, failure.reason)?;
                }
                Ok(())
            }
            Self::Aborted { cause, summary } => write!(
                f,
                "Export aborted after {} entries: {}",
                summary.succeeded_count(),
                cause
            ),
            Self::Cancelled(s) => write!(f, "Export cancelled after {} entries.", s.succeeded_count()),
        }
    }
}

/// Why an archive entry was not restored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Path would land outside the destination root
    PathTraversal,
    /// Source failed during export; no usable ciphertext
    AbandonedAtExport,
    /// Destination refused this one file
    DestinationWriteFailure(String),
    /// Failed authentication (only under the skip policy)
    Corrupt,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathTraversal => write!(f, "path escapes destination"),
            Self::AbandonedAtExport => write!(f, "source unreadable at export time"),
            Self::DestinationWriteFailure(e) => write!(f, "write failed: {}", e),
            Self::Corrupt => write!(f, "integrity check failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub restored: Vec<String>,
    pub skipped: Vec<SkippedEntry>,
    /// End marker present and manifest tag verified
    pub complete: bool,
}

impl ImportSummary {
    pub fn restored_count(&self) -> usize {
        self.restored.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

#[derive(Debug)]
pub enum ImportOutcome {
    Completed(ImportSummary),
    /// Key check or an entry failed authentication
    WrongPasswordOrCorrupt(ImportSummary),
    /// Archive ends before its end marker
    Truncated(ImportSummary),
    Rejected(ExportError),
    Aborted {
        cause: ExportError,
        summary: ImportSummary,
    },
    Cancelled(ImportSummary),
}

impl ImportOutcome {
    pub fn summary(&self) -> Option<&ImportSummary> {
        match self {
            Self::Completed(s)
            | Self::WrongPasswordOrCorrupt(s)
            | Self::Truncated(s)
            | Self::Cancelled(s)
            | Self::Aborted { summary: s, .. } => Some(s),
            Self::Rejected(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

impl fmt::Display for ImportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(s) => {
                write!(f, "Import complete: {} restored, {} skipped", s.restored_count(), s.skipped_count())?;
                for skipped in &s.skipped {
                    write!(f, "\n  skipped: {} ({})", skipped.path, skipped.reason)?;
                }
                Ok(())
            }
            Self::WrongPasswordOrCorrupt(s) => write!(
                f,
                "Wrong password or corrupted archive ({} restored before the failure)",
                s.restored_count()
            ),
            Self::Truncated(s) => write!(
                f,
                "Archive is incomplete: {} restored, {} skipped",
                s.restored_count(),
                s.skipped_count()
            ),
            Self::Rejected(cause) => write!(f, "Import refused: {}", cause),
            Self::Aborted { cause, summary } => write!(
                f,
                "Import aborted after {} files: {}",
                summary.restored_count(),
                cause
            ),
            Self::Cancelled(s) => write!(f, "Import cancelled after {} files.", s.restored_count()),
        }
    }
}

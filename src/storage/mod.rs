//! Storage collaborators: where exported files come from and restored files go

use std::io::{self, Read, Write};

use crate::error::Result;
use crate::report::EntryFailure;

mod directory;
mod memory;
mod path;

pub use directory::DirectoryVault;
pub use memory::MemoryVault;
pub use path::VaultPath;

/// One file the vault offers for export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntryDescriptor {
    pub path: VaultPath,
    pub size: u64,
}

/// Outcome of walking the vault
#[derive(Debug, Default)]
pub struct VaultScan {
    pub files: Vec<FileEntryDescriptor>,
    /// Entries seen during the walk that cannot be exported
    pub unlisted: Vec<EntryFailure>,
}

/// Read side of the vault
pub trait VaultStorage: Send + Sync {
    /// Every file in the vault, any order
    fn list_all_files(&self) -> Result<Vec<FileEntryDescriptor>>;

    /// Like [`list_all_files`](Self::list_all_files), also reporting entries
    /// the walk could not turn into exportable files
    fn scan(&self) -> Result<VaultScan> {
        Ok(VaultScan {
            files: self.list_all_files()?,
            unlisted: Vec::new(),
        })
    }

    fn open_read(&self, path: &VaultPath) -> io::Result<Box<dyn Read + Send>>;

    /// `false` once the vault root itself is gone
    fn is_available(&self) -> bool;
}

/// A file being restored; invisible until committed
pub trait StagedFile: Write + Send {
    fn commit(self: Box<Self>) -> io::Result<()>;

    fn discard(self: Box<Self>);
}

/// Write side used by import
pub trait RestoreTarget: Send + Sync {
    /// Opens a staged file, creating intermediate folders as needed
    fn open_for_write(&self, path: &VaultPath) -> io::Result<Box<dyn StagedFile>>;

    fn is_writable(&self) -> bool;
}

/// Target that decrypts and authenticates but keeps nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardTarget;

struct DiscardFile;

impl Write for DiscardFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StagedFile for DiscardFile {
    fn commit(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }

    fn discard(self: Box<Self>) {}
}

impl RestoreTarget for DiscardTarget {
    fn open_for_write(&self, _path: &VaultPath) -> io::Result<Box<dyn StagedFile>> {
        Ok(Box::new(DiscardFile))
    }

    fn is_writable(&self) -> bool {
        true
    }
}

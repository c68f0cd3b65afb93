//! Directory-backed vault
//!
//! Restores go through a hidden, randomly named temp file that is renamed
//! into place on commit. Temp files are opened with `create_new`, so an
//! existing file is never truncated.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{FileEntryDescriptor, RestoreTarget, StagedFile, VaultPath, VaultScan, VaultStorage};
use crate::error::{ExportError, Result};
use crate::report::EntryFailure;

/// Prefix of in-progress restore files
const STAGING_PREFIX: &str = ".vxa-staging-";

fn staging_name() -> String {
    format!("{}{}", STAGING_PREFIX, hex::encode(rand::random::<[u8; 8]>()))
}

/// Records a walked entry that will not reach the archive
fn unlisted(path: String, source: io::Error) -> EntryFailure {
    let reason = ExportError::SourceReadFailure {
        path: path.clone(),
        source,
    }
    .to_string();
    tracing::warn!("Vault entry cannot be exported: {}", reason);
    EntryFailure { path, reason }
}

fn outside_root() -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        "destination resolves outside the vault root",
    )
}

/// Vault rooted at a directory on disk
#[derive(Debug, Clone)]
pub struct DirectoryVault {
    root: PathBuf,
}

impl DirectoryVault {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Opens a vault root, creating it if missing
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// Refuses `dir` when it, or its nearest existing ancestor, resolves
    /// outside the root (symlinked folders)
    fn ensure_inside_root(&self, dir: &Path) -> io::Result<()> {
        let root = fs::canonicalize(&self.root)?;

        let mut existing = dir;
        while fs::symlink_metadata(existing).is_err() {
            existing = existing.parent().ok_or_else(outside_root)?;
        }

        if fs::canonicalize(existing)?.starts_with(&root) {
            Ok(())
        } else {
            Err(outside_root())
        }
    }
}

impl VaultStorage for DirectoryVault {
    fn list_all_files(&self) -> Result<Vec<FileEntryDescriptor>> {
        self.scan().map(|scan| scan.files)
    }

    fn scan(&self) -> Result<VaultScan> {
        if !self.root.is_dir() {
            return Err(ExportError::StorageUnavailable(self.root.display().to_string()));
        }

        let mut scan = VaultScan::default();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| self.relative_display(p))
                        .unwrap_or_default();
                    scan.unlisted.push(unlisted(path, e.into()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| ExportError::StorageUnavailable(e.to_string()))?;
            let path = match VaultPath::from_relative(relative) {
                Ok(path) => path,
                Err(e) => {
                    let source = io::Error::new(io::ErrorKind::InvalidData, e.to_string());
                    scan.unlisted
                        .push(unlisted(relative.to_string_lossy().into_owned(), source));
                    continue;
                }
            };
            match entry.metadata() {
                Ok(meta) => scan.files.push(FileEntryDescriptor {
                    path,
                    size: meta.len(),
                }),
                Err(e) => scan.unlisted.push(unlisted(path.to_string(), e.into())),
            }
        }

        scan.files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(scan)
    }

    fn open_read(&self, path: &VaultPath) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(path.to_fs_path(&self.root))?;
        Ok(Box::new(file))
    }

    fn is_available(&self) -> bool {
        self.root.is_dir()
    }
}

/// File written beside its final path and renamed on commit
struct DirectoryStagedFile {
    file: File,
    temp_path: PathBuf,
    final_path: PathBuf,
    finished: bool,
}

impl Write for DirectoryStagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl StagedFile for DirectoryStagedFile {
    fn commit(mut self: Box<Self>) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        fs::rename(&self.temp_path, &self.final_path)?;
        self.finished = true;
        Ok(())
    }

    fn discard(self: Box<Self>) {
        // Drop removes the temp file
    }
}

impl Drop for DirectoryStagedFile {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

impl RestoreTarget for DirectoryVault {
    fn open_for_write(&self, path: &VaultPath) -> io::Result<Box<dyn StagedFile>> {
        let final_path = path.to_fs_path(&self.root);
        let parent = final_path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "entry has no parent"))?
            .to_path_buf();

        self.ensure_inside_root(&parent)?;
        fs::create_dir_all(&parent)?;
        // A folder swapped for a symlink in between is still caught here
        self.ensure_inside_root(&parent)?;

        let temp_path = parent.join(staging_name());
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;

        Ok(Box::new(DirectoryStagedFile {
            file,
            temp_path,
            final_path,
            finished: false,
        }))
    }

    /// Root exists as a directory and accepts a new file. The check file is
    /// removed again; the root itself is never created here.
    fn is_writable(&self) -> bool {
        if !self.root.is_dir() {
            return false;
        }
        let check = self.root.join(staging_name());
        match OpenOptions::new().write(true).create_new(true).open(&check) {
            Ok(file) => {
                drop(file);
                let _ = fs::remove_file(&check);
                true
            }
            Err(_) => false,
        }
    }
}

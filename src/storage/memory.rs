//! In-memory vault for embedders and tests

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{FileEntryDescriptor, RestoreTarget, StagedFile, VaultPath, VaultStorage};
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct MemoryVault {
    files: Arc<RwLock<BTreeMap<VaultPath, Vec<u8>>>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a vault from `(path, content)` pairs
    pub fn with_files<I, P, D>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, D)>,
        P: AsRef<str>,
        D: Into<Vec<u8>>,
    {
        let vault = Self::new();
        for (path, data) in files {
            vault.insert(path.as_ref(), data)?;
        }
        Ok(vault)
    }

    pub fn insert(&self, path: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        let path = VaultPath::parse(path)?;
        self.files.write().insert(path, data.into());
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        let path = VaultPath::parse(path).ok()?;
        self.files.read().get(&path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.read().keys().map(|p| p.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl VaultStorage for MemoryVault {
    fn list_all_files(&self) -> Result<Vec<FileEntryDescriptor>> {
        Ok(self
            .files
            .read()
            .iter()
            .map(|(path, data)| FileEntryDescriptor {
                path: path.clone(),
                size: data.len() as u64,
            })
            .collect())
    }

    fn open_read(&self, path: &VaultPath) -> io::Result<Box<dyn Read + Send>> {
        let data = self
            .files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn is_available(&self) -> bool {
        true
    }
}

struct MemoryStagedFile {
    files: Arc<RwLock<BTreeMap<VaultPath, Vec<u8>>>>,
    path: VaultPath,
    buffer: Vec<u8>,
}

impl Write for MemoryStagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StagedFile for MemoryStagedFile {
    fn commit(self: Box<Self>) -> io::Result<()> {
        let this = *self;
        this.files.write().insert(this.path, this.buffer);
        Ok(())
    }

    fn discard(self: Box<Self>) {}
}

impl RestoreTarget for MemoryVault {
    fn open_for_write(&self, path: &VaultPath) -> io::Result<Box<dyn StagedFile>> {
        Ok(Box::new(MemoryStagedFile {
            files: Arc::clone(&self.files),
            path: path.clone(),
            buffer: Vec::new(),
        }))
    }

    fn is_writable(&self) -> bool {
        true
    }
}

//! Import path: encrypted archive -> restored files

use std::io::{self, BufReader, Read};
use std::sync::Arc;

use hmac::Mac;
use serde::Serialize;

use super::format::{
    is_truncation, read_record, ArchiveHeader, EndMarker, EntryHeader, EntryTrailer, Record,
};
use crate::config::{CorruptEntryPolicy, ExportConfig};
use crate::control::{CancelToken, NoProgress, ProgressObserver};
use crate::crypto::{
    decrypt_stream, derive_key, new_mac, split_keys, verify_tag, ArchiveKeys, KdfParams,
    MacReader, Password, StreamFault, MIN_ITERATIONS,
};
use crate::error::{ExportError, Result};
use crate::report::{ImportOutcome, ImportSummary, SkipReason, SkippedEntry};
use crate::storage::{RestoreTarget, StagedFile, VaultPath};

enum ReadEnd {
    Complete,
    Truncated,
    Cancelled,
}

fn skip(summary: &mut ImportSummary, path: &str, reason: SkipReason) {
    tracing::warn!(path = %path, "Import entry skipped: {}", reason);
    summary.skipped.push(SkippedEntry {
        path: path.to_string(),
        reason,
    });
}

/// A write failure on a root that is no longer writable ends the import
fn ensure_writable(target: &dyn RestoreTarget) -> Result<()> {
    if target.is_writable() {
        Ok(())
    } else {
        Err(ExportError::StorageUnavailable(
            "destination became unwritable during import".into(),
        ))
    }
}

/// Restores an archive into a [`RestoreTarget`]
pub struct ContainerReader {
    config: ExportConfig,
    cancel: CancelToken,
    observer: Arc<dyn ProgressObserver>,
}

impl ContainerReader {
    pub fn new(config: ExportConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
            observer: Arc::new(NoProgress),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Reads `source` and restores every authentic entry into `target`.
    ///
    /// Each file is staged and only committed once its tag verifies, so a
    /// wrong password never leaves plaintext behind.
    pub fn read<R: Read>(
        &self,
        source: R,
        password: Password,
        target: &dyn RestoreTarget,
    ) -> ImportOutcome {
        if password.is_empty() {
            return ImportOutcome::Rejected(ExportError::InvalidCredentialInput);
        }
        if let Err(e) = self.config.validate() {
            return ImportOutcome::Rejected(e);
        }
        if !target.is_writable() {
            return ImportOutcome::Aborted {
                cause: ExportError::StorageUnavailable("destination is not writable".into()),
                summary: ImportSummary::default(),
            };
        }

        let mut source = BufReader::new(source);
        let mut summary = ImportSummary::default();

        match self.run(&mut source, password, target, &mut summary) {
            Ok(ReadEnd::Complete) => {
                summary.complete = true;
                tracing::info!(
                    restored = summary.restored_count(),
                    skipped = summary.skipped_count(),
                    "Archive import finished"
                );
                ImportOutcome::Completed(summary)
            }
            Ok(ReadEnd::Truncated) => {
                tracing::warn!("Archive ends before its end marker");
                ImportOutcome::Truncated(summary)
            }
            Ok(ReadEnd::Cancelled) => {
                tracing::info!(restored = summary.restored_count(), "Archive import cancelled");
                ImportOutcome::Cancelled(summary)
            }
            Err(e) if is_truncation(&e) => {
                tracing::warn!("Archive truncated: {}", e);
                ImportOutcome::Truncated(summary)
            }
            Err(ExportError::PaddingOrAuthenticationError) => {
                tracing::warn!("Archive failed authentication");
                ImportOutcome::WrongPasswordOrCorrupt(summary)
            }
            Err(cause) => {
                tracing::warn!("Archive import aborted: {}", cause);
                ImportOutcome::Aborted { cause, summary }
            }
        }
    }

    fn run<R: Read>(
        &self,
        source: &mut R,
        password: Password,
        target: &dyn RestoreTarget,
        summary: &mut ImportSummary,
    ) -> Result<ReadEnd> {
        let (header, key_check) = ArchiveHeader::read_from(source)?;
        if header.iterations < MIN_ITERATIONS {
            return Err(ExportError::InvalidArchive(format!(
                "iteration count {} below minimum {}",
                header.iterations, MIN_ITERATIONS
            )));
        }

        let keys = {
            let key = derive_key(password, &header.salt, &KdfParams::with_iterations(header.iterations))?;
            split_keys(&key)?
        };

        let header_bytes = header.to_bytes();
        let mut check = new_mac(&keys)?;
        check.update(&header_bytes);
        if !verify_tag(check, &key_check) {
            return Err(ExportError::PaddingOrAuthenticationError);
        }
        tracing::debug!(iterations = header.iterations, "Archive key check passed");

        let mut manifest = new_mac(&keys)?;
        manifest.update(&header_bytes);
        manifest.update(&key_check);

        let mut count: u32 = 0;
        self.observer.operation_started(None);

        loop {
            if self.cancel.is_cancelled() {
                return Ok(ReadEnd::Cancelled);
            }

            let entry = match read_record(source)? {
                None => return Ok(ReadEnd::Truncated),
                Some(Record::End(end)) => {
                    manifest.update(&EndMarker::prefix_bytes(end.entry_count));
                    if end.entry_count != count || !verify_tag(manifest, &end.tag) {
                        return Err(ExportError::PaddingOrAuthenticationError);
                    }
                    return Ok(ReadEnd::Complete);
                }
                Some(Record::Entry(entry)) => entry,
            };

            let index = count as usize;
            count = count
                .checked_add(1)
                .ok_or_else(|| ExportError::InvalidArchive("too many entries".into()))?;
            manifest.update(&entry.to_bytes());

            self.observer.entry_started(index, &entry.path);
            let (trailer, restored) = self.read_entry(source, &entry, &keys, target, summary)?;
            manifest.update(&trailer.to_bytes());
            self.observer.entry_finished(index, &entry.path, restored);
        }
    }

    fn read_entry<R: Read>(
        &self,
        source: &mut R,
        entry: &EntryHeader,
        keys: &ArchiveKeys,
        target: &dyn RestoreTarget,
        summary: &mut ImportSummary,
    ) -> Result<(EntryTrailer, bool)> {
        let mut entry_mac = new_mac(keys)?;
        entry_mac.update(&entry.to_bytes());
        let mut body = MacReader::new(source.by_ref().take(entry.ciphertext_len), entry_mac);

        let mut staged = match VaultPath::parse(&entry.path) {
            Ok(path) => target
                .open_for_write(&path)
                .map_err(|e| SkipReason::DestinationWriteFailure(e.to_string())),
            Err(_) => Err(SkipReason::PathTraversal),
        };

        let decrypted = match staged.as_mut() {
            Ok(file) => Some(decrypt_stream(
                &mut body,
                file,
                keys.cipher_key(),
                &entry.iv,
                self.config.chunk_size,
            )),
            Err(_) => None,
        };

        // Step over whatever the cipher left unread; the tag covers all of it
        io::copy(&mut body, &mut io::sink())?;
        let (_, mac, consumed) = body.into_parts();
        if consumed != entry.ciphertext_len {
            return Err(ExportError::InvalidArchive("truncated entry ciphertext".into()));
        }
        let trailer = EntryTrailer::read_from(source)?;

        let file = match staged {
            Ok(file) => file,
            Err(reason) => {
                let write_failed = matches!(reason, SkipReason::DestinationWriteFailure(_));
                skip(summary, &entry.path, reason);
                if write_failed {
                    ensure_writable(target)?;
                }
                return Ok((trailer, false));
            }
        };

        if !trailer.is_sealed() {
            file.discard();
            skip(summary, &entry.path, SkipReason::AbandonedAtExport);
            return Ok((trailer, false));
        }

        let authentic = verify_tag(mac, &trailer.tag);
        let write_error = match decrypted {
            Some(Ok(n)) if authentic && n == entry.plaintext_len => match file.commit() {
                Ok(()) => {
                    tracing::debug!(path = %entry.path, bytes = n, "Entry restored");
                    summary.restored.push(entry.path.clone());
                    return Ok((trailer, true));
                }
                Err(e) => e,
            },
            Some(Err(StreamFault::Write(e))) if authentic => {
                file.discard();
                e
            }
            Some(Err(StreamFault::Read(e))) => {
                file.discard();
                return Err(ExportError::Io(e));
            }
            _ => {
                file.discard();
                return match self.config.corrupt_entry_policy {
                    CorruptEntryPolicy::Abort => Err(ExportError::PaddingOrAuthenticationError),
                    CorruptEntryPolicy::Skip => {
                        skip(summary, &entry.path, SkipReason::Corrupt);
                        Ok((trailer, false))
                    }
                };
            }
        };

        skip(
            summary,
            &entry.path,
            SkipReason::DestinationWriteFailure(write_error.to_string()),
        );
        ensure_writable(target)?;
        Ok((trailer, false))
    }
}

/// One entry as seen without the password
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedEntry {
    pub path: String,
    pub plaintext_len: u64,
    /// `false` for entries abandoned at export time
    pub sealed: bool,
}

/// Unauthenticated view of an archive's framing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveListing {
    pub version: u16,
    pub iterations: u32,
    pub salt: String,
    pub entries: Vec<ListedEntry>,
    /// Count from the end marker; `None` if the archive stops early
    pub declared_count: Option<u32>,
}

impl ArchiveListing {
    pub fn has_end_marker(&self) -> bool {
        self.declared_count.is_some()
    }
}

/// Walks the archive framing without deriving keys. Nothing here is
/// authenticated; use a verify pass before trusting it.
pub fn inspect<R: Read>(source: R) -> Result<ArchiveListing> {
    let mut source = BufReader::new(source);
    let (header, _) = ArchiveHeader::read_from(&mut source)?;

    let mut listing = ArchiveListing {
        version: header.version,
        iterations: header.iterations,
        salt: hex::encode(header.salt),
        entries: Vec::new(),
        declared_count: None,
    };

    loop {
        let record = match read_record(&mut source) {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) if is_truncation(&e) => break,
            Err(e) => return Err(e),
        };

        let entry = match record {
            Record::End(end) => {
                listing.declared_count = Some(end.entry_count);
                break;
            }
            Record::Entry(entry) => entry,
        };

        let stepped = io::copy(&mut source.by_ref().take(entry.ciphertext_len), &mut io::sink())?;
        if stepped != entry.ciphertext_len {
            break;
        }
        let trailer = match EntryTrailer::read_from(&mut source) {
            Ok(trailer) => trailer,
            Err(e) if is_truncation(&e) => break,
            Err(e) => return Err(e),
        };

        listing.entries.push(ListedEntry {
            path: entry.path,
            plaintext_len: entry.plaintext_len,
            sealed: trailer.is_sealed(),
        });
    }

    Ok(listing)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::container::format::HEADER_LEN;
    use crate::container::ContainerWriter;
    use crate::crypto::{compute_tag, encrypt_stream, finalize_tag, MacWriter, RngEntropy, TAG_LEN};
    use crate::storage::{MemoryVault, VaultStorage};

    const PASSWORD: &str = "correct-horse";

    fn export(vault: &MemoryVault) -> Vec<u8> {
        let mut archive = Vec::new();
        let outcome = ContainerWriter::new(ExportConfig::default())
            .with_randomness(RngEntropy::seeded(7))
            .write(vault, vault.list_all_files().unwrap(), Password::from(PASSWORD), &mut archive);
        assert!(outcome.is_success(), "{}", outcome);
        archive
    }

    fn import(archive: &[u8], config: ExportConfig, target: &MemoryVault) -> ImportOutcome {
        ContainerReader::new(config).read(Cursor::new(archive), Password::from(PASSWORD), target)
    }

    /// Archive built without the writer's path checks
    fn craft(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let salt = [9u8; 16];
        let iterations = MIN_ITERATIONS;
        let key = derive_key(Password::from(PASSWORD), &salt, &KdfParams::with_iterations(iterations))
            .unwrap();
        let keys = split_keys(&key).unwrap();

        let mut out = ArchiveHeader::new(salt, iterations).to_bytes();
        let key_check = compute_tag(&keys, &out).unwrap();
        out.extend_from_slice(&key_check);
        let mut manifest = new_mac(&keys).unwrap();
        manifest.update(&out);

        for (i, (path, data)) in entries.iter().enumerate() {
            let iv = [i as u8; 16];
            let header = EntryHeader::new(path, iv, data.len() as u64).unwrap();
            let header_bytes = header.to_bytes();
            out.extend_from_slice(&header_bytes);
            manifest.update(&header_bytes);

            let mut mac = new_mac(&keys).unwrap();
            mac.update(&header_bytes);
            let mut writer = MacWriter::new(&mut out, mac);
            encrypt_stream(&mut Cursor::new(data), &mut writer, keys.cipher_key(), &iv, 4096).unwrap();
            let (_, mac, _) = writer.into_parts();

            let trailer = EntryTrailer::sealed(finalize_tag(mac)).to_bytes();
            out.extend_from_slice(&trailer);
            manifest.update(&trailer);
        }

        let count = entries.len() as u32;
        manifest.update(&EndMarker::prefix_bytes(count));
        out.extend_from_slice(
            &EndMarker {
                entry_count: count,
                tag: finalize_tag(manifest),
            }
            .to_bytes(),
        );
        out
    }

    #[test]
    fn test_roundtrip_into_memory() {
        let vault = MemoryVault::with_files([("a.txt", "hello"), ("sub/b.txt", "world")]).unwrap();
        let archive = export(&vault);

        let restored = MemoryVault::new();
        let outcome = import(&archive, ExportConfig::default(), &restored);

        assert!(outcome.is_success(), "{}", outcome);
        assert_eq!(restored.get("a.txt").unwrap(), b"hello");
        assert_eq!(restored.get("sub/b.txt").unwrap(), b"world");
        assert!(outcome.summary().unwrap().complete);
    }

    #[test]
    fn test_wrong_password_restores_nothing() {
        let vault = MemoryVault::with_files([("a.txt", "hello")]).unwrap();
        let archive = export(&vault);

        let restored = MemoryVault::new();
        let outcome = ContainerReader::new(ExportConfig::default()).read(
            Cursor::new(&archive),
            Password::from("wrong"),
            &restored,
        );

        assert!(matches!(outcome, ImportOutcome::WrongPasswordOrCorrupt(_)));
        assert!(restored.is_empty());
    }

    #[test]
    fn test_traversal_entry_skipped() {
        let archive = craft(&[("../evil.txt", b"pwned"), ("ok.txt", b"fine")]);

        let restored = MemoryVault::new();
        let outcome = import(&archive, ExportConfig::default(), &restored);

        match outcome {
            ImportOutcome::Completed(summary) => {
                assert_eq!(summary.restored, vec!["ok.txt".to_string()]);
                assert_eq!(summary.skipped.len(), 1);
                assert_eq!(summary.skipped[0].reason, SkipReason::PathTraversal);
            }
            other => panic!("unexpected outcome: {}", other),
        }
        assert_eq!(restored.paths(), vec!["ok.txt".to_string()]);
    }

    #[test]
    fn test_tampered_entry_policies() {
        let vault = MemoryVault::with_files([("a.txt", "hello"), ("b.txt", "world")]).unwrap();
        let mut archive = export(&vault);
        // First ciphertext byte of a.txt: header, key check, 40-byte entry header
        archive[HEADER_LEN + TAG_LEN + 40] ^= 0x01;

        let restored = MemoryVault::new();
        let outcome = import(&archive, ExportConfig::default(), &restored);
        assert!(matches!(outcome, ImportOutcome::WrongPasswordOrCorrupt(_)));
        assert!(restored.is_empty());

        let lenient = ExportConfig {
            corrupt_entry_policy: CorruptEntryPolicy::Skip,
            ..Default::default()
        };
        let restored = MemoryVault::new();
        match import(&archive, lenient, &restored) {
            ImportOutcome::Completed(summary) => {
                assert_eq!(summary.restored, vec!["b.txt".to_string()]);
                assert_eq!(summary.skipped[0].reason, SkipReason::Corrupt);
            }
            other => panic!("unexpected outcome: {}", other),
        }
        assert!(restored.get("a.txt").is_none());
    }

    #[test]
    fn test_missing_end_marker_is_truncated() {
        let vault = MemoryVault::with_files([("a.txt", "hello"), ("b.txt", "world")]).unwrap();
        let archive = export(&vault);
        let cut = &archive[..archive.len() - (5 + TAG_LEN)];

        let restored = MemoryVault::new();
        match import(cut, ExportConfig::default(), &restored) {
            ImportOutcome::Truncated(summary) => {
                assert_eq!(summary.restored_count(), 2);
                assert!(!summary.complete);
            }
            other => panic!("unexpected outcome: {}", other),
        }

        // Cut inside the second entry's ciphertext
        let cut = &archive[..archive.len() - (5 + TAG_LEN) - (1 + TAG_LEN) - 4];
        let restored = MemoryVault::new();
        match import(cut, ExportConfig::default(), &restored) {
            ImportOutcome::Truncated(summary) => assert_eq!(summary.restored, vec!["a.txt".to_string()]),
            other => panic!("unexpected outcome: {}", other),
        }
        assert!(restored.get("b.txt").is_none());
    }

    #[test]
    fn test_cancelled_before_first_entry() {
        let vault = MemoryVault::with_files([("a.txt", "hello")]).unwrap();
        let archive = export(&vault);

        let cancel = CancelToken::new();
        cancel.cancel();
        let restored = MemoryVault::new();
        let outcome = ContainerReader::new(ExportConfig::default())
            .with_cancel(cancel)
            .read(Cursor::new(&archive), Password::from(PASSWORD), &restored);

        assert!(matches!(outcome, ImportOutcome::Cancelled(_)));
        assert!(restored.is_empty());
    }

    #[test]
    fn test_inspect_without_password() {
        let vault = MemoryVault::with_files([("a.txt", "hello"), ("sub/b.txt", "world!")]).unwrap();
        let archive = export(&vault);

        let listing = inspect(Cursor::new(&archive)).unwrap();
        assert_eq!(listing.iterations, MIN_ITERATIONS);
        assert_eq!(listing.declared_count, Some(2));
        assert_eq!(listing.entries[1].path, "sub/b.txt");
        assert_eq!(listing.entries[1].plaintext_len, 6);
        assert!(listing.entries.iter().all(|e| e.sealed));

        let listing = inspect(Cursor::new(&archive[..archive.len() - 10])).unwrap();
        assert!(!listing.has_end_marker());
        assert_eq!(listing.entries.len(), 2);
    }

    #[test]
    fn test_unwritable_target_refused() {
        struct ReadOnly;
        impl RestoreTarget for ReadOnly {
            fn open_for_write(&self, _path: &VaultPath) -> io::Result<Box<dyn StagedFile>> {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
            }
            fn is_writable(&self) -> bool {
                false
            }
        }

        let outcome = ContainerReader::new(ExportConfig::default()).read(
            Cursor::new(Vec::new()),
            Password::from(PASSWORD),
            &ReadOnly,
        );
        assert!(matches!(
            outcome,
            ImportOutcome::Aborted {
                cause: ExportError::StorageUnavailable(_),
                ..
            }
        ));
    }

    #[test]
    fn test_root_lost_on_open_aborts() {
        /// Writable for the up-front check only, then every open fails
        struct Vanishing(AtomicUsize);
        impl RestoreTarget for Vanishing {
            fn open_for_write(&self, _path: &VaultPath) -> io::Result<Box<dyn StagedFile>> {
                Err(io::Error::new(io::ErrorKind::NotFound, "root removed"))
            }
            fn is_writable(&self) -> bool {
                self.0.fetch_add(1, Ordering::SeqCst) == 0
            }
        }

        let vault = MemoryVault::with_files([("a.txt", "1"), ("b.txt", "2"), ("c.txt", "3")]).unwrap();
        let archive = export(&vault);

        let target = Vanishing(AtomicUsize::new(0));
        let outcome = ContainerReader::new(ExportConfig::default()).read(
            Cursor::new(&archive),
            Password::from(PASSWORD),
            &target,
        );

        match outcome {
            ImportOutcome::Aborted { cause, summary } => {
                assert!(matches!(cause, ExportError::StorageUnavailable(_)));
                assert_eq!(summary.skipped.len(), 1);
                assert!(summary.restored.is_empty());
            }
            other => panic!("unexpected outcome: {}", other),
        }
    }
}

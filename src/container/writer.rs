//! Export path: vault files -> encrypted archive

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::sync::Arc;

use hmac::Mac;

use super::format::{ArchiveHeader, EndMarker, EntryHeader, EntryTrailer};
use crate::config::ExportConfig;
use crate::control::{CancelToken, NoProgress, ProgressObserver};
use crate::crypto::{
    compute_tag, derive_key, encrypt_stream, finalize_tag, new_mac, split_keys, ArchiveKeys,
    HmacSha256, Iv, KdfParams, MacWriter, OsEntropy, Password, RandomnessSource, StreamFault,
};
use crate::error::{ExportError, Result};
use crate::report::{EntryFailure, ExportOutcome, ExportSummary};
use crate::storage::{FileEntryDescriptor, VaultStorage};

/// Source wrapper that yields exactly the listed size or fails
struct ExactSource<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> ExactSource<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            remaining: size,
        }
    }
}

impl<R: Read> Read for ExactSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            let mut extra = [0u8; 1];
            return match self.inner.read(&mut extra)? {
                0 => Ok(0),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "source grew past its listed size",
                )),
            };
        }

        let max = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "source shrank below its listed size",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

fn emit<W: Write + ?Sized>(sink: &mut W, bytes: &[u8]) -> Result<()> {
    sink.write_all(bytes).map_err(ExportError::DestinationWriteFailure)
}

enum EntryResult {
    Sealed,
    /// Record written with filler ciphertext
    Abandoned(ExportError),
    /// Nothing written for this entry
    NotWritten(ExportError),
}

enum Flow {
    Finished,
    Cancelled,
}

/// Streams vault entries into one archive
pub struct ContainerWriter {
    config: ExportConfig,
    rng: Box<dyn RandomnessSource>,
    cancel: CancelToken,
    observer: Arc<dyn ProgressObserver>,
    unlisted: Vec<EntryFailure>,
}

impl ContainerWriter {
    pub fn new(config: ExportConfig) -> Self {
        Self {
            config,
            rng: Box::new(OsEntropy),
            cancel: CancelToken::new(),
            observer: Arc::new(NoProgress),
            unlisted: Vec::new(),
        }
    }

    /// Failures from listing the vault, reported ahead of the written entries
    pub fn with_unlisted(mut self, unlisted: Vec<EntryFailure>) -> Self {
        self.unlisted = unlisted;
        self
    }

    /// Replaces the OS randomness source (seeded sources give golden archives)
    pub fn with_randomness<S: RandomnessSource + 'static>(mut self, rng: S) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Writes `entries` into `sink` under a key derived from `password`.
    ///
    /// Entries are written in path order. A source that fails to read is
    /// recorded and skipped; a failing sink or a vanished vault aborts.
    /// With no entries but some unlisted failures, an empty archive is
    /// still written so the failures are reported.
    pub fn write<W: Write>(
        &mut self,
        storage: &dyn VaultStorage,
        mut entries: Vec<FileEntryDescriptor>,
        password: Password,
        sink: W,
    ) -> ExportOutcome {
        if password.is_empty() {
            return ExportOutcome::Rejected(ExportError::InvalidCredentialInput);
        }
        if let Err(e) = self.config.validate() {
            return ExportOutcome::Rejected(e);
        }
        if entries.is_empty() && self.unlisted.is_empty() {
            return ExportOutcome::NoFiles;
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let mut summary = ExportSummary {
            failed: std::mem::take(&mut self.unlisted),
            ..Default::default()
        };
        entries.dedup_by(|dup, kept| {
            if dup.path != kept.path {
                return false;
            }
            tracing::warn!("Duplicate vault path not exported twice: {}", dup.path);
            summary.failed.push(EntryFailure {
                path: dup.path.to_string(),
                reason: "path listed more than once by the vault".into(),
            });
            true
        });

        tracing::info!(entries = entries.len(), "Starting vault export");

        match self.run(storage, &entries, password, sink, &mut summary) {
            Ok(Flow::Finished) => {
                summary.complete = true;
                tracing::info!(
                    succeeded = summary.succeeded_count(),
                    failed = summary.failed_count(),
                    "Vault export finished"
                );
                ExportOutcome::Completed(summary)
            }
            Ok(Flow::Cancelled) => {
                tracing::info!(succeeded = summary.succeeded_count(), "Vault export cancelled");
                ExportOutcome::Cancelled(summary)
            }
            Err(cause) => {
                tracing::warn!("Vault export aborted: {}", cause);
                ExportOutcome::Aborted { cause, summary }
            }
        }
    }

    fn run<W: Write>(
        &mut self,
        storage: &dyn VaultStorage,
        entries: &[FileEntryDescriptor],
        password: Password,
        mut sink: W,
        summary: &mut ExportSummary,
    ) -> Result<Flow> {
        let salt = self.rng.salt()?;
        let keys = {
            let key = derive_key(password, &salt, &KdfParams::with_iterations(self.config.iterations))?;
            split_keys(&key)?
        };

        let header_bytes = ArchiveHeader::new(salt, self.config.iterations).to_bytes();
        let key_check = compute_tag(&keys, &header_bytes)?;
        emit(&mut sink, &header_bytes)?;
        emit(&mut sink, &key_check)?;

        let mut manifest = new_mac(&keys)?;
        manifest.update(&header_bytes);
        manifest.update(&key_check);

        let mut seen_ivs = HashSet::with_capacity(entries.len());
        let mut count: u32 = 0;
        self.observer.operation_started(Some(entries.len()));

        for (index, entry) in entries.iter().enumerate() {
            if self.cancel.is_cancelled() {
                sink.flush().map_err(ExportError::DestinationWriteFailure)?;
                return Ok(Flow::Cancelled);
            }

            let path = entry.path.as_str();
            self.observer.entry_started(index, path);

            let result =
                self.write_entry(storage, entry, &keys, &mut manifest, &mut seen_ivs, &mut sink)?;
            let failure = match result {
                EntryResult::Sealed => {
                    count += 1;
                    summary.succeeded.push(path.to_string());
                    None
                }
                EntryResult::Abandoned(err) => {
                    count += 1;
                    Some(err)
                }
                EntryResult::NotWritten(err) => Some(err),
            };

            self.observer.entry_finished(index, path, failure.is_none());
            if let Some(err) = failure {
                debug_assert!(err.is_per_entry());
                tracing::warn!("Export entry skipped: {}", err);
                summary.failed.push(EntryFailure {
                    path: path.to_string(),
                    reason: err.to_string(),
                });
                if !storage.is_available() {
                    return Err(ExportError::StorageUnavailable(
                        "vault disappeared during export".into(),
                    ));
                }
            }
        }

        manifest.update(&EndMarker::prefix_bytes(count));
        let end = EndMarker {
            entry_count: count,
            tag: finalize_tag(manifest),
        };
        emit(&mut sink, &end.to_bytes())?;
        sink.flush().map_err(ExportError::DestinationWriteFailure)?;

        Ok(Flow::Finished)
    }

    fn write_entry<W: Write>(
        &mut self,
        storage: &dyn VaultStorage,
        entry: &FileEntryDescriptor,
        keys: &ArchiveKeys,
        manifest: &mut HmacSha256,
        seen_ivs: &mut HashSet<Iv>,
        sink: &mut W,
    ) -> Result<EntryResult> {
        let source = match storage.open_read(&entry.path) {
            Ok(source) => source,
            Err(source) => {
                return Ok(EntryResult::NotWritten(ExportError::SourceReadFailure {
                    path: entry.path.to_string(),
                    source,
                }))
            }
        };

        let iv = self.rng.iv()?;
        if !seen_ivs.insert(iv) {
            return Err(ExportError::EntropyUnavailable(
                "IV repeated within one export".into(),
            ));
        }

        let header = match EntryHeader::new(entry.path.as_str(), iv, entry.size) {
            Ok(header) => header,
            Err(e) => return Ok(EntryResult::NotWritten(e)),
        };
        let header_bytes = header.to_bytes();
        emit(sink, &header_bytes)?;
        manifest.update(&header_bytes);

        let mut entry_mac = new_mac(keys)?;
        entry_mac.update(&header_bytes);

        let mut source = ExactSource::new(source, entry.size);
        let mut out = MacWriter::new(&mut *sink, entry_mac);
        let streamed = encrypt_stream(
            &mut source,
            &mut out,
            keys.cipher_key(),
            &iv,
            self.config.chunk_size,
        );
        let (_, mac, written) = out.into_parts();

        let (trailer, result) = match streamed {
            Ok(_) => {
                debug_assert_eq!(written, header.ciphertext_len);
                (EntryTrailer::sealed(finalize_tag(mac)), EntryResult::Sealed)
            }
            Err(StreamFault::Read(e)) => {
                // Keep the declared framing so readers can step over the entry
                let filler = header.ciphertext_len.saturating_sub(written);
                io::copy(&mut io::repeat(0).take(filler), sink)
                    .map_err(ExportError::DestinationWriteFailure)?;
                let err = ExportError::SourceReadFailure {
                    path: entry.path.to_string(),
                    source: e,
                };
                (EntryTrailer::abandoned(), EntryResult::Abandoned(err))
            }
            Err(fault) => return Err(fault.into()),
        };

        let trailer_bytes = trailer.to_bytes();
        emit(sink, &trailer_bytes)?;
        manifest.update(&trailer_bytes);

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::container::format::{read_record, Record, HEADER_LEN};
    use crate::crypto::{RngEntropy, TAG_LEN};
    use crate::storage::MemoryVault;

    fn export(vault: &MemoryVault, seed: u64) -> (ExportOutcome, Vec<u8>) {
        let mut sink = Vec::new();
        let entries = vault.list_all_files().unwrap();
        let outcome = ContainerWriter::new(ExportConfig::default())
            .with_randomness(RngEntropy::seeded(seed))
            .write(vault, entries, Password::from("correct-horse"), &mut sink);
        (outcome, sink)
    }

    #[test]
    fn test_empty_export_leaves_sink_untouched() {
        let vault = MemoryVault::new();
        let (outcome, sink) = export(&vault, 1);

        assert!(matches!(outcome, ExportOutcome::NoFiles));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_empty_password_rejected_before_io() {
        let vault = MemoryVault::with_files([("a.txt", "hello")]).unwrap();
        let mut sink = Vec::new();
        let outcome = ContainerWriter::new(ExportConfig::default()).write(
            &vault,
            vault.list_all_files().unwrap(),
            Password::from(""),
            &mut sink,
        );

        assert!(matches!(outcome, ExportOutcome::Rejected(ExportError::InvalidCredentialInput)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_entries_written_in_path_order() {
        let vault = MemoryVault::with_files([("z.txt", "last"), ("a.txt", "first"), ("m/x.bin", "mid")])
            .unwrap();
        let (outcome, archive) = export(&vault, 3);
        assert!(outcome.is_success());

        let mut cursor = Cursor::new(&archive[HEADER_LEN + TAG_LEN..]);
        let mut paths = Vec::new();
        while let Some(record) = read_record(&mut cursor).unwrap() {
            match record {
                Record::Entry(header) => {
                    paths.push(header.path);
                    cursor.set_position(cursor.position() + header.ciphertext_len + 1 + TAG_LEN as u64);
                }
                Record::End(end) => {
                    assert_eq!(end.entry_count, 3);
                    break;
                }
            }
        }
        assert_eq!(paths, vec!["a.txt", "m/x.bin", "z.txt"]);
    }

    #[test]
    fn test_seeded_export_is_byte_identical() {
        let vault = MemoryVault::with_files([("a.txt", "hello"), ("sub/b.txt", "world")]).unwrap();

        let (_, first) = export(&vault, 42);
        let (_, second) = export(&vault, 42);
        let (_, other) = export(&vault, 43);

        assert_eq!(first, second);
        assert_eq!(first.len(), other.len());
        assert_ne!(first, other);
    }

    #[test]
    fn test_repeated_iv_aborts() {
        struct StuckRng;
        impl RandomnessSource for StuckRng {
            fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<()> {
                dest.fill(0xAB);
                Ok(())
            }
        }

        let vault = MemoryVault::with_files([("a.txt", "1"), ("b.txt", "2")]).unwrap();
        let mut sink = Vec::new();
        let outcome = ContainerWriter::new(ExportConfig::default())
            .with_randomness(StuckRng)
            .write(&vault, vault.list_all_files().unwrap(), Password::from("pw"), &mut sink);

        match outcome {
            ExportOutcome::Aborted { cause, summary } => {
                assert!(matches!(cause, ExportError::EntropyUnavailable(_)));
                assert_eq!(summary.succeeded, vec!["a.txt".to_string()]);
                assert!(!summary.complete);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_listing_reported() {
        let vault = MemoryVault::with_files([("a.txt", "hello"), ("b.txt", "world")]).unwrap();
        let mut entries = vault.list_all_files().unwrap();
        entries.push(entries[0].clone());

        let mut sink = Vec::new();
        let outcome = ContainerWriter::new(ExportConfig::default())
            .with_randomness(RngEntropy::seeded(7))
            .write(&vault, entries, Password::from("pw"), &mut sink);

        match outcome {
            ExportOutcome::Completed(summary) => {
                assert_eq!(summary.succeeded, vec!["a.txt".to_string(), "b.txt".to_string()]);
                assert_eq!(summary.failed_paths(), vec!["a.txt"]);
                assert!(summary.complete);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_unlisted_failures_reported() {
        let vault = MemoryVault::new();
        let unlisted = vec![EntryFailure {
            path: "locked".into(),
            reason: "permission denied".into(),
        }];

        let mut sink = Vec::new();
        let outcome = ContainerWriter::new(ExportConfig::default())
            .with_unlisted(unlisted)
            .write(&vault, Vec::new(), Password::from("pw"), &mut sink);

        match outcome {
            ExportOutcome::Completed(summary) => {
                assert!(summary.succeeded.is_empty());
                assert_eq!(summary.failed_paths(), vec!["locked"]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!sink.is_empty());
    }

    #[test]
    fn test_exact_source_detects_size_change() {
        let mut grew = ExactSource::new(Cursor::new(b"abcdef".to_vec()), 3);
        let mut out = Vec::new();
        assert!(grew.read_to_end(&mut out).is_err());

        let mut shrank = ExactSource::new(Cursor::new(b"ab".to_vec()), 3);
        assert!(shrank.read_to_end(&mut Vec::new()).is_err());

        let mut exact = ExactSource::new(Cursor::new(b"abc".to_vec()), 3);
        let mut out = Vec::new();
        exact.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
    }
}

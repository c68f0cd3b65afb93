//! High-level export/import façade over a vault

use std::io::{self, BufWriter, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ExportConfig;
use crate::container::{self, ArchiveListing, ContainerReader, ContainerWriter};
use crate::control::{CancelToken, NoProgress, ProgressObserver};
use crate::crypto::{OsEntropy, Password, RandomnessSource};
use crate::error::{ExportError, Result};
use crate::report::{ExportOutcome, ExportSummary, ImportOutcome, ImportSummary};
use crate::storage::{DiscardTarget, RestoreTarget, VaultStorage};

/// Exports a vault into a single encrypted archive and restores it again.
///
/// Cheap to clone; clones share the storage, observer and cancel token.
/// A cancelled token is retired when its operation ends, so the next
/// operation starts with a fresh one.
pub struct VaultExporter<S: VaultStorage> {
    storage: Arc<S>,
    config: ExportConfig,
    observer: Arc<dyn ProgressObserver>,
    cancel: Arc<Mutex<CancelToken>>,
}

impl<S: VaultStorage> Clone for VaultExporter<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            config: self.config.clone(),
            observer: Arc::clone(&self.observer),
            cancel: Arc::clone(&self.cancel),
        }
    }
}

impl<S: VaultStorage + 'static> VaultExporter<S> {
    pub fn new(storage: S, config: ExportConfig) -> Self {
        Self::from_shared(Arc::new(storage), config)
    }

    pub fn from_shared(storage: Arc<S>, config: ExportConfig) -> Self {
        Self {
            storage,
            config,
            observer: Arc::new(NoProgress),
            cancel: Arc::new(Mutex::new(CancelToken::new())),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Token that stops the running (or next) operation before its next entry
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.lock().clone()
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Runs `op` under the current token and retires the token if it was cancelled
    fn run_cancellable<T>(&self, op: impl FnOnce(CancelToken) -> T) -> T {
        let token = self.cancel_token();
        let result = op(token.clone());
        if token.is_cancelled() {
            let mut current = self.cancel.lock();
            if current.same_as(&token) {
                *current = CancelToken::new();
            }
        }
        result
    }

    fn writer(&self, cancel: CancelToken) -> ContainerWriter {
        ContainerWriter::new(self.config.clone())
            .with_cancel(cancel)
            .with_observer(Arc::clone(&self.observer))
    }

    fn reader(&self, cancel: CancelToken) -> ContainerReader {
        ContainerReader::new(self.config.clone())
            .with_cancel(cancel)
            .with_observer(Arc::clone(&self.observer))
    }

    /// Exports every vault file into `sink`
    pub fn export<W: Write>(&self, password: Password, sink: W) -> ExportOutcome {
        self.export_to(password, move || Ok(sink))
    }

    /// Lists the vault first and only calls `open_sink` when there is
    /// something to write.
    pub fn export_to<W, F>(&self, password: Password, open_sink: F) -> ExportOutcome
    where
        W: Write,
        F: FnOnce() -> io::Result<W>,
    {
        self.export_with_randomness(OsEntropy, password, open_sink)
    }

    /// [`export_to`](Self::export_to) with an explicit randomness source
    pub fn export_with_randomness<R, W, F>(
        &self,
        rng: R,
        password: Password,
        open_sink: F,
    ) -> ExportOutcome
    where
        R: RandomnessSource + 'static,
        W: Write,
        F: FnOnce() -> io::Result<W>,
    {
        if password.is_empty() {
            return ExportOutcome::Rejected(ExportError::InvalidCredentialInput);
        }
        if let Err(e) = self.config.validate() {
            return ExportOutcome::Rejected(e);
        }

        let scan = match self.storage.scan() {
            Ok(scan) => scan,
            Err(cause) => {
                tracing::warn!("Could not list vault files: {}", cause);
                return ExportOutcome::Aborted {
                    cause,
                    summary: ExportSummary::default(),
                };
            }
        };
        if scan.files.is_empty() && scan.unlisted.is_empty() {
            tracing::info!("No files found to export");
            return ExportOutcome::NoFiles;
        }

        let sink = match open_sink() {
            Ok(sink) => BufWriter::with_capacity(self.config.chunk_size, sink),
            Err(e) => {
                return ExportOutcome::Aborted {
                    cause: ExportError::DestinationWriteFailure(e),
                    summary: ExportSummary::default(),
                }
            }
        };

        self.run_cancellable(|cancel| {
            self.writer(cancel)
                .with_randomness(rng)
                .with_unlisted(scan.unlisted)
                .write(self.storage.as_ref(), scan.files, password, sink)
        })
    }

    /// Restores `source` into `target`
    pub fn import<R: Read>(
        &self,
        source: R,
        password: Password,
        target: &dyn RestoreTarget,
    ) -> ImportOutcome {
        self.run_cancellable(|cancel| self.reader(cancel).read(source, password, target))
    }

    /// Full decrypt and authentication pass that writes nothing
    pub fn verify<R: Read>(&self, source: R, password: Password) -> ImportOutcome {
        self.run_cancellable(|cancel| self.reader(cancel).read(source, password, &DiscardTarget))
    }

    /// Entry list and parameters without the password
    pub fn inspect<R: Read>(&self, source: R) -> Result<ArchiveListing> {
        container::inspect(source)
    }

    /// Runs [`export`](Self::export) on the blocking pool
    pub async fn export_task<W>(&self, password: Password, sink: W) -> ExportOutcome
    where
        W: Write + Send + 'static,
    {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.export(password, sink)).await {
            Ok(outcome) => outcome,
            Err(e) => ExportOutcome::Aborted {
                cause: ExportError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())),
                summary: ExportSummary::default(),
            },
        }
    }

    /// Runs [`import`](Self::import) on the blocking pool
    pub async fn import_task<R, T>(&self, source: R, password: Password, target: Arc<T>) -> ImportOutcome
    where
        R: Read + Send + 'static,
        T: RestoreTarget + 'static,
    {
        let this = self.clone();
        let task = tokio::task::spawn_blocking(move || this.import(source, password, target.as_ref()));
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => ImportOutcome::Aborted {
                cause: ExportError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())),
                summary: ImportSummary::default(),
            },
        }
    }
}

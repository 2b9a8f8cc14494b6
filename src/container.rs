//! The container engine: open policy, eager parsing, lifecycle and staged
//! edits over one archive.
//!
//! A container is built from an explicit [`ParseOutcome`]; its
//! [`ContainerState`] is derived from that outcome and never from
//! intercepted faults. Backing adapters (and the scratch files they own)
//! belong to exactly one container and are released on disposal.

use crate::archive::{PakWriter, MAX_PATH_LENGTH};
use crate::config::{OpenOptions, OpenPolicy};
use crate::crypto::{self, KeySet, SALT_SIZE};
use crate::entry::{normalize_path, Entry, EntryFlags, ModFlags};
use crate::error::{PakError, Result};
use crate::formats::{FormatAdapter, FormatKind, Parsed};
use crate::progress::{ErrorReporter, NoProgress, ParseContext, ProgressSink, SharedProgress, TracingReporter};
use crate::table::EntryTable;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Lifecycle of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Loading,
    Normal,
    Error,
    LoadCancelled,
    Disposed,
}

/// Result of parsing an archive, before it becomes a container
#[derive(Debug)]
pub enum ParseOutcome {
    Parsed(Parsed),
    Cancelled,
    Failed(PakError),
}

impl From<Result<Parsed>> for ParseOutcome {
    fn from(result: Result<Parsed>) -> Self {
        match result {
            Ok(parsed) => Self::Parsed(parsed),
            Err(PakError::Cancelled) => Self::Cancelled,
            Err(err) => Self::Failed(err),
        }
    }
}

impl ParseOutcome {
    pub fn state(&self) -> ContainerState {
        match self {
            Self::Parsed(_) => ContainerState::Normal,
            Self::Cancelled => ContainerState::LoadCancelled,
            Self::Failed(_) => ContainerState::Error,
        }
    }
}

/// Parsed archive plus staged edits
pub struct Container {
    path: PathBuf,
    kind: Option<FormatKind>,
    state: ContainerState,
    pub(crate) table: EntryTable,
    /// Adapter parsed from `path` itself
    pub(crate) primary: Option<Arc<dyn FormatAdapter>>,
    /// Every adapter whose stream backs an entry, `primary` included
    pub(crate) adapters: Vec<Arc<dyn FormatAdapter>>,
    pub(crate) salt: Option<[u8; SALT_SIZE]>,
    pub(crate) keys: KeySet,
    options: OpenOptions,
    failure: Option<PakError>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("entries", &self.table.len())
            .field("adapters", &self.adapters.len())
            .field("keys", &self.keys)
            .finish()
    }
}

impl Container {
    /// Open and parse `path`, turning any load failure into an error
    pub fn open<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Self> {
        let mut container = Self::load(path, options, &NoProgress, &TracingReporter);
        match container.state {
            ContainerState::Normal => Ok(container),
            ContainerState::LoadCancelled => Err(PakError::Cancelled),
            state => Err(container
                .take_error()
                .unwrap_or(PakError::InvalidState(state))),
        }
    }

    /// Open and parse `path` with collaborators.
    ///
    /// Never fails: the outcome is reflected in [`Container::state`]. A
    /// failed load is reported to `reporter` exactly once; a cancelled load
    /// is not reported.
    pub fn load<P: AsRef<Path>>(
        path: P,
        options: OpenOptions,
        progress: &dyn ProgressSink,
        reporter: &dyn ErrorReporter,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        progress.on_start();
        let outcome = ParseOutcome::from(parse_with_policy(&path, &options, progress));
        progress.on_finish();
        Self::from_outcome(path, options, outcome, reporter)
    }

    /// Build a container from a parse outcome
    pub fn from_outcome(
        path: PathBuf,
        options: OpenOptions,
        outcome: ParseOutcome,
        reporter: &dyn ErrorReporter,
    ) -> Self {
        let mut container = Self {
            path,
            kind: None,
            state: ContainerState::Loading,
            table: EntryTable::new(options.ignore_case),
            primary: None,
            adapters: Vec::new(),
            salt: None,
            keys: KeySet::default(),
            options,
            failure: None,
        };

        match outcome {
            ParseOutcome::Parsed(parsed) => {
                if let Err(err) = container.install(parsed) {
                    container.fail(err, reporter);
                }
            }
            ParseOutcome::Cancelled => {
                tracing::debug!(path = %container.path.display(), "load cancelled");
                container.state = ContainerState::LoadCancelled;
            }
            ParseOutcome::Failed(err) => container.fail(err, reporter),
        }
        container
    }

    /// An empty container that will be written to `path` on first save
    ///
    /// Passphrases in `options` are keyed against a fresh salt, so entries
    /// can be sealed before the first save.
    pub(crate) fn detached(path: PathBuf, kind: FormatKind, options: OpenOptions) -> Self {
        let (salt, keys) = if options.passphrase.is_some() || options.editor_passphrase.is_some() {
            let salt = crypto::random_salt();
            let keys = KeySet::derive(
                options.passphrase.as_deref(),
                options.editor_passphrase.as_deref(),
                &salt,
            );
            (Some(salt), keys)
        } else {
            (None, KeySet::default())
        };
        Self {
            path,
            kind: Some(kind),
            state: ContainerState::Normal,
            table: EntryTable::new(options.ignore_case),
            primary: None,
            adapters: Vec::new(),
            salt,
            keys,
            options,
            failure: None,
        }
    }

    fn install(&mut self, parsed: Parsed) -> Result<()> {
        let adapter = parsed.adapter;
        self.kind = Some(adapter.kind());
        self.adapters.push(adapter.clone());
        self.primary = Some(adapter);
        self.salt = parsed.salt;
        self.keys = parsed.keys;

        for entry in parsed.entries {
            if let Some(previous) = self.table.upsert(entry)? {
                tracing::warn!(path = %previous.path, "duplicate entry, keeping the later record");
            }
        }
        self.state = ContainerState::Normal;
        Ok(())
    }

    fn fail(&mut self, err: PakError, reporter: &dyn ErrorReporter) {
        reporter.report(&self.path, &err);
        self.release_adapters();
        self.table.clear();
        self.state = ContainerState::Error;
        self.failure = Some(err);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Format of the archive at [`Container::path`]
    pub fn kind(&self) -> Option<FormatKind> {
        self.kind
    }

    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// The failure behind an `Error` state
    pub fn error(&self) -> Option<&PakError> {
        self.failure.as_ref()
    }

    pub fn take_error(&mut self) -> Option<PakError> {
        self.failure.take()
    }

    /// Live entries in table order
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.table
            .iter()
            .filter(|e| !e.modifications.contains(ModFlags::REMOVED))
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry(&self, path: &str) -> Option<&Entry> {
        self.table
            .get(path)
            .filter(|e| !e.modifications.contains(ModFlags::REMOVED))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entry(path).is_some()
    }

    /// True when any entry carries a pending edit
    pub fn is_modified(&self) -> bool {
        self.table.iter().any(|e| !e.modifications.is_empty())
    }

    pub(crate) fn ensure_usable(&self) -> Result<()> {
        if self.state != ContainerState::Normal {
            return Err(PakError::InvalidState(self.state));
        }
        Ok(())
    }

    fn live_entry_mut(&mut self, path: &str) -> Result<&mut Entry> {
        self.ensure_usable()?;
        self.table
            .get_mut(path)
            .filter(|e| !e.modifications.contains(ModFlags::REMOVED))
            .ok_or_else(|| PakError::EntryNotFound(path.to_string()))
    }

    /// Drop a staged removal occupying `path` so a new entry can take it
    fn reclaim(&mut self, path: &str) {
        if self
            .table
            .get(path)
            .is_some_and(|e| e.modifications.contains(ModFlags::REMOVED))
        {
            self.table.remove(path);
        }
    }

    fn stage(&mut self, entry: Entry, replace: bool) -> Result<()> {
        self.ensure_usable()?;
        let path = storable_path(&entry.path)?;
        self.reclaim(&path);
        if replace {
            self.table.upsert(entry)?;
            Ok(())
        } else {
            self.table.insert(entry)
        }
    }

    /// Stage new bytes at `path`; fails if the path is taken
    pub fn add_bytes(&mut self, path: &str, data: impl Into<Arc<[u8]>>) -> Result<()> {
        self.stage(Entry::staged(path.to_string(), data), false)
    }

    /// Stage bytes at `path`, replacing any existing entry
    pub fn replace_bytes(&mut self, path: &str, data: impl Into<Arc<[u8]>>) -> Result<()> {
        self.stage(Entry::staged(path.to_string(), data), true)
    }

    /// Stage a file from disk; it is read when the container is saved
    pub fn add_file<P: AsRef<Path>>(&mut self, path: &str, source: P) -> Result<()> {
        self.stage(Entry::external(path.to_string(), source.as_ref())?, false)
    }

    pub fn add_directory(&mut self, path: &str) -> Result<()> {
        let mut entry = Entry::directory(path.to_string());
        entry.modifications = ModFlags::ADDED;
        self.stage(entry, false)
    }

    /// Stage storage flags for an entry (e.g. `LZSS`, `RAW_DATA_FILE`,
    /// `HEADER_CRYPTED`); the payload is re-encoded on save
    pub fn set_flags(&mut self, path: &str, flags: EntryFlags) -> Result<()> {
        let entry = self.live_entry_mut(path)?;
        if entry.is_directory() {
            return Err(PakError::UnsupportedOperation(format!("{} is a directory", path)));
        }
        entry.flags |= flags - EntryFlags::TRANSIENT;
        entry.modifications |= ModFlags::ADDED | ModFlags::REFLAGGED;
        Ok(())
    }

    /// Store the entry raw, never compressed
    pub fn mark_special(&mut self, path: &str) -> Result<()> {
        let entry = self.live_entry_mut(path)?;
        entry.modifications |= ModFlags::SPECIAL | ModFlags::ADDED;
        Ok(())
    }

    /// Keep the entry's stored bytes verbatim, even under a forced repack
    pub fn mark_do_not_rewrite(&mut self, path: &str) -> Result<()> {
        let entry = self.live_entry_mut(path)?;
        entry.modifications |= ModFlags::DO_NOT_REWRITE;
        Ok(())
    }

    /// Stage removal; the entry disappears from enumeration immediately
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let entry = self.live_entry_mut(path)?;
        if entry.modifications.contains(ModFlags::ADDED) && entry.origin.is_none() {
            let path = entry.path.clone();
            self.table.remove(&path);
            return Ok(());
        }
        entry.modifications |= ModFlags::REMOVED;
        entry.flags |= EntryFlags::REMOVE_FILE;
        Ok(())
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.live_entry_mut(from)?;
        let target = storable_path(to)?;
        self.reclaim(&target);
        self.table.rename(from, &target)?;
        if let Some(entry) = self.table.get_mut(&target) {
            entry.modifications |= ModFlags::FILE_NAME_RENAMED;
            entry.flags |= EntryFlags::FILE_NAME_RENAMED;
        }
        Ok(())
    }

    /// Stage encryption with the data key
    pub fn encrypt(&mut self, path: &str) -> Result<()> {
        self.keys.data_key(path)?;
        let entry = self.live_entry_mut(path)?;
        if entry.is_directory() {
            return Err(PakError::UnsupportedOperation(format!("{} is a directory", path)));
        }
        entry.modifications = (entry.modifications - ModFlags::DECRYPT) | ModFlags::ENCRYPT;
        entry.flags = (entry.flags - EntryFlags::DECRYPT) | EntryFlags::ENCRYPT;
        Ok(())
    }

    /// Stage decryption; the payload is stored plain on the next save
    pub fn decrypt(&mut self, path: &str) -> Result<()> {
        let entry = self.live_entry_mut(path)?;
        if !entry.flags.is_data_encrypted() && !entry.modifications.contains(ModFlags::ENCRYPT) {
            return Err(PakError::UnsupportedOperation(format!("{} is not encrypted", path)));
        }
        entry.modifications = (entry.modifications - ModFlags::ENCRYPT) | ModFlags::DECRYPT;
        entry.flags = (entry.flags - EntryFlags::ENCRYPT) | EntryFlags::DECRYPT;
        Ok(())
    }

    /// Set the data passphrase for an archive that has none yet
    pub fn set_passphrase(&mut self, passphrase: &str) -> Result<()> {
        self.ensure_usable()?;
        if self.keys.data.is_some() {
            return Err(PakError::UnsupportedOperation(
                "archive already has a data key".to_string(),
            ));
        }
        let salt = *self.salt.get_or_insert_with(crypto::random_salt);
        self.keys.data = Some(crypto::derive_key(passphrase, &salt));
        self.options.passphrase = Some(passphrase.to_string());
        Ok(())
    }

    /// Move every live entry of `other` into this container.
    ///
    /// Merged entries replace same-path entries, are flagged
    /// `ADDED | MERGE_SOURCE`, and keep reading through `other`'s adapters,
    /// which this container now owns.
    pub fn merge(&mut self, mut other: Container) -> Result<usize> {
        self.ensure_usable()?;
        other.ensure_usable()?;

        let entries = std::mem::take(&mut other.table).into_entries();
        self.adopt(&mut other);

        let mut merged = 0;
        for mut entry in entries {
            if entry.modifications.contains(ModFlags::REMOVED) {
                continue;
            }
            entry.modifications |= ModFlags::ADDED | ModFlags::MERGE_SOURCE;
            let path = normalize_path(&entry.path)?;
            self.reclaim(&path);
            self.table.upsert(entry)?;
            merged += 1;
        }

        tracing::info!(
            target = %self.path.display(),
            source = %other.path.display(),
            merged,
            "merged container"
        );
        Ok(merged)
    }

    /// Take ownership of `other`'s adapters, leaving it disposed
    pub(crate) fn adopt(&mut self, other: &mut Container) {
        self.adapters.append(&mut other.adapters);
        other.primary = None;
        other.table.clear();
        other.state = ContainerState::Disposed;
    }

    /// Decompressed bytes of `path`
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.ensure_usable()?;
        self.entry(path)
            .ok_or_else(|| PakError::EntryNotFound(path.to_string()))?
            .decompressed_data()
    }

    /// Compressed stream of `path`, as its format defines it
    pub fn read_compressed(&self, path: &str) -> Result<Vec<u8>> {
        self.ensure_usable()?;
        self.entry(path)
            .ok_or_else(|| PakError::EntryNotFound(path.to_string()))?
            .compressed_data()
    }

    /// Stream the stored bytes of `path` verbatim
    pub fn copy_raw(&self, path: &str, out: &mut dyn Write) -> Result<u64> {
        self.ensure_usable()?;
        self.entry(path)
            .ok_or_else(|| PakError::EntryNotFound(path.to_string()))?
            .copy_to(out)
    }

    /// True when `entry` is backed by this container's own archive file
    pub(crate) fn is_own(&self, entry: &Entry) -> bool {
        match (&self.primary, &entry.origin) {
            (Some(primary), Some(origin)) => Arc::ptr_eq(primary, origin),
            _ => false,
        }
    }

    /// Re-parse [`Container::path`] after a save, replacing the table
    pub(crate) fn reload(&mut self) -> Result<()> {
        self.release_adapters();
        self.table.clear();

        let mut options = self.options.clone();
        options.policy = OpenPolicy::Normal;
        let sink = NoProgress;
        let mut ctx = ParseContext::new(&sink);
        let result = FormatKind::detect(&self.path)
            .and_then(|kind| kind.parse(&self.path, &options, &mut ctx));

        match result {
            Ok(parsed) => {
                self.install(parsed)?;
                self.failure = None;
                tracing::debug!(path = %self.path.display(), entries = self.table.len(), "reloaded");
                Ok(())
            }
            Err(err) => {
                self.state = ContainerState::Error;
                Err(err)
            }
        }
    }

    fn release_adapters(&mut self) {
        for adapter in self.adapters.drain(..) {
            adapter.release();
        }
        self.primary = None;
    }

    /// Release backing streams and scratch files; idempotent
    pub fn dispose(&mut self) {
        if self.state == ContainerState::Disposed {
            return;
        }
        self.release_adapters();
        self.table.clear();
        self.state = ContainerState::Disposed;
        tracing::trace!(path = %self.path.display(), "disposed container");
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn create_empty(path: &Path, options: &OpenOptions) -> Result<()> {
    let mut writer = PakWriter::create(path)?;
    if let Some(passphrase) = &options.passphrase {
        writer = writer.with_passphrase(passphrase);
    }
    writer.finalize()?;
    tracing::info!(path = %path.display(), "created empty archive");
    Ok(())
}

fn parse_with_policy(path: &Path, options: &OpenOptions, progress: &dyn ProgressSink) -> Result<Parsed> {
    match options.policy {
        OpenPolicy::CreateNew => {
            if path.exists() {
                return Err(PakError::PathError(format!(
                    "{} already exists",
                    path.display()
                )));
            }
            create_empty(path, options)?;
        }
        OpenPolicy::OpenOrCreate if !path.exists() => create_empty(path, options)?,
        _ => {}
    }

    let mut ctx = ParseContext::new(progress);
    let kind = FormatKind::detect(path)?;
    let parsed = kind.parse(path, options, &mut ctx)?;
    ctx.publish(100);
    Ok(parsed)
}

/// A container parsing on a worker thread
pub struct LoadHandle {
    progress: Arc<SharedProgress>,
    worker: JoinHandle<Container>,
}

impl LoadHandle {
    pub fn spawn(path: impl Into<PathBuf>, options: OpenOptions, reporter: Arc<dyn ErrorReporter>) -> Self {
        let path = path.into();
        let progress = Arc::new(SharedProgress::default());
        let shared = progress.clone();
        let worker = std::thread::spawn(move || {
            Container::load(&path, options, shared.as_ref(), reporter.as_ref())
        });
        Self { progress, worker }
    }

    pub fn percent(&self) -> u8 {
        self.progress.percent()
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.progress.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.progress.is_finished()
    }

    /// Wait for the worker and take the container, whatever its state
    pub fn join(self) -> Result<Container> {
        self.worker
            .join()
            .map_err(|_| PakError::Io(std::io::Error::other("loader thread panicked")))
    }
}

/// Normalized path that fits in a PAK table record
fn storable_path(path: &str) -> Result<String> {
    let path = normalize_path(path)?;
    if path.len() > MAX_PATH_LENGTH {
        return Err(PakError::PathError(format!(
            "Path too long: {} bytes (max {})",
            path.len(),
            MAX_PATH_LENGTH
        )));
    }
    Ok(path)
}

//! Filesystem WORM implementation of `ChainStore`.
//!
//! Layout under the store root:
//!
//! ```text
//! entries/YYYY/MM/DD/<current_hash>.json   the entry, content-addressed
//! sequence/<sequence:020>.json             commit pointer
//! ids/<sha256(id)>                         id claim: the sequence it points at
//! HEAD                                     {last_hash, last_sequence}, a hint
//! ```
//!
//! An append writes the entry file, claims the id, then creates the sequence
//! pointer.  Entry files and pointers are created with no-clobber semantics
//! after an fsync, and the pointer's appearance is the commit: a reader that
//! sees it sees a complete entry, and a second writer racing for the same
//! sequence gets `ConcurrentAppendConflict`.
//!
//! Entry files and pointers are never rewritten and are made read-only once
//! persisted.  Id claims and `HEAD` are derived data: an id claim only counts
//! when the pointer it names exists and carries the same id, and both are
//! rebuilt from the sequence directory on open.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use auditchain_contracts::{
    chain::ChainHead,
    entry::AuditEntry,
    error::{LedgerError, LedgerResult},
};
use auditchain_core::traits::ChainStore;

const ENTRIES_DIR: &str = "entries";
const SEQUENCE_DIR: &str = "sequence";
const IDS_DIR: &str = "ids";
const HEAD_FILE: &str = "HEAD";

/// Contents of `sequence/<n>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SequencePointer {
    sequence: u64,
    id: String,
    current_hash: String,
    /// Entry file, relative to the store root, `/`-separated.
    path: String,
}

pub struct FilesystemWormStore {
    root: PathBuf,
    /// Highest sequence seen committed.  Probed forward on every tip read so
    /// commits by other writers on the same root become visible.
    tip: AtomicU64,
}

impl FilesystemWormStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// Scans the sequence directory, rebuilds missing or stale id claims and
    /// rewrites `HEAD` if it disagrees with the committed tip.
    pub fn open(root: impl AsRef<Path>) -> LedgerResult<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [ENTRIES_DIR, SEQUENCE_DIR, IDS_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|e| storage_err("create directory", &path, e))?;
        }

        let store = Self {
            root,
            tip: AtomicU64::new(0),
        };

        let sequences = store.list_sequences()?;
        let tip = sequences.last().copied().unwrap_or(0);
        store.tip.store(tip, Ordering::SeqCst);

        if sequences.len() as u64 != tip {
            warn!(
                root = %store.root.display(),
                committed = sequences.len(),
                tip,
                "sequence directory has gaps"
            );
        }

        let rebuilt = store.reconcile_ids(&sequences)?;
        let head = store.reconcile_head(tip)?;

        info!(
            root = %store.root.display(),
            last_sequence = head.last_sequence,
            ids_rebuilt = rebuilt,
            "filesystem store opened"
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Paths ────────────────────────────────────────────────────────────────

    fn pointer_path(&self, sequence: u64) -> PathBuf {
        self.root
            .join(SEQUENCE_DIR)
            .join(format!("{sequence:020}.json"))
    }

    fn id_path(&self, id: &str) -> PathBuf {
        let digest = Sha256::digest(id.as_bytes());
        self.root.join(IDS_DIR).join(hex::encode(digest))
    }

    fn head_path(&self) -> PathBuf {
        self.root.join(HEAD_FILE)
    }

    /// `entries/YYYY/MM/DD/<current_hash>.json`, partitioned by `created_at`.
    fn entry_rel_path(entry: &AuditEntry) -> String {
        format!(
            "{}/{}/{}.json",
            ENTRIES_DIR,
            entry.created_at.format("%Y/%m/%d"),
            entry.current_hash
        )
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    fn read_pointer(&self, sequence: u64) -> LedgerResult<Option<SequencePointer>> {
        let path = self.pointer_path(sequence);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err("read sequence pointer", &path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| LedgerError::Storage {
                reason: format!("corrupt sequence pointer '{}': {e}", path.display()),
            })
    }

    fn read_entry(&self, pointer: &SequencePointer) -> LedgerResult<AuditEntry> {
        let path = self.root.join(&pointer.path);
        let bytes = fs::read(&path).map_err(|e| storage_err("read entry", &path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| LedgerError::Storage {
            reason: format!("corrupt entry file '{}': {e}", path.display()),
        })
    }

    /// The committed pointer for `id`, if its claim is backed by a commit.
    fn resolve_id(&self, id: &str) -> LedgerResult<Option<SequencePointer>> {
        let path = self.id_path(id);
        let claim = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err("read id index", &path, e)),
        };
        let Ok(sequence) = claim.trim().parse::<u64>() else {
            warn!(path = %path.display(), "unparseable id claim ignored");
            return Ok(None);
        };
        Ok(self
            .read_pointer(sequence)?
            .filter(|pointer| pointer.id == id))
    }

    /// Committed sequences in ascending order.
    fn list_sequences(&self) -> LedgerResult<Vec<u64>> {
        let dir = self.root.join(SEQUENCE_DIR);
        let mut sequences = Vec::new();
        for item in fs::read_dir(&dir).map_err(|e| storage_err("list", &dir, e))? {
            let item = item.map_err(|e| storage_err("list", &dir, e))?;
            let name = item.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            match stem.parse::<u64>() {
                Ok(seq) => sequences.push(seq),
                Err(_) => debug!(file = %stem, "skipping non-pointer file"),
            }
        }
        sequences.sort_unstable();
        Ok(sequences)
    }

    /// Advance the cached tip past any pointers committed since.
    fn probe_tip(&self) -> LedgerResult<u64> {
        let mut tip = self.tip.load(Ordering::SeqCst);
        loop {
            let next = self.pointer_path(tip + 1);
            match next.try_exists() {
                Ok(true) => tip += 1,
                Ok(false) => break,
                Err(e) => return Err(storage_err("probe", &next, e)),
            }
        }
        self.tip.fetch_max(tip, Ordering::SeqCst);
        Ok(tip)
    }

    // ── Open-time reconciliation ─────────────────────────────────────────────

    fn reconcile_ids(&self, sequences: &[u64]) -> LedgerResult<usize> {
        let mut rebuilt = 0;
        for &sequence in sequences {
            let Some(pointer) = self.read_pointer(sequence)? else {
                continue;
            };
            match self.resolve_id(&pointer.id)? {
                Some(existing) if existing.sequence == sequence => {}
                Some(existing) => {
                    warn!(
                        entry_id = %pointer.id,
                        sequence,
                        other_sequence = existing.sequence,
                        "id committed at more than one sequence"
                    );
                }
                None => {
                    let path = self.id_path(&pointer.id);
                    replace_file(&path, sequence.to_string().as_bytes())
                        .map_err(|e| storage_err("rebuild id index", &path, e))?;
                    rebuilt += 1;
                }
            }
        }
        Ok(rebuilt)
    }

    fn reconcile_head(&self, tip: u64) -> LedgerResult<ChainHead> {
        let head = match self.read_pointer(tip)? {
            Some(pointer) if tip > 0 => ChainHead {
                last_hash: pointer.current_hash,
                last_sequence: tip,
            },
            _ => ChainHead::genesis(),
        };

        let hint: Option<ChainHead> = fs::read(self.head_path())
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());

        if hint.as_ref() != Some(&head) {
            if let Some(stale) = &hint {
                warn!(
                    hint_sequence = stale.last_sequence,
                    committed_sequence = head.last_sequence,
                    "HEAD hint disagrees with sequence directory; rewriting"
                );
            }
            self.write_head(&head)?;
        }
        Ok(head)
    }

    fn write_head(&self, head: &ChainHead) -> LedgerResult<()> {
        let path = self.head_path();
        let bytes = serde_json::to_vec(head).map_err(|e| LedgerError::Storage {
            reason: format!("failed to encode HEAD: {e}"),
        })?;
        replace_file(&path, &bytes).map_err(|e| storage_err("write", &path, e))
    }
}

impl ChainStore for FilesystemWormStore {
    fn append(&self, entry: &AuditEntry) -> LedgerResult<()> {
        let pointer_path = self.pointer_path(entry.sequence);
        if pointer_path.exists() {
            debug!(sequence = entry.sequence, "sequence already committed");
            return Err(LedgerError::ConcurrentAppendConflict { attempts: 1 });
        }
        if self.resolve_id(&entry.id)?.is_some() {
            debug!(entry_id = %entry.id, "id already committed");
            return Err(LedgerError::ConcurrentAppendConflict { attempts: 1 });
        }

        // 1. Entry file.  Content-addressed, so an existing file from an
        //    earlier failed attempt holds the same bytes.
        let rel = Self::entry_rel_path(entry);
        let entry_path = self.root.join(&rel);
        let bytes = serde_json::to_vec_pretty(entry).map_err(|e| LedgerError::DurabilityFailure {
            reason: format!("failed to encode entry '{}': {e}", entry.id),
        })?;
        if let Some(dir) = entry_path.parent() {
            fs::create_dir_all(dir).map_err(|e| durability_err("create directory", dir, e))?;
        }
        match write_once(&entry_path, &bytes) {
            Ok(()) => seal(&entry_path).map_err(|e| durability_err("seal", &entry_path, e))?,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %entry_path.display(), "entry file already present");
            }
            Err(e) => return Err(durability_err("write entry", &entry_path, e)),
        }

        // 2. Id claim, so a retry after an unconfirmed commit can find it.
        let id_path = self.id_path(&entry.id);
        replace_file(&id_path, entry.sequence.to_string().as_bytes())
            .map_err(|e| durability_err("write id index", &id_path, e))?;

        // 3. Commit.
        let pointer = SequencePointer {
            sequence: entry.sequence,
            id: entry.id.clone(),
            current_hash: entry.current_hash.clone(),
            path: rel,
        };
        let pointer_bytes = serde_json::to_vec(&pointer).map_err(|e| LedgerError::DurabilityFailure {
            reason: format!("failed to encode sequence pointer: {e}"),
        })?;
        match write_once(&pointer_path, &pointer_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!(
                    entry_id = %entry.id,
                    sequence = entry.sequence,
                    "lost the race for sequence pointer"
                );
                return Err(LedgerError::ConcurrentAppendConflict { attempts: 1 });
            }
            Err(e) => return Err(durability_err("commit", &pointer_path, e)),
        }
        self.tip.fetch_max(entry.sequence, Ordering::SeqCst);

        // The pointer is visible from here on.  A failure to seal it is
        // still reported so the caller confirms the commit through `find`.
        seal(&pointer_path).map_err(|e| durability_err("seal", &pointer_path, e))?;

        if let Err(e) = self.write_head(&ChainHead::from_entry(entry)) {
            warn!(error = %e, "failed to update HEAD hint");
        }
        Ok(())
    }

    fn get(&self, id: &str) -> LedgerResult<AuditEntry> {
        match self.resolve_id(id)? {
            Some(pointer) => self.read_entry(&pointer),
            None => Err(LedgerError::entry_not_found(id)),
        }
    }

    fn get_by_sequence_range(&self, from: u64, count: u64) -> LedgerResult<Vec<AuditEntry>> {
        let tip = self.probe_tip()?;
        if from == 0 || count == 0 || from > tip {
            return Ok(Vec::new());
        }
        let last = from.saturating_add(count - 1).min(tip);

        let mut entries = Vec::new();
        for sequence in from..=last {
            if let Some(pointer) = self.read_pointer(sequence)? {
                entries.push(self.read_entry(&pointer)?);
            }
        }
        Ok(entries)
    }

    fn last_sequence(&self) -> LedgerResult<u64> {
        self.probe_tip()
    }

    /// Full scan; the filesystem layout keeps no trace index.
    fn get_by_trace_id(&self, trace_id: &str) -> LedgerResult<Vec<AuditEntry>> {
        let tip = self.probe_tip()?;
        let mut entries = Vec::new();
        for sequence in 1..=tip {
            if let Some(pointer) = self.read_pointer(sequence)? {
                let entry = self.read_entry(&pointer)?;
                if entry.trace_id == trace_id {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

// ── File primitives ───────────────────────────────────────────────────────────

/// Write `bytes` to a fresh file at `path`.
///
/// Temp file in the same directory, fsync, then a no-clobber rename.  Fails
/// with `AlreadyExists` if `path` exists; the temp file is removed either way.
fn write_once(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

/// Atomically replace `path` with `bytes`.
fn replace_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir)
}

/// Make a persisted file read-only and flush its directory entry.
fn seal(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms)?;
    match path.parent() {
        Some(dir) => sync_dir(dir),
        None => Ok(()),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn storage_err(what: &str, path: &Path, e: io::Error) -> LedgerError {
    LedgerError::Storage {
        reason: format!("failed to {what} '{}': {e}", path.display()),
    }
}

fn durability_err(what: &str, path: &Path, e: io::Error) -> LedgerError {
    LedgerError::DurabilityFailure {
        reason: format!("failed to {what} '{}': {e}", path.display()),
    }
}

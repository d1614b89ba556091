//! Durable record of probed blocks.
//!
//! The on-disk format is one decimal block index per line, append-only.
//! Duplicate lines are harmless and non-numeric lines are skipped on load.
//!
//! A [`ProgressStore`] is shared by all workers of one keyspace. Appends are
//! serialized by a single mutex. If the backing file cannot be read or
//! written, the store keeps deduplicating in memory and flags itself as
//! degraded instead of failing the scan.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use num_bigint::BigUint;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::keyspace::BlockIndex;

struct ProgressInner {
    done: HashSet<BlockIndex>,
    file: Option<File>,
}

/// Shared, append-only set of probed block indices.
pub struct ProgressStore {
    path: Option<PathBuf>,
    inner: Mutex<ProgressInner>,
    degraded: AtomicBool,
}

impl ProgressStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(ProgressInner {
                done: HashSet::new(),
                file: None,
            }),
            degraded: AtomicBool::new(false),
        }
    }

    /// Open (or create) a file-backed store.
    ///
    /// Never fails: if the file cannot be read or opened for append, the
    /// store starts degraded with whatever it managed to load.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let store = Self {
            path: Some(path.clone()),
            inner: Mutex::new(ProgressInner {
                done: HashSet::new(),
                file: None,
            }),
            degraded: AtomicBool::new(false),
        };

        let done = match load(&path) {
            Ok(done) => done,
            Err(e) => {
                store.degrade(&e, "load");
                HashSet::new()
            }
        };

        let file = if store.is_degraded() {
            None
        } else {
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => Some(file),
                Err(e) => {
                    store.degrade(&e, "open");
                    None
                }
            }
        };

        info!(path = %path.display(), loaded = done.len(), "opened progress store");

        {
            let mut inner = store.inner.lock();
            inner.done = done;
            inner.file = file;
        }
        store
    }

    /// Forget loaded indices outside `[0, total_blocks)`.
    ///
    /// A progress file left over from a different keyspace can hold indices
    /// this keyspace does not have. They are dropped from the in-memory set
    /// (the file is left as is) and the number dropped is returned.
    pub fn retain_within(&self, total_blocks: &BigUint) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.done.len();
        inner.done.retain(|index| index < total_blocks);
        let dropped = before - inner.done.len();
        if dropped > 0 {
            warn!(
                path = ?self.path,
                dropped,
                kept = inner.done.len(),
                %total_blocks,
                "ignoring progress entries outside the keyspace"
            );
        }
        dropped
    }

    /// Backing file path, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshot of every index recorded so far.
    pub fn load(&self) -> HashSet<BlockIndex> {
        self.inner.lock().done.clone()
    }

    pub fn contains(&self, index: &BlockIndex) -> bool {
        self.inner.lock().done.contains(index)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the store has fallen back to memory-only operation.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Record `index` as probed.
    ///
    /// Returns `true` if the index was not already present. Re-marking an
    /// index is a no-op and does not touch the file.
    pub fn mark_done(&self, index: &BlockIndex) -> bool {
        let mut inner = self.inner.lock();
        if !inner.done.insert(index.clone()) {
            return false;
        }

        if let Some(file) = inner.file.as_mut() {
            if let Err(e) = writeln!(file, "{index}").and_then(|_| file.flush()) {
                inner.file = None;
                drop(inner);
                self.degrade(&e, "append");
                return true;
            }
            debug!(%index, "recorded block");
        }
        true
    }

    fn degrade(&self, e: &io::Error, op: &str) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            error!(
                path = ?self.path,
                op,
                %e,
                "progress store unavailable, continuing with in-memory dedup only"
            );
        }
    }
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("path", &self.path)
            .field("len", &self.len())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

/// Read a progress file. A missing file yields an empty set.
pub fn load(path: &Path) -> io::Result<HashSet<BlockIndex>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(e),
    };

    let mut done = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if let Some(index) = BigUint::parse_bytes(trimmed.as_bytes(), 10) {
            done.insert(index);
        }
    }
    Ok(done)
}

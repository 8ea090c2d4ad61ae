//! Per-target dirty/deleted file tracking (spec §4.1).
//!
//! A `FilesDelta` is the authoritative record of "what must be recompiled"
//! for one build target: a map from build root to the set of dirty files
//! under that root, plus a flat set of deleted paths. It owns a single
//! non-reentrant lock; every mutation and every iteration goes through it.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};

use crate::collab::RootRef;
use crate::error::FssResult;
use crate::paths::PathCasing;
use crate::wire;

/// The guarded contents of a [`FilesDelta`]. Exposed through
/// [`FilesDelta::lock`] so a caller can iterate under the lock for the
/// duration required by `sources-to-recompile` and
/// `process-files-to-recompile` (spec §4.1, §4.4).
#[derive(Default)]
pub struct FilesDeltaInner {
    recompile: HashMap<RootRef, HashMap<String, Utf8PathBuf>>,
    deleted: HashMap<String, String>,
}

impl FilesDeltaInner {
    pub fn sources_to_recompile(&self) -> impl Iterator<Item = (&RootRef, impl Iterator<Item = &Utf8PathBuf>)> {
        self.recompile.iter().map(|(root, files)| (root, files.values()))
    }

    pub fn has_changes(&self) -> bool {
        !self.deleted.is_empty() || self.recompile.values().any(|files| !files.is_empty())
    }

    pub fn is_marked_recompile(&self, root: &RootRef, file: &Utf8Path, casing: PathCasing) -> bool {
        self.recompile
            .get(root)
            .map(|files| files.contains_key(&casing.normalize(file)))
            .unwrap_or(false)
    }

    fn is_deleted(&self, file: &Utf8Path, casing: PathCasing) -> bool {
        self.deleted.contains_key(&casing.normalize(file))
    }
}

/// Per-target record of dirty files (grouped by root) and deleted paths.
/// One instance per target, created lazily by [`crate::FsState`] on first
/// reference.
pub struct FilesDelta {
    casing: PathCasing,
    inner: Mutex<FilesDeltaInner>,
}

impl FilesDelta {
    pub fn new(casing: PathCasing) -> Self {
        Self {
            casing,
            inner: Mutex::new(FilesDeltaInner::default()),
        }
    }

    /// Merge several deltas into a fresh one: the union of recompile
    /// entries and deleted paths. The result shares no mutable state with
    /// its inputs — see the "Merged round delta" design note.
    pub fn merged<'a>(casing: PathCasing, deltas: impl IntoIterator<Item = &'a FilesDelta>) -> Self {
        let mut recompile: HashMap<RootRef, HashMap<String, Utf8PathBuf>> = HashMap::new();
        let mut deleted: HashMap<String, String> = HashMap::new();
        for delta in deltas {
            let guard = delta.lock();
            for (root, files) in guard.recompile.iter() {
                let entry = recompile.entry(root.clone()).or_default();
                for (key, path) in files {
                    entry.insert(key.clone(), path.clone());
                }
            }
            for (key, path) in guard.deleted.iter() {
                deleted.insert(key.clone(), path.clone());
            }
        }
        Self {
            casing,
            inner: Mutex::new(FilesDeltaInner { recompile, deleted }),
        }
    }

    /// Acquire the delta's lock. Every iteration over its contents must
    /// happen while the returned guard is alive; dropping it releases the
    /// lock (this crate's RAII stand-in for the source's explicit
    /// `lock()`/`unlock()` pair).
    pub fn lock(&self) -> MutexGuard<'_, FilesDeltaInner> {
        self.inner.lock().unwrap()
    }

    pub fn casing(&self) -> PathCasing {
        self.casing
    }

    /// Insert `file` into the set at `root`. Returns `true` iff this call
    /// added a new entry.
    pub fn mark_recompile(&self, root: &RootRef, file: &Utf8Path) -> bool {
        let mut guard = self.lock();
        mark_recompile_locked(&mut guard, self.casing, root, file)
    }

    /// Like [`Self::mark_recompile`], but a no-op returning `false` if
    /// `file` is currently in the deleted set (a deletion subsumes any
    /// pending dirty mark until cleared).
    pub fn mark_recompile_if_not_deleted(&self, root: &RootRef, file: &Utf8Path) -> bool {
        let mut guard = self.lock();
        if guard.is_deleted(file, self.casing) {
            return false;
        }
        mark_recompile_locked(&mut guard, self.casing, root, file)
    }

    /// Insert `file`'s path into the deleted set and remove it from every
    /// per-root recompile set of this delta: deletion supersedes
    /// dirtiness.
    pub fn add_deleted(&self, file: &Utf8Path) {
        let mut guard = self.lock();
        let key = self.casing.normalize(file);
        guard.deleted.insert(key.clone(), file.as_str().to_string());
        for files in guard.recompile.values_mut() {
            files.remove(&key);
        }
    }

    /// Atomically remove and return the files recorded for `root`.
    pub fn clear_recompile(&self, root: &RootRef) -> Option<Vec<Utf8PathBuf>> {
        clear_recompile_locked(&mut self.lock(), root)
    }

    pub fn clear_deleted_paths(&self) {
        self.lock().deleted.clear();
    }

    /// Atomic snapshot-and-clear of the deleted-path set.
    pub fn get_and_clear_deleted_paths(&self) -> Vec<String> {
        let mut guard = self.lock();
        guard.deleted.drain().map(|(_, original)| original).collect()
    }

    pub fn is_marked_recompile(&self, root: &RootRef, file: &Utf8Path) -> bool {
        self.lock().is_marked_recompile(root, file, self.casing)
    }

    pub fn has_changes(&self) -> bool {
        self.lock().has_changes()
    }

    /// Serialize this delta per the wire format in spec §6:
    /// `u32 numRoots { u32 rootId; u32 numFiles; utf8[] }* u32 numDeleted utf8[]*`.
    pub fn save<W: Write>(&self, w: &mut W) -> FssResult<()> {
        let guard = self.lock();
        wire::write_u32(w, guard.recompile.len() as u32)?;
        for (root, files) in guard.recompile.iter() {
            wire::write_u32(w, root.root_id())?;
            wire::write_u32(w, files.len() as u32)?;
            for path in files.values() {
                wire::write_str(w, path.as_str())?;
            }
        }
        wire::write_u32(w, guard.deleted.len() as u32)?;
        for path in guard.deleted.values() {
            wire::write_str(w, path)?;
        }
        Ok(())
    }

    /// Load a delta previously written by [`Self::save`]. `resolve_root`
    /// maps a persisted `rootId` back to a live root descriptor via the
    /// root index; a root that no longer resolves drops its files (the
    /// root itself, and therefore its whole directory, no longer exists
    /// in the current project).
    pub fn load<R: Read>(
        r: &mut R,
        casing: PathCasing,
        mut resolve_root: impl FnMut(u32) -> Option<RootRef>,
    ) -> FssResult<Self> {
        let delta = Self::new(casing);
        {
            let mut guard = delta.lock();
            let num_roots = wire::read_u32(r)?;
            for _ in 0..num_roots {
                let root_id = wire::read_u32(r)?;
                let num_files = wire::read_u32(r)?;
                let root = resolve_root(root_id);
                for _ in 0..num_files {
                    let path = wire::read_str(r)?;
                    if let Some(root) = &root {
                        let key = casing.normalize_str(&path);
                        guard
                            .recompile
                            .entry(root.clone())
                            .or_default()
                            .insert(key, Utf8PathBuf::from(path));
                    }
                }
            }
            let num_deleted = wire::read_u32(r)?;
            for _ in 0..num_deleted {
                let path = wire::read_str(r)?;
                let key = casing.normalize_str(&path);
                guard.deleted.insert(key, path);
            }
        }
        Ok(delta)
    }

    /// Consume a record written by [`Self::save`] without materializing
    /// it, for the "unknown target on load" path (spec §4.5, §7(b)).
    pub fn skip<R: Read>(r: &mut R) -> FssResult<()> {
        let num_roots = wire::read_u32(r)?;
        for _ in 0..num_roots {
            let _root_id = wire::read_u32(r)?;
            let num_files = wire::read_u32(r)?;
            for _ in 0..num_files {
                wire::skip_str(r)?;
            }
        }
        let num_deleted = wire::read_u32(r)?;
        for _ in 0..num_deleted {
            wire::skip_str(r)?;
        }
        Ok(())
    }
}

/// Mutate an already-locked delta in place. Exposed so `FsState` can hold
/// a single lock across a multi-step operation (`mark-all-up-to-date`,
/// `has-unprocessed-changes`) instead of re-acquiring the mutex per file.
pub(crate) fn mark_recompile_locked(
    guard: &mut FilesDeltaInner,
    casing: PathCasing,
    root: &RootRef,
    file: &Utf8Path,
) -> bool {
    let key = casing.normalize(file);
    let files = guard.recompile.entry(root.clone()).or_default();
    files.insert(key, file.to_owned()).is_none()
}

/// Companion to [`mark_recompile_locked`] for `clear-recompile` under an
/// already-held lock.
pub(crate) fn clear_recompile_locked(
    guard: &mut FilesDeltaInner,
    root: &RootRef,
) -> Option<Vec<Utf8PathBuf>> {
    guard
        .recompile
        .remove(root)
        .map(|files| files.into_values().collect())
}

impl std::fmt::Debug for FilesDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.lock();
        f.debug_struct("FilesDelta")
            .field("roots", &guard.recompile.len())
            .field("deleted", &guard.deleted.len())
            .finish()
    }
}

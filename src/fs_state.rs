//! The top-level façade (spec §4.4): owns the target→delta map, the
//! `initialScanPerformed` set, and the process-wide [`EventStamps`].
//! Every other public operation in this crate is reached through an
//! `FsState`.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use camino::Utf8Path;

use crate::collab::{FsProbe, RootIndex, RootRef, StampsStorage};
use crate::context::{CompileContext, Round};
use crate::error::FssResult;
use crate::event_stamps::EventStamps;
use crate::files_delta::{clear_recompile_locked, mark_recompile_locked, FilesDelta};
use crate::model::{BuildTarget, TargetTypeRegistry};
use crate::paths::PathCasing;
use crate::wire;

/// Construction-time knobs for an [`FsState`].
#[derive(Debug, Clone, Copy)]
pub struct FsStateOptions {
    /// When true, `is_initial_scan_performed` always reports `false`: the
    /// system never trusts event-based tracking and always re-scans
    /// (spec §3 invariant).
    pub always_scan_fs: bool,
    pub casing: PathCasing,
}

impl Default for FsStateOptions {
    fn default() -> Self {
        Self {
            always_scan_fs: false,
            casing: PathCasing::native_default(),
        }
    }
}

pub struct FsState {
    options: FsStateOptions,
    deltas: Mutex<HashMap<BuildTarget, Arc<FilesDelta>>>,
    initial_scan_performed: Mutex<HashSet<BuildTarget>>,
    event_stamps: EventStamps,
    fs_probe: Arc<dyn FsProbe>,
    root_index: Arc<dyn RootIndex>,
}

impl FsState {
    pub fn new(options: FsStateOptions, fs_probe: Arc<dyn FsProbe>, root_index: Arc<dyn RootIndex>) -> Self {
        Self {
            event_stamps: EventStamps::new(options.casing),
            options,
            deltas: Mutex::new(HashMap::new()),
            initial_scan_performed: Mutex::new(HashSet::new()),
            fs_probe,
            root_index,
        }
    }

    pub fn event_stamps(&self) -> &EventStamps {
        &self.event_stamps
    }

    fn get_delta(&self, target: &BuildTarget) -> Option<Arc<FilesDelta>> {
        self.deltas.lock().unwrap().get(target).cloned()
    }

    fn get_or_create_delta(&self, target: &BuildTarget) -> Arc<FilesDelta> {
        let mut deltas = self.deltas.lock().unwrap();
        deltas
            .entry(target.clone())
            .or_insert_with(|| Arc::new(FilesDelta::new(self.options.casing)))
            .clone()
    }

    // ---- Discovery & state -------------------------------------------------

    pub fn mark_initial_scan_performed(&self, target: &BuildTarget) {
        // A scan having completed is itself a "reference" to the target,
        // so the delta exists even if nothing was ever marked dirty —
        // this keeps `save` simple (every scanned target has a delta).
        self.get_or_create_delta(target);
        self.initial_scan_performed.lock().unwrap().insert(target.clone());
    }

    pub fn is_initial_scan_performed(&self, target: &BuildTarget) -> bool {
        !self.options.always_scan_fs && self.initial_scan_performed.lock().unwrap().contains(target)
    }

    pub fn has_work_to_do(&self, target: &BuildTarget) -> bool {
        if !self.initial_scan_performed.lock().unwrap().contains(target) {
            return true;
        }
        self.get_delta(target).map(|d| d.has_changes()).unwrap_or(false)
    }

    /// Empties `initialScanPerformed`, the `deltas` map, and `eventStamps`.
    /// Does not touch any live `CompileContext`: the source clears round
    /// overlay and chunk targets "on a null context" here, meaning this is
    /// a process-wide reset with no build in progress, not an operation on
    /// a caller-supplied context.
    pub fn clear_all(&self) {
        self.deltas.lock().unwrap().clear();
        self.initial_scan_performed.lock().unwrap().clear();
        self.event_stamps.clear();
    }

    // ---- Marking dirty -------------------------------------------------

    pub fn mark_dirty(
        &self,
        context: Option<&CompileContext>,
        round: Round,
        file: &Utf8Path,
        root: &RootRef,
        stamp_store: Option<&dyn StampsStorage>,
        save_event_stamp: bool,
    ) -> FssResult<bool> {
        let target = root.target().clone();
        if let Some(ctx) = context {
            if let Some(overlay) = ctx.round_delta(round) {
                if ctx.contains_chunk_target(&target) {
                    // The overlay's own "was this new?" signal is
                    // intentionally discarded: the per-target delta below
                    // is the authoritative one (see the "Unresolved
                    // behavior" design note).
                    let _ = overlay.mark_recompile(root, file);
                }
            }
        }

        let delta = self.get_or_create_delta(&target);
        let marked = delta.mark_recompile(root, file);
        if marked {
            if save_event_stamp {
                self.event_stamps.put(file, now_millis());
            }
            if let Some(store) = stamp_store {
                store.remove_stamp(file, &target)?;
            }
        }
        Ok(marked)
    }

    pub fn mark_dirty_if_not_deleted(
        &self,
        context: Option<&CompileContext>,
        round: Round,
        file: &Utf8Path,
        root: &RootRef,
        stamp_store: Option<&dyn StampsStorage>,
    ) -> FssResult<bool> {
        let target = root.target().clone();
        let delta = self.get_or_create_delta(&target);
        let marked = delta.mark_recompile_if_not_deleted(root, file);
        if marked {
            if let Some(ctx) = context {
                if let Some(overlay) = ctx.round_delta(round) {
                    if ctx.contains_chunk_target(&target) {
                        let _ = overlay.mark_recompile_if_not_deleted(root, file);
                    }
                }
            }
            if let Some(store) = stamp_store {
                store.remove_stamp(file, &target)?;
            }
        }
        Ok(marked)
    }

    // ---- Deletions -------------------------------------------------

    /// Adds `file` to both round-overlay deltas (if present) and to the
    /// per-target delta. Unlike `mark_dirty`, the chunk-targets gate does
    /// not apply: a deletion is always visible, even to targets outside
    /// the chunk currently building.
    pub fn register_deleted(
        &self,
        context: Option<&CompileContext>,
        target: &BuildTarget,
        file: &Utf8Path,
        stamp_store: Option<&dyn StampsStorage>,
    ) -> FssResult<()> {
        if let Some(ctx) = context {
            if let Some(current) = ctx.current_round_delta() {
                current.add_deleted(file);
            }
            if let Some(next) = ctx.next_round_delta() {
                next.add_deleted(file);
            }
        }
        let delta = self.get_or_create_delta(target);
        delta.add_deleted(file);
        if let Some(store) = stamp_store {
            store.remove_stamp(file, target)?;
        }
        Ok(())
    }

    pub fn clear_deleted_paths(&self, target: &BuildTarget) {
        if let Some(delta) = self.get_delta(target) {
            delta.clear_deleted_paths();
        }
    }

    pub fn get_and_clear_deleted_paths(&self, target: &BuildTarget) -> Vec<String> {
        self.get_delta(target)
            .map(|d| d.get_and_clear_deleted_paths())
            .unwrap_or_default()
    }

    // ---- Round overlay lifecycle -------------------------------------------------

    pub fn before_chunk_build_start(&self, context: &CompileContext, chunk_targets: Vec<BuildTarget>) {
        context.before_chunk_build_start(chunk_targets);
    }

    pub fn clear_context_chunk(&self, context: &CompileContext) {
        context.clear_context_chunk();
    }

    /// Advances the round overlay for `context`. `module_targets` is the
    /// subset of the chunk's targets that participate in round-overlay
    /// tracking; their per-target deltas are merged to seed the overlay
    /// on the first round of the chunk.
    pub fn before_next_round_start(&self, context: &CompileContext, module_targets: &[BuildTarget]) {
        let casing = self.options.casing;
        let seed_deltas: Vec<Arc<FilesDelta>> = {
            let deltas = self.deltas.lock().unwrap();
            module_targets.iter().filter_map(|t| deltas.get(t).cloned()).collect()
        };
        context.before_next_round_start(
            move || Arc::new(FilesDelta::merged(casing, seed_deltas.iter().map(|d| d.as_ref()))),
            casing,
        );
    }

    pub fn clear_context_round_data(&self, context: &CompileContext) {
        context.clear_context_round_data();
    }

    /// The delta `process_files_to_recompile` and the round-aware
    /// `is_marked_for_recompilation` should read from: the context's
    /// current-round overlay if `target` is part of the chunk currently
    /// building and a round is active, otherwise the per-target delta.
    pub fn effective_files_delta(&self, context: &CompileContext, target: &BuildTarget) -> Option<Arc<FilesDelta>> {
        if ctx_has_active_round_for(context, target) {
            if let Some(overlay) = context.current_round_delta() {
                return Some(overlay);
            }
        }
        self.get_delta(target)
    }

    /// Prefers the requested round's overlay if present, else falls back
    /// to the per-target delta.
    pub fn is_marked_for_recompilation(
        &self,
        context: &CompileContext,
        round: Round,
        root: &RootRef,
        file: &Utf8Path,
    ) -> bool {
        if let Some(overlay) = context.round_delta(round) {
            return overlay.is_marked_recompile(root, file);
        }
        self.get_delta(root.target())
            .map(|d| d.is_marked_recompile(root, file))
            .unwrap_or(false)
    }

    // ---- Iteration -------------------------------------------------

    /// Visits every `(target, file, root)` pair in scope for `target`,
    /// stopping early if `visitor` returns `false`. Returns `false` iff
    /// the visitor asked to stop.
    pub fn process_files_to_recompile(
        &self,
        context: &CompileContext,
        target: &BuildTarget,
        mut visitor: impl FnMut(&BuildTarget, &Utf8Path, &RootRef) -> bool,
    ) -> bool {
        let delta = match self.effective_files_delta(context, target) {
            Some(d) => d,
            None => return true,
        };
        let guard = delta.lock();
        for (root, files) in guard.sources_to_recompile() {
            if root.target() != target {
                continue;
            }
            for file in files {
                if !context.scope().is_affected(target, file) {
                    continue;
                }
                if !visitor(target, file, root) {
                    return false;
                }
            }
        }
        true
    }

    // ---- Reconciling after a build -------------------------------------------------

    pub fn mark_all_up_to_date(
        &self,
        context: &CompileContext,
        root: &RootRef,
        stamp_store: &dyn StampsStorage,
    ) -> FssResult<bool> {
        let target = root.target().clone();
        let delta = self.get_or_create_delta(&target);
        let build_start = context.compilation_start_stamp(&target);

        let mut guard = delta.lock();
        let files = match clear_recompile_locked(&mut guard, root) {
            Some(files) => files,
            None => return Ok(false),
        };

        let mut marked = false;
        for file in files {
            if !context.scope().is_affected(&target, &file) {
                mark_recompile_locked(&mut guard, self.options.casing, root, &file);
                continue;
            }

            let current_ts = self.fs_probe.last_modified(&file)?;
            let stamp = stamp_store.current_stamp(&file)?;
            let changed_after_start =
                !root.is_generated() && (current_ts > build_start || self.event_stamps.get(&file) > build_start);

            if changed_after_start {
                mark_recompile_locked(&mut guard, self.options.casing, root, &file);
            } else {
                stamp_store.save_stamp(&file, &target, stamp)?;
                marked = true;
            }
        }
        Ok(marked)
    }

    // ---- Detecting unprocessed changes mid-build -------------------------------------------------

    pub fn has_unprocessed_changes(&self, context: &CompileContext, target: &BuildTarget) -> FssResult<bool> {
        if !self.initial_scan_performed.lock().unwrap().contains(target) {
            return Ok(false);
        }
        let build_start = context.compilation_start_stamp(target);
        if build_start <= 0 {
            return Ok(false);
        }

        let delta = match self.get_delta(target) {
            Some(d) => d,
            None => return Ok(false),
        };
        let now = now_millis();
        let guard = delta.lock();
        for (root, files) in guard.sources_to_recompile() {
            if root.target() != target {
                continue;
            }
            for file in files {
                let event_ts = self.event_stamps.get(file);
                let mtime = self.fs_probe.last_modified(file)?;
                let suspect = event_ts > build_start || (build_start < mtime && mtime < now);
                if !suspect {
                    continue;
                }
                if !context.scope().is_affected(target, file) {
                    continue;
                }
                let parents = self.root_index.find_all_parent_descriptors(file, context);
                if parents.iter().any(|r| r.is_generated()) {
                    continue;
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ---- Persistence -------------------------------------------------

    /// Writes every scanned target, grouped by type (spec §4.5). Callers
    /// own the format-version byte around this payload: the delta format
    /// itself is unversioned (spec §4.5 closing note).
    pub fn save<W: Write>(&self, w: &mut W) -> FssResult<()> {
        // Lock order matches `mark_initial_scan_performed`: deltas before
        // initial_scan_performed.
        let deltas = self.deltas.lock().unwrap();
        let scanned = self.initial_scan_performed.lock().unwrap();

        let mut by_type: HashMap<&str, Vec<&BuildTarget>> = HashMap::new();
        for target in scanned.iter() {
            by_type.entry(target.type_id()).or_default().push(target);
        }

        wire::write_u32(w, by_type.len() as u32)?;
        for (type_id, targets) in by_type {
            wire::write_str(w, type_id)?;
            wire::write_u32(w, targets.len() as u32)?;
            for target in targets {
                wire::write_str(w, target.id())?;
                match deltas.get(target) {
                    Some(delta) => delta.save(w)?,
                    None => FilesDelta::new(self.options.casing).save(w)?,
                }
            }
        }
        Ok(())
    }

    /// Loads a snapshot written by [`Self::save`]. An unresolvable
    /// `typeId` (no such registered type) or `targetId` (loader returns
    /// `None`) is logged at info level and its record is skipped without
    /// aborting the load (spec §7(b)).
    pub fn load<R: Read>(
        &self,
        r: &mut R,
        registry: &dyn TargetTypeRegistry,
        mut resolve_root: impl FnMut(&BuildTarget, u32) -> Option<RootRef>,
    ) -> FssResult<()> {
        let num_types = wire::read_u32(r)?;
        for _ in 0..num_types {
            let type_id = wire::read_str(r)?;
            let num_targets = wire::read_u32(r)?;
            let loader = registry.get_type(&type_id).map(|ty| ty.create_loader());

            for _ in 0..num_targets {
                let target_id = wire::read_str(r)?;
                let target = loader.as_ref().and_then(|l| l.create_target(&target_id));
                match target {
                    Some(target) => {
                        let casing = self.options.casing;
                        let target_for_resolve = target.clone();
                        let delta = FilesDelta::load(r, casing, |root_id| resolve_root(&target_for_resolve, root_id))?;
                        self.deltas.lock().unwrap().insert(target.clone(), Arc::new(delta));
                        self.initial_scan_performed.lock().unwrap().insert(target);
                    }
                    None => {
                        tracing::info!(
                            type_id = %type_id,
                            target_id = %target_id,
                            "skipping unresolved target while loading fss snapshot"
                        );
                        FilesDelta::skip(r)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn ctx_has_active_round_for(context: &CompileContext, target: &BuildTarget) -> bool {
    context.contains_chunk_target(target)
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::test_support::{fake_root, FakeFsProbe, FakeRootIndex, FakeScope, FakeStampsStorage};
    use crate::model::test_support::FakeRegistry;
    use camino::Utf8PathBuf;

    fn target() -> BuildTarget {
        BuildTarget::new("prod", "m1")
    }

    fn state() -> FsState {
        FsState::new(
            FsStateOptions::default(),
            Arc::new(FakeFsProbe::new()),
            Arc::new(FakeRootIndex::new()),
        )
    }

    #[test]
    fn basic_mark_and_iterate() {
        let fss = state();
        let t = target();
        let root = fake_root(t.clone(), 1, false);
        let f = Utf8PathBuf::from("/a/x.txt");

        fss.mark_initial_scan_performed(&t);
        fss.mark_dirty(None, Round::Next, &f, &root, None, false).unwrap();
        assert!(fss.has_work_to_do(&t));

        let ctx = CompileContext::new(Arc::new(FakeScope::new()));
        let mut seen = Vec::new();
        let ok = fss.process_files_to_recompile(&ctx, &t, |_, file, _| {
            seen.push(file.to_owned());
            true
        });
        assert!(ok);
        assert_eq!(seen, vec![f]);
    }

    #[test]
    fn delete_subsumes_dirty_through_facade() {
        let fss = state();
        let t = target();
        let root = fake_root(t.clone(), 1, false);
        let f = Utf8PathBuf::from("/a/x.txt");
        fss.mark_dirty(None, Round::Next, &f, &root, None, false).unwrap();

        fss.register_deleted(None, &t, &f, None).unwrap();
        assert_eq!(fss.get_and_clear_deleted_paths(&t), vec![f.to_string()]);
        assert_eq!(fss.get_and_clear_deleted_paths(&t), Vec::<String>::new());
    }

    #[test]
    fn has_unprocessed_changes_detects_delivered_event_stamp() {
        let fss = state();
        let t = target();
        let root = fake_root(t.clone(), 1, false);
        let f = Utf8PathBuf::from("/b/y.txt");

        fss.mark_initial_scan_performed(&t);
        let ctx = CompileContext::new(Arc::new(FakeScope::new()));
        ctx.set_compilation_start_stamp(t.clone(), 1000);

        fss.mark_dirty(None, Round::Next, &f, &root, None, true).unwrap();
        assert!(fss.has_unprocessed_changes(&ctx, &t).unwrap());
    }

    #[test]
    fn mark_all_up_to_date_remarks_concurrently_changed_file() {
        let probe = Arc::new(FakeFsProbe::new());
        probe.set("/c/z.txt", 1200);
        let fss = FsState::new(FsStateOptions::default(), probe, Arc::new(FakeRootIndex::new()));
        let t = target();
        let root = fake_root(t.clone(), 1, false);
        let f = Utf8PathBuf::from("/c/z.txt");
        fss.mark_dirty(None, Round::Next, &f, &root, None, false).unwrap();

        let ctx = CompileContext::new(Arc::new(FakeScope::new()));
        ctx.set_compilation_start_stamp(t.clone(), 1000);
        let store = FakeStampsStorage::new();

        let marked = fss.mark_all_up_to_date(&ctx, &root, &store).unwrap();
        assert!(!marked);
        assert!(store.saved.lock().unwrap().is_empty());
        assert!(fss.get_delta(&t).unwrap().is_marked_recompile(&root, &f));
    }

    #[test]
    fn round_overlay_lifecycle() {
        let fss = state();
        let t = target();
        let root = fake_root(t.clone(), 1, false);
        let existing = Utf8PathBuf::from("/d/w.txt");
        fss.mark_dirty(None, Round::Next, &existing, &root, None, false).unwrap();

        let ctx = CompileContext::new(Arc::new(FakeScope::new()));
        fss.before_chunk_build_start(&ctx, vec![t.clone()]);
        fss.before_next_round_start(&ctx, &[t.clone()]);

        let overlay = fss.effective_files_delta(&ctx, &t).unwrap();
        assert!(overlay.is_marked_recompile(&root, &existing));

        let new_file = Utf8PathBuf::from("/d/v.txt");
        fss.mark_dirty(Some(&ctx), Round::Next, &new_file, &root, None, false)
            .unwrap();

        assert!(fss.get_delta(&t).unwrap().is_marked_recompile(&root, &new_file));
        let current = ctx.current_round_delta().unwrap();
        assert!(!current.is_marked_recompile(&root, &new_file));
        let next = ctx.next_round_delta().unwrap();
        assert!(next.is_marked_recompile(&root, &new_file));

        fss.before_next_round_start(&ctx, &[t.clone()]);
        let new_current = ctx.current_round_delta().unwrap();
        assert!(new_current.is_marked_recompile(&root, &new_file));
    }

    #[test]
    fn load_of_unknown_target_is_lossless_for_known_targets() {
        let registry = FakeRegistry::new();
        registry.register("prod", &["a"]);

        let source = state();
        let known = BuildTarget::new("prod", "a");
        let removed = BuildTarget::new("removed-type", "b");
        let root_known = fake_root(known.clone(), 1, false);

        source.mark_initial_scan_performed(&known);
        source
            .mark_dirty(None, Round::Next, &Utf8PathBuf::from("/a/x.txt"), &root_known, None, false)
            .unwrap();
        source.mark_initial_scan_performed(&removed);

        let mut buf = Vec::new();
        source.save(&mut buf).unwrap();

        let dest = state();
        let mut cursor = std::io::Cursor::new(buf);
        dest.load(&mut cursor, &registry, |_, root_id| (root_id == 1).then(|| root_known.clone()))
            .unwrap();

        assert!(dest.is_initial_scan_performed(&known));
        assert!(!dest.is_initial_scan_performed(&removed));
        assert!(dest
            .get_delta(&known)
            .unwrap()
            .is_marked_recompile(&root_known, Utf8Path::new("/a/x.txt")));
    }

    #[test]
    fn always_scan_fs_forces_is_initial_scan_performed_false() {
        let fss = FsState::new(
            FsStateOptions {
                always_scan_fs: true,
                casing: PathCasing::Sensitive,
            },
            Arc::new(FakeFsProbe::new()),
            Arc::new(FakeRootIndex::new()),
        );
        let t = target();
        fss.mark_initial_scan_performed(&t);
        assert!(!fss.is_initial_scan_performed(&t));
    }

    #[test]
    fn clear_all_resets_everything() {
        let fss = state();
        let t = target();
        let root = fake_root(t.clone(), 1, false);
        fss.mark_initial_scan_performed(&t);
        fss.mark_dirty(None, Round::Next, &Utf8PathBuf::from("/a/x.txt"), &root, None, true)
            .unwrap();
        fss.clear_all();
        assert!(fss.has_work_to_do(&t));
        assert_eq!(fss.event_stamps().get(Utf8Path::new("/a/x.txt")), 0);
    }
}

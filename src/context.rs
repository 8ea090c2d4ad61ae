//! The per-build-invocation context FSS annotates with round-overlay
//! state (spec §4.3, §9 "Typed keys on context"). The source attaches
//! this data to an externally-owned `CompileContext` via process-wide
//! typed keys; here the context simply owns the slots directly, since
//! there is exactly one FSS per process and no need for a key registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::collab::CompileScope;
use crate::files_delta::FilesDelta;
use crate::model::BuildTarget;

/// Which round-overlay slot an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Round {
    Current,
    Next,
}

#[derive(Default)]
struct RoundDeltaPair {
    current: Option<Arc<FilesDelta>>,
    next: Option<Arc<FilesDelta>>,
}

/// State scoped to one build invocation: the round overlay, the set of
/// targets in the chunk currently being built, and per-target
/// compilation-start timestamps. Created once per build and handed to
/// every `FsState` call that participates in that build; `None`/absent
/// slots mean "no build in progress" or "no chunk/round active".
pub struct CompileContext {
    scope: Arc<dyn CompileScope>,
    round: Mutex<RoundDeltaPair>,
    chunk_targets: Mutex<Option<Vec<BuildTarget>>>,
    compilation_start: Mutex<HashMap<BuildTarget, i64>>,
}

impl CompileContext {
    pub fn new(scope: Arc<dyn CompileScope>) -> Self {
        Self {
            scope,
            round: Mutex::new(RoundDeltaPair::default()),
            chunk_targets: Mutex::new(None),
            compilation_start: Mutex::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> &Arc<dyn CompileScope> {
        &self.scope
    }

    /// `≤0` means no build of `target` is in progress in this context.
    pub fn compilation_start_stamp(&self, target: &BuildTarget) -> i64 {
        self.compilation_start
            .lock()
            .unwrap()
            .get(target)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_compilation_start_stamp(&self, target: BuildTarget, stamp: i64) {
        self.compilation_start.lock().unwrap().insert(target, stamp);
    }

    /// Records the targets of the chunk about to be built (spec
    /// `before-chunk-build-start`).
    pub fn before_chunk_build_start(&self, targets: Vec<BuildTarget>) {
        *self.chunk_targets.lock().unwrap() = Some(targets);
    }

    /// Clears the chunk-targets slot (spec `clear-context-chunk`).
    pub fn clear_context_chunk(&self) {
        *self.chunk_targets.lock().unwrap() = None;
    }

    pub(crate) fn contains_chunk_target(&self, target: &BuildTarget) -> bool {
        self.chunk_targets
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|targets| targets.contains(target))
    }

    /// Advance the round overlay: if there is no pending "next" delta yet
    /// this is the initial round of the chunk, so `seed` (the merge of
    /// every module target's per-target delta) becomes current; otherwise
    /// the previous "next" becomes the new "current". Either way a fresh
    /// empty delta becomes the new "next" (spec `before-next-round-start`).
    pub(crate) fn before_next_round_start(&self, seed: impl FnOnce() -> Arc<FilesDelta>, casing: crate::paths::PathCasing) {
        let mut round = self.round.lock().unwrap();
        round.current = match round.next.take() {
            Some(next) => Some(next),
            None => Some(seed()),
        };
        round.next = Some(Arc::new(FilesDelta::new(casing)));
    }

    /// Clears both round-overlay slots (spec `clear-context-round-data`).
    pub fn clear_context_round_data(&self) {
        let mut round = self.round.lock().unwrap();
        round.current = None;
        round.next = None;
    }

    pub(crate) fn current_round_delta(&self) -> Option<Arc<FilesDelta>> {
        self.round.lock().unwrap().current.clone()
    }

    pub(crate) fn next_round_delta(&self) -> Option<Arc<FilesDelta>> {
        self.round.lock().unwrap().next.clone()
    }

    pub(crate) fn round_delta(&self, round: Round) -> Option<Arc<FilesDelta>> {
        match round {
            Round::Current => self.current_round_delta(),
            Round::Next => self.next_round_delta(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::test_support::FakeScope;
    use crate::paths::PathCasing;

    #[test]
    fn round_transitions_shift_next_into_current() {
        let ctx = CompileContext::new(Arc::new(FakeScope::new()));
        assert!(ctx.current_round_delta().is_none());

        ctx.before_next_round_start(
            || Arc::new(FilesDelta::new(PathCasing::Sensitive)),
            PathCasing::Sensitive,
        );
        let first_current = ctx.current_round_delta().unwrap();
        let first_next = ctx.next_round_delta().unwrap();

        ctx.before_next_round_start(
            || Arc::new(FilesDelta::new(PathCasing::Sensitive)),
            PathCasing::Sensitive,
        );
        let second_current = ctx.current_round_delta().unwrap();
        assert!(Arc::ptr_eq(&first_next, &second_current));
        assert!(!Arc::ptr_eq(&first_current, &second_current));
    }

    #[test]
    fn clear_round_data_empties_both_slots() {
        let ctx = CompileContext::new(Arc::new(FakeScope::new()));
        ctx.before_next_round_start(
            || Arc::new(FilesDelta::new(PathCasing::Sensitive)),
            PathCasing::Sensitive,
        );
        ctx.clear_context_round_data();
        assert!(ctx.current_round_delta().is_none());
        assert!(ctx.next_round_delta().is_none());
    }

    #[test]
    fn chunk_targets_membership() {
        let ctx = CompileContext::new(Arc::new(FakeScope::new()));
        let t = crate::model::BuildTarget::new("prod", "m1");
        assert!(!ctx.contains_chunk_target(&t));
        ctx.before_chunk_build_start(vec![t.clone()]);
        assert!(ctx.contains_chunk_target(&t));
        ctx.clear_context_chunk();
        assert!(!ctx.contains_chunk_target(&t));
    }
}

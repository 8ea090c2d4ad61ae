//! Minimal, non-test implementations of the external collaborator traits
//! (`collab.rs`), used only by the CLI binary to exercise the library end
//! to end (§10.4). A real host project plugs in its own target model,
//! scope, stamp database, and root index; this module stands in for all
//! four so `fss` commands have something to talk to.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};

use crate::collab::{BuildRootDescriptor, CompileScope, RootIndex, RootRef, Stamp, StampsStorage};
use crate::context::CompileContext;
use crate::model::{BuildTarget, TargetLoader, TargetType, TargetTypeRegistry};

pub const DEMO_TYPE_ID: &str = "demo";

pub struct DemoRoot {
    target: BuildTarget,
    id: u32,
}

impl BuildRootDescriptor for DemoRoot {
    fn target(&self) -> &BuildTarget {
        &self.target
    }

    fn is_generated(&self) -> bool {
        false
    }

    fn root_id(&self) -> u32 {
        self.id
    }
}

/// Single fixed root per target, identified by id `1`. Enough to drive
/// the CLI's demo commands without a real project layout.
pub fn root_for(target: BuildTarget) -> RootRef {
    RootRef::new(Arc::new(DemoRoot { target, id: 1 }))
}

pub struct DemoRootIndex {
    roots: Mutex<Vec<(Utf8PathBuf, RootRef)>>,
}

impl DemoRootIndex {
    pub fn new() -> Self {
        Self { roots: Mutex::new(Vec::new()) }
    }

    pub fn register(&self, dir: Utf8PathBuf, root: RootRef) {
        self.roots.lock().unwrap().push((dir, root));
    }
}

impl RootIndex for DemoRootIndex {
    fn find_all_parent_descriptors(&self, file: &Utf8Path, _context: &CompileContext) -> Vec<RootRef> {
        self.roots
            .lock()
            .unwrap()
            .iter()
            .filter(|(dir, _)| file.as_str().starts_with(dir.as_str()))
            .map(|(_, root)| root.clone())
            .collect()
    }
}

/// Affects every file unconditionally: the demo driver has no notion of
/// module boundaries or exclusion globs.
pub struct DemoScope;

impl CompileScope for DemoScope {
    fn is_affected(&self, _target: &BuildTarget, _file: &Utf8Path) -> bool {
        true
    }
}

/// In-memory stand-in for a real stamp database, so the CLI can run
/// `mark-all-up-to-date` without wiring up content hashing.
#[derive(Default)]
pub struct DemoStampsStorage {
    stamps: Mutex<HashMap<String, Stamp>>,
}

impl DemoStampsStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StampsStorage for DemoStampsStorage {
    fn save_stamp(&self, file: &Utf8Path, _target: &BuildTarget, stamp: Stamp) -> anyhow::Result<()> {
        self.stamps.lock().unwrap().insert(file.as_str().to_string(), stamp);
        Ok(())
    }

    fn remove_stamp(&self, file: &Utf8Path, _target: &BuildTarget) -> anyhow::Result<()> {
        self.stamps.lock().unwrap().remove(file.as_str());
        Ok(())
    }

    fn current_stamp(&self, _file: &Utf8Path) -> anyhow::Result<Stamp> {
        Ok(Stamp(Vec::new()))
    }
}

struct DemoLoader;

impl TargetLoader for DemoLoader {
    fn create_target(&self, id: &str) -> Option<BuildTarget> {
        Some(BuildTarget::new(DEMO_TYPE_ID, id))
    }
}

struct DemoTargetType;

impl TargetType for DemoTargetType {
    fn create_loader(&self) -> Box<dyn TargetLoader> {
        Box::new(DemoLoader)
    }
}

/// Registry with the single `demo` target type, accepting any `id`. Real
/// hosts register one `TargetType` per kind of build target they define.
pub struct DemoRegistry;

impl TargetTypeRegistry for DemoRegistry {
    fn get_type(&self, type_id: &str) -> Option<Arc<dyn TargetType>> {
        (type_id == DEMO_TYPE_ID).then(|| Arc::new(DemoTargetType) as Arc<dyn TargetType>)
    }
}

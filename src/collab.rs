//! Narrow interfaces for the collaborators FSS consumes but does not own
//! (spec §1 "Out of scope" and §6 "External interfaces"): the root index,
//! the compile scope, the stamp store, and the filesystem probe used to
//! read a file's modification time.

use std::sync::Arc;

use camino::Utf8Path;

use crate::context::CompileContext;
use crate::model::BuildTarget;

/// A directory associated with a target, containing source files. May be
/// *generated* — the output of a prior build step, in which case its
/// post-build-start mutation is expected and ignored by
/// [`crate::FsState::has_unprocessed_changes`] and
/// [`crate::FsState::mark_all_up_to_date`].
pub trait BuildRootDescriptor: Send + Sync {
    /// The target this root belongs to.
    fn target(&self) -> &BuildTarget;
    fn is_generated(&self) -> bool;
    /// A stable integer assigned by the root index, used as `rootId` in
    /// the on-disk wire format so roots can be re-resolved on load.
    fn root_id(&self) -> u32;
}

/// Reference-counted handle to a root descriptor. Used as a map key: two
/// handles are equal iff they carry the same [`BuildRootDescriptor::root_id`].
#[derive(Clone)]
pub struct RootRef(pub Arc<dyn BuildRootDescriptor>);

impl RootRef {
    pub fn new(inner: Arc<dyn BuildRootDescriptor>) -> Self {
        Self(inner)
    }
}

impl std::ops::Deref for RootRef {
    type Target = dyn BuildRootDescriptor;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for RootRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.root_id() == other.0.root_id()
    }
}
impl Eq for RootRef {}

impl std::hash::Hash for RootRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.root_id().hash(state);
    }
}

impl std::fmt::Debug for RootRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootRef")
            .field("root_id", &self.0.root_id())
            .field("target", self.0.target())
            .field("is_generated", &self.0.is_generated())
            .finish()
    }
}

/// Maps a file path to the build roots that contain it. Owned by the
/// project, not by FSS.
pub trait RootIndex: Send + Sync {
    fn find_all_parent_descriptors(
        &self,
        file: &Utf8Path,
        context: &CompileContext,
    ) -> Vec<RootRef>;
}

/// "Is this file in scope for this target?" — answered by the active
/// compile scope for the current build invocation.
pub trait CompileScope: Send + Sync {
    fn is_affected(&self, target: &BuildTarget, file: &Utf8Path) -> bool;
}

/// Opaque content/timestamp fingerprint, as produced and compared by the
/// stamp store. FSS never inspects the bytes, only forwards them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp(pub Vec<u8>);

/// The companion fingerprint database keyed by `(file, target)`. FSS tells
/// it when to drop a stamp (the file changed) and when to save one (the
/// build successfully processed the file); FSS never computes a stamp
/// itself.
pub trait StampsStorage: Send + Sync {
    fn save_stamp(&self, file: &Utf8Path, target: &BuildTarget, stamp: Stamp) -> anyhow::Result<()>;
    fn remove_stamp(&self, file: &Utf8Path, target: &BuildTarget) -> anyhow::Result<()>;
    fn current_stamp(&self, file: &Utf8Path) -> anyhow::Result<Stamp>;
}

/// Filesystem probe: last-modified time in milliseconds since epoch. A
/// thin seam so tests can fake mtimes without touching real files.
pub trait FsProbe: Send + Sync {
    fn last_modified(&self, file: &Utf8Path) -> anyhow::Result<i64>;
}

/// [`FsProbe`] backed by the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFsProbe;

impl FsProbe for RealFsProbe {
    fn last_modified(&self, file: &Utf8Path) -> anyhow::Result<i64> {
        let meta = std::fs::metadata(file.as_std_path())?;
        let modified = meta.modified()?;
        let millis = modified
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Ok(millis)
    }
}

/// In-memory fakes for the four collaborator traits above, used by this
/// crate's own unit tests and by the integration tests under `tests/` to
/// drive `FsState` deterministically without a real compiler, filesystem
/// watcher, or stamp database.
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub struct FakeRoot {
        pub target: BuildTarget,
        pub generated: bool,
        pub id: u32,
    }

    impl BuildRootDescriptor for FakeRoot {
        fn target(&self) -> &BuildTarget {
            &self.target
        }
        fn is_generated(&self) -> bool {
            self.generated
        }
        fn root_id(&self) -> u32 {
            self.id
        }
    }

    pub fn fake_root(target: BuildTarget, id: u32, generated: bool) -> RootRef {
        RootRef::new(Arc::new(FakeRoot {
            target,
            generated,
            id,
        }))
    }

    /// A root index backed by an explicit list, fine for unit tests where
    /// the set of roots is known up front.
    #[derive(Default)]
    pub struct FakeRootIndex {
        roots: Mutex<Vec<RootRef>>,
    }

    impl FakeRootIndex {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add(&self, root: RootRef) {
            self.roots.lock().unwrap().push(root);
        }
    }

    impl RootIndex for FakeRootIndex {
        fn find_all_parent_descriptors(
            &self,
            _file: &Utf8Path,
            _context: &CompileContext,
        ) -> Vec<RootRef> {
            self.roots.lock().unwrap().clone()
        }
    }

    /// A scope that affects everything, or everything minus an explicit
    /// exclusion list.
    #[derive(Default)]
    pub struct FakeScope {
        excluded: Mutex<Vec<String>>,
    }

    impl FakeScope {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn exclude(&self, path: &str) {
            self.excluded.lock().unwrap().push(path.to_string());
        }
    }

    impl CompileScope for FakeScope {
        fn is_affected(&self, _target: &BuildTarget, file: &Utf8Path) -> bool {
            !self.excluded.lock().unwrap().iter().any(|p| p == file.as_str())
        }
    }

    /// In-memory stamp store recording calls so tests can assert on them.
    #[derive(Default)]
    pub struct FakeStampsStorage {
        pub saved: Mutex<HashMap<String, Stamp>>,
        pub removed: Mutex<Vec<String>>,
    }

    impl FakeStampsStorage {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl StampsStorage for FakeStampsStorage {
        fn save_stamp(&self, file: &Utf8Path, _target: &BuildTarget, stamp: Stamp) -> anyhow::Result<()> {
            self.saved.lock().unwrap().insert(file.as_str().to_string(), stamp);
            Ok(())
        }
        fn remove_stamp(&self, file: &Utf8Path, _target: &BuildTarget) -> anyhow::Result<()> {
            self.saved.lock().unwrap().remove(file.as_str());
            self.removed.lock().unwrap().push(file.as_str().to_string());
            Ok(())
        }
        fn current_stamp(&self, _file: &Utf8Path) -> anyhow::Result<Stamp> {
            Ok(Stamp(vec![]))
        }
    }

    /// In-memory clock for deterministic `last_modified` in tests.
    #[derive(Default)]
    pub struct FakeFsProbe {
        mtimes: Mutex<HashMap<String, i64>>,
    }

    impl FakeFsProbe {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, file: &str, millis: i64) {
            self.mtimes.lock().unwrap().insert(file.to_string(), millis);
        }
    }

    impl FsProbe for FakeFsProbe {
        fn last_modified(&self, file: &Utf8Path) -> anyhow::Result<i64> {
            Ok(self
                .mtimes
                .lock()
                .unwrap()
                .get(file.as_str())
                .copied()
                .unwrap_or(0))
        }
    }
}

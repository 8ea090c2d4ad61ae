//! The target model is an external collaborator (see spec §1): this crate
//! only needs an opaque, hashable identity for a build target and a way
//! to reconstitute one from the `(typeId, id)` pair persisted on disk.
//! The registry that actually knows about target *types* — and how to
//! build a live target object from a plugin-specific `id` — lives outside
//! this crate and is reached through [`TargetTypeRegistry`].

use std::sync::Arc;

/// Opaque identity of a build target: a module's production sources, a
/// module's test sources, and so on. Two targets are equal iff both
/// fields match; this is the only equality FSS ever needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildTarget {
    type_id: Arc<str>,
    id: Arc<str>,
}

impl BuildTarget {
    pub fn new(type_id: impl Into<Arc<str>>, id: impl Into<Arc<str>>) -> Self {
        Self {
            type_id: type_id.into(),
            id: id.into(),
        }
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.type_id, self.id)
    }
}

/// Reconstitutes a live [`BuildTarget`] from a persisted `id` string, bound
/// to one target type. Obtained from [`TargetType::create_loader`].
pub trait TargetLoader {
    fn create_target(&self, id: &str) -> Option<BuildTarget>;
}

/// One kind of build target known to the host project (e.g. "java-production",
/// "java-test"). Knows how to produce a [`TargetLoader`] for reconstituting
/// targets of this type from persisted ids.
pub trait TargetType: Send + Sync {
    fn create_loader(&self) -> Box<dyn TargetLoader>;
}

/// Registry of target types, keyed by the `typeId` persisted alongside
/// each target. Looking up an unknown `typeId` is expected after a plugin
/// is removed or renamed — see spec §7(b) — and is not an error.
pub trait TargetTypeRegistry: Send + Sync {
    fn get_type(&self, type_id: &str) -> Option<Arc<dyn TargetType>>;
}

/// An in-memory [`TargetTypeRegistry`] fake, used by this crate's own
/// unit tests and by the integration tests under `tests/`.
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A loader that only ever reconstitutes ids it was told about ahead
    /// of time, to exercise the "unknown target" path deterministically.
    struct FixedLoader {
        known: Vec<String>,
        type_id: Arc<str>,
    }

    impl TargetLoader for FixedLoader {
        fn create_target(&self, id: &str) -> Option<BuildTarget> {
            if self.known.iter().any(|k| k == id) {
                Some(BuildTarget::new(self.type_id.clone(), id))
            } else {
                None
            }
        }
    }

    struct FixedType {
        known: Vec<String>,
        type_id: Arc<str>,
    }

    impl TargetType for FixedType {
        fn create_loader(&self) -> Box<dyn TargetLoader> {
            Box::new(FixedLoader {
                known: self.known.clone(),
                type_id: self.type_id.clone(),
            })
        }
    }

    /// An in-memory registry for tests: register the ids each type is
    /// willing to recognize, look them up by type id.
    #[derive(Default)]
    pub struct FakeRegistry {
        types: Mutex<HashMap<String, Arc<dyn TargetType>>>,
    }

    impl FakeRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn register(&self, type_id: &str, known_ids: &[&str]) {
            let ty: Arc<dyn TargetType> = Arc::new(FixedType {
                known: known_ids.iter().map(|s| s.to_string()).collect(),
                type_id: Arc::from(type_id),
            });
            self.types.lock().unwrap().insert(type_id.to_string(), ty);
        }
    }

    impl TargetTypeRegistry for FakeRegistry {
        fn get_type(&self, type_id: &str) -> Option<Arc<dyn TargetType>> {
            self.types.lock().unwrap().get(type_id).cloned()
        }
    }
}

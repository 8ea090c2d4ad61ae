//! File-path equality policy.
//!
//! The recompile map, the deleted-path set, and the event-stamps map all
//! key on a file path. The three must agree on one explicit comparison
//! policy (case-sensitive or case-insensitive) or membership checks drift
//! apart across them — see the "File-path equality" design note. A single
//! [`PathCasing`] is threaded through [`crate::FilesDelta`] and
//! [`crate::EventStamps`] from [`crate::FsStateOptions`] so the policy can
//! never be mixed within one `FsState`.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathCasing {
    Sensitive,
    Insensitive,
}

impl PathCasing {
    /// The policy a freshly-initialized native build would want: exact
    /// match everywhere. Case-insensitive matching is opt-in via config
    /// for hosts (Windows, case-insensitive HFS+/APFS) where the caller
    /// knows the filesystem folds case.
    pub const fn native_default() -> Self {
        PathCasing::Sensitive
    }

    /// The key used for hashing/equality under this policy. Two paths
    /// that normalize to the same key are the same file for every FSS
    /// data structure.
    pub fn normalize(self, path: &Utf8Path) -> String {
        match self {
            PathCasing::Sensitive => path.as_str().to_string(),
            PathCasing::Insensitive => path.as_str().to_lowercase(),
        }
    }

    pub fn normalize_str(self, path: &str) -> String {
        match self {
            PathCasing::Sensitive => path.to_string(),
            PathCasing::Insensitive => path.to_lowercase(),
        }
    }
}

impl Default for PathCasing {
    fn default() -> Self {
        PathCasing::native_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_keeps_paths_distinct() {
        let a = Utf8Path::new("/a/X.txt");
        let b = Utf8Path::new("/a/x.txt");
        assert_ne!(
            PathCasing::Sensitive.normalize(a),
            PathCasing::Sensitive.normalize(b)
        );
    }

    #[test]
    fn insensitive_folds_paths() {
        let a = Utf8Path::new("/a/X.txt");
        let b = Utf8Path::new("/a/x.txt");
        assert_eq!(
            PathCasing::Insensitive.normalize(a),
            PathCasing::Insensitive.normalize(b)
        );
    }
}

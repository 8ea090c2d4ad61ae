//! Process-wide map from file to the wall-clock millisecond timestamp at
//! which a dirty notification for that file was last recorded (spec
//! §4.2). Used to detect a change whose filesystem-visible mtime predates
//! a build's start but whose notification was only delivered afterward.

use std::collections::HashMap;
use std::sync::Mutex;

use camino::Utf8Path;

use crate::paths::PathCasing;

#[derive(Default)]
pub struct EventStamps {
    casing: PathCasing,
    stamps: Mutex<HashMap<String, i64>>,
}

impl EventStamps {
    pub fn new(casing: PathCasing) -> Self {
        Self {
            casing,
            stamps: Mutex::new(HashMap::new()),
        }
    }

    /// Record `stamp` for `file`. The most recent write wins; an older
    /// timestamp may freely overwrite a newer one if the caller passes
    /// one in (the monotonicity guarantee is per-call-site, not enforced
    /// here).
    pub fn put(&self, file: &Utf8Path, stamp: i64) {
        let key = self.casing.normalize(file);
        self.lock().insert(key, stamp);
    }

    /// The stored stamp, or `0` if `file` has never been recorded.
    pub fn get(&self, file: &Utf8Path) -> i64 {
        let key = self.casing.normalize(file);
        self.lock().get(&key).copied().unwrap_or(0)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
        self.stamps.lock().unwrap()
    }
}

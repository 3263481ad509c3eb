//! Shared per-key state storage.
//!
//! Every strategy owns one of these tables: a map from caller key to that
//! strategy's state record, guarded by a single mutex so each admission check
//! runs its full read-modify-write sequence under mutual exclusion. Entries
//! are created lazily on first access and never evicted.

use std::collections::HashMap;

use parking_lot::Mutex;

/// A lazily-populated map of per-key limiter state.
///
/// The coarse per-instance lock serializes calls across all keys of one
/// limiter. That trades cross-key parallelism for a simple atomicity story:
/// time advancement and the admission decision for a key can never interleave
/// with another call.
#[derive(Debug)]
pub(crate) struct KeyedStates<S> {
    entries: Mutex<HashMap<String, S>>,
}

impl<S> KeyedStates<S> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` against the state for `key`, inserting `init()` first if the
    /// key has never been seen.
    pub fn update<T>(
        &self,
        key: &str,
        init: impl FnOnce() -> S,
        f: impl FnOnce(&mut S) -> T,
    ) -> T {
        let mut entries = self.entries.lock();
        let state = entries.entry(key.to_owned()).or_insert_with(init);
        f(state)
    }

    /// Run `f` with read-only access to the state for `key`.
    ///
    /// Unknown keys are observed as `None` rather than inserted, so reads
    /// never grow the table.
    pub fn read<T>(&self, key: &str, f: impl FnOnce(Option<&S>) -> T) -> T {
        let entries = self.entries.lock();
        f(entries.get(key))
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Drop all per-key state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

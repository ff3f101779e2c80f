//! Tally of intercepted request targets.

use std::collections::HashMap;
use std::sync::Mutex;

/// One distinct request target and how many times it was hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmockedRequest {
    /// Request target exactly as received (path plus query, not normalized).
    pub path: String,

    /// Number of requests observed for this target.
    pub count: u64,
}

#[derive(Default)]
struct Tally {
    /// Distinct targets in first-seen order.
    order: Vec<String>,
    /// Index into `order` for each target.
    index: HashMap<String, usize>,
    /// Hit counts, parallel to `order`.
    counts: Vec<u64>,
}

/// Thread-safe, insertion-ordered multiset of request targets.
///
/// Shared between the connection handlers of an [`crate::InterceptionServer`]
/// and the orchestrator that reports on it. Each run constructs its own
/// recorder; there is no process-wide state.
#[derive(Default)]
pub struct RequestRecorder {
    tally: Mutex<Tally>,
}

impl RequestRecorder {
    /// Create a new empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request for `path`.
    pub fn record(&self, path: impl Into<String>) {
        let path = path.into();
        // Use unwrap_or_else to recover from poisoned lock - the data is still valid
        let mut guard = self.tally.lock().unwrap_or_else(|e| e.into_inner());
        let tally = &mut *guard;
        match tally.index.get(&path) {
            Some(&slot) => tally.counts[slot] += 1,
            None => {
                let slot = tally.order.len();
                tally.index.insert(path.clone(), slot);
                tally.order.push(path);
                tally.counts.push(1);
            }
        }
    }

    /// Returns true if no request has ever been recorded.
    pub fn is_empty(&self) -> bool {
        self.tally
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .order
            .is_empty()
    }

    /// Number of distinct targets recorded.
    pub fn len(&self) -> usize {
        self.tally
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .order
            .len()
    }

    /// Total number of requests recorded across all targets.
    pub fn total(&self) -> u64 {
        self.tally
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .counts
            .iter()
            .sum()
    }

    /// All distinct targets in first-seen order, with their counts.
    ///
    /// Taken under the lock, so no partially applied `record` is visible.
    pub fn snapshot(&self) -> Vec<UnmockedRequest> {
        let tally = self.tally.lock().unwrap_or_else(|e| e.into_inner());
        tally
            .order
            .iter()
            .zip(&tally.counts)
            .map(|(path, &count)| UnmockedRequest {
                path: path.clone(),
                count,
            })
            .collect()
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct CheckKey {
    pub group: String,
    pub name: String,
}

#[derive(Debug, Default)]
pub(crate) struct CheckCounts {
    passes: AtomicU64,
    fails: AtomicU64,
}

impl CheckCounts {
    pub fn record(&self, passed: bool) {
        if passed {
            self.passes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fails.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn summary(&self, key: &CheckKey) -> CheckSummary {
        CheckSummary {
            group: key.group.clone(),
            name: key.name.clone(),
            passes: self.passes.load(Ordering::Relaxed),
            fails: self.fails.load(Ordering::Relaxed),
        }
    }
}

/// Pass/fail totals of one named check inside one group path.
///
/// `group` is the `::`-joined group path, empty for top-level checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub group: String,
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

impl CheckSummary {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }
}

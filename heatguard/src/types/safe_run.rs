//! Counts consecutive safe observations before an alert may resolve.
//!
//! A single noisy reading on the safe side of a threshold must not clear an
//! alert, and a single violation in the middle of a recovery must restart
//! the count. The counter only completes after `required` safe
//! observations in a row.
//!
//! # State Machine
//!
//! ```text
//!            check(false)             count + 1 == required
//!  count=0 ──────────────► count=n ─────────────────────────► Completed
//!     ▲                       │                                 │
//!     │      check(true)      │                                 │
//!     └───────────────────────┘                                 │
//!     ▲                                                         │
//!     └──────────────────── (auto reset) ───────────────────────┘
//! ```
//!
//! `check()` returns a [`RunStatus`] so the caller can act on exactly the
//! completion edge.

use std::collections::HashMap;
use std::hash::Hash;

/// Result of [`SafeRun::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The observation was a violation; the run restarted from zero.
    Reset,

    /// Safe observation recorded; the run has this many so far.
    Counting(u32),

    /// The run just reached the required length. The counter is back at
    /// zero, so this is returned once per completed run.
    Completed,
}

/// Consecutive-safe-observation counter.
#[derive(Debug, Clone)]
pub struct SafeRun {
    required: u32,
    count: u32,
}

impl SafeRun {
    /// A run that completes after `required` safe observations (at least 1).
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            count: 0,
        }
    }

    /// Record one observation. `violated` is true when the check failed.
    pub fn check(&mut self, violated: bool) -> RunStatus {
        if violated {
            self.count = 0;
            return RunStatus::Reset;
        }

        self.count += 1;
        if self.count >= self.required {
            self.count = 0;
            RunStatus::Completed
        } else {
            RunStatus::Counting(self.count)
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// One [`SafeRun`] per tracked key, created on first observation.
#[derive(Debug)]
pub struct HysteresisTracker<K> {
    required: u32,
    runs: HashMap<K, SafeRun>,
}

impl<K: Eq + Hash> HysteresisTracker<K> {
    pub fn new(required: u32) -> Self {
        Self {
            required,
            runs: HashMap::new(),
        }
    }

    pub fn check(&mut self, key: K, violated: bool) -> RunStatus {
        let required = self.required;
        self.runs
            .entry(key)
            .or_insert_with(|| SafeRun::new(required))
            .check(violated)
    }

    /// Current count for `key`, zero if never observed.
    pub fn count(&self, key: &K) -> u32 {
        self.runs.get(key).map(SafeRun::count).unwrap_or(0)
    }
}

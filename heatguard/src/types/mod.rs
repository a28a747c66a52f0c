//! Small value types used across components.

mod safe_run;
mod timestamp;

pub use safe_run::{HysteresisTracker, RunStatus, SafeRun};
pub use timestamp::{Timestamp, iso8601_now};

//! Fan controller state machine.
//!
//! States are implicit in the (latest status, latest emergency) pair held by
//! [`FanState`]; [`calculate_speed`] maps that pair to a speed without
//! looking at history. [`FanController`] drives one fan and [`FanBank`]
//! routes bus messages across the fans a process hosts.

mod bank;
mod controller;
mod state;

pub use bank::FanBank;
pub use controller::{DEFAULT_AUTO_RECOVERY, FanController};
pub use state::{FanSpeed, FanState, FanStatus, calculate_speed};

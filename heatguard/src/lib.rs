//! Temperature anomaly detection and fan emergency control.
//!
//! Readings from rooms and printers flow through the
//! [`analyzer::TemperatureAnalyzer`], which flags overheat and
//! thermal-runaway conditions. The [`orchestrator::Orchestrator`] feeds
//! those verdicts into the [`alerts::AlertStore`] with hysteresis-gated
//! resolution and hands every lifecycle transition to the
//! [`dispatch::Dispatcher`]. On the other side of the bus, the
//! [`fan::FanController`] turns heat-level status and emergency commands
//! into fan speed, with a bounded auto-recovery timer for runaway
//! overrides.

pub mod alerts;
pub mod analyzer;
pub mod bus;
pub mod command;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod fan;
pub mod orchestrator;
pub mod persistence;
pub mod reading;
pub mod tracing;
pub mod types;

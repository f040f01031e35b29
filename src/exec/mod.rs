//! Execution control
//!
//! - [`launcher`]: type-state launch sequence (extract, isolate, confine, spawn)
//! - [`supervisor`]: signal relay and completion wait
//! - [`runner`]: re-executed inner entry that joins the cgroup and execs the target

pub mod launcher;
pub mod runner;
pub mod supervisor;

pub use launcher::{launch, Launch, LaunchFailure};
pub use runner::run_inner;

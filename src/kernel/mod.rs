//! Thin wrappers around Linux kernel primitives.
//!
//! Nothing here knows about archives or launch ordering.

pub mod cgroup;
pub mod namespace;
pub mod signal;

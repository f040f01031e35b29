//! parker: self-extracting, sandboxed launchers for a program and its directory
//!
//! `parker <target>` packs the directory containing `<target>` into a gzip-tar
//! archive and appends it to a prebuilt runner stub, followed by a fixed-width
//! length trailer. Running the result unpacks the archive inside a private
//! mount namespace, starts the target in a fresh cgroup, relays signals to it
//! and removes the cgroup when it exits.
//!
//! # Architecture
//!
//! ## Archive ([`archive`])
//! - [`archive::trailer`]: 16-digit length trailer codec
//! - [`archive::builder`]: directory walk, gzip-tar writer and artifact assembly
//! - [`archive::extract`]: embedded-archive locator and path-safe unpacker
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::namespace`]: mount namespace and tmpfs overlay of the working directory
//! - [`kernel::cgroup`]: v2/v1-freezer detection and per-launch groups
//! - [`kernel::signal`]: signal relay thread and group forwarding
//!
//! ## Execution Control ([`exec`])
//! - [`exec::launcher`]: type-state ordered launch sequence
//! - [`exec::supervisor`]: wait-and-relay loop
//! - [`exec::runner`]: re-executed inner runner that joins the cgroup and execs
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: constants, configuration, reports and the error type

// Archive format
pub mod archive;

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Configuration
pub mod config;

// Entry points
pub mod cli;

pub use config::types::{ParkerConfig, ParkerError, Result};

//! Configuration and shared types
//!
//! Runtime configuration, fixed names of the artifact format, and the error taxonomy.

pub mod types;

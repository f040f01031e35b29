//! Self-extracting archive format
//!
//! `[runner stub][gzip(tar(payload))][16-byte ASCII decimal length]`

pub mod builder;
pub mod extract;
pub mod trailer;

pub use builder::{build, BuildPlan};
pub use extract::{read_embedded_archive, unpack_archive, unpack_file, UnpackSummary};

//! Cgroup resource boundary
//!
//! One group per launch, under `parker/<id>` in the v2 hierarchy or the v1 freezer subsystem.

pub mod backend;
pub mod group;

// Re-export commonly used items
pub use backend::{detect_version, CgroupVersion};
pub use group::{generate_id, Cgroup};

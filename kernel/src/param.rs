//! Compile-time limits and defaults

pub use ksched_api::config::{NCPU, NOFILE, NPROC};

/// Maximum process name length in bytes
pub const MAXNAME: usize = 16;

/// Working directory of the root process
pub const ROOT_PATH: &str = "/";

static_assertions::const_assert!(MAXNAME > 0);
static_assertions::const_assert!(NCPU >= 1 && NPROC >= 1);

//! Host implementations of the collaborators the core calls out to
//!
//! These stand in for the page-table manager, the file layer and the trap
//! frame allocator when the core runs as an ordinary process.

pub mod fs;
pub mod kalloc;
pub mod vm;

pub use fs::HostFiles;
pub use kalloc::HeapFrames;
pub use vm::HostSpaces;

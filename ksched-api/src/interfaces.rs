//! Collaborator contracts consumed by the scheduling core
//!
//! The core never manages page tables, files or trap frame memory itself.
//! It calls out through these traits at allocation, fork, exit and copy
//! boundaries only.

use alloc::boxed::Box;

use crate::error::Result;
use crate::types::{DirRef, FileHandle, SpaceId, TrapFrame};

/// Address-space manager
pub trait AddressSpaceManager: Send + Sync {
    /// Create an empty address space
    fn create_space(&self) -> Result<SpaceId>;

    /// Copy the first `size` bytes of `src` into `dst`, returning the new size of `dst`
    fn duplicate_space(&self, src: SpaceId, dst: SpaceId, size: usize) -> Result<usize>;

    /// Grow `space` from `old_size` to `new_size` bytes
    fn grow(&self, space: SpaceId, old_size: usize, new_size: usize) -> Result<usize>;

    /// Shrink `space` from `old_size` to `new_size` bytes
    fn shrink(&self, space: SpaceId, old_size: usize, new_size: usize) -> Result<usize>;

    /// Tear down `space`, whose current size is `size`
    fn destroy_space(&self, space: SpaceId, size: usize);

    /// Copy `src` into `space` at user address `dst`
    fn copy_out(&self, space: SpaceId, dst: usize, src: &[u8]) -> Result<()>;

    /// Copy from user address `src` in `space` into `dst`
    fn copy_in(&self, space: SpaceId, dst: &mut [u8], src: usize) -> Result<()>;
}

/// File layer, reference counted externally
pub trait FileLayer: Send + Sync {
    fn duplicate_handle(&self, handle: FileHandle) -> FileHandle;

    fn close_handle(&self, handle: FileHandle);

    fn lookup_path(&self, path: &str) -> Option<DirRef>;

    fn duplicate_directory_ref(&self, dir: DirRef) -> DirRef;

    fn release_directory_ref(&self, dir: DirRef);
}

/// Saved-trap-state allocator
pub trait TrapFrameAllocator: Send + Sync {
    fn alloc(&self) -> Option<Box<TrapFrame>>;

    fn free(&self, frame: Box<TrapFrame>);
}

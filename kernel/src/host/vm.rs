//! In-memory address spaces

use hashbrown::HashMap;
use ksched_api::{AddressSpaceManager, Error, Result, SpaceId};

const PAGE_SIZE: usize = 4096;

struct SpaceTable {
    next: u64,
    spaces: HashMap<SpaceId, Vec<u8>>,
    /// Pages charged to live spaces
    pages: usize,
}

/// Byte-vector address spaces with an optional page budget
pub struct HostSpaces {
    table: spin::Mutex<SpaceTable>,
    page_limit: Option<usize>,
}

fn pages(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

impl HostSpaces {
    pub fn new() -> Self {
        Self {
            table: spin::Mutex::new(SpaceTable { next: 1, spaces: HashMap::new(), pages: 0 }),
            page_limit: None,
        }
    }

    /// Spaces that together may never hold more than `limit` pages
    pub fn with_page_limit(limit: usize) -> Self {
        Self { page_limit: Some(limit), ..Self::new() }
    }

    pub fn live_spaces(&self) -> usize {
        self.table.lock().spaces.len()
    }

    pub fn pages_in_use(&self) -> usize {
        self.table.lock().pages
    }

    /// Resize `space` to `new_size`, charging or refunding pages
    fn resize(&self, space: SpaceId, new_size: usize) -> Result<usize> {
        let mut table = self.table.lock();
        let old_size = table.spaces.get(&space).ok_or(Error::BadAddress)?.len();
        let charged = table.pages - pages(old_size) + pages(new_size);
        if self.page_limit.is_some_and(|limit| charged > limit) {
            return Err(Error::OutOfMemory);
        }
        table.pages = charged;
        if let Some(mem) = table.spaces.get_mut(&space) {
            mem.resize(new_size, 0);
        }
        Ok(new_size)
    }
}

impl Default for HostSpaces {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpaceManager for HostSpaces {
    fn create_space(&self) -> Result<SpaceId> {
        let mut table = self.table.lock();
        let id = SpaceId(table.next);
        table.next += 1;
        table.spaces.insert(id, Vec::new());
        Ok(id)
    }

    fn duplicate_space(&self, src: SpaceId, dst: SpaceId, size: usize) -> Result<usize> {
        let bytes = {
            let table = self.table.lock();
            let mem = table.spaces.get(&src).ok_or(Error::BadAddress)?;
            mem.get(..size).ok_or(Error::BadAddress)?.to_vec()
        };
        self.resize(dst, size)?;
        let mut table = self.table.lock();
        let mem = table.spaces.get_mut(&dst).ok_or(Error::BadAddress)?;
        mem.copy_from_slice(&bytes);
        Ok(size)
    }

    fn grow(&self, space: SpaceId, old_size: usize, new_size: usize) -> Result<usize> {
        if new_size < old_size {
            return Err(Error::BadAddress);
        }
        self.resize(space, new_size)
    }

    fn shrink(&self, space: SpaceId, old_size: usize, new_size: usize) -> Result<usize> {
        if new_size > old_size {
            return Err(Error::BadAddress);
        }
        self.resize(space, new_size)
    }

    fn destroy_space(&self, space: SpaceId, _size: usize) {
        let mut table = self.table.lock();
        if let Some(mem) = table.spaces.remove(&space) {
            table.pages -= pages(mem.len());
        }
    }

    fn copy_out(&self, space: SpaceId, dst: usize, src: &[u8]) -> Result<()> {
        let mut table = self.table.lock();
        let mem = table.spaces.get_mut(&space).ok_or(Error::BadAddress)?;
        let end = dst.checked_add(src.len()).ok_or(Error::BadAddress)?;
        mem.get_mut(dst..end).ok_or(Error::BadAddress)?.copy_from_slice(src);
        Ok(())
    }

    fn copy_in(&self, space: SpaceId, dst: &mut [u8], src: usize) -> Result<()> {
        let table = self.table.lock();
        let mem = table.spaces.get(&space).ok_or(Error::BadAddress)?;
        let end = src.checked_add(dst.len()).ok_or(Error::BadAddress)?;
        dst.copy_from_slice(mem.get(src..end).ok_or(Error::BadAddress)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_copies_contents() {
        let vm = HostSpaces::new();
        let a = vm.create_space().unwrap();
        let b = vm.create_space().unwrap();
        assert_eq!(vm.grow(a, 0, 4096), Ok(4096));
        vm.copy_out(a, 100, b"hello").unwrap();
        assert_eq!(vm.duplicate_space(a, b, 4096), Ok(4096));
        let mut buf = [0u8; 5];
        vm.copy_in(b, &mut buf, 100).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(vm.pages_in_use(), 2);
    }

    #[test]
    fn test_copy_outside_space_fails() {
        let vm = HostSpaces::new();
        let a = vm.create_space().unwrap();
        vm.grow(a, 0, 16).unwrap();
        assert_eq!(vm.copy_out(a, 12, b"12345"), Err(Error::BadAddress));
        assert_eq!(vm.copy_out(a, usize::MAX, b"1"), Err(Error::BadAddress));
    }

    #[test]
    fn test_page_budget() {
        let vm = HostSpaces::with_page_limit(1);
        let a = vm.create_space().unwrap();
        assert_eq!(vm.grow(a, 0, 4096), Ok(4096));
        assert_eq!(vm.grow(a, 4096, 4097), Err(Error::OutOfMemory));
        assert_eq!(vm.shrink(a, 4096, 0), Ok(0));
        vm.destroy_space(a, 0);
        assert_eq!((vm.live_spaces(), vm.pages_in_use()), (0, 0));
    }
}

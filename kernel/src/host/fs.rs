//! Reference-counted file and directory handles

use hashbrown::HashMap;
use ksched_api::{DirRef, FileHandle, FileLayer};

/// Directory reference of `/`
pub const ROOT_DIR: DirRef = DirRef(1);

struct OpenFile {
    name: String,
    refs: usize,
}

struct FileTable {
    next: u64,
    files: HashMap<FileHandle, OpenFile>,
    /// Outstanding references per directory
    dirs: HashMap<DirRef, usize>,
}

/// Host file layer: names only, no contents
pub struct HostFiles {
    table: spin::Mutex<FileTable>,
}

impl HostFiles {
    pub fn new() -> Self {
        Self {
            table: spin::Mutex::new(FileTable { next: 1, files: HashMap::new(), dirs: HashMap::new() }),
        }
    }

    /// Open `name`, returning a handle with one reference
    pub fn open(&self, name: &str) -> FileHandle {
        let mut table = self.table.lock();
        let handle = FileHandle(table.next);
        table.next += 1;
        table.files.insert(handle, OpenFile { name: name.into(), refs: 1 });
        handle
    }

    /// References held on `handle`; 0 once fully closed
    pub fn refcount(&self, handle: FileHandle) -> usize {
        self.table.lock().files.get(&handle).map_or(0, |f| f.refs)
    }

    pub fn name(&self, handle: FileHandle) -> Option<String> {
        self.table.lock().files.get(&handle).map(|f| f.name.clone())
    }

    /// Files with at least one reference
    pub fn open_count(&self) -> usize {
        self.table.lock().files.len()
    }

    pub fn dir_refs(&self, dir: DirRef) -> usize {
        self.table.lock().dirs.get(&dir).copied().unwrap_or(0)
    }
}

impl Default for HostFiles {
    fn default() -> Self {
        Self::new()
    }
}

impl FileLayer for HostFiles {
    fn duplicate_handle(&self, handle: FileHandle) -> FileHandle {
        let mut table = self.table.lock();
        match table.files.get_mut(&handle) {
            Some(f) => f.refs += 1,
            None => log::warn!("filedup: unknown handle {:?}", handle),
        }
        handle
    }

    fn close_handle(&self, handle: FileHandle) {
        let mut table = self.table.lock();
        let Some(f) = table.files.get_mut(&handle) else {
            log::warn!("fileclose: unknown handle {:?}", handle);
            return;
        };
        f.refs -= 1;
        if f.refs == 0 {
            table.files.remove(&handle);
        }
    }

    fn lookup_path(&self, path: &str) -> Option<DirRef> {
        if path != "/" {
            return None;
        }
        *self.table.lock().dirs.entry(ROOT_DIR).or_insert(0) += 1;
        Some(ROOT_DIR)
    }

    fn duplicate_directory_ref(&self, dir: DirRef) -> DirRef {
        *self.table.lock().dirs.entry(dir).or_insert(0) += 1;
        dir
    }

    fn release_directory_ref(&self, dir: DirRef) {
        let mut table = self.table.lock();
        if let Some(refs) = table.dirs.get_mut(&dir) {
            *refs = refs.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_close_removes_file() {
        let files = HostFiles::new();
        let h = files.open("console");
        assert_eq!(files.duplicate_handle(h), h);
        assert_eq!(files.refcount(h), 2);
        files.close_handle(h);
        assert_eq!(files.open_count(), 1);
        files.close_handle(h);
        assert_eq!((files.refcount(h), files.open_count()), (0, 0));
    }

    #[test]
    fn test_root_lookup_counts_references() {
        let files = HostFiles::new();
        assert_eq!(files.lookup_path("/bin"), None);
        let root = files.lookup_path("/").expect("root");
        files.duplicate_directory_ref(root);
        assert_eq!(files.dir_refs(root), 2);
        files.release_directory_ref(root);
        files.release_directory_ref(root);
        assert_eq!(files.dir_refs(root), 0);
    }
}

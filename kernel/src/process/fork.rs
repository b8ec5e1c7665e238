//! Process creation and memory growth

use std::sync::Arc;

use ksched_api::{Error, Pid, ProcState, Result};

use super::manager::{Kernel, Proc};

/// How a forked child differs from its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkMode {
    /// Plain copy returning 0 in the child
    Plain,
    /// Batch process with the given priority, counted in the core's epoch
    Batch { priority: i64 },
    /// Child resumes at `entry` instead of the parent's program counter
    Entry(usize),
}

impl Kernel {
    /// Create a copy of the calling process; returns the child's pid
    pub fn fork(self: &Arc<Self>) -> Result<Pid> {
        self.fork_inner(ForkMode::Plain)
    }

    /// Fork a batch child with `priority`
    pub fn fork_with_priority(self: &Arc<Self>, priority: i64) -> Result<Pid> {
        self.fork_inner(ForkMode::Batch { priority })
    }

    /// Fork a child that starts at `entry`
    pub fn fork_with_entry(self: &Arc<Self>, entry: usize) -> Result<Pid> {
        self.fork_inner(ForkMode::Entry(entry))
    }

    fn fork_inner(self: &Arc<Self>, mode: ForkMode) -> Result<Pid> {
        let p = self.myproc().ok_or(Error::NoSuchProcess)?;
        let name = p.lock().name.clone();

        let (np, mut child) = self.allocate()?;

        // Safety: we are the running owner of `p`; `np` is locked and has never run
        let pdata = unsafe { p.data_mut() };
        let cdata = unsafe { np.data_mut() };

        let (Some(src), Some(dst)) = (pdata.space, cdata.space) else {
            self.release(np, &mut child);
            return Err(Error::OutOfMemory);
        };
        match self.vm.duplicate_space(src, dst, p.size()) {
            Ok(size) => np.set_size(size),
            Err(e) => {
                log::warn!("fork: pid {} address space copy failed: {}", child.pid, e);
                self.release(np, &mut child);
                return Err(e);
            }
        }

        if let (Some(ptf), Some(ctf)) = (pdata.trapframe.as_deref(), cdata.trapframe.as_deref_mut()) {
            *ctf = *ptf;
            // Child sees fork() return 0
            ctf.a0 = 0;
            if let ForkMode::Entry(entry) = mode {
                ctf.epc = entry;
            }
        }

        for (theirs, mine) in cdata.ofile.iter_mut().zip(pdata.ofile.iter()) {
            *theirs = mine.map(|h| self.files.duplicate_handle(h));
        }
        cdata.cwd = pdata.cwd.map(|d| self.files.duplicate_directory_ref(d));
        child.name = name;

        let pid = child.pid;
        drop(child);

        self.parents.lock()[np.index()] = Some(p.index());

        let mut child = np.lock();
        if let ForkMode::Batch { priority } = mode {
            child.sched.batch = true;
            child.sched.priority = priority;
            self.current_cpu("fork").batch().expected += 1;
        }
        child.state = ProcState::Runnable;
        child.sched.wait_st_time = Some(self.clock.now());
        drop(child);

        log::debug!("fork: pid {} -> {} ({:?})", p.lock().pid, pid, mode);
        Ok(pid)
    }

    /// Grow or shrink the calling process's memory by `delta` bytes.
    /// Returns the size before the change.
    pub fn grow_memory(&self, delta: isize) -> Result<usize> {
        let p = self.myproc().ok_or(Error::NoSuchProcess)?;
        self.grow_proc(p, delta)
    }

    pub(crate) fn grow_proc(&self, p: &Proc, delta: isize) -> Result<usize> {
        // Safety: only the running owner changes its own memory
        let space = unsafe { p.data_mut() }.space.ok_or(Error::BadAddress)?;
        let old = p.size();
        let new = if delta > 0 {
            let target = old.checked_add(delta as usize).ok_or(Error::OutOfMemory)?;
            self.vm.grow(space, old, target)?
        } else if delta < 0 {
            let target = old.checked_sub(delta.unsigned_abs()).ok_or(Error::BadAddress)?;
            self.vm.shrink(space, old, target)?
        } else {
            old
        };
        p.set_size(new);
        Ok(old)
    }
}

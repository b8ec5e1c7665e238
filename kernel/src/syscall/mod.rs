//! System calls available to user programs
//!
//! A user program receives a [`UserContext`] bound to its process. Every call
//! goes through the cooperative kill check on the way in and on the way out,
//! so a killed process exits at its next system call.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ksched_api::{Error, FileHandle, Pid, Result, Tick};

use crate::cpu;
use crate::process::{ExitRecord, Kernel, Proc, ProcInfo, UserDst, UserSrc};

/// The calling process's view of the kernel
pub struct UserContext<'a> {
    kernel: &'a Arc<Kernel>,
    proc: &'a Proc,
}

impl<'a> UserContext<'a> {
    pub(crate) fn new(kernel: &'a Arc<Kernel>, proc: &'a Proc) -> Self {
        Self { kernel, proc }
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        self.kernel
    }

    fn syscall<R>(&mut self, f: impl FnOnce(&Arc<Kernel>) -> R) -> R {
        self.kernel.check_killed();
        let ret = f(self.kernel);
        self.kernel.check_killed();
        ret
    }

    // ------------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------------

    /// Return register on entry: 0 in a fork child, 1 in the root process
    pub fn a0(&self) -> usize {
        self.arg(0).unwrap_or(0)
    }

    /// Argument register `n` (0..=7)
    pub fn arg(&self, n: usize) -> Option<usize> {
        // Safety: the context only exists while its process runs
        let data = unsafe { self.proc.data_mut() };
        data.trapframe.as_ref().and_then(|tf| tf.arg(n))
    }

    /// Set argument register `n`; children forked afterwards inherit it
    pub fn set_arg(&mut self, n: usize, value: usize) -> bool {
        // Safety: as above
        let data = unsafe { self.proc.data_mut() };
        data.trapframe.as_mut().is_some_and(|tf| tf.set_arg(n, value))
    }

    // ------------------------------------------------------------------------
    // Processes
    // ------------------------------------------------------------------------

    pub fn getpid(&mut self) -> Pid {
        let proc = self.proc;
        self.syscall(|_| proc.lock().pid)
    }

    pub fn getppid(&mut self) -> Option<Pid> {
        let idx = self.proc.index();
        self.syscall(|k| k.parent_pid(idx))
    }

    pub fn fork(&mut self) -> Result<Pid> {
        self.syscall(|k| k.fork())
    }

    pub fn fork_with_priority(&mut self, priority: i64) -> Result<Pid> {
        self.syscall(|k| k.fork_with_priority(priority))
    }

    pub fn fork_with_entry(&mut self, entry: usize) -> Result<Pid> {
        self.syscall(|k| k.fork_with_entry(entry))
    }

    pub fn exit(&mut self, status: i32) -> ! {
        self.kernel.exit(status)
    }

    pub fn wait(&mut self) -> Result<ExitRecord> {
        self.syscall(|k| k.wait(None))
    }

    /// Wait and store the child's status at `addr` in this process's memory
    pub fn wait_into(&mut self, addr: usize) -> Result<ExitRecord> {
        self.syscall(|k| k.wait(Some(addr)))
    }

    pub fn wait_for(&mut self, pid: Pid) -> Result<ExitRecord> {
        self.syscall(|k| k.wait_for(pid, None))
    }

    pub fn kill(&mut self, pid: Pid) -> Result<()> {
        self.syscall(|k| k.kill(pid))
    }

    pub fn yield_now(&mut self) {
        self.syscall(|k| k.yield_now())
    }

    /// Sleep for `n` ticks; fails if the process is killed meanwhile
    pub fn sleep_ticks(&mut self, n: Tick) -> Result<()> {
        self.syscall(|k| {
            let mut ticks = k.clock().lock();
            let start = *ticks;
            while *ticks - start < n {
                if k.killed() {
                    return Err(Error::Killed);
                }
                ticks = k.sleep(k.clock().chan(), ticks);
            }
            Ok(())
        })
    }

    pub fn uptime(&mut self) -> Tick {
        self.syscall(|k| k.uptime())
    }

    /// Grow or shrink memory by `delta`; returns the previous size
    pub fn sbrk(&mut self, delta: isize) -> Result<usize> {
        self.syscall(|k| k.grow_memory(delta))
    }

    /// Select this core's policy; returns the previous raw value
    pub fn schedpolicy(&mut self, policy: i32) -> i32 {
        self.syscall(|k| k.schedpolicy(policy))
    }

    pub fn ps(&mut self) -> Vec<ProcInfo> {
        self.syscall(|k| k.ps())
    }

    pub fn pinfo(&mut self, pid: Option<Pid>) -> Result<ProcInfo> {
        self.syscall(|k| k.pinfo(pid))
    }

    // ------------------------------------------------------------------------
    // User mode
    // ------------------------------------------------------------------------

    /// Run in user mode for `ticks` timer ticks.
    ///
    /// Each tick arrives as a timer interrupt, which may preempt the process
    /// or end it if it has been killed.
    pub fn compute(&mut self, ticks: Tick) {
        let k = self.kernel;
        for _ in 0..ticks {
            if k.is_halted() {
                // Park until the machine is torn down
                k.yield_now();
            }
            if cpu::cpuid() != Some(0) {
                // Only core 0 drives the clock
                let seen = k.uptime();
                while k.uptime() == seen && !k.is_halted() {
                    thread::sleep(Duration::from_micros(k.config().idle_wait_us));
                }
            }
            k.timer_interrupt();
        }
    }

    // ------------------------------------------------------------------------
    // Memory and files
    // ------------------------------------------------------------------------

    pub fn copy_out(&mut self, addr: usize, bytes: &[u8]) -> Result<()> {
        self.syscall(|k| k.either_copyout(UserDst::User(addr), bytes))
    }

    pub fn copy_in(&mut self, buf: &mut [u8], addr: usize) -> Result<()> {
        self.syscall(|k| k.either_copyin(buf, UserSrc::User(addr)))
    }

    /// Place `handle` in the lowest free descriptor
    pub fn install_file(&mut self, handle: FileHandle) -> Option<usize> {
        // Safety: the context only exists while its process runs
        let data = unsafe { self.proc.data_mut() };
        let fd = data.ofile.iter().position(Option::is_none)?;
        data.ofile[fd] = Some(handle);
        Some(fd)
    }

    pub fn file(&self, fd: usize) -> Option<FileHandle> {
        // Safety: as above
        let data = unsafe { self.proc.data_mut() };
        data.ofile.get(fd).copied().flatten()
    }
}

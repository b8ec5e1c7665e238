//! Booting the core on host threads

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ksched_api::{AddressSpaceManager, Error, FileLayer, Pid, Result, SchedConfig, TrapFrameAllocator};

use crate::host::{HeapFrames, HostFiles, HostSpaces};
use crate::process::{Kernel, UserFn};
use crate::syscall::UserContext;
use crate::trap::{self, Preemption, TimerPreemption};

/// Collects everything a machine needs before it boots
pub struct MachineBuilder {
    config: SchedConfig,
    vm: Arc<dyn AddressSpaceManager>,
    files: Arc<dyn FileLayer>,
    frames: Arc<dyn TrapFrameAllocator>,
    preemption: Box<dyn Preemption>,
    programs: Vec<(usize, UserFn)>,
}

impl MachineBuilder {
    /// Host collaborators and timer preemption unless replaced
    pub fn new(config: SchedConfig) -> Self {
        Self {
            config,
            vm: Arc::new(HostSpaces::new()),
            files: Arc::new(HostFiles::new()),
            frames: Arc::new(HeapFrames::new()),
            preemption: Box::new(TimerPreemption),
            programs: Vec::new(),
        }
    }

    pub fn address_spaces(mut self, vm: Arc<dyn AddressSpaceManager>) -> Self {
        self.vm = vm;
        self
    }

    pub fn files(mut self, files: Arc<dyn FileLayer>) -> Self {
        self.files = files;
        self
    }

    pub fn trap_frames(mut self, frames: Arc<dyn TrapFrameAllocator>) -> Self {
        self.frames = frames;
        self
    }

    pub fn preemption(mut self, preemption: Box<dyn Preemption>) -> Self {
        self.preemption = preemption;
        self
    }

    /// Register a user program at `entry`
    pub fn program<F>(mut self, entry: usize, program: F) -> Self
    where
        F: Fn(&mut UserContext<'_>) -> i32 + Send + Sync + 'static,
    {
        self.programs.push((entry, Arc::new(program)));
        self
    }

    /// Create the root process at `init_entry` and start every core
    pub fn boot(self, init_entry: usize) -> Result<Machine> {
        let kernel = Kernel::new(self.config, self.vm, self.files, self.frames, self.preemption)?;
        for (entry, program) in self.programs {
            kernel.register_program(entry, program);
        }
        let init = kernel.userinit(init_entry)?;
        log::debug!("boot: init pid {} on {} cpus", init, kernel.cpus().len());

        let mut cpus = Vec::with_capacity(kernel.cpus().len());
        for cpu in kernel.cpus().iter().cloned() {
            let k = Arc::clone(&kernel);
            let handle = thread::Builder::new()
                .name(format!("cpu{}", cpu.id))
                .spawn(move || {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| k.scheduler(cpu)));
                    if let Err(payload) = result {
                        k.record_fault(trap::panic_message(&*payload));
                    }
                })
                .map_err(|_| Error::OutOfMemory);
            match handle {
                Ok(handle) => cpus.push(handle),
                Err(e) => {
                    // Stops the cores already started
                    drop(Machine { kernel, init, cpus });
                    return Err(e);
                }
            }
        }
        Ok(Machine { kernel, init, cpus })
    }
}

/// A running machine; dropping it halts every core
pub struct Machine {
    kernel: Arc<Kernel>,
    init: Pid,
    cpus: Vec<JoinHandle<()>>,
}

impl Machine {
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn init_pid(&self) -> Pid {
        self.init
    }

    /// Stop every scheduler loop at its next iteration
    pub fn halt(&self) {
        self.kernel.halt();
    }

    /// The first fatal error, if any core or process hit one
    pub fn fault(&self) -> Option<String> {
        self.kernel.fault()
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.kernel.halt();
        for cpu in self.cpus.drain(..) {
            let _ = cpu.join();
        }
        self.kernel.retire_all();
    }
}

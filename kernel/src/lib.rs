//! KSched Kernel Library
//!
//! Process lifecycle and CPU scheduling core of a small multitasking kernel,
//! hosted on ordinary threads.
//!
//! # Architecture
//!
//! - **Process Management** (`process`): process table, fork/exit/wait, sleep/wakeup and kill
//! - **Scheduling** (`sched`): per-core scheduler loop with FCFS, Round-Robin, SJF and UNIX feedback
//! - **CPU** (`cpu`): per-core descriptors and simulated interrupt nesting
//! - **Traps** (`trap`): user/kernel boundary, timer interrupt and preemption trigger
//! - **System Calls** (`syscall`): the interface user programs run against
//! - **Host** (`host`): in-memory address spaces, files and trap frames
//!
//! # Usage
//!
//! ```no_run
//! use ksched::{MachineBuilder, SchedConfig};
//!
//! let machine = MachineBuilder::new(SchedConfig::default())
//!     .program(0x1000, |ctx| {
//!         loop {
//!             if ctx.wait().is_err() {
//!                 let _ = ctx.sleep_ticks(10);
//!             }
//!         }
//!     })
//!     .boot(0x1000)
//!     .expect("boot");
//! machine.kernel().procdump();
//! ```

/// Per-core state and interrupt control
pub mod cpu;

/// Host collaborators
pub mod host;

/// Boot and shutdown
pub mod machine;

/// Compile-time limits
pub mod param;

/// Process management
pub mod process;

/// Scheduling policies and batch statistics
pub mod sched;

/// Spin locks
pub mod sync;

/// System call surface
pub mod syscall;

/// Tick clock
pub mod time;

/// User/kernel boundary
pub mod trap;

pub use ksched_api::{
    Chan, Error, FileHandle, Pid, ProcState, Ratio, Result, SchedConfig, SchedPolicy, Tick, TrapFrame,
};
pub use machine::{Machine, MachineBuilder};
pub use process::{ExitRecord, Kernel, ProcInfo, UserFn};
pub use sched::policy::SchedParams;
pub use sched::stats::{BatchStats, BatchSummary};
pub use syscall::UserContext;
pub use trap::{Preemption, TimerPreemption};

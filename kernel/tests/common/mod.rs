//! Common test utilities for kernel integration tests

#![allow(dead_code)]

use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use ksched::{Machine, MachineBuilder, SchedConfig, SchedPolicy, UserContext};

/// Entry address of the root process program
pub const INIT: usize = 0x1000;

/// Entry address for programs started with `fork_with_entry`
pub const WORKER: usize = 0x2000;

/// How long a test waits for the machine before giving up
pub const TIMEOUT: Duration = Duration::from_secs(20);

/// Single-core configuration running `policy`
pub fn config(policy: SchedPolicy) -> SchedConfig {
    SchedConfig {
        default_policy: policy,
        nproc: 16,
        idle_wait_us: 100,
        ..SchedConfig::default()
    }
}

/// Boot a machine whose root process runs `init`
pub fn boot<F>(config: SchedConfig, init: F) -> Machine
where
    F: Fn(&mut UserContext<'_>) -> i32 + Send + Sync + 'static,
{
    MachineBuilder::new(config).program(INIT, init).boot(INIT).expect("boot")
}

/// Reap children until the machine is torn down; the root process may not exit
pub fn reap_forever(ctx: &mut UserContext<'_>) -> ! {
    loop {
        if ctx.wait().is_err() {
            let _ = ctx.sleep_ticks(5);
        }
    }
}

/// Yield until `pid` is SLEEPING.
///
/// The caller stays runnable, so the core never idles and no tick arrives
/// to wake a timed sleeper behind its back.
pub fn until_sleeping(ctx: &mut UserContext<'_>, pid: usize) {
    while ctx.kernel().state_of(pid) != Some(ksched::ProcState::Sleeping) {
        ctx.yield_now();
    }
}

pub fn recv<T>(rx: &Receiver<T>) -> T {
    rx.recv_timeout(TIMEOUT).expect("machine made no progress")
}

/// Receive exactly `n` values
pub fn recv_n<T>(rx: &Receiver<T>, n: usize) -> Vec<T> {
    (0..n).map(|_| recv(rx)).collect()
}

/// Poll until the machine records a fault
pub fn wait_fault(machine: &Machine) -> String {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if let Some(fault) = machine.fault() {
            return fault;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("no fault recorded");
}

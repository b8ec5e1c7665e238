//! Context switching between a core's scheduler and a process
//!
//! Every process owns a host thread that serves as its kernel stack, and every
//! core's scheduler loop runs on its own host thread. A [`Context`] is the
//! rendezvous for one of those threads: switching hands the core's single turn
//! to the target context and parks the caller until somebody hands a turn back
//! to it. At any instant at most one thread per core is not parked.

use std::io;
use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

use crate::cpu::{self, Cpu};

/// Unwinding payload of a thread whose context was retired while switched out
pub struct Abandoned;

/// Saved execution context of a scheduler loop or a process
pub struct Context {
    thread: spin::Once<Thread>,
    /// Set by whoever resumes this context, consumed by its thread
    turn: AtomicBool,
    /// Set once the owning slot is released; a parked thread then gives up
    retired: AtomicBool,
    /// Core the resumer was running on
    resume_on: spin::Mutex<Option<Arc<Cpu>>>,
}

impl Context {
    pub const fn new() -> Self {
        Self {
            thread: spin::Once::new(),
            turn: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            resume_on: spin::Mutex::new(None),
        }
    }

    /// Attach the calling thread, for contexts a scheduler loop runs on
    pub fn attach_current(&self) {
        self.thread.call_once(thread::current);
    }

    /// Start a kernel thread that waits for its first turn before running `body`.
    ///
    /// If the context is retired before it is ever resumed the thread exits
    /// without running `body`.
    pub fn spawn<F>(name: String, stack_size: usize, body: F) -> io::Result<Arc<Context>>
    where
        F: FnOnce() + Send + 'static,
    {
        let ctx = Arc::new(Context::new());
        let theirs = Arc::clone(&ctx);
        let handle = thread::Builder::new()
            .name(name)
            .stack_size(stack_size)
            .spawn(move || {
                if theirs.wait_turn() {
                    body();
                }
            })?;
        ctx.thread.call_once(|| handle.thread().clone());
        Ok(ctx)
    }

    /// Whether the context has been given up for good
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Give the context up; a thread still waiting for its first turn exits
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        if let Some(t) = self.thread.get() {
            t.unpark();
        }
    }

    fn resume(&self, on: Arc<Cpu>) {
        *self.resume_on.lock() = Some(on);
        self.turn.store(true, Ordering::Release);
        if let Some(t) = self.thread.get() {
            t.unpark();
        }
    }

    /// Park until resumed, then bind to the resuming core.
    /// Returns false if the context was retired instead.
    fn wait_turn(&self) -> bool {
        loop {
            if self.turn.swap(false, Ordering::AcqRel) {
                let on = self.resume_on.lock().take();
                cpu::bind(on);
                return true;
            }
            if self.is_retired() {
                return false;
            }
            thread::park();
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

fn this_cpu(what: &str) -> Arc<Cpu> {
    match cpu::current() {
        Some(c) => c,
        None => panic!("{}: not running on a cpu", what),
    }
}

/// Save the caller into `old` and resume `new` on the calling core.
///
/// Returns once some core resumes `old`; the caller is then bound to that core.
/// If `old` is retired instead (machine shutdown) the thread unwinds with
/// [`Abandoned`].
pub fn swtch(old: &Context, new: &Context) {
    new.resume(this_cpu("swtch"));
    if !old.wait_turn() {
        cpu::bind(None);
        panic::resume_unwind(Box::new(Abandoned));
    }
}

/// Resume `new` and abandon `old` for good (a zombie's last switch)
pub fn swtch_final(old: &Context, new: &Context) {
    let on = this_cpu("swtch_final");
    old.retired.store(true, Ordering::Release);
    cpu::bind(None);
    new.resume(on);
}

/// Hand the calling core back to `new` from a thread that will never run
/// again and has nothing to save
pub fn release_core(new: &Context) {
    let on = this_cpu("release_core");
    cpu::bind(None);
    new.resume(on);
}

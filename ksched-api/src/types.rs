//! Core types shared by the scheduler and its collaborators

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Process ID type
pub type Pid = usize;

/// Clock tick count
pub type Tick = u64;

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProcState {
    #[default]
    Unused,
    Used,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

impl ProcState {
    /// Short name used by process listings
    pub const fn name(self) -> &'static str {
        match self {
            ProcState::Unused => "unused",
            ProcState::Used => "used",
            ProcState::Sleeping => "sleep",
            ProcState::Runnable => "runble",
            ProcState::Running => "run",
            ProcState::Zombie => "zombie",
        }
    }
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-core dispatch policy.
///
/// The discriminants are the raw values accepted by the policy-selection
/// system call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum SchedPolicy {
    /// First come first served, no timer preemption
    #[default]
    Fcfs = 0,
    /// Non-preemptive shortest job first with burst prediction
    Sjf = 1,
    /// Round robin, timer preemption every tick
    RoundRobin = 2,
    /// UNIX style decayed-usage priority feedback
    Unix = 3,
}

impl SchedPolicy {
    pub const fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(SchedPolicy::Fcfs),
            1 => Ok(SchedPolicy::Sjf),
            2 => Ok(SchedPolicy::RoundRobin),
            3 => Ok(SchedPolicy::Unix),
            other => Err(Error::InvalidPolicy(other)),
        }
    }

    pub const fn raw(self) -> i32 {
        self as i32
    }

    /// Whether a timer tick forces the running process to yield
    pub const fn is_preemptive(self) -> bool {
        matches!(self, SchedPolicy::RoundRobin | SchedPolicy::Unix)
    }
}

impl fmt::Display for SchedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedPolicy::Fcfs => "FCFS",
            SchedPolicy::Sjf => "SJF",
            SchedPolicy::RoundRobin => "RR",
            SchedPolicy::Unix => "UNIX",
        };
        f.write_str(name)
    }
}

/// Sleep channel: an opaque token matched by equality.
///
/// Channels are normally derived from the address of the object a sleeper
/// waits on, so two distinct live objects never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chan(usize);

impl Chan {
    pub const fn new(token: usize) -> Self {
        Self(token)
    }

    /// Channel keyed by the address of `obj`
    pub fn of<T: ?Sized>(obj: &T) -> Self {
        Self(obj as *const T as *const () as usize)
    }

    pub const fn token(self) -> usize {
        self.0
    }
}

/// Address space handle issued by an [`AddressSpaceManager`](crate::AddressSpaceManager)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpaceId(pub u64);

/// Open file handle issued by a [`FileLayer`](crate::FileLayer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(pub u64);

/// Working directory reference issued by a [`FileLayer`](crate::FileLayer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirRef(pub u64);

/// Saved user register state
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// Saved user program counter
    pub epc: usize,
    /// User stack pointer
    pub sp: usize,
    /// Return address
    pub ra: usize,
    /// Return value / first argument
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a6: usize,
    pub a7: usize,
}

static_assertions::const_assert_eq!(core::mem::size_of::<TrapFrame>(), 11 * core::mem::size_of::<usize>());

impl TrapFrame {
    /// Argument register `n` (0 = a0 ... 7 = a7)
    pub fn arg(&self, n: usize) -> Option<usize> {
        Some(match n {
            0 => self.a0,
            1 => self.a1,
            2 => self.a2,
            3 => self.a3,
            4 => self.a4,
            5 => self.a5,
            6 => self.a6,
            7 => self.a7,
            _ => return None,
        })
    }

    pub fn set_arg(&mut self, n: usize, value: usize) -> bool {
        let slot = match n {
            0 => &mut self.a0,
            1 => &mut self.a1,
            2 => &mut self.a2,
            3 => &mut self.a3,
            4 => &mut self.a4,
            5 => &mut self.a5,
            6 => &mut self.a6,
            7 => &mut self.a7,
            _ => return false,
        };
        *slot = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_raw_values() {
        for raw in 0..4 {
            assert_eq!(SchedPolicy::from_raw(raw).map(SchedPolicy::raw), Ok(raw));
        }
        assert_eq!(SchedPolicy::from_raw(7), Err(Error::InvalidPolicy(7)));
    }

    #[test]
    fn test_chan_identity() {
        let a = 1u64;
        let b = 2u64;
        assert_eq!(Chan::of(&a), Chan::of(&a));
        assert_ne!(Chan::of(&a), Chan::of(&b));
    }

    #[test]
    fn test_trapframe_args() {
        let mut tf = TrapFrame::default();
        assert!(tf.set_arg(3, 42));
        assert_eq!(tf.arg(3), Some(42));
        assert!(!tf.set_arg(8, 1));
        assert_eq!(tf.arg(8), None);
    }
}

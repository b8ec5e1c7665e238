//! Scheduler configuration

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::SchedPolicy;

/// Upper bound on simulated cores
pub const NCPU: usize = 8;

/// Default process table capacity
pub const NPROC: usize = 64;

/// Default open files per process
pub const NOFILE: usize = 16;

/// A weight `numer / denom` in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    pub numer: i64,
    pub denom: i64,
}

impl Ratio {
    pub const fn new(numer: i64, denom: i64) -> Self {
        Self { numer, denom }
    }
}

/// Tunable parameters of the process table and scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedConfig {
    /// Process table capacity
    pub nproc: usize,
    /// Number of cores running a scheduler loop
    pub ncpu: usize,
    /// Open file slots per process
    pub nofile: usize,
    /// Policy every core starts with
    pub default_policy: SchedPolicy,
    /// Weight given to the previous estimate by the SJF burst predictor
    pub sjf_alpha: Ratio,
    /// Usage charged for a full quantum; sleeping charges half of it
    pub cpu_usage_unit: i64,
    /// Usage is divided by this once per scheduling pass
    pub usage_decay_divisor: i64,
    /// Effective priority adds `usage / usage_priority_divisor`
    pub usage_priority_divisor: i64,
    /// Priority assigned to freshly allocated slots
    pub priority_sentinel: i64,
    /// Stack size of each process kernel thread, in bytes
    pub kstack_size: usize,
    /// How long an idle core waits before rescanning, in microseconds
    pub idle_wait_us: u64,
    pub page_size: usize,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            nproc: NPROC,
            ncpu: 1,
            nofile: NOFILE,
            default_policy: SchedPolicy::Fcfs,
            sjf_alpha: Ratio::new(1, 2),
            cpu_usage_unit: 200,
            usage_decay_divisor: 2,
            usage_priority_divisor: 2,
            priority_sentinel: -1_000_000,
            kstack_size: 256 * 1024,
            idle_wait_us: 500,
            page_size: 4096,
        }
    }
}

impl SchedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nproc == 0 {
            return Err(Error::InvalidConfig("nproc must be non-zero"));
        }
        if self.ncpu == 0 || self.ncpu > NCPU {
            return Err(Error::InvalidConfig("ncpu out of range"));
        }
        if self.nofile == 0 {
            return Err(Error::InvalidConfig("nofile must be non-zero"));
        }
        if self.sjf_alpha.denom <= 0 || self.sjf_alpha.numer < 0 || self.sjf_alpha.numer > self.sjf_alpha.denom {
            return Err(Error::InvalidConfig("sjf_alpha must lie in [0, 1]"));
        }
        if self.cpu_usage_unit < 0 {
            return Err(Error::InvalidConfig("cpu_usage_unit must not be negative"));
        }
        if self.usage_decay_divisor <= 0 || self.usage_priority_divisor <= 0 {
            return Err(Error::InvalidConfig("usage divisors must be positive"));
        }
        if self.kstack_size == 0 || self.page_size == 0 {
            return Err(Error::InvalidConfig("stack and page sizes must be non-zero"));
        }
        Ok(())
    }
}

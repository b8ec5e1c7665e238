//! Batch-epoch statistics
//!
//! Each core accumulates timing data for the batch processes that finish on
//! it. Once as many batch processes have completed as were announced by
//! `fork_with_priority`, the epoch closes: a [`BatchSummary`] is produced and
//! every accumulator returns to its empty state.

use core::fmt;

use ksched_api::{SchedPolicy, Tick};

/// Count, sum and extremes of a series of samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub count: u64,
    pub total: i64,
    pub max: i64,
    pub min: i64,
}

impl Aggregate {
    pub fn add(&mut self, value: i64) {
        if self.count == 0 {
            self.max = value;
            self.min = value;
        } else {
            self.max = self.max.max(value);
            self.min = self.min.min(value);
        }
        self.count += 1;
        self.total += value;
    }

    /// Integer mean, 0 for an empty series
    pub fn avg(&self) -> i64 {
        if self.count == 0 { 0 } else { self.total / self.count as i64 }
    }
}

/// What `exit` hands to the accumulators for one batch process
#[derive(Debug, Clone, Copy)]
pub struct ExitSample {
    pub ctime: Tick,
    pub endtime: Tick,
    pub wait_time: i64,
    pub burst_start: Option<Tick>,
    pub predicted: i64,
}

/// Per-core batch accumulators
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Batch processes announced for the current epoch
    pub expected: u64,
    pub completed: u64,
    /// Tick at which the epoch started, if known
    pub epoch_start: Option<Tick>,
    pub turnaround: i64,
    pub waiting: i64,
    /// End ticks of completed processes
    pub completion: Aggregate,
    pub bursts: Aggregate,
    pub estimates: Aggregate,
    pub errors: Aggregate,
}

impl BatchStats {
    pub fn is_empty(&self) -> bool {
        *self == BatchStats::default()
    }

    /// Set the epoch start unless one is already recorded
    pub fn begin_epoch_if_unset(&mut self, tick: Tick) {
        if self.epoch_start.is_none() {
            self.epoch_start = Some(tick);
        }
    }

    /// Fold in one measured burst and the estimate that followed it
    pub fn record_burst(&mut self, measured: i64, previous: i64, next: i64) {
        let err = (measured - previous).abs();
        if err > 0 && measured > 0 && previous > 0 {
            self.errors.add(err);
        }
        if measured != 0 {
            self.bursts.add(measured);
        }
        if next != 0 {
            self.estimates.add(next);
        }
    }

    /// Fold in a batch process that just became a zombie
    pub fn record_exit(&mut self, sample: ExitSample, policy: SchedPolicy) {
        self.completed += 1;
        self.turnaround += sample.endtime as i64 - sample.ctime as i64;
        self.waiting += sample.wait_time;
        self.completion.add(sample.endtime as i64);

        if policy == SchedPolicy::Sjf {
            if let Some(start) = sample.burst_start {
                let t = sample.endtime as i64 - start as i64;
                let err = (t - sample.predicted).abs();
                if t > 0 {
                    self.bursts.add(t);
                }
                if err != 0 && t > 0 && sample.predicted > 0 {
                    self.errors.add(err);
                }
            }
        }
    }

    /// Close the epoch if every announced process has completed
    pub fn try_close(&mut self, now: Tick, policy: SchedPolicy) -> Option<BatchSummary> {
        if self.completed == 0 || self.completed != self.expected {
            return None;
        }
        let jobs = self.expected as i64;
        let summary = BatchSummary {
            policy,
            jobs: self.expected,
            execution_time: self.epoch_start.map(|start| now.saturating_sub(start)),
            avg_turnaround: self.turnaround / jobs,
            avg_waiting: self.waiting / jobs,
            completion: self.completion,
            bursts: (policy == SchedPolicy::Sjf).then(|| BurstReport {
                bursts: self.bursts,
                estimates: self.estimates,
                errors: self.errors,
            }),
        };
        *self = BatchStats::default();
        Some(summary)
    }
}

/// Burst prediction figures of an SJF epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstReport {
    pub bursts: Aggregate,
    pub estimates: Aggregate,
    pub errors: Aggregate,
}

/// Aggregate report of a closed batch epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub policy: SchedPolicy,
    pub jobs: u64,
    pub execution_time: Option<Tick>,
    pub avg_turnaround: i64,
    pub avg_waiting: i64,
    pub completion: Aggregate,
    pub bursts: Option<BurstReport>,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.execution_time {
            Some(t) => writeln!(f, "Batch execution time: {}", t)?,
            None => writeln!(f, "Batch execution time: unknown")?,
        }
        writeln!(f, "Average turn-around time: {}", self.avg_turnaround)?;
        writeln!(f, "Average waiting time: {}", self.avg_waiting)?;
        write!(
            f,
            "Completion time: avg: {}, max: {}, min: {}",
            self.completion.avg(),
            self.completion.max,
            self.completion.min
        )?;
        if let Some(b) = &self.bursts {
            writeln!(f)?;
            writeln!(
                f,
                "CPU bursts: count: {}, avg: {}, max: {}, min: {}",
                b.bursts.count,
                b.bursts.avg(),
                b.bursts.max,
                b.bursts.min
            )?;
            writeln!(
                f,
                "CPU burst estimates: count: {}, avg: {}, max: {}, min: {}",
                b.estimates.count,
                b.estimates.avg(),
                b.estimates.max,
                b.estimates.min
            )?;
            write!(f, "CPU burst estimation error: count: {}, avg: {}", b.errors.count, b.errors.avg())?;
        }
        Ok(())
    }
}

//! Selection arithmetic shared by the SJF and UNIX feedback passes

use ksched_api::{Ratio, Tick};

/// Scheduling accounting carried by every process slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedParams {
    /// Base priority; lower runs first under UNIX feedback
    pub priority: i64,
    /// Predicted length of the next CPU burst
    pub next_burst_len: i64,
    /// Opted into SJF/feedback selection and batch statistics
    pub batch: bool,
    pub cpu_usage: i64,
    /// Usage as of the last decay
    pub prev_cpu_usage: i64,
    /// Ticks spent RUNNABLE, summed over completed waits
    pub wait_time: i64,
    /// Start of the current wait, if RUNNABLE
    pub wait_st_time: Option<Tick>,
    /// Tick of the last SJF dispatch
    pub prev_burst_start: Option<Tick>,
}

impl SchedParams {
    pub const fn fresh(priority_sentinel: i64) -> Self {
        Self {
            priority: priority_sentinel,
            next_burst_len: 0,
            batch: false,
            cpu_usage: 0,
            prev_cpu_usage: 0,
            wait_time: 0,
            wait_st_time: None,
            prev_burst_start: None,
        }
    }

    /// Close the current wait period at `now`
    pub fn account_wait(&mut self, now: Tick) {
        if let Some(start) = self.wait_st_time.take() {
            self.wait_time += now.saturating_sub(start) as i64;
        }
    }

    /// Total waiting time as seen at `now`, including an open wait
    pub fn waiting_at(&self, now: Tick) -> i64 {
        let open = self.wait_st_time.map_or(0, |start| now.saturating_sub(start) as i64);
        open + self.wait_time
    }
}

/// Exponentially smoothed burst prediction:
/// `(1 - alpha) * measured + alpha * previous`, in integer ticks.
pub fn predict_next_burst(measured: i64, previous: i64, alpha: Ratio) -> i64 {
    measured - (alpha.numer * measured) / alpha.denom + (alpha.numer * previous) / alpha.denom
}

/// Decay usage at most once per observation: only when it moved since the last decay
pub fn decay_usage(params: &mut SchedParams, divisor: i64) {
    if params.cpu_usage != params.prev_cpu_usage {
        params.cpu_usage /= divisor;
        params.prev_cpu_usage = params.cpu_usage;
    }
}

pub fn effective_priority(params: &SchedParams, divisor: i64) -> i64 {
    params.priority + params.cpu_usage / divisor
}

/// A RUNNABLE batch process as ranked by the feedback pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub priority: i64,
    pub waiting: i64,
}

impl Candidate {
    /// Lower effective priority wins; on a tie the longer waiter wins.
    /// An exact tie keeps the incumbent.
    pub fn beats(&self, leader: &Candidate) -> bool {
        self.priority < leader.priority || (self.priority == leader.priority && self.waiting > leader.waiting)
    }
}

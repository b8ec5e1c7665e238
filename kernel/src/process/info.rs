//! Process listing

use std::fmt;

use ksched_api::{Error, Pid, ProcState, Result, Tick};
use serde::Serialize;

use super::manager::{Kernel, Proc};

/// One row of the process listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcInfo {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub state: ProcState,
    pub name: String,
    pub ctime: Tick,
    pub stime: Option<Tick>,
    /// Ticks since start, frozen at exit
    pub etime: Option<Tick>,
    pub size: usize,
}

fn or_unset(v: Option<i64>) -> i64 {
    v.unwrap_or(-1)
}

impl fmt::Display for ProcInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid={}, ppid={}, state={}, cmd={}, ctime={}, stime={}, etime={}, size={:#x}",
            self.pid,
            or_unset(self.ppid.map(|p| p as i64)),
            self.state,
            self.name,
            self.ctime,
            or_unset(self.stime.map(|t| t as i64)),
            or_unset(self.etime.map(|t| t as i64)),
            self.size,
        )
    }
}

impl Kernel {
    fn info_of(&self, p: &Proc, parents: &[Option<usize>]) -> Option<ProcInfo> {
        let now = self.clock.now();
        let ppid = parents[p.index()].map(|parent| self.procs[parent].lock().pid);
        let inner = p.lock();
        if inner.state == ProcState::Unused {
            return None;
        }
        let etime = inner.stime.map(|start| inner.endtime.unwrap_or(now).saturating_sub(start));
        Some(ProcInfo {
            pid: inner.pid,
            ppid,
            state: inner.state,
            name: inner.name.as_str().into(),
            ctime: inner.ctime,
            stime: inner.stime,
            etime,
            size: p.size(),
        })
    }

    /// Every live process, in slot order
    pub fn ps(&self) -> Vec<ProcInfo> {
        let parents = self.parents.lock();
        self.procs.iter().filter_map(|p| self.info_of(p, &parents)).collect()
    }

    /// One process, or the caller if `pid` is `None`
    pub fn pinfo(&self, pid: Option<Pid>) -> Result<ProcInfo> {
        let target = match pid {
            Some(pid) => pid,
            None => self.myproc().ok_or(Error::NoSuchProcess)?.lock().pid,
        };
        self.ps().into_iter().find(|info| info.pid == target).ok_or(Error::NoSuchProcess)
    }

    /// Print the process listing to the log. No locks beyond the listing's own.
    pub fn procdump(&self) {
        log::info!("");
        for info in self.ps() {
            log::info!("{}", info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_marks_unset_stamps() {
        let info = ProcInfo {
            pid: 3,
            ppid: None,
            state: ProcState::Runnable,
            name: "sh".into(),
            ctime: 7,
            stime: None,
            etime: None,
            size: 0x3000,
        };
        assert_eq!(
            info.to_string(),
            "pid=3, ppid=-1, state=runble, cmd=sh, ctime=7, stime=-1, etime=-1, size=0x3000"
        );
    }

    #[test]
    fn test_serializes_state_and_stamps() {
        let info = ProcInfo {
            pid: 1,
            ppid: None,
            state: ProcState::Sleeping,
            name: "initcode".into(),
            ctime: 0,
            stime: Some(1),
            etime: Some(9),
            size: 4096,
        };
        let json = serde_json::to_value(&info).expect("serialize");
        assert_eq!(json["stime"], 1);
        assert_eq!(json["ppid"], serde_json::Value::Null);
        assert_eq!(json["name"], "initcode");
    }
}

//! Supervised process execution.
//!
//! The supervisor owns every OS process it spawns: each child runs in its
//! own process group, is bounded by a per-process execution ceiling, and is
//! terminated with a graceful-then-forced escalation on timeout, explicit
//! kill, or shutdown. No tracked process survives `kill_all`.

mod supervisor;

pub use supervisor::ProcessSupervisor;

use std::time::Duration;

use serde::Serialize;

/// Caller-visible handle for a supervised process, unique for the
/// supervisor's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProcessId(pub u64);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a tracked process.
///
/// `Running → Completed` when the process exits on its own;
/// `Running → TimedOut → Killed` when the deadline elapses and the
/// supervisor escalates. `Completed` and `Killed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Running,
    Completed,
    TimedOut,
    Killed,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Completed | ProcessState::Killed)
    }
}

/// Final outcome of awaiting a supervised process.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub id: ProcessId,
    pub state: ProcessState,
    /// True when the execution ceiling elapsed and the supervisor escalated.
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip)]
    pub duration: Duration,
}

//! The process supervisor: spawn, bounded wait, escalated termination.
//!
//! Every spawned child is placed in its own process group (POSIX) so the
//! whole subtree can be signaled atomically. Termination always follows the
//! same escalation: graceful signal to the group, a fixed grace window,
//! then a forced kill. A process that is already gone counts as terminated.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{ExecutionOutcome, ProcessId, ProcessState};

/// Grace window between the graceful signal and the forced kill.
const GRACE_WINDOW: Duration = Duration::from_secs(3);

/// Per-stream capture ceiling. Output beyond this is dropped, not buffered.
const MAX_CAPTURED_BYTES: usize = 512 * 1024;

/// One spawned OS process under supervision.
///
/// The `Child` is owned exclusively by the supervisor; waiting paths take
/// the child lock, signaling paths go through the process group id and the
/// state channel, so no process is ever signaled by two paths at once.
#[derive(Debug)]
struct Tracked {
    pid: Option<u32>,
    started_at: Instant,
    deadline: Instant,
    state: watch::Sender<ProcessState>,
    child: Arc<tokio::sync::Mutex<Option<Child>>>,
}

/// Owns and supervises every process spawned through it.
#[derive(Debug)]
pub struct ProcessSupervisor {
    procs: Mutex<HashMap<ProcessId, Arc<Tracked>>>,
    next_id: AtomicU64,
    grace: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            procs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            grace: GRACE_WINDOW,
        }
    }

    /// Spawn `command` through the user's shell and start tracking it.
    ///
    /// The child gets its own process group on POSIX, null stdin, and piped
    /// stdout/stderr. `max_execution_time` fixes the deadline used by
    /// [`await_completion`](Self::await_completion).
    pub fn spawn(
        &self,
        command: &str,
        working_dir: &Path,
        max_execution_time: Duration,
    ) -> Result<ProcessId> {
        let mut cmd = shell_command(command);
        cmd.current_dir(working_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Last line of defense against orphans if a waiting future is dropped.
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn command: {command}"))?;
        let pid = child.id();

        let id = ProcessId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (state, _) = watch::channel(ProcessState::Running);
        let now = Instant::now();
        let tracked = Arc::new(Tracked {
            pid,
            started_at: now,
            deadline: now + max_execution_time,
            state,
            child: Arc::new(tokio::sync::Mutex::new(Some(child))),
        });

        self.procs
            .lock()
            .map_err(|e| anyhow!("process table lock poisoned: {e}"))?
            .insert(id, tracked);

        debug!("spawned process {id} (pid {pid:?}): {command}");
        Ok(id)
    }

    /// OS pid of a tracked process, if it is still tracked.
    pub fn pid_of(&self, id: ProcessId) -> Option<u32> {
        self.procs
            .lock()
            .ok()
            .and_then(|m| m.get(&id).and_then(|t| t.pid))
    }

    /// Number of tracked processes that have not reached a terminal state.
    pub fn running_count(&self) -> usize {
        self.procs
            .lock()
            .map(|m| {
                m.values()
                    .filter(|t| !t.state.borrow().is_terminal())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Wait for a tracked process to exit, bounded by its deadline or an
    /// explicit `timeout`, whichever is sooner.
    ///
    /// Stdout and stderr are drained concurrently with the wait, capped per
    /// stream. If the bound elapses first, the escalation sequence runs
    /// before a timed-out outcome is returned. The process is untracked once
    /// the outcome is terminal.
    pub async fn await_completion(
        &self,
        id: ProcessId,
        timeout: Option<Duration>,
    ) -> Result<ExecutionOutcome> {
        let tracked = self
            .get(id)?
            .ok_or_else(|| anyhow!("unknown process handle: {id}"))?;

        let mut slot = tracked.child.clone().lock_owned().await;
        let child = slot
            .as_mut()
            .ok_or_else(|| anyhow!("process {id} already reaped"))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut remaining = tracked.deadline.saturating_duration_since(Instant::now());
        if let Some(timeout) = timeout {
            remaining = remaining.min(timeout);
        }

        let waited = tokio::time::timeout(remaining, async {
            let (out, err, status) =
                tokio::join!(drain_capped(stdout), drain_capped(stderr), child.wait());
            (out, err, status)
        })
        .await;

        let duration = tracked.started_at.elapsed();
        let outcome = match waited {
            Ok((stdout, stderr, Ok(status))) => {
                tracked.state.send_replace(ProcessState::Completed);
                *slot = None; // reaped by wait()
                debug!("process {id} completed with {status}");
                ExecutionOutcome {
                    id,
                    state: ProcessState::Completed,
                    timed_out: false,
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    duration,
                }
            }
            Ok((_, _, Err(e))) => {
                // The wait itself failed; make sure nothing lingers.
                self.escalate(&tracked, &mut slot).await;
                self.untrack(id);
                return Err(anyhow!("failed to wait for process {id}: {e}"));
            }
            Err(_) => {
                warn!("process {id} exceeded its execution ceiling, escalating");
                tracked.state.send_replace(ProcessState::TimedOut);
                self.escalate(&tracked, &mut slot).await;
                ExecutionOutcome {
                    id,
                    state: ProcessState::Killed,
                    timed_out: true,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration,
                }
            }
        };

        self.untrack(id);
        Ok(outcome)
    }

    /// Explicitly terminate one tracked process with the escalation policy.
    ///
    /// A process that already exited is treated as successfully terminated.
    pub async fn kill_process(&self, id: ProcessId) -> Result<()> {
        let tracked = self
            .get(id)?
            .ok_or_else(|| anyhow!("unknown process handle: {id}"))?;
        self.terminate_tracked(id, &tracked).await;
        self.untrack(id);
        Ok(())
    }

    /// Terminate every tracked process and clear the tracking map.
    ///
    /// Individual failures are logged and do not abort the batch; processes
    /// that already exited out-of-band count as terminated. The map is
    /// cleared unconditionally, so nothing stays tracked after this returns.
    pub async fn kill_all(&self) -> Vec<ProcessId> {
        let entries: Vec<(ProcessId, Arc<Tracked>)> = match self.procs.lock() {
            Ok(mut map) => map.drain().collect(),
            Err(e) => {
                warn!("process table lock poisoned during shutdown: {e}");
                Vec::new()
            }
        };

        let mut terminated = Vec::with_capacity(entries.len());
        for (id, tracked) in entries {
            if !tracked.state.borrow().is_terminal() {
                self.terminate_tracked(id, &tracked).await;
            }
            terminated.push(id);
        }

        // The drain above already emptied the table, but a spawn racing
        // shutdown must not leave a stray entry behind.
        if let Ok(mut map) = self.procs.lock() {
            map.clear();
        }

        if !terminated.is_empty() {
            info!("terminated {} supervised processes", terminated.len());
        }
        terminated.sort();
        terminated
    }

    /// Run the escalation against one tracked process, whichever path
    /// currently owns its child.
    async fn terminate_tracked(&self, id: ProcessId, tracked: &Arc<Tracked>) {
        match tracked.child.clone().try_lock_owned() {
            Ok(mut slot) => self.escalate(tracked, &mut slot).await,
            Err(_) => {
                // A waiter owns the child; signal the group and let the
                // waiter observe the exit.
                signal_group(tracked.pid, TERM_SIGNAL);
                let mut rx = tracked.state.subscribe();
                let exited = tokio::time::timeout(self.grace, async {
                    rx.wait_for(|s| s.is_terminal()).await.ok();
                })
                .await
                .is_ok();
                if !exited {
                    warn!("process {id} survived graceful termination, forcing kill");
                    signal_group(tracked.pid, KILL_SIGNAL);
                }
            }
        }
    }

    /// Graceful-then-forced termination of a child we own.
    ///
    /// POSIX: SIGTERM to the process group, grace window, SIGKILL to the
    /// group. Elsewhere: terminate-then-kill on the single child handle.
    async fn escalate(&self, tracked: &Tracked, slot: &mut tokio::sync::OwnedMutexGuard<Option<Child>>) {
        if cfg!(unix) {
            signal_group(tracked.pid, TERM_SIGNAL);
        } else if let Some(child) = slot.as_mut() {
            if let Err(e) = child.start_kill() {
                debug!("terminate request failed (likely already exited): {e}");
            }
        }

        let exited = match slot.as_mut() {
            Some(child) => tokio::time::timeout(self.grace, child.wait()).await.is_ok(),
            None => true,
        };

        if !exited {
            signal_group(tracked.pid, KILL_SIGNAL);
            if let Some(child) = slot.as_mut() {
                if !cfg!(unix) {
                    if let Err(e) = child.kill().await {
                        debug!("forced kill failed (likely already exited): {e}");
                    }
                }
                // SIGKILL cannot be ignored; reap the child.
                if let Err(e) = child.wait().await {
                    warn!("failed to reap killed process: {e}");
                }
            }
        }

        **slot = None;
        tracked.state.send_replace(ProcessState::Killed);
    }

    fn get(&self, id: ProcessId) -> Result<Option<Arc<Tracked>>> {
        Ok(self
            .procs
            .lock()
            .map_err(|e| anyhow!("process table lock poisoned: {e}"))?
            .get(&id)
            .cloned())
    }

    fn untrack(&self, id: ProcessId) {
        if let Ok(mut map) = self.procs.lock() {
            map.remove(&id);
        }
    }
}

/// Build the platform shell invocation for a command string.
fn shell_command(command: &str) -> Command {
    #[cfg(unix)]
    {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        let mut cmd = Command::new(shell);
        cmd.arg("-c").arg(command);
        cmd
    }
    #[cfg(not(unix))]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
}

/// Read a child stream to EOF with a byte ceiling, lossily decoded.
///
/// The stream is always consumed to EOF: closing the read end while the
/// child is still writing would kill it with SIGPIPE. Bytes past the
/// ceiling are discarded, not buffered.
async fn drain_capped<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 16 * 1024];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = MAX_CAPTURED_BYTES.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(unix)]
const TERM_SIGNAL: libc::c_int = libc::SIGTERM;
#[cfg(unix)]
const KILL_SIGNAL: libc::c_int = libc::SIGKILL;
#[cfg(not(unix))]
const TERM_SIGNAL: i32 = 15;
#[cfg(not(unix))]
const KILL_SIGNAL: i32 = 9;

/// Signal an entire process group. Returns true when the signal was
/// delivered or the group is already gone (ESRCH is success: termination
/// is idempotent).
#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: libc::c_int) -> bool {
    let Some(pid) = pid else {
        return true;
    };
    // SAFETY: killpg is a plain syscall; the pid is one we spawned with
    // process_group(0), so the group id equals the child pid.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, signal) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
}

/// No process-group semantics off POSIX; signaling happens through the
/// child handle instead.
#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: i32) -> bool {
    true
}

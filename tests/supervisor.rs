//! Integration tests for the process supervisor: bounded execution,
//! escalated termination, and total cleanup on bulk shutdown.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use warden::process::{ProcessState, ProcessSupervisor};

fn workdir() -> std::path::PathBuf {
    std::env::temp_dir()
}

#[tokio::test]
async fn completed_process_reports_output() {
    let supervisor = ProcessSupervisor::new();
    let id = supervisor
        .spawn("echo hello", &workdir(), Duration::from_secs(5))
        .unwrap();

    let outcome = supervisor.await_completion(id, None).await.unwrap();
    assert_eq!(outcome.state, ProcessState::Completed);
    assert!(!outcome.timed_out);
    assert_eq!(outcome.exit_code, Some(0));
    assert!(outcome.stdout.contains("hello"));
    assert_eq!(supervisor.running_count(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn large_output_completes_with_capped_capture() {
    let supervisor = ProcessSupervisor::new();
    // 2 MiB of output, well past the capture ceiling. The writer must run
    // to completion; a dropped pipe would kill it with SIGPIPE mid-write.
    let id = supervisor
        .spawn(
            "dd if=/dev/zero bs=1024 count=2048 2>/dev/null; echo done-marker",
            &workdir(),
            Duration::from_secs(10),
        )
        .unwrap();

    let outcome = supervisor.await_completion(id, None).await.unwrap();
    assert_eq!(outcome.state, ProcessState::Completed);
    assert!(!outcome.timed_out);
    assert_eq!(outcome.exit_code, Some(0));
    // Capture is truncated at the ceiling, not unbounded.
    assert!(outcome.stdout.len() <= 512 * 1024);
    assert!(!outcome.stdout.is_empty());
}

#[tokio::test]
async fn nonzero_exit_is_completed() {
    let supervisor = ProcessSupervisor::new();
    let id = supervisor
        .spawn("exit 3", &workdir(), Duration::from_secs(5))
        .unwrap();

    let outcome = supervisor.await_completion(id, None).await.unwrap();
    assert_eq!(outcome.state, ProcessState::Completed);
    assert_eq!(outcome.exit_code, Some(3));
}

#[cfg(unix)]
#[tokio::test]
async fn timeout_escalates_and_removes_from_process_table() {
    let supervisor = ProcessSupervisor::new();
    let id = supervisor
        .spawn("sleep 10", &workdir(), Duration::from_secs(1))
        .unwrap();
    let pid = supervisor.pid_of(id).unwrap();

    let outcome = supervisor.await_completion(id, None).await.unwrap();
    assert!(outcome.timed_out);
    assert_eq!(outcome.state, ProcessState::Killed);
    assert_eq!(outcome.exit_code, None);
    assert_eq!(supervisor.running_count(), 0);

    // The process must be gone from the OS process table (reaped, not a
    // zombie): signal 0 probes existence.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    assert_eq!(rc, -1);
    assert_eq!(
        std::io::Error::last_os_error().raw_os_error(),
        Some(libc::ESRCH)
    );
}

#[tokio::test]
async fn explicit_kill_terminates_running_process() {
    let supervisor = ProcessSupervisor::new();
    let id = supervisor
        .spawn("sleep 30", &workdir(), Duration::from_secs(60))
        .unwrap();
    assert_eq!(supervisor.running_count(), 1);

    supervisor.kill_process(id).await.unwrap();
    assert_eq!(supervisor.running_count(), 0);

    // The handle is gone afterwards.
    assert!(supervisor.await_completion(id, None).await.is_err());
}

#[tokio::test]
async fn kill_all_returns_every_id_even_when_some_exited() {
    let supervisor = ProcessSupervisor::new();
    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            supervisor
                .spawn("sleep 30", &workdir(), Duration::from_secs(60))
                .unwrap(),
        );
    }
    // One process exits out-of-band before shutdown.
    ids.push(
        supervisor
            .spawn("true", &workdir(), Duration::from_secs(60))
            .unwrap(),
    );
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut terminated = supervisor.kill_all().await;
    terminated.sort();
    ids.sort();
    assert_eq!(terminated, ids);
    assert_eq!(supervisor.running_count(), 0);
}

#[tokio::test]
async fn kill_all_on_empty_supervisor_is_safe() {
    let supervisor = ProcessSupervisor::new();
    assert!(supervisor.kill_all().await.is_empty());
    assert!(supervisor.kill_all().await.is_empty());
}

#[tokio::test]
async fn unknown_handle_is_an_error() {
    let supervisor = ProcessSupervisor::new();
    let id = supervisor
        .spawn("true", &workdir(), Duration::from_secs(5))
        .unwrap();
    let _ = supervisor.await_completion(id, None).await.unwrap();

    // Handle was removed once terminal.
    assert!(supervisor.await_completion(id, None).await.is_err());
    assert!(supervisor.kill_process(id).await.is_err());
}

#[tokio::test]
async fn spawn_failure_is_reported_not_panicked() {
    let supervisor = ProcessSupervisor::new();
    // Working directory that does not exist makes the spawn itself fail.
    let result = supervisor.spawn(
        "true",
        std::path::Path::new("/definitely/not/a/dir"),
        Duration::from_secs(5),
    );
    assert!(result.is_err());
    assert_eq!(supervisor.running_count(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn process_group_kill_takes_children_down() {
    let supervisor = ProcessSupervisor::new();
    // Parent shell spawns a child sleep; killing the group must take the
    // child down too, not orphan it.
    let id = supervisor
        .spawn("sleep 30 & wait", &workdir(), Duration::from_secs(1))
        .unwrap();
    let pgid = supervisor.pid_of(id).unwrap();

    let outcome = supervisor.await_completion(id, None).await.unwrap();
    assert!(outcome.timed_out);

    // Give init a moment to reap the reparented child.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Nothing in the group may survive.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, 0) };
    assert_eq!(rc, -1);
    assert_eq!(
        std::io::Error::last_os_error().raw_os_error(),
        Some(libc::ESRCH)
    );
}

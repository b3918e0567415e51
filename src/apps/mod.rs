//! Application control: terminate, focus, and minimize by application name.
//!
//! This is the only part of the engine with OS-specific branches and
//! external-tool dependencies, so it is isolated behind a platform strategy
//! picked once at startup. Every platform call is a bounded external
//! invocation with captured output; a missing automation tool is a reported
//! condition, never a fault.

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

/// Ceiling on any single platform automation call.
const INVOKE_TIMEOUT: Duration = Duration::from_secs(5);

/// High-level application actions supported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppAction {
    Terminate,
    Focus,
    Minimize,
}

impl std::str::FromStr for AppAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "terminate" => Ok(AppAction::Terminate),
            "focus" => Ok(AppAction::Focus),
            "minimize" => Ok(AppAction::Minimize),
            other => Err(anyhow::anyhow!("unknown application action: {other}")),
        }
    }
}

/// Uniform result shape for every platform branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppOutcome {
    /// Processes matching the application name were signaled.
    Terminated { pids: Vec<u32> },
    /// The action succeeded via the named automation facility.
    Done { method: &'static str },
    /// The action is not supported on this platform.
    Unsupported { reason: String },
    /// The required external automation tool is absent.
    ToolMissing { tool: &'static str },
    /// The platform call ran but reported failure.
    Failed { reason: String },
}

impl AppOutcome {
    pub fn success(&self) -> bool {
        matches!(self, AppOutcome::Terminated { .. } | AppOutcome::Done { .. })
    }
}

/// Closed set of platform capabilities, selected once at startup. Avoids
/// re-branching on OS names at every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Platform {
    MacOs,
    LinuxDesktop,
    Unsupported,
}

impl Platform {
    fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "linux") {
            Platform::LinuxDesktop
        } else {
            Platform::Unsupported
        }
    }
}

/// Thin platform-branching adapter mapping application actions onto OS
/// automation facilities.
#[derive(Debug)]
pub struct AppController {
    platform: Platform,
}

impl Default for AppController {
    fn default() -> Self {
        Self::new()
    }
}

impl AppController {
    pub fn new() -> Self {
        Self {
            platform: Platform::detect(),
        }
    }

    /// Dispatch one application action.
    pub async fn control(&self, name: &str, action: AppAction) -> AppOutcome {
        if name.trim().is_empty() {
            return AppOutcome::Failed {
                reason: "empty application name".to_string(),
            };
        }
        match action {
            AppAction::Terminate => self.terminate(name).await,
            AppAction::Focus => self.focus(name).await,
            AppAction::Minimize => self.minimize(name).await,
        }
    }

    /// Enumerate processes matching `name` and request termination of each.
    async fn terminate(&self, name: &str) -> AppOutcome {
        if self.platform == Platform::Unsupported {
            return AppOutcome::Unsupported {
                reason: "application termination not supported on this platform".to_string(),
            };
        }

        // -f matches the full command line, mirroring name-substring
        // matching, and sidesteps pgrep's 15-char process-name limit.
        let output = match invoke("pgrep", &["-f", name]).await {
            Ok(output) => output,
            Err(InvokeError::Missing) => return AppOutcome::ToolMissing { tool: "pgrep" },
            Err(e) => {
                return AppOutcome::Failed {
                    reason: format!("process enumeration failed: {e}"),
                };
            }
        };

        // pgrep exits 1 when nothing matched; that is an empty result, not
        // a failure.
        let pids: Vec<u32> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect();

        let mut terminated = Vec::with_capacity(pids.len());
        for pid in pids {
            if signal_terminate(pid) {
                terminated.push(pid);
            } else {
                warn!("failed to terminate pid {pid} for application {name:?}");
            }
        }
        debug!("terminated {} processes for {name:?}", terminated.len());
        AppOutcome::Terminated { pids: terminated }
    }

    /// Bring an application to the foreground.
    async fn focus(&self, name: &str) -> AppOutcome {
        match self.platform {
            Platform::MacOs => {
                let script = format!("tell application \"{name}\" to activate");
                osascript(&script, "applescript").await
            }
            Platform::LinuxDesktop => match invoke("wmctrl", &["-a", name]).await {
                Ok(output) if output.status.success() => AppOutcome::Done { method: "wmctrl" },
                Ok(output) => AppOutcome::Failed {
                    reason: failure_text("wmctrl", &output),
                },
                Err(InvokeError::Missing) => AppOutcome::ToolMissing { tool: "wmctrl" },
                Err(e) => AppOutcome::Failed {
                    reason: format!("wmctrl invocation failed: {e}"),
                },
            },
            Platform::Unsupported => AppOutcome::Unsupported {
                reason: "application focus not supported on this platform".to_string(),
            },
        }
    }

    /// Hide an application's windows.
    async fn minimize(&self, name: &str) -> AppOutcome {
        match self.platform {
            Platform::MacOs => {
                let script = format!(
                    "tell application \"System Events\" to set visible of application process \"{name}\" to false"
                );
                osascript(&script, "applescript").await
            }
            _ => AppOutcome::Unsupported {
                reason: "application minimize not supported on this platform".to_string(),
            },
        }
    }
}

/// Run an osascript one-liner and map it to the uniform outcome shape.
async fn osascript(script: &str, method: &'static str) -> AppOutcome {
    match invoke("osascript", &["-e", script]).await {
        Ok(output) if output.status.success() => AppOutcome::Done { method },
        Ok(output) => AppOutcome::Failed {
            reason: failure_text("osascript", &output),
        },
        Err(InvokeError::Missing) => AppOutcome::ToolMissing { tool: "osascript" },
        Err(e) => AppOutcome::Failed {
            reason: format!("osascript invocation failed: {e}"),
        },
    }
}

fn failure_text(tool: &str, output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("{tool} exited with {}", output.status)
    } else {
        format!("{tool} failed: {stderr}")
    }
}

#[derive(Debug)]
enum InvokeError {
    Missing,
    TimedOut,
    Io(std::io::Error),
}

impl std::fmt::Display for InvokeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvokeError::Missing => f.write_str("tool not installed"),
            InvokeError::TimedOut => f.write_str("invocation timed out"),
            InvokeError::Io(e) => write!(f, "{e}"),
        }
    }
}

/// Bounded external invocation with captured output.
async fn invoke(program: &str, args: &[&str]) -> Result<std::process::Output, InvokeError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);

    match tokio::time::timeout(INVOKE_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(InvokeError::Missing),
        Ok(Err(e)) => Err(InvokeError::Io(e)),
        Err(_) => Err(InvokeError::TimedOut),
    }
}

/// Send SIGTERM to a single process. "Already gone" counts as success.
#[cfg(unix)]
fn signal_terminate(pid: u32) -> bool {
    // SAFETY: plain kill syscall on an enumerated pid.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn signal_terminate(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_application_name_fails() {
        let controller = AppController::new();
        let outcome = controller.control("", AppAction::Terminate).await;
        assert!(!outcome.success());
        assert!(matches!(outcome, AppOutcome::Failed { .. }));
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("terminate".parse::<AppAction>().ok(), Some(AppAction::Terminate));
        assert_eq!("FOCUS".parse::<AppAction>().ok(), Some(AppAction::Focus));
        assert!(" minimize ".parse::<AppAction>().is_ok());
        assert!("launch".parse::<AppAction>().is_err());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_terminate_unmatched_name_is_empty_success() {
        let controller = AppController::new();
        let outcome = controller
            .control("no-such-application-zzz", AppAction::Terminate)
            .await;
        match outcome {
            AppOutcome::Terminated { pids } => assert!(pids.is_empty()),
            AppOutcome::ToolMissing { .. } => {} // pgrep absent on minimal hosts
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[cfg(not(unix))]
    #[tokio::test]
    async fn test_focus_unsupported_platform() {
        let controller = AppController::new();
        let outcome = controller.control("anything", AppAction::Focus).await;
        assert!(matches!(outcome, AppOutcome::Unsupported { .. }));
    }
}

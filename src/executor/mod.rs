//! The safe executor: the action-request boundary of the engine.
//!
//! Callers submit opaque action requests (run a command, touch a path,
//! control an application). Every request is gated by the policy layer
//! before anything touches the OS, and every response is a flat, uniformly
//! shaped result value. No fault ever crosses this boundary: internal
//! errors become response data.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::apps::{AppAction, AppController, AppOutcome};
use crate::policy::{
    AllowedRoots, CommandValidator, SafetyRules, TrustTier, extension_allowed,
};
use crate::process::ProcessSupervisor;

/// An opaque action request from the orchestration layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionRequest {
    Command {
        command: String,
        /// Caller-declared trust tier. Left as a string so unrecognized
        /// values become denials instead of parse faults (fail closed).
        #[serde(default)]
        trust_tier: Option<String>,
    },
    File {
        operation: String,
        path: String,
        #[serde(default)]
        content: Option<String>,
    },
    Application {
        app: String,
        action: String,
    },
}

/// Flat, uniformly shaped response for every action request.
///
/// `success == false` always carries `error`; additional context rides in
/// the flattened detail map.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ActionResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            details: Map::new(),
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            details: Map::new(),
        }
    }

    /// Attach a detail field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

/// Read-only health snapshot of the executor.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub allowed_directories: usize,
    pub allowed_commands: usize,
    pub blocked_commands: usize,
    pub running_processes: usize,
    pub safety_rules_loaded: bool,
    pub timestamp: String,
}

/// Gatekeeper and supervisor for OS side effects requested by the agent.
///
/// Holds its own rule snapshot and process map; construct one per engine,
/// pass it by reference, and call [`close`](Self::close) during teardown.
#[derive(Debug)]
pub struct SafeExecutor {
    rules: SafetyRules,
    validator: CommandValidator,
    roots: AllowedRoots,
    supervisor: ProcessSupervisor,
    apps: AppController,
    closed: AtomicBool,
}

impl SafeExecutor {
    /// Build an executor from an already-loaded rule snapshot.
    pub fn new(rules: SafetyRules) -> Self {
        let validator = CommandValidator::new(&rules);
        let roots = AllowedRoots::new(&rules.allowed_directories);
        if roots.is_empty() {
            warn!("no allowed directories resolved; all file operations will be denied");
        }
        Self {
            rules,
            validator,
            roots,
            supervisor: ProcessSupervisor::new(),
            apps: AppController::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Build an executor from a rules document on disk. A missing or
    /// malformed document degrades to the built-in defaults.
    pub fn from_rules_file(path: &Path) -> Self {
        Self::new(SafetyRules::load_from_path(path))
    }

    /// Handle one action request. Never faults; every outcome, including
    /// internal errors, is reported as response data.
    pub async fn handle(&self, request: ActionRequest) -> ActionResponse {
        if self.closed.load(Ordering::SeqCst) {
            return ActionResponse::denied("executor is closed");
        }
        match request {
            ActionRequest::Command {
                command,
                trust_tier,
            } => {
                let Some(tier_raw) = trust_tier else {
                    return ActionResponse::denied("missing trust tier").with("command", command);
                };
                let tier: TrustTier = match tier_raw.parse() {
                    Ok(tier) => tier,
                    // Fail closed on unrecognized tiers.
                    Err(e) => return ActionResponse::denied(e.to_string()).with("command", command),
                };
                self.execute_command(&command, tier).await
            }
            ActionRequest::File {
                operation,
                path,
                content,
            } => self.file_operation(&operation, &path, content.as_deref()).await,
            ActionRequest::Application { app, action } => {
                let action: AppAction = match action.parse() {
                    Ok(action) => action,
                    Err(e) => return ActionResponse::denied(e.to_string()).with("app", app),
                };
                self.control_application(&app, action).await
            }
        }
    }

    /// Validate and run one shell command under supervision.
    pub async fn execute_command(&self, command: &str, tier: TrustTier) -> ActionResponse {
        let verdict = self.validator.validate(command, tier);
        if !verdict.safe {
            warn!("command denied at tier {tier}: {}", verdict.reason);
            return ActionResponse::denied(verdict.reason)
                .with("command", command)
                .with("trust_tier", tier.name());
        }

        let working_dir = self.roots.safe_working_directory();
        let id = match self
            .supervisor
            .spawn(command, &working_dir, self.rules.max_execution_time)
        {
            Ok(id) => id,
            Err(e) => {
                // Spawn refusal (missing binary, permission) is reported,
                // not retried.
                return ActionResponse::denied(format!("failed to spawn command: {e:#}"))
                    .with("command", command);
            }
        };

        match self.supervisor.await_completion(id, None).await {
            Ok(outcome) if outcome.timed_out => ActionResponse::denied(format!(
                "command timed out after {:?}",
                self.rules.max_execution_time
            ))
            .with("command", command)
            .with("state", json!(outcome.state)),
            Ok(outcome) => {
                let exited_cleanly = outcome.exit_code == Some(0);
                ActionResponse {
                    success: exited_cleanly,
                    error: (!exited_cleanly)
                        .then(|| format!("command exited with code {:?}", outcome.exit_code)),
                    details: Map::new(),
                }
                .with("command", command)
                .with("exit_code", json!(outcome.exit_code))
                .with("stdout", outcome.stdout)
                .with("stderr", outcome.stderr)
                .with("duration_ms", outcome.duration.as_millis() as u64)
            }
            Err(e) => ActionResponse::denied(format!("supervision failed: {e:#}"))
                .with("command", command),
        }
    }

    /// Validate and perform one file operation inside the sandbox.
    pub async fn file_operation(
        &self,
        operation: &str,
        raw_path: &str,
        content: Option<&str>,
    ) -> ActionResponse {
        let Some(path) = self.roots.resolve(raw_path) else {
            warn!("file path denied: {raw_path:?}");
            return ActionResponse::denied("path is outside allowed directories")
                .with("path", raw_path);
        };

        let gated = matches!(operation, "read" | "write" | "append" | "delete");
        if gated && !extension_allowed(&self.rules, &path) {
            warn!("file extension denied: {}", path.display());
            return ActionResponse::denied("file extension not allowed")
                .with("path", path.display().to_string());
        }

        let shown = path.display().to_string();
        let result = match operation {
            "read" => tokio::fs::read_to_string(&path)
                .await
                .map(|content| ActionResponse::ok().with("content", content)),
            "write" => {
                let Some(content) = content else {
                    return ActionResponse::denied("write requires content").with("path", shown);
                };
                tokio::fs::write(&path, content)
                    .await
                    .map(|()| ActionResponse::ok().with("bytes_written", content.len()))
            }
            "append" => {
                let Some(content) = content else {
                    return ActionResponse::denied("append requires content").with("path", shown);
                };
                append_to_file(&path, content)
                    .await
                    .map(|()| ActionResponse::ok().with("bytes_written", content.len()))
            }
            "delete" => tokio::fs::remove_file(&path)
                .await
                .map(|()| ActionResponse::ok()),
            "list" => list_directory(&path)
                .await
                .map(|entries| ActionResponse::ok().with("entries", json!(entries))),
            other => {
                return ActionResponse::denied(format!("unknown file operation: {other}"))
                    .with("path", shown);
            }
        };

        let response = match result {
            Ok(response) => response,
            // OS-call failures become response data, never faults.
            Err(e) => ActionResponse::denied(format!("{operation} failed: {e}")),
        };
        response.with("operation", operation).with("path", shown)
    }

    /// Control an application by name.
    pub async fn control_application(&self, name: &str, action: AppAction) -> ActionResponse {
        let base = ActionResponse::ok()
            .with("app", name)
            .with("action", json!(action));
        match self.apps.control(name, action).await {
            AppOutcome::Terminated { pids } => base
                .with("count", pids.len())
                .with("terminated", json!(pids)),
            AppOutcome::Done { method } => base.with("method", method),
            AppOutcome::Unsupported { reason } => {
                ActionResponse::denied(reason).with("app", name)
            }
            AppOutcome::ToolMissing { tool } => {
                ActionResponse::denied(format!("required automation tool not available: {tool}"))
                    .with("app", name)
            }
            AppOutcome::Failed { reason } => ActionResponse::denied(reason).with("app", name),
        }
    }

    /// Read-only snapshot for external health reporting.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            allowed_directories: self.roots.len(),
            allowed_commands: self.rules.low_risk_prefixes.len(),
            blocked_commands: self.rules.blocked_terms.len(),
            running_processes: self.supervisor.running_count(),
            safety_rules_loaded: self.rules.loaded_from_config(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Direct access to the supervisor, for embedders that track their own
    /// process handles.
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Idempotent shutdown: terminates every tracked process. Safe to call
    /// when nothing is running, and safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("safe executor shutting down");
        let terminated = self.supervisor.kill_all().await;
        if !terminated.is_empty() {
            info!("shutdown terminated {} processes", terminated.len());
        }
        info!("safe executor shutdown complete");
    }
}

async fn append_to_file(path: &Path, content: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}

async fn list_directory(path: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(path).await?;
    while let Some(entry) = dir.next_entry().await? {
        entries.push(entry.file_name().to_string_lossy().to_string());
    }
    entries.sort();
    Ok(entries)
}

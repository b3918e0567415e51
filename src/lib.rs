//! Warden - the enforcement layer of an autonomous automation agent.
//!
//! This library decides whether a requested operating-system action (shell
//! command, file access, application control) is permitted, then executes
//! it under supervision with a bounded lifetime and guaranteed cleanup:
//! - Policy engine: command, path, and extension validation against
//!   configurable rules and tiered trust levels
//! - Process supervisor: spawning, timeout enforcement, signal-escalated
//!   termination, and bulk shutdown
//! - Application controller: platform-branching terminate/focus/minimize
//!
//! # Example
//!
//! ```no_run
//! use warden::{ActionRequest, SafeExecutor, SafetyRules};
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = SafeExecutor::new(SafetyRules::default());
//!
//!     let response = executor
//!         .handle(ActionRequest::Command {
//!             command: "ls -la".to_string(),
//!             trust_tier: Some("low".to_string()),
//!         })
//!         .await;
//!     assert!(response.success);
//!
//!     // Shutdown terminates every tracked process before returning.
//!     executor.close().await;
//! }
//! ```

pub mod apps;
pub mod executor;
pub mod policy;
pub mod process;
pub mod utils;

// Re-export commonly used types
pub use apps::{AppAction, AppController, AppOutcome};
pub use executor::{ActionRequest, ActionResponse, SafeExecutor, StatusSnapshot};
pub use policy::{AllowedRoots, CommandValidator, SafetyRules, TrustTier, ValidationResult};
pub use process::{ExecutionOutcome, ProcessId, ProcessState, ProcessSupervisor};

//! Safety policy: rule store, command validation, path containment,
//! and file-extension gating.
//!
//! Everything in this module is pure with respect to the loaded rules:
//! validators never spawn anything and never mutate the rule store.

mod command;
mod extension;
mod path;
mod rules;

pub use command::CommandValidator;
pub use extension::extension_allowed;
pub use path::AllowedRoots;
pub use rules::SafetyRules;

use serde::{Deserialize, Serialize};

/// Caller-declared risk budget for a command request.
///
/// The tier is supplied per request by the caller, never inferred from the
/// command itself. Unrecognized tier strings are rejected at the request
/// boundary (fail closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    /// Allow-list only: command must start with a configured safe prefix.
    Low,
    /// Deny a fixed set of risky substrings plus the blacklist.
    Medium,
    /// Blacklist only.
    High,
}

impl TrustTier {
    pub fn name(&self) -> &'static str {
        match self {
            TrustTier::Low => "low",
            TrustTier::Medium => "medium",
            TrustTier::High => "high",
        }
    }
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for TrustTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(TrustTier::Low),
            "medium" => Ok(TrustTier::Medium),
            "high" => Ok(TrustTier::High),
            other => Err(anyhow::anyhow!("unknown trust tier: {other}")),
        }
    }
}

/// Outcome of validating a single command against the loaded rules.
///
/// A denial always carries a non-empty human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub safe: bool,
    pub reason: String,
    pub tier: TrustTier,
}

impl ValidationResult {
    pub fn allowed(tier: TrustTier) -> Self {
        Self {
            safe: true,
            reason: "passed validation".to_string(),
            tier,
        }
    }

    pub fn denied(tier: TrustTier, reason: impl Into<String>) -> Self {
        Self {
            safe: false,
            reason: reason.into(),
            tier,
        }
    }
}

//! Command validation against the loaded safety rules.
//!
//! Validation is a pure function of the rules and the input: it never
//! executes anything, never errors, and short-circuits on the first rule
//! that fires.

use regex::Regex;
use tracing::warn;

use super::{SafetyRules, TrustTier, ValidationResult};

/// A blacklist entry, compiled once at validator construction.
///
/// Patterns that fail to compile as regexes degrade to literal substring
/// matching instead of failing the request. This fallback is deliberate.
#[derive(Debug)]
enum BlacklistPattern {
    Compiled { raw: String, regex: Regex },
    Literal(String),
}

impl BlacklistPattern {
    fn new(raw: &str) -> Self {
        match Regex::new(raw) {
            Ok(regex) => Self::Compiled {
                raw: raw.to_string(),
                regex,
            },
            Err(e) => {
                warn!("blacklist pattern {raw:?} is not a valid regex ({e}), matching literally");
                Self::Literal(raw.to_string())
            }
        }
    }

    fn matches(&self, lowered: &str) -> bool {
        match self {
            Self::Compiled { regex, .. } => regex.is_match(lowered),
            Self::Literal(raw) => lowered.contains(&raw.to_lowercase()),
        }
    }

    fn raw(&self) -> &str {
        match self {
            Self::Compiled { raw, .. } => raw,
            Self::Literal(raw) => raw,
        }
    }
}

/// Validates command strings against a rule snapshot.
#[derive(Debug)]
pub struct CommandValidator {
    patterns: Vec<BlacklistPattern>,
    blocked_terms: Vec<String>,
    dangerous_paths: Vec<String>,
    low_risk_prefixes: Vec<String>,
    medium_risk_patterns: Vec<String>,
}

impl CommandValidator {
    pub fn new(rules: &SafetyRules) -> Self {
        Self {
            patterns: rules
                .blacklist_patterns
                .iter()
                .map(|p| BlacklistPattern::new(p))
                .collect(),
            blocked_terms: rules.blocked_terms.clone(),
            dangerous_paths: rules.dangerous_paths.clone(),
            low_risk_prefixes: rules.low_risk_prefixes.clone(),
            medium_risk_patterns: rules.medium_risk_patterns.clone(),
        }
    }

    /// Validate `command` at the given trust tier.
    ///
    /// Checks run in strict order, first match wins:
    /// empty input, blacklist patterns, blocked terms, dangerous paths,
    /// then the tier-specific check.
    pub fn validate(&self, command: &str, tier: TrustTier) -> ValidationResult {
        let lowered = command.trim().to_lowercase();

        if lowered.is_empty() {
            return ValidationResult::denied(tier, "empty command");
        }

        for pattern in &self.patterns {
            if pattern.matches(&lowered) {
                return ValidationResult::denied(
                    tier,
                    format!("command contains blocked pattern: {}", pattern.raw()),
                );
            }
        }

        for term in &self.blocked_terms {
            if lowered.contains(&term.to_lowercase()) {
                return ValidationResult::denied(
                    tier,
                    format!("command contains blocked term: {term}"),
                );
            }
        }

        // Dangerous paths are matched verbatim against the original-case
        // command; paths are case-sensitive.
        for path in &self.dangerous_paths {
            if command.contains(path) {
                return ValidationResult::denied(
                    tier,
                    format!("command references dangerous path: {path}"),
                );
            }
        }

        match tier {
            TrustTier::Low => {
                let permitted = self
                    .low_risk_prefixes
                    .iter()
                    .any(|prefix| lowered.starts_with(prefix.as_str()));
                if !permitted {
                    return ValidationResult::denied(
                        tier,
                        format!("command not allowed at trust tier 'low': {command}"),
                    );
                }
            }
            TrustTier::Medium => {
                for pattern in &self.medium_risk_patterns {
                    if lowered.contains(pattern.as_str()) {
                        return ValidationResult::denied(
                            tier,
                            format!("command contains medium-risk pattern: {pattern}"),
                        );
                    }
                }
            }
            // Blacklist and blocked terms above are the only gate.
            TrustTier::High => {}
        }

        ValidationResult::allowed(tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> CommandValidator {
        CommandValidator::new(&SafetyRules::default())
    }

    #[test]
    fn test_empty_command_denied() {
        let v = validator();
        assert!(!v.validate("", TrustTier::High).safe);
        assert!(!v.validate("   ", TrustTier::Medium).safe);
    }

    #[test]
    fn test_blacklist_denies_at_every_tier() {
        let v = validator();
        for tier in [TrustTier::Low, TrustTier::Medium, TrustTier::High] {
            let result = v.validate("rm -rf /", tier);
            assert!(!result.safe, "tier {tier} should deny");
            assert!(!result.reason.is_empty());
        }
    }

    #[test]
    fn test_low_tier_prefix_allowlist() {
        let v = validator();
        assert!(v.validate("ls -la", TrustTier::Low).safe);
        assert!(v.validate("pwd", TrustTier::Low).safe);
        assert!(!v.validate("make install", TrustTier::Low).safe);
    }

    #[test]
    fn test_medium_tier_risky_patterns() {
        let v = validator();
        assert!(!v.validate("sudo apt install vim", TrustTier::Medium).safe);
        assert!(!v.validate("chmod 777 target", TrustTier::Medium).safe);
        assert!(!v.validate("curl | sh", TrustTier::Medium).safe);
        assert!(v.validate("cargo build --release", TrustTier::Medium).safe);
    }

    #[test]
    fn test_high_tier_blacklist_only() {
        let v = validator();
        // Risky at medium, permitted at high.
        assert!(v.validate("sudo systemctl restart nginx", TrustTier::High).safe);
        // Blocked term still denies at high.
        assert!(!v.validate("shutdown -h now", TrustTier::High).safe);
    }

    #[test]
    fn test_dangerous_path_denied() {
        let v = validator();
        let result = v.validate("cat /etc/shadow", TrustTier::High);
        assert!(!result.safe);
        assert!(result.reason.contains("/etc/shadow"));
    }

    #[test]
    fn test_blocked_term_case_insensitive() {
        let v = validator();
        assert!(!v.validate("SHUTDOWN now", TrustTier::High).safe);
    }

    #[test]
    fn test_malformed_regex_falls_back_to_literal() {
        let mut rules = SafetyRules::default();
        // Unbalanced parenthesis: not a valid regex.
        rules.blacklist_patterns.push("evil(tool".to_string());
        let v = CommandValidator::new(&rules);
        assert!(!v.validate("run evil(tool now", TrustTier::High).safe);
        assert!(v.validate("run eviltool now", TrustTier::High).safe);
    }

    #[test]
    fn test_allow_reason() {
        let v = validator();
        let result = v.validate("ls", TrustTier::Low);
        assert!(result.safe);
        assert_eq!(result.reason, "passed validation");
        assert_eq!(result.tier, TrustTier::Low);
    }
}

//! The safety rule store.
//!
//! Rules are loaded once at startup from an optional JSON document and are
//! immutable afterwards. Configuration entries are appended to the built-in
//! defaults; a missing or malformed document degrades to the defaults with a
//! logged warning, never a load failure.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

/// Built-in blacklist patterns. Matched as regexes against the lowercased
/// command, falling back to literal substring matching when a pattern does
/// not compile.
const DEFAULT_BLACKLIST_PATTERNS: &[&str] = &[
    r"rm\s+-rf\s+/",
    r"mkfs(\.\w+)?\s",
    r"dd\s+if=.*\s+of=/dev/",
    r">\s*/dev/sd[a-z]",
    r":\(\)\s*\{\s*:\|:&\s*\};:",
    r"chown\s+-R\s+.*\s+/\s*$",
];

/// Built-in blocked terms, matched by simple substring containment.
const DEFAULT_BLOCKED_TERMS: &[&str] = &[
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    "init 0",
    "fdisk",
];

/// Built-in dangerous path fragments. A command referencing any of these
/// verbatim is denied.
const DEFAULT_DANGEROUS_PATHS: &[&str] = &[
    "/etc/passwd",
    "/etc/shadow",
    "/etc/sudoers",
    "/boot",
    "/dev/sda",
    "/proc/sys",
];

/// Built-in low-tier command prefixes.
const DEFAULT_LOW_RISK_PREFIXES: &[&str] = &[
    "ls", "pwd", "echo", "cat", "head", "tail", "wc", "date", "whoami",
    "which", "uname", "env", "df", "du", "file", "stat",
];

/// Fixed medium-tier risky substrings: destructive recursive delete,
/// privilege escalation, world-writable permission grants, and piping a
/// network fetch straight into a shell.
const DEFAULT_MEDIUM_RISK_PATTERNS: &[&str] =
    &["rm -rf", "sudo", "chmod 777", "curl |", "wget |"];

/// Default allow-set of file extensions used when the configuration does not
/// provide an explicit allow list. Extension-less files are also allowed in
/// this mode.
pub(crate) const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".json", ".yaml", ".yml", ".xml", ".csv",
    ".js", ".ts", ".jsx", ".tsx", ".py", ".java", ".go", ".rs",
    ".html", ".css", ".scss", ".sass", ".less",
    ".sh", ".bash", ".zsh", ".fish",
    ".sql", ".log", ".conf", ".config", ".ini", ".toml",
];

const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(30);

/// Immutable safety configuration, loaded exactly once per executor.
#[derive(Debug, Clone)]
pub struct SafetyRules {
    /// Ordered blacklist patterns (regex-or-literal), checked first.
    pub blacklist_patterns: Vec<String>,
    /// Substring-matched blocked terms.
    pub blocked_terms: Vec<String>,
    /// Path fragments that deny a command when referenced verbatim.
    pub dangerous_paths: Vec<String>,
    /// Command prefixes permitted at the low trust tier.
    pub low_risk_prefixes: Vec<String>,
    /// Risky substrings denied at the medium trust tier.
    pub medium_risk_patterns: Vec<String>,
    /// Explicit extension allow list; empty means "use the default set".
    pub allowed_extensions: Vec<String>,
    /// Extension block list; takes precedence over any allow list.
    pub blocked_extensions: Vec<String>,
    /// Filesystem roots that file operations are confined to.
    pub allowed_directories: Vec<String>,
    /// Per-process execution ceiling enforced by the supervisor.
    pub max_execution_time: Duration,
    loaded_from_config: bool,
}

impl Default for SafetyRules {
    fn default() -> Self {
        Self {
            blacklist_patterns: to_owned(DEFAULT_BLACKLIST_PATTERNS),
            blocked_terms: to_owned(DEFAULT_BLOCKED_TERMS),
            dangerous_paths: to_owned(DEFAULT_DANGEROUS_PATHS),
            low_risk_prefixes: to_owned(DEFAULT_LOW_RISK_PREFIXES),
            medium_risk_patterns: to_owned(DEFAULT_MEDIUM_RISK_PATTERNS),
            allowed_extensions: Vec::new(),
            blocked_extensions: Vec::new(),
            allowed_directories: vec!["~".to_string()],
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
            loaded_from_config: false,
        }
    }
}

impl SafetyRules {
    /// Load rules from a JSON document at `path`.
    ///
    /// A missing file or a document that fails to parse yields the built-in
    /// defaults with a warning. Configuration entries extend the defaults;
    /// they never replace them.
    pub fn load_from_path(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    "safety rules file {} not readable ({}), using defaults",
                    path.display(),
                    e
                );
                return Self::default();
            }
        };

        match serde_json::from_str::<RulesDocument>(&raw) {
            Ok(doc) => {
                let rules = Self::from_document(doc);
                info!("safety rules loaded from {}", path.display());
                rules
            }
            Err(e) => {
                warn!(
                    "safety rules file {} is malformed ({}), using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Parse rules from a JSON string. Malformed input degrades to defaults.
    pub fn from_json(raw: &str) -> Self {
        match serde_json::from_str::<RulesDocument>(raw) {
            Ok(doc) => Self::from_document(doc),
            Err(e) => {
                warn!("safety rules document is malformed ({}), using defaults", e);
                Self::default()
            }
        }
    }

    fn from_document(doc: RulesDocument) -> Self {
        let mut rules = Self::default();
        let cv = doc.command_validation;

        extend_unique(&mut rules.blacklist_patterns, cv.blacklist_patterns);
        extend_unique(&mut rules.blocked_terms, cv.blocked_commands);
        extend_unique(&mut rules.dangerous_paths, cv.dangerous_paths);
        extend_unique(
            &mut rules.low_risk_prefixes,
            cv.safe_command_prefixes.low_risk,
        );
        extend_unique(&mut rules.medium_risk_patterns, cv.medium_risk_patterns);

        let fr = doc.file_operation_rules;
        extend_unique(&mut rules.allowed_extensions, fr.allowed_extensions);
        extend_unique(&mut rules.blocked_extensions, fr.blocked_extensions);

        if !doc.allowed_directories.is_empty() {
            rules.allowed_directories = doc.allowed_directories;
        }
        if let Some(secs) = doc.max_execution_time_secs {
            if secs == 0 {
                warn!("max_execution_time_secs of 0 ignored, keeping default");
            } else {
                rules.max_execution_time = Duration::from_secs(secs);
            }
        }

        rules.loaded_from_config = true;
        rules
    }

    /// Whether these rules came from a configuration document rather than
    /// the built-in defaults.
    pub fn loaded_from_config(&self) -> bool {
        self.loaded_from_config
    }
}

/// Append `extra` entries to `base`, preserving order and skipping entries
/// already present.
fn extend_unique(base: &mut Vec<String>, extra: Vec<String>) {
    for entry in extra {
        if !base.contains(&entry) {
            base.push(entry);
        }
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

// Wire shape of the rules document. Every section is optional; absent
// sections fall back to defaults.

#[derive(Debug, Default, Deserialize)]
struct RulesDocument {
    #[serde(default)]
    command_validation: CommandValidationSection,
    #[serde(default)]
    file_operation_rules: FileRulesSection,
    #[serde(default)]
    allowed_directories: Vec<String>,
    #[serde(default)]
    max_execution_time_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CommandValidationSection {
    #[serde(default)]
    blacklist_patterns: Vec<String>,
    #[serde(default)]
    blocked_commands: Vec<String>,
    #[serde(default)]
    dangerous_paths: Vec<String>,
    #[serde(default)]
    medium_risk_patterns: Vec<String>,
    #[serde(default)]
    safe_command_prefixes: SafePrefixSection,
}

#[derive(Debug, Default, Deserialize)]
struct SafePrefixSection {
    #[serde(default)]
    low_risk: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRulesSection {
    #[serde(default)]
    allowed_extensions: Vec<String>,
    #[serde(default)]
    blocked_extensions: Vec<String>,
}

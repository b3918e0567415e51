//! File-extension gating for file operations.

use std::path::Path;

use super::SafetyRules;
use super::rules::DEFAULT_ALLOWED_EXTENSIONS;

/// Decide whether a file operation on `path` is permitted by extension.
///
/// The block list always wins, even over an explicit allow list. When the
/// allow list is empty the built-in default set applies, which also admits
/// extension-less files.
pub fn extension_allowed(rules: &SafetyRules, path: &Path) -> bool {
    let ext = dotted_extension(path);

    if rules
        .blocked_extensions
        .iter()
        .any(|blocked| blocked.eq_ignore_ascii_case(&ext))
    {
        return false;
    }

    if !rules.allowed_extensions.is_empty() {
        return rules
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&ext));
    }

    ext.is_empty() || DEFAULT_ALLOWED_EXTENSIONS.contains(&ext.as_str())
}

/// Lowercased extension including the leading dot, or empty for none.
fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_allow_set() {
        let rules = SafetyRules::default();
        assert!(extension_allowed(&rules, &PathBuf::from("/p/readme.md")));
        assert!(extension_allowed(&rules, &PathBuf::from("/p/main.rs")));
        assert!(extension_allowed(&rules, &PathBuf::from("/p/Config.TOML")));
        assert!(!extension_allowed(&rules, &PathBuf::from("/p/tool.exe")));
        assert!(!extension_allowed(&rules, &PathBuf::from("/p/lib.so")));
    }

    #[test]
    fn test_extensionless_allowed_by_default() {
        let rules = SafetyRules::default();
        assert!(extension_allowed(&rules, &PathBuf::from("/p/Makefile")));
    }

    #[test]
    fn test_allowlist_mode() {
        let mut rules = SafetyRules::default();
        rules.allowed_extensions = vec![".txt".to_string()];
        assert!(extension_allowed(&rules, &PathBuf::from("/p/a.txt")));
        assert!(extension_allowed(&rules, &PathBuf::from("/p/a.TXT")));
        // Outside the allow list, even default-safe extensions are rejected.
        assert!(!extension_allowed(&rules, &PathBuf::from("/p/a.md")));
        // Extension-less files need an explicit entry in allow-list mode.
        assert!(!extension_allowed(&rules, &PathBuf::from("/p/Makefile")));
    }

    #[test]
    fn test_blocklist_beats_allowlist() {
        let mut rules = SafetyRules::default();
        rules.allowed_extensions = vec![".sh".to_string()];
        rules.blocked_extensions = vec![".sh".to_string()];
        assert!(!extension_allowed(&rules, &PathBuf::from("/p/run.sh")));
    }

    #[test]
    fn test_blocklist_case_insensitive() {
        let mut rules = SafetyRules::default();
        rules.blocked_extensions = vec![".EXE".to_string()];
        assert!(!extension_allowed(&rules, &PathBuf::from("/p/setup.exe")));
    }
}

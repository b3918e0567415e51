//! Path containment validation.
//!
//! A requested path is valid only if its canonical (absolute, symlink-free)
//! form lives under one of the allowed roots. Denial and "does not exist"
//! are deliberately indistinguishable here: the caller only learns that the
//! path did not resolve.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

/// The ordered set of canonical filesystem roots file operations are
/// confined to. Roots are expanded and canonicalized once at construction.
#[derive(Debug, Clone)]
pub struct AllowedRoots {
    roots: Vec<PathBuf>,
}

impl AllowedRoots {
    /// Build the root set from configured directory strings.
    ///
    /// Roots that cannot be canonicalized (missing, permission denied) are
    /// skipped with a warning rather than failing construction.
    pub fn new(dirs: &[String]) -> Self {
        let mut roots = Vec::new();
        for dir in dirs {
            let expanded = expand_home(dir);
            match std::fs::canonicalize(&expanded) {
                Ok(canonical) => roots.push(canonical),
                Err(e) => {
                    warn!("allowed directory {dir:?} skipped: {e}");
                }
            }
        }
        Self { roots }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Resolve `raw` to a canonical path contained in an allowed root.
    ///
    /// Home shorthand is expanded, symlinks are resolved, and containment is
    /// tested against each root in order. Relative inputs that fail the
    /// first pass are retried against the current working directory. Any
    /// resolution error yields `None`; this function never panics or errors
    /// on malformed input.
    pub fn resolve(&self, raw: &str) -> Option<PathBuf> {
        if raw.trim().is_empty() {
            return None;
        }

        let expanded = expand_home(raw);
        if let Some(canonical) = canonicalize_lenient(&expanded) {
            if self.contains(&canonical) {
                return Some(canonical);
            }
        }

        // Relative references inside the working tree are common for
        // project-local operations; retry anchored to the cwd.
        if expanded.is_relative() {
            let cwd = std::env::current_dir().ok()?;
            if let Some(canonical) = canonicalize_lenient(&cwd.join(&expanded)) {
                if self.contains(&canonical) {
                    return Some(canonical);
                }
            }
        }

        None
    }

    /// First allowed root that still exists, for use as a default working
    /// directory. Falls back to the user's home, then the current directory.
    pub fn safe_working_directory(&self) -> PathBuf {
        if let Some(root) = self.roots.iter().find(|r| r.is_dir()) {
            return root.clone();
        }
        if let Some(home) = home_dir() {
            if home.is_dir() {
                return home;
            }
        }
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    fn contains(&self, canonical: &Path) -> bool {
        self.roots.iter().any(|root| canonical.starts_with(root))
    }
}

/// Canonicalize a path, tolerating a nonexistent final component.
///
/// Creating a new file inside the sandbox must still validate, so when the
/// leaf does not exist the parent is canonicalized instead and the file name
/// is re-joined. A nonexistent leaf cannot be a symlink, so containment
/// still holds.
fn canonicalize_lenient(path: &Path) -> Option<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(canonical) => Some(canonical),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let name = path.file_name()?;
            // Reject `missing/..` style leaves outright.
            if matches!(path.components().next_back(), Some(Component::ParentDir)) {
                return None;
            }
            let parent = path.parent().filter(|p| !p.as_os_str().is_empty())?;
            let canonical_parent = std::fs::canonicalize(parent).ok()?;
            Some(canonical_parent.join(name))
        }
        Err(_) => None,
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = home_dir() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

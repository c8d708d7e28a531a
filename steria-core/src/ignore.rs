//! Ignore patterns
//!
//! `.steriaignore` holds one pattern per line: `#` lines are comments, a
//! trailing `/` marks a directory pattern, and `*` wildcards are supported
//! leading (`*suffix`) or trailing (`prefix*`). The metadata directory is
//! always ignored regardless of patterns.

use crate::error::Result;
use crate::repo::META_DIR;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// File name of the ignore file at the repository root
pub const IGNORE_FILE: &str = ".steriaignore";

#[derive(Debug, Clone)]
struct IgnorePattern {
    pattern: String,
    is_dir: bool,
}

impl IgnorePattern {
    fn matches(&self, rel_path: &str, name: &str, is_dir: bool) -> bool {
        if self.is_dir {
            if is_dir && name == self.pattern {
                return true;
            }
            // Anything under a matching directory is ignored too.
            let mut components = rel_path.split('/');
            components.next_back();
            return components.any(|c| c == self.pattern);
        }
        if let Some(suffix) = self.pattern.strip_prefix('*') {
            return name.ends_with(suffix);
        }
        if let Some(prefix) = self.pattern.strip_suffix('*') {
            return name.starts_with(prefix);
        }
        name == self.pattern || rel_path == self.pattern
    }
}

/// Parsed ignore rules for one repository
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<IgnorePattern>,
}

impl IgnoreRules {
    /// Load rules from the ignore file at the repository root.
    ///
    /// A missing file yields the empty rule set.
    pub fn load(root: &Path) -> Result<Self> {
        match fs::read_to_string(root.join(IGNORE_FILE)) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut patterns = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let is_dir = line.ends_with('/');
            patterns.push(IgnorePattern {
                pattern: line.trim_end_matches('/').to_string(),
                is_dir,
            });
        }
        Self { patterns }
    }

    /// Whether a repo-relative path (forward slashes) should be skipped
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        if name == META_DIR {
            return true;
        }
        self.patterns
            .iter()
            .any(|p| p.matches(rel_path, name, is_dir))
    }

    /// Raw patterns, for listing
    pub fn patterns(&self) -> Vec<String> {
        self.patterns
            .iter()
            .map(|p| {
                if p.is_dir {
                    format!("{}/", p.pattern)
                } else {
                    p.pattern.clone()
                }
            })
            .collect()
    }
}

/// Append a pattern to the ignore file, creating it if needed
pub fn append_pattern(root: &Path, pattern: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(root.join(IGNORE_FILE))?;
    writeln!(file, "{pattern}")?;
    Ok(())
}

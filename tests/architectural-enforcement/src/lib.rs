//! Architectural Enforcement Integration Tests
//!
//! Source scanners used by the tests in `tests/` to enforce:
//! - No thread sleeps in the async client
//! - No blocking HTTP or socket I/O in the async client
//!
//! Only production code is scanned: everything from the first
//! `#[cfg(test)]` line of a file onwards is treated as test code.

use std::fs;
use std::path::{Path, PathBuf};

/// A forbidden pattern and why it is forbidden
#[derive(Clone, Copy, Debug)]
pub struct Rule {
    /// Substring that must not appear in production code
    pub pattern: &'static str,
    /// Explanation printed with each violation
    pub reason: &'static str,
}

/// One forbidden call site
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File containing the call
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Offending source line, trimmed
    pub source: String,
    /// Rule that matched
    pub reason: &'static str,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.reason,
            self.source
        )
    }
}

/// Workspace root, resolved from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Production lines of a source file, with 1-based line numbers
///
/// Stops at the first `#[cfg(test)]` and drops line comments.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .filter_map(|(idx, line)| {
            let code = line.split("//").next().unwrap_or(line);
            if code.trim().is_empty() {
                None
            } else {
                Some((idx + 1, code))
            }
        })
        .collect()
}

/// Check one file's content against `rules`
#[must_use]
pub fn check_source(path: &Path, content: &str, rules: &[Rule]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (line, code) in production_lines(content) {
        for rule in rules {
            if code.contains(rule.pattern) {
                violations.push(Violation {
                    path: path.to_path_buf(),
                    line,
                    source: code.trim().to_string(),
                    reason: rule.reason,
                });
            }
        }
    }
    violations
}

/// Check every `.rs` file below `dir` (relative to the workspace root)
#[must_use]
pub fn check_directory(dir: &str, rules: &[Rule]) -> Vec<Violation> {
    let path = workspace_root().join(dir);
    if !path.exists() {
        return Vec::new();
    }

    let mut violations = Vec::new();
    for entry in walkdir::WalkDir::new(&path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
    {
        if let Ok(content) = fs::read_to_string(entry.path()) {
            violations.extend(check_source(entry.path(), &content, rules));
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLEEP: Rule = Rule {
        pattern: "thread::sleep",
        reason: "Blocking sleep",
    };

    #[test]
    fn test_test_module_is_skipped() {
        let source = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() { std::thread::sleep(d); }\n}\n";
        assert!(check_source(Path::new("x.rs"), source, &[SLEEP]).is_empty());
    }

    #[test]
    fn test_comments_are_skipped() {
        let source = "// never std::thread::sleep here\nfn a() {} // thread::sleep\n";
        assert!(check_source(Path::new("x.rs"), source, &[SLEEP]).is_empty());
    }

    #[test]
    fn test_violation_reports_line() {
        let source = "fn a() {\n    std::thread::sleep(d);\n}\n";
        let violations = check_source(Path::new("x.rs"), source, &[SLEEP]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 2);
        assert_eq!(violations[0].source, "std::thread::sleep(d);");
    }
}

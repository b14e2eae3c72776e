//! Architectural Enforcement
//!
//! Source scanners backing the integration tests in this package:
//! - No sleep() calls in relay production code
//! - No blocking I/O inside async functions
//!
//! Only the production part of each file is scanned; everything from the
//! first `#[cfg(test)]` onward is treated as test code.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["relay/core/src", "relay/daemon/src"];

/// One rule hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the hit is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Offending line, trimmed
    pub text: String,
    /// What the rule objects to
    pub reason: &'static str,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.reason,
            self.text
        )
    }
}

/// Kind of function enclosing a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnContext {
    /// `async fn`
    Async,
    /// Plain `fn`
    Sync,
    /// Module level, or an `impl` header before any function
    Outside,
}

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Every `.rs` file under the production roots
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files
}

/// Lines before the file's test module
#[must_use]
pub fn production_lines(content: &str) -> Vec<&str> {
    content
        .lines()
        .take_while(|line| line.trim() != "#[cfg(test)]")
        .collect()
}

/// A line with any trailing `//` comment removed
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

fn strip_qualifiers(mut line: &str) -> &str {
    for prefix in ["pub(crate) ", "pub(super) ", "pub ", "const ", "unsafe "] {
        if let Some(rest) = line.strip_prefix(prefix) {
            line = rest;
        }
    }
    line
}

/// Find the function a line belongs to by scanning backwards
#[must_use]
pub fn enclosing_fn(lines: &[&str], current_idx: usize) -> FnContext {
    for line in lines[..current_idx].iter().rev() {
        let line = strip_qualifiers(line.trim());

        if line.starts_with("async fn ") {
            return FnContext::Async;
        }
        if line.starts_with("fn ") {
            return FnContext::Sync;
        }

        // Stop at module/impl boundaries
        if line.starts_with("mod ") || (line.starts_with("impl") && line.contains('{')) {
            return FnContext::Outside;
        }
    }
    FnContext::Outside
}

/// Apply `rule` to every production line
///
/// The rule sees the file's production lines, the line index and the line's
/// code part, and returns a reason when the line breaks it.
pub fn scan<F>(rule: F) -> Vec<Violation>
where
    F: Fn(&[&str], usize, &str) -> Option<&'static str>,
{
    let mut violations = Vec::new();
    for path in production_files() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        violations.extend(scan_source(&path, &content, &rule));
    }
    violations
}

/// Apply `rule` to one file's content
pub fn scan_source<F>(path: &Path, content: &str, rule: F) -> Vec<Violation>
where
    F: Fn(&[&str], usize, &str) -> Option<&'static str>,
{
    let lines = production_lines(content);
    lines
        .iter()
        .enumerate()
        .filter_map(|(idx, line)| {
            rule(&lines, idx, code_part(line)).map(|reason| Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                text: line.trim().to_string(),
                reason,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn a() {}\n\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        assert_eq!(production_lines(content), vec!["fn a() {}", ""]);
    }

    #[test]
    fn test_code_part_drops_comments() {
        assert_eq!(code_part("let x = 1; // sleep(1)"), "let x = 1; ");
        assert_eq!(code_part("// tokio::time::sleep"), "");
    }

    #[test]
    fn test_enclosing_fn() {
        let lines = vec![
            "impl Server {",
            "    pub async fn run(&self) {",
            "        read();",
            "    }",
            "    pub(crate) fn load() {",
            "        read();",
            "    }",
            "}",
        ];
        assert_eq!(enclosing_fn(&lines, 0), FnContext::Outside);
        assert_eq!(enclosing_fn(&lines, 2), FnContext::Async);
        assert_eq!(enclosing_fn(&lines, 5), FnContext::Sync);
    }

    #[test]
    fn test_scan_source_reports_line_numbers() {
        let content = "fn a() {\n    bad();\n}\n#[cfg(test)]\nfn t() { bad(); }\n";
        let hits = scan_source(Path::new("x.rs"), content, |_, _, code| {
            code.contains("bad()").then_some("bad call")
        });
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 2);
        assert_eq!(hits[0].to_string(), "x.rs:2 - bad call: bad();");
    }

    #[test]
    fn test_production_roots_exist() {
        assert!(!production_files().is_empty());
    }
}

//! Architectural Enforcement
//!
//! Line-level scanner used by the integration tests in `tests/` to keep the
//! gateway's production code free of calls that stall the async runtime:
//! - No `sleep()` in production code (quota windows come from a clock, not waits)
//! - No blocking I/O inside `async fn`
//!
//! Everything after the first `#[cfg(test)]` in a file is treated as test
//! code and skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the line came from
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What rule the line broke
    pub rule: &'static str,
    /// The trimmed source line
    pub source: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.source
        )
    }
}

/// A forbidden pattern and where it applies
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// Substring to look for in the code part of a line
    pub pattern: &'static str,
    /// Label used in reports
    pub name: &'static str,
    /// Only flag the pattern inside `async fn` bodies
    pub async_only: bool,
}

/// Sleeping anywhere in production code
pub const SLEEP_RULES: &[Rule] = &[
    Rule {
        pattern: "thread::sleep",
        name: "Thread sleep",
        async_only: false,
    },
    Rule {
        pattern: "time::sleep",
        name: "Async sleep",
        async_only: false,
    },
];

/// Blocking calls that must not run on the runtime
pub const BLOCKING_IO_RULES: &[Rule] = &[
    Rule {
        pattern: "reqwest::blocking",
        name: "Blocking HTTP client",
        async_only: false,
    },
    Rule {
        pattern: "std::net::TcpStream",
        name: "Blocking network I/O",
        async_only: false,
    },
    Rule {
        pattern: "std::net::TcpListener",
        name: "Blocking network I/O",
        async_only: false,
    },
    Rule {
        pattern: "std::fs::",
        name: "Blocking file I/O",
        async_only: true,
    },
    Rule {
        pattern: "std::process::Command",
        name: "Blocking process I/O",
        async_only: true,
    },
];

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["switchboard/core/src", "switchboard/daemon/src"];

/// Workspace root, two levels above this crate
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Scan source text against `rules`
pub fn scan_source(path: &Path, content: &str, rules: &[Rule]) -> Vec<Violation> {
    let lines: Vec<&str> = content.lines().collect();
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }

        // Skip comments
        let code = line.split("//").next().unwrap_or(line);

        for rule in rules {
            if !code.contains(rule.pattern) {
                continue;
            }
            if rule.async_only && !is_in_async_function(&lines, idx) {
                continue;
            }
            violations.push(Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                rule: rule.name,
                source: line.trim().to_string(),
            });
        }
    }

    violations
}

/// Scan every `.rs` file under `dir`
pub fn scan_directory(dir: &Path, rules: &[Rule]) -> Vec<Violation> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .flat_map(|entry| match fs::read_to_string(entry.path()) {
            Ok(content) => scan_source(entry.path(), &content, rules),
            Err(_) => Vec::new(),
        })
        .collect()
}

/// Scan all production directories
pub fn scan_production(rules: &[Rule]) -> Vec<Violation> {
    let root = workspace_root();
    PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| scan_directory(&root.join(dir), rules))
        .collect()
}

/// Whether the nearest enclosing `fn` above `current_idx` is async
pub fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    for line in lines[..current_idx].iter().rev() {
        let line = line.trim();
        if line.starts_with("//") {
            continue;
        }
        if line.contains("fn ") {
            return line.contains("async fn ");
        }
        // Module boundaries end the search
        if line.starts_with("mod ") || line.starts_with("pub mod ") {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_sleep() {
        let code = "async fn wait() {\n    tokio::time::sleep(d).await;\n}\n";
        let found = scan_source(Path::new("a.rs"), code, SLEEP_RULES);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 2);
        assert_eq!(found[0].rule, "Async sleep");
    }

    #[test]
    fn test_std_fs_allowed_in_sync_fn() {
        let code = "fn load() {\n    let s = std::fs::read_to_string(p);\n}\n";
        assert!(scan_source(Path::new("a.rs"), code, BLOCKING_IO_RULES).is_empty());

        let code = "async fn load() {\n    let s = std::fs::read_to_string(p);\n}\n";
        assert_eq!(scan_source(Path::new("a.rs"), code, BLOCKING_IO_RULES).len(), 1);
    }

    #[test]
    fn test_test_modules_and_comments_skipped() {
        let code = "// std::thread::sleep is banned\nfn ok() {}\n#[cfg(test)]\nmod tests {\n    fn t() { std::thread::sleep(d); }\n}\n";
        assert!(scan_source(Path::new("a.rs"), code, SLEEP_RULES).is_empty());
    }

    #[test]
    fn test_violation_display() {
        let v = Violation {
            path: PathBuf::from("src/x.rs"),
            line: 3,
            rule: "Blocking HTTP client",
            source: "reqwest::blocking::get(url)".to_string(),
        };
        assert_eq!(
            v.to_string(),
            "src/x.rs:3 - Blocking HTTP client: reqwest::blocking::get(url)"
        );
    }
}

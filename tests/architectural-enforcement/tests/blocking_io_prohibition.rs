//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Nothing that runs on the runtime may block a worker thread.
//! - `reqwest::blocking` is never used
//! - `std::net` sockets are never used
//! - `std::fs` and `std::process::Command` only appear in plain `fn`s, which
//!   the daemon calls before the runtime serves or through `spawn_blocking`

use architectural_enforcement::{enclosing_fn, scan, scan_source, FnContext};
use std::path::Path;

fn blocking_rule(lines: &[&str], idx: usize, code: &str) -> Option<&'static str> {
    if code.contains("reqwest::blocking") {
        return Some("Blocking HTTP client");
    }
    if code.contains("std::net::TcpStream") || code.contains("std::net::TcpListener") {
        return Some("Blocking network I/O");
    }
    let in_async = enclosing_fn(lines, idx) == FnContext::Async;
    if in_async && code.contains("std::fs::") {
        return Some("Blocking file I/O in async fn");
    }
    if in_async && code.contains("std::process::Command") {
        return Some("Blocking process I/O in async fn");
    }
    None
}

#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = scan(blocking_rule);

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse reqwest's async client, tokio::net, tokio::fs or spawn_blocking.");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_blocking_rule_detection() {
    let in_async = "async fn handler() {\n    let s = std::fs::read_to_string(\"f\");\n}\n";
    assert_eq!(
        scan_source(Path::new("a.rs"), in_async, blocking_rule).len(),
        1
    );

    let in_sync = "pub fn load() {\n    let s = std::fs::read_to_string(\"f\");\n}\n";
    assert!(scan_source(Path::new("b.rs"), in_sync, blocking_rule).is_empty());

    let client = "fn get() {\n    let c = reqwest::blocking::Client::new();\n}\n";
    assert_eq!(scan_source(Path::new("c.rs"), client, blocking_rule).len(), 1);
}

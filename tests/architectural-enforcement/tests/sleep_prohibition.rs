//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Relay production code waits on I/O, channels and cancellation,
//! never on the clock. Timeouts belong to the HTTP client and the tests.

use architectural_enforcement::{scan, scan_source};
use std::path::Path;

fn sleep_rule(_lines: &[&str], _idx: usize, code: &str) -> Option<&'static str> {
    (code.contains("::sleep(") || code.contains(".sleep(")).then_some("Sleep call")
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(sleep_rule);

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nWait on the queue, the upstream stream or a watch channel instead.");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_sleep_rule_detects_violation() {
    let content = "async fn poll() {\n    tokio::time::sleep(Duration::from_millis(10)).await;\n}\n";
    let hits = scan_source(Path::new("poll.rs"), content, sleep_rule);
    assert_eq!(hits.len(), 1);

    let commented = "async fn poll() {\n    // tokio::time::sleep(d).await;\n}\n";
    assert!(scan_source(Path::new("poll.rs"), commented, sleep_rule).is_empty());
}

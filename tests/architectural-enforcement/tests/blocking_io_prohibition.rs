//! Integration Test: Blocking Call Prohibition
//!
//! **Policy**: the chat client runs on a cooperative runtime; one blocked
//! task stalls every stream and the poller with it.
//! **Required**: `tokio::time::sleep`, async `reqwest`, `tokio::net`.

use architectural_enforcement::{check_directory, Rule, Violation};

const ASYNC_CLIENT_DIRS: &[&str] = &["chat/core/src", "chat/console/src"];

const RULES: &[Rule] = &[
    Rule {
        pattern: "thread::sleep",
        reason: "Blocking sleep",
    },
    Rule {
        pattern: "reqwest::blocking",
        reason: "Blocking HTTP client",
    },
    Rule {
        pattern: "std::net::",
        reason: "Blocking network I/O",
    },
    Rule {
        pattern: "block_on(",
        reason: "Nested runtime",
    },
];

fn report(violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\nBlocking calls found in async client code:");
    for violation in violations {
        eprintln!("  {violation}");
    }
    eprintln!("\nUse tokio::time::sleep, async reqwest and tokio::net instead.");
    panic!(
        "Found {} blocking call(s) in production code",
        violations.len()
    );
}

#[test]
fn test_no_blocking_calls_in_async_client() {
    let violations: Vec<Violation> = ASYNC_CLIENT_DIRS
        .iter()
        .flat_map(|dir| check_directory(dir, RULES))
        .collect();
    report(&violations);
}

#[test]
fn test_scanned_directories_exist() {
    for dir in ASYNC_CLIENT_DIRS {
        let path = architectural_enforcement::workspace_root().join(dir);
        assert!(path.is_dir(), "missing source directory {}", path.display());
    }
}

//! Integration tests for the docrepro-sandbox crate.
//!
//! These tests launch a real Python interpreter.  When `python3` is not
//! installed they return early instead of failing.

use std::time::Duration;

use docrepro_sandbox::{ExecutionStatus, SandboxConfig, SandboxEngine, SnippetExecutor};

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

macro_rules! require_python {
    () => {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
    };
}

fn engine(timeout_ms: u64) -> SandboxEngine {
    SandboxEngine::new(SandboxConfig::new().with_timeout_ms(timeout_ms))
}

// ═══════════════════════════════════════════════════════════════════════
//  Exit paths
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn hello_world_succeeds() {
    require_python!();
    let outcome = engine(5000).execute("print(\"hello\")\n").await;
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.stdout.text.trim(), "hello");
    assert!(outcome.stderr.is_blank());
    assert!(!outcome.workspace.unwrap().exists());
}

#[tokio::test]
async fn undefined_name_exits_non_zero_with_traceback() {
    require_python!();
    let outcome = engine(5000).execute("print(undefined_name)\n").await;
    assert_eq!(outcome.status, ExecutionStatus::NonZeroExit(1));
    let last = outcome.stderr.last_line().unwrap();
    assert!(last.starts_with("NameError"), "unexpected stderr: {last}");
    assert!(!outcome.workspace.unwrap().exists());
}

#[tokio::test]
async fn explicit_exit_code_is_reported() {
    require_python!();
    let outcome = engine(5000).execute("raise SystemExit(3)\n").await;
    assert_eq!(outcome.status, ExecutionStatus::NonZeroExit(3));
}

#[tokio::test]
async fn busy_loop_times_out_and_is_cleaned_up() {
    require_python!();
    let outcome = engine(500).execute("while True: pass\n").await;
    assert_eq!(outcome.status, ExecutionStatus::TimedOut);
    assert!(outcome.elapsed >= Duration::from_millis(500));
    assert!(outcome.elapsed < Duration::from_secs(5));
    assert!(!outcome.workspace.unwrap().exists());
}

#[tokio::test]
async fn files_written_by_snippet_are_removed_with_workspace() {
    require_python!();
    let source = "with open('scratch.txt', 'w') as f:\n    f.write('data')\nprint(open('scratch.txt').read())\n";
    let outcome = engine(5000).execute(source).await;
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.stdout.text.trim(), "data");
    let workspace = outcome.workspace.unwrap();
    assert!(!workspace.exists());
    assert!(!workspace.join("scratch.txt").exists());
}

// ═══════════════════════════════════════════════════════════════════════
//  Containment
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn output_is_bounded() {
    require_python!();
    let engine = SandboxEngine::new(
        SandboxConfig::new()
            .with_timeout_ms(5000)
            .with_max_output_bytes(128),
    );
    let outcome = engine.execute("print('x' * 100000)\n").await;
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert!(outcome.stdout.truncated);
    assert_eq!(outcome.stdout.text.len(), 128);
    assert!(outcome.stdout.total_bytes > 100_000);
}

#[tokio::test]
async fn host_environment_is_not_inherited() {
    require_python!();
    // Set in the parent's environment by cargo for every test binary.
    assert!(std::env::var_os("CARGO_PKG_NAME").is_some());
    let outcome = engine(5000)
        .execute("import os\nprint(len([k for k in os.environ if k.startswith('CARGO')]))\n")
        .await;
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.stdout.text.trim(), "0");
}

#[tokio::test]
async fn working_directory_is_the_workspace() {
    require_python!();
    let outcome = engine(5000)
        .execute("import os\nprint(os.getcwd())\nprint(sorted(os.listdir('.')))\n")
        .await;
    assert_eq!(outcome.status, ExecutionStatus::Success);
    let workspace = outcome.workspace.unwrap();
    let mut lines = outcome.stdout.text.lines();
    let cwd = lines.next().unwrap();
    assert_eq!(
        std::path::Path::new(cwd).file_name(),
        workspace.file_name()
    );
    assert_eq!(lines.next().unwrap(), "['snippet.py']");
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    require_python!();
    let engine = std::sync::Arc::new(engine(5000));
    let mut handles = Vec::new();
    for i in 0..4 {
        let engine = std::sync::Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine.execute(&format!("print({i})\n")).await
        }));
    }

    let mut workspaces = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.stdout.text.trim(), i.to_string());
        let workspace = outcome.workspace.unwrap();
        assert!(!workspace.exists());
        workspaces.push(workspace);
    }
    workspaces.sort();
    workspaces.dedup();
    assert_eq!(workspaces.len(), 4);
}

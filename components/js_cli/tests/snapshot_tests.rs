//! Snapshot file round-trips through the CLI runtime.

use js_cli::{CliError, Runtime};
use tempfile::TempDir;

#[test]
fn test_save_then_exec_snapshot_matches_direct_run() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("program.snapshot");
    let path = path.to_str().unwrap();

    let source = "function add(a, b) { return a + b; } add(19, 23)";

    let mut runtime = Runtime::new();
    let direct = runtime.execute_string(source).unwrap();
    let direct_text = runtime.render(direct);
    runtime.release(direct);

    let size = runtime.save_snapshot(source, path).unwrap();
    assert!(size > 0);

    // A fresh runtime proves the snapshot carries everything needed.
    let mut replay = Runtime::new();
    let value = replay.execute_snapshot_file(path).unwrap();
    let replay_text = replay.render(value);
    replay.release(value);

    assert_eq!(direct_text, replay_text);
    assert_eq!(replay_text, "42");
}

#[test]
fn test_snapshot_info_summary() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("info.snapshot");
    let path = path.to_str().unwrap();

    let mut runtime = Runtime::new();
    runtime
        .save_snapshot("function f() {} function g() {} 1", path)
        .unwrap();

    let info = runtime.snapshot_info(path).unwrap();
    assert!(info.is_global);
    assert_eq!(info.section_count, 3, "outer code plus two functions");
    assert_eq!(info.pointer_width, 2);

    let text = runtime.render_snapshot_info(&info, false);
    assert!(text.contains("3 sections"), "{}", text);

    let json = runtime.render_snapshot_info(&info, true);
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["section_count"], 3);
    assert_eq!(parsed["is_global"], true);
}

#[test]
fn test_corrupt_snapshot_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.snapshot");
    std::fs::write(&path, b"not a snapshot at all").unwrap();

    let mut runtime = Runtime::new();
    match runtime.execute_snapshot_file(path.to_str().unwrap()) {
        Err(CliError::Script(rendered)) => {
            assert!(rendered.contains("SyntaxError"), "{}", rendered);
        }
        other => panic!("expected rejection, got {:?}", other.map(|_| ())),
    }

    match runtime.snapshot_info(path.to_str().unwrap()) {
        Err(CliError::Snapshot(_)) => {}
        other => panic!("expected a snapshot error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_snapshot_side_effect_equivalence() {
    // Parse-then-snapshot-then-exec is observationally equivalent to
    // parse-then-run for a side-effect-free program.
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pure.snapshot");
    let path = path.to_str().unwrap();

    let source = "var xs = [1, 2, 3, 4]; var sum = 0; \
                  for (var i = 0; i < xs.length; i++) { sum += xs[i]; } sum * 10";

    let mut runtime = Runtime::new();
    let direct = runtime.execute_string(source).unwrap();
    assert_eq!(runtime.render(direct), "100");
    runtime.release(direct);

    runtime.save_snapshot(source, path).unwrap();
    let mut replay = Runtime::new();
    let value = replay.execute_snapshot_file(path).unwrap();
    assert_eq!(replay.render(value), "100");
    replay.release(value);
}

mod common;

use std::time::Duration;

use tempfile::TempDir;
use tfbridge::workspace::lock::{OperationKind, StateLock};
use tfbridge::workspace::Workspace;
use tfbridge::Error;

fn workspace(root: &TempDir) -> Workspace {
    let ws = Workspace::new(root.path(), "test-handle");
    ws.ensure_dir().unwrap();
    ws
}

#[test]
fn ensure_dir_is_idempotent() {
    let root = TempDir::new().unwrap();
    let ws = Workspace::new(root.path(), "h1");
    assert!(!ws.exists());
    ws.ensure_dir().unwrap();
    ws.ensure_dir().unwrap();
    assert!(ws.exists());
    assert!(ws.path().ends_with("ws-h1"));
}

#[test]
fn init_lock_presence_tracks_file() {
    let root = TempDir::new().unwrap();
    let ws = workspace(&root);
    assert!(!ws.init_lock_exists());
    std::fs::write(ws.path().join(".terraform.lock.hcl"), b"").unwrap();
    assert!(ws.init_lock_exists());
}

#[test]
fn state_lock_round_trips() {
    let root = TempDir::new().unwrap();
    let ws = workspace(&root);

    assert!(ws.read_lock().unwrap().is_none());

    let lock = StateLock::new(OperationKind::Apply, Duration::from_secs(60));
    ws.write_lock(&lock).unwrap();
    let back = ws.read_lock().unwrap().unwrap();
    assert_eq!(back.operation, OperationKind::Apply);
    assert!(back.pid.is_none());

    ws.set_lock_pid(1234).unwrap();
    let back = ws.read_lock().unwrap().unwrap();
    assert_eq!(back.pid, Some(1234));
}

#[test]
fn check_operation_reports_live_lock() {
    let root = TempDir::new().unwrap();
    let ws = workspace(&root);
    ws.write_lock(&StateLock::new(OperationKind::Refresh, Duration::from_secs(60)))
        .unwrap();

    let lock = ws.check_operation().unwrap().unwrap();
    assert_eq!(lock.operation, OperationKind::Refresh);
    // Still present: the operation owns the workspace.
    assert!(ws.state_lock_path().exists());
}

#[test]
fn expired_lock_is_discarded_with_store() {
    let root = TempDir::new().unwrap();
    let ws = workspace(&root);
    ws.write_lock(&StateLock::new(OperationKind::Apply, Duration::ZERO))
        .unwrap();
    std::fs::write(ws.store_path(), b"{}").unwrap();

    assert!(ws.check_operation().unwrap().is_none());
    assert!(!ws.state_lock_path().exists());
    assert!(!ws.store_path().exists());
}

#[test]
fn config_write_is_refused_while_locked() {
    let root = TempDir::new().unwrap();
    let ws = workspace(&root);
    ws.write_lock(&StateLock::new(OperationKind::Destroy, Duration::from_secs(60)))
        .unwrap();

    let err = ws.write_config(b"{}").unwrap_err();
    match err {
        Error::OperationInProgress(kind) => assert_eq!(kind, OperationKind::Destroy),
        other => panic!("expected OperationInProgress, got {other}"),
    }

    let err = ws.write_state(b"{}").unwrap_err();
    assert!(matches!(err, Error::OperationInProgress(_)));
}

#[test]
fn config_write_succeeds_when_idle() {
    let root = TempDir::new().unwrap();
    let ws = workspace(&root);
    ws.write_config(br#"{"provider":{}}"#).unwrap();
    let raw = std::fs::read(ws.config_path()).unwrap();
    assert_eq!(raw, br#"{"provider":{}}"#);
}

#[test]
fn remove_state_store_keeps_config_and_state() {
    let root = TempDir::new().unwrap();
    let ws = workspace(&root);
    ws.write_config(b"{}").unwrap();
    ws.write_state(common::EMPTY_STATE.as_bytes()).unwrap();
    ws.write_lock(&StateLock::new(OperationKind::Refresh, Duration::from_secs(60)))
        .unwrap();
    std::fs::write(ws.store_path(), b"{}").unwrap();

    ws.remove_state_store().unwrap();

    assert!(!ws.state_lock_path().exists());
    assert!(!ws.store_path().exists());
    assert!(ws.config_path().exists());
    assert!(ws.tf_state_path().exists());

    // Removing again is fine.
    ws.remove_state_store().unwrap();
}

#[test]
fn read_state_returns_none_before_any_operation() {
    let root = TempDir::new().unwrap();
    let ws = workspace(&root);
    assert!(ws.read_state().unwrap().is_none());

    ws.write_state(common::VPC_STATE.as_bytes()).unwrap();
    let raw = ws.read_state().unwrap().unwrap();
    assert_eq!(raw, common::VPC_STATE.as_bytes());
}

#[test]
fn destroy_removes_workspace() {
    let root = TempDir::new().unwrap();
    let ws = workspace(&root);
    ws.write_config(b"{}").unwrap();

    ws.destroy().unwrap();
    assert!(!ws.exists());

    // Destroying a missing workspace is not an error.
    ws.destroy().unwrap();
}

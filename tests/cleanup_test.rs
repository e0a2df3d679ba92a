//! Deferred removal of scratch artifacts

use fieldsnap::{schedule_removal, CleanupOutcome};
use std::fs;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[test]
fn test_removal_after_delay() {
    let temp = TempDir::new().unwrap();
    let scratch = temp.path().join("extract-tmp");
    fs::create_dir_all(scratch.join("nested")).unwrap();
    fs::write(scratch.join("nested/file.bin"), b"temp").unwrap();

    let started = Instant::now();
    let handle = schedule_removal(&scratch, Duration::from_millis(50));
    assert_eq!(handle.path(), scratch.as_path());

    assert_eq!(handle.wait(), CleanupOutcome::Removed);
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(!scratch.exists());
}

#[test]
fn test_cancel_keeps_target() {
    let temp = TempDir::new().unwrap();
    let export = temp.path().join("export.zip");
    fs::write(&export, b"zip bytes").unwrap();

    let handle = schedule_removal(&export, Duration::from_secs(30));
    handle.cancel();

    assert_eq!(handle.wait(), CleanupOutcome::Cancelled);
    assert!(export.exists());
}

#[test]
fn test_already_absent_is_noop() {
    let temp = TempDir::new().unwrap();
    let handle = schedule_removal(temp.path().join("never-created"), Duration::ZERO);
    assert_eq!(handle.wait(), CleanupOutcome::AlreadyAbsent);
}

//! Watcher tests against the real OS backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use filedeck_core::{ChangeEvent, ChangeKind, WatchError};
use filedeck_fs::{FileSystemWatcher, WatcherState};

const WAIT: Duration = Duration::from_secs(5);

fn canonical_tempdir() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().canonicalize().unwrap();
    (dir, path)
}

fn start(path: &Path) -> (FileSystemWatcher, mpsc::Receiver<ChangeEvent>) {
    let (tx, rx) = mpsc::channel();
    let mut watcher = FileSystemWatcher::new();
    watcher
        .start(path, move |event: ChangeEvent| {
            let _ = tx.send(event);
        })
        .unwrap();
    (watcher, rx)
}

/// Collect events until one matches, then keep draining for `settle`.
fn collect_until(
    rx: &mpsc::Receiver<ChangeEvent>,
    settle: Duration,
    done: impl Fn(&ChangeEvent) -> bool,
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                let hit = done(&event);
                events.push(event);
                if hit {
                    break;
                }
            }
            Err(_) => continue,
        }
    }
    let settle_end = Instant::now() + settle;
    while let Some(remaining) = settle_end.checked_duration_since(Instant::now()) {
        if let Ok(event) = rx.recv_timeout(remaining) {
            events.push(event);
        }
    }
    events
}

#[test]
fn reports_created_file_once() {
    let (_dir, root) = canonical_tempdir();
    let (mut watcher, rx) = start(&root);
    let file = root.join("hello.txt");
    std::fs::write(&file, "hi").unwrap();

    let target = file.display().to_string();
    let events = collect_until(&rx, Duration::from_millis(300), |e| {
        e.kind == ChangeKind::Created && e.path == target
    });
    let created: Vec<_> = events
        .iter()
        .filter(|e| e.kind == ChangeKind::Created && e.path == target)
        .collect();
    assert_eq!(created.len(), 1, "events: {events:?}");
    assert!(!created[0].is_directory);
    watcher.stop();
}

#[test]
fn reports_created_directory() {
    let (_dir, root) = canonical_tempdir();
    let (mut watcher, rx) = start(&root);
    std::fs::create_dir(root.join("sub")).unwrap();

    let target = root.join("sub").display().to_string();
    let events = collect_until(&rx, Duration::ZERO, |e| e.path == target);
    let event = events.iter().find(|e| e.path == target).unwrap();
    assert_eq!(event.kind, ChangeKind::Created);
    assert!(event.is_directory);
    watcher.stop();
}

#[test]
fn temp_files_are_never_reported() {
    let (_dir, root) = canonical_tempdir();
    let (mut watcher, rx) = start(&root);
    std::fs::write(root.join("draft.tmp"), "x").unwrap();
    std::fs::write(root.join(".notes.swp"), "x").unwrap();
    std::fs::write(root.join("marker.txt"), "x").unwrap();

    let marker = root.join("marker.txt").display().to_string();
    let events = collect_until(&rx, Duration::from_millis(200), |e| e.path == marker);
    assert!(events.iter().any(|e| e.path == marker));
    assert!(
        events.iter().all(|e| !e.path.ends_with(".tmp") && !e.path.ends_with(".swp")),
        "events: {events:?}"
    );
    watcher.stop();
}

#[test]
fn rename_within_directory_is_a_move() {
    let (_dir, root) = canonical_tempdir();
    let from = root.join("a.txt");
    std::fs::write(&from, "a").unwrap();
    let (mut watcher, rx) = start(&root);
    let to = root.join("b.txt");
    std::fs::rename(&from, &to).unwrap();

    let target = to.display().to_string();
    let events = collect_until(&rx, Duration::from_millis(300), |e| e.path == target);
    let event = events.iter().find(|e| e.path == target).unwrap();
    if cfg!(target_os = "linux") {
        assert_eq!(event.kind, ChangeKind::Moved, "events: {events:?}");
        assert_eq!(event.previous_path.as_deref(), Some(from.display().to_string().as_str()));
    }
    watcher.stop();
}

#[test]
fn start_twice_is_already_running() {
    let (_dir, root) = canonical_tempdir();
    let (mut watcher, _rx) = start(&root);
    assert_eq!(watcher.state(), WatcherState::Running);
    assert_eq!(watcher.path(), Some(root.as_path()));
    assert_matches!(
        watcher.start(&root, |_event: ChangeEvent| {}),
        Err(WatchError::AlreadyRunning { .. })
    );
    watcher.stop();
}

#[test]
fn missing_directory_is_unavailable() {
    let (_dir, root) = canonical_tempdir();
    let mut watcher = FileSystemWatcher::new();
    assert_matches!(
        watcher.start(&root.join("missing"), |_event: ChangeEvent| {}),
        Err(WatchError::WatchUnavailable { .. })
    );
    assert_eq!(watcher.state(), WatcherState::Stopped);
}

#[test]
fn stop_is_idempotent_and_restartable() {
    let (_dir, root) = canonical_tempdir();
    let (mut watcher, _rx) = start(&root);
    watcher.stop();
    watcher.stop();
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert!(watcher.path().is_none());

    let (tx, rx) = mpsc::channel();
    watcher
        .start(&root, move |event: ChangeEvent| {
            let _ = tx.send(event);
        })
        .unwrap();
    std::fs::write(root.join("again.txt"), "x").unwrap();
    let target = root.join("again.txt").display().to_string();
    let events = collect_until(&rx, Duration::ZERO, |e| e.path == target);
    assert!(events.iter().any(|e| e.path == target));
    watcher.stop();
}

#[test]
fn no_delivery_after_stop_returns() {
    let (_dir, root) = canonical_tempdir();
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    let mut watcher = FileSystemWatcher::new();
    watcher
        .start(&root, move |_event: ChangeEvent| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let writer_root = root.clone();
    let writer = std::thread::spawn(move || {
        for i in 0..200 {
            let _ = std::fs::write(writer_root.join(format!("burst-{i}.txt")), "x");
        }
    });
    std::thread::sleep(Duration::from_millis(20));
    watcher.stop();
    let at_stop = delivered.load(Ordering::SeqCst);

    writer.join().unwrap();
    std::fs::write(root.join("after.txt"), "x").unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(delivered.load(Ordering::SeqCst), at_stop);
}

//! Concurrent first use of the process-wide runner log directory.
//!
//! Lives in its own binary: nothing else here touches that state.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;

use xcrunner_core::logs::{self, LogRetention};

const THREADS: usize = 8;

fn seed_logs(dir: &Path, count: usize) {
    fs::create_dir_all(dir).unwrap();
    for second in 0..count {
        let name = format!("xctest_runner_2024-05-01_1000{second:02}.log");
        fs::write(dir.join(name), "old run").unwrap();
    }
}

fn log_count(dir: &Path) -> usize {
    fs::read_dir(dir).unwrap().count()
}

#[test]
fn concurrent_first_calls_rotate_exactly_once() {
    logs::reset_log_directory();
    let roots: Vec<_> = (0..THREADS).map(|_| tempfile::tempdir().unwrap()).collect();
    let retentions: Vec<_> = roots.iter().map(|root| LogRetention::new(root.path())).collect();
    for retention in &retentions {
        seed_logs(&retention.runner_log_dir(), 6);
    }

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = retentions
        .iter()
        .cloned()
        .map(|retention| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                logs::init_log_directory(&retention).unwrap()
            })
        })
        .collect();
    let dirs: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Every caller sees the same directory...
    let chosen = dirs[0].clone();
    assert!(dirs.iter().all(|dir| *dir == chosen), "{dirs:?}");
    assert_eq!(logs::current_log_directory(), Some(chosen.clone()));

    // ...and only that one was rotated; the rest keep their six logs.
    let rotated: Vec<_> = retentions
        .iter()
        .map(LogRetention::runner_log_dir)
        .filter(|dir| log_count(dir) == 0)
        .collect();
    assert_eq!(rotated, [chosen]);
    let untouched = retentions
        .iter()
        .map(LogRetention::runner_log_dir)
        .filter(|dir| log_count(dir) == 6)
        .count();
    assert_eq!(untouched, THREADS - 1);

    logs::reset_log_directory();
}

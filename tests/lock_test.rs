use std::path::Path;

use article_pipeline::lock::{self, LOCK_FILE_NAME, PID_FILE_NAME};

fn recorded_pid(dir: &Path) -> u32 {
    let contents = std::fs::read_to_string(dir.join(PID_FILE_NAME)).unwrap();
    contents.lines().next().unwrap().trim().parse().unwrap()
}

#[test]
fn lock_records_pid_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let store_dir = dir.path().join("data");

    let guard = lock::try_acquire(&store_dir).unwrap();
    assert_eq!(recorded_pid(&store_dir), std::process::id());

    drop(guard);
    assert!(!store_dir.join(PID_FILE_NAME).exists());
}

#[test]
fn lock_creates_nested_store_dir() {
    let dir = tempfile::tempdir().unwrap();
    let store_dir = dir.path().join("nested").join("data");

    let _guard = lock::try_acquire(&store_dir).unwrap();
    assert!(store_dir.join(LOCK_FILE_NAME).exists());
}

#[test]
fn second_owner_is_refused_with_holder_pid() {
    let dir = tempfile::tempdir().unwrap();
    let store_dir = dir.path().join("data");

    let _guard = lock::try_acquire(&store_dir).unwrap();

    let err = lock::try_acquire(&store_dir).unwrap_err();
    assert!(err.contains("Another article-pipeline process"), "{}", err);
    assert!(err.contains(&std::process::id().to_string()), "{}", err);
}

#[test]
fn leftover_pid_file_does_not_block() {
    let dir = tempfile::tempdir().unwrap();
    let store_dir = dir.path().join("data");
    std::fs::create_dir_all(&store_dir).unwrap();
    std::fs::write(store_dir.join(PID_FILE_NAME), "99999999").unwrap();
    std::fs::write(store_dir.join(LOCK_FILE_NAME), "").unwrap();

    let _guard = lock::try_acquire(&store_dir).unwrap();
    assert_eq!(recorded_pid(&store_dir), std::process::id());
}

#[test]
fn lock_can_be_retaken_after_release() {
    let dir = tempfile::tempdir().unwrap();
    let store_dir = dir.path().join("data");

    drop(lock::try_acquire(&store_dir).unwrap());
    assert!(lock::try_acquire(&store_dir).is_ok());
}

#[test]
fn external_holder_without_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let store_dir = dir.path().join("data");
    std::fs::create_dir_all(&store_dir).unwrap();

    let mut external = fslock::LockFile::open(&store_dir.join(LOCK_FILE_NAME)).unwrap();
    assert!(external.try_lock().unwrap());

    let err = lock::try_acquire(&store_dir).unwrap_err();
    assert!(err.contains("holds the store lock"), "{}", err);

    external.unlock().unwrap();
}

//! Fingerprint polling and reload semantics

use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use crate::config::Config;
use crate::error::WatchError;
use crate::tests::test_utils::{scripted_watcher, wait_until};
use crate::watcher::hot_reload::{ConfigHotReloader, fingerprint};

fn toml_path(path: &Path) -> String {
    format!("{:?}", path.to_str().unwrap())
}

#[test]
fn test_fingerprint_tracks_content() {
    assert_eq!(fingerprint(b"debounce_ms = 5"), fingerprint(b"debounce_ms = 5"));
    assert_ne!(fingerprint(b"debounce_ms = 5"), fingerprint(b"debounce_ms = 6"));
}

#[test]
fn test_poll_primes_then_detects_changes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("driftwatch.toml");
    fs::write(&path, "debounce_ms = 5\n").unwrap();

    let mut reloader = ConfigHotReloader::new(&path);
    assert!(!reloader.poll().unwrap(), "first poll only primes");
    assert!(!reloader.poll().unwrap());

    fs::write(&path, "debounce_ms = 6\n").unwrap();
    assert!(reloader.poll().unwrap());
    assert!(!reloader.poll().unwrap());

    // Rewriting identical bytes is not a change
    fs::write(&path, "debounce_ms = 6\n").unwrap();
    assert!(!reloader.poll().unwrap());
}

#[test]
fn test_missing_file_then_created_counts_as_change() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("later.toml");

    let mut reloader = ConfigHotReloader::new(&path);
    reloader.prime();
    assert!(matches!(reloader.poll(), Err(WatchError::Io(_))));

    fs::write(&path, "batch_enabled = true\n").unwrap();
    assert!(reloader.poll().unwrap());
}

#[tokio::test]
async fn test_reload_swaps_config_and_watch_paths() {
    let dir = TempDir::new().unwrap();
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let first_root = first.path().canonicalize().unwrap();
    let second_root = second.path().canonicalize().unwrap();

    let path = dir.path().join("driftwatch.toml");
    fs::write(
        &path,
        format!("watch_paths = [{}]\ndebounce_ms = 0\n", toml_path(&first_root)),
    )
    .unwrap();

    let (mut watcher, backend) = scripted_watcher(Config::load(&path).unwrap());
    watcher.start().await.unwrap();
    assert_eq!(watcher.list_paths(), vec![first_root.clone()]);

    fs::write(
        &path,
        format!(
            "watch_paths = [{}]\ndebounce_ms = 0\nbatch_size = 7\n",
            toml_path(&second_root)
        ),
    )
    .unwrap();
    watcher.reload_config().await.unwrap();

    assert_eq!(watcher.config().batch_size, 7);
    assert_eq!(watcher.config().config_file.as_deref(), Some(path.as_path()));
    assert_eq!(watcher.list_paths(), vec![second_root.clone()]);
    assert_eq!(backend.watched(), vec![second_root]);

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_reload_keeps_previous_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("driftwatch.toml");
    fs::write(&path, "batch_size = 9\n").unwrap();

    let (mut watcher, _backend) = scripted_watcher(Config::load(&path).unwrap());
    watcher.start().await.unwrap();

    fs::write(&path, "batch_size = 0\n").unwrap();
    assert!(watcher.reload_config().await.is_err());
    assert_eq!(watcher.config().batch_size, 9);

    fs::write(&path, "batch_size = [[[\n").unwrap();
    assert!(watcher.reload_config().await.is_err());
    assert_eq!(watcher.config().batch_size, 9);

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_reload_without_file_is_an_error() {
    let (watcher, _backend) = scripted_watcher(Config::default());
    assert!(matches!(
        watcher.reload_config().await,
        Err(WatchError::Config(_))
    ));
}

#[tokio::test]
async fn test_poller_applies_file_changes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("driftwatch.toml");
    fs::write(&path, "hot_reload = true\nbatch_size = 3\n").unwrap();

    let (mut watcher, _backend) = scripted_watcher(Config::load(&path).unwrap());
    watcher.start().await.unwrap();

    fs::write(&path, "hot_reload = true\nbatch_size = 11\n").unwrap();
    assert!(wait_until(Duration::from_secs(5), || watcher.config().batch_size == 11).await);

    watcher.stop().await.unwrap();
}

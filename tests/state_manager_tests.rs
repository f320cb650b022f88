//! Integration tests for the file-backed state manager.

mod common;

use common::{ScopeDir, wait_until};
use config_manager::error::ConfigError;
use config_manager::logging::Logger;
use config_manager::model::{FileStateManager, StateManager, StateManagerOptions};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn open(dir: &ScopeDir) -> FileStateManager {
    FileStateManager::with_options(
        dir.root.path(),
        &dir.scope,
        StateManagerOptions::default().with_test_counter(),
        Logger::null(),
    )
    .unwrap()
}

fn raw(sm: &FileStateManager, key: &str) -> Option<Value> {
    sm.get_key(key)
        .ok()
        .map(|cfg| serde_json::from_str(cfg.raw_json()).unwrap())
}

#[test]
fn test_load_and_lookup() {
    let dir = ScopeDir::new("configtest");
    dir.write(&[("foo", json!(true)), ("bar", json!(3))]);

    let sm = open(&dir);
    assert_eq!(raw(&sm, "foo"), Some(json!(true)));
    assert_eq!(raw(&sm, "bar"), Some(json!(3)));
    assert!(sm.get_key("baz").unwrap_err().is_not_found());
    assert_eq!(sm.file_path(), dir.file_path());

    let snapshot = sm.snapshot().unwrap();
    assert!(snapshot.generation() >= 1);
    assert_eq!(snapshot.len(), 2);
    sm.close();
}

#[test]
fn test_missing_file() {
    let dir = ScopeDir::new("configtest");
    let err = FileStateManager::new(dir.root.path(), "other", Logger::null())
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::PathNotFound { ref path } if path.ends_with("other/configs.json")));
}

#[test]
fn test_duplicate_keys_last_wins() {
    let dir = ScopeDir::new("configtest");
    dir.write_raw(br#"[{"key":"x","value":1},{"key":"x","value":2}]"#);

    let sm = open(&dir);
    assert_eq!(raw(&sm, "x"), Some(json!(2)));
}

#[test]
fn test_reload_picks_up_changes() {
    let dir = ScopeDir::new("configtest");
    dir.write(&[("foo", json!(1)), ("bar", json!("keep"))]);
    let sm = open(&dir);
    let counter = Arc::clone(sm.notify_counter().unwrap());
    let first_generation = sm.snapshot().unwrap().generation();

    dir.write(&[("foo", json!(2)), ("bar", json!("keep"))]);
    assert!(wait_until(&counter, || raw(&sm, "foo") == Some(json!(2))));
    assert!(sm.snapshot().unwrap().generation() > first_generation);

    // Deleted keys disappear after the next reload.
    dir.write(&[("foo", json!(2))]);
    assert!(wait_until(&counter, || raw(&sm, "bar").is_none()));
    assert!(sm.get_key("bar").unwrap_err().is_not_found());
}

#[test]
fn test_bad_reload_keeps_previous_snapshot() {
    let dir = ScopeDir::new("configtest");
    dir.write(&[("foo", json!("good"))]);
    let sm = open(&dir);
    let counter = Arc::clone(sm.notify_counter().unwrap());
    let generation = sm.snapshot().unwrap().generation();

    let seen = counter.count();
    dir.write_raw(b"[{\"key\": \"foo\", \"value\": ");
    assert!(counter.wait_timeout(seen + 1, common::RELOAD_TIMEOUT));
    assert_eq!(raw(&sm, "foo"), Some(json!("good")));
    assert_eq!(sm.snapshot().unwrap().generation(), generation);

    dir.write(&[("foo", json!("recovered"))]);
    assert!(wait_until(&counter, || raw(&sm, "foo") == Some(json!("recovered"))));
}

#[test]
fn test_update_channel_notified() {
    let dir = ScopeDir::new("configtest");
    dir.write(&[("foo", json!(1))]);

    let (tx, rx) = sync_channel(1);
    let sm = FileStateManager::with_options(
        dir.root.path(),
        &dir.scope,
        StateManagerOptions::default()
            .with_update_channel(tx)
            .with_test_counter(),
        Logger::null(),
    )
    .unwrap();
    rx.recv_timeout(common::RELOAD_TIMEOUT).unwrap();

    let counter = Arc::clone(sm.notify_counter().unwrap());
    dir.write(&[("foo", json!(2))]);
    assert!(wait_until(&counter, || raw(&sm, "foo") == Some(json!(2))));
    rx.recv_timeout(common::RELOAD_TIMEOUT).unwrap();
}

#[test]
fn test_update_channel_never_blocks_reloads() {
    let dir = ScopeDir::new("configtest");
    dir.write(&[("n", json!(0))]);

    // Nobody drains this channel.
    let (tx, _rx) = sync_channel(1);
    let sm = FileStateManager::with_options(
        dir.root.path(),
        &dir.scope,
        StateManagerOptions::default()
            .with_update_channel(tx)
            .with_test_counter(),
        Logger::null(),
    )
    .unwrap();
    let counter = Arc::clone(sm.notify_counter().unwrap());

    for n in 1..=3 {
        dir.write(&[("n", json!(n))]);
        assert!(wait_until(&counter, || raw(&sm, "n") == Some(json!(n))));
    }
}

#[test]
fn test_debug_vars_follow_reloads() {
    let dir = ScopeDir::new("configtest");
    dir.write(&[("foo", json!({"a": 1}))]);
    let sm = open(&dir);
    let counter = Arc::clone(sm.notify_counter().unwrap());

    let vars = sm.debug_vars();
    assert_eq!(vars.values["foo"].get(), r#"{"a":1}"#);

    dir.write(&[("bar", json!(false))]);
    assert!(wait_until(&counter, || raw(&sm, "bar").is_some()));
    let vars = sm.debug_vars();
    assert!(!vars.values.contains_key("foo"));
    assert_eq!(vars.values["bar"].get(), "false");
}

#[test]
fn test_initial_load_timeout() {
    let dir = ScopeDir::new("configtest");
    dir.write_raw(b"not json");

    let err = FileStateManager::with_options(
        dir.root.path(),
        &dir.scope,
        StateManagerOptions::default().with_initial_load_timeout(Duration::from_millis(200)),
        Logger::null(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, ConfigError::InitialLoadTimeout { .. }));
}

#[test]
fn test_readers_see_whole_snapshots() {
    let dir = ScopeDir::new("configtest");
    dir.write(&[("a", json!(0)), ("b", json!(0))]);
    let sm = Arc::new(open(&dir));
    let counter = Arc::clone(sm.notify_counter().unwrap());
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let sm = Arc::clone(&sm);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    let snapshot = sm.snapshot().unwrap();
                    let a = snapshot.get("a").unwrap();
                    let b = snapshot.get("b").unwrap();
                    assert_eq!(a.raw_json(), b.raw_json());
                }
            })
        })
        .collect();

    for n in 1..=5 {
        dir.write(&[("a", json!(n)), ("b", json!(n))]);
        assert!(wait_until(&counter, || raw(&sm, "a") == Some(json!(n))));
    }

    done.store(true, Ordering::Relaxed);
    for r in readers {
        r.join().unwrap();
    }
}

#[test]
fn test_close_is_idempotent() {
    let dir = ScopeDir::new("configtest");
    dir.write(&[("foo", json!(1))]);
    let sm = open(&dir);
    sm.close();
    sm.close();
    // The last snapshot stays readable after close.
    assert_eq!(raw(&sm, "foo"), Some(json!(1)));
}

#[test]
fn test_in_place_write_reloads() {
    let dir = ScopeDir::new("configtest");
    dir.write(&[("foo", json!("before"))]);
    let sm = open(&dir);
    let counter = Arc::clone(sm.notify_counter().unwrap());

    std::fs::write(dir.file_path(), common::configs_json(&[("foo", json!("after"))])).unwrap();
    assert!(wait_until(&counter, || raw(&sm, "foo") == Some(json!("after"))));
}

#[cfg(unix)]
#[test]
fn test_chmod_rewatches_and_reloads() {
    use std::os::unix::fs::PermissionsExt;

    let dir = ScopeDir::new("configtest");
    dir.write(&[("foo", json!(1))]);
    let sm = open(&dir);
    let counter = Arc::clone(sm.notify_counter().unwrap());

    let seen = counter.count();
    std::fs::set_permissions(dir.file_path(), std::fs::Permissions::from_mode(0o600)).unwrap();
    assert!(counter.wait_timeout(seen + 1, common::RELOAD_TIMEOUT));
    assert_eq!(raw(&sm, "foo"), Some(json!(1)));

    // The re-registered watch still sees later in-place writes.
    std::fs::write(dir.file_path(), common::configs_json(&[("foo", json!(2))])).unwrap();
    assert!(wait_until(&counter, || raw(&sm, "foo") == Some(json!(2))));
}

#[test]
fn test_record_without_value_does_not_block_load() {
    let dir = ScopeDir::new("configtest");
    dir.write_raw(br#"[{"key":"foo","value":1},{"key":"bar"}]"#);

    let sm = FileStateManager::with_options(
        dir.root.path(),
        &dir.scope,
        StateManagerOptions::default().with_initial_load_timeout(common::RELOAD_TIMEOUT),
        Logger::null(),
    )
    .unwrap();
    assert_eq!(raw(&sm, "foo"), Some(json!(1)));

    let bar = sm.get_key("bar").unwrap();
    assert!(bar.raw_value().is_none());
    assert!(matches!(
        bar.decode::<i64>().unwrap_err(),
        ConfigError::UnmarshalMismatch { .. }
    ));
}

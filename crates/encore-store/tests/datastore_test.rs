use std::fs;
use std::io::{Seek, SeekFrom, Write};

use encore_config::testing::TestEnvironment;
use encore_store::journal::JOURNAL_FILENAME;
use encore_store::{Datastore, Lookup, PayloadKind, StoreError, StoreOptions, StoreRegistry, Value};

fn open_store(env: &TestEnvironment) -> Datastore {
    Datastore::open(StoreOptions::new("downloads", env.data_dir("downloads"))).unwrap()
}

#[test]
fn test_streaming_write() {
    let env = TestEnvironment::new().unwrap();
    let store = open_store(&env);

    let mut handle = store
        .open_write_file("song", PayloadKind::Binary, Some("webm"), false)
        .unwrap();
    assert_eq!(store.reserved_keys(), vec!["song"]);
    assert!(!store.contains_file("song"));

    let chunk = vec![7u8; 64 * 1024];
    for _ in 0..16 {
        handle.write_all(&chunk).unwrap();
    }
    let size = store.close_write_file(handle).unwrap();
    assert_eq!(size, 1024 * 1024);

    let Lookup::Hit(path) = store.get_file_path("song").unwrap() else {
        panic!("expected the finished file");
    };
    assert_eq!(fs::metadata(&path).unwrap().len(), 1024 * 1024);
    assert!(path.ends_with("song.webm"));
    assert_eq!(store.statistics().saves, 1);
    assert!(store.reserved_keys().is_empty());
}

#[test]
fn test_write_file_refuses_to_overwrite() {
    let env = TestEnvironment::new().unwrap();
    let store = open_store(&env);

    store.write_file("meta", "first", Some("json")).unwrap();
    let err = store.write_file("meta", "second", Some("json")).unwrap_err();
    assert!(matches!(err, StoreError::KeyExists { .. }));
    assert_eq!(
        store.get_file("meta").unwrap().hit(),
        Some(Value::Text("first".into()))
    );
}

#[test]
fn test_reserved_key_blocks_other_writers() {
    let env = TestEnvironment::new().unwrap();
    let store = open_store(&env);

    let handle = store
        .open_write_file("song", PayloadKind::Binary, None, false)
        .unwrap();
    assert!(matches!(
        store.open_write_file("song", PayloadKind::Binary, None, true),
        Err(StoreError::Reserved { .. })
    ));
    assert!(matches!(
        store.write_file("song", b"x".to_vec(), None),
        Err(StoreError::Reserved { .. })
    ));
    assert!(matches!(store.delete("song"), Err(StoreError::Reserved { .. })));

    store.discard_write_file(handle).unwrap();
    assert!(!env.data_dir("downloads").join("song").exists());
    assert!(store.reserved_keys().is_empty());
}

#[test]
fn test_open_existing_key_without_append_fails() {
    let env = TestEnvironment::new().unwrap();
    let store = open_store(&env);
    store.write_file("song", b"abc".to_vec(), Some("webm")).unwrap();

    let err = store
        .open_write_file("song", PayloadKind::Binary, Some("webm"), false)
        .unwrap_err();
    assert!(matches!(err, StoreError::KeyExists { .. }));
}

#[test]
fn test_append_continues_existing_file() {
    let env = TestEnvironment::new().unwrap();
    let store = open_store(&env);
    store.write_file("song", b"abc".to_vec(), Some("webm")).unwrap();

    let mut handle = store
        .open_write_file("song", PayloadKind::Binary, Some("webm"), true)
        .unwrap();
    assert!(!store.contains_file("song"));
    assert_eq!(handle.len().unwrap(), 3);
    handle.write_all(b"def").unwrap();
    assert_eq!(store.close_write_file(handle).unwrap(), 6);

    assert_eq!(
        store.get_file("song").unwrap().hit(),
        Some(Value::Bytes(b"abcdef".to_vec()))
    );
    assert_eq!(store.statistics().size, 6);
}

#[test]
fn test_failed_append_keeps_existing_entry() {
    let env = TestEnvironment::new().unwrap();
    let dir = env.data_dir("downloads");
    {
        let store = open_store(&env);
        store.write_file("song", vec![9u8; 32], Some("webm")).unwrap();
        // Nothing can be opened for writing at song.opus.
        fs::create_dir(dir.join("song.opus")).unwrap();

        let err = store
            .open_write_file("song", PayloadKind::Binary, Some("opus"), true)
            .unwrap_err();
        assert!(matches!(err, StoreError::WriteFailure { .. }));
        assert!(store.contains_file("song"));
        assert!(store.reserved_keys().is_empty());
        assert!(dir.join("song.webm").is_file());
    }

    let store = open_store(&env);
    let meta = store.get_metadata("song").unwrap();
    assert_eq!(meta.filename, "song.webm");
    assert_eq!(meta.size_bytes, 32);
}

#[test]
fn test_positional_writes_through_handle() {
    let env = TestEnvironment::new().unwrap();
    let store = open_store(&env);

    let mut handle = store
        .open_write_file("song", PayloadKind::Binary, None, false)
        .unwrap();
    handle.seek(SeekFrom::Start(4)).unwrap();
    handle.write_all(b"5678").unwrap();
    handle.seek(SeekFrom::Start(0)).unwrap();
    handle.write_all(b"1234").unwrap();
    store.close_write_file(handle).unwrap();

    assert_eq!(
        store.get_file("song").unwrap().hit(),
        Some(Value::Bytes(b"12345678".to_vec()))
    );
}

#[test]
fn test_close_after_clear_is_not_reserved() {
    let env = TestEnvironment::new().unwrap();
    let store = open_store(&env);
    store.write_file("done", b"x".to_vec(), None).unwrap();

    let handle = store
        .open_write_file("partial", PayloadKind::Binary, None, false)
        .unwrap();
    assert_eq!(store.clear().unwrap(), 1);
    // Files of open streaming writes survive a clear.
    assert!(env.data_dir("downloads").join("partial").exists());
    assert_eq!(store.close_write_file(handle).unwrap(), 0);
    assert!(store.contains_file("partial"));
}

#[test]
fn test_restore_after_journal_loss() {
    let env = TestEnvironment::new().unwrap();
    let dir = env.data_dir("downloads");
    {
        let store = open_store(&env);
        store.write_file("a", vec![1u8; 10], Some("webm")).unwrap();
        store.write_file("b", "meta", Some("json")).unwrap();
    }
    fs::remove_file(dir.join(JOURNAL_FILENAME)).unwrap();

    let store = open_store(&env);
    assert!(store.is_empty());
    let report = store.reconcile(true).unwrap();
    assert_eq!(report.adopted, vec!["a", "b"]);

    let a = store.get_metadata("a").unwrap();
    assert_eq!(a.size_bytes, 10);
    assert_eq!(a.filename, "a.webm");
    assert_eq!(a.access_count, 0);
    assert!(a.is_binary());
    assert_eq!(store.get_metadata("b").unwrap().size_bytes, 4);
    assert_eq!(store.statistics().size, 14);
    assert!(store.snapshot().is_consistent());
}

#[test]
fn test_corrupt_journal_triggers_restore() {
    let env = TestEnvironment::new().unwrap();
    let dir = env.data_dir("downloads");
    {
        let store = open_store(&env);
        store.write_file("track", vec![9u8; 32], Some("m4a")).unwrap();
    }
    fs::write(dir.join(JOURNAL_FILENAME), b"garbage").unwrap();

    let store = open_store(&env);
    assert!(store.contains_file("track"));
    assert_eq!(store.get_metadata("track").unwrap().size_bytes, 32);
    assert!(dir.join("track.m4a").exists());
}

#[test]
fn test_reconcile_without_restore_keeps_orphans() {
    let env = TestEnvironment::new().unwrap();
    let store = open_store(&env);
    env.plant_file(&env.data_dir("downloads"), "stray.webm", b"abc")
        .unwrap();

    let report = store.reconcile(false).unwrap();
    assert_eq!(report.kept_files, vec!["stray.webm"]);
    assert!(report.is_clean());
    assert!(!store.contains_file("stray"));
    assert!(env.data_dir("downloads").join("stray.webm").exists());
}

#[test]
fn test_reconcile_updates_changed_extension() {
    let env = TestEnvironment::new().unwrap();
    let dir = env.data_dir("downloads");
    let store = open_store(&env);
    store.write_file("song", vec![0u8; 3], Some("webm")).unwrap();
    fs::rename(dir.join("song.webm"), dir.join("song.opus")).unwrap();

    let report = store.reconcile(false).unwrap();
    assert_eq!(report.renamed, vec!["song"]);
    let meta = store.get_metadata("song").unwrap();
    assert_eq!(meta.filename, "song.opus");
    assert_eq!(meta.extension, ".opus");
    assert!(store.get_file_path("song").unwrap().is_hit());
}

#[test]
fn test_reconcile_skips_reserved_files() {
    let env = TestEnvironment::new().unwrap();
    let store = open_store(&env);

    let mut handle = store
        .open_write_file("song", PayloadKind::Binary, Some("webm"), false)
        .unwrap();
    handle.write_all(b"partial").unwrap();

    let report = store.reconcile(true).unwrap();
    assert!(report.adopted.is_empty());
    assert!(!store.contains_file("song"));

    store.close_write_file(handle).unwrap();
    assert!(store.contains_file("song"));
}

#[test]
fn test_get_after_delete_misses() {
    let env = TestEnvironment::new().unwrap();
    let store = open_store(&env);
    store.write_file("k", "v", None).unwrap();
    assert!(store.get_file("k").unwrap().is_hit());
    assert!(store.delete("k").unwrap());
    assert_eq!(store.get_file("k").unwrap(), Lookup::Miss);
}

#[test]
fn test_registry_hands_out_datastores() {
    let env = TestEnvironment::new().unwrap();
    let registry = StoreRegistry::new(&env.config().storage);

    let store = registry.datastore("downloads").unwrap();
    store.write_file("k", "v", None).unwrap();
    let again = registry.datastore("downloads").unwrap();
    assert!(again.contains_file("k"));
    assert_eq!(env.list_files(&env.data_dir("downloads")).unwrap().len(), 2);
}

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use encore_store::journal::JOURNAL_FILENAME;
use encore_store::{
    Cache, Clock, EvictionPolicy, Lookup, ManualClock, PutOptions, StoreError, StoreOptions, Value,
};
use tempfile::TempDir;

fn open_cache(dir: &Path, max_bytes: u64) -> Cache {
    Cache::open(StoreOptions::new("test", dir).max_bytes(max_bytes)).unwrap()
}

fn open_with_clock(dir: &Path, clock: Arc<ManualClock>) -> Cache {
    Cache::open(StoreOptions::new("test", dir).clock(clock)).unwrap()
}

fn data_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n != JOURNAL_FILENAME)
        .collect();
    names.sort();
    names
}

#[test]
fn test_basic_hit() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 1024);

    let key = cache
        .put("abc", b"xyz".to_vec(), PutOptions::new().extension("bin"))
        .unwrap();
    assert_eq!(key, "abc");
    assert_eq!(
        cache.get("abc").unwrap(),
        Lookup::Hit(Value::Bytes(b"xyz".to_vec()))
    );

    let stats = cache.statistics();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.saves, 1);
    assert_eq!(stats.size, 3);
    assert!(temp.path().join("abc.bin").is_file());
}

#[test]
fn test_text_and_dict_round_trip() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 1024);

    cache.put("lyrics", "la la la", PutOptions::new()).unwrap();
    let song = serde_json::json!({"title": "Encore", "duration": 215});
    let song = Value::from_json(song).unwrap();
    cache
        .put("song", song.clone(), PutOptions::new().extension("json"))
        .unwrap();

    assert_eq!(
        cache.get("lyrics").unwrap().hit(),
        Some(Value::Text("la la la".into()))
    );
    assert_eq!(cache.get("song").unwrap().hit(), Some(song));
    assert!(cache.get_metadata("song").unwrap().is_dict());
    assert!(!cache.get_metadata("lyrics").unwrap().is_binary());
}

#[test]
fn test_ttl_expiry() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = open_with_clock(temp.path(), Arc::clone(&clock));

    let past = clock.now() - Duration::seconds(1);
    cache
        .put("k", "v", PutOptions::new().expires_at(past))
        .unwrap();
    assert!(cache.contains("k"));

    assert_eq!(cache.get("k").unwrap(), Lookup::Miss);
    assert!(!cache.contains("k"));
    assert!(!temp.path().join("k").exists());
    let stats = cache.statistics();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 0);
}

#[test]
fn test_ttl_equal_to_now_is_expired() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = open_with_clock(temp.path(), Arc::clone(&clock));

    let at = clock.now() + Duration::seconds(10);
    cache.put("k", "v", PutOptions::new().expires_at(at)).unwrap();
    assert!(cache.get_path("k").unwrap().is_hit());

    clock.set(at);
    assert_eq!(cache.get_path("k").unwrap(), Lookup::Miss);
    assert_eq!(cache.len(), 0);
}

#[test]
fn test_lru_eviction_respects_reads() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 10);

    cache.put("k1", b"111".to_vec(), PutOptions::new()).unwrap();
    cache.put("k2", b"222".to_vec(), PutOptions::new()).unwrap();
    cache.put("k3", b"333".to_vec(), PutOptions::new()).unwrap();
    assert!(cache.get("k2").unwrap().is_hit());
    cache.put("k4", b"444".to_vec(), PutOptions::new()).unwrap();

    assert!(!cache.contains("k1"));
    assert!(cache.contains("k2"));

    cache.put("k5", b"555".to_vec(), PutOptions::new()).unwrap();
    assert!(cache.contains("k2"));
    assert!(!cache.contains("k3"));
    assert_eq!(cache.keys(), vec!["k2", "k4", "k5"]);

    let stats = cache.statistics();
    assert!(stats.size <= 10);
    assert_eq!(stats.evictions, 2);
    assert_eq!(stats.deletions, 2);
    assert!(cache.snapshot().is_consistent());
}

#[test]
fn test_one_byte_over_budget_evicts_once() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 10);

    cache.put("a", vec![0u8; 5], PutOptions::new()).unwrap();
    cache.put("b", vec![0u8; 5], PutOptions::new()).unwrap();
    cache.put("c", vec![0u8; 1], PutOptions::new()).unwrap();

    assert_eq!(cache.statistics().evictions, 1);
    assert_eq!(cache.keys(), vec!["b", "c"]);
}

#[test]
fn test_too_large_has_no_side_effects() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 4);
    cache.put("small", b"ab".to_vec(), PutOptions::new()).unwrap();
    let journal_before = fs::read(temp.path().join(JOURNAL_FILENAME)).unwrap();

    let err = cache
        .put("big", vec![0u8; 5], PutOptions::new())
        .unwrap_err();
    assert!(matches!(err, StoreError::TooLarge { size: 5, max: 4 }));
    assert!(cache.contains("small"));
    assert_eq!(data_files(temp.path()), vec!["small"]);
    assert_eq!(
        fs::read(temp.path().join(JOURNAL_FILENAME)).unwrap(),
        journal_before
    );
}

#[test]
fn test_overwrite_adjusts_size_by_delta() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 1024);

    cache
        .put("k", vec![1u8; 10], PutOptions::new().extension("old"))
        .unwrap();
    cache.put("other", vec![1u8; 7], PutOptions::new()).unwrap();
    cache
        .put("k", vec![2u8; 4], PutOptions::new().extension("new"))
        .unwrap();

    assert_eq!(cache.statistics().size, 11);
    assert!(!temp.path().join("k.old").exists());
    assert_eq!(fs::read(temp.path().join("k.new")).unwrap(), vec![2u8; 4]);
    assert_eq!(cache.get_metadata("k").unwrap().extension, ".new");
}

#[test]
fn test_invalid_key_has_no_side_effects() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 1024);
    cache.put("ok", "v", PutOptions::new()).unwrap();
    let journal_before = fs::read(temp.path().join(JOURNAL_FILENAME)).unwrap();

    for key in ["", "a b", "x/y", "song.webm", "what?"] {
        let err = cache.put(key, "v", PutOptions::new()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }), "{:?}", key);
        assert!(matches!(
            cache.get(key),
            Err(StoreError::InvalidKey { .. })
        ));
    }

    assert_eq!(data_files(temp.path()), vec!["ok"]);
    assert_eq!(
        fs::read(temp.path().join(JOURNAL_FILENAME)).unwrap(),
        journal_before
    );
    assert_eq!(cache.statistics().misses, 0);
}

#[test]
fn test_edge_length_keys_round_trip() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 1 << 20);

    let longest = "k".repeat(255);
    for key in ["a", "AZaz09_-~!@#$%^&()[]{}+=,;'`", longest.as_str()] {
        cache.put(key, b"payload".to_vec(), PutOptions::new()).unwrap();
        assert_eq!(
            cache.get(key).unwrap().hit(),
            Some(Value::Bytes(b"payload".to_vec()))
        );
    }
}

#[test]
fn test_read_updates_access_metadata() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = open_with_clock(temp.path(), Arc::clone(&clock));
    cache.put("k", "v", PutOptions::new()).unwrap();

    let before = cache.get_metadata("k").unwrap();
    clock.advance(Duration::seconds(5));
    cache.get("k").unwrap();
    let after = cache.get_metadata("k").unwrap();

    assert_eq!(after.access_count, before.access_count + 1);
    assert!(after.last_used_at > before.last_used_at);
}

#[test]
fn test_delete_removes_entry_and_file() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 1024);
    cache.put("k", "v", PutOptions::new().extension("txt")).unwrap();

    assert!(cache.delete("k").unwrap());
    assert!(!cache.delete("k").unwrap());
    assert!(!cache.contains("k"));
    assert!(!temp.path().join("k.txt").exists());
    assert_eq!(cache.statistics().deletions, 1);
}

#[test]
fn test_evict_by_policy() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 1024);
    cache.put("small", vec![0u8; 1], PutOptions::new()).unwrap();
    cache.put("large", vec![0u8; 50], PutOptions::new()).unwrap();
    cache.put("read", vec![0u8; 2], PutOptions::new()).unwrap();
    cache.get("read").unwrap();
    cache.get("read").unwrap();
    cache.get("small").unwrap();

    assert_eq!(cache.evict(EvictionPolicy::Largest, 1), vec!["large"]);
    assert_eq!(cache.evict(EvictionPolicy::Lfu, 1), vec!["small"]);
    assert_eq!(cache.evict(EvictionPolicy::Lru, 5), vec!["read"]);
    assert!(cache.is_empty());
    assert_eq!(cache.statistics().evictions, 3);
    assert_eq!(data_files(temp.path()), Vec::<String>::new());
}

#[test]
fn test_collect_only_removes_expired() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = open_with_clock(temp.path(), Arc::clone(&clock));
    let now = clock.now();

    cache
        .put("old", "v", PutOptions::new().expires_at(now - Duration::seconds(1)))
        .unwrap();
    cache
        .put("later", "v", PutOptions::new().expires_at(now + Duration::hours(1)))
        .unwrap();
    cache.put("forever", "v", PutOptions::new()).unwrap();

    assert_eq!(cache.collect(), vec!["old"]);
    assert_eq!(cache.keys(), vec!["later", "forever"]);

    clock.advance(Duration::hours(2));
    assert_eq!(cache.collect(), vec!["later"]);
    assert_eq!(cache.keys(), vec!["forever"]);
}

#[test]
fn test_clear_keeps_valid_journal() {
    let temp = TempDir::new().unwrap();
    {
        let cache = open_cache(temp.path(), 1024);
        cache.put("a", "1", PutOptions::new()).unwrap();
        cache.put("b", "2", PutOptions::new().extension("txt")).unwrap();
        fs::write(temp.path().join("stray"), b"x").unwrap();

        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.is_empty());
        assert_eq!(data_files(temp.path()), Vec::<String>::new());
        assert!(cache.snapshot().is_consistent());
    }

    let reopened = open_cache(temp.path(), 1024);
    assert!(reopened.is_empty());
    assert_eq!(reopened.statistics().size, 0);
}

#[test]
fn test_reopen_preserves_entries_and_order() {
    let temp = TempDir::new().unwrap();
    {
        let cache = open_cache(temp.path(), 1024);
        cache.put("a", "1", PutOptions::new()).unwrap();
        cache.put("b", "2", PutOptions::new()).unwrap();
        cache.get("a").unwrap();
    }

    let cache = open_cache(temp.path(), 1024);
    let snapshot = cache.snapshot();
    let order: Vec<_> = snapshot.lru.keys().cloned().collect();
    assert_eq!(order, vec!["b", "a"]);
    assert_eq!(snapshot.statistics.hits, 1);
    assert_eq!(cache.get("b").unwrap().hit(), Some(Value::Text("2".into())));
}

#[test]
fn test_orphan_entry_reconciliation() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 1024);
    cache.put("k", vec![0u8; 6], PutOptions::new().extension("bin")).unwrap();
    cache.put("keep", vec![0u8; 2], PutOptions::new()).unwrap();

    fs::remove_file(temp.path().join("k.bin")).unwrap();
    let report = cache.reconcile(false).unwrap();

    assert_eq!(report.dropped_entries, vec!["k"]);
    assert!(!cache.contains("k"));
    assert_eq!(cache.get("k").unwrap(), Lookup::Miss);
    assert_eq!(cache.statistics().size, 2);
}

#[test]
fn test_missing_file_on_get_is_a_miss() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 1024);
    cache.put("k", "v", PutOptions::new()).unwrap();
    fs::remove_file(temp.path().join("k")).unwrap();

    assert_eq!(cache.get("k").unwrap(), Lookup::Miss);
    assert!(!cache.contains("k"));
    assert_eq!(cache.statistics().misses, 1);
    assert_eq!(cache.statistics().size, 0);
}

#[test]
fn test_orphan_files_deleted_or_adopted() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 1024);
    cache.put("known", "v", PutOptions::new()).unwrap();
    fs::write(temp.path().join("stray.bin"), b"1234").unwrap();

    let report = cache.reconcile(false).unwrap();
    assert_eq!(report.deleted_files, vec!["stray.bin"]);
    assert!(!temp.path().join("stray.bin").exists());

    fs::write(temp.path().join("stray.bin"), b"1234").unwrap();
    let report = cache.reconcile(true).unwrap();
    assert_eq!(report.adopted, vec!["stray"]);
    let meta = cache.get_metadata("stray").unwrap();
    assert_eq!(meta.size_bytes, 4);
    assert_eq!(meta.extension, ".bin");
    assert!(meta.is_binary());
    assert_eq!(cache.statistics().size, 5);
}

#[test]
fn test_reconcile_fixes_size_drift() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 1024);
    cache.put("k", b"abc".to_vec(), PutOptions::new()).unwrap();
    fs::write(temp.path().join("k"), b"abcdef").unwrap();

    let report = cache.reconcile(false).unwrap();
    assert_eq!(report.resized, vec!["k"]);
    assert_eq!(cache.get_metadata("k").unwrap().size_bytes, 6);
    assert_eq!(cache.statistics().size, 6);
}

#[test]
fn test_reconcile_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 1024);
    cache.put("a", "1", PutOptions::new()).unwrap();
    cache.put("b", "22", PutOptions::new().extension("txt")).unwrap();
    fs::remove_file(temp.path().join("a")).unwrap();
    fs::write(temp.path().join("orphan"), b"x").unwrap();

    let first = cache.reconcile(false).unwrap();
    assert!(!first.is_clean());
    let after_first = cache.snapshot();

    let second = cache.reconcile(false).unwrap();
    assert!(second.is_clean());
    assert_eq!(cache.snapshot(), after_first);
}

#[test]
fn test_reconcile_on_pristine_store_is_clean() {
    let temp = TempDir::new().unwrap();
    let cache = open_cache(temp.path(), 1024);
    cache.put("a", "1", PutOptions::new()).unwrap();
    let before = cache.snapshot();

    assert!(cache.reconcile(false).unwrap().is_clean());
    assert_eq!(cache.snapshot(), before);
}

#[test]
fn test_corrupt_journal_resets_cache() {
    let temp = TempDir::new().unwrap();
    {
        let cache = open_cache(temp.path(), 1024);
        cache.put("a", "1", PutOptions::new()).unwrap();
    }
    fs::write(temp.path().join(JOURNAL_FILENAME), b"{\"version\": 2,").unwrap();

    let cache = open_cache(temp.path(), 1024);
    assert!(cache.is_empty());
    assert_eq!(data_files(temp.path()), Vec::<String>::new());
    assert!(temp.path().join(JOURNAL_FILENAME).is_file());
}

#[test]
fn test_reconcile_on_open_collects_expired() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    {
        let cache = open_with_clock(temp.path(), Arc::clone(&clock));
        let at = clock.now() + Duration::minutes(1);
        cache.put("k", "v", PutOptions::new().expires_at(at)).unwrap();
    }
    clock.advance(Duration::minutes(2));

    let cache = Cache::open(
        StoreOptions::new("test", temp.path())
            .clock(clock)
            .reconcile_on_open(true),
    )
    .unwrap();
    assert!(cache.is_empty());
}

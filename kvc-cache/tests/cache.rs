use std::net::SocketAddr;
use std::time::{Duration, Instant};

use kvc_cache::{build_key, BatchResult, CacheConfig, CacheContract, CacheError, CacheLayer, JsonCodec};
use kvc_client::{cmd, ConnectionConfig, Reply, StoreConnection, StoreError};
use kvc_devstore::scripted::{spawn_scripted, write_bulk, write_error, write_integer, write_null, write_raw, write_simple};
use kvc_devstore::{DevStore, TtlStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: u32,
    name: String,
    tags: Vec<String>,
}

fn profile(id: u32) -> Profile {
    Profile {
        id,
        name: format!("user{}", id),
        tags: vec!["a".to_string(), "b".to_string()],
    }
}

fn connection_config(addr: SocketAddr) -> ConnectionConfig {
    ConnectionConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        read_timeout: Some(Duration::from_secs(1)),
        ..Default::default()
    }
}

fn cache_for(store: &DevStore) -> CacheLayer {
    let conn = StoreConnection::new(connection_config(store.addr())).expect("connection");
    CacheLayer::new(conn, CacheConfig::default())
}

fn ttl_of(store: &DevStore, key: &str) -> TtlStatus {
    let now = Instant::now();
    store.with_keyspace(|keyspace| keyspace.db(0).expect("db 0").ttl(key.as_bytes(), now))
}

#[test]
fn set_then_get_returns_the_value() {
    let store = DevStore::start().expect("devstore");
    let mut cache = cache_for(&store);

    assert!(cache.set("p1", &profile(1), Duration::ZERO).expect("set"));
    let value: Option<Profile> = cache.get("p1").expect("get");
    assert_eq!(value, Some(profile(1)));

    let missing: Option<Profile> = cache.get("never").expect("get");
    assert_eq!(missing, None);
}

#[test]
fn set_with_ttl_applies_millisecond_expiry() {
    let store = DevStore::start().expect("devstore");
    let mut cache = cache_for(&store);

    assert!(cache.set("k", "v", Duration::from_secs(30)).expect("set"));
    match ttl_of(&store, "k") {
        TtlStatus::ExpiresIn(left) => assert!(left <= Duration::from_secs(30) && left > Duration::from_secs(25)),
        other => panic!("expected expiry, got {:?}", other),
    }

    assert!(cache.set("forever", "v", Duration::ZERO).expect("set"));
    assert_eq!(ttl_of(&store, "forever"), TtlStatus::NoExpiry);
}

#[test]
fn short_ttl_entries_disappear() {
    let store = DevStore::start().expect("devstore");
    let mut cache = cache_for(&store);

    assert!(cache.set("brief", &1u8, Duration::from_millis(50)).expect("set"));
    std::thread::sleep(Duration::from_millis(120));
    let value: Option<u8> = cache.get("brief").expect("get");
    assert_eq!(value, None);
    assert!(!cache.exists("brief").expect("exists"));
}

#[test]
fn exists_tracks_set_and_delete() {
    let store = DevStore::start().expect("devstore");
    let mut cache = cache_for(&store);

    for (key, ttl) in [("plain", Duration::ZERO), ("timed", Duration::from_secs(60))] {
        cache.set(key, &42u64, ttl).expect("set");
        assert!(cache.exists(key).expect("exists"));
        assert!(cache.delete(key).expect("delete"));
        assert!(!cache.exists(key).expect("exists"));
        assert!(!cache.delete(key).expect("second delete"));
    }
}

#[test]
fn set_many_without_ttl_then_get_many() {
    let store = DevStore::start().expect("devstore");
    let mut cache = cache_for(&store);

    let result = cache
        .set_many(&[("a", 1i32), ("b", 2i32)], Duration::ZERO)
        .expect("set_many");
    assert!(result.is_success());

    let values = cache.get_many::<i32, _>(&["a", "b", "c"]).expect("get_many");
    assert_eq!(values.len(), 3);
    assert_eq!(values["a"], Some(1));
    assert_eq!(values["b"], Some(2));
    assert_eq!(values["c"], None);
}

#[test]
fn get_many_with_no_keys_skips_the_store() {
    let store = DevStore::start().expect("devstore");
    let mut cache = cache_for(&store);
    let keys: [&str; 0] = [];

    let values = cache.get_many::<i32, _>(&keys).expect("get_many");
    assert!(values.is_empty());
    assert!(!cache.connection_mut().is_active());
}

#[test]
fn set_many_with_ttl_expires_every_key() {
    let store = DevStore::start().expect("devstore");
    let mut cache = cache_for(&store);

    let result = cache
        .set_many(&[("a", "one"), ("b", "two")], Duration::from_secs(5))
        .expect("set_many");
    assert_eq!(result, BatchResult::default());

    for key in ["a", "b"] {
        assert!(matches!(ttl_of(&store, key), TtlStatus::ExpiresIn(_)));
    }
    let values = cache.get_many::<String, _>(&["a", "b"]).expect("get_many");
    assert_eq!(values["a"].as_deref(), Some("one"));
    assert_eq!(values["b"].as_deref(), Some("two"));
}

#[test]
fn set_many_reports_keys_that_missed_their_expiry() {
    // The store loses `a` between MSET and its PEXPIRE; `b` expires normally.
    let addr = spawn_scripted(5, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args, vec![b"MULTI".to_vec()]);
            write_simple(stream, "OK");
        }
        1 => {
            assert_eq!(args[0], b"MSET");
            assert_eq!(args[1], b"a");
            assert_eq!(args[3], b"b");
            write_simple(stream, "QUEUED");
        }
        2 => {
            assert_eq!(args, vec![b"PEXPIRE".to_vec(), b"a".to_vec(), b"5000".to_vec()]);
            write_simple(stream, "QUEUED");
        }
        3 => {
            assert_eq!(args, vec![b"PEXPIRE".to_vec(), b"b".to_vec(), b"5000".to_vec()]);
            write_simple(stream, "QUEUED");
        }
        _ => {
            assert_eq!(args, vec![b"EXEC".to_vec()]);
            write_raw(stream, b"*3\r\n+OK\r\n:0\r\n:1\r\n");
        }
    })
    .expect("scripted server");

    let conn = StoreConnection::new(connection_config(addr)).expect("connection");
    let mut cache = CacheLayer::new(conn, CacheConfig::default());
    let result = cache
        .set_many(&[("a", 1u8), ("b", 2u8)], Duration::from_secs(5))
        .expect("set_many");

    assert_eq!(result.failed_keys(), ["a".to_string()]);
    assert!(result.contains("a"));
    assert!(!result.contains("b"));
}

#[test]
fn set_many_keeps_other_keys_when_one_misses_its_expiry() {
    let store = DevStore::start().expect("devstore");
    // `a` disappears after MSET stored it but before its PEXPIRE runs.
    store.set_command_hook(|keyspace, db, args| {
        if args[0] == b"PEXPIRE" && args[1] == b"a" {
            if let Some(db) = keyspace.db(db) {
                db.remove(b"a", Instant::now());
            }
        }
    });
    let mut cache = cache_for(&store);

    let result = cache
        .set_many(&[("a", 1u32), ("b", 2u32)], Duration::from_secs(5))
        .expect("set_many");
    assert_eq!(result.failed_keys(), ["a".to_string()]);

    store.clear_command_hook();
    let b: Option<u32> = cache.get("b").expect("get");
    assert_eq!(b, Some(2));
    match ttl_of(&store, "b") {
        TtlStatus::ExpiresIn(left) => assert!(left <= Duration::from_secs(5) && left > Duration::from_secs(3)),
        other => panic!("expected expiry on b, got {:?}", other),
    }
    assert_eq!(ttl_of(&store, "a"), TtlStatus::Missing);
}

#[test]
fn set_many_counts_error_replies_as_missed_expiry() {
    let addr = spawn_scripted(4, |idx, _, stream| match idx {
        0 => write_simple(stream, "OK"),
        1 | 2 => write_simple(stream, "QUEUED"),
        _ => write_raw(stream, b"*2\r\n+OK\r\n-ERR invalid expire time\r\n"),
    })
    .expect("scripted server");

    let conn = StoreConnection::new(connection_config(addr)).expect("connection");
    let mut cache = CacheLayer::new(conn, CacheConfig::default());
    let result = cache.set_many(&[("only", 1u8)], Duration::from_secs(1)).expect("set_many");
    assert_eq!(result.into_failed_keys(), vec!["only".to_string()]);
}

#[test]
fn set_many_batch_abort_is_a_store_error() {
    let addr = spawn_scripted(4, |idx, _, stream| match idx {
        0 => write_simple(stream, "OK"),
        1 | 2 => write_simple(stream, "QUEUED"),
        _ => write_raw(stream, b"*-1\r\n"),
    })
    .expect("scripted server");

    let conn = StoreConnection::new(connection_config(addr)).expect("connection");
    let mut cache = CacheLayer::new(conn, CacheConfig::default());
    let err = cache.set_many(&[("k", 1u8)], Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, CacheError::Store(StoreError::BatchAborted)));
}

#[test]
fn add_only_writes_absent_keys() {
    let store = DevStore::start().expect("devstore");
    let mut cache = cache_for(&store);

    assert!(cache.add("k", "v1", Duration::ZERO).expect("first add"));
    assert!(!cache.add("k", "v2", Duration::ZERO).expect("second add"));
    let value: Option<String> = cache.get("k").expect("get");
    assert_eq!(value.as_deref(), Some("v1"));

    assert!(cache.add("timed", "v1", Duration::from_secs(10)).expect("timed add"));
    assert!(!cache.add("timed", "v2", Duration::from_secs(10)).expect("second timed add"));
    assert!(matches!(ttl_of(&store, "timed"), TtlStatus::ExpiresIn(_)));
}

#[test]
fn add_many_reports_existing_keys() {
    let store = DevStore::start().expect("devstore");
    let mut cache = cache_for(&store);

    cache.set("b", &0u32, Duration::ZERO).expect("set");
    let result = cache
        .add_many(&[("a", 1u32), ("b", 2u32), ("c", 3u32)], Duration::ZERO)
        .expect("add_many");
    assert_eq!(result.failed_keys(), ["b".to_string()]);

    let b: Option<u32> = cache.get("b").expect("get");
    assert_eq!(b, Some(0));
}

#[test]
fn flush_all_clears_the_selected_database() {
    let store = DevStore::start().expect("devstore");
    let mut cache = cache_for(&store);

    cache
        .set_many(&[("a", 1u8), ("b", 2u8)], Duration::from_secs(60))
        .expect("set_many");
    cache.set("c", &3u8, Duration::ZERO).expect("set");

    assert!(cache.flush_all().expect("flush"));
    for key in ["a", "b", "c"] {
        assert!(!cache.exists(key).expect("exists"));
    }
}

#[test]
fn corrupt_payload_is_a_deserialization_error() {
    let store = DevStore::start().expect("devstore");
    let mut cache = cache_for(&store);

    cache
        .connection_mut()
        .invoke(&cmd("SET").key("raw").arg("x"))
        .expect("raw set");
    let err = cache.get::<Profile>("raw").unwrap_err();
    match err {
        CacheError::Deserialization { key, .. } => assert_eq!(key, "raw"),
        other => panic!("expected deserialization error, got {:?}", other),
    }

    let err = cache.get_many::<Profile, _>(&["raw"]).unwrap_err();
    assert!(matches!(err, CacheError::Deserialization { .. }));
}

#[test]
fn json_codec_stores_readable_payloads() {
    let store = DevStore::start().expect("devstore");
    let conn = StoreConnection::new(connection_config(store.addr())).expect("connection");
    let mut cache = CacheLayer::with_codec(conn, CacheConfig::default(), JsonCodec);

    cache.set("p", &profile(7), Duration::ZERO).expect("set");
    let raw = cache.connection_mut().invoke(&cmd("GET").key("p")).expect("raw get");
    assert_eq!(
        raw,
        Reply::Bulk(Some(br#"{"id":7,"name":"user7","tags":["a","b"]}"#.to_vec()))
    );
    let value: Option<Profile> = cache.get("p").expect("get");
    assert_eq!(value, Some(profile(7)));
}

#[test]
fn keys_are_built_with_the_cache_prefix() {
    let store = DevStore::start().expect("devstore");
    let mut config = connection_config(store.addr());
    config.key_prefix = "conn:".to_string();
    let conn = StoreConnection::new(config).expect("connection");
    let mut cache = CacheLayer::new(conn, CacheConfig::with_prefix("v1_"));

    cache.set("simple", &1u8, Duration::ZERO).expect("set");
    cache.set("needs/hashing", &2u8, Duration::ZERO).expect("set");

    let now = Instant::now();
    let hashed = format!("conn:{}", build_key("v1_", "needs/hashing"));
    store.with_keyspace(|keyspace| {
        let db = keyspace.db(0).expect("db 0");
        assert!(db.contains(b"conn:v1_simple", now));
        assert!(db.contains(hashed.as_bytes(), now));
    });

    let values = cache.get_many::<u8, _>(&["simple", "needs/hashing"]).expect("get_many");
    assert_eq!(values["simple"], Some(1));
    assert_eq!(values["needs/hashing"], Some(2));
}

#[test]
fn get_or_set_computes_once() {
    let store = DevStore::start().expect("devstore");
    let mut cache = cache_for(&store);

    let first: u32 = cache.get_or_set("lazy", Duration::ZERO, || 41 + 1).expect("first");
    assert_eq!(first, 42);
    let second: u32 = cache
        .get_or_set("lazy", Duration::ZERO, || panic!("value should be cached"))
        .expect("second");
    assert_eq!(second, 42);
}

#[test]
fn wire_commands_match_ttl_policy() {
    let addr = spawn_scripted(6, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args[0], b"SET");
            assert_eq!(&args[3..], [b"PX".to_vec(), b"1500".to_vec()]);
            write_simple(stream, "OK");
        }
        1 => {
            assert_eq!(args[0], b"SETNX");
            assert_eq!(args.len(), 3);
            write_integer(stream, 0);
        }
        2 => {
            assert_eq!(args[0], b"SET");
            assert_eq!(&args[3..], [b"PX".to_vec(), b"250".to_vec(), b"NX".to_vec()]);
            write_null(stream);
        }
        3 => {
            assert_eq!(args, vec![b"EXISTS".to_vec(), b"k".to_vec()]);
            write_integer(stream, 1);
        }
        4 => {
            assert_eq!(args, vec![b"GET".to_vec(), b"k".to_vec()]);
            write_bulk(stream, &[0, 0, 0, 0]);
        }
        _ => {
            assert_eq!(args, vec![b"FLUSHDB".to_vec()]);
            write_error(stream, "ERR flush disabled");
        }
    })
    .expect("scripted server");

    let conn = StoreConnection::new(connection_config(addr)).expect("connection");
    let mut cache = CacheLayer::new(conn, CacheConfig::default());

    assert!(cache.set("k", &1u8, Duration::from_secs_f64(1.5)).expect("set"));
    assert!(!cache.add("k", &1u8, Duration::ZERO).expect("setnx"));
    assert!(!cache.add("k", &1u8, Duration::from_micros(250_900)).expect("set nx"));
    assert!(cache.exists("k").expect("exists"));
    assert_eq!(cache.get::<u32>("k").expect("get"), Some(0));

    let err = cache.flush_all().unwrap_err();
    let store_err = err.as_store().expect("store error");
    assert_eq!(store_err.command(), Some("FLUSHDB"));
}

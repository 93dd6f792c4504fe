use std::time::{Duration, Instant};

use kvc_client::{cmd, BatchMode, ConnectionConfig, Reply, StoreConnection, StoreError};
use kvc_devstore::{DevStore, DevStoreConfig};

fn connect(store: &DevStore, password: Option<&str>) -> StoreConnection {
    let mut config = ConnectionConfig::tcp(store.addr().ip().to_string(), store.port());
    config.password = password.map(str::to_string);
    config.read_timeout = Some(Duration::from_secs(1));
    StoreConnection::new(config).expect("connection")
}

#[test]
fn requires_auth_when_password_is_set() {
    let store = DevStore::spawn(DevStoreConfig {
        password: Some("pw".to_string()),
        ..Default::default()
    })
    .expect("devstore");

    let mut anonymous = connect(&store, None);
    let err = anonymous.invoke(&cmd("GET").key("k")).unwrap_err();
    assert!(matches!(err, StoreError::RemoteCommand { ref message, .. } if message.starts_with("NOAUTH")));

    let mut wrong = connect(&store, Some("nope"));
    assert!(matches!(wrong.open(), Err(StoreError::AuthRejected { .. })));

    let mut ok = connect(&store, Some("pw"));
    assert!(ok.ping().expect("ping"));
}

#[test]
fn sweeper_purges_expired_keys() {
    let store = DevStore::start().expect("devstore");
    let mut conn = connect(&store, None);
    conn.invoke(&cmd("SET").key("gone").arg("v").arg("PX").arg(20u64))
        .expect("set");
    conn.invoke(&cmd("SET").key("kept").arg("v")).expect("set");

    std::thread::sleep(Duration::from_millis(300));
    let len = store.with_keyspace(|keyspace| keyspace.db(0).expect("db 0").len());
    assert_eq!(len, 1);
}

#[test]
fn exec_runs_queued_commands_in_order() {
    let store = DevStore::start().expect("devstore");
    let mut conn = connect(&store, None);

    let mut batch = conn.begin_batch(BatchMode::Atomic);
    batch
        .invoke(cmd("MSET").key("a").arg("1").key("b").arg("2"))
        .invoke(cmd("PEXPIRE").key("a").arg(10_000u64))
        .invoke(cmd("PEXPIRE").key("missing").arg(10_000u64))
        .invoke(cmd("MGET").key("a").key("b").key("c"));
    let replies = batch.commit().expect("commit");

    assert_eq!(replies.len(), 4);
    assert!(replies[0].is_ok());
    assert_eq!(replies[1], Reply::Integer(1));
    assert_eq!(replies[2], Reply::Integer(0));
    assert_eq!(
        replies[3],
        Reply::Array(vec![
            Reply::Bulk(Some(b"1".to_vec())),
            Reply::Bulk(Some(b"2".to_vec())),
            Reply::Bulk(None),
        ])
    );

    let now = Instant::now();
    store.with_keyspace(|keyspace| {
        let db = keyspace.db(0).expect("db 0");
        assert!(matches!(db.ttl(b"a", now), kvc_devstore::TtlStatus::ExpiresIn(_)));
        assert_eq!(db.ttl(b"b", now), kvc_devstore::TtlStatus::NoExpiry);
    });
}

#[test]
fn wrong_arity_refuses_the_whole_transaction() {
    let store = DevStore::start().expect("devstore");
    let mut conn = connect(&store, None);

    let mut batch = conn.begin_batch(BatchMode::Atomic);
    batch.invoke(cmd("SET").key("a").arg("1")).invoke(cmd("MSET").key("odd"));
    let err = batch.commit().unwrap_err();
    assert_eq!(err.command(), Some("MSET"));

    let reply = conn.invoke(&cmd("EXISTS").key("a")).expect("exists");
    assert_eq!(reply, Reply::Integer(0));
}

#[test]
fn flushdb_only_clears_the_selected_database() {
    let store = DevStore::start().expect("devstore");
    let mut zero = connect(&store, None);
    zero.invoke(&cmd("SET").key("k").arg("v")).expect("set");

    let mut config = ConnectionConfig::tcp(store.addr().ip().to_string(), store.port());
    config.database = 1;
    let mut one = StoreConnection::new(config).expect("connection");
    one.invoke(&cmd("SET").key("k").arg("v")).expect("set");
    assert!(one.invoke(&cmd("FLUSHDB")).expect("flush").is_ok());

    assert_eq!(one.invoke(&cmd("EXISTS").key("k")).expect("exists"), Reply::Integer(0));
    assert_eq!(zero.invoke(&cmd("EXISTS").key("k")).expect("exists"), Reply::Integer(1));
}

#[cfg(unix)]
#[test]
fn stale_unix_socket_file_is_replaced() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("devstore.sock");
    std::fs::write(&path, b"left over").expect("stale file");

    let store = DevStore::spawn(DevStoreConfig {
        unix_socket: Some(path.clone()),
        ..Default::default()
    })
    .expect("devstore");

    let mut conn = StoreConnection::new(ConnectionConfig::unix(&path)).expect("connection");
    assert!(conn.ping().expect("ping"));
    drop(conn);
    drop(store);
    assert!(!path.exists());
}

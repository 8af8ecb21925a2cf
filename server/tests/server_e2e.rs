//! End-to-end tests driving a real `kvd` listener over a loopback TCP
//! socket: a client connects, sends RESP-framed commands, and asserts on
//! the raw reply bytes, exercising the accept loop, dispatch, and store
//! together rather than any one module in isolation.

use bytes::Bytes;
use kvd::config::Config;
use kvd::db::Db;
use kvd::listener::Server;
use kvd::protocol::{encode_command, FrameReader, Value};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Boots a server on an ephemeral port and returns a handle alongside the
/// `Db` it was built with, so tests can also set up state directly (e.g.
/// via a second `Db::clone()` for a would-be replica).
async fn start_server(dir: &std::path::Path) -> (Db, u16) {
    let cfg = Config {
        port: 0,
        dir: dir.to_string_lossy().into_owned(),
        dbfilename: "dump.rdb".to_string(),
        replicaof: None,
    };
    let db = Db::new(cfg);
    if let Some(rx) = db.shared.repl.take_propagation_receiver() {
        let repl_db = db.clone();
        tokio::spawn(async move {
            repl_db.shared.repl.run_propagation_loop(rx).await;
        });
    }
    let server = Server::bind(db.clone()).await.expect("failed to bind");
    let port = server.local_port();
    tokio::spawn(async move {
        let pending = std::future::pending();
        server.run(Box::pin(pending)).await;
    });
    (db, port)
}

struct TestClient {
    stream: TcpStream,
    reader: FrameReader,
}

impl TestClient {
    async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("failed to connect");
        Self {
            stream,
            reader: FrameReader::new(),
        }
    }

    async fn send(&mut self, parts: &[&[u8]]) -> Value {
        let frame = encode_command(parts);
        self.stream
            .write_all(&frame)
            .await
            .expect("failed to write command");
        self.read_one().await
    }

    async fn read_one(&mut self) -> Value {
        loop {
            if let Some(v) = self.reader.next_value().expect("protocol error") {
                return v;
            }
            let mut buf = [0u8; 4096];
            let n = self
                .stream
                .read(&mut buf)
                .await
                .expect("failed to read reply");
            assert!(n > 0, "connection closed before a full reply arrived");
            self.reader.feed(&buf[..n]);
        }
    }
}

fn bulk(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

#[tokio::test]
async fn set_and_get_roundtrip() {
    let dir = tempdir();
    let (_db, port) = start_server(dir.path()).await;
    let mut client = TestClient::connect(port).await;

    let reply = client.send(&[b"SET", b"greeting", b"hello"]).await;
    assert_eq!(reply, Value::Simple("OK".into()));

    let reply = client.send(&[b"GET", b"greeting"]).await;
    assert_eq!(reply, Value::Bulk(Some(bulk("hello"))));

    let reply = client.send(&[b"GET", b"missing"]).await;
    assert_eq!(reply, Value::Bulk(None));
}

#[tokio::test]
async fn list_push_range_and_pop() {
    let dir = tempdir();
    let (_db, port) = start_server(dir.path()).await;
    let mut client = TestClient::connect(port).await;

    let reply = client.send(&[b"RPUSH", b"queue", b"a", b"b", b"c"]).await;
    assert_eq!(reply, Value::Integer(3));

    let reply = client.send(&[b"LRANGE", b"queue", b"0", b"-1"]).await;
    assert_eq!(
        reply,
        Value::Array(Some(vec![
            Value::Bulk(Some(bulk("a"))),
            Value::Bulk(Some(bulk("b"))),
            Value::Bulk(Some(bulk("c"))),
        ]))
    );

    let reply = client.send(&[b"LPOP", b"queue"]).await;
    assert_eq!(reply, Value::Array(Some(vec![Value::Bulk(Some(bulk("a")))])));
}

#[tokio::test]
async fn blpop_wakes_on_a_later_push() {
    let dir = tempdir();
    let (_db, port) = start_server(dir.path()).await;
    let mut popper = TestClient::connect(port).await;
    let mut pusher = TestClient::connect(port).await;

    let frame = encode_command(&[b"BLPOP", b"jobs", b"5"]);
    popper
        .stream
        .write_all(&frame)
        .await
        .expect("failed to send BLPOP");

    // Give BLPOP time to register as a waiter before anything is pushed.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reply = pusher.send(&[b"RPUSH", b"jobs", b"task-1"]).await;
    assert_eq!(reply, Value::Integer(1));

    let popped = popper.read_one().await;
    assert_eq!(
        popped,
        Value::Array(Some(vec![
            Value::Bulk(Some(bulk("jobs"))),
            Value::Bulk(Some(bulk("task-1"))),
        ]))
    );
}

#[tokio::test]
async fn multi_exec_runs_queued_commands_atomically() {
    let dir = tempdir();
    let (_db, port) = start_server(dir.path()).await;
    let mut client = TestClient::connect(port).await;

    assert_eq!(client.send(&[b"MULTI"]).await, Value::Simple("OK".into()));
    assert_eq!(
        client.send(&[b"SET", b"counter", b"1"]).await,
        Value::Simple("QUEUED".into())
    );
    assert_eq!(
        client.send(&[b"INCR", b"counter"]).await,
        Value::Simple("QUEUED".into())
    );
    assert_eq!(
        client.send(&[b"INCR", b"counter"]).await,
        Value::Simple("QUEUED".into())
    );

    let reply = client.send(&[b"EXEC"]).await;
    assert_eq!(
        reply,
        Value::Array(Some(vec![
            Value::Simple("OK".into()),
            Value::Integer(2),
            Value::Integer(3),
        ]))
    );

    let reply = client.send(&[b"GET", b"counter"]).await;
    assert_eq!(reply, Value::Bulk(Some(bulk("3"))));
}

#[tokio::test]
async fn xadd_and_xrange_roundtrip() {
    let dir = tempdir();
    let (_db, port) = start_server(dir.path()).await;
    let mut client = TestClient::connect(port).await;

    let reply = client
        .send(&[b"XADD", b"events", b"*", b"kind", b"login"])
        .await;
    let Value::Bulk(Some(id)) = reply else {
        panic!("expected a bulk string stream ID, got {reply:?}");
    };

    let reply = client.send(&[b"XRANGE", b"events", b"-", b"+"]).await;
    assert_eq!(
        reply,
        Value::Array(Some(vec![Value::Array(Some(vec![
            Value::Bulk(Some(id)),
            Value::Array(Some(vec![
                Value::Bulk(Some(bulk("kind"))),
                Value::Bulk(Some(bulk("login"))),
            ])),
        ]))]))
    );
}

#[tokio::test]
async fn sorted_set_add_rank_and_range() {
    let dir = tempdir();
    let (_db, port) = start_server(dir.path()).await;
    let mut client = TestClient::connect(port).await;

    assert_eq!(
        client.send(&[b"ZADD", b"leaderboard", b"10", b"alice"]).await,
        Value::Integer(1)
    );
    assert_eq!(
        client.send(&[b"ZADD", b"leaderboard", b"20", b"bob"]).await,
        Value::Integer(1)
    );

    let reply = client.send(&[b"ZRANK", b"leaderboard", b"alice"]).await;
    assert_eq!(reply, Value::Integer(0));

    let reply = client.send(&[b"ZRANGE", b"leaderboard", b"0", b"-1"]).await;
    assert_eq!(
        reply,
        Value::Array(Some(vec![
            Value::Bulk(Some(bulk("alice"))),
            Value::Bulk(Some(bulk("bob"))),
        ]))
    );
}

#[tokio::test]
async fn replica_full_resyncs_and_applies_propagated_writes() {
    let primary_dir = tempdir();
    let (primary_db, primary_port) = start_server(primary_dir.path()).await;

    let mut writer = TestClient::connect(primary_port).await;
    assert_eq!(
        writer.send(&[b"SET", b"preexisting", b"value"]).await,
        Value::Simple("OK".into())
    );

    let replica_dir = tempdir();
    let replica_cfg = Config {
        port: 0,
        dir: replica_dir.path().to_string_lossy().into_owned(),
        dbfilename: "dump.rdb".to_string(),
        replicaof: Some(("127.0.0.1".to_string(), primary_port)),
    };
    let replica_db = Db::new(replica_cfg);
    tokio::spawn(kvd::replication::replica::run(
        replica_db.clone(),
        "127.0.0.1".to_string(),
        primary_port,
    ));

    // Wait for the handshake and initial RDB load to land the pre-existing key.
    let mut loaded = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if replica_db.shared.store.write().get(b"preexisting").ok().flatten().is_some() {
            loaded = true;
            break;
        }
    }
    assert!(loaded, "replica never applied the FULLRESYNC snapshot");

    assert_eq!(
        writer.send(&[b"SET", b"streamed", b"ok"]).await,
        Value::Simple("OK".into())
    );

    let mut propagated = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if replica_db.shared.store.write().get(b"streamed").ok().flatten().is_some() {
            propagated = true;
            break;
        }
    }
    assert!(propagated, "replica never applied the propagated write");

    // WAIT should now see the replica acknowledge the write: it solicits
    // the ack itself via REPLCONF GETACK rather than relying on one the
    // replica might never otherwise send.
    let reply = writer.send(&[b"WAIT", b"1", b"2000"]).await;
    assert_eq!(reply, Value::Integer(1));

    let _ = primary_db;
}

fn tempdir() -> tempfile::TempDir {
    tempfile::tempdir().expect("failed to create a temp dir")
}

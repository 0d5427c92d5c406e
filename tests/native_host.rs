use std::time::Duration;

use procguard_lib::{
    config::AgentConfig,
    db::Database,
    native::{read_frame, write_frame, Envelope, NativeHost, MAX_FRAME_BYTES},
};
use serde_json::json;
use tempfile::TempDir;
use tokio::{
    io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
    task::JoinHandle,
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(5);

struct Session {
    _dir: TempDir,
    config: AgentConfig,
    db: Database,
    from_host: ReadHalf<DuplexStream>,
    to_host: WriteHalf<DuplexStream>,
    host: JoinHandle<anyhow::Result<()>>,
}

fn start() -> Session {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AgentConfig::in_dir(dir.path());
    config.intervals.web_blocklist_poll_ms = 20;
    config.intervals.heartbeat_ms = 20;
    config.ensure_dirs().unwrap();
    let db = Database::new(config.database_path()).unwrap();

    let (extension_side, host_side) = tokio::io::duplex(64 * 1024);
    let (host_read, host_write) = tokio::io::split(host_side);
    let (from_host, to_host) = tokio::io::split(extension_side);
    let host = tokio::spawn(NativeHost::new(db.clone(), &config).run(host_read, host_write));

    Session {
        _dir: dir,
        config,
        db,
        from_host,
        to_host,
        host,
    }
}

async fn next_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Envelope {
    let body = timeout(WAIT, read_frame(reader))
        .await
        .expect("timed out waiting for a frame")
        .expect("frame read failed")
        .expect("host closed the stream");
    serde_json::from_slice(&body).unwrap()
}

/// Skips block-list pushes and other traffic until a frame of `kind` matches.
async fn next_matching<R, F>(reader: &mut R, kind: &str, pred: F) -> Envelope
where
    R: AsyncRead + Unpin,
    F: Fn(&Envelope) -> bool,
{
    loop {
        let envelope = next_frame(reader).await;
        if envelope.kind == kind && pred(&envelope) {
            return envelope;
        }
    }
}

async fn send(session: &mut Session, kind: &str, payload: serde_json::Value) {
    write_frame(&mut session.to_host, &Envelope::new(kind, payload))
        .await
        .unwrap();
}

async fn finish(session: Session) {
    let result = timeout(WAIT, session.host)
        .await
        .expect("host did not stop")
        .unwrap();
    assert!(result.is_ok(), "{result:?}");
}

#[tokio::test]
async fn ping_is_echoed_as_pong() {
    let mut s = start();
    send(&mut s, "ping", json!("hello")).await;
    let pong = next_matching(&mut s.from_host, "pong", |_| true).await;
    assert_eq!(pong.payload, json!("hello"));

    s.to_host.shutdown().await.unwrap();
    finish(s).await;
}

#[tokio::test]
async fn visits_are_logged_except_the_gui_origin() {
    let mut s = start();
    let gui_url = format!("{}/dashboard", s.config.gui_origin);
    send(
        &mut s,
        "log_url",
        json!({"url": "https://example.com/a", "title": "A", "visitTime": 1_700_000_000_000u64}),
    )
    .await;
    send(&mut s, "log_url", json!({"url": gui_url, "title": "GUI", "visitTime": 0})).await;
    send(
        &mut s,
        "log_web_metadata",
        json!({"domain": "example.com", "title": "Example", "iconUrl": "https://example.com/favicon.ico"}),
    )
    .await;
    // Replies are ordered after the messages before them.
    send(&mut s, "ping", json!(1)).await;
    next_matching(&mut s.from_host, "pong", |_| true).await;

    s.db.flush().await.unwrap();
    let logs = s.db.web_logs(None, None, None).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0][1], "https://example.com/a");
    let meta = s.db.get_web_metadata("example.com").await.unwrap().unwrap();
    assert_eq!(meta.title, "Example");

    s.to_host.shutdown().await.unwrap();
    finish(s).await;
}

#[tokio::test]
async fn block_list_changes_are_pushed() {
    let mut s = start();
    let initial = next_matching(&mut s.from_host, "web_blocklist", |_| true).await;
    assert_eq!(initial.payload, json!([]));

    send(&mut s, "add_to_web_blocklist", json!("https://www.Example.com/news")).await;
    let pushed = next_matching(&mut s.from_host, "web_blocklist", |e| e.payload != json!([])).await;
    assert_eq!(pushed.payload, json!(["example.com"]));

    send(&mut s, "get_web_blocklist", serde_json::Value::Null).await;
    let reply = next_matching(&mut s.from_host, "web_blocklist", |_| true).await;
    assert_eq!(reply.payload, json!(["example.com"]));

    s.to_host.shutdown().await.unwrap();
    finish(s).await;
}

#[tokio::test]
async fn block_list_read_failure_still_answers() {
    let mut s = start();
    next_matching(&mut s.from_host, "web_blocklist", |_| true).await;

    s.db.execute(|conn| Ok(conn.execute_batch("DROP TABLE web_blocklist")?))
        .await
        .unwrap();
    send(&mut s, "get_web_blocklist", serde_json::Value::Null).await;
    let reply = next_matching(&mut s.from_host, "web_blocklist", |_| true).await;
    assert_eq!(reply.payload, json!([]));

    s.to_host.shutdown().await.unwrap();
    finish(s).await;
}

#[tokio::test]
async fn malformed_json_is_skipped() {
    let mut s = start();
    let garbage = b"not json";
    s.to_host
        .write_all(&(garbage.len() as u32).to_le_bytes())
        .await
        .unwrap();
    s.to_host.write_all(garbage).await.unwrap();

    send(&mut s, "ping", json!("still here")).await;
    let pong = next_matching(&mut s.from_host, "pong", |_| true).await;
    assert_eq!(pong.payload, json!("still here"));

    s.to_host.shutdown().await.unwrap();
    finish(s).await;
}

#[tokio::test]
async fn truncated_frame_then_eof_terminates() {
    let mut s = start();
    s.to_host.write_all(&100u32.to_le_bytes()).await.unwrap();
    s.to_host.write_all(b"{\"ty").await.unwrap();
    s.to_host.shutdown().await.unwrap();
    finish(s).await;
}

#[tokio::test]
async fn oversized_prefix_terminates() {
    let mut s = start();
    let size = (MAX_FRAME_BYTES + 1) as u32;
    s.to_host.write_all(&size.to_le_bytes()).await.unwrap();
    finish(s).await;
}

#[tokio::test]
async fn heartbeat_file_is_written() {
    let mut s = start();
    let path = s.config.heartbeat_path();
    timeout(WAIT, async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("heartbeat never written");

    s.to_host.shutdown().await.unwrap();
    finish(s).await;
}

#[tokio::test]
async fn shutdown_marker_pushes_stopping() {
    let mut s = start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::write(s.config.shutdown_marker_path(), "1").unwrap();

    let stopping = next_matching(&mut s.from_host, "stopping", |_| true).await;
    assert!(stopping.payload.is_null());
    finish(s).await;
}

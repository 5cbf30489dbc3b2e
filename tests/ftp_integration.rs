//! End-to-end tests: a real `FtpServer` bound to `127.0.0.1:0`, driven
//! both by the crate's own `FtpClient` and, for scenarios the client
//! can't provoke on its own (oversized lines, out-of-order commands),
//! by a raw `TcpStream`.

use std::net::SocketAddr;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use ftp_rs::{FtpClient, FtpServer, Permission, ServerConfig, User};

/// Mirrors the teacher's `examples/basic.rs` / `examples/pool.rs`
/// `tracing_subscriber::fmt::init()` call; `try_init` instead of `init`
/// since every test in this file shares one process and would otherwise
/// panic trying to install a second global subscriber.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

async fn spawn_server(config: ServerConfig) -> SocketAddr {
    init_tracing();
    let server = FtpServer::bind(config).await.expect("bind");
    let addr = server.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

fn test_config(root: &Path) -> ServerConfig {
    ServerConfig::new(root)
        .with_bind("127.0.0.1", 0)
        .with_data_timeout(5)
        .with_user(User::new("alice", "hunter2", Permission::ReadWrite))
        .with_user(User::new("guest", "guest", Permission::ReadOnly))
}

async fn connect_and_login(addr: SocketAddr, user: &str, password: &str) -> FtpClient {
    let mut client = FtpClient::connect(&addr.ip().to_string(), addr.port()).await.expect("connect");
    client.login(user, password).await.expect("login");
    client
}

#[tokio::test]
async fn login_then_pwd_reports_root() {
    let root = tempfile::tempdir().unwrap();
    let addr = spawn_server(test_config(root.path())).await;

    let mut client = connect_and_login(addr, "alice", "hunter2").await;
    assert_eq!(client.pwd().await.unwrap(), "/");
}

#[tokio::test]
async fn login_with_wrong_password_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let addr = spawn_server(test_config(root.path())).await;

    let mut client = FtpClient::connect(&addr.ip().to_string(), addr.port()).await.unwrap();
    assert!(client.login("alice", "wrong").await.is_err());
}

#[tokio::test]
async fn mkd_cwd_pwd_cdup_rmd() {
    let root = tempfile::tempdir().unwrap();
    let addr = spawn_server(test_config(root.path())).await;
    let mut client = connect_and_login(addr, "alice", "hunter2").await;

    let created = client.mkd("sub").await.unwrap();
    assert_eq!(created, "/sub");

    client.cwd("sub").await.unwrap();
    assert_eq!(client.pwd().await.unwrap(), "/sub");

    client.cdup().await.unwrap();
    assert_eq!(client.pwd().await.unwrap(), "/");

    client.rmd("sub").await.unwrap();
    assert!(client.cwd("sub").await.is_err());
}

#[tokio::test]
async fn upload_and_retrieve_roundtrip() {
    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let addr = spawn_server(test_config(root.path())).await;
    let mut client = connect_and_login(addr, "alice", "hunter2").await;

    let local_in = scratch.path().join("local.txt");
    std::fs::write(&local_in, b"hello, ftp world\n").unwrap();

    let mut upload_source = tokio::fs::File::open(&local_in).await.unwrap();
    client.store("greeting.txt", &mut upload_source).await.unwrap();

    let entries = client.list(None).await.unwrap();
    assert!(entries.iter().any(|line| line.ends_with("greeting.txt")));

    let local_out = scratch.path().join("out.txt");
    let mut download_sink = tokio::fs::File::create(&local_out).await.unwrap();
    client.retrieve("greeting.txt", &mut download_sink).await.unwrap();
    download_sink.flush().await.unwrap();
    drop(download_sink);

    assert_eq!(std::fs::read(&local_out).unwrap(), b"hello, ftp world\n");
}

#[tokio::test]
async fn zero_byte_stor_still_succeeds() {
    let root = tempfile::tempdir().unwrap();
    let addr = spawn_server(test_config(root.path())).await;
    let mut client = connect_and_login(addr, "alice", "hunter2").await;

    let mut empty = tokio::io::empty();
    client.store("empty.txt", &mut empty).await.unwrap();

    assert_eq!(std::fs::metadata(root.path().join("empty.txt")).unwrap().len(), 0);
}

#[tokio::test]
async fn stor_overwrites_existing_file() {
    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let addr = spawn_server(test_config(root.path())).await;
    let mut client = connect_and_login(addr, "alice", "hunter2").await;

    std::fs::write(root.path().join("note.txt"), b"original contents, quite long").unwrap();

    let replacement = scratch.path().join("replacement.txt");
    std::fs::write(&replacement, b"new").unwrap();
    let mut source = tokio::fs::File::open(&replacement).await.unwrap();
    client.store("note.txt", &mut source).await.unwrap();

    assert_eq!(std::fs::read(root.path().join("note.txt")).unwrap(), b"new");
}

#[tokio::test]
async fn rename_moves_file_and_old_name_stops_resolving() {
    let root = tempfile::tempdir().unwrap();
    let addr = spawn_server(test_config(root.path())).await;
    let mut client = connect_and_login(addr, "alice", "hunter2").await;

    std::fs::write(root.path().join("old.txt"), b"contents").unwrap();
    client.rename("old.txt", "new.txt").await.unwrap();

    let mut sink = Vec::new();
    assert!(client.retrieve("old.txt", &mut sink).await.is_err());

    let mut sink = Vec::new();
    client.retrieve("new.txt", &mut sink).await.unwrap();
    assert_eq!(sink, b"contents");
}

#[tokio::test]
async fn read_only_user_cannot_store_or_mkd() {
    let root = tempfile::tempdir().unwrap();
    let addr = spawn_server(test_config(root.path())).await;
    let mut client = connect_and_login(addr, "guest", "guest").await;

    assert!(client.mkd("forbidden").await.is_err());

    let mut source = tokio::io::empty();
    assert!(client.store("forbidden.txt", &mut source).await.is_err());

    // Reading still works for a read-only user.
    assert_eq!(client.pwd().await.unwrap(), "/");
}

#[tokio::test]
async fn symlink_escaping_root_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("secret.txt"), b"top secret").unwrap();

    #[cfg(unix)]
    std::os::unix::fs::symlink(outside.path(), root.path().join("escape")).unwrap();

    let addr = spawn_server(test_config(root.path())).await;
    let mut client = connect_and_login(addr, "alice", "hunter2").await;

    let mut sink = Vec::new();
    assert!(client.retrieve("escape/secret.txt", &mut sink).await.is_err());
}

#[tokio::test]
async fn client_consumes_multiline_reply() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"220 greeting\r\n").await.unwrap();

        let mut buf = [0u8; 256];
        let _ = stream.read(&mut buf).await.unwrap(); // USER
        stream.write_all(b"331 need password\r\n").await.unwrap();

        let _ = stream.read(&mut buf).await.unwrap(); // PASS
        stream
            .write_all(b"230-Welcome\r\n additional notice\r\n230 logged in\r\n")
            .await
            .unwrap();
    });

    let mut client = FtpClient::connect(&addr.ip().to_string(), addr.port()).await.unwrap();
    client.login("alice", "hunter2").await.unwrap();
    server_task.await.unwrap();
}

#[tokio::test]
async fn oversized_command_line_gets_500_and_session_recovers() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path()).with_max_line_bytes(32);
    let addr = spawn_server(config).await;

    let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());
    let mut greeting = String::new();
    stream.read_line(&mut greeting).await.unwrap();
    assert!(greeting.starts_with("220"));

    let long_line = format!("NOOP {}\r\n", "x".repeat(64));
    stream.get_mut().write_all(long_line.as_bytes()).await.unwrap();
    let mut reply = String::new();
    stream.read_line(&mut reply).await.unwrap();
    assert!(reply.starts_with("500"));

    stream.get_mut().write_all(b"NOOP\r\n").await.unwrap();
    let mut reply = String::new();
    stream.read_line(&mut reply).await.unwrap();
    assert!(reply.starts_with("200"));
}

#[tokio::test]
async fn data_command_without_pasv_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let addr = spawn_server(test_config(root.path())).await;

    let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());
    let mut line = String::new();
    stream.read_line(&mut line).await.unwrap(); // 220 greeting

    stream.get_mut().write_all(b"USER alice\r\n").await.unwrap();
    line.clear();
    stream.read_line(&mut line).await.unwrap();

    stream.get_mut().write_all(b"PASS hunter2\r\n").await.unwrap();
    line.clear();
    stream.read_line(&mut line).await.unwrap();
    assert!(line.starts_with("230"));

    stream.get_mut().write_all(b"RETR whatever.txt\r\n").await.unwrap();
    line.clear();
    stream.read_line(&mut line).await.unwrap();
    assert!(line.starts_with("503"));
}

#[tokio::test]
async fn rnto_without_rnfr_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let addr = spawn_server(test_config(root.path())).await;

    let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());
    let mut line = String::new();
    stream.read_line(&mut line).await.unwrap(); // 220 greeting

    stream.get_mut().write_all(b"USER alice\r\n").await.unwrap();
    line.clear();
    stream.read_line(&mut line).await.unwrap();

    stream.get_mut().write_all(b"PASS hunter2\r\n").await.unwrap();
    line.clear();
    stream.read_line(&mut line).await.unwrap();

    stream.get_mut().write_all(b"RNTO new.txt\r\n").await.unwrap();
    line.clear();
    stream.read_line(&mut line).await.unwrap();
    assert!(line.starts_with("503"));
}

#[tokio::test]
async fn unauthenticated_session_is_rejected_before_login() {
    let root = tempfile::tempdir().unwrap();
    let addr = spawn_server(test_config(root.path())).await;

    let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());
    let mut line = String::new();
    stream.read_line(&mut line).await.unwrap(); // 220 greeting

    stream.get_mut().write_all(b"PWD\r\n").await.unwrap();
    line.clear();
    stream.read_line(&mut line).await.unwrap();
    assert!(line.starts_with("530"));
}

#[tokio::test]
async fn shutdown_handle_wakes_a_blocked_accept_promptly() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let server = FtpServer::bind(test_config(root.path())).await.expect("bind");
    let shutdown = server.shutdown_handle();

    let run_task = tokio::spawn(server.run());

    // No connection is ever made, so `run()` is parked inside `accept()`
    // when `notify_one()` fires; the task must still return promptly
    // rather than waiting for a connection that never arrives.
    shutdown.notify_one();

    tokio::time::timeout(std::time::Duration::from_secs(5), run_task)
        .await
        .expect("run() did not return promptly after shutdown")
        .expect("run() task panicked")
        .expect("run() returned an error");
}

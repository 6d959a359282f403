//! Shared harness for the end-to-end scenario tests: spins up a real
//! `shadowftpd` control-loop against a temporary filesystem root and
//! shadow/credential database, and provides small helpers for driving the
//! control connection the way a raw FTP client would (mirrors the reference
//! crate's `tests/common.rs`, adapted to spin up one isolated server per
//! test instead of a shared singleton, since each scenario needs its own
//! ACL rule set).

#![allow(dead_code)]

use shadowftp_auth::{hash_password, SledCredentialStore};
use shadowftp_core::{CredentialStore, IpMask, User};
use shadowftp_vfs::{Filesystem, Permissions, Rule, ShadowStore, VfsConfig};
use shadowftpd::server::passive::PassivePorts;
use shadowftpd::server::AppContext;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A running test server plus the temp directories backing it; dropping
/// this stops nothing explicitly, but keeps the directories alive for the
/// test's duration.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shadow: Arc<ShadowStore>,
    _root: TempDir,
    _db_dir: TempDir,
}

pub const PASSWORD: &str = "wonderland";

/// Starts an isolated server seeded with `alice` and `eve` (both with
/// password [`PASSWORD`] and an IP mask admitting localhost), gated by
/// `rules`.
pub async fn spawn_server(rules: &[&str]) -> TestServer {
    spawn_server_with_users(rules, &["alice", "eve"]).await
}

/// As [`spawn_server`], but seeding exactly the given usernames.
pub async fn spawn_server_with_users(rules: &[&str], usernames: &[&str]) -> TestServer {
    spawn_server_inner(rules, usernames, false).await
}

/// As [`spawn_server`], but with a self-signed TLS context loaded, so
/// `AUTH TLS` negotiates instead of replying `431`.
pub async fn spawn_server_with_tls(rules: &[&str]) -> TestServer {
    spawn_server_inner(rules, &["alice", "eve"], true).await
}

async fn spawn_server_inner(rules: &[&str], usernames: &[&str], with_tls: bool) -> TestServer {
    let root = tempfile::tempdir().expect("creating temp fs root");
    let db_dir = tempfile::tempdir().expect("creating temp db dir");
    let db = sled::Config::new()
        .path(db_dir.path().join("shadow.db"))
        .open()
        .expect("opening sled db");
    let shadow = Arc::new(ShadowStore::open(&db).expect("opening shadow store"));
    let credentials = Arc::new(SledCredentialStore::open(&db).expect("opening credential store"));

    for name in usernames {
        let hash = hash_password(PASSWORD).expect("hashing test password");
        let mut user = User::new(*name, hash);
        user.ip_masks.push(IpMask("*@127.0.0.*".to_string()));
        credentials.add_user(user).await.expect("adding test user");
    }

    let parsed_rules: Vec<Rule> = rules.iter().map(|r| Rule::parse(r).expect("parsing test ACL rule")).collect();
    let permissions = Arc::new(Permissions::new(parsed_rules));

    let vfs_config = VfsConfig {
        root: root.path().to_path_buf(),
        default_user: "nobody".to_string(),
        default_group: "nogroup".to_string(),
        hide_patterns: Vec::new(),
    };
    let fs = Arc::new(Filesystem::new(vfs_config, permissions, shadow.clone()).expect("opening virtual filesystem"));

    let tls_acceptor = if with_tls {
        let cert_key = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).expect("generating test certificate");
        let cert_path = db_dir.path().join("test.crt");
        let key_path = db_dir.path().join("test.key");
        std::fs::write(&cert_path, cert_key.cert.pem()).expect("writing test certificate");
        std::fs::write(&key_path, cert_key.key_pair.serialize_pem()).expect("writing test key");
        Some(shadowftpd::server::tls::load_acceptor(&cert_path, &key_path).expect("loading test TLS context"))
    } else {
        None
    };

    let ctx = Arc::new(AppContext {
        fs,
        credentials: credentials as Arc<dyn CredentialStore>,
        passive_ports: Arc::new(PassivePorts::new(40000, 40100)),
        tls_acceptor,
        public_ip: None,
        sitename_short: "shadowftpd-test".to_string(),
    });

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.expect("binding control listener");
    let addr = listener.local_addr().expect("reading bound local address");

    tokio::spawn(async move {
        let shutdown = std::future::pending::<()>();
        let _ = shadowftpd::server::serve(listener, ctx, shutdown).await;
    });

    TestServer {
        addr,
        shadow,
        _root: root,
        _db_dir: db_dir,
    }
}

impl TestServer {
    /// The real on-disk path backing the virtual filesystem root.
    pub fn fs_root(&self) -> &std::path::Path {
        self._root.path()
    }
}

pub async fn connect(server: &TestServer) -> TcpStream {
    TcpStream::connect(server.addr).await.expect("connecting to test server")
}

/// Reads one reply from the control connection (single- or multi-line;
/// tests only assert on the first line's code, so a partial read of a
/// multi-line block is fine for the `starts_with` checks they do).
pub async fn read_reply(stream: &mut TcpStream) -> String {
    let mut buf = vec![0u8; 8192];
    let n = stream.read(&mut buf).await.expect("reading server reply");
    String::from_utf8_lossy(&buf[..n]).to_string()
}

pub async fn send(stream: &mut TcpStream, line: &str) {
    stream.write_all(line.as_bytes()).await.expect("writing command");
}

/// Drives `USER`/`PASS` to a successful login as `user` (password
/// [`PASSWORD`]), asserting on the expected `220`/`331`/`230` sequence.
pub async fn login(stream: &mut TcpStream, user: &str) {
    assert!(read_reply(stream).await.starts_with("220"));
    send(stream, &format!("USER {user}\r\n")).await;
    assert!(read_reply(stream).await.starts_with("331"));
    send(stream, &format!("PASS {PASSWORD}\r\n")).await;
    assert!(read_reply(stream).await.starts_with("230"));
}

/// Parses the `(h1,h2,h3,h4,p1,p2)` body of a `227` reply.
pub fn parse_pasv(line: &str) -> SocketAddr {
    let body = line
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .expect("227 reply missing parenthesized address")
        .0;
    let nums: Vec<u8> = body.split(',').filter_map(|s| s.trim().parse().ok()).collect();
    assert_eq!(nums.len(), 6, "227 reply must carry six comma-separated numbers");
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3])),
        port,
    )
}

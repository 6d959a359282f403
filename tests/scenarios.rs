//! End-to-end scenario tests (S1-S7), each driving a real control connection
//! against an isolated in-process server the way a raw FTP client would.
//!
//! Each test spins up its own server (see `common::spawn_server*`) rather
//! than sharing one singleton across the file, since every scenario needs a
//! distinct ACL rule set and S2 additionally needs a TLS context; the
//! reference crate's shared-singleton pattern doesn't fit that.

mod common;

use common::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::rustls;

#[tokio::test]
async fn s1_unauthenticated_probe() {
    let server = spawn_server(&[]).await;
    let mut stream = connect(&server).await;

    let greeting = read_reply(&mut stream).await;
    assert!(greeting.starts_with("220"), "unexpected greeting: {greeting}");

    send(&mut stream, "LIST /\r\n").await;
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("530"), "expected 530 Not logged in, got: {reply}");
}

/// Accepts any server certificate; only used for the client side of this
/// test's TLS handshake against our own self-signed test cert.
#[derive(Debug)]
struct AcceptAny;

impl rustls::client::danger::ServerCertVerifier for AcceptAny {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[tokio::test]
async fn s2_tls_handshake_then_login() {
    let server = spawn_server_with_tls(&[]).await;
    let mut stream = connect(&server).await;

    assert!(read_reply(&mut stream).await.starts_with("220"));

    send(&mut stream, "AUTH TLS\r\n").await;
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("234"), "expected 234 for AUTH TLS, got: {reply}");

    let tls_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(std::sync::Arc::new(AcceptAny))
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(std::sync::Arc::new(tls_config));
    let server_name = rustls::pki_types::ServerName::try_from("localhost").expect("valid DNS name");
    let mut tls_stream = connector.connect(server_name, stream).await.expect("TLS handshake must succeed");

    tls_stream.write_all(b"USER alice\r\n").await.expect("writing USER");
    let mut buf = vec![0u8; 4096];
    let n = tls_stream.read(&mut buf).await.expect("reading USER reply");
    let reply = String::from_utf8_lossy(&buf[..n]);
    assert!(reply.starts_with("331"), "expected 331, got: {reply}");

    tls_stream.write_all(format!("PASS {PASSWORD}\r\n").as_bytes()).await.expect("writing PASS");
    let n = tls_stream.read(&mut buf).await.expect("reading PASS reply");
    let reply = String::from_utf8_lossy(&buf[..n]);
    assert!(reply.starts_with("230"), "expected 230 Welcome, got: {reply}");
}

#[tokio::test]
async fn s3_deny_by_acl() {
    let server = spawn_server(&["upload /** !-eve *"]).await;
    let mut stream = connect(&server).await;
    login(&mut stream, "eve").await;

    send(&mut stream, "PASV\r\n").await;
    let pasv_reply = read_reply(&mut stream).await;
    assert!(pasv_reply.starts_with("227"));
    let data_addr = parse_pasv(&pasv_reply);
    let data_fut = tokio::net::TcpStream::connect(data_addr);

    send(&mut stream, "STOR /foo\r\n").await;
    let mut data_stream = data_fut.await.expect("connecting to passive data port");
    let _ = data_stream.shutdown().await;

    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("550"), "expected 550 denied, got: {reply}");

    assert!(!server.fs_root().join("foo").exists(), "denied STOR must not create a file");
    assert!(server.shadow.get("/foo").expect("shadow lookup").is_none(), "denied STOR must not leave a shadow entry");
}

#[tokio::test]
async fn s4_resumable_upload_with_crc() {
    let server = spawn_server(&["upload /** *", "resume /** *"]).await;
    let mut stream = connect(&server).await;
    login(&mut stream, "alice").await;

    let first = vec![0xAAu8; 1000];
    let second = vec![0xBBu8; 500];

    send(&mut stream, "PASV\r\n").await;
    let data_addr = parse_pasv(&read_reply(&mut stream).await);
    send(&mut stream, "STOR /f\r\n").await;
    let mut data_stream = tokio::net::TcpStream::connect(data_addr).await.expect("connecting data port");
    data_stream.write_all(&first).await.expect("writing first chunk");
    data_stream.shutdown().await.expect("closing first data conn");
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("226"), "expected 226, got: {reply}");

    send(&mut stream, "REST 1000\r\n").await;
    assert!(read_reply(&mut stream).await.starts_with("350"));

    send(&mut stream, "PASV\r\n").await;
    let data_addr = parse_pasv(&read_reply(&mut stream).await);
    send(&mut stream, "APPE /f\r\n").await;
    let mut data_stream = tokio::net::TcpStream::connect(data_addr).await.expect("connecting data port");
    data_stream.write_all(&second).await.expect("writing second chunk");
    data_stream.shutdown().await.expect("closing second data conn");
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("226"), "expected 226, got: {reply}");

    let file_path = server.fs_root().join("f");
    let contents = std::fs::read(&file_path).expect("reading uploaded file");
    assert_eq!(contents.len(), 1500);

    let mut expected = first.clone();
    expected.extend_from_slice(&second);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&expected);
    let expected_crc = hasher.finalize();

    let entry = server.shadow.get("/f").expect("shadow lookup").expect("shadow entry must exist");
    assert_eq!(entry.crc32, expected_crc);
    assert_eq!(entry.owner, "alice");
}

#[tokio::test]
async fn s5_pasv_port_recycling() {
    let server = spawn_server(&["download /** *", "upload /** *"]).await;
    let mut stream = connect(&server).await;
    login(&mut stream, "alice").await;

    send(&mut stream, "PASV\r\n").await;
    let first_addr = parse_pasv(&read_reply(&mut stream).await);
    assert!((40000..40100).contains(&first_addr.port()), "port {} outside configured pool", first_addr.port());

    send(&mut stream, "LIST\r\n").await;
    let data_stream = tokio::net::TcpStream::connect(first_addr).await.expect("connecting first data port");
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("226"), "expected 226, got: {reply}");
    drop(data_stream);

    send(&mut stream, "PASV\r\n").await;
    let second_addr = parse_pasv(&read_reply(&mut stream).await);
    assert!((40000..40100).contains(&second_addr.port()));

    send(&mut stream, "LIST\r\n").await;
    let data_stream = tokio::net::TcpStream::connect(second_addr).await.expect("connecting second data port");
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("226"), "expected 226, got: {reply}");
    drop(data_stream);

    send(&mut stream, "QUIT\r\n").await;
    assert!(read_reply(&mut stream).await.starts_with("221"));

    // Both ports must be free again: binding fresh listeners on them must
    // succeed now that the session has released and closed.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    for addr in [first_addr, second_addr] {
        let listener = tokio::net::TcpListener::bind(addr).await;
        assert!(listener.is_ok(), "port {} was not released", addr.port());
    }
}

#[tokio::test]
async fn s6_rnfr_rnto_sequence() {
    let server = spawn_server(&["rename /** *", "upload /** *"]).await;
    let mut stream = connect(&server).await;
    login(&mut stream, "alice").await;

    send(&mut stream, "PASV\r\n").await;
    let data_addr = parse_pasv(&read_reply(&mut stream).await);
    send(&mut stream, "STOR /a\r\n").await;
    let mut data_stream = tokio::net::TcpStream::connect(data_addr).await.expect("connecting data port");
    data_stream.write_all(b"hello").await.expect("writing file body");
    data_stream.shutdown().await.expect("closing data conn");
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("226"), "expected 226, got: {reply}");

    send(&mut stream, "RNFR /a\r\n").await;
    assert!(read_reply(&mut stream).await.starts_with("350"));

    send(&mut stream, "NOOP\r\n").await;
    assert!(read_reply(&mut stream).await.starts_with("200"));

    send(&mut stream, "RNTO /b\r\n").await;
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("503"), "expected 503 bad sequence, got: {reply}");
}

#[tokio::test]
async fn s7_private_hide() {
    let server = spawn_server(&["private /staff/** !*", "download /** *", "makedir /** *"]).await;
    std::fs::create_dir(server.fs_root().join("staff")).expect("creating staff dir on disk");
    let mut stream = connect(&server).await;
    login(&mut stream, "alice").await;

    send(&mut stream, "CWD /staff\r\n").await;
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("550"), "expected 550, got: {reply}");
    assert!(!reply.to_lowercase().contains("permission"), "must not reveal permission denial, got: {reply}");

    send(&mut stream, "LIST /staff\r\n").await;
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("550"), "expected 550, got: {reply}");
    assert!(!reply.to_lowercase().contains("permission"), "must not reveal permission denial, got: {reply}");
}

#[tokio::test]
async fn s8_abor_interrupts_in_flight_stor() {
    let server = spawn_server(&["upload /** *"]).await;
    let mut stream = connect(&server).await;
    login(&mut stream, "alice").await;

    send(&mut stream, "PASV\r\n").await;
    let data_addr = parse_pasv(&read_reply(&mut stream).await);
    send(&mut stream, "STOR /f\r\n").await;
    let mut data_stream = tokio::net::TcpStream::connect(data_addr).await.expect("connecting data port");
    data_stream.write_all(b"only part of the file").await.expect("writing partial body");
    // Deliberately neither shutting down nor closing the data connection:
    // the server's upload is left blocked reading for more bytes, so ABOR
    // has to interrupt it rather than wait for EOF.

    send(&mut stream, "ABOR\r\n").await;

    let mut combined = String::new();
    for _ in 0..2 {
        combined.push_str(&read_reply(&mut stream).await);
    }
    assert!(combined.starts_with("426"), "expected 426 Transfer aborted first, got: {combined}");
    assert!(combined.contains("226"), "expected a trailing 226 ABOR reply, got: {combined}");

    assert!(!server.fs_root().join("f").exists(), "an aborted STOR must not leave a completed file");
}

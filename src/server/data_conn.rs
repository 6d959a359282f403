//! The data connection: active (server dials out) or passive (server
//! listens, client dials in), optionally TLS-wrapped when `PROT P` is in
//! effect. Connection establishment is lazy — `PASV`/`PORT` only reserve the
//! plumbing; the actual accept/dial happens on the first `ensure_connected`
//! call from a transfer command, bounded by a 60-second deadline either way.

use crate::error::{ControlChanError, ControlChanErrorKind};
use crate::server::passive::PassivePorts;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::{TlsAcceptor, TlsConnector};

const DATA_TIMEOUT: Duration = Duration::from_secs(60);

/// The data channel has already authenticated on the control channel; there
/// is no second certificate authority to trust against, so the data-channel
/// TLS client accepts whatever certificate the peer presents. This mirrors
/// the common FTPS convention of reusing the control channel's established
/// trust rather than verifying a second time.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

fn data_tls_connector() -> TlsConnector {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Either side of a data connection before it's established.
enum Pending {
    Active { addr: SocketAddr },
    Passive { listener: TcpListener },
}

enum Established {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
    TlsClient(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for Established {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Established::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Established::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Established::TlsClient(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Established {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Established::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Established::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Established::TlsClient(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Established::Plain(s) => Pin::new(s).poll_flush(cx),
            Established::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Established::TlsClient(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Established::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Established::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Established::TlsClient(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// One data connection, owned exclusively by its session. `ABOR` tears this
/// down by dropping it, which fails any in-flight read/write.
pub struct DataConn {
    pending: Option<Pending>,
    established: Option<Established>,
    protected: bool,
    passive_port: Option<u16>,
    bytes_read: u64,
    bytes_written: u64,
    kind: &'static str,
}

impl DataConn {
    pub fn active(addr: SocketAddr, protected: bool) -> Self {
        DataConn {
            pending: Some(Pending::Active { addr }),
            established: None,
            protected,
            passive_port: None,
            bytes_read: 0,
            bytes_written: 0,
            kind: "Active",
        }
    }

    pub fn passive(listener: TcpListener, port: u16, protected: bool) -> Self {
        DataConn {
            pending: Some(Pending::Passive { listener }),
            established: None,
            protected,
            passive_port: Some(port),
            bytes_read: 0,
            bytes_written: 0,
            kind: "Passive",
        }
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn kind_str(&self) -> &'static str {
        self.kind
    }

    /// Dials out (active) or accepts (passive) if not already connected,
    /// wraps in TLS if `protected`, both bounded by a 60-second deadline.
    pub async fn ensure_connected(&mut self, tls_acceptor: Option<&TlsAcceptor>) -> Result<(), ControlChanError> {
        if self.established.is_some() {
            return Ok(());
        }
        let pending = self.pending.take().ok_or_else(|| ControlChanError::from(ControlChanErrorKind::DataConnectionFailed))?;
        let is_passive = matches!(pending, Pending::Passive { .. });
        let plain = match pending {
            Pending::Active { addr } => tokio::time::timeout(DATA_TIMEOUT, TcpStream::connect(addr))
                .await
                .map_err(|_| ControlChanError::from(ControlChanErrorKind::DataConnectionFailed))?
                .map_err(|_| ControlChanError::from(ControlChanErrorKind::DataConnectionFailed))?,
            Pending::Passive { listener } => {
                let (stream, _peer) = tokio::time::timeout(DATA_TIMEOUT, listener.accept())
                    .await
                    .map_err(|_| ControlChanError::from(ControlChanErrorKind::DataConnectionFailed))?
                    .map_err(|_| ControlChanError::from(ControlChanErrorKind::DataConnectionFailed))?;
                stream
            }
        };

        let established = if !self.protected {
            Established::Plain(plain)
        } else if is_passive {
            let acceptor = tls_acceptor.ok_or_else(|| ControlChanError::from(ControlChanErrorKind::DataConnectionFailed))?;
            let tls = tokio::time::timeout(DATA_TIMEOUT, acceptor.accept(plain))
                .await
                .map_err(|_| ControlChanError::from(ControlChanErrorKind::DataConnectionFailed))?
                .map_err(|_| ControlChanError::from(ControlChanErrorKind::DataConnectionFailed))?;
            Established::Tls(Box::new(tls))
        } else {
            let connector = data_tls_connector();
            let name = ServerName::IpAddress(match plain.peer_addr().map_err(ControlChanError::from)?.ip() {
                IpAddr::V4(v4) => tokio_rustls::rustls::pki_types::IpAddr::V4(v4.into()),
                IpAddr::V6(v6) => tokio_rustls::rustls::pki_types::IpAddr::V6(v6.into()),
            });
            let tls = tokio::time::timeout(DATA_TIMEOUT, connector.connect(name, plain))
                .await
                .map_err(|_| ControlChanError::from(ControlChanErrorKind::DataConnectionFailed))?
                .map_err(|_| ControlChanError::from(ControlChanErrorKind::DataConnectionFailed))?;
            Established::TlsClient(Box::new(tls))
        };

        self.established = Some(established);
        Ok(())
    }

    pub fn stream(&mut self) -> Option<&mut (dyn AsyncRead + AsyncWrite + Send + Unpin)> {
        self.established.as_mut().map(|e| e as &mut (dyn AsyncRead + AsyncWrite + Send + Unpin))
    }

    /// Releases the passive port this connection reserved, if any. No-op
    /// for active connections.
    pub fn release_port(&self, ports: &PassivePorts) {
        if let Some(port) = self.passive_port {
            ports.release(port);
        }
    }

    pub fn record_read(&mut self, n: u64) {
        self.bytes_read += n;
    }

    pub fn record_written(&mut self, n: u64) {
        self.bytes_written += n;
    }
}

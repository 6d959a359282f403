//! The listener: accepts TCP connections, owns the shared TLS context and
//! passive-port allocator, and spawns one task per connection running the
//! control loop.

pub mod data_conn;
pub mod passive;
pub mod tls;

use crate::command;
use crate::commands;
use crate::error::{ControlChanError, ControlChanErrorKind};
use crate::reply::{Reply, ReplyCode};
use crate::session::{Session, TransferCancel};
use futures_util::FutureExt;
use passive::PassivePorts;
use shadowftp_core::CredentialStore;
use shadowftp_vfs::Filesystem;
use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, instrument, warn};

/// Shared, immutable-after-startup state every session needs: the VFS, the
/// credential store, the passive-port allocator and the TLS context. One of
/// these is built in `main` and `Arc`-shared with every connection task.
pub struct AppContext {
    pub fs: Arc<Filesystem>,
    pub credentials: Arc<dyn CredentialStore>,
    pub passive_ports: Arc<PassivePorts>,
    pub tls_acceptor: Option<TlsAcceptor>,
    pub public_ip: Option<IpAddr>,
    pub sitename_short: String,
}

/// How long the control connection may sit idle before the session is torn
/// down, per §5's suspension-point list.
const CONTROL_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Runs the accept loop until `shutdown` resolves (normally a
/// `tokio::signal::ctrl_c`/SIGTERM future), spawning one task per connection
/// and awaiting all of them before returning.
pub async fn serve(listener: TcpListener, ctx: Arc<AppContext>, shutdown: impl std::future::Future<Output = ()>) -> io::Result<()> {
    tokio::pin!(shutdown);
    let mut tasks = tokio::task::JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received, closing listener");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer_addr)) => {
                        let ctx = ctx.clone();
                        tasks.spawn(async move {
                            if let Err(e) = handle_connection(socket, peer_addr, ctx).await {
                                warn!(error = %e, %peer_addr, "session ended with an error");
                            }
                        });
                    }
                    Err(e) if is_temporary(&e) => {
                        warn!(error = %e, "temporary accept error, retrying");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
    while tasks.join_next().await.is_some() {}
    Ok(())
}

fn is_temporary(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted)
}

/// The control connection's transport, plain until (and unless) `AUTH TLS`
/// upgrades it in place.
enum ControlStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl AsyncRead for ControlStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ControlStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ControlStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ControlStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ControlStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ControlStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ControlStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ControlStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ControlStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ControlStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// One connection's lifetime: greeting, then the read-parse-gate-execute-
/// flush loop, wrapped so a panic inside command dispatch tears the session
/// down instead of taking the process with it.
#[instrument(skip(socket, ctx), fields(%peer_addr))]
async fn handle_connection(socket: TcpStream, peer_addr: std::net::SocketAddr, ctx: Arc<AppContext>) -> Result<(), ControlChanError> {
    socket.set_nodelay(true).ok();
    let local_addr = socket.local_addr()?;
    info!("accepted connection");

    let result = std::panic::AssertUnwindSafe(run_control_loop(socket, peer_addr, local_addr, ctx))
        .catch_unwind()
        .await;

    match result {
        Ok(r) => r,
        Err(panic) => {
            let msg = panic_message(&panic);
            error!(panic = %msg, "command handler panicked; tearing down session");
            Ok(())
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn run_control_loop(
    socket: TcpStream,
    peer_addr: std::net::SocketAddr,
    local_addr: std::net::SocketAddr,
    ctx: Arc<AppContext>,
) -> Result<(), ControlChanError> {
    let mut reader = BufReader::new(ControlStream::Plain(socket));
    let mut session = Session::new(peer_addr, local_addr);

    let greeting = Reply::new(ReplyCode::ServiceReady, &format!("{} ready", ctx.sitename_short));
    write_reply(&mut reader, &greeting).await?;

    loop {
        let mut line = String::new();
        let read_result = tokio::time::timeout(CONTROL_IDLE_TIMEOUT, reader.read_line(&mut line)).await;
        let n = match read_result {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                let reply = Reply::new(ReplyCode::ServiceNotAvailable, "control channel timed out");
                write_reply(&mut reader, &reply).await.ok();
                return Err(ControlChanErrorKind::ControlChannelTimeout.into());
            }
        };
        if n == 0 {
            info!("client closed control connection");
            return Ok(());
        }

        let parsed = command::parse(&line);
        let outcome = match parsed {
            Ok(cmd) => {
                if !matches!(cmd, command::Command::Rnto { .. }) {
                    session.clear_rename_from();
                }
                let verb = cmd.verb_name().to_string();
                let r = if cmd.is_transfer() {
                    drive_transfer(&mut reader, &mut session, &ctx, cmd).await
                } else {
                    commands::dispatch(&mut session, &ctx, cmd).await
                };
                session.last_command = Some(verb);
                r
            }
            Err(e) => {
                session.push_reply(ReplyCode::CommandSyntaxError, format!("{e}"));
                Ok(())
            }
        };

        if session.pending_tls_upgrade {
            session.pending_tls_upgrade = false;
            match perform_tls_upgrade(reader, &ctx).await {
                Ok(upgraded) => {
                    reader = upgraded;
                    session.cmd_tls = true;
                }
                Err(e) => {
                    warn!(error = %e, "control channel TLS handshake failed");
                    return Err(ControlChanErrorKind::TlsHandshakeFailed.into());
                }
            }
        }

        let reply = session.take_reply();
        write_reply(&mut reader, &reply).await?;

        if let Err(e) = outcome {
            if e.is_fatal() {
                return Err(e);
            }
        }

        if session.last_command.as_deref() == Some("QUIT") {
            return Ok(());
        }
    }
}

/// Runs a data-transfer command (`RETR`/`STOR`/`APPE`/`LIST`/`NLST`) while
/// still reading the control channel, so a client's `ABOR` is seen instead
/// of sitting unread behind a transfer that can take arbitrarily long. Any
/// other line arriving before the transfer finishes is dropped; FTP clients
/// don't pipeline mid-transfer, so only `ABOR` is meaningful here.
async fn drive_transfer(
    reader: &mut BufReader<ControlStream>,
    session: &mut Session,
    ctx: &AppContext,
    cmd: command::Command,
) -> Result<(), ControlChanError> {
    let cancel = TransferCancel::new();
    session.transfer_cancel = Some(cancel.clone());

    let dispatch = commands::dispatch(session, ctx, cmd);
    tokio::pin!(dispatch);

    let mut abor_received = false;
    let result = loop {
        let mut line = String::new();
        tokio::select! {
            biased;
            r = &mut dispatch => break r,
            read_result = reader.read_line(&mut line), if !cancel.is_cancelled() => {
                match read_result {
                    Ok(0) => cancel.cancel(),
                    Ok(_) => {
                        if matches!(command::parse(&line), Ok(command::Command::Abor)) {
                            abor_received = true;
                            cancel.cancel();
                        }
                    }
                    Err(_) => cancel.cancel(),
                }
            }
        }
    };

    session.transfer_cancel = None;

    // The transfer's own reply (e.g. `426 Transfer aborted`) must reach the
    // client before `ABOR`'s `226`, so flush it here instead of letting the
    // two pile up into one multi-line reply under the outer loop's single
    // `take_reply` call.
    let transfer_reply = session.take_reply();
    write_reply(reader, &transfer_reply).await?;

    if abor_received {
        session.push_reply(ReplyCode::ClosingDataConnection, "ABOR command successful");
    }
    result
}

/// Consumes the plain `TcpStream` behind `reader` and returns a fresh
/// `BufReader` wrapping the `rustls` server session in its place. The
/// `BufReader`'s unread-data buffer is necessarily empty here, since a
/// well-formed `AUTH TLS` line carries no trailing bytes.
async fn perform_tls_upgrade(reader: BufReader<ControlStream>, ctx: &AppContext) -> io::Result<BufReader<ControlStream>> {
    let acceptor = ctx
        .tls_acceptor
        .as_ref()
        .ok_or_else(|| io::Error::other("no TLS context configured"))?;
    let plain = match reader.into_inner() {
        ControlStream::Plain(s) => s,
        ControlStream::Tls(_) => return Err(io::Error::other("control channel already TLS")),
    };
    let tls_stream = acceptor.accept(plain).await?;
    Ok(BufReader::new(ControlStream::Tls(Box::new(tls_stream))))
}

async fn write_reply(reader: &mut BufReader<ControlStream>, reply: &Reply) -> Result<(), ControlChanError> {
    if let Some(text) = reply.render() {
        reader.write_all(text.as_bytes()).await?;
        reader.flush().await?;
    }
    Ok(())
}

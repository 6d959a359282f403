//! Data-connection commands: `PASV`/`PORT` set up the channel, `REST` stores
//! a restart offset, `RETR`/`STOR`/`APPE`/`LIST`/`NLST` drive bytes across
//! it, `ABOR` tears it down.

use super::fsops::resolve;
use super::vfs_error_reply;
use crate::error::ControlChanError;
use crate::reply::ReplyCode;
use crate::server::data_conn::DataConn;
use crate::server::AppContext;
use crate::session::Session;
use shadowftp_vfs::listing;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// `PASV h1,h2,h3,h4,p1,p2` reply body; the advertised address is the
/// server's public IP if configured, else the address the client dialed in
/// on (works for direct, non-NATed deployments without configuration).
fn format_pasv_reply(ip: Ipv4Addr, port: u16) -> String {
    let o = ip.octets();
    format!(
        "Entering Passive Mode ({},{},{},{},{},{})",
        o[0],
        o[1],
        o[2],
        o[3],
        port >> 8,
        port & 0xFF
    )
}

pub async fn pasv(session: &mut Session, ctx: &AppContext) -> Result<(), ControlChanError> {
    session.close_data_conn(&ctx.passive_ports);

    let advertise_ip = ctx.public_ip.unwrap_or(session.local_addr.ip());
    let advertise_ip = match advertise_ip {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => {
            session.push_reply(ReplyCode::CantOpenDataConnection, "PASV requires an IPv4 listening address");
            return Ok(());
        }
    };

    let (listener, port) = match ctx.passive_ports.bind(session.local_addr.ip()).await {
        Ok(v) => v,
        Err(_) => {
            session.push_reply(ReplyCode::CantOpenDataConnection, "Could not open a passive port");
            return Ok(());
        }
    };

    session.data_conn = Some(DataConn::passive(listener, port, session.data_protected));
    session.push_reply(ReplyCode::EnteringPassiveMode, format_pasv_reply(advertise_ip, port));
    Ok(())
}

/// Parses the `h1,h2,h3,h4,p1,p2` argument of `PORT`.
fn parse_port_arg(addr: &str) -> Option<SocketAddr> {
    let parts: Vec<u8> = addr.split(',').map(|p| p.trim().parse().ok()).collect::<Option<_>>()?;
    if parts.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(parts[0], parts[1], parts[2], parts[3]);
    let port = ((parts[4] as u16) << 8) | (parts[5] as u16);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

pub fn port(session: &mut Session, ctx: &AppContext, addr: String) -> Result<(), ControlChanError> {
    session.close_data_conn(&ctx.passive_ports);
    match parse_port_arg(&addr) {
        Some(socket_addr) => {
            session.data_conn = Some(DataConn::active(socket_addr, session.data_protected));
            session.push_reply(ReplyCode::CommandOkay, "PORT command successful");
        }
        None => {
            session.push_reply(ReplyCode::ParameterSyntaxError, "Malformed PORT argument");
        }
    }
    Ok(())
}

pub fn abor(session: &mut Session, ctx: &AppContext) {
    let had_conn = session.data_conn.is_some();
    session.close_data_conn(&ctx.passive_ports);
    if had_conn {
        session.push_reply(ReplyCode::ClosingDataConnection, "ABOR command successful");
    } else {
        session.push_reply(ReplyCode::DataConnectionOpen, "No transfer to abort");
    }
}

/// Connects (dialing or accepting as appropriate) the session's pending
/// data connection, replying `425` and returning `None` on failure.
async fn ready_data_conn<'s>(session: &'s mut Session, ctx: &AppContext) -> Option<&'s mut DataConn> {
    if session.data_conn.is_none() {
        session.push_reply(ReplyCode::CantOpenDataConnection, "Use PASV or PORT first");
        return None;
    }
    let protected = session.data_conn.as_ref().map(|d| d.is_protected()).unwrap_or(false);
    let acceptor = if protected { ctx.tls_acceptor.as_ref() } else { None };
    let connect_result = session.data_conn.as_mut().unwrap().ensure_connected(acceptor).await;
    match connect_result {
        Ok(()) => session.data_conn.as_mut(),
        Err(_) => {
            session.close_data_conn(&ctx.passive_ports);
            session.push_reply(ReplyCode::CantOpenDataConnection, "Could not establish data connection");
            None
        }
    }
}

pub async fn retr(session: &mut Session, ctx: &AppContext, path: &str) -> Result<(), ControlChanError> {
    let Some(user) = session.login.clone() else {
        session.push_reply(ReplyCode::NotLoggedIn, "Not logged in");
        return Ok(());
    };
    let start_pos = std::mem::take(&mut session.restart_position);
    let target = resolve(&session.current_dir, path);

    let (mut file, _len) = match ctx.fs.download(&target, &user, start_pos).await {
        Ok(v) => v,
        Err(e) => {
            let (code, msg) = vfs_error_reply(&e);
            session.push_reply(code, msg);
            return Ok(());
        }
    };

    if ready_data_conn(session, ctx).await.is_none() {
        return Ok(());
    }
    session.push_reply(ReplyCode::FileStatusOkay, "Opening data connection for transfer");

    let cancel = session.transfer_cancel.clone();
    let dc = session.data_conn.as_mut().unwrap();
    let stream = dc.stream().expect("just connected");
    let progress = Arc::new(AtomicU64::new(0));

    let copy = copy_to_data_conn(&mut file, stream, &progress);
    let (total, copy_err, aborted) = match &cancel {
        Some(c) => tokio::select! {
            biased;
            _ = c.cancelled() => (progress.load(Ordering::Relaxed), None, true),
            (total, err) = copy => (total, err, false),
        },
        None => {
            let (total, err) = copy.await;
            (total, err, false)
        }
    };
    dc.record_read(total);
    session.close_data_conn(&ctx.passive_ports);
    debug!(bytes = total, kind = "retr", aborted, "data connection closed");

    if aborted || copy_err.is_some() {
        session.push_reply(ReplyCode::ConnectionClosed, "Transfer aborted");
    } else {
        session.push_reply(ReplyCode::ClosingDataConnection, "Transfer complete");
    }
    Ok(())
}

/// Streams `file`'s remaining bytes to `stream`, tracking running progress in
/// `counter` so a racing `ABOR` can still report how much made it across.
async fn copy_to_data_conn(
    file: &mut tokio::fs::File,
    stream: &mut (dyn tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin),
    counter: &AtomicU64,
) -> (u64, Option<io::Error>) {
    let mut buf = vec![0u8; 256 * 1024];
    let mut total = 0u64;
    let copy_err = loop {
        match file.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => {
                if let Err(e) = stream.write_all(&buf[..n]).await {
                    break Some(e);
                }
                total += n as u64;
                counter.store(total, Ordering::Relaxed);
            }
            Err(e) => break Some(e),
        }
    };
    let _ = stream.flush().await;
    (total, copy_err)
}

pub async fn stor(session: &mut Session, ctx: &AppContext, path: &str, force_append: bool) -> Result<(), ControlChanError> {
    let Some(user) = session.login.clone() else {
        session.push_reply(ReplyCode::NotLoggedIn, "Not logged in");
        return Ok(());
    };
    let start_pos = std::mem::take(&mut session.restart_position);
    let resume = force_append || start_pos > 0;
    let target = resolve(&session.current_dir, path);

    if ready_data_conn(session, ctx).await.is_none() {
        return Ok(());
    }
    session.push_reply(ReplyCode::FileStatusOkay, "Ready to receive data");

    let cancel = session.transfer_cancel.clone();
    let dc = session.data_conn.as_mut().unwrap();
    let stream = dc.stream().expect("just connected");
    let upload = ctx.fs.upload(&target, &user, resume, stream);

    let result = match &cancel {
        Some(c) => tokio::select! {
            biased;
            _ = c.cancelled() => None,
            r = upload => Some(r),
        },
        None => Some(upload.await),
    };
    session.close_data_conn(&ctx.passive_ports);

    match result {
        None => {
            debug!(kind = "stor", aborted = true, "data connection closed");
            session.push_reply(ReplyCode::ConnectionClosed, "Transfer aborted");
        }
        Some(Ok(bytes)) => {
            debug!(bytes, kind = "stor", aborted = false, "data connection closed");
            session.push_reply(ReplyCode::ClosingDataConnection, "Transfer complete");
        }
        Some(Err(e)) => {
            let (code, msg) = vfs_error_reply(&e);
            session.push_reply(code, msg);
        }
    }
    Ok(())
}

pub async fn list(session: &mut Session, ctx: &AppContext, path: Option<&str>, detailed: bool) -> Result<(), ControlChanError> {
    let Some(user) = session.login.clone() else {
        session.push_reply(ReplyCode::NotLoggedIn, "Not logged in");
        return Ok(());
    };
    let target = match path {
        Some(p) => resolve(&session.current_dir, p),
        None => session.current_dir.clone(),
    };

    let entries = match ctx.fs.list(&target, &user).await {
        Ok(v) => v,
        Err(e) => {
            let (code, msg) = vfs_error_reply(&e);
            session.push_reply(code, msg);
            return Ok(());
        }
    };

    if ready_data_conn(session, ctx).await.is_none() {
        return Ok(());
    }
    session.push_reply(ReplyCode::FileStatusOkay, "Here comes the directory listing");

    let body = if detailed { listing::format_detailed(&entries) } else { listing::format_short(&entries) };
    let cancel = session.transfer_cancel.clone();
    let dc = session.data_conn.as_mut().unwrap();
    let stream = dc.stream().expect("just connected");

    let write = async {
        let r = stream.write_all(body.as_bytes()).await;
        let _ = stream.flush().await;
        r
    };
    let (write_result, aborted) = match &cancel {
        Some(c) => tokio::select! {
            biased;
            _ = c.cancelled() => (Err(io::Error::new(io::ErrorKind::Interrupted, "transfer aborted")), true),
            r = write => (r, false),
        },
        None => (write.await, false),
    };
    dc.record_written(body.len() as u64);
    session.close_data_conn(&ctx.passive_ports);
    debug!(bytes = body.len(), kind = "list", aborted, "data connection closed");

    if aborted || write_result.is_err() {
        session.push_reply(ReplyCode::ConnectionClosed, "Transfer aborted");
    } else {
        session.push_reply(ReplyCode::ClosingDataConnection, "Directory send OK");
    }
    Ok(())
}

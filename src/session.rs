//! Per-connection session state: the login/TLS state machine, the reply
//! buffer commands write into, and the fields a handful of commands stash
//! across calls (`REST`, `RNFR`).

use crate::reply::{Reply, ReplyCode};
use crate::server::data_conn::DataConn;
use shadowftp_core::User;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation signal for an in-flight data transfer. The
/// control loop creates one before driving `RETR`/`STOR`/`APPE`/`LIST`/
/// `NLST` and calls [`TransferCancel::cancel`] if `ABOR` arrives on the
/// control channel while that transfer is still running; the transfer
/// command races its own I/O against [`TransferCancel::cancelled`] and
/// bails out to close the data connection instead of waiting for EOF.
pub struct TransferCancel {
    notify: tokio::sync::Notify,
    cancelled: AtomicBool,
}

impl TransferCancel {
    pub fn new() -> Arc<Self> {
        Arc::new(TransferCancel {
            notify: tokio::sync::Notify::new(),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called; resolves immediately if it
    /// already has been.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Where a session sits in the login dialogue. Monotonic within one login
/// attempt; reset to `Auth` (not `Null`) on a failed `PASS` so the client
/// doesn't have to renegotiate TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Freshly accepted; nothing negotiated yet.
    Null,
    /// TLS negotiated (or not required); awaiting USER/PASS.
    Auth,
    /// PASS succeeded; every other command is now available.
    LoggedIn,
}

/// Binary (`TYPE I`) or ASCII (`TYPE A`) transfer mode. This server treats
/// both identically on the wire (no CRLF translation) but tracks the
/// client's declared mode for `STAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Ascii,
    Binary,
}

/// A per-connection session. Owns at most one data connection; the control
/// connection itself is owned by the control loop, not here.
pub struct Session {
    pub state: SessionState,
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,

    /// `USER` argument, pending verification by `PASS`.
    pub pending_user: Option<String>,
    /// Set once `PASS` succeeds; cleared on failed login or QUIT.
    pub login: Option<User>,

    pub binary_mode: TransferMode,
    /// Control-channel TLS negotiated.
    pub cmd_tls: bool,
    /// Whether data connections must be TLS-wrapped (`PROT P`).
    pub data_protected: bool,

    pub restart_position: u64,
    pub rename_from: Option<String>,
    pub last_command: Option<String>,

    pub current_dir: String,

    pub data_conn: Option<DataConn>,

    /// Set by the control loop while a `RETR`/`STOR`/`APPE`/`LIST`/`NLST` is
    /// in flight, so a concurrently-read `ABOR` has something to cancel.
    pub transfer_cancel: Option<Arc<TransferCancel>>,

    /// Set by the `AUTH TLS` command handler when negotiation should happen;
    /// consumed and cleared by the control loop immediately afterward.
    pub pending_tls_upgrade: bool,

    reply_lines: Vec<String>,
    reply_code: Option<ReplyCode>,
}

impl Session {
    pub fn new(peer_addr: SocketAddr, local_addr: SocketAddr) -> Self {
        Session {
            state: SessionState::Null,
            peer_addr,
            local_addr,
            pending_user: None,
            login: None,
            binary_mode: TransferMode::Ascii,
            cmd_tls: false,
            data_protected: false,
            restart_position: 0,
            rename_from: None,
            last_command: None,
            current_dir: "/".to_string(),
            data_conn: None,
            transfer_cancel: None,
            pending_tls_upgrade: false,
            reply_lines: Vec::new(),
            reply_code: None,
        }
    }

    /// The logged-in user, or a stand-in error for callers that require one.
    /// Command handlers gated to `LoggedIn` can rely on this being `Some`.
    pub fn user(&self) -> Option<&User> {
        self.login.as_ref()
    }

    /// Pushes one line into the reply buffer under `code`. If a later push
    /// uses a different code than an earlier one in the same command, the
    /// last code wins (matches the reference reply-accumulator behavior).
    pub fn push_reply(&mut self, code: ReplyCode, line: impl Into<String>) {
        self.reply_code = Some(code);
        self.reply_lines.push(line.into());
    }

    /// Drains the buffer into a renderable [`Reply`], single-line if exactly
    /// one line was pushed, multi-line otherwise. Returns `Reply::None` if
    /// nothing was pushed (a command that intentionally stays silent).
    pub fn take_reply(&mut self) -> Reply {
        let code = match self.reply_code.take() {
            Some(c) => c,
            None => return Reply::None,
        };
        let lines = std::mem::take(&mut self.reply_lines);
        if lines.len() <= 1 {
            Reply::new_with_string(code, lines.into_iter().next().unwrap_or_default())
        } else {
            Reply::MultiLine { code, lines }
        }
    }

    /// Resets login state after a failed `PASS`, without dropping back to
    /// `Null` (TLS, once negotiated, stays negotiated).
    pub fn clear_login(&mut self) {
        self.pending_user = None;
        self.login = None;
        self.state = SessionState::Auth;
    }

    /// Clears `rename_from`; called on every command that isn't `RNTO`,
    /// per the `RNFR` contract ("valid only when the next command is RNTO").
    pub fn clear_rename_from(&mut self) {
        self.rename_from = None;
    }

    /// Tears down and releases any data connection this session holds.
    /// `ABOR` and every PASV/PORT re-issue route through here.
    pub fn close_data_conn(&mut self, ports: &crate::server::passive::PassivePorts) {
        if let Some(dc) = self.data_conn.take() {
            dc.release_port(ports);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 21)
    }

    #[test]
    fn single_pushed_line_renders_single_line_reply() {
        let mut s = Session::new(addr(), addr());
        s.push_reply(ReplyCode::CommandOkay, "NOOP ok");
        assert_eq!(s.take_reply().render().unwrap(), "200 NOOP ok\r\n");
    }

    #[test]
    fn multiple_pushed_lines_render_multiline() {
        let mut s = Session::new(addr(), addr());
        s.push_reply(ReplyCode::SystemStatus, "a");
        s.push_reply(ReplyCode::SystemStatus, "b");
        let rendered = s.take_reply().render().unwrap();
        assert_eq!(rendered, "211-a\r\n b\r\n211 End.\r\n");
    }

    #[test]
    fn no_push_drains_to_none() {
        let mut s = Session::new(addr(), addr());
        assert!(s.take_reply().render().is_none());
    }

    #[test]
    fn failed_login_drops_to_auth_not_null() {
        let mut s = Session::new(addr(), addr());
        s.state = SessionState::LoggedIn;
        s.pending_user = Some("alice".to_string());
        s.clear_login();
        assert_eq!(s.state, SessionState::Auth);
        assert!(s.pending_user.is_none());
    }
}

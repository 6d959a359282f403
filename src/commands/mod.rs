//! FTP command dispatch: each verb's `{required_state, execute}` contract
//! from the reference crate's `controlchan::commands` module, collapsed
//! here into one `match` rather than one boxed trait object per verb, since
//! this server's command set is fixed at compile time and doesn't need the
//! reference crate's pluggable-middleware generality.

mod fsops;
mod transfer;

use crate::command::Command;
use crate::error::ControlChanError;
use crate::reply::ReplyCode;
use crate::server::AppContext;
use crate::session::{Session, SessionState, TransferMode};
use shadowftp_vfs::VfsError;
use tracing::instrument;

/// The minimum session state a command may run in. Anything below this is
/// rejected with the state-specific reply §4.F specifies, never executed.
fn required_state(cmd: &Command) -> SessionState {
    match cmd {
        Command::Feat | Command::Help { .. } | Command::Auth { .. } | Command::Quit => SessionState::Null,
        Command::User { .. } | Command::Pass { .. } | Command::Pbsz { .. } | Command::Prot { .. } => SessionState::Auth,
        _ => SessionState::LoggedIn,
    }
}

/// Runs one parsed command against `session`, pushing reply lines as it
/// goes. Returns `Err` only for a transport-fatal condition; anything a
/// client caused (bad permission, bad path, wrong state) is reported as a
/// reply and `Ok(())`.
#[instrument(skip(session, ctx, cmd), fields(verb = cmd.verb_name()))]
pub async fn dispatch(session: &mut Session, ctx: &AppContext, cmd: Command) -> Result<(), ControlChanError> {
    let required = required_state(&cmd);
    if session.state < required {
        let (code, msg) = match required {
            SessionState::Auth => (ReplyCode::BadCommandSequence, "Please send AUTH first"),
            SessionState::LoggedIn => (ReplyCode::NotLoggedIn, "Not logged in"),
            SessionState::Null => unreachable!("Null is never a gate's requirement"),
        };
        session.push_reply(code, msg);
        return Ok(());
    }

    match cmd {
        Command::User { name } => cmd_user(session, name),
        Command::Pass { password } => cmd_pass(session, ctx, password).await,
        Command::Auth { protocol } => cmd_auth(session, ctx, protocol),
        Command::Pbsz { size } => cmd_pbsz(session, size),
        Command::Prot { param } => cmd_prot(session, ctx, param),
        Command::Noop => {
            session.push_reply(ReplyCode::CommandOkay, "NOOP ok");
            Ok(())
        }
        Command::Syst => {
            session.push_reply(ReplyCode::SystemType, "UNIX Type: L8");
            Ok(())
        }
        Command::Type { param } => cmd_type(session, param),
        Command::Mode { param } => cmd_mode(session, param),
        Command::Stru { param } => cmd_stru(session, param),
        Command::Pwd => {
            let dir = session.current_dir.clone();
            session.push_reply(ReplyCode::DirCreated, format!("\"{dir}\" is the current directory"));
            Ok(())
        }
        Command::Cwd { path } => fsops::cwd(session, ctx, &path).await,
        Command::Cdup => fsops::cdup(session, ctx).await,
        Command::Quit => {
            session.push_reply(ReplyCode::ClosingControlConnection, "Goodbye");
            Ok(())
        }
        Command::Feat => {
            cmd_feat(session);
            Ok(())
        }
        Command::Help { verb } => {
            cmd_help(session, verb);
            Ok(())
        }
        Command::Stat { path } => cmd_stat(session, ctx, path).await,
        Command::Abor => {
            transfer::abor(session, ctx);
            Ok(())
        }
        Command::Pasv => transfer::pasv(session, ctx).await,
        Command::Port { addr } => transfer::port(session, ctx, addr),
        Command::Rest { offset } => {
            session.restart_position = offset;
            session.push_reply(ReplyCode::FileActionPending, format!("Restarting at {offset}"));
            Ok(())
        }
        Command::Retr { path } => transfer::retr(session, ctx, &path).await,
        Command::Stor { path } => transfer::stor(session, ctx, &path, false).await,
        Command::Appe { path } => transfer::stor(session, ctx, &path, true).await,
        Command::List { path } => transfer::list(session, ctx, path.as_deref(), true).await,
        Command::Nlst { path } => transfer::list(session, ctx, path.as_deref(), false).await,
        Command::Rnfr { path } => fsops::rnfr(session, ctx, path).await,
        Command::Rnto { path } => fsops::rnto(session, ctx, path).await,
        Command::Dele { path } => fsops::dele(session, ctx, &path).await,
        Command::Rmd { path } => fsops::rmd(session, ctx, &path).await,
        Command::Mkd { path } => fsops::mkd(session, ctx, &path).await,
        Command::Size { path } => fsops::size(session, ctx, &path).await,
        Command::Mdtm { path } => fsops::mdtm(session, ctx, &path).await,
        Command::Other { verb } => {
            session.push_reply(ReplyCode::CommandNotImplemented, format!("{verb} not implemented"));
            Ok(())
        }
    }
}

fn cmd_user(session: &mut Session, name: String) -> Result<(), ControlChanError> {
    session.clear_login();
    session.pending_user = Some(name.to_lowercase());
    session.push_reply(ReplyCode::NeedPassword, "Please specify the password");
    Ok(())
}

async fn cmd_pass(session: &mut Session, ctx: &AppContext, password: String) -> Result<(), ControlChanError> {
    let name = match session.pending_user.take() {
        Some(n) => n,
        None => {
            session.push_reply(ReplyCode::BadCommandSequence, "Login with USER first");
            return Ok(());
        }
    };

    let password_ok = ctx.credentials.check_password(&name, &password).await.unwrap_or(false);
    let ip_ok = password_ok
        && ctx
            .credentials
            .check_ip(&name, session.peer_addr.ip(), session.local_addr.port(), session.peer_addr.port())
            .await
            .unwrap_or(false);

    if !password_ok || !ip_ok {
        session.clear_login();
        session.push_reply(ReplyCode::NotLoggedIn, "Login incorrect");
        return Ok(());
    }

    match ctx.credentials.get_user(&name).await {
        Ok(user) if user.is_active() => {
            session.state = SessionState::LoggedIn;
            session.login = Some(user);
            session.push_reply(ReplyCode::UserLoggedIn, "Login successful");

            let creds = ctx.credentials.clone();
            let name_for_stamp = name;
            tokio::spawn(async move {
                let _ = creds
                    .update_user(&name_for_stamp, Box::new(|u| u.last_login_at = Some(chrono::Utc::now())))
                    .await;
            });
        }
        _ => {
            session.clear_login();
            session.push_reply(ReplyCode::NotLoggedIn, "Login incorrect");
        }
    }
    Ok(())
}

fn cmd_auth(session: &mut Session, ctx: &AppContext, protocol: String) -> Result<(), ControlChanError> {
    if protocol != "TLS" && protocol != "TLS-C" {
        session.push_reply(ReplyCode::CommandNotImplementedForParameter, "Unsupported security mechanism");
        return Ok(());
    }
    if ctx.tls_acceptor.is_none() {
        session.push_reply(ReplyCode::NoTlsAvailable, "TLS not available");
        return Ok(());
    }
    session.clear_login();
    session.state = SessionState::Auth;
    session.pending_tls_upgrade = true;
    session.push_reply(ReplyCode::AuthOkayNoDataNeeded, "AUTH TLS successful");
    Ok(())
}

fn cmd_pbsz(session: &mut Session, _size: String) -> Result<(), ControlChanError> {
    // Only a zero buffer size makes sense over TLS (no protocol-level
    // encoding), so every value is accepted but the client is always told
    // to use 0, per RFC 4217 §4.
    session.push_reply(ReplyCode::CommandOkay, "PBSZ=0");
    Ok(())
}

fn cmd_prot(session: &mut Session, ctx: &AppContext, param: String) -> Result<(), ControlChanError> {
    match param.as_str() {
        "C" => {
            session.data_protected = false;
            session.push_reply(ReplyCode::CommandOkay, "Protection set to Clear");
        }
        "P" => {
            if ctx.tls_acceptor.is_none() {
                session.push_reply(ReplyCode::FtpsRequired, "TLS not available for data protection");
            } else {
                session.data_protected = true;
                session.push_reply(ReplyCode::CommandOkay, "Protection set to Private");
            }
        }
        "S" | "E" => {
            session.push_reply(ReplyCode::FtpsRequired, "Only Clear and Private protection levels are supported");
        }
        _ => {
            session.push_reply(ReplyCode::CommandNotImplementedForParameter, "Unrecognized PROT parameter");
        }
    }
    Ok(())
}

fn cmd_type(session: &mut Session, param: String) -> Result<(), ControlChanError> {
    match param.split_whitespace().next().unwrap_or("") {
        "A" => {
            session.binary_mode = TransferMode::Ascii;
            session.push_reply(ReplyCode::CommandOkay, "Switching to ASCII mode");
        }
        "I" => {
            session.binary_mode = TransferMode::Binary;
            session.push_reply(ReplyCode::CommandOkay, "Switching to Binary mode");
        }
        _ => session.push_reply(ReplyCode::CommandNotImplementedForParameter, "Unrecognized TYPE parameter"),
    }
    Ok(())
}

fn cmd_mode(session: &mut Session, param: String) -> Result<(), ControlChanError> {
    if param == "S" {
        session.push_reply(ReplyCode::CommandOkay, "Mode set to Stream");
    } else {
        session.push_reply(ReplyCode::CommandNotImplementedForParameter, "Unsupported MODE");
    }
    Ok(())
}

fn cmd_stru(session: &mut Session, param: String) -> Result<(), ControlChanError> {
    if param == "F" {
        session.push_reply(ReplyCode::CommandOkay, "Structure set to File");
    } else {
        session.push_reply(ReplyCode::CommandNotImplementedForParameter, "Unsupported STRU");
    }
    Ok(())
}

const FEATURES: &[&str] = &["AUTH TLS", "PBSZ", "PROT", "REST STREAM", "SIZE", "MDTM"];

fn cmd_feat(session: &mut Session) {
    session.push_reply(ReplyCode::SystemStatus, "Features:");
    for feature in FEATURES {
        session.push_reply(ReplyCode::SystemStatus, format!(" {feature}"));
    }
    session.push_reply(ReplyCode::SystemStatus, "End");
}

const VERBS: &[&str] = &[
    "USER", "PASS", "AUTH", "PBSZ", "PROT", "PASV", "PORT", "REST", "RNFR", "RNTO", "RETR", "STOR", "APPE", "LIST", "NLST", "DELE",
    "RMD", "MKD", "CWD", "CDUP", "PWD", "SYST", "TYPE", "MODE", "STRU", "NOOP", "STAT", "ABOR", "QUIT", "FEAT", "SIZE", "MDTM", "HELP",
];

fn cmd_help(session: &mut Session, verb: Option<String>) {
    match verb {
        None => {
            session.push_reply(ReplyCode::HelpMessage, "The following commands are recognized:");
            for v in VERBS {
                session.push_reply(ReplyCode::HelpMessage, format!(" {v}"));
            }
            session.push_reply(ReplyCode::HelpMessage, "End");
        }
        Some(v) => {
            let upper = v.to_ascii_uppercase();
            if VERBS.contains(&upper.as_str()) {
                session.push_reply(ReplyCode::HelpMessage, upper);
            } else {
                session.push_reply(ReplyCode::CommandNotImplemented, format!("Unrecognized command {upper}"));
            }
        }
    }
}

async fn cmd_stat(session: &mut Session, ctx: &AppContext, path: Option<String>) -> Result<(), ControlChanError> {
    if let Some(path) = path {
        return fsops::stat_path(session, ctx, &path).await;
    }
    let name = session.login.as_ref().map(|u| u.name.clone()).unwrap_or_else(|| "(not logged in)".to_string());
    let type_str = match session.binary_mode {
        TransferMode::Ascii => "ASCII",
        TransferMode::Binary => "Binary",
    };
    let prot_str = if session.data_protected { "Protected" } else { "Clear" };

    session.push_reply(ReplyCode::SystemStatus, "Status:");
    session.push_reply(ReplyCode::SystemStatus, format!(" Logged in as {name}"));
    session.push_reply(ReplyCode::SystemStatus, format!(" TYPE: {type_str}, Data protection: {prot_str}"));
    if let Some(dc) = &session.data_conn {
        session.push_reply(
            ReplyCode::SystemStatus,
            format!(" Data connection: {} ({} read, {} written)", dc.kind_str(), dc.bytes_read(), dc.bytes_written()),
        );
    } else {
        session.push_reply(ReplyCode::SystemStatus, " No data connection");
    }
    session.push_reply(ReplyCode::SystemStatus, "End of status");
    Ok(())
}

/// The one place a [`VfsError`]'s kind turns into a reply. Exhaustive so a
/// new variant fails to compile here until given a mapping, per §7.
pub(crate) fn vfs_error_reply(e: &VfsError) -> (ReplyCode, &'static str) {
    use shadowftp_vfs::VfsErrorKind::*;
    match e.kind() {
        PermissionDenied => (ReplyCode::FileError, "Permission denied"),
        NotExist => (ReplyCode::FileError, "No such file or directory"),
        AlreadyExists => (ReplyCode::FileError, "Already exists"),
        WrongType => (ReplyCode::FileError, "Wrong file type for this operation"),
        NotEmpty => (ReplyCode::FileError, "Directory not empty"),
        SamePath => (ReplyCode::BadFileName, "Source and destination are the same"),
        EmptyUpload => (ReplyCode::BadFileName, "Empty upload rejected"),
        Conflict => (ReplyCode::LocalError, "Conflict, please retry"),
        Io => (ReplyCode::LocalError, "Local I/O error"),
    }
}

//! FTP command parsing: one CRLF-terminated line in, one [`Command`] out.

use crate::error::{ControlChanError, ControlChanErrorKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    User { name: String },
    Pass { password: String },
    Auth { protocol: String },
    Pbsz { size: String },
    Prot { param: String },
    Pasv,
    Port { addr: String },
    Rest { offset: u64 },
    Rnfr { path: String },
    Rnto { path: String },
    Retr { path: String },
    Stor { path: String },
    Appe { path: String },
    List { path: Option<String> },
    Nlst { path: Option<String> },
    Dele { path: String },
    Rmd { path: String },
    Mkd { path: String },
    Cwd { path: String },
    Cdup,
    Pwd,
    Syst,
    Type { param: String },
    Mode { param: String },
    Stru { param: String },
    Noop,
    Stat { path: Option<String> },
    Abor,
    Quit,
    Feat,
    Size { path: String },
    Mdtm { path: String },
    Help { verb: Option<String> },
    /// A syntactically well-formed, but unrecognized, verb.
    Other { verb: String },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Command {
    /// True for the verbs that drive bytes across a data connection, and so
    /// need to run racing a concurrently-read `ABOR` rather than blocking
    /// the control loop until the transfer finishes on its own.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Command::Retr { .. } | Command::Stor { .. } | Command::Appe { .. } | Command::List { .. } | Command::Nlst { .. })
    }

    /// The uppercase verb this command was parsed from, for bookkeeping
    /// (`RNTO`'s "last command was RNFR" gate, `STAT`'s echo, logging).
    pub fn verb_name(&self) -> &'static str {
        match self {
            Command::User { .. } => "USER",
            Command::Pass { .. } => "PASS",
            Command::Auth { .. } => "AUTH",
            Command::Pbsz { .. } => "PBSZ",
            Command::Prot { .. } => "PROT",
            Command::Pasv => "PASV",
            Command::Port { .. } => "PORT",
            Command::Rest { .. } => "REST",
            Command::Rnfr { .. } => "RNFR",
            Command::Rnto { .. } => "RNTO",
            Command::Retr { .. } => "RETR",
            Command::Stor { .. } => "STOR",
            Command::Appe { .. } => "APPE",
            Command::List { .. } => "LIST",
            Command::Nlst { .. } => "NLST",
            Command::Dele { .. } => "DELE",
            Command::Rmd { .. } => "RMD",
            Command::Mkd { .. } => "MKD",
            Command::Cwd { .. } => "CWD",
            Command::Cdup => "CDUP",
            Command::Pwd => "PWD",
            Command::Syst => "SYST",
            Command::Type { .. } => "TYPE",
            Command::Mode { .. } => "MODE",
            Command::Stru { .. } => "STRU",
            Command::Noop => "NOOP",
            Command::Stat { .. } => "STAT",
            Command::Abor => "ABOR",
            Command::Quit => "QUIT",
            Command::Feat => "FEAT",
            Command::Size { .. } => "SIZE",
            Command::Mdtm { .. } => "MDTM",
            Command::Help { .. } => "HELP",
            Command::Other { .. } => "OTHER",
        }
    }
}

/// Parses one command line (without the trailing CRLF) into a [`Command`].
///
/// The verb is matched case-insensitively; everything after the first run of
/// whitespace is taken as the (untouched) argument string, since FTP paths
/// may themselves contain spaces.
pub fn parse(line: &str) -> Result<Command, ControlChanError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(ControlChanErrorKind::InvalidParameter.into());
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((v, r)) => (v, r.trim_start()),
        None => (line, ""),
    };
    let verb_upper = verb.to_ascii_uppercase();
    let arg = rest.to_string();
    let require_arg = |s: String| -> Result<String, ControlChanError> {
        if s.is_empty() {
            Err(ControlChanErrorKind::InvalidParameter.into())
        } else {
            Ok(s)
        }
    };
    let opt_arg = |s: String| -> Option<String> { if s.is_empty() { None } else { Some(s) } };

    Ok(match verb_upper.as_str() {
        "USER" => Command::User { name: require_arg(arg)? },
        "PASS" => Command::Pass { password: arg },
        "AUTH" => Command::Auth {
            protocol: arg.to_ascii_uppercase(),
        },
        "PBSZ" => Command::Pbsz { size: require_arg(arg)? },
        "PROT" => Command::Prot {
            param: arg.to_ascii_uppercase(),
        },
        "PASV" => Command::Pasv,
        "PORT" => Command::Port { addr: require_arg(arg)? },
        "REST" => {
            let offset = arg.parse::<u64>().map_err(|_| ControlChanError::from(ControlChanErrorKind::InvalidParameter))?;
            Command::Rest { offset }
        }
        "RNFR" => Command::Rnfr { path: require_arg(arg)? },
        "RNTO" => Command::Rnto { path: require_arg(arg)? },
        "RETR" => Command::Retr { path: require_arg(arg)? },
        "STOR" => Command::Stor { path: require_arg(arg)? },
        "APPE" => Command::Appe { path: require_arg(arg)? },
        "LIST" => Command::List { path: opt_arg(arg) },
        "NLST" => Command::Nlst { path: opt_arg(arg) },
        "DELE" => Command::Dele { path: require_arg(arg)? },
        "RMD" | "XRMD" => Command::Rmd { path: require_arg(arg)? },
        "MKD" | "XMKD" => Command::Mkd { path: require_arg(arg)? },
        "CWD" | "XCWD" => Command::Cwd { path: require_arg(arg)? },
        "CDUP" | "XCUP" => Command::Cdup,
        "PWD" | "XPWD" => Command::Pwd,
        "SYST" => Command::Syst,
        "TYPE" => Command::Type {
            param: arg.to_ascii_uppercase(),
        },
        "MODE" => Command::Mode {
            param: arg.to_ascii_uppercase(),
        },
        "STRU" => Command::Stru {
            param: arg.to_ascii_uppercase(),
        },
        "NOOP" => Command::Noop,
        "STAT" => Command::Stat { path: opt_arg(arg) },
        "ABOR" => Command::Abor,
        "QUIT" => Command::Quit,
        "FEAT" => Command::Feat,
        "SIZE" => Command::Size { path: require_arg(arg)? },
        "MDTM" => Command::Mdtm { path: require_arg(arg)? },
        "HELP" => Command::Help { verb: opt_arg(arg) },
        other => Command::Other { verb: other.to_string() },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_and_pass() {
        assert_eq!(parse("USER alice").unwrap(), Command::User { name: "alice".to_string() });
        assert_eq!(parse("pass hunter2").unwrap(), Command::Pass { password: "hunter2".to_string() });
    }

    #[test]
    fn path_with_spaces_preserved_verbatim() {
        assert_eq!(
            parse("RETR my file.txt").unwrap(),
            Command::Retr {
                path: "my file.txt".to_string()
            }
        );
    }

    #[test]
    fn empty_line_is_an_error() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
    }

    #[test]
    fn unknown_verb_is_other() {
        assert_eq!(parse("XYZZY foo").unwrap(), Command::Other { verb: "XYZZY".to_string() });
    }

    #[test]
    fn rest_requires_numeric_offset() {
        assert!(parse("REST abc").is_err());
        assert_eq!(parse("REST 42").unwrap(), Command::Rest { offset: 42 });
    }

    #[test]
    fn argless_commands_need_no_argument() {
        assert_eq!(parse("PWD").unwrap(), Command::Pwd);
        assert_eq!(parse("NOOP").unwrap(), Command::Noop);
    }
}

//! Replies to the FTP client and the reply codes defined by RFC 959, RFC 2228
//! and RFC 959's de facto extensions (RFC 3659's `SIZE`/`MDTM`).

/// A reply to be flushed to the control connection. Commands build one of
/// these and hand it back to the session loop; they never write the wire
/// directly.
#[derive(Debug, Clone)]
pub enum Reply {
    /// No reply is sent for this event (used for internal bookkeeping).
    None,
    /// A single-line reply.
    CodeAndMsg { code: ReplyCode, msg: String },
    /// A multi-line reply; rendered as `<code>-first`, ` middle`s, `<code> End.`.
    MultiLine { code: ReplyCode, lines: Vec<String> },
}

impl Reply {
    pub fn new(code: ReplyCode, message: &str) -> Self {
        Reply::CodeAndMsg {
            code,
            msg: message.to_string(),
        }
    }

    pub fn new_with_string(code: ReplyCode, msg: String) -> Self {
        Reply::CodeAndMsg { code, msg }
    }

    pub fn new_multiline<I>(code: ReplyCode, lines: I) -> Self
    where
        I: IntoIterator,
        I::Item: std::fmt::Display,
    {
        Reply::MultiLine {
            code,
            lines: lines.into_iter().map(|item| format!("{item}")).collect(),
        }
    }

    pub fn none() -> Self {
        Reply::None
    }

    /// Renders the reply as the exact bytes to write to the wire, or `None`
    /// if nothing should be sent.
    pub fn render(&self) -> Option<String> {
        match self {
            Reply::None => None,
            Reply::CodeAndMsg { code, msg } => Some(format!("{} {}\r\n", *code as u32, msg)),
            Reply::MultiLine { code, lines } => {
                let n = *code as u32;
                if lines.is_empty() {
                    return Some(format!("{n} \r\n"));
                }
                if lines.len() == 1 {
                    return Some(format!("{n} {}\r\n", lines[0]));
                }
                let mut out = String::new();
                out.push_str(&format!("{n}-{}\r\n", lines[0]));
                for line in &lines[1..] {
                    out.push_str(&format!(" {line}\r\n"));
                }
                out.push_str(&format!("{n} End.\r\n"));
                Some(out)
            }
        }
    }
}

/// Reply codes. RFC 959 prohibits codes other than the ones it enumerates;
/// RFC 2228/3659/2428 add a handful more that are now ubiquitous in the wild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
#[allow(dead_code)]
pub enum ReplyCode {
    RestartMarker = 110,
    DataConnectionAlreadyOpen = 125,
    FileStatusOkay = 150,

    CommandOkay = 200,
    CommandOkayNotImplemented = 202,
    SystemStatus = 211,
    DirectoryStatus = 212,
    FileStatus = 213,
    HelpMessage = 214,
    SystemType = 215,
    ServiceReady = 220,
    ClosingControlConnection = 221,
    DataConnectionOpen = 225,
    ClosingDataConnection = 226,
    EnteringPassiveMode = 227,
    EnteringLongPassiveMode = 228,
    EnteringExtendedPassiveMode = 229,
    UserLoggedIn = 230,
    LoggedOut = 231,
    LogoutAck = 232,
    AuthOkayNoDataNeeded = 234,
    FileActionOkay = 250,
    DirCreated = 257,

    NeedPassword = 331,
    NeedAccount = 332,
    FileActionPending = 350,

    ServiceNotAvailable = 421,
    CantOpenDataConnection = 425,
    ConnectionClosed = 426,
    NoTlsAvailable = 431,
    TransientFileError = 450,
    LocalError = 451,
    OutOfSpace = 452,

    CommandSyntaxError = 500,
    ParameterSyntaxError = 501,
    CommandNotImplemented = 502,
    BadCommandSequence = 503,
    CommandNotImplementedForParameter = 504,
    NotLoggedIn = 530,
    NeedAccountToStore = 532,
    FtpsRequired = 534,
    FileError = 550,
    PageTypeUnknown = 551,
    ExceededStorageAllocation = 552,
    BadFileName = 553,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_reply_is_space_separated() {
        let r = Reply::new(ReplyCode::CommandOkay, "NOOP ok");
        assert_eq!(r.render().unwrap(), "200 NOOP ok\r\n");
    }

    #[test]
    fn multiline_reply_ends_with_end_dot() {
        let r = Reply::new_multiline(ReplyCode::SystemStatus, ["a", "b", "c"]);
        let rendered = r.render().unwrap();
        assert_eq!(rendered, "211-a\r\n b\r\n c\r\n211 End.\r\n");
    }

    #[test]
    fn none_renders_nothing() {
        assert!(Reply::none().render().is_none());
    }
}

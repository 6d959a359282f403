//! The session/control-channel error type. Mirrors the shape used throughout
//! the lower crates: a `kind` plus an optional boxed source, with per-variant
//! display text.

use derive_more::Display;
use std::fmt;

/// An error raised while parsing or executing something on the control
/// channel. Carries a stable [`ControlChanErrorKind`] for reply-code mapping.
#[derive(Debug)]
pub struct ControlChanError {
    kind: ControlChanErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ControlChanError {
    pub fn new(kind: ControlChanErrorKind) -> Self {
        ControlChanError { kind, source: None }
    }

    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(kind: ControlChanErrorKind, source: E) -> Self {
        ControlChanError {
            kind,
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ControlChanErrorKind {
        self.kind
    }

    /// True when this error is unrecoverable for the session (the control
    /// connection itself is in an unusable state) rather than merely
    /// reportable as a reply and continuing.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ControlChanErrorKind::Io | ControlChanErrorKind::TlsHandshakeFailed | ControlChanErrorKind::ControlChannelTimeout
        )
    }
}

impl fmt::Display for ControlChanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for ControlChanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<ControlChanErrorKind> for ControlChanError {
    fn from(kind: ControlChanErrorKind) -> Self {
        ControlChanError::new(kind)
    }
}

impl From<std::io::Error> for ControlChanError {
    fn from(e: std::io::Error) -> Self {
        ControlChanError::with_source(ControlChanErrorKind::Io, e)
    }
}

/// Stable, programmatic error kinds for the control channel.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
#[non_exhaustive]
pub enum ControlChanErrorKind {
    /// The command line was not valid UTF-8.
    #[display("invalid utf-8 in command line")]
    Utf8Error,
    /// The verb is not recognized.
    #[display("unknown command")]
    UnknownCommand,
    /// The verb is recognized but its arguments are malformed.
    #[display("invalid parameter")]
    InvalidParameter,
    /// The command is not valid in the session's current state.
    #[display("bad command sequence")]
    BadSequence,
    /// The underlying transport failed.
    #[display("i/o error")]
    Io,
    /// The TLS handshake for `AUTH TLS` failed.
    #[display("tls handshake failed")]
    TlsHandshakeFailed,
    /// No activity on the control channel for too long.
    #[display("control channel timed out")]
    ControlChannelTimeout,
    /// A data connection could not be opened (accept/dial failure or timeout).
    #[display("could not open data connection")]
    DataConnectionFailed,
}

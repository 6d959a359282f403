//! Typed errors for credential-store operations, in the same
//! `kind` + boxed-source shape used across the whole workspace.

use derive_more::Display;
use thiserror::Error;

/// Error returned by a [`crate::CredentialStore`] implementation.
#[derive(Debug, Error)]
#[error("credential store error: {kind}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Builds an error from a kind and an underlying cause.
    pub fn new<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error {
            kind,
            source: Some(source.into()),
        }
    }

    /// The stable, programmatic error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { kind, source: None }
    }
}

/// Stable error kinds a caller can match on without parsing messages.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum ErrorKind {
    /// No user or group exists under that name.
    #[display("not found")]
    NotFound,
    /// The name already exists and cannot be created again.
    #[display("already exists")]
    AlreadyExists,
    /// A group has no free membership slots and the member being added is not already present.
    #[display("group is full")]
    GroupFull,
    /// Optimistic read-modify-write update lost the race more than the retry bound allows.
    #[display("conflict, exceeded retry bound")]
    Conflict,
    /// The user's `deleted_at` is set; it must not authenticate or be otherwise usable.
    #[display("user is deleted")]
    Deleted,
    /// Underlying storage engine failure (disk, encoding).
    #[display("storage I/O error")]
    Io,
}

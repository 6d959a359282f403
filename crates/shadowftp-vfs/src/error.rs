//! Typed errors for the ACL/permission/shadow/VFS stack, following the same
//! `kind` + boxed-source shape the reference storage backend uses so the
//! session engine can map a kind to a reply code with one exhaustive match.

use derive_more::Display;
use thiserror::Error;

/// An error produced anywhere in the ACL, shadow-store or VFS stack.
#[derive(Debug, Error)]
#[error("vfs error: {kind}")]
pub struct VfsError {
    kind: VfsErrorKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl VfsError {
    /// Builds an error from a kind and an underlying cause.
    pub fn new<E>(kind: VfsErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        VfsError {
            kind,
            source: Some(source.into()),
        }
    }

    /// The stable, programmatic error kind.
    pub fn kind(&self) -> VfsErrorKind {
        self.kind
    }
}

impl From<VfsErrorKind> for VfsError {
    fn from(kind: VfsErrorKind) -> Self {
        VfsError { kind, source: None }
    }
}

impl From<std::io::Error> for VfsError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => VfsErrorKind::NotExist,
            std::io::ErrorKind::PermissionDenied => VfsErrorKind::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => VfsErrorKind::AlreadyExists,
            _ => VfsErrorKind::Io,
        };
        VfsError::new(kind, e)
    }
}

/// Stable error kinds. Every variant must be handled by the command layer's
/// kind-to-reply-code mapping; adding one without updating that match is a
/// compile error there, not a silent 550.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum VfsErrorKind {
    /// ACL resolution denied the operation. Uniform across scopes so a
    /// client cannot use the error shape to probe what would have been allowed.
    #[display("permission denied")]
    PermissionDenied,
    /// The path does not exist, *or* it is hidden by a private/hide gate —
    /// these two cases are indistinguishable to the caller by design.
    #[display("no such file or directory")]
    NotExist,
    /// The path already exists where creation was attempted.
    #[display("already exists")]
    AlreadyExists,
    /// A directory operation was attempted on a file, or vice versa.
    #[display("wrong file type")]
    WrongType,
    /// A directory is not empty and cannot be removed.
    #[display("directory not empty")]
    NotEmpty,
    /// Old and new path were identical in a rename.
    #[display("source and destination are the same")]
    SamePath,
    /// Upload finished with zero bytes; the source declines these.
    #[display("empty upload rejected")]
    EmptyUpload,
    /// The shadow store's optimistic retry bound was exceeded.
    #[display("conflict, exceeded retry bound")]
    Conflict,
    /// Underlying host-fs or shadow-store I/O error.
    #[display("I/O error")]
    Io,
}

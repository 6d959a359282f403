//! Core data model and credential-store contract shared by the server engine,
//! the virtual filesystem and ACL resolver, and the concrete `sled`-backed
//! credential store.
//!
//! Nothing in this crate touches the network or the host filesystem; it only
//! describes *what a user/group is* and *how the engine is allowed to ask for
//! one*, so that `shadowftp-vfs` and `shadowftp-auth` can depend on a shared,
//! storage-agnostic vocabulary.

pub mod error;
pub mod model;
pub mod store;

pub use error::{Error, ErrorKind};
pub use model::{Group, GroupMembership, IpMask, User};
pub use store::CredentialStore;

/// The lowercase name reserved for the privileged internal caller that
/// bypasses every ACL check. Never persisted; never accepted from `USER`.
pub const SUPER_USER: &str = "super_user";

/// Returns true if `name` (already lowercased) is the sentinel super-user.
pub fn is_super_user(name: &str) -> bool {
    name == SUPER_USER
}

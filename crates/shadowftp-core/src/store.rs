//! The interface the session engine and CLI use to manage users and groups.
//! Mirrors the shape of the reference crate's `Authenticator<U>` trait:
//! a small async surface, implementation-agnostic, with one concrete
//! implementation (`shadowftp-auth`) living in its own crate.

use crate::{Error, Group, User};
use async_trait::async_trait;

/// Credential and IP-authorization store consumed by the session engine.
///
/// Implementations must serialize concurrent `update_user`/`update_group`
/// calls for the same key with an optimistic read-modify-write retried up
/// to a bounded number of times (see the spec's conflict policy); callers
/// never need to retry themselves.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Creates a new user record. Errors with `AlreadyExists` if present.
    async fn add_user(&self, user: User) -> Result<(), Error>;

    /// Creates a new group record. Errors with `AlreadyExists` if present.
    async fn add_group(&self, group: Group) -> Result<(), Error>;

    /// Fetches a user by (already-lowercased) name.
    async fn get_user(&self, name: &str) -> Result<User, Error>;

    /// Fetches a group by (already-lowercased) name.
    async fn get_group(&self, name: &str) -> Result<Group, Error>;

    /// Applies `f` to the current record and persists the result, retrying
    /// on write conflicts up to the store's bound before surfacing `Conflict`.
    async fn update_user(&self, name: &str, f: Box<dyn FnOnce(&mut User) + Send>) -> Result<User, Error>;

    /// As [`CredentialStore::update_user`], for groups.
    async fn update_group(&self, name: &str, f: Box<dyn FnOnce(&mut Group) + Send>) -> Result<Group, Error>;

    /// Soft-deletes a user by stamping `deleted_at`; the record is retained.
    async fn delete_user(&self, name: &str) -> Result<(), Error>;

    /// Verifies `pass` against the user's stored adaptive hash. Returns
    /// `Ok(false)` (never an nonexistent-user-specific error) when the user
    /// does not exist, so callers can't distinguish "no such user" from
    /// "wrong password" by error shape alone.
    async fn check_password(&self, name: &str, pass: &str) -> Result<bool, Error>;

    /// Checks the user's IP-mask list against `remote_host`, performing an
    /// RFC 1413 Ident lookup against `remote_host`'s port 113 (querying
    /// about the `local_port`/`remote_port` pair of the control connection)
    /// when a mask's ident part is not `*`. An Ident-lookup failure counts
    /// as "mask did not match", not as an error.
    async fn check_ip(&self, name: &str, remote_host: std::net::IpAddr, local_port: u16, remote_port: u16) -> Result<bool, Error>;
}

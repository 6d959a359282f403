//! Concrete credential store: `sled` + MessagePack for persistence, argon2id
//! for password hashing, and an RFC 1413 Ident client for IP-mask checks
//! whose ident half isn't the wildcard.

mod ident;
mod store;

pub use store::{hash_password, SledCredentialStore};

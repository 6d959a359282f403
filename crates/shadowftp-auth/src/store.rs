//! The concrete, `sled`-backed [`shadowftp_core::CredentialStore`].

use crate::ident;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use shadowftp_core::{CredentialStore, Error, ErrorKind, Group, User};
use std::net::IpAddr;

const MAX_RETRIES: usize = 10;

fn user_key(name: &str) -> Vec<u8> {
    format!("users:{}", name.to_lowercase()).into_bytes()
}

fn group_key(name: &str) -> Vec<u8> {
    format!("groups:{}", name.to_lowercase()).into_bytes()
}

/// Hashes `password` with argon2id, returning the full PHC string (salt and
/// parameters embedded, so parameters can change without a migration).
pub fn hash_password(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::new(ErrorKind::Io, std::io::Error::other(e.to_string())))
}

fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

/// A `sled`-backed credential store sharing its `Db` with the shadow store
/// (see `shadowftp-vfs::ShadowStore`), under a dedicated tree.
pub struct SledCredentialStore {
    tree: sled::Tree,
}

impl SledCredentialStore {
    /// Opens (or creates) the credentials tree inside an existing `sled::Db`.
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        let tree = db.open_tree("credentials").map_err(|e| Error::new(ErrorKind::Io, e))?;
        Ok(SledCredentialStore { tree })
    }

    fn get_user_raw(&self, name: &str) -> Result<Option<User>, Error> {
        match self.tree.get(user_key(name)).map_err(|e| Error::new(ErrorKind::Io, e))? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes).map_err(|e| Error::new(ErrorKind::Io, e))?)),
            None => Ok(None),
        }
    }

    fn put_user(&self, user: &User) -> Result<(), Error> {
        let bytes = rmp_serde::to_vec(user).map_err(|e| Error::new(ErrorKind::Io, e))?;
        self.tree.insert(user_key(&user.name), bytes).map_err(|e| Error::new(ErrorKind::Io, e))?;
        Ok(())
    }

    fn get_group_raw(&self, name: &str) -> Result<Option<Group>, Error> {
        match self.tree.get(group_key(name)).map_err(|e| Error::new(ErrorKind::Io, e))? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes).map_err(|e| Error::new(ErrorKind::Io, e))?)),
            None => Ok(None),
        }
    }

    fn put_group(&self, group: &Group) -> Result<(), Error> {
        let bytes = rmp_serde::to_vec(group).map_err(|e| Error::new(ErrorKind::Io, e))?;
        self.tree.insert(group_key(&group.name), bytes).map_err(|e| Error::new(ErrorKind::Io, e))?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SledCredentialStore {
    async fn add_user(&self, user: User) -> Result<(), Error> {
        if self.get_user_raw(&user.name)?.is_some() {
            return Err(ErrorKind::AlreadyExists.into());
        }
        self.put_user(&user)
    }

    async fn add_group(&self, group: Group) -> Result<(), Error> {
        if self.get_group_raw(&group.name)?.is_some() {
            return Err(ErrorKind::AlreadyExists.into());
        }
        self.put_group(&group)
    }

    async fn get_user(&self, name: &str) -> Result<User, Error> {
        self.get_user_raw(name)?.ok_or_else(|| ErrorKind::NotFound.into())
    }

    async fn get_group(&self, name: &str) -> Result<Group, Error> {
        self.get_group_raw(name)?.ok_or_else(|| ErrorKind::NotFound.into())
    }

    async fn update_user(&self, name: &str, f: Box<dyn FnOnce(&mut User) + Send>) -> Result<User, Error> {
        let key = user_key(name);
        for _ in 0..MAX_RETRIES {
            let old_bytes = self.tree.get(&key).map_err(|e| Error::new(ErrorKind::Io, e))?;
            let mut user: User = match &old_bytes {
                Some(bytes) => rmp_serde::from_slice(bytes).map_err(|e| Error::new(ErrorKind::Io, e))?,
                None => return Err(ErrorKind::NotFound.into()),
            };
            f(&mut user);
            user.updated_at = chrono::Utc::now();
            let new_bytes = rmp_serde::to_vec(&user).map_err(|e| Error::new(ErrorKind::Io, e))?;
            match self.tree.compare_and_swap(&key, old_bytes, Some(new_bytes)) {
                Ok(Ok(())) => return Ok(user),
                Ok(Err(_)) => continue,
                Err(e) => return Err(Error::new(ErrorKind::Io, e)),
            }
        }
        Err(ErrorKind::Conflict.into())
    }

    async fn update_group(&self, name: &str, f: Box<dyn FnOnce(&mut Group) + Send>) -> Result<Group, Error> {
        let key = group_key(name);
        for _ in 0..MAX_RETRIES {
            let old_bytes = self.tree.get(&key).map_err(|e| Error::new(ErrorKind::Io, e))?;
            let mut group: Group = match &old_bytes {
                Some(bytes) => rmp_serde::from_slice(bytes).map_err(|e| Error::new(ErrorKind::Io, e))?,
                None => return Err(ErrorKind::NotFound.into()),
            };
            f(&mut group);
            group.updated_at = chrono::Utc::now();
            let new_bytes = rmp_serde::to_vec(&group).map_err(|e| Error::new(ErrorKind::Io, e))?;
            match self.tree.compare_and_swap(&key, old_bytes, Some(new_bytes)) {
                Ok(Ok(())) => return Ok(group),
                Ok(Err(_)) => continue,
                Err(e) => return Err(Error::new(ErrorKind::Io, e)),
            }
        }
        Err(ErrorKind::Conflict.into())
    }

    async fn delete_user(&self, name: &str) -> Result<(), Error> {
        let mut user = self.get_user_raw(name)?.ok_or(ErrorKind::NotFound)?;
        user.deleted_at = Some(chrono::Utc::now());
        self.put_user(&user)
    }

    async fn check_password(&self, name: &str, pass: &str) -> Result<bool, Error> {
        match self.get_user_raw(name)? {
            Some(user) if user.is_active() => Ok(verify_password(pass, &user.password_hash)),
            _ => Ok(false),
        }
    }

    async fn check_ip(&self, name: &str, remote_host: IpAddr, local_port: u16, remote_port: u16) -> Result<bool, Error> {
        let user = match self.get_user_raw(name)? {
            Some(u) => u,
            None => return Ok(false),
        };
        for mask in &user.ip_masks {
            let parsed = match shadowftp_vfs::ipmask::parse(&mask.0) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if !shadowftp_vfs::ipmask::host_matches(&parsed, &remote_host.to_string()) {
                continue;
            }
            if !shadowftp_vfs::ipmask::needs_ident_lookup(&parsed) {
                return Ok(true);
            }
            if let Some(identity) = ident::lookup(remote_host, local_port, remote_port).await {
                if shadowftp_vfs::ipmask::ident_matches(&parsed, &identity) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadowftp_core::User;

    fn store() -> (SledCredentialStore, sled::Db) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = SledCredentialStore::open(&db).unwrap();
        (store, db)
    }

    #[tokio::test]
    async fn add_and_check_password() {
        let (store, _db) = store();
        let hash = hash_password("hunter2").unwrap();
        store.add_user(User::new("alice", hash)).await.unwrap();
        assert!(store.check_password("alice", "hunter2").await.unwrap());
        assert!(!store.check_password("alice", "wrong").await.unwrap());
    }

    #[tokio::test]
    async fn deleted_user_never_authenticates() {
        let (store, _db) = store();
        let hash = hash_password("hunter2").unwrap();
        store.add_user(User::new("alice", hash)).await.unwrap();
        store.delete_user("alice").await.unwrap();
        assert!(!store.check_password("alice", "hunter2").await.unwrap());
    }

    #[tokio::test]
    async fn update_user_persists() {
        let (store, _db) = store();
        store.add_user(User::new("alice", "h")).await.unwrap();
        store
            .update_user("alice", Box::new(|u| u.credits_kib = 500))
            .await
            .unwrap();
        let user = store.get_user("alice").await.unwrap();
        assert_eq!(user.credits_kib, 500);
    }

    #[tokio::test]
    async fn concurrent_updates_both_land() {
        use std::sync::Arc;

        let (store, _db) = store();
        store.add_user(User::new("alice", "h")).await.unwrap();
        let store = Arc::new(store);

        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store.update_user("alice", Box::new(|u| u.credits_kib += 100)).await.unwrap();
            })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store.update_user("alice", Box::new(|u| u.login_count += 1)).await.unwrap();
            })
        };
        a.await.unwrap();
        b.await.unwrap();

        let user = store.get_user("alice").await.unwrap();
        assert_eq!(user.credits_kib, 100);
        assert_eq!(user.login_count, 1);
    }

    #[tokio::test]
    async fn wildcard_ident_mask_matches_without_lookup() {
        let (store, _db) = store();
        let mut user = User::new("alice", "h");
        user.ip_masks.push(shadowftp_core::IpMask("*@127.0.0.*".to_string()));
        store.add_user(user).await.unwrap();
        let ok = store.check_ip("alice", "127.0.0.5".parse().unwrap(), 21, 4000).await.unwrap();
        assert!(ok);
    }
}

//! The shadow metadata store: a persistent `path -> {owner, group, crc32,
//! is_dir, created_at, updated_at}` map kept in lockstep with the host
//! filesystem, backed by an embedded ordered KV engine (`sled`) with
//! self-describing MessagePack values (`rmp-serde`).

use crate::error::{VfsError, VfsErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_RETRIES: usize = 10;

/// One shadow-store record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// True if the path is a directory.
    pub is_dir: bool,
    /// Owning user name.
    pub owner: String,
    /// Owning group name.
    pub group: String,
    /// IEEE CRC-32 of the file's full contents; meaningless for directories.
    pub crc32: u32,
    /// When this path was first created.
    pub created_at: DateTime<Utc>,
    /// When this entry was last written.
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    /// A fresh entry stamped `created_at == updated_at == now`.
    pub fn new(is_dir: bool, owner: impl Into<String>, group: impl Into<String>, crc32: u32) -> Self {
        let now = Utc::now();
        Entry {
            is_dir,
            owner: owner.into(),
            group: group.into(),
            crc32,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The shadow store itself: one `sled::Tree` keyed by lowercased path.
pub struct ShadowStore {
    tree: sled::Tree,
}

fn key_of(path: &str) -> Vec<u8> {
    path.to_lowercase().into_bytes()
}

impl ShadowStore {
    /// Opens (or creates) the shadow tree inside an existing `sled::Db`. The
    /// same `Db` is shared with the credential store under a different tree.
    pub fn open(db: &sled::Db) -> Result<Self, VfsError> {
        let tree = db.open_tree("shadow").map_err(|e| VfsError::new(VfsErrorKind::Io, e))?;
        Ok(ShadowStore { tree })
    }

    /// Overwrites the entry at `path`, stamping `updated_at` to now.
    pub fn set(&self, path: &str, mut entry: Entry) -> Result<(), VfsError> {
        entry.updated_at = Utc::now();
        let bytes = rmp_serde::to_vec(&entry).map_err(|e| VfsError::new(VfsErrorKind::Io, e))?;
        self.tree.insert(key_of(path), bytes).map_err(|e| VfsError::new(VfsErrorKind::Io, e))?;
        Ok(())
    }

    /// Fetches the entry at `path`, if any.
    pub fn get(&self, path: &str) -> Result<Option<Entry>, VfsError> {
        match self.tree.get(key_of(path)).map_err(|e| VfsError::new(VfsErrorKind::Io, e))? {
            Some(bytes) => {
                let entry = rmp_serde::from_slice(&bytes).map_err(|e| VfsError::new(VfsErrorKind::Io, e))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Removes the entry at `path`, if present.
    pub fn remove(&self, path: &str) -> Result<(), VfsError> {
        self.tree.remove(key_of(path)).map_err(|e| VfsError::new(VfsErrorKind::Io, e))?;
        Ok(())
    }

    /// Atomically moves the entry at `old` to `new`, preserving `created_at`
    /// and `crc32` but updating owner/group to `caller`. Used by the VFS's
    /// rename operation so the shadow move and the host-fs rename are never
    /// observed half-done from the shadow side.
    pub fn rename(&self, old: &str, new: &str, owner: &str, group: &str) -> Result<(), VfsError> {
        let old_key = key_of(old);
        let new_key = key_of(new);
        let mut attempts = 0;
        loop {
            let existing = self
                .tree
                .get(&old_key)
                .map_err(|e| VfsError::new(VfsErrorKind::Io, e))?
                .ok_or(VfsErrorKind::NotExist)?;
            let mut entry: Entry = rmp_serde::from_slice(&existing).map_err(|e| VfsError::new(VfsErrorKind::Io, e))?;
            entry.owner = owner.to_string();
            entry.group = group.to_string();
            entry.updated_at = Utc::now();
            let new_bytes = rmp_serde::to_vec(&entry).map_err(|e| VfsError::new(VfsErrorKind::Io, e))?;

            let result = self
                .tree
                .transaction(|tx| {
                    tx.remove(old_key.as_slice())?;
                    tx.insert(new_key.as_slice(), new_bytes.clone())?;
                    Ok(())
                })
                .map_err(|e: sled::transaction::TransactionError<std::convert::Infallible>| e);

            match result {
                Ok(()) => return Ok(()),
                Err(_) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    continue;
                }
                Err(_) => return Err(VfsErrorKind::Conflict.into()),
            }
        }
    }

    /// Flushes and releases the underlying tree's resources.
    pub fn close(&self) -> Result<(), VfsError> {
        self.tree.flush().map_err(|e| VfsError::new(VfsErrorKind::Io, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (ShadowStore, sled::Db) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = ShadowStore::open(&db).unwrap();
        (store, db)
    }

    #[test]
    fn set_get_remove_roundtrip() {
        let (store, _db) = store();
        let entry = Entry::new(false, "alice", "staff", 0xdeadbeef);
        store.set("/a/b.txt", entry.clone()).unwrap();
        let fetched = store.get("/a/b.txt").unwrap().unwrap();
        assert_eq!(fetched.owner, "alice");
        assert_eq!(fetched.crc32, 0xdeadbeef);
        store.remove("/a/b.txt").unwrap();
        assert!(store.get("/a/b.txt").unwrap().is_none());
    }

    #[test]
    fn keys_are_lowercased() {
        let (store, _db) = store();
        store.set("/A/B.TXT", Entry::new(false, "alice", "staff", 0)).unwrap();
        assert!(store.get("/a/b.txt").unwrap().is_some());
    }

    #[test]
    fn rename_preserves_crc_and_created_at() {
        let (store, _db) = store();
        let entry = Entry::new(false, "alice", "staff", 42);
        let created = entry.created_at;
        store.set("/old", entry).unwrap();
        store.rename("/old", "/new", "bob", "staff").unwrap();
        assert!(store.get("/old").unwrap().is_none());
        let moved = store.get("/new").unwrap().unwrap();
        assert_eq!(moved.crc32, 42);
        assert_eq!(moved.created_at, created);
        assert_eq!(moved.owner, "bob");
    }
}

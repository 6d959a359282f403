//! The virtual filesystem: host-fs operations gated by the permission
//! resolver, maintaining the shadow store in lockstep, honoring the hide
//! and private gates, and supporting resumable uploads with a rolling
//! CRC-32.

use crate::cap_fs;
use crate::error::{VfsError, VfsErrorKind};
use crate::listing::ListingEntry;
use crate::permissions::{Permissions, Scope};
use crate::pool::{BufferPool, HasherPool};
use crate::shadow::{Entry, ShadowStore};
use chrono::{DateTime, Utc};
use regex::RegexSet;
use shadowftp_core::User;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWrite};

fn owning_group(user: &User, default_group: &str) -> String {
    user.primary_group.clone().unwrap_or_else(|| default_group.to_string())
}

/// Everything the VFS needs that isn't the rule set itself.
pub struct VfsConfig {
    /// Root of the sandboxed host filesystem.
    pub root: PathBuf,
    /// Owner assigned to listing entries with no shadow record.
    pub default_user: String,
    /// Group assigned to listing entries with no shadow record.
    pub default_group: String,
    /// Alternatives combined into one `RegexSet`; a path matching any of
    /// them is reported as non-existent to every caller.
    pub hide_patterns: Vec<String>,
}

/// The sandboxed, ACL-gated, shadow-tracked virtual filesystem.
pub struct Filesystem {
    root_fd: Arc<cap_std::fs::Dir>,
    permissions: Arc<Permissions>,
    shadow: Arc<ShadowStore>,
    default_user: String,
    default_group: String,
    hide: Option<RegexSet>,
    buffers: BufferPool,
    hashers: HasherPool,
}

fn to_path_str(path: &Path) -> String {
    format!("/{}", path.to_string_lossy())
}

impl Filesystem {
    /// Opens the sandboxed root and builds a `Filesystem` over it.
    pub fn new(config: VfsConfig, permissions: Arc<Permissions>, shadow: Arc<ShadowStore>) -> std::io::Result<Self> {
        let aa = cap_std::ambient_authority();
        let root_fd = Arc::new(cap_std::fs::Dir::open_ambient_dir(&config.root, aa)?);
        let hide = if config.hide_patterns.is_empty() {
            None
        } else {
            Some(RegexSet::new(&config.hide_patterns).map_err(std::io::Error::other)?)
        };
        Ok(Filesystem {
            root_fd,
            permissions,
            shadow,
            default_user: config.default_user,
            default_group: config.default_group,
            hide,
            buffers: BufferPool::default(),
            hashers: HasherPool::default(),
        })
    }

    fn normalize(&self, path: &str) -> Result<PathBuf, VfsError> {
        cap_fs::normalize(Path::new(path)).map_err(VfsError::from)
    }

    fn is_hidden(&self, path_str: &str) -> bool {
        self.hide.as_ref().is_some_and(|set| set.is_match(path_str))
    }

    /// Runs the private+hide existence gates. `Err(NotExist)` means "treat
    /// this path as if it weren't there" — callers must never leak a
    /// permission-denied in its place.
    fn check_visible(&self, path_str: &str, caller: &User) -> Result<(), VfsError> {
        let (allow, matched) = self.permissions.matches_no_default(Scope::Private, path_str, caller);
        if matched && !allow {
            return Err(VfsErrorKind::NotExist.into());
        }
        if self.is_hidden(path_str) {
            return Err(VfsErrorKind::NotExist.into());
        }
        Ok(())
    }

    fn shadow_owner(&self, path_str: &str) -> Result<Option<String>, VfsError> {
        Ok(self.shadow.get(path_str)?.map(|e| e.owner))
    }

    /// Creates a directory.
    pub async fn mkd(&self, path: &str, caller: &User) -> Result<(), VfsError> {
        let rel = self.normalize(path)?;
        let path_str = to_path_str(&rel);
        self.check_visible(&path_str, caller)?;
        if !self.permissions.matches(Scope::MakeDir, &path_str, caller) {
            return Err(VfsErrorKind::PermissionDenied.into());
        }
        cap_fs::create_dir(self.root_fd.clone(), &rel).await?;
        self.shadow.set(&path_str, Entry::new(true, caller.name.clone(), owning_group(caller, &self.default_group), 0))?;
        Ok(())
    }

    /// Verifies a directory is both visible and listable, gating on the
    /// `download` scope (directories are browsed the same way files are read).
    pub async fn list(&self, path: &str, caller: &User) -> Result<Vec<ListingEntry>, VfsError> {
        let rel = self.normalize(path)?;
        let path_str = to_path_str(&rel);
        self.check_visible(&path_str, caller)?;
        if !self.permissions.matches(Scope::Download, &path_str, caller) {
            return Err(VfsErrorKind::PermissionDenied.into());
        }

        let children = cap_fs::read_dir(self.root_fd.clone(), &rel).await?;
        let mut out = Vec::with_capacity(children.len());
        for child in children {
            let name = child.file_name().to_string_lossy().into_owned();
            let child_rel = rel.join(&name);
            let child_path_str = to_path_str(&child_rel);

            if self.check_visible(&child_path_str, caller).is_err() {
                continue;
            }

            let meta = match child.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            let shadow_entry = self.shadow.get(&child_path_str)?;
            let (owner, group) = match &shadow_entry {
                Some(e) => (e.owner.clone(), e.group.clone()),
                None => (self.default_user.clone(), self.default_group.clone()),
            };
            let modified: DateTime<Utc> = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
            out.push(ListingEntry {
                name,
                is_dir: meta.is_dir(),
                owner,
                group,
                size: meta.len(),
                modified,
            });
        }
        crate::listing::sort_by_name(&mut out);
        Ok(out)
    }

    /// Returns a path's size and last-modified time, gated by the same
    /// `download` scope as a read (`SIZE`/`MDTM` are read-only probes of the
    /// same visibility the file's contents would have).
    pub async fn stat(&self, path: &str, caller: &User) -> Result<(u64, DateTime<Utc>), VfsError> {
        let rel = self.normalize(path)?;
        let path_str = to_path_str(&rel);
        self.check_visible(&path_str, caller)?;
        if !self.permissions.matches(Scope::Download, &path_str, caller) {
            return Err(VfsErrorKind::PermissionDenied.into());
        }
        let meta = cap_fs::symlink_metadata(self.root_fd.clone(), &rel).await?;
        let modified = match self.shadow.get(&path_str)? {
            Some(entry) => entry.updated_at,
            None => meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
        };
        Ok((meta.len(), modified))
    }

    /// Opens a file for reading, honoring a prior `REST` restart position.
    /// Returns the open file and its total size.
    pub async fn download(&self, path: &str, caller: &User, start_pos: u64) -> Result<(tokio::fs::File, u64), VfsError> {
        let rel = self.normalize(path)?;
        let path_str = to_path_str(&rel);
        self.check_visible(&path_str, caller)?;
        if !self.permissions.matches(Scope::Download, &path_str, caller) {
            return Err(VfsErrorKind::PermissionDenied.into());
        }
        let file = cap_fs::open(self.root_fd.clone(), &rel).await?;
        let mut file = tokio::fs::File::from_std(file.into_std());
        let len = file.metadata().await?.len();
        if start_pos > 0 {
            file.seek(std::io::SeekFrom::Start(start_pos)).await?;
        }
        Ok((file, len))
    }

    /// Writes `reader`'s bytes to `path`, truncating (fresh upload) or
    /// appending from the current end-of-file (`resume == true`), feeding a
    /// running CRC-32 seeded from any prior shadow CRC on resume. On a
    /// successful, non-empty close the shadow entry is written with the
    /// final CRC; a zero-length result deletes the file and reports
    /// [`VfsErrorKind::EmptyUpload`] instead. A write error leaves both the
    /// partial file and the shadow entry untouched.
    pub async fn upload<R>(&self, path: &str, caller: &User, resume: bool, mut reader: R) -> Result<u64, VfsError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let rel = self.normalize(path)?;
        let path_str = to_path_str(&rel);
        self.check_visible(&path_str, caller)?;
        if !self.permissions.matches(Scope::Upload, &path_str, caller) {
            return Err(VfsErrorKind::PermissionDenied.into());
        }

        let prior = self.shadow.get(&path_str)?;
        if resume {
            let owner = prior.as_ref().map(|e| e.owner.as_str());
            if !self.permissions.matches_own(Scope::Resume, Scope::ResumeOwn, &path_str, caller, owner) {
                return Err(VfsErrorKind::PermissionDenied.into());
            }
        }

        let mut options = cap_std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(!resume);
        let file = cap_fs::open_with(self.root_fd.clone(), &rel, options).await?;
        let mut file = tokio::fs::File::from_std(file.into_std());

        let start_pos = if resume { file.metadata().await?.len() } else { 0 };
        file.seek(std::io::SeekFrom::Start(start_pos)).await?;

        let initial_crc = if resume { prior.as_ref().map(|e| e.crc32).unwrap_or(0) } else { 0 };
        // The pool only amortizes the allocation of a fresh-state hasher;
        // resuming with a nonzero seed always needs `new_with_initial`
        // directly since an already-built Hasher can't be reseeded.
        let hasher = if initial_crc == 0 {
            self.hashers.take()
        } else {
            crc32fast::Hasher::new_with_initial(initial_crc)
        };
        let mut writer = ChecksummingWriter::new(file, hasher);

        let mut buf = self.buffers.take();
        let copy_result = copy_with_buffer(&mut reader, &mut writer, &mut buf).await;
        self.buffers.give_back(buf);

        let bytes_written = match copy_result {
            Ok(n) => n,
            Err(e) => return Err(e.into()),
        };

        let final_len = start_pos + bytes_written;
        let crc = writer.finalize();

        if final_len == 0 {
            let _ = cap_fs::remove_file(self.root_fd.clone(), &rel).await;
            return Err(VfsErrorKind::EmptyUpload.into());
        }

        let created_at = prior.as_ref().map(|e| e.created_at).unwrap_or_else(Utc::now);
        let mut entry = Entry::new(false, caller.name.clone(), owning_group(caller, &self.default_group), crc);
        entry.created_at = created_at;
        self.shadow.set(&path_str, entry)?;
        Ok(bytes_written)
    }

    /// Removes `path`, refusing a type mismatch (directory via file-delete
    /// or vice versa) and removing the shadow entry on success.
    pub async fn delete(&self, path: &str, caller: &User, expect_dir: bool) -> Result<(), VfsError> {
        let rel = self.normalize(path)?;
        let path_str = to_path_str(&rel);
        self.check_visible(&path_str, caller)?;

        let meta = cap_fs::symlink_metadata(self.root_fd.clone(), &rel).await?;
        if meta.is_dir() != expect_dir {
            return Err(VfsErrorKind::WrongType.into());
        }

        let owner = self.shadow_owner(&path_str)?;
        if !self.permissions.matches_own(Scope::Delete, Scope::DeleteOwn, &path_str, caller, owner.as_deref()) {
            return Err(VfsErrorKind::PermissionDenied.into());
        }

        if expect_dir {
            cap_fs::remove_dir(self.root_fd.clone(), &rel).await?;
        } else {
            cap_fs::remove_file(self.root_fd.clone(), &rel).await?;
        }
        self.shadow.remove(&path_str)?;
        Ok(())
    }

    /// Renames `old` to `new`: the new path is checked under the `upload`
    /// scope, the old path under `rename`/`renameown` with ownership
    /// fallback. On success the shadow entry moves with the old entry's
    /// CRC and `created_at` preserved.
    pub async fn rename(&self, old: &str, new: &str, caller: &User) -> Result<(), VfsError> {
        let old_rel = self.normalize(old)?;
        let new_rel = self.normalize(new)?;
        if old_rel == new_rel {
            return Err(VfsErrorKind::SamePath.into());
        }
        let old_str = to_path_str(&old_rel);
        let new_str = to_path_str(&new_rel);

        self.check_visible(&old_str, caller)?;
        if !self.permissions.matches(Scope::Upload, &new_str, caller) {
            return Err(VfsErrorKind::PermissionDenied.into());
        }
        let owner = self.shadow_owner(&old_str)?;
        if !self.permissions.matches_own(Scope::Rename, Scope::RenameOwn, &old_str, caller, owner.as_deref()) {
            return Err(VfsErrorKind::PermissionDenied.into());
        }

        cap_fs::rename(self.root_fd.clone(), &old_rel, &new_rel).await?;
        self.shadow.rename(&old_str, &new_str, &caller.name, &owning_group(caller, &self.default_group))?;
        Ok(())
    }
}

async fn copy_with_buffer<R, W>(reader: &mut R, writer: &mut W, buf: &mut [u8]) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut total = 0u64;
    loop {
        let n = reader.read(buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}

/// Wraps a file, feeding every written byte into a running CRC-32 so the
/// shadow store can be stamped with the integrity value on a clean close.
struct ChecksummingWriter {
    file: tokio::fs::File,
    hasher: crc32fast::Hasher,
}

impl ChecksummingWriter {
    fn new(file: tokio::fs::File, hasher: crc32fast::Hasher) -> Self {
        ChecksummingWriter { file, hasher }
    }

    fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl AsyncWrite for ChecksummingWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.file).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.hasher.update(&buf[..n]);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{Permissions, Rule};
    use std::io::Cursor;

    fn fixture() -> (Filesystem, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::Config::new().temporary(true).open().unwrap();
        let shadow = Arc::new(ShadowStore::open(&db).unwrap());
        let rules = vec![
            Rule::parse("upload /** *").unwrap(),
            Rule::parse("download /** *").unwrap(),
            Rule::parse("makedir /** *").unwrap(),
            Rule::parse("delete /** *").unwrap(),
            Rule::parse("resume /** *").unwrap(),
            Rule::parse("rename /** *").unwrap(),
        ];
        let permissions = Arc::new(Permissions::new(rules));
        let config = VfsConfig {
            root: dir.path().to_path_buf(),
            default_user: "nobody".to_string(),
            default_group: "nogroup".to_string(),
            hide_patterns: vec![],
        };
        let fs = Filesystem::new(config, permissions, shadow).unwrap();
        (fs, dir)
    }

    fn alice() -> User {
        User::new("alice", "hash")
    }

    #[tokio::test]
    async fn upload_then_download_roundtrip() {
        let (fs, _dir) = fixture();
        let user = alice();
        let data = b"hello world".to_vec();
        let written = fs.upload("/f.txt", &user, false, Cursor::new(data.clone())).await.unwrap();
        assert_eq!(written, data.len() as u64);

        let entry = fs.shadow.get("/f.txt").unwrap().unwrap();
        assert_eq!(entry.crc32, crc32fast::hash(&data));
        assert_eq!(entry.owner, "alice");

        let (mut file, size) = fs.download("/f.txt", &user, 0).await.unwrap();
        assert_eq!(size, data.len() as u64);
        let mut out = Vec::new();
        use tokio::io::AsyncReadExt;
        file.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn resume_extends_and_recombines_crc() {
        let (fs, _dir) = fixture();
        let user = alice();
        fs.upload("/f.txt", &user, false, Cursor::new(b"0123456789".to_vec())).await.unwrap();
        fs.upload("/f.txt", &user, true, Cursor::new(b"abcde".to_vec())).await.unwrap();

        let entry = fs.shadow.get("/f.txt").unwrap().unwrap();
        let expected = crc32fast::hash(b"0123456789abcde");
        assert_eq!(entry.crc32, expected);
    }

    #[tokio::test]
    async fn zero_length_upload_is_rejected_and_cleans_up() {
        let (fs, _dir) = fixture();
        let user = alice();
        let err = fs.upload("/empty.txt", &user, false, Cursor::new(Vec::new())).await.unwrap_err();
        assert_eq!(err.kind(), VfsErrorKind::EmptyUpload);
        assert!(fs.shadow.get("/empty.txt").unwrap().is_none());
    }

    #[tokio::test]
    async fn rename_moves_shadow_entry() {
        let (fs, _dir) = fixture();
        let user = alice();
        fs.upload("/old.txt", &user, false, Cursor::new(b"data".to_vec())).await.unwrap();
        fs.rename("/old.txt", "/new.txt", &user).await.unwrap();
        assert!(fs.shadow.get("/old.txt").unwrap().is_none());
        assert!(fs.shadow.get("/new.txt").unwrap().is_some());
    }

    #[tokio::test]
    async fn stat_reports_size_and_shadow_mtime() {
        let (fs, _dir) = fixture();
        let user = alice();
        fs.upload("/f.txt", &user, false, Cursor::new(b"hello".to_vec())).await.unwrap();
        let (size, modified) = fs.stat("/f.txt", &user).await.unwrap();
        assert_eq!(size, 5);
        let entry = fs.shadow.get("/f.txt").unwrap().unwrap();
        assert_eq!(modified, entry.updated_at);
    }

    #[tokio::test]
    async fn delete_refuses_directory_via_file_delete() {
        let (fs, _dir) = fixture();
        let user = alice();
        fs.mkd("/d", &user).await.unwrap();
        let err = fs.delete("/d", &user, false).await.unwrap_err();
        assert_eq!(err.kind(), VfsErrorKind::WrongType);
    }
}

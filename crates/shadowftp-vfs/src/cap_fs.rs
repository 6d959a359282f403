//! A capability-sandboxed, async workalike of a handful of `tokio::fs`
//! functions, built on `cap_std::fs::Dir` so every path is resolved relative
//! to a fixed root and cannot escape it via `..` or a symlink.

use std::{io, path::Path, sync::Arc};
use tokio::task::spawn_blocking;

async fn asyncify<F, T>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match spawn_blocking(f).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::other("blocking filesystem task panicked")),
    }
}

pub async fn create_dir(root: Arc<cap_std::fs::Dir>, path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref().to_owned();
    asyncify(move || root.create_dir(path)).await
}

pub async fn open(root: Arc<cap_std::fs::Dir>, path: impl AsRef<Path>) -> io::Result<cap_std::fs::File> {
    let path = path.as_ref().to_owned();
    asyncify(move || root.open(path)).await
}

pub async fn open_with(root: Arc<cap_std::fs::Dir>, path: impl AsRef<Path>, options: cap_std::fs::OpenOptions) -> io::Result<cap_std::fs::File> {
    let path = path.as_ref().to_owned();
    asyncify(move || root.open_with(path, &options)).await
}

/// Collects directory entries eagerly; listings are small enough in this
/// server's use case that a streaming interface isn't worth the complexity.
pub async fn read_dir(root: Arc<cap_std::fs::Dir>, path: impl AsRef<Path>) -> io::Result<Vec<cap_std::fs::DirEntry>> {
    let path = path.as_ref().to_owned();
    asyncify(move || root.read_dir(path)?.collect::<io::Result<Vec<_>>>()).await
}

pub async fn remove_dir(root: Arc<cap_std::fs::Dir>, path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref().to_owned();
    asyncify(move || root.remove_dir(path)).await
}

pub async fn remove_file(root: Arc<cap_std::fs::Dir>, path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref().to_owned();
    asyncify(move || root.remove_file(path)).await
}

pub async fn rename(root: Arc<cap_std::fs::Dir>, from: impl AsRef<Path>, to: impl AsRef<Path>) -> io::Result<()> {
    let from = from.as_ref().to_owned();
    let to = to.as_ref().to_owned();
    asyncify(move || root.rename(from, &root, to)).await
}

pub async fn symlink_metadata(root: Arc<cap_std::fs::Dir>, path: impl AsRef<Path>) -> io::Result<cap_std::fs::Metadata> {
    let path = path.as_ref().to_owned();
    asyncify(move || root.symlink_metadata(path)).await
}

/// Strips the leading `/` FTP paths always carry, and rejects any `..`
/// component so a crafted path can never walk outside the sandboxed root
/// (defense in depth; `cap_std::fs::Dir` itself already enforces this).
pub fn normalize(path: &Path) -> io::Result<std::path::PathBuf> {
    use std::path::Component;
    let mut out = std::path::PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => return Err(io::Error::new(io::ErrorKind::InvalidInput, "path escapes root")),
            Component::Normal(part) => out.push(part),
        }
    }
    Ok(out)
}

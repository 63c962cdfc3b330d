use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs;

/// The file-system primitives the cache is built on.
///
/// Every method may fail with [`io::ErrorKind::NotFound`], which the cache treats as an
/// empty or missing state rather than as an error.
#[async_trait]
pub trait Storage: fmt::Debug + Send + Sync {
    /// Checks whether `path` exists.
    async fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Reads the whole file at `path` as UTF-8.
    async fn read(&self, path: &Path) -> io::Result<String>;

    /// Replaces the file at `path` with `contents`.
    async fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Removes the file at `path`.
    async fn remove(&self, path: &Path) -> io::Result<()>;

    /// Creates `path` and all of its parents.
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Lists the file names in the directory at `path`.
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>>;

    /// Returns the modification time of the file at `path`.
    async fn mtime(&self, path: &Path) -> io::Result<SystemTime>;
}

/// [`Storage`] on top of the local file system.
///
/// Writes go to a temporary file in the same directory first, which is then atomically moved
/// into place, so readers never see a partially written cache file.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorage;

#[async_trait]
impl Storage for FsStorage {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        fs::try_exists(path).await
    }

    async fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path).await
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        let path = path.to_path_buf();
        let contents = contents.to_owned();
        tokio::task::spawn_blocking(move || persist_atomically(&path, contents.as_bytes()))
            .await
            .map_err(io::Error::other)?
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut entries = fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => tracing::debug!(?name, "Skipping non UTF-8 file name"),
            }
        }
        Ok(names)
    }

    async fn mtime(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path).await?.modified()
    }
}

fn persist_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::io::Write;

    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "no parent directory to persist item",
        )
    })?;

    let mut temp_file = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(parent)?;
    temp_file.write_all(contents)?;
    temp_file.as_file().sync_data()?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Runs `f`, turning a [`io::ErrorKind::NotFound`] error into `Ok(None)`.
pub(super) async fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: Future<Output = io::Result<R>>,
{
    match f.await {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}

/// The on-disk identity of a cache entry: `{root}/{key}.{extension}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFile {
    /// The file name, `{key}.{extension}`.
    pub filename: String,
    /// The full path below the cache root.
    pub path: PathBuf,
}

impl CacheFile {
    pub fn new(root: &Path, key: &str, extension: &str) -> Self {
        let filename = format!("{key}.{extension}");
        let path = root.join(&filename);
        Self { filename, path }
    }
}

/// Extracts the key from `filename` if it carries the given `extension`.
pub(super) fn key_from_filename<'a>(filename: &'a str, extension: &str) -> Option<&'a str> {
    let key = filename.strip_suffix(extension)?.strip_suffix('.')?;
    (!key.is_empty()).then_some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_file() {
        let file = CacheFile::new(Path::new("/tmp/cache"), "some-key", "json");
        assert_eq!(file.filename, "some-key.json");
        assert_eq!(file.path, Path::new("/tmp/cache/some-key.json"));
    }

    #[test]
    fn test_key_from_filename() {
        assert_eq!(key_from_filename("foo.tmp", "tmp"), Some("foo"));
        assert_eq!(key_from_filename("foo.bar.tmp", "tmp"), Some("foo.bar"));
        assert_eq!(key_from_filename("foo.json", "tmp"), None);
        assert_eq!(key_from_filename("footmp", "tmp"), None);
        assert_eq!(key_from_filename(".tmp", "tmp"), None);
        assert_eq!(key_from_filename(".partial-a8Xk2p", "tmp"), None);
    }

    #[tokio::test]
    async fn test_write_replaces_contents() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("entry.tmp");

        FsStorage.write(&path, "first").await?;
        FsStorage.write(&path, "second").await?;
        assert_eq!(FsStorage.read(&path).await?, "second");

        // only the entry itself remains, no temporary files
        assert_eq!(FsStorage.read_dir(dir.path()).await?, vec!["entry.tmp"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_catch_not_found() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let missing = dir.path().join("missing");

        assert!(catch_not_found(FsStorage.remove(&missing)).await?.is_none());
        assert!(catch_not_found(FsStorage.mtime(&missing)).await?.is_none());
        assert!(!FsStorage.exists(&missing).await?);
        Ok(())
    }
}

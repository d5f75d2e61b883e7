//! Data root: the filesystem capability used by the transfer service.
//!
//! Every name a client sends is resolved relative to one root directory.
//! Names that could escape the root (absolute paths, `..`, drive prefixes)
//! are refused before anything touches the disk.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Filesystem errors surfaced to the transfer service.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested name is empty or would leave the data root.
    #[error("invalid file name {0:?}")]
    InvalidName(String),
    /// The requested file does not exist (or is not a regular file).
    #[error("file {0:?} not found")]
    NotFound(String),
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A directory that all transfers read from and write into.
#[derive(Debug, Clone)]
pub struct DataRoot {
    root: PathBuf,
}

impl DataRoot {
    /// Open (creating if needed) the data root directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|source| StoreError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let root = root.canonicalize().map_err(|source| StoreError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        debug!(root = %root.display(), "Data root ready");
        Ok(Self { root })
    }

    /// The canonical root directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a client-supplied name to a path inside the root.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StoreError> {
        if name.contains('\0') {
            return Err(StoreError::InvalidName(name.to_string()));
        }

        let mut relative = PathBuf::new();
        for component in Path::new(name).components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => relative.push(part),
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StoreError::InvalidName(name.to_string()));
                }
            }
        }

        if relative.as_os_str().is_empty() {
            return Err(StoreError::InvalidName(name.to_string()));
        }

        Ok(self.root.join(relative))
    }

    /// Size of an existing regular file.
    pub fn stat(&self, name: &str) -> Result<u64, StoreError> {
        let path = self.resolve(name)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(StoreError::NotFound(name.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Open a file for reading, returning the handle and its size.
    pub fn open_read(&self, name: &str) -> Result<(File, u64), StoreError> {
        let path = self.resolve(name)?;
        let file = File::open(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(name.to_string()),
            _ => StoreError::Io {
                path: path.clone(),
                source,
            },
        })?;
        let size = file
            .metadata()
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?
            .len();
        Ok((file, size))
    }

    /// Create (or truncate) a file for writing.
    pub fn create(&self, name: &str) -> Result<File, StoreError> {
        let path = self.resolve(name)?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| StoreError::Io { path, source })
    }
}

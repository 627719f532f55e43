//! Local filesystem access.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::dump::{FileReader, FileWriter};
use crate::error::{Error, Result};

/// Largest single write issued by [`LocalFs`].
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// [`FileReader`] and [`FileWriter`] backed by `std::fs`.
///
/// With a root set, absolute device paths are read from below that
/// directory instead, so an application bundle copied off a device can be
/// used in place of the device filesystem. Writes are never re-rooted.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: Option<PathBuf>,
    chunk_size: usize,
}

impl Default for LocalFs {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFs {
    /// Creates a filesystem reading paths as given.
    pub fn new() -> Self {
        Self {
            root: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Reads device paths from below `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Sets the largest single write. Zero is treated as one byte.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Returns where `path` is read from.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) => {
                let relative: PathBuf = path
                    .components()
                    .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
                    .collect();
                root.join(relative)
            }
            None => path.to_path_buf(),
        }
    }
}

impl FileReader for LocalFs {
    fn read_all(&self, path: &Path) -> Result<Vec<u8>> {
        let path = self.resolve(path);
        let data = fs::read(&path).map_err(|e| Error::FileRead {
            path: path.clone(),
            source: e,
        })?;
        debug!("Read {} bytes from {}", data.len(), path.display());
        Ok(data)
    }
}

impl FileWriter for LocalFs {
    fn write_all(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let write_err = |e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut file = File::create(path).map_err(write_err)?;
        let mut chunks = 0usize;
        for chunk in bytes.chunks(self.chunk_size) {
            file.write_all(chunk).map_err(write_err)?;
            chunks += 1;
        }
        file.flush().map_err(write_err)?;

        debug!(
            "Wrote {} bytes to {} in {} chunks",
            bytes.len(),
            path.display(),
            chunks
        );
        Ok(())
    }
}

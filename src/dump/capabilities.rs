//! Capabilities the dumper consumes from its environment.
//!
//! None of these are implemented by the core. The `host` module provides
//! filesystem and snapshot-backed versions; tests substitute fakes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use crate::source::AddressSpaceReader;

/// One image loaded in the target process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Short name (last path component)
    pub name: String,
    /// Path of the image on the device
    pub path: String,
    /// Load address of the Mach-O header
    pub base_address: u64,
    /// Size of the mapped image
    pub mapped_size: u64,
}

/// Reads whole files.
pub trait FileReader {
    /// Reads the complete file at `path`.
    fn read_all(&self, path: &Path) -> Result<Vec<u8>>;
}

/// Writes whole files.
pub trait FileWriter {
    /// Creates or truncates `path` and writes all of `bytes`.
    fn write_all(&self, path: &Path, bytes: &[u8]) -> Result<()>;
}

/// Looks up a loaded image by name.
pub trait ModuleResolver {
    /// Finds a loaded image by its short name.
    fn find_by_name(&self, name: &str) -> Option<ImageDescriptor>;
}

/// Lists the images loaded in the target process.
pub trait ModuleEnumerator {
    /// Returns all loaded images in load order.
    fn list_all(&self) -> Result<Vec<ImageDescriptor>>;

    /// Path of the application bundle, when the process can report it directly.
    fn main_bundle_path(&self) -> Option<PathBuf> {
        None
    }
}

/// The set of capabilities passed into a [`Dumper`](super::Dumper).
#[derive(Clone, Copy)]
pub struct Capabilities<'a> {
    /// Reads the target's address space
    pub memory: &'a dyn AddressSpaceReader,
    /// Reads on-disk images
    pub reader: &'a dyn FileReader,
    /// Writes dumped images
    pub writer: &'a dyn FileWriter,
    /// Resolves images by name
    pub resolver: &'a dyn ModuleResolver,
    /// Enumerates loaded images
    pub enumerator: &'a dyn ModuleEnumerator,
}

impl<'a> Capabilities<'a> {
    /// Builds capabilities from one process handle and one filesystem handle.
    pub fn new<P, F>(process: &'a P, files: &'a F) -> Self
    where
        P: AddressSpaceReader + ModuleResolver + ModuleEnumerator,
        F: FileReader + FileWriter,
    {
        Self {
            memory: process,
            reader: files,
            writer: files,
            resolver: process,
            enumerator: process,
        }
    }
}

//! Recorded process snapshots.
//!
//! A snapshot is a JSON manifest describing the images loaded in a process,
//! each with a raw copy of its mapped region:
//!
//! ```json
//! {
//!   "bundle_path": "/var/containers/Bundle/Application/X/App.app",
//!   "modules": [
//!     { "name": "App", "path": "/var/.../App.app/App",
//!       "base": "0x100000000", "size": 81920, "memory": "App.mem" }
//!   ]
//! }
//! ```
//!
//! `memory` paths are relative to the manifest. `name` defaults to the last
//! path component and `size` to the length of the memory file.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::Deserialize;
use tracing::{debug, info};

use crate::dump::{AddressSpaceReader, ImageDescriptor, ModuleEnumerator, ModuleResolver};
use crate::error::{Error, Result};
use crate::util::basename;

/// An address written either as a JSON integer or as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AddressRepr {
    Int(u64),
    Text(String),
}

impl AddressRepr {
    fn value(&self) -> Option<u64> {
        match self {
            AddressRepr::Int(v) => Some(*v),
            AddressRepr::Text(s) => parse_address(s),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    bundle_path: Option<PathBuf>,
    modules: Vec<ManifestModule>,
}

#[derive(Debug, Deserialize)]
struct ManifestModule {
    #[serde(default)]
    name: Option<String>,
    path: String,
    base: AddressRepr,
    #[serde(default)]
    size: Option<AddressRepr>,
    memory: PathBuf,
}

/// Parses `0x`-prefixed hexadecimal or plain decimal.
pub fn parse_address(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    unsafe { Mmap::map(&file) }.map_err(|e| Error::MemoryMap {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Copies `length` bytes at `address` out of a region mapped at `base`.
fn read_region(data: &[u8], base: u64, address: u64, length: usize) -> Option<Vec<u8>> {
    let start = usize::try_from(address.checked_sub(base)?).ok()?;
    let end = start.checked_add(length)?;
    data.get(start..end).map(<[u8]>::to_vec)
}

#[derive(Debug)]
struct SnapshotModule {
    descriptor: ImageDescriptor,
    memory: Mmap,
}

/// A process snapshot loaded from a manifest.
#[derive(Debug)]
pub struct Snapshot {
    path: PathBuf,
    bundle_path: Option<PathBuf>,
    modules: Vec<SnapshotModule>,
}

impl Snapshot {
    /// Loads the manifest at `path` and maps every module's memory file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = fs::read_to_string(&path).map_err(|e| Error::FileRead {
            path: path.clone(),
            source: e,
        })?;
        let manifest: Manifest = serde_json::from_str(&text)?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let invalid = |reason: String| Error::Snapshot {
            path: path.clone(),
            reason,
        };

        let mut modules = Vec::with_capacity(manifest.modules.len());
        for entry in manifest.modules {
            let base = entry
                .base
                .value()
                .ok_or_else(|| invalid(format!("bad base address for {}", entry.path)))?;

            let memory = map_file(&dir.join(&entry.memory))?;
            let mapped_size = match &entry.size {
                Some(size) => size
                    .value()
                    .ok_or_else(|| invalid(format!("bad size for {}", entry.path)))?,
                None => memory.len() as u64,
            };

            let name = entry
                .name
                .unwrap_or_else(|| basename(&entry.path).to_string());
            debug!(
                "Snapshot module {} at {:#x} ({} bytes captured)",
                name,
                base,
                memory.len()
            );

            modules.push(SnapshotModule {
                descriptor: ImageDescriptor {
                    name,
                    path: entry.path,
                    base_address: base,
                    mapped_size,
                },
                memory,
            });
        }

        info!(
            "Loaded snapshot {} with {} modules",
            path.display(),
            modules.len()
        );
        Ok(Self {
            path,
            bundle_path: manifest.bundle_path,
            modules,
        })
    }

    /// Path of the manifest.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of modules in the snapshot.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if the snapshot holds no modules.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl AddressSpaceReader for Snapshot {
    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>> {
        let module = self
            .modules
            .iter()
            .find(|m| {
                let base = m.descriptor.base_address;
                address >= base && address - base < m.memory.len() as u64
            })
            .ok_or_else(|| Error::memory_read(address, length, "address not captured"))?;

        read_region(&module.memory, module.descriptor.base_address, address, length).ok_or_else(
            || {
                Error::memory_read(
                    address,
                    length,
                    format!("read crosses end of {}", module.descriptor.name),
                )
            },
        )
    }
}

impl ModuleResolver for Snapshot {
    fn find_by_name(&self, name: &str) -> Option<ImageDescriptor> {
        self.modules
            .iter()
            .find(|m| m.descriptor.name == name)
            .map(|m| m.descriptor.clone())
    }
}

impl ModuleEnumerator for Snapshot {
    fn list_all(&self) -> Result<Vec<ImageDescriptor>> {
        Ok(self.modules.iter().map(|m| m.descriptor.clone()).collect())
    }

    fn main_bundle_path(&self) -> Option<PathBuf> {
        self.bundle_path.clone()
    }
}

/// A single raw memory copy of one image, addressed from `base`.
#[derive(Debug)]
pub struct FlatImage {
    base: u64,
    data: Mmap,
}

impl FlatImage {
    /// Maps the raw copy at `path` as if loaded at `base`.
    pub fn open(path: impl AsRef<Path>, base: u64) -> Result<Self> {
        let data = map_file(path.as_ref())?;
        Ok(Self { base, data })
    }

    /// Load address of the copy.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Number of captured bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl AddressSpaceReader for FlatImage {
    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>> {
        read_region(&self.data, self.base, address, length)
            .ok_or_else(|| Error::memory_read(address, length, "outside captured image"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_snapshot(dir: &Path, manifest: &str) -> PathBuf {
        fs::write(dir.join("App.mem"), (0u8..=255).collect::<Vec<_>>()).unwrap();
        fs::write(dir.join("Kit.mem"), vec![0x42u8; 64]).unwrap();
        let path = dir.join("snapshot.json");
        fs::write(&path, manifest).unwrap();
        path
    }

    const MANIFEST: &str = r#"{
        "bundle_path": "/var/App.app",
        "modules": [
            { "path": "/usr/lib/dyld", "base": 4096, "memory": "Kit.mem" },
            { "name": "App", "path": "/var/App.app/App",
              "base": "0x100000000", "size": "0x200", "memory": "App.mem" }
        ]
    }"#;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x100000000"), Some(0x1_0000_0000));
        assert_eq!(parse_address("0X1f"), Some(31));
        assert_eq!(parse_address(" 4096 "), Some(4096));
        assert_eq!(parse_address("0xzz"), None);
        assert_eq!(parse_address(""), None);
    }

    #[test]
    fn test_load_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Snapshot::load(write_snapshot(dir.path(), MANIFEST)).unwrap();
        assert_eq!(snapshot.len(), 2);

        let all = snapshot.list_all().unwrap();
        assert_eq!(all[0].name, "dyld");
        assert_eq!(all[0].mapped_size, 64);
        assert_eq!(all[1].base_address, 0x1_0000_0000);
        assert_eq!(all[1].mapped_size, 0x200);
        assert_eq!(
            snapshot.main_bundle_path(),
            Some(PathBuf::from("/var/App.app"))
        );
        assert_eq!(
            snapshot.find_by_name("App").map(|m| m.path),
            Some("/var/App.app/App".to_string())
        );
        assert!(snapshot.find_by_name("Missing").is_none());
    }

    #[test]
    fn test_reads_are_bounded_by_capture() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Snapshot::load(write_snapshot(dir.path(), MANIFEST)).unwrap();

        assert_eq!(snapshot.read(0x1_0000_0010, 4).unwrap(), vec![16, 17, 18, 19]);
        assert_eq!(snapshot.read(4096 + 60, 4).unwrap(), vec![0x42; 4]);
        assert!(snapshot.read(0x1_0000_00FE, 4).unwrap_err().is_io());
        assert!(snapshot.read(0x2000_0000, 1).is_err());
    }

    #[test]
    fn test_bad_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let bad_base = r#"{ "modules": [ { "path": "/A", "base": "nope", "memory": "App.mem" } ] }"#;
        let err = Snapshot::load(write_snapshot(dir.path(), bad_base)).unwrap_err();
        assert!(matches!(err, Error::Snapshot { .. }));

        let err = Snapshot::load(write_snapshot(dir.path(), "{")).unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));

        let missing = r#"{ "modules": [ { "path": "/A", "base": 0, "memory": "gone.mem" } ] }"#;
        let err = Snapshot::load(write_snapshot(dir.path(), missing)).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }

    #[test]
    fn test_flat_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.bin");
        fs::write(&path, [1u8, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let image = FlatImage::open(&path, 0x4000).unwrap();
        assert_eq!(image.len(), 8);
        assert_eq!(image.read(0x4002, 3).unwrap(), vec![3, 4, 5]);
        assert!(image.read(0x3FFF, 1).is_err());
        assert!(image.read(0x4006, 4).is_err());
    }
}

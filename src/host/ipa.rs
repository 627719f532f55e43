//! IPA packaging of a dumped application bundle.
//!
//! The bundle is archived as `Payload/<App>.app/...`. Every image dumped
//! successfully replaces its encrypted counterpart at the same path below the
//! bundle root. Everything else is stored as found.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::dump::BatchResult;
use crate::error::{Error, Result};

/// Summary of a written archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReport {
    /// Where the archive was written
    pub ipa_path: PathBuf,
    /// Number of archive entries, directories included
    pub entries: usize,
    /// Images stored in decrypted form
    pub replaced: Vec<String>,
    /// Dumped images with no file at their bundle path
    pub missing: Vec<String>,
}

enum EntryKind {
    Dir,
    File,
    Symlink(PathBuf),
}

struct BundleEntry {
    relative: PathBuf,
    kind: EntryKind,
    mode: u32,
}

/// Returns `<output_dir>/<App>_decrypted.ipa` for the bundle `App.app`.
pub fn ipa_path_for(output_dir: &Path, bundle_dir: &Path) -> PathBuf {
    let stem = bundle_dir
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "App".to_string());
    output_dir.join(format!("{stem}_decrypted.ipa"))
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else {
        0o644
    }
}

/// Collects everything below `dir` in name order, depth first.
fn collect_entries(root: &Path, relative: &Path, out: &mut Vec<BundleEntry>) -> Result<()> {
    let dir = root.join(relative);
    let read_err = |source: std::io::Error| Error::FileRead {
        path: dir.clone(),
        source,
    };

    let mut children = fs::read_dir(&dir)
        .map_err(read_err)?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(read_err)?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let path = child.path();
        let meta = fs::symlink_metadata(&path).map_err(|e| Error::FileRead {
            path: path.clone(),
            source: e,
        })?;
        let relative = relative.join(child.file_name());
        let mode = mode_of(&meta);

        if meta.file_type().is_symlink() {
            let target = fs::read_link(&path).map_err(|e| Error::FileRead {
                path: path.clone(),
                source: e,
            })?;
            out.push(BundleEntry {
                relative,
                kind: EntryKind::Symlink(target),
                mode,
            });
        } else if meta.is_dir() {
            out.push(BundleEntry {
                relative: relative.clone(),
                kind: EntryKind::Dir,
                mode,
            });
            collect_entries(root, &relative, out)?;
        } else {
            out.push(BundleEntry {
                relative,
                kind: EntryKind::File,
                mode,
            });
        }
    }

    Ok(())
}

/// Archive name of a bundle-relative path, always `/`-separated.
fn entry_name(prefix: &str, relative: &Path) -> String {
    let mut name = prefix.to_string();
    for component in relative.components() {
        name.push('/');
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    name
}

fn file_options(mode: u32) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(mode)
}

/// Packages `bundle_dir` as an IPA at `ipa_path`, substituting the
/// successful dumps of `batch`.
///
/// Dumps are matched by their device path relative to `batch.bundle_root`.
/// A dump whose counterpart does not exist in `bundle_dir` is reported as
/// missing and left out.
pub fn package_ipa(
    bundle_dir: &Path,
    batch: &BatchResult,
    ipa_path: &Path,
) -> Result<PackageReport> {
    let app_dir = bundle_dir
        .file_name()
        .or_else(|| batch.bundle_root.as_deref().and_then(Path::file_name))
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Package {
            path: bundle_dir.to_path_buf(),
            reason: "bundle directory has no name".into(),
        })?;

    let mut substitutes: BTreeMap<PathBuf, &Path> = BTreeMap::new();
    let mut replaced = Vec::new();
    let mut missing = Vec::new();

    for module in &batch.modules {
        let Some(output) = module.output_path.as_deref() else {
            continue;
        };
        let relative = batch
            .bundle_root
            .as_deref()
            .and_then(|root| Path::new(&module.original_path).strip_prefix(root).ok());

        match relative {
            Some(relative) if bundle_dir.join(relative).is_file() => {
                debug!("Replacing {} with {}", relative.display(), output.display());
                substitutes.insert(relative.to_path_buf(), output);
                replaced.push(module.name.clone());
            }
            _ => {
                warn!(
                    "No bundle file for {}, leaving it out of the archive",
                    module.original_path
                );
                missing.push(module.name.clone());
            }
        }
    }

    let mut entries = Vec::new();
    collect_entries(bundle_dir, Path::new(""), &mut entries)?;

    if let Some(parent) = ipa_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::FileWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let file = File::create(ipa_path).map_err(|e| Error::FileWrite {
        path: ipa_path.to_path_buf(),
        source: e,
    })?;

    let archive_err = |source: ZipError| Error::Archive {
        path: ipa_path.to_path_buf(),
        source,
    };
    let write_err = |source: std::io::Error| Error::FileWrite {
        path: ipa_path.to_path_buf(),
        source,
    };

    let prefix = format!("Payload/{app_dir}");
    let mut zip = ZipWriter::new(file);
    zip.add_directory("Payload/", file_options(0o755))
        .map_err(archive_err)?;
    zip.add_directory(format!("{prefix}/"), file_options(0o755))
        .map_err(archive_err)?;

    for entry in &entries {
        let name = entry_name(&prefix, &entry.relative);
        let options = file_options(entry.mode);

        match &entry.kind {
            EntryKind::Dir => zip
                .add_directory(format!("{name}/"), options)
                .map_err(archive_err)?,
            EntryKind::Symlink(target) => zip
                .add_symlink(name, target.to_string_lossy().into_owned(), options)
                .map_err(archive_err)?,
            EntryKind::File => {
                let source = match substitutes.get(&entry.relative) {
                    Some(dumped) => dumped.to_path_buf(),
                    None => bundle_dir.join(&entry.relative),
                };
                let data = fs::read(&source).map_err(|e| Error::FileRead {
                    path: source.clone(),
                    source: e,
                })?;
                zip.start_file(name, options).map_err(archive_err)?;
                zip.write_all(&data).map_err(write_err)?;
            }
        }
    }

    zip.finish().map_err(archive_err)?;

    let report = PackageReport {
        ipa_path: ipa_path.to_path_buf(),
        entries: entries.len() + 2,
        replaced,
        missing,
    };
    info!(
        "Packaged {} entries ({} decrypted) into {}",
        report.entries,
        report.replaced.len(),
        ipa_path.display()
    );
    Ok(report)
}

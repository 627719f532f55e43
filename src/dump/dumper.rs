//! Dump orchestration.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::capabilities::{Capabilities, ImageDescriptor};
use super::modules::{discover, AppImages};
use super::options::{DumpOptions, FallbackPolicy};
use super::result::{BatchResult, DumpOutcome, DumpResult};
use crate::error::{Error, Result};
use crate::patch::{layout_file_size, merge_from_live, patch_crypt_id, EncryptionState};
use crate::source::{ByteSource, RemoteImage};
use crate::util::{basename, format_size};

/// Dumps decrypted images out of a running process.
///
/// Every environment access goes through the [`Capabilities`] passed in, so
/// the same dumper runs against a live process or a recorded snapshot.
pub struct Dumper<'a> {
    caps: Capabilities<'a>,
    options: DumpOptions,
}

impl<'a> Dumper<'a> {
    /// Creates a dumper.
    pub fn new(caps: Capabilities<'a>, options: DumpOptions) -> Self {
        Self { caps, options }
    }

    /// Returns the dump options.
    pub fn options(&self) -> &DumpOptions {
        &self.options
    }

    /// Lists the application images of the process.
    pub fn list_images(&self) -> Result<AppImages> {
        discover(self.caps.enumerator)
    }

    /// Output location for the image named `name`.
    pub fn output_path_for(&self, name: &str) -> PathBuf {
        self.options.output_path_for(name)
    }

    /// Dumps the image loaded from `image_path`.
    ///
    /// Never fails: errors become a [`DumpOutcome::Failed`] result.
    pub fn dump_image(&self, image_path: &str) -> DumpResult {
        let name = basename(image_path).to_string();
        info!("{}: dumping {}", name, image_path);

        let output_path = self.output_path_for(&name);
        match self.try_dump(&name, &output_path) {
            Ok(outcome) => {
                info!("{}: dumped to {}", name, output_path.display());
                DumpResult {
                    name,
                    original_path: image_path.to_string(),
                    output_path: Some(output_path),
                    outcome,
                }
            }
            Err(e) => {
                error!("{}: {}", name, e);
                DumpResult {
                    name,
                    original_path: image_path.to_string(),
                    output_path: None,
                    outcome: DumpOutcome::Failed {
                        reason: e.to_string(),
                    },
                }
            }
        }
    }

    /// Dumps every image in `app`, in order, reporting each result to
    /// `on_result` as it completes.
    pub fn dump_images<F>(&self, app: &AppImages, mut on_result: F) -> BatchResult
    where
        F: FnMut(&DumpResult),
    {
        let mut batch = BatchResult::new(app.bundle_root.clone());
        for image in &app.images {
            debug!("Processing {}", image.name);
            let result = self.dump_image(&image.path);
            on_result(&result);
            batch.push(result);
        }

        info!(
            "Dump complete: {}/{} images ({} from memory only)",
            batch.succeeded(),
            batch.processed(),
            batch.fallbacks()
        );
        batch
    }

    /// Discovers and dumps all application images.
    pub fn dump_all(&self) -> Result<BatchResult> {
        self.dump_all_with(|_| {})
    }

    /// Like [`dump_all`](Self::dump_all), reporting each result as it completes.
    pub fn dump_all_with<F>(&self, on_result: F) -> Result<BatchResult>
    where
        F: FnMut(&DumpResult),
    {
        let app = self.list_images()?;
        Ok(self.dump_images(&app, on_result))
    }

    fn try_dump(&self, name: &str, output_path: &Path) -> Result<DumpOutcome> {
        let image = self
            .caps
            .resolver
            .find_by_name(name)
            .ok_or_else(|| Error::ModuleNotFound {
                name: name.to_string(),
            })?;
        info!(
            "{}: memory base {:#x}, size {:#x}",
            name, image.base_address, image.mapped_size
        );

        let (bytes, outcome) = match self.caps.reader.read_all(Path::new(&image.path)) {
            Ok(disk) => self.merge_from_disk(name, &image, disk)?,
            Err(e) => {
                warn!("{}: cannot read image from disk: {}", name, e);
                warn!("{}: falling back to memory-only dump", name);
                self.dump_from_memory(name, &image)?
            }
        };

        self.caps.writer.write_all(output_path, &bytes)?;
        Ok(outcome)
    }

    fn merge_from_disk(
        &self,
        name: &str,
        image: &ImageDescriptor,
        mut disk: Vec<u8>,
    ) -> Result<(Vec<u8>, DumpOutcome)> {
        debug!("{}: read {} from disk", name, format_size(disk.len() as u64));

        let outcome = match merge_from_live(&mut disk, self.caps.memory, image.base_address)? {
            EncryptionState::Absent => {
                info!("{}: no encryption info, writing as-is", name);
                DumpOutcome::Unencrypted
            }
            EncryptionState::Decrypted(info) => {
                info!("{}: already decrypted ({}), writing as-is", name, info);
                DumpOutcome::AlreadyDecrypted
            }
            EncryptionState::Encrypted(info) => {
                info!("{}: merged decrypted window ({})", name, info);
                DumpOutcome::Merged {
                    cryptoff: info.file_offset,
                    cryptsize: info.file_size,
                }
            }
        };
        Ok((disk, outcome))
    }

    fn dump_from_memory(
        &self,
        name: &str,
        image: &ImageDescriptor,
    ) -> Result<(Vec<u8>, DumpOutcome)> {
        let mut live = RemoteImage::new(self.caps.memory, image.base_address);
        if image.mapped_size > 0 {
            live = live.with_size(image.mapped_size);
        }

        let layout = match layout_file_size(&live) {
            Ok(size) => size,
            Err(e) => {
                warn!("{}: cannot size image from its segments: {}", name, e);
                None
            }
        };
        let size = layout.unwrap_or(0).max(image.mapped_size);
        if size == 0 {
            return Err(Error::memory_read(
                image.base_address,
                0,
                "image size could not be determined",
            ));
        }
        info!(
            "{}: reading {} from memory (layout {:?}, mapped {:#x})",
            name,
            format_size(size),
            layout,
            image.mapped_size
        );

        let length = usize::try_from(size)
            .map_err(|_| Error::memory_read(image.base_address, usize::MAX, "image too large"))?;
        let live = RemoteImage::new(self.caps.memory, image.base_address);
        let mut bytes = live.read_at(0, length)?.into_owned();

        let cryptid_cleared = match self.options.fallback_policy {
            FallbackPolicy::Verbatim => false,
            FallbackPolicy::ClearCryptId => clear_memory_crypt_id(name, &mut bytes),
        };

        Ok((
            bytes,
            DumpOutcome::MemoryOnly {
                size,
                cryptid_cleared,
            },
        ))
    }
}

fn clear_memory_crypt_id(name: &str, bytes: &mut [u8]) -> bool {
    match patch_crypt_id(bytes) {
        Ok(EncryptionState::Encrypted(info)) => {
            info!("{}: cleared cryptid {} in memory copy", name, info.crypt_id);
            true
        }
        Ok(_) => false,
        Err(e) => {
            warn!("{}: cannot clear cryptid in memory copy: {}", name, e);
            false
        }
    }
}

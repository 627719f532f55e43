//! Per-image and batch dump results.

use std::path::PathBuf;

use serde::Serialize;

/// How an image was dumped, or why it was not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DumpOutcome {
    /// Disk image with the encrypted window replaced from memory
    Merged {
        /// Start of the replaced window
        cryptoff: u32,
        /// Length of the replaced window
        cryptsize: u32,
    },
    /// Disk image has no encryption info and was written as-is
    Unencrypted,
    /// Disk image already had `cryptid == 0` and was written as-is
    AlreadyDecrypted,
    /// Disk image unavailable; the mapped image was copied from memory
    MemoryOnly {
        /// Bytes copied from the base address
        size: u64,
        /// Whether `cryptid` was zeroed in the copy
        cryptid_cleared: bool,
    },
    /// No output was produced
    Failed {
        /// Diagnostic naming the failing step
        reason: String,
    },
}

/// Result of dumping one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpResult {
    /// Short image name
    pub name: String,
    /// Path of the image on the device
    pub original_path: String,
    /// Where the dump was written
    pub output_path: Option<PathBuf>,
    /// How the dump was produced
    pub outcome: DumpOutcome,
}

impl DumpResult {
    /// Returns true if an output file was produced.
    #[inline]
    pub fn success(&self) -> bool {
        self.output_path.is_some()
    }

    /// Returns true if the memory-only fallback was taken.
    #[inline]
    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, DumpOutcome::MemoryOnly { .. })
    }
}

/// Results of dumping every application image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    /// Bundle directory the images were selected from
    pub bundle_root: Option<PathBuf>,
    /// One entry per image, in discovery order
    pub modules: Vec<DumpResult>,
    /// Output paths of all successful dumps
    pub dumped_files: Vec<PathBuf>,
}

impl BatchResult {
    /// Creates an empty batch for `bundle_root`.
    pub fn new(bundle_root: Option<PathBuf>) -> Self {
        Self {
            bundle_root,
            ..Default::default()
        }
    }

    /// Appends one image result.
    pub fn push(&mut self, result: DumpResult) {
        if let Some(path) = &result.output_path {
            self.dumped_files.push(path.clone());
        }
        self.modules.push(result);
    }

    /// Number of images attempted.
    pub fn processed(&self) -> usize {
        self.modules.len()
    }

    /// Number of images with output.
    pub fn succeeded(&self) -> usize {
        self.modules.iter().filter(|m| m.success()).count()
    }

    /// Number of images dumped through the memory-only fallback.
    pub fn fallbacks(&self) -> usize {
        self.modules.iter().filter(|m| m.is_fallback()).count()
    }

    /// Number of images without output.
    pub fn failed(&self) -> usize {
        self.processed() - self.succeeded()
    }
}

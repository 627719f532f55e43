//! Options for dump operations.

use std::path::{Path, PathBuf};

/// What to do with the encryption flag when only memory is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Write the mapped image exactly as read.
    ///
    /// The loader decrypts the window in place but does not rewrite the load
    /// command, so the output usually still carries a nonzero `cryptid`.
    #[default]
    Verbatim,
    /// Zero `cryptid` in the memory copy if an encryption record is found.
    ClearCryptId,
}

/// Suffix appended to the image name to form the output file name.
pub const OUTPUT_SUFFIX: &str = "decrypted";

/// Options for dumping images.
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Directory dumps are written to
    pub output_dir: PathBuf,
    /// Handling of `cryptid` on the memory-only path
    pub fallback_policy: FallbackPolicy,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            output_dir: std::env::temp_dir(),
            fallback_policy: FallbackPolicy::default(),
        }
    }
}

impl DumpOptions {
    /// Sets the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Sets the memory-only fallback policy.
    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.fallback_policy = policy;
        self
    }

    /// Output location for an image with short name `name`.
    pub fn output_path_for(&self, name: &str) -> PathBuf {
        output_path_in(&self.output_dir, name)
    }
}

/// `<dir>/<name>.decrypted`
pub fn output_path_in(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{OUTPUT_SUFFIX}"))
}

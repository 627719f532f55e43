//! Error types for image parsing, patching and dumping.
//!
//! Parsing and patching errors describe a single image. The dump orchestrator
//! turns them into per-image outcomes, so none of these ever abort a batch.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for dump operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {length:#x} bytes of memory at {address:#x}: {reason}")]
    MemoryRead {
        address: u64,
        length: usize,
        reason: String,
    },

    // ==================== Mach-O Errors ====================
    #[error("invalid Mach-O magic: {magic:#010x}")]
    InvalidFormat { magic: u32 },

    #[error("load command at offset {offset:#x} (size {cmdsize:#x}) overruns source of {limit:#x} bytes")]
    RecordOverrun { offset: u64, cmdsize: u32, limit: u64 },

    #[error("load command at offset {offset:#x} declares size {cmdsize}, below the 8-byte minimum")]
    RecordTooSmall { offset: u64, cmdsize: u32 },

    #[error("parse error at offset {offset:#x}: {reason}")]
    Parse { offset: u64, reason: String },

    // ==================== Patch Errors ====================
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: u64, available: u64 },

    #[error("plaintext length {actual:#x} does not match cryptsize {expected:#x}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("read of {len:#x} bytes at offset {offset:#x} is out of bounds (size: {available:#x})")]
    OutOfBounds {
        offset: u64,
        len: usize,
        available: u64,
    },

    // ==================== Environment Errors ====================
    #[error("module not loaded: {name}")]
    ModuleNotFound { name: String },

    #[error("invalid snapshot '{path}': {reason}")]
    Snapshot { path: PathBuf, reason: String },

    #[error("invalid snapshot manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    // ==================== Packaging Errors ====================
    #[error("cannot package '{path}': {reason}")]
    Package { path: PathBuf, reason: String },

    #[error("failed to write archive '{path}': {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

/// A specialized Result type for dump operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true for failures of the underlying file or memory access,
    /// as opposed to failures in the image contents.
    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::FileRead { .. }
                | Error::FileWrite { .. }
                | Error::MemoryMap { .. }
                | Error::MemoryRead { .. }
        )
    }

    /// Creates a parse error with a formatted message.
    #[inline]
    pub fn parse(offset: u64, reason: impl Into<String>) -> Self {
        Error::Parse {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a memory read error.
    #[inline]
    pub fn memory_read(address: u64, length: usize, reason: impl Into<String>) -> Self {
        Error::MemoryRead {
            address,
            length,
            reason: reason.into(),
        }
    }

    /// Creates a buffer too small error.
    #[inline]
    pub fn buffer_too_small(needed: u64, available: usize) -> Self {
        Error::BufferTooSmall {
            needed,
            available: available as u64,
        }
    }
}

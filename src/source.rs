//! Byte-addressable sources the Mach-O parser reads from.
//!
//! The same parser runs over a file that has been read into memory and over
//! an image that is still mapped in a live address space. Both implement
//! [`ByteSource`], so every record sequence is produced by the same code.

use std::borrow::Cow;

use crate::error::{Error, Result};

/// Random-offset reads into a Mach-O container.
pub trait ByteSource {
    /// Reads `len` bytes starting at `offset` from the start of the container.
    fn read_at(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>>;

    /// Number of addressable bytes, if known.
    ///
    /// Parsers check record bounds against this before reading. Sources with
    /// no known size rely on the read itself failing.
    fn limit(&self) -> Option<u64>;
}

impl ByteSource for [u8] {
    fn read_at(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        let out_of_bounds = || Error::OutOfBounds {
            offset,
            len,
            available: self.len() as u64,
        };
        let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
        self.get(start..end)
            .map(Cow::Borrowed)
            .ok_or_else(out_of_bounds)
    }

    fn limit(&self) -> Option<u64> {
        Some(self.len() as u64)
    }
}

impl ByteSource for Vec<u8> {
    fn read_at(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        self.as_slice().read_at(offset, len)
    }

    fn limit(&self) -> Option<u64> {
        Some(self.len() as u64)
    }
}

/// Reads from the address space of a (possibly remote) process.
pub trait AddressSpaceReader {
    /// Reads `length` bytes at absolute address `address`.
    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>>;
}

/// A loaded image viewed through an [`AddressSpaceReader`].
///
/// Offsets are relative to the image's load base, so container offsets map
/// directly onto `base + offset`.
pub struct RemoteImage<'a> {
    reader: &'a dyn AddressSpaceReader,
    base: u64,
    size: Option<u64>,
}

impl<'a> RemoteImage<'a> {
    /// Creates a view of the image loaded at `base`.
    pub fn new(reader: &'a dyn AddressSpaceReader, base: u64) -> Self {
        Self {
            reader,
            base,
            size: None,
        }
    }

    /// Bounds the view to `size` bytes from the base.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Returns the load base.
    pub fn base(&self) -> u64 {
        self.base
    }
}

impl ByteSource for RemoteImage<'_> {
    fn read_at(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        let address = self
            .base
            .checked_add(offset)
            .ok_or_else(|| Error::memory_read(self.base, len, "address overflow"))?;
        let bytes = self.reader.read(address, len)?;
        if bytes.len() != len {
            return Err(Error::memory_read(
                address,
                len,
                format!("short read of {} bytes", bytes.len()),
            ));
        }
        Ok(Cow::Owned(bytes))
    }

    fn limit(&self) -> Option<u64> {
        self.size
    }
}

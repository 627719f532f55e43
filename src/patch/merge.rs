//! Merging live plaintext into an on-disk image.

use crate::error::{Error, Result};
use crate::source::{AddressSpaceReader, ByteSource, RemoteImage};
use crate::util::{read_u32_le_at, write_u32_le_at};

use super::{locate_encryption, EncryptionInfo, EncryptionState};

fn check_flag_bounds(buffer: &[u8], info: &EncryptionInfo) -> Result<usize> {
    let flag_end = info.flag_offset + 4;
    if (buffer.len() as u64) < flag_end {
        return Err(Error::buffer_too_small(flag_end, buffer.len()));
    }
    Ok(info.flag_offset as usize)
}

/// Replaces the encrypted window of `buffer` with `plaintext` and zeroes
/// `cryptid`.
///
/// `plaintext` must be exactly `cryptsize` bytes, read from the loaded image
/// at `base + cryptoff`. A buffer shorter than the window is a truncated or
/// mismatched read and fails with [`Error::BufferTooSmall`]. Applying the
/// merge twice with the same inputs leaves the buffer unchanged.
pub fn merge_decrypted(buffer: &mut [u8], info: &EncryptionInfo, plaintext: &[u8]) -> Result<()> {
    if plaintext.len() as u64 != info.file_size as u64 {
        return Err(Error::LengthMismatch {
            expected: info.file_size as u64,
            actual: plaintext.len() as u64,
        });
    }

    let end = info.window_end();
    if (buffer.len() as u64) < end {
        return Err(Error::buffer_too_small(end, buffer.len()));
    }
    let flag = check_flag_bounds(buffer, info)?;

    let start = info.file_offset as usize;
    buffer[start..end as usize].copy_from_slice(plaintext);
    write_u32_le_at(buffer, flag, 0);

    Ok(())
}

/// Zeroes `cryptid` without touching the encrypted window.
///
/// Returns the previous value.
pub fn clear_crypt_id(buffer: &mut [u8], info: &EncryptionInfo) -> Result<u32> {
    let flag = check_flag_bounds(buffer, info)?;
    let previous = read_u32_le_at(buffer, flag);
    write_u32_le_at(buffer, flag, 0);
    Ok(previous)
}

/// Decrypts `disk` in place using the image loaded at `base` in `memory`.
///
/// Returns the encryption state found on disk. Only an
/// [`EncryptionState::Encrypted`] image is modified.
pub fn merge_from_live(
    disk: &mut [u8],
    memory: &dyn AddressSpaceReader,
    base: u64,
) -> Result<EncryptionState> {
    let state = locate_encryption(&*disk)?;
    if let EncryptionState::Encrypted(info) = &state {
        let live = RemoteImage::new(memory, base);
        let plaintext = live.read_at(info.file_offset as u64, info.file_size as usize)?;
        merge_decrypted(disk, info, &plaintext)?;
    }
    Ok(state)
}

/// Clears `cryptid` of the image in `data` without decrypting anything.
///
/// Returns the state found before patching. Only an
/// [`EncryptionState::Encrypted`] image is modified.
pub fn patch_crypt_id(data: &mut [u8]) -> Result<EncryptionState> {
    let state = locate_encryption(&*data)?;
    if let EncryptionState::Encrypted(info) = &state {
        clear_crypt_id(data, info)?;
    }
    Ok(state)
}

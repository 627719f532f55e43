//! Locating the encryption info record.

use std::fmt;

use crate::error::{Error, Result};
use crate::macho::{
    EncryptionInfoCommand, LoadCommandRecord, MachHeader, CRYPTID_FIELD_OFFSET,
    LC_ENCRYPTION_INFO, LC_ENCRYPTION_INFO_64,
};
use crate::source::ByteSource;

/// The encrypted window described by an `LC_ENCRYPTION_INFO[_64]` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionInfo {
    /// Which record variant this came from
    pub cmd: u32,
    /// File offset of the encrypted range (`cryptoff`)
    pub file_offset: u32,
    /// Size of the encrypted range (`cryptsize`)
    pub file_size: u32,
    /// Current value of `cryptid`
    pub crypt_id: u32,
    /// Absolute offset of the 4-byte `cryptid` field in the container
    pub flag_offset: u64,
}

impl EncryptionInfo {
    /// Decodes an encryption info record.
    pub fn from_record(record: &LoadCommandRecord<'_>) -> Result<Self> {
        // Both variants share the leading 20 bytes.
        let command: EncryptionInfoCommand = record.read_as()?;
        Ok(Self {
            cmd: record.cmd,
            file_offset: command.cryptoff,
            file_size: command.cryptsize,
            crypt_id: command.cryptid,
            flag_offset: record.offset + CRYPTID_FIELD_OFFSET as u64,
        })
    }

    /// End of the encrypted window.
    #[inline]
    pub fn window_end(&self) -> u64 {
        self.file_offset as u64 + self.file_size as u64
    }

    /// Returns true if `cryptid` still marks the window as encrypted.
    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.crypt_id != 0
    }
}

impl fmt::Display for EncryptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cryptoff={:#x} cryptsize={:#x} cryptid={} (field at {:#x})",
            self.file_offset, self.file_size, self.crypt_id, self.flag_offset
        )
    }
}

/// What the locator found. Neither "absent" nor "decrypted" is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionState {
    /// No encryption info record; the image was never encrypted.
    Absent,
    /// A record exists but `cryptid` is already zero.
    Decrypted(EncryptionInfo),
    /// A record with nonzero `cryptid`; the window needs patching.
    Encrypted(EncryptionInfo),
}

impl EncryptionState {
    /// Returns the record info, if any.
    pub fn info(&self) -> Option<&EncryptionInfo> {
        match self {
            EncryptionState::Absent => None,
            EncryptionState::Decrypted(info) | EncryptionState::Encrypted(info) => Some(info),
        }
    }
}

/// Finds the first encryption info record of the container in `source`.
pub fn locate_encryption<S: ByteSource + ?Sized>(source: &S) -> Result<EncryptionState> {
    let header = MachHeader::parse(source)?;
    locate_encryption_with(&header, source)
}

/// Like [`locate_encryption`] with an already parsed header.
pub fn locate_encryption_with<S: ByteSource + ?Sized>(
    header: &MachHeader,
    source: &S,
) -> Result<EncryptionState> {
    for record in header.load_commands(source) {
        let record = record?;
        if !matches!(record.cmd, LC_ENCRYPTION_INFO | LC_ENCRYPTION_INFO_64) {
            continue;
        }

        let info = EncryptionInfo::from_record(&record).map_err(|_| {
            Error::parse(
                record.offset,
                format!(
                    "{} record of {} bytes is too short for cryptid",
                    record.name(),
                    record.cmdsize
                ),
            )
        })?;

        return Ok(if info.is_encrypted() {
            EncryptionState::Encrypted(info)
        } else {
            EncryptionState::Decrypted(info)
        });
    }

    Ok(EncryptionState::Absent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::testutil::MachBuilder;
    use crate::macho::{LC_UUID, MachVariant, SegmentCommand64};

    #[test]
    fn test_locates_64bit_record() {
        let data = MachBuilder::new(MachVariant::Bits64)
            .segment("__TEXT", 0, 0x8000)
            .encryption(0x4000, 0x4000, 1)
            .build(0x8000);

        let state = locate_encryption(data.as_slice()).unwrap();
        let info = match state {
            EncryptionState::Encrypted(info) => info,
            other => panic!("expected encrypted, got {other:?}"),
        };
        assert_eq!(info.cmd, LC_ENCRYPTION_INFO_64);
        assert_eq!(info.file_offset, 0x4000);
        assert_eq!(info.file_size, 0x4000);
        assert_eq!(info.window_end(), 0x8000);
        let record_offset = 32 + SegmentCommand64::SIZE as u64;
        assert_eq!(info.flag_offset, record_offset + 16);
        assert_eq!(&data[info.flag_offset as usize..][..4], &1u32.to_le_bytes());
    }

    #[test]
    fn test_locates_32bit_record() {
        let data = MachBuilder::new(MachVariant::Bits32)
            .raw(LC_UUID, &[0; 16])
            .encryption(0x1000, 0x2000, 7)
            .build(0x3000);

        let info = *locate_encryption(data.as_slice()).unwrap().info().unwrap();
        assert_eq!(info.cmd, LC_ENCRYPTION_INFO);
        assert_eq!(info.crypt_id, 7);
        assert_eq!(info.flag_offset, 28 + 24 + 16);
    }

    #[test]
    fn test_first_record_wins() {
        let data = MachBuilder::new(MachVariant::Bits64)
            .encryption(0x1000, 0x100, 0)
            .encryption(0x2000, 0x200, 3)
            .build(0x3000);

        let state = locate_encryption(data.as_slice()).unwrap();
        assert!(matches!(
            state,
            EncryptionState::Decrypted(EncryptionInfo {
                file_offset: 0x1000,
                ..
            })
        ));
    }

    #[test]
    fn test_absent_record() {
        let data = MachBuilder::new(MachVariant::Bits64)
            .segment("__TEXT", 0, 0x1000)
            .build(0x1000);
        assert_eq!(locate_encryption(data.as_slice()).unwrap(), EncryptionState::Absent);
    }

    #[test]
    fn test_already_decrypted_is_not_mutated() {
        let data = MachBuilder::new(MachVariant::Bits64)
            .segment("__TEXT", 0, 0x1000)
            .encryption(0x800, 0x800, 0)
            .build(0x1000);
        let before = data.clone();

        let state = locate_encryption(data.as_slice()).unwrap();
        assert!(matches!(state, EncryptionState::Decrypted(_)));
        assert_eq!(data, before);
    }

    #[test]
    fn test_truncated_record_is_parse_error() {
        let data = MachBuilder::new(MachVariant::Bits64)
            .raw(LC_ENCRYPTION_INFO_64, &[0; 8])
            .build(0x100);
        assert!(matches!(
            locate_encryption(data.as_slice()),
            Err(Error::Parse { offset: 32, .. })
        ));
    }

    #[test]
    fn test_invalid_container() {
        let data = vec![0u8; 64];
        assert!(matches!(
            locate_encryption(data.as_slice()),
            Err(Error::InvalidFormat { magic: 0 })
        ));
    }
}

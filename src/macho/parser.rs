//! Mach-O header and load command parsing over any [`ByteSource`].

use std::borrow::Cow;
use std::fmt;

use zerocopy::FromBytes;

use super::constants::*;
use super::structs::*;
use crate::error::{Error, Result};
use crate::source::ByteSource;
use crate::util::read_u32_le_at;

// =============================================================================
// Variant
// =============================================================================

/// Record width of a Mach-O image, resolved once from the header magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachVariant {
    /// `mach_header` / `LC_SEGMENT`
    Bits32,
    /// `mach_header_64` / `LC_SEGMENT_64`
    Bits64,
}

impl MachVariant {
    /// Selects the variant for a little-endian magic.
    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            MH_MAGIC => Some(MachVariant::Bits32),
            MH_MAGIC_64 => Some(MachVariant::Bits64),
            _ => None,
        }
    }

    /// Size of the header; load commands start right after it.
    #[inline]
    pub const fn header_size(self) -> usize {
        match self {
            MachVariant::Bits32 => MachHeader32::SIZE,
            MachVariant::Bits64 => MachHeader64::SIZE,
        }
    }

    /// The segment command type native to this variant.
    #[inline]
    pub const fn segment_command(self) -> u32 {
        match self {
            MachVariant::Bits32 => LC_SEGMENT,
            MachVariant::Bits64 => LC_SEGMENT_64,
        }
    }

    /// Returns "32-bit" or "64-bit".
    pub fn name(self) -> &'static str {
        match self {
            MachVariant::Bits32 => "32-bit",
            MachVariant::Bits64 => "64-bit",
        }
    }
}

// =============================================================================
// Header
// =============================================================================

/// A parsed Mach-O header in either width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachHeader {
    /// Width of all following records
    pub variant: MachVariant,
    /// Magic number
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Size of load commands
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
}

impl MachHeader {
    /// Parses the header at offset 0 of `source`.
    ///
    /// The magic is checked before anything else is read: an unrecognized
    /// magic fails with [`Error::InvalidFormat`] after a single read. A source
    /// known to be shorter than 4 bytes is invalid as well, with the missing
    /// magic bytes read as zero.
    pub fn parse<S: ByteSource + ?Sized>(source: &S) -> Result<Self> {
        let magic = match source.limit() {
            Some(limit) if limit < 4 => {
                let available = source.read_at(0, limit as usize)?;
                let mut raw = [0u8; 4];
                raw[..available.len()].copy_from_slice(&available);
                return Err(Error::InvalidFormat {
                    magic: u32::from_le_bytes(raw),
                });
            }
            _ => read_u32_le_at(&source.read_at(0, 4)?, 0),
        };
        let variant = MachVariant::from_magic(magic).ok_or(Error::InvalidFormat { magic })?;

        let raw = source.read_at(0, variant.header_size())?;
        let header = match variant {
            MachVariant::Bits32 => {
                let h = MachHeader32::read_from_prefix(&raw)
                    .map_err(|_| Error::parse(0, "truncated mach_header"))?
                    .0;
                MachHeader {
                    variant,
                    magic: h.magic,
                    cputype: h.cputype,
                    cpusubtype: h.cpusubtype,
                    filetype: h.filetype,
                    ncmds: h.ncmds,
                    sizeofcmds: h.sizeofcmds,
                    flags: h.flags,
                }
            }
            MachVariant::Bits64 => {
                let h = MachHeader64::read_from_prefix(&raw)
                    .map_err(|_| Error::parse(0, "truncated mach_header_64"))?
                    .0;
                MachHeader {
                    variant,
                    magic: h.magic,
                    cputype: h.cputype,
                    cpusubtype: h.cpusubtype,
                    filetype: h.filetype,
                    ncmds: h.ncmds,
                    sizeofcmds: h.sizeofcmds,
                    flags: h.flags,
                }
            }
        };

        Ok(header)
    }

    /// Size of the header in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.variant.header_size()
    }

    /// Returns a lazy iterator over the load commands in `source`.
    pub fn load_commands<'s, S: ByteSource + ?Sized>(&self, source: &'s S) -> LoadCommands<'s, S> {
        LoadCommands {
            source,
            next_offset: self.size() as u64,
            index: 0,
            count: self.ncmds,
            failed: false,
        }
    }

    /// Returns the architecture as a string.
    pub fn arch_name(&self) -> &'static str {
        match self.cputype {
            CPU_TYPE_ARM64 if (self.cpusubtype & 0xFF) == CPU_SUBTYPE_ARM64E => "arm64e",
            CPU_TYPE_ARM64 => "arm64",
            CPU_TYPE_X86_64 => "x86_64",
            CPU_TYPE_ARM => "arm",
            CPU_TYPE_X86 => "i386",
            _ => "unknown",
        }
    }

    /// Returns the file type as a string.
    pub fn filetype_name(&self) -> &'static str {
        match self.filetype {
            MH_EXECUTE => "executable",
            MH_DYLIB => "dylib",
            MH_BUNDLE => "bundle",
            _ => "other",
        }
    }
}

impl fmt::Display for MachHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MachO {{ {} {}, type: {}, cmds: {}, sizeofcmds: {:#x}, flags: {:#x} }}",
            self.variant.name(),
            self.arch_name(),
            self.filetype_name(),
            self.ncmds,
            self.sizeofcmds,
            self.flags
        )
    }
}

// =============================================================================
// Load Commands
// =============================================================================

/// One load command read from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCommandRecord<'s> {
    /// Position in command order
    pub index: u32,
    /// Absolute offset of the record within the container
    pub offset: u64,
    /// Command type
    pub cmd: u32,
    /// Declared size, including the 8-byte command header
    pub cmdsize: u32,
    /// All `cmdsize` bytes of the record
    pub bytes: Cow<'s, [u8]>,
}

impl LoadCommandRecord<'_> {
    /// Bytes following the `cmd`/`cmdsize` pair.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[LoadCommand::SIZE..]
    }

    /// Offset one past the end of the record.
    pub fn end(&self) -> u64 {
        self.offset + self.cmdsize as u64
    }

    /// Returns the symbolic name of the command.
    pub fn name(&self) -> &'static str {
        load_command_name(self.cmd)
    }

    /// Decodes the record as `T`, failing if the record is too short.
    pub fn read_as<T: FromBytes>(&self) -> Result<T> {
        T::read_from_prefix(&self.bytes)
            .map(|(value, _)| value)
            .map_err(|_| {
                Error::parse(
                    self.offset,
                    format!("{} record of {} bytes is truncated", self.name(), self.cmdsize),
                )
            })
    }
}

/// Lazy, ordered iterator over the load commands of an image.
///
/// Yields exactly `ncmds` records. After the first error the iterator is
/// exhausted.
pub struct LoadCommands<'s, S: ?Sized> {
    source: &'s S,
    next_offset: u64,
    index: u32,
    count: u32,
    failed: bool,
}

impl<'s, S: ByteSource + ?Sized> LoadCommands<'s, S> {
    fn check_bounds(&self, offset: u64, cmdsize: u32) -> Result<()> {
        if let Some(limit) = self.source.limit() {
            if offset + cmdsize as u64 > limit {
                return Err(Error::RecordOverrun {
                    offset,
                    cmdsize,
                    limit,
                });
            }
        }
        Ok(())
    }

    fn read_record(&self) -> Result<LoadCommandRecord<'s>> {
        let offset = self.next_offset;

        self.check_bounds(offset, LoadCommand::SIZE as u32)?;
        let head = self.source.read_at(offset, LoadCommand::SIZE)?;
        let lc = LoadCommand::read_from_prefix(&head)
            .map_err(|_| Error::parse(offset, "failed to parse load command"))?
            .0;

        if (lc.cmdsize as usize) < LoadCommand::SIZE {
            return Err(Error::RecordTooSmall {
                offset,
                cmdsize: lc.cmdsize,
            });
        }
        self.check_bounds(offset, lc.cmdsize)?;

        let bytes = self.source.read_at(offset, lc.cmdsize as usize)?;
        Ok(LoadCommandRecord {
            index: self.index,
            offset,
            cmd: lc.cmd,
            cmdsize: lc.cmdsize,
            bytes,
        })
    }
}

impl<'s, S: ByteSource + ?Sized> Iterator for LoadCommands<'s, S> {
    type Item = Result<LoadCommandRecord<'s>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.index >= self.count {
            return None;
        }

        match self.read_record() {
            Ok(record) => {
                self.next_offset = record.end();
                self.index += 1;
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some((self.count - self.index) as usize))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::testutil::MachBuilder;
    use crate::source::{AddressSpaceReader, RemoteImage};
    use std::cell::Cell;

    /// An image mapped at `base` in a fake address space.
    struct Mapped {
        base: u64,
        data: Vec<u8>,
    }

    impl AddressSpaceReader for Mapped {
        fn read(&self, address: u64, length: usize) -> Result<Vec<u8>> {
            let start = address
                .checked_sub(self.base)
                .ok_or_else(|| Error::memory_read(address, length, "below image"))?
                as usize;
            self.data
                .get(start..start + length)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::memory_read(address, length, "past image"))
        }
    }

    /// Counts reads passing through to a slice.
    struct CountingSource<'a> {
        data: &'a [u8],
        reads: Cell<usize>,
    }

    impl ByteSource for CountingSource<'_> {
        fn read_at(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
            self.reads.set(self.reads.get() + 1);
            self.data.read_at(offset, len)
        }

        fn limit(&self) -> Option<u64> {
            self.data.limit()
        }
    }

    #[test]
    fn test_record_count_matches_header_64() {
        let data = MachBuilder::new(MachVariant::Bits64)
            .segment("__PAGEZERO", 0, 0)
            .segment("__TEXT", 0, 0x4000)
            .encryption(0x4000, 0x1000, 1)
            .raw(LC_UUID, &[0xAB; 16])
            .build(0x8000);

        let header = MachHeader::parse(data.as_slice()).unwrap();
        assert_eq!(header.variant, MachVariant::Bits64);
        assert_eq!(header.ncmds, 4);

        let records: Vec<_> = header
            .load_commands(data.as_slice())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), header.ncmds as usize);
        assert_eq!(records[0].offset, 32);
        for rec in &records {
            assert!(rec.end() <= data.len() as u64);
            assert_eq!(rec.bytes.len(), rec.cmdsize as usize);
        }
        assert_eq!(records[2].cmd, LC_ENCRYPTION_INFO_64);
        assert_eq!(records[3].payload(), &[0xAB; 16]);
    }

    #[test]
    fn test_record_count_matches_header_32() {
        let data = MachBuilder::new(MachVariant::Bits32)
            .segment("__TEXT", 0, 0x1000)
            .encryption(0x1000, 0x800, 1)
            .build(0x2000);

        let header = MachHeader::parse(data.as_slice()).unwrap();
        assert_eq!(header.variant, MachVariant::Bits32);
        assert_eq!(header.size(), 28);

        let records: Vec<_> = header
            .load_commands(data.as_slice())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].offset, 28);
        assert_eq!(records[0].cmd, LC_SEGMENT);
        assert_eq!(records[1].cmd, LC_ENCRYPTION_INFO);
        assert_eq!(records[1].offset, 28 + SegmentCommand32::SIZE as u64);
    }

    #[test]
    fn test_invalid_magic_reads_once() {
        for magic in [0u32, FAT_MAGIC, MH_CIGAM_64, MH_CIGAM, 0xDEADBEEF] {
            let mut data = vec![0u8; 64];
            data[..4].copy_from_slice(&magic.to_le_bytes());
            let source = CountingSource {
                data: &data,
                reads: Cell::new(0),
            };
            let err = MachHeader::parse(&source).unwrap_err();
            assert!(matches!(err, Error::InvalidFormat { magic: m } if m == magic));
            assert_eq!(source.reads.get(), 1);
        }
    }

    #[test]
    fn test_short_buffer_is_invalid_format() {
        let empty: &[u8] = &[];
        let err = MachHeader::parse(empty).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { magic: 0 }));

        let data = [0xCF, 0xFA];
        let source = CountingSource {
            data: &data,
            reads: Cell::new(0),
        };
        let err = MachHeader::parse(&source).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { magic: 0xFACF }));
        assert_eq!(source.reads.get(), 1);
    }

    #[test]
    fn test_local_and_remote_records_match() {
        for variant in [MachVariant::Bits32, MachVariant::Bits64] {
            let data = MachBuilder::new(variant)
                .segment("__PAGEZERO", 0, 0)
                .segment("__TEXT", 0, 0x4000)
                .encryption(0x4000, 0x1000, 1)
                .raw(LC_UUID, &[0x5A; 16])
                .build(0x6000);
            let mapped = Mapped {
                base: 0x1_0000_0000,
                data: data.clone(),
            };
            let image = RemoteImage::new(&mapped, mapped.base);

            let local_header = MachHeader::parse(data.as_slice()).unwrap();
            let remote_header = MachHeader::parse(&image).unwrap();
            assert_eq!(local_header, remote_header);

            let local: Vec<_> = local_header
                .load_commands(data.as_slice())
                .collect::<Result<_>>()
                .unwrap();
            let remote: Vec<_> = remote_header
                .load_commands(&image)
                .collect::<Result<_>>()
                .unwrap();
            assert_eq!(local.len(), 4);
            assert_eq!(local, remote);
        }
    }

    #[test]
    fn test_overrun_is_reported() {
        let mut data = MachBuilder::new(MachVariant::Bits64)
            .segment("__TEXT", 0, 0x100)
            .build(0);
        // Point the only command far past the end of the buffer.
        let len = data.len();
        data[36..40].copy_from_slice(&0x1000u32.to_le_bytes());

        let header = MachHeader::parse(data.as_slice()).unwrap();
        let mut iter = header.load_commands(data.as_slice());
        match iter.next() {
            Some(Err(Error::RecordOverrun {
                offset,
                cmdsize,
                limit,
            })) => {
                assert_eq!(offset, 32);
                assert_eq!(cmdsize, 0x1000);
                assert_eq!(limit, len as u64);
            }
            other => panic!("expected overrun, got {other:?}"),
        }
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_ncmds_beyond_buffer_overruns() {
        let mut data = MachBuilder::new(MachVariant::Bits64)
            .segment("__TEXT", 0, 0x100)
            .build(0);
        data[16..20].copy_from_slice(&2u32.to_le_bytes());

        let header = MachHeader::parse(data.as_slice()).unwrap();
        let results: Vec<_> = header.load_commands(data.as_slice()).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::RecordOverrun { .. })));
    }

    #[test]
    fn test_undersized_record_is_corrupt() {
        let mut data = MachBuilder::new(MachVariant::Bits32)
            .raw(LC_UUID, &[0; 16])
            .build(0x100);
        data[28 + 4..28 + 8].copy_from_slice(&4u32.to_le_bytes());

        let header = MachHeader::parse(data.as_slice()).unwrap();
        let first = header.load_commands(data.as_slice()).next().unwrap();
        assert!(matches!(
            first,
            Err(Error::RecordTooSmall {
                offset: 28,
                cmdsize: 4
            })
        ));
    }

    #[test]
    fn test_read_as_rejects_short_record() {
        let data = MachBuilder::new(MachVariant::Bits64)
            .raw(LC_SEGMENT_64, &[0; 8])
            .build(0);
        let header = MachHeader::parse(data.as_slice()).unwrap();
        let rec = header.load_commands(data.as_slice()).next().unwrap().unwrap();
        assert!(matches!(
            rec.read_as::<SegmentCommand64>(),
            Err(Error::Parse { offset: 32, .. })
        ));
    }

    #[test]
    fn test_header_display() {
        let data = MachBuilder::new(MachVariant::Bits64).build(0);
        let header = MachHeader::parse(data.as_slice()).unwrap();
        assert_eq!(header.arch_name(), "arm64");
        assert!(header.to_string().contains("64-bit arm64"));
    }
}

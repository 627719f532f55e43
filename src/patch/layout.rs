//! File size implied by the segment layout.
//!
//! Used when no on-disk copy of an image is available and the dump has to
//! come from memory alone. Data past the last mapped segment (for example a
//! code signature that is not covered by `__LINKEDIT`) is not accounted for.

use std::fmt;

use crate::error::{Error, Result};
use crate::macho::{
    LoadCommandRecord, MachHeader, SegmentCommand32, SegmentCommand64, VmProt, LC_SEGMENT,
    LC_SEGMENT_64,
};
use crate::source::ByteSource;
use crate::util::fixed_name;

/// File placement of one segment, widened to 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMapping {
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub vmaddr: u64,
    /// Virtual memory size
    pub vmsize: u64,
    /// File offset
    pub fileoff: u64,
    /// Bytes mapped from the file
    pub filesize: u64,
    /// Maximum protection
    pub maxprot: VmProt,
    /// Initial protection
    pub initprot: VmProt,
}

impl SegmentMapping {
    /// Decodes an `LC_SEGMENT` or `LC_SEGMENT_64` record.
    pub fn from_record(record: &LoadCommandRecord<'_>) -> Result<Self> {
        match record.cmd {
            LC_SEGMENT => {
                let seg: SegmentCommand32 = record.read_as()?;
                Ok(Self {
                    segname: seg.segname,
                    vmaddr: seg.vmaddr as u64,
                    vmsize: seg.vmsize as u64,
                    fileoff: seg.fileoff as u64,
                    filesize: seg.filesize as u64,
                    maxprot: VmProt::from_bits_truncate(seg.maxprot),
                    initprot: VmProt::from_bits_truncate(seg.initprot),
                })
            }
            LC_SEGMENT_64 => {
                let seg: SegmentCommand64 = record.read_as()?;
                Ok(Self {
                    segname: seg.segname,
                    vmaddr: seg.vmaddr,
                    vmsize: seg.vmsize,
                    fileoff: seg.fileoff,
                    filesize: seg.filesize,
                    maxprot: VmProt::from_bits_truncate(seg.maxprot),
                    initprot: VmProt::from_bits_truncate(seg.initprot),
                })
            }
            other => Err(Error::parse(
                record.offset,
                format!("load command {other:#x} is not a segment"),
            )),
        }
    }

    /// Returns the segment name as a string.
    pub fn name(&self) -> &str {
        fixed_name(&self.segname)
    }

    /// End of the segment's file range, or `None` on overflow.
    pub fn file_end(&self) -> Option<u64> {
        self.fileoff.checked_add(self.filesize)
    }
}

impl fmt::Display for SegmentMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<16} vm {:#014x}+{:#010x} file {:#010x}+{:#010x} {}/{}",
            self.name(),
            self.vmaddr,
            self.vmsize,
            self.fileoff,
            self.filesize,
            self.initprot.rwx(),
            self.maxprot.rwx()
        )
    }
}

/// Returns every segment mapping in command order.
pub fn segment_mappings<S: ByteSource + ?Sized>(source: &S) -> Result<Vec<SegmentMapping>> {
    let header = MachHeader::parse(source)?;
    let mut mappings = Vec::new();
    for record in header.load_commands(source) {
        let record = record?;
        if matches!(record.cmd, LC_SEGMENT | LC_SEGMENT_64) {
            mappings.push(SegmentMapping::from_record(&record)?);
        }
    }
    Ok(mappings)
}

/// Computes `max(fileoff + filesize)` over segments that map file data.
///
/// Returns `None` when no segment has a nonzero file size.
pub fn layout_file_size<S: ByteSource + ?Sized>(source: &S) -> Result<Option<u64>> {
    let header = MachHeader::parse(source)?;
    let mut max_file_end: Option<u64> = None;

    for record in header.load_commands(source) {
        let record = record?;
        if !matches!(record.cmd, LC_SEGMENT | LC_SEGMENT_64) {
            continue;
        }

        let seg = SegmentMapping::from_record(&record)?;
        if seg.filesize == 0 {
            continue;
        }

        let end = seg.file_end().ok_or_else(|| {
            Error::parse(
                record.offset,
                format!("segment {} file range overflows", seg.name()),
            )
        })?;
        max_file_end = Some(max_file_end.map_or(end, |cur| cur.max(end)));
    }

    Ok(max_file_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::testutil::MachBuilder;
    use crate::macho::MachVariant;

    #[test]
    fn test_layout_maximum() {
        for variant in [MachVariant::Bits32, MachVariant::Bits64] {
            let data = MachBuilder::new(variant)
                .segment("__TEXT", 0, 100)
                .segment("__DATA", 100, 50)
                .segment("__LINKEDIT", 500, 10)
                .build(0);
            assert_eq!(layout_file_size(data.as_slice()).unwrap(), Some(510));
        }
    }

    #[test]
    fn test_layout_order_independent() {
        let data = MachBuilder::new(MachVariant::Bits64)
            .segment("__LINKEDIT", 0x8000, 0x1234)
            .segment("__TEXT", 0, 0x4000)
            .build(0);
        assert_eq!(layout_file_size(data.as_slice()).unwrap(), Some(0x9234));
    }

    #[test]
    fn test_text_only_layout() {
        let data = MachBuilder::new(MachVariant::Bits64)
            .segment("__PAGEZERO", 0, 0)
            .segment("__TEXT", 0, 0x4000)
            .build(0);
        assert_eq!(layout_file_size(data.as_slice()).unwrap(), Some(0x4000));
    }

    #[test]
    fn test_layout_undetermined() {
        let data = MachBuilder::new(MachVariant::Bits64)
            .segment("__PAGEZERO", 0, 0)
            .encryption(0, 0, 0)
            .build(0);
        assert_eq!(layout_file_size(data.as_slice()).unwrap(), None);
    }

    #[test]
    fn test_segment_mappings() {
        let data = MachBuilder::new(MachVariant::Bits32)
            .segment("__TEXT", 0, 0x1000)
            .encryption(0x400, 0xC00, 1)
            .segment("__LINKEDIT", 0x1000, 0x200)
            .build(0);
        let mappings = segment_mappings(data.as_slice()).unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].name(), "__TEXT");
        assert_eq!(mappings[1].name(), "__LINKEDIT");
        assert_eq!(mappings[1].file_end(), Some(0x1200));
        assert!(mappings[0].initprot.contains(VmProt::EXECUTE));
        assert!(mappings[0].to_string().starts_with("__TEXT"));
    }

    #[test]
    fn test_overflowing_segment() {
        let mut data = MachBuilder::new(MachVariant::Bits64)
            .segment("__TEXT", 0, 0x10)
            .build(0);
        // fileoff = u64::MAX
        data[32 + 40..32 + 48].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            layout_file_size(data.as_slice()),
            Err(Error::Parse { offset: 32, .. })
        ));
    }
}

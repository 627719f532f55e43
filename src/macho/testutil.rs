//! Synthetic Mach-O images for unit tests.

use zerocopy::IntoBytes;

use super::constants::*;
use super::parser::MachVariant;
use super::structs::*;

/// Builds a little-endian Mach-O image from a list of load commands.
pub struct MachBuilder {
    variant: MachVariant,
    commands: Vec<Vec<u8>>,
}

impl MachBuilder {
    pub fn new(variant: MachVariant) -> Self {
        Self {
            variant,
            commands: Vec::new(),
        }
    }

    pub fn segment(mut self, name: &str, fileoff: u64, filesize: u64) -> Self {
        let prot = (VmProt::READ | VmProt::EXECUTE).bits();
        let bytes = match self.variant {
            MachVariant::Bits32 => SegmentCommand32 {
                segname: encode_segname(name),
                vmaddr: 0x4000 + fileoff as u32,
                vmsize: filesize as u32,
                fileoff: fileoff as u32,
                filesize: filesize as u32,
                maxprot: prot,
                initprot: prot,
                ..Default::default()
            }
            .as_bytes()
            .to_vec(),
            MachVariant::Bits64 => SegmentCommand64 {
                segname: encode_segname(name),
                vmaddr: 0x1_0000_0000 + fileoff,
                vmsize: filesize,
                fileoff,
                filesize,
                maxprot: prot,
                initprot: prot,
                ..Default::default()
            }
            .as_bytes()
            .to_vec(),
        };
        self.commands.push(bytes);
        self
    }

    pub fn encryption(mut self, cryptoff: u32, cryptsize: u32, cryptid: u32) -> Self {
        let bytes = match self.variant {
            MachVariant::Bits32 => EncryptionInfoCommand {
                cmd: LC_ENCRYPTION_INFO,
                cmdsize: EncryptionInfoCommand::SIZE as u32,
                cryptoff,
                cryptsize,
                cryptid,
            }
            .as_bytes()
            .to_vec(),
            MachVariant::Bits64 => EncryptionInfoCommand64 {
                cmd: LC_ENCRYPTION_INFO_64,
                cmdsize: EncryptionInfoCommand64::SIZE as u32,
                cryptoff,
                cryptsize,
                cryptid,
                pad: 0,
            }
            .as_bytes()
            .to_vec(),
        };
        self.commands.push(bytes);
        self
    }

    pub fn raw(mut self, cmd: u32, payload: &[u8]) -> Self {
        let mut bytes = LoadCommand {
            cmd,
            cmdsize: (LoadCommand::SIZE + payload.len()) as u32,
        }
        .as_bytes()
        .to_vec();
        bytes.extend_from_slice(payload);
        self.commands.push(bytes);
        self
    }

    /// Returns the image, padded with a byte pattern up to `min_len`.
    pub fn build(self, min_len: usize) -> Vec<u8> {
        let sizeofcmds: usize = self.commands.iter().map(Vec::len).sum();
        let ncmds = self.commands.len() as u32;

        let mut data = match self.variant {
            MachVariant::Bits32 => MachHeader32 {
                magic: MH_MAGIC,
                cputype: CPU_TYPE_ARM,
                cpusubtype: 9,
                filetype: MH_EXECUTE,
                ncmds,
                sizeofcmds: sizeofcmds as u32,
                flags: 0,
            }
            .as_bytes()
            .to_vec(),
            MachVariant::Bits64 => MachHeader64 {
                magic: MH_MAGIC_64,
                cputype: CPU_TYPE_ARM64,
                cpusubtype: 0,
                filetype: MH_EXECUTE,
                ncmds,
                sizeofcmds: sizeofcmds as u32,
                flags: 0,
                reserved: 0,
            }
            .as_bytes()
            .to_vec(),
        };

        for cmd in &self.commands {
            data.extend_from_slice(cmd);
        }

        let used = data.len();
        if min_len > used {
            data.extend((used..min_len).map(|i| (i % 251) as u8));
        }
        data
    }
}

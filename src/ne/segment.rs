//! On-disk segment descriptors (spec §6: 8 bytes each) and the flags byte
//! that decides a segment's loader rights, generalized from the teacher's
//! `exe286::segtab::NeSegmentHeader`.

use crate::reader::{ByteReader, ReaderError};
use bitflags::bitflags;

pub const DESCRIPTOR_LEN: usize = 8;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u16 {
        const DATA        = 0x0001;
        const ALLOC       = 0x0002;
        const LOADED      = 0x0004;
        const MOVABLE     = 0x0010;
        const SHARED      = 0x0020;
        const PRELOAD     = 0x0040;
        const EXECUTE_RO  = 0x0080;
        const RELOC       = 0x0100;
        const DISCARDABLE = 0xF000;
    }
}

/// One 8-byte record from the NE segment table, decoded verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// File offset in alignment-shifted units; 0 means the segment has no
    /// backing file data (a BSS prototype, spec §3).
    pub sector_base: u16,
    /// On-disk length; 0 means 0x1_0000 (spec §6).
    pub sector_length: u16,
    pub flags: SegmentFlags,
    pub min_alloc_raw: u16,
}

impl SegmentDescriptor {
    pub fn read(reader: &mut ByteReader, index: usize) -> Result<Self, ReaderError> {
        let base = reader.read_u16_le()?;
        let length = reader.read_u16_le()?;
        let flags = reader.read_u16_le()?;
        let min_alloc = reader.read_u16_le()?;
        let _ = index;
        Ok(Self {
            sector_base: base,
            sector_length: length,
            flags: SegmentFlags::from_bits_retain(flags),
            min_alloc_raw: min_alloc,
        })
    }

    pub fn is_bss(&self) -> bool {
        self.sector_base == 0
    }

    pub fn on_disk_length(&self) -> u32 {
        if self.sector_length == 0 {
            0x1_0000
        } else {
            self.sector_length as u32
        }
    }

    pub fn min_alloc(&self) -> u32 {
        if self.min_alloc_raw == 0 {
            0x1_0000
        } else {
            self.min_alloc_raw as u32
        }
    }

    pub fn file_offset(&self, alignment_shift: u32) -> u64 {
        (self.sector_base as u64) << alignment_shift
    }

    pub fn has_relocations(&self) -> bool {
        self.flags.contains(SegmentFlags::RELOC)
    }

    pub fn is_movable(&self) -> bool {
        self.flags.contains(SegmentFlags::MOVABLE)
    }

    pub fn is_discardable(&self) -> bool {
        // DISCARDABLE occupies the high nibble as a priority value, not a
        // set of independent bits; a segment is discardable if any of
        // those bits is set, not only when all four are.
        self.flags.intersects(SegmentFlags::DISCARDABLE)
    }

    pub fn is_data(&self) -> bool {
        self.flags.contains(SegmentFlags::DATA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_two_segment_descriptors() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u16.to_le_bytes()); // sector_base
        buf.extend_from_slice(&0x1000u16.to_le_bytes()); // sector_length
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags: CODE
        buf.extend_from_slice(&0x1000u16.to_le_bytes()); // min_alloc
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0x1000u16.to_le_bytes());
        buf.extend_from_slice(&SegmentFlags::DATA.bits().to_le_bytes());
        buf.extend_from_slice(&0x1000u16.to_le_bytes());

        let mut reader = ByteReader::new(&buf);
        let seg0 = SegmentDescriptor::read(&mut reader, 0).unwrap();
        let seg1 = SegmentDescriptor::read(&mut reader, 1).unwrap();

        assert!(!seg0.is_data());
        assert!(seg1.is_data());
        assert_eq!(seg0.on_disk_length(), 0x1000);
        assert_eq!(seg1.min_alloc(), 0x1000);
    }
}

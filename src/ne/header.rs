//! The "NE" (New Executable) inner header: 64 bytes of relative pointers
//! and counts that everything else in `crate::ne` is positioned against.
//!
//! Field layout and offsets follow spec.md §6 exactly; names keep the
//! teacher's `e_`-prefixed convention (`exe286::header::NewExecutableHeader`).

use crate::reader::ByteReader;
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

pub const NE_MAGIC: u16 = 0x454E; // 'NE'
pub const NE_CIGAM: u16 = 0x4E45;
pub const INNER_HEADER_LEN: usize = 0x40;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct NeHeader {
    pub e_magic: [u8; 2],
    pub e_link_maj: u8,
    pub e_link_min: u8,
    pub e_ent_tab: u16,
    pub e_cb_ent: u16,
    pub e_load_crc: u32,
    pub e_flags: u16,
    pub e_autodata: u16,
    pub e_heap: u16,
    pub e_stack: u16,
    pub e_csip: u32,
    pub e_sssp: u32,
    pub e_cseg: u16,
    pub e_cmod: u16,
    pub e_cbnres: u16,
    pub e_seg_tab: u16,
    pub e_rsrc_tab: u16,
    pub e_resn_tab: u16,
    pub e_mod_tab: u16,
    pub e_imp_tab: u16,
    pub e_nres_tab: u32,
    pub e_cmov_ent: u16,
    pub e_align: u16,
    pub e_crsrc: u16,
    pub e_os: u8,
    pub e_flag_others: u8,
    pub e_ret_thunk: u16,
    pub e_segref_thunk: u16,
    pub min_code_swap: u16,
    pub expected_win_ver: [u8; 2],
}

bitflags! {
    /// Program-flags / application-flags packed into `e_flags` (spec §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModuleFlags: u16 {
        const SINGLE_DATA      = 0x0001;
        const MULTIPLE_DATA    = 0x0002;
        const PROTECTED_MODE   = 0x0008;
        const FULL_SCREEN      = 0x0100;
        const COMPAT_WIN_API   = 0x0200;
        const USES_WIN_API     = 0x0300;
        const LINK_ERRORS      = 0x2000;
        const LIBRARY_MODULE   = 0x8000;
    }
}

impl NeHeader {
    /// Decodes the 64-byte inner header at `reader`'s `offset` (already
    /// validated by the caller to be `offset + 64 <= buf.len()`).
    pub fn read(reader: &ByteReader, offset: usize) -> Self {
        let raw = reader
            .slice_at(offset, INNER_HEADER_LEN)
            .expect("caller validates bounds before calling NeHeader::read");
        let mut buf = [0u8; INNER_HEADER_LEN];
        buf.copy_from_slice(raw);
        bytemuck::cast(buf)
    }

    pub fn is_valid_magic(&self) -> bool {
        matches!(u16::from_le_bytes(self.e_magic), NE_MAGIC | NE_CIGAM)
    }

    pub fn flags(&self) -> ModuleFlags {
        ModuleFlags::from_bits_retain(self.e_flags)
    }

    /// Alignment shift defaults to 9 (512-byte sectors) when the file
    /// stores zero, matching the teacher's `exe286::segtab` convention.
    pub fn alignment_shift(&self) -> u32 {
        if self.e_align == 0 {
            9
        } else {
            self.e_align as u32
        }
    }

    /// True when the header's own fields are mutually contradictory
    /// enough that nothing downstream could make sense of them.
    pub fn is_self_consistent(&self) -> bool {
        self.e_align <= 16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(cseg: u16, align: u16) -> Vec<u8> {
        let mut buf = vec![0u8; INNER_HEADER_LEN];
        buf[0] = b'N';
        buf[1] = b'E';
        buf[0x1C..0x1E].copy_from_slice(&cseg.to_le_bytes());
        buf[0x32..0x34].copy_from_slice(&align.to_le_bytes());
        buf
    }

    #[test]
    fn decodes_segment_count_and_alignment() {
        let buf = header_bytes(2, 4);
        let reader = ByteReader::new(&buf);
        let header = NeHeader::read(&reader, 0);
        assert!(header.is_valid_magic());
        assert_eq!(header.e_cseg, 2);
        assert_eq!(header.alignment_shift(), 4);
    }

    #[test]
    fn zero_alignment_defaults_to_nine() {
        let buf = header_bytes(0, 0);
        let reader = ByteReader::new(&buf);
        let header = NeHeader::read(&reader, 0);
        assert_eq!(header.alignment_shift(), 9);
    }
}

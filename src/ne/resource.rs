//! Resource directory: spec §1 explicitly keeps resource *contents*
//! (dialogs, menus, accelerators) out of scope and treats them as opaque
//! bytes, but the loader still has to walk the directory far enough to
//! know where it ends and what (type, id, segment offset, length) each
//! resource is, so later tables parse at the right file offset
//! (SPEC_FULL.md §C).

use crate::reader::ByteReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceEntry {
    pub type_id: u16,
    pub resource_id: u16,
    /// Offset in alignment-shifted units, same unit as segment
    /// `sector_base` (spec §6).
    pub sector_offset: u16,
    pub sector_length: u16,
    pub flags: u16,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceTable {
    pub alignment_shift: u16,
    pub entries: Vec<ResourceEntry>,
}

impl ResourceTable {
    /// Walks TYPEINFO/NAMEINFO records starting at `offset` until a
    /// TYPEINFO with `type_id == 0` (terminator) or the buffer runs out.
    /// A malformed directory simply yields whatever was decoded so far,
    /// the same truncate-don't-fail posture as the other tables.
    pub fn read(reader: &ByteReader, offset: usize) -> Self {
        let mut entries = Vec::new();
        let alignment_shift = reader.u16_le_at(offset).unwrap_or(0);
        let mut cursor = offset + 2;

        loop {
            let type_id = match reader.u16_le_at(cursor) {
                Ok(v) => v,
                Err(_) => break,
            };
            if type_id == 0 {
                break;
            }
            let count = match reader.u16_le_at(cursor + 2) {
                Ok(v) => v,
                Err(_) => break,
            };
            // type_id(2) + count(2) + reserved(4)
            cursor += 8;

            let mut ok = true;
            for _ in 0..count {
                let (so, sl, fl, id) = (
                    reader.u16_le_at(cursor),
                    reader.u16_le_at(cursor + 2),
                    reader.u16_le_at(cursor + 4),
                    reader.u16_le_at(cursor + 6),
                );
                match (so, sl, fl, id) {
                    (Ok(so), Ok(sl), Ok(fl), Ok(id)) => {
                        entries.push(ResourceEntry {
                            type_id,
                            resource_id: id,
                            sector_offset: so,
                            sector_length: sl,
                            flags: fl,
                        });
                    }
                    _ => {
                        ok = false;
                        break;
                    }
                }
                // rnOffset, rnLength, rnFlags, rnID, rnHandle, rnUsage = 12 bytes
                cursor += 12;
            }
            if !ok {
                break;
            }
        }

        Self {
            alignment_shift,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directory_is_just_the_terminator() {
        let buf = [4u8, 0, 0, 0];
        let reader = ByteReader::new(&buf);
        let table = ResourceTable::read(&reader, 0);
        assert_eq!(table.alignment_shift, 4);
        assert!(table.entries.is_empty());
    }

    #[test]
    fn single_typeinfo_with_one_nameinfo() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u16.to_le_bytes()); // align shift
        buf.extend_from_slice(&0x8001u16.to_le_bytes()); // type id
        buf.extend_from_slice(&1u16.to_le_bytes()); // count
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved
        buf.extend_from_slice(&0x10u16.to_le_bytes()); // offset
        buf.extend_from_slice(&0x20u16.to_le_bytes()); // length
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&7u16.to_le_bytes()); // id
        buf.extend_from_slice(&0u16.to_le_bytes()); // handle
        buf.extend_from_slice(&0u16.to_le_bytes()); // usage
        buf.extend_from_slice(&0u16.to_le_bytes()); // terminator type id

        let reader = ByteReader::new(&buf);
        let table = ResourceTable::read(&reader, 0);
        assert_eq!(table.entries.len(), 1);
        assert_eq!(table.entries[0].resource_id, 7);
        assert_eq!(table.entries[0].sector_offset, 0x10);
    }
}

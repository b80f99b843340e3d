//! Entry table: the bundle-encoded sequence of exported entry points
//! (spec §4.2, §6). This module only decodes bundles into ordinal-ordered
//! records; attaching names from the resident-name table is
//! `crate::resolve`'s job, not this one's (spec §4.2 splits the two
//! passes deliberately).
//!
//! Bundle layout and the "truncated bundle terminates without erroring"
//! rule are carried over from the teacher's `exe286::enttab`, generalized
//! to read from a `ByteReader` instead of a seekable file.

use crate::reader::ByteReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedEntry {
    pub segment: u8,
    pub flags: u8,
    pub offset: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovableEntry {
    pub flags: u8,
    pub segment: u8,
    pub offset: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Unused,
    Fixed(FixedEntry),
    Movable(MovableEntry),
}

#[derive(Debug, Clone, Default)]
pub struct EntryTable {
    /// Index `i` holds the record for ordinal `i + 1` (ordinals start at 1,
    /// spec GLOSSARY).
    pub entries: Vec<Entry>,
}

impl EntryTable {
    /// Reads at most `cb_ent_tab` bytes of bundles starting at `offset`.
    /// A bundle whose declared size would run past `cb_ent_tab` stops the
    /// scan silently; everything read so far is kept (spec §4.2).
    pub fn read(reader: &ByteReader, offset: usize, cb_ent_tab: u16) -> Self {
        let mut entries = Vec::new();
        let mut cursor = offset;
        let mut remaining = cb_ent_tab as usize;

        while remaining >= 2 {
            let count = match reader.u8_at(cursor) {
                Ok(b) => b,
                Err(_) => break,
            };
            let seg_id = match reader.u8_at(cursor + 1) {
                Ok(b) => b,
                Err(_) => break,
            };
            cursor += 2;
            remaining -= 2;

            if count == 0 {
                // End-of-table marker (spec §4.2).
                break;
            }

            if seg_id == 0 {
                for _ in 0..count {
                    entries.push(Entry::Unused);
                }
                continue;
            }

            let record_len: usize = if seg_id == 0xFF { 6 } else { 3 };
            let bundle_len = record_len * count as usize;
            if bundle_len > remaining {
                // Truncated bundle: stop without erroring (spec §4.2).
                break;
            }

            let mut ok = true;
            let mut pending = Vec::with_capacity(count as usize);
            for i in 0..count as usize {
                let rec_off = cursor + i * record_len;
                let entry = if seg_id == 0xFF {
                    match (
                        reader.u8_at(rec_off),
                        reader.u8_at(rec_off + 3),
                        reader.u16_le_at(rec_off + 4),
                    ) {
                        (Ok(flags), Ok(segment), Ok(off)) => Entry::Movable(MovableEntry {
                            flags,
                            segment,
                            offset: off,
                        }),
                        _ => {
                            ok = false;
                            break;
                        }
                    }
                } else {
                    match (reader.u8_at(rec_off), reader.u16_le_at(rec_off + 1)) {
                        (Ok(flags), Ok(off)) => Entry::Fixed(FixedEntry {
                            segment: seg_id,
                            flags,
                            offset: off,
                        }),
                        _ => {
                            ok = false;
                            break;
                        }
                    }
                };
                pending.push(entry);
            }

            if !ok {
                break;
            }

            entries.extend(pending);
            cursor += bundle_len;
            remaining -= bundle_len;
        }

        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_bundle_with_two_entries() {
        // bundle header: count=2, seg=1; then two 3-byte records.
        let mut buf = vec![2u8, 1, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00];
        buf.extend_from_slice(&[0u8, 0]); // terminator
        let reader = ByteReader::new(&buf);
        let table = EntryTable::read(&reader, 0, buf.len() as u16);
        assert_eq!(table.entries.len(), 2);
        assert!(matches!(table.entries[0], Entry::Fixed(FixedEntry { segment: 1, offset: 0, .. })));
        assert!(matches!(table.entries[1], Entry::Fixed(FixedEntry { segment: 1, offset: 1, .. })));
    }

    #[test]
    fn truncated_bundle_stops_without_error() {
        // Declares 5 fixed entries (15 bytes) but only 4 bytes remain.
        let buf = vec![5u8, 1, 0xAA, 0xBB, 0xCC, 0xDD];
        let reader = ByteReader::new(&buf);
        let table = EntryTable::read(&reader, 0, buf.len() as u16);
        assert!(table.entries.is_empty());
    }

    #[test]
    fn null_bundle_advances_ordinal_counter_without_records() {
        let mut buf = vec![3u8, 0]; // 3 unused entries
        buf.extend_from_slice(&[0u8, 0]);
        let reader = ByteReader::new(&buf);
        let table = EntryTable::read(&reader, 0, buf.len() as u16);
        assert_eq!(table.entries.len(), 3);
        assert!(table.entries.iter().all(|e| matches!(e, Entry::Unused)));
    }
}

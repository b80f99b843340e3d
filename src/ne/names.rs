//! Resident and non-resident name tables: both are the same on-disk shape
//! (length-prefixed ASCII string, then a 2-byte entry-table ordinal),
//! generalized from the teacher's `exe286::resntab`.

use crate::reader::ByteReader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    pub name: Vec<u8>,
    pub ordinal: u16,
}

#[derive(Debug, Clone, Default)]
pub struct NameTable {
    pub entries: Vec<NameEntry>,
}

impl NameTable {
    /// Reads records until a zero-length prefix (end marker) or until the
    /// buffer runs out, whichever comes first. Never errors: a table that
    /// runs off the end of the buffer is simply truncated there, matching
    /// how the entry table handles truncation (spec §4.2's sibling rule
    /// applied to the equally length-delimited name tables).
    pub fn read(reader: &ByteReader, offset: usize) -> Self {
        let mut entries = Vec::new();
        let mut cursor = offset;

        loop {
            let len = match reader.u8_at(cursor) {
                Ok(l) => l,
                Err(_) => break,
            };
            if len == 0 {
                break;
            }
            cursor += 1;
            let name = match reader.slice_at(cursor, len as usize) {
                Ok(s) => s.to_vec(),
                Err(_) => break,
            };
            cursor += len as usize;
            let ordinal = match reader.u16_le_at(cursor) {
                Ok(o) => o,
                Err(_) => break,
            };
            cursor += 2;
            entries.push(NameEntry { name, ordinal });
        }

        Self { entries }
    }

    /// The module's own name is the first resident-name record, always at
    /// ordinal 0 (spec §3). It is not a real export and callers that want
    /// only the exports should skip it (see `crate::resolve`).
    pub fn module_name(&self) -> Option<&[u8]> {
        self.entries.first().map(|e| e.name.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pascal_record(name: &str, ordinal: u16) -> Vec<u8> {
        let mut buf = vec![name.len() as u8];
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&ordinal.to_le_bytes());
        buf
    }

    #[test]
    fn reads_module_name_then_exports() {
        let mut buf = pascal_record("KERNEL", 0);
        buf.extend(pascal_record("GlobalAlloc", 15));
        buf.extend(pascal_record("_lopen", 81));
        buf.push(0); // terminator

        let reader = ByteReader::new(&buf);
        let table = NameTable::read(&reader, 0);
        assert_eq!(table.entries.len(), 3);
        assert_eq!(table.module_name(), Some(&b"KERNEL"[..]));
        assert_eq!(table.entries[1].name, b"GlobalAlloc");
        assert_eq!(table.entries[1].ordinal, 15);
    }

    #[test]
    fn empty_table_has_no_module_name() {
        let buf = [0u8];
        let reader = ByteReader::new(&buf);
        let table = NameTable::read(&reader, 0);
        assert!(table.entries.is_empty());
        assert_eq!(table.module_name(), None);
    }
}

//! Module-reference table (array of offsets into the imported-name table)
//! and the imported-name table itself, generalized from the teacher's
//! `exe286::modtab`.

use crate::reader::ByteReader;

/// One `u16` per referenced module, each an offset into the imported-name
/// table (relative to that table's own start, spec §3).
#[derive(Debug, Clone, Default)]
pub struct ModuleRefTable {
    pub offsets: Vec<u16>,
}

impl ModuleRefTable {
    pub fn read(reader: &ByteReader, offset: usize, count: u16) -> Self {
        let mut offsets = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            match reader.u16_le_at(offset + i * 2) {
                Ok(v) => offsets.push(v),
                Err(_) => break,
            }
        }
        Self { offsets }
    }
}

/// Owned copy of the imported-name table's raw bytes (Pascal strings back
/// to back). Names are looked up by byte offset, not sequential index,
/// since that's how both module-reference entries and import relocation
/// records address them (spec §4.3, §6).
#[derive(Debug, Clone, Default)]
pub struct ImportedNameTable {
    pub bytes: Vec<u8>,
}

impl ImportedNameTable {
    pub fn read(reader: &ByteReader, start: usize, end: usize) -> Self {
        if end <= start {
            return Self { bytes: Vec::new() };
        }
        let bytes = reader
            .slice_at(start, end - start)
            .map(|s| s.to_vec())
            .unwrap_or_default();
        Self { bytes }
    }

    /// Reads the Pascal string at byte offset `at` within this table.
    pub fn name_at(&self, at: u16) -> Option<&[u8]> {
        let at = at as usize;
        let len = *self.bytes.get(at)? as usize;
        self.bytes.get(at + 1..at + 1 + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_module_offsets() {
        let buf = [0x04u8, 0x00, 0x0Bu8, 0x00];
        let reader = ByteReader::new(&buf);
        let table = ModuleRefTable::read(&reader, 0, 2);
        assert_eq!(table.offsets, vec![4, 11]);
    }

    #[test]
    fn name_at_offset_reads_pascal_string() {
        let mut buf = vec![6u8];
        buf.extend_from_slice(b"KERNEL");
        let table = ImportedNameTable { bytes: buf };
        assert_eq!(table.name_at(0), Some(&b"KERNEL"[..]));
    }
}

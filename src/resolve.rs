//! Import/export resolver (spec §4.2): pairs the decoded entry table
//! with the resident-name table into a lookup-able export table, and
//! keeps a diagnostic stub registry for imports that resolve to nothing
//! real yet.
//!
//! Entry-table and name-table decoding themselves live in
//! `crate::ne::entry`/`crate::ne::names`; this module only does the
//! second pass the teacher never had to do (the teacher's `resntab`
//! and `enttab` are read and displayed independently, never joined).

use thiserror::Error;

use crate::ne::entry::{Entry, EntryTable};
use crate::ne::names::NameTable;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    #[error("stub registry is at capacity")]
    Full,
    #[error("no matching entry found")]
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub ordinal: u16,
    pub segment: u8,
    pub offset: u16,
    pub name: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    pub exports: Vec<ExportEntry>,
}

impl ExportTable {
    /// Builds the export table from a decoded entry table and the
    /// resident-name table (spec §4.2, "Export table construction").
    pub fn build(entry_table: &EntryTable, resident_names: &NameTable) -> Self {
        let mut exports = Vec::new();
        for (i, entry) in entry_table.entries.iter().enumerate() {
            let ordinal = (i + 1) as u16;
            let (segment, offset) = match entry {
                Entry::Unused => continue,
                Entry::Fixed(f) => (f.segment, f.offset),
                Entry::Movable(m) => (m.segment, m.offset),
            };
            exports.push(ExportEntry {
                ordinal,
                segment,
                offset,
                name: None,
            });
        }

        // Skip the module-name record (ordinal 0, always first) per
        // spec §4.2; attach every remaining record to its matching
        // ordinal, at most one export per ordinal.
        for record in resident_names.entries.iter().skip(1) {
            if let Some(export) = exports.iter_mut().find(|e| e.ordinal == record.ordinal) {
                export.name = Some(record.name.clone());
            }
        }

        Self { exports }
    }

    pub fn by_ordinal(&self, ordinal: u16) -> Option<&ExportEntry> {
        self.exports.iter().find(|e| e.ordinal == ordinal)
    }

    /// Case-sensitive; an empty name always fails to match (spec §4.2).
    pub fn by_name(&self, name: &[u8]) -> Option<&ExportEntry> {
        if name.is_empty() {
            return None;
        }
        self.exports
            .iter()
            .find(|e| e.name.as_deref() == Some(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubEntry {
    pub module: Vec<u8>,
    pub api_name: Vec<u8>,
    pub ordinal: u16,
    pub behaviour: Vec<u8>,
    pub milestone: Vec<u8>,
    pub removed: bool,
}

/// Bounded, append-only diagnostic registry of (module, ordinal) pairs
/// known to be intentionally unimplemented (spec §3, "Stub entry";
/// §4.2, "Stub registry"). This is never consulted by relocation or
/// lookup — it exists purely for reporting.
#[derive(Debug, Clone)]
pub struct StubRegistry {
    entries: Vec<StubEntry>,
    capacity: usize,
}

impl StubRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    pub fn entries(&self) -> &[StubEntry] {
        &self.entries
    }

    /// Registering the same (module, ordinal) pair twice is idempotent:
    /// the second call is a silent no-op (spec §8's round-trip law).
    pub fn register(
        &mut self,
        module: &[u8],
        ordinal: u16,
        api_name: &[u8],
        behaviour: &[u8],
        milestone: &[u8],
    ) -> Result<(), ResolveError> {
        if self
            .entries
            .iter()
            .any(|e| e.module == module && e.ordinal == ordinal)
        {
            return Ok(());
        }
        if self.entries.len() >= self.capacity {
            return Err(ResolveError::Full);
        }
        self.entries.push(StubEntry {
            module: module.to_vec(),
            api_name: api_name.to_vec(),
            ordinal,
            behaviour: behaviour.to_vec(),
            milestone: milestone.to_vec(),
            removed: false,
        });
        Ok(())
    }

    /// Marks a registered stub as superseded by a real export. The
    /// entry stays visible to enumeration (spec §4.2).
    pub fn replace(&mut self, module: &[u8], ordinal: u16) -> Result<(), ResolveError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.module == module && e.ordinal == ordinal)
            .ok_or(ResolveError::NotFound)?;
        entry.removed = true;
        Ok(())
    }
}

//! Base-module facade (spec §4.8): thin ordinal-dispatch adapters over
//! components 2-8, plus the handful of facilities (file I/O, atom
//! table, non-local exit) that only exist at this outermost layer.
//!
//! Grounded on the (ordinal, name, classification) catalogue shape the
//! teacher uses to pair `exe286::enttab` bundles with `exe286::resntab`
//! records; `original_source/` carried no historical ordinal table for
//! this pack, so the catalogue below is a representative, not a
//! bit-for-bit, reconstruction (documented as an open question in
//! DESIGN.md rather than asserted as authentic).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::panic::{self, UnwindSafe};

use bitflags::bitflags;
use thiserror::Error;

use crate::mem::{GlobalMemFlags, GlobalMemoryTable, MemError};
use crate::module::{ModuleError, ModuleTable};
use crate::resolve::ExportTable;
use crate::task::{Priority, TaskError, TaskTable};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FacadeError {
    #[error("I/O error")]
    Io,
    #[error("no entry with that handle or name")]
    NotFound,
    #[error("table is at capacity")]
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Critical,
    Secondary,
    Optional,
}

#[derive(Debug, Clone, Copy)]
pub struct CatalogueEntry {
    pub ordinal: u16,
    pub name: &'static str,
    pub classification: Classification,
}

/// Static export catalogue for the base module itself (spec §4.8,
/// last paragraph): a loaded client module resolves imports against
/// these (ordinal, name) pairs the same way it would against any
/// other module's resident-name table.
pub static EXPORT_CATALOGUE: &[CatalogueEntry] = &[
    CatalogueEntry { ordinal: 1, name: "GlobalAlloc", classification: Classification::Critical },
    CatalogueEntry { ordinal: 2, name: "GlobalFree", classification: Classification::Critical },
    CatalogueEntry { ordinal: 3, name: "GlobalLock", classification: Classification::Critical },
    CatalogueEntry { ordinal: 4, name: "GlobalUnlock", classification: Classification::Critical },
    CatalogueEntry { ordinal: 5, name: "LocalAlloc", classification: Classification::Critical },
    CatalogueEntry { ordinal: 6, name: "LocalFree", classification: Classification::Critical },
    CatalogueEntry { ordinal: 7, name: "LoadModule", classification: Classification::Critical },
    CatalogueEntry { ordinal: 8, name: "FreeModule", classification: Classification::Critical },
    CatalogueEntry { ordinal: 9, name: "GetProcAddress", classification: Classification::Critical },
    CatalogueEntry { ordinal: 10, name: "Yield", classification: Classification::Critical },
    CatalogueEntry { ordinal: 11, name: "GetCurrentTask", classification: Classification::Secondary },
    CatalogueEntry { ordinal: 12, name: "AddAtom", classification: Classification::Secondary },
    CatalogueEntry { ordinal: 13, name: "DeleteAtom", classification: Classification::Secondary },
    CatalogueEntry { ordinal: 14, name: "FindAtom", classification: Classification::Secondary },
    CatalogueEntry { ordinal: 15, name: "_lopen", classification: Classification::Secondary },
    CatalogueEntry { ordinal: 16, name: "_lclose", classification: Classification::Secondary },
    CatalogueEntry { ordinal: 17, name: "FatalExit", classification: Classification::Optional },
];

pub fn find_catalogue_entry(name: &str) -> Option<&'static CatalogueEntry> {
    EXPORT_CATALOGUE.iter().find(|e| e.name == name)
}

// --- File I/O adapter -------------------------------------------------

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ   = 0x0001;
        const WRITE  = 0x0002;
        const CREATE = 0x0004;
        const TRUNC  = 0x0008;
    }
}

#[derive(Default)]
pub struct FileTable {
    entries: Vec<Option<File>>,
}

impl FileTable {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Handles are 1-based positions into this table's slot array;
    /// closed slots are left empty rather than reused.
    pub fn open(&mut self, path: &str, flags: OpenFlags) -> Result<u32, FacadeError> {
        let file = OpenOptions::new()
            .read(flags.contains(OpenFlags::READ))
            .write(flags.contains(OpenFlags::WRITE))
            .create(flags.contains(OpenFlags::CREATE))
            .truncate(flags.contains(OpenFlags::TRUNC))
            .open(path)
            .map_err(|_| FacadeError::Io)?;

        self.entries.push(Some(file));
        Ok(self.entries.len() as u32)
    }

    fn get_mut(&mut self, handle: u32) -> Result<&mut File, FacadeError> {
        self.entries
            .get_mut(handle as usize - 1)
            .and_then(|e| e.as_mut())
            .ok_or(FacadeError::NotFound)
    }

    pub fn close(&mut self, handle: u32) -> Result<(), FacadeError> {
        let slot = self
            .entries
            .get_mut(handle as usize - 1)
            .ok_or(FacadeError::NotFound)?;
        if slot.is_none() {
            return Err(FacadeError::NotFound);
        }
        *slot = None;
        Ok(())
    }

    pub fn read(&mut self, handle: u32, buf: &mut [u8]) -> Result<usize, FacadeError> {
        self.get_mut(handle)?.read(buf).map_err(|_| FacadeError::Io)
    }

    pub fn write(&mut self, handle: u32, buf: &[u8]) -> Result<usize, FacadeError> {
        self.get_mut(handle)?.write(buf).map_err(|_| FacadeError::Io)
    }

    pub fn seek(&mut self, handle: u32, pos: i64, from_end: bool) -> Result<u64, FacadeError> {
        let whence = if from_end {
            SeekFrom::End(pos)
        } else {
            SeekFrom::Start(pos as u64)
        };
        self.get_mut(handle)?.seek(whence).map_err(|_| FacadeError::Io)
    }
}

// --- Memory adapter -----------------------------------------------------

/// Forwards to the global memory table after resolving the calling
/// task from the task table (spec §4.8, "memory").
pub fn mem_alloc(
    tasks: &TaskTable,
    mem: &mut GlobalMemoryTable,
    size: usize,
    flags: GlobalMemFlags,
) -> Result<u32, MemError> {
    mem.alloc(size, flags, tasks.current_task())
}

// --- Module adapter -------------------------------------------------------

/// Packs a resolved (segment, offset) pair into a 32-bit value,
/// segment in the high half, offset in the low half (spec §4.8).
pub fn get_proc_address(exports: &ExportTable, name: &[u8]) -> Option<u32> {
    let entry = exports.by_name(name)?;
    Some(((entry.segment as u32) << 16) | entry.offset as u32)
}

pub fn get_proc_address_by_ordinal(exports: &ExportTable, ordinal: u16) -> Option<u32> {
    let entry = exports.by_ordinal(ordinal)?;
    Some(((entry.segment as u32) << 16) | entry.offset as u32)
}

pub fn free_module(modules: &mut ModuleTable, handle: u32) -> Result<(), ModuleError> {
    modules.unload(handle)
}

// --- Task adapter ----------------------------------------------------------

pub fn get_current_task(tasks: &TaskTable) -> u32 {
    tasks.current_task()
}

pub fn spawn_task<F>(tasks: &mut TaskTable, priority: Priority, entry: F, arg: usize) -> Result<u32, TaskError>
where
    F: FnOnce(usize) + Send + 'static,
{
    tasks.spawn(priority, entry, arg)
}

// --- Atom table ----------------------------------------------------------

/// Integer atoms below this value are reserved (mirrors the classic
/// convention that small integers distinguish a direct ordinal from
/// an interned atom); first assigned atom is this value.
pub const ATOM_BASE: u16 = 0xC000;

pub struct AtomTable {
    entries: Vec<(u16, Vec<u8>)>,
    capacity: usize,
    next_atom: u16,
}

impl AtomTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            next_atom: ATOM_BASE,
        }
    }

    /// Returns the existing atom if `name` is already registered
    /// (case-sensitive compare); otherwise assigns and returns the
    /// next atom value (spec §4.8).
    pub fn add_atom(&mut self, name: &[u8]) -> Result<u16, FacadeError> {
        if let Some((atom, _)) = self.entries.iter().find(|(_, n)| n == name) {
            return Ok(*atom);
        }
        if self.entries.len() >= self.capacity {
            return Err(FacadeError::Full);
        }
        let atom = self.next_atom;
        self.next_atom = self.next_atom.wrapping_add(1);
        self.entries.push((atom, name.to_vec()));
        Ok(atom)
    }

    pub fn find_atom(&self, name: &[u8]) -> Option<u16> {
        self.entries.iter().find(|(_, n)| n == name).map(|(a, _)| *a)
    }

    /// Removes the entry, shifting the tail down by one (spec §4.8).
    pub fn delete_atom(&mut self, atom: u16) -> Result<(), FacadeError> {
        let pos = self
            .entries
            .iter()
            .position(|(a, _)| *a == atom)
            .ok_or(FacadeError::NotFound)?;
        self.entries.remove(pos);
        Ok(())
    }
}

// --- Non-local exit --------------------------------------------------------

/// Payload unwound by `longjmp`. `save` catches this specific payload
/// and returns its value; any other panic propagates unchanged.
struct NonLocalExit(i32);

/// setjmp/longjmp-style rewind (spec §9): `body` runs; if it (or
/// anything it calls) invokes `longjmp`, `save` returns that value.
/// Otherwise `save` returns whatever `body` returns, which callers are
/// expected to treat as the "0 on first entry" case.
pub fn save<F>(body: F) -> i32
where
    F: FnOnce() -> i32 + UnwindSafe,
{
    match panic::catch_unwind(body) {
        Ok(v) => v,
        Err(payload) => match payload.downcast::<NonLocalExit>() {
            Ok(exit) => exit.0,
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

/// Rewinds to the nearest enclosing `save` with `value` (must be
/// non-zero by convention; spec §9 reserves 0 for "fell through
/// normally"). Tasks must not rewind across the scheduler boundary
/// (spec §9) — in this implementation that means never calling
/// `longjmp` from a point reached only after `task::yield_now` handed
/// control back to the scheduler thread.
pub fn longjmp(value: i32) -> ! {
    panic::panic_any(NonLocalExit(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_atom_is_idempotent_and_counts_once() {
        let mut atoms = AtomTable::new(4);
        let a1 = atoms.add_atom(b"WM_CLASS").unwrap();
        let a2 = atoms.add_atom(b"WM_CLASS").unwrap();
        assert_eq!(a1, a2);
        assert_eq!(atoms.entries.len(), 1);
    }

    #[test]
    fn delete_atom_shifts_tail() {
        let mut atoms = AtomTable::new(4);
        let a = atoms.add_atom(b"A").unwrap();
        let b = atoms.add_atom(b"B").unwrap();
        atoms.delete_atom(a).unwrap();
        assert_eq!(atoms.find_atom(b"B"), Some(b));
        assert!(atoms.find_atom(b"A").is_none());
    }

    #[test]
    fn save_returns_body_value_when_no_jump_occurs() {
        assert_eq!(save(|| 0), 0);
    }

    #[test]
    fn longjmp_rewinds_to_save_with_the_thrown_value() {
        let result = save(|| {
            longjmp(42);
        });
        assert_eq!(result, 42);
    }

    #[test]
    fn get_proc_address_packs_segment_high_offset_low() {
        use crate::ne::entry::{Entry, EntryTable, FixedEntry};
        use crate::ne::names::{NameEntry, NameTable};

        let entries = EntryTable {
            entries: vec![Entry::Fixed(FixedEntry { segment: 2, flags: 0, offset: 0x10 })],
        };
        let names = NameTable {
            entries: vec![
                NameEntry { name: b"MOD".to_vec(), ordinal: 0 },
                NameEntry { name: b"Proc".to_vec(), ordinal: 1 },
            ],
        };
        let exports = ExportTable::build(&entries, &names);
        let packed = get_proc_address(&exports, b"Proc").unwrap();
        assert_eq!(packed, (2u32 << 16) | 0x10);
    }
}

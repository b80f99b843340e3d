//! Module table (spec §4.6): handle-allocated modules with name→handle
//! lookup, reference counts, a bounded dependency list, and an in-use
//! guard on unload.
//!
//! New, like `crate::mem`; the teacher only ever decodes one image at a
//! time and never tracks a population of loaded modules against each
//! other, so there's no direct teacher file to generalize from. The
//! handle-table shape matches `crate::segmgr`/`crate::mem` for
//! consistency across the crate.

use thiserror::Error;

use crate::ne::ParserImage;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ModuleError {
    #[error("module table is at capacity")]
    Full,
    #[error("no live module has that handle or name")]
    NotFound,
    #[error("module still has live dependents")]
    InUse,
    #[error("dependency list is at capacity")]
    DepFull,
}

/// Module names are truncated to this width (spec §3: "name truncated
/// to a fixed width"); 8 bytes matches the base-name convention of the
/// module names this loader actually parses (spec §8 scenario 5 uses
/// the single-byte name "M", well under the limit).
pub const MODULE_NAME_MAX: usize = 8;

#[derive(Debug, Clone)]
pub struct ModuleEntry {
    pub handle: u32,
    pub name: Vec<u8>,
    pub ref_count: u32,
    pub dependencies: Vec<u32>,
    pub parser_image: ParserImage,
    /// Raw file bytes backing demand-reload, same source the segment
    /// manager would be constructed over (spec §4.4's "file image").
    pub loader_image: Option<Vec<u8>>,
}

fn truncate_name(name: &[u8]) -> Vec<u8> {
    name[..name.len().min(MODULE_NAME_MAX)].to_vec()
}

pub struct ModuleTable {
    entries: Vec<Option<ModuleEntry>>,
    capacity: usize,
    next_handle: u32,
    dependency_cap: usize,
}

impl ModuleTable {
    pub fn new(capacity: usize, dependency_cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            next_handle: 1,
            dependency_cap,
        }
    }

    fn alloc_handle(&mut self) -> u32 {
        let h = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        if self.next_handle == 0 {
            self.next_handle = 1;
        }
        h
    }

    pub fn find(&self, handle: u32) -> Option<&ModuleEntry> {
        self.entries.iter().flatten().find(|m| m.handle == handle)
    }

    pub fn find_by_name(&self, name: &[u8]) -> Option<&ModuleEntry> {
        let name = truncate_name(name);
        self.entries.iter().flatten().find(|m| m.name == name)
    }

    /// Loading a module already present just bumps its reference count
    /// and returns the existing handle (spec §4.6, §8 scenario 5); the
    /// newly supplied images are dropped in that case.
    pub fn load(
        &mut self,
        name: &[u8],
        parser_image: ParserImage,
        loader_image: Option<Vec<u8>>,
    ) -> Result<u32, ModuleError> {
        let truncated = truncate_name(name);
        if let Some(existing) = self
            .entries
            .iter_mut()
            .flatten()
            .find(|m| m.name == truncated)
        {
            existing.ref_count += 1;
            return Ok(existing.handle);
        }

        let slot = if let Some(i) = self.entries.iter().position(|e| e.is_none()) {
            i
        } else {
            if self.entries.len() >= self.capacity {
                return Err(ModuleError::Full);
            }
            self.entries.push(None);
            self.entries.len() - 1
        };

        let handle = self.alloc_handle();
        self.entries[slot] = Some(ModuleEntry {
            handle,
            name: truncated,
            ref_count: 1,
            dependencies: Vec::new(),
            parser_image,
            loader_image,
        });
        Ok(handle)
    }

    /// Decrements the reference count. At zero, fails with `InUse` (and
    /// leaves the count at zero) if any other live module still
    /// depends on this handle; otherwise releases the slot.
    pub fn unload(&mut self, handle: u32) -> Result<(), ModuleError> {
        let slot = self
            .entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|m| m.handle == handle))
            .ok_or(ModuleError::NotFound)?;

        {
            let entry = self.entries[slot].as_mut().unwrap();
            entry.ref_count = entry.ref_count.saturating_sub(1);
            if entry.ref_count > 0 {
                return Ok(());
            }
        }

        let still_depended_on = self
            .entries
            .iter()
            .flatten()
            .any(|m| m.handle != handle && m.dependencies.contains(&handle));
        if still_depended_on {
            return Err(ModuleError::InUse);
        }

        self.entries[slot] = None;
        Ok(())
    }

    /// Validates both handles are live, silently deduplicates, and
    /// fails with `DepFull` if the dependency list is already at
    /// capacity.
    pub fn add_dependency(&mut self, handle: u32, dep_handle: u32) -> Result<(), ModuleError> {
        if self.find(dep_handle).is_none() {
            return Err(ModuleError::NotFound);
        }
        let entry = self
            .entries
            .iter_mut()
            .flatten()
            .find(|m| m.handle == handle)
            .ok_or(ModuleError::NotFound)?;
        if entry.dependencies.contains(&dep_handle) {
            return Ok(());
        }
        if entry.dependencies.len() >= self.dependency_cap {
            return Err(ModuleError::DepFull);
        }
        entry.dependencies.push(dep_handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_image() -> ParserImage {
        let mut buf = vec![0u8; 64 + 64];
        buf[0] = b'M';
        buf[1] = b'Z';
        buf[crate::mz::E_LFANEW_OFFSET..crate::mz::E_LFANEW_OFFSET + 4]
            .copy_from_slice(&64u32.to_le_bytes());
        buf[64] = b'N';
        buf[65] = b'E';
        ParserImage::parse(&buf).expect("dummy image should parse")
    }

    #[test]
    fn scenario_5_dedup_and_unload() {
        let mut table = ModuleTable::new(4, 8);
        let h1 = table.load(b"M", dummy_image(), None).unwrap();
        let h2 = table.load(b"M", dummy_image(), None).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(table.find(h1).unwrap().ref_count, 2);

        table.unload(h1).unwrap();
        assert!(table.find(h1).is_some());
        table.unload(h1).unwrap();
        assert!(table.find(h1).is_none());
    }

    #[test]
    fn unload_with_live_dependent_fails_in_use() {
        let mut table = ModuleTable::new(4, 8);
        let base = table.load(b"BASE", dummy_image(), None).unwrap();
        let dependent = table.load(b"APP", dummy_image(), None).unwrap();
        table.add_dependency(dependent, base).unwrap();

        assert_eq!(table.unload(base), Err(ModuleError::InUse));
        assert_eq!(table.find(base).unwrap().ref_count, 0);
    }

    #[test]
    fn dependency_dedup_and_cap() {
        let mut table = ModuleTable::new(4, 1);
        let a = table.load(b"A", dummy_image(), None).unwrap();
        let b = table.load(b"B", dummy_image(), None).unwrap();
        let c = table.load(b"C", dummy_image(), None).unwrap();

        table.add_dependency(a, b).unwrap();
        table.add_dependency(a, b).unwrap(); // silently deduplicated
        assert_eq!(table.find(a).unwrap().dependencies.len(), 1);

        assert_eq!(table.add_dependency(a, c), Err(ModuleError::DepFull));
    }

    #[test]
    fn name_longer_than_max_is_truncated_for_dedup() {
        let mut table = ModuleTable::new(4, 8);
        let long_a = b"ABCDEFGHIJK";
        let long_b = b"ABCDEFGHZZZ"; // same first 8 bytes
        let h1 = table.load(long_a, dummy_image(), None).unwrap();
        let h2 = table.load(long_b, dummy_image(), None).unwrap();
        assert_eq!(h1, h2);
    }
}

//! Live segment manager (spec §4.4): a handle table of in-memory
//! segment entries, distinct from `ne::segment::SegmentDescriptor` (the
//! on-disk record this table is populated *from*). Generalizes the
//! teacher's `exe286::segtab::NeSegmentHeader`, which only ever decodes
//! and displays the on-disk flags, into a live, mutable table with
//! register/lock/unlock/evict/reload/compact.

use bitflags::bitflags;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    #[error("segment table is at capacity")]
    Full,
    #[error("no live segment has that handle")]
    NotFound,
    #[error("segment is not discardable")]
    NotDisc,
    #[error("segment is locked")]
    Locked,
    #[error("segment is not loaded")]
    NotLoaded,
    #[error("no file image is attached for reload")]
    NoFile,
    #[error("file offset/length reads past the end of the attached image")]
    BadOffset,
    #[error("allocation failure")]
    Alloc,
    #[error("no buffer or table supplied")]
    NullArg,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SegmentState: u8 {
        const LOADED      = 0x01;
        const EVICTED     = 0x02;
        const MOVABLE     = 0x04;
        const DISCARDABLE = 0x08;
    }
}

/// One live segment entry (spec §3, "Segment entry").
#[derive(Debug, Clone, Default)]
pub struct SegmentEntry {
    pub handle: u32,
    pub source_flags: u16,
    pub state: SegmentState,
    pub data: Option<Vec<u8>>,
    pub allocated: usize,
    pub file_offset: u64,
    pub file_length: u32,
    pub lock_count: u32,
}

impl SegmentEntry {
    fn is_live(&self) -> bool {
        self.handle != 0
    }
}

pub struct SegmentManager<'a> {
    entries: Vec<SegmentEntry>,
    capacity: usize,
    next_handle: u32,
    file_image: Option<&'a [u8]>,
}

impl<'a> SegmentManager<'a> {
    /// `capacity` of 0 is rejected: init on zero capacity fails
    /// deterministically (spec §3, "Lifecycle").
    pub fn new(capacity: usize) -> Result<Self, SegmentError> {
        if capacity == 0 {
            return Err(SegmentError::NullArg);
        }
        Ok(Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            next_handle: 1,
            file_image: None,
        })
    }

    pub fn with_file_image(mut self, image: &'a [u8]) -> Self {
        self.file_image = Some(image);
        self
    }

    fn alloc_handle(&mut self) -> u32 {
        let h = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        if self.next_handle == 0 {
            self.next_handle = 1;
        }
        h
    }

    /// Transfers ownership of `data` (or none, for BSS) into a fresh
    /// entry, assigns a handle, and marks it LOADED.
    pub fn register(
        &mut self,
        source_flags: u16,
        data: Option<Vec<u8>>,
        file_offset: u64,
        file_length: u32,
        movable: bool,
        discardable: bool,
    ) -> Result<u32, SegmentError> {
        if self.entries.len() >= self.capacity {
            return Err(SegmentError::Full);
        }
        let handle = self.alloc_handle();
        let allocated = data.as_ref().map(|d| d.len()).unwrap_or(0);
        let mut state = SegmentState::LOADED;
        if movable {
            state |= SegmentState::MOVABLE;
        }
        if discardable {
            state |= SegmentState::DISCARDABLE;
        }
        self.entries.push(SegmentEntry {
            handle,
            source_flags,
            state,
            data,
            allocated,
            file_offset,
            file_length,
            lock_count: 0,
        });
        Ok(handle)
    }

    fn find_mut(&mut self, handle: u32) -> Result<&mut SegmentEntry, SegmentError> {
        self.entries
            .iter_mut()
            .find(|e| e.is_live() && e.handle == handle)
            .ok_or(SegmentError::NotFound)
    }

    pub fn find(&self, handle: u32) -> Option<&SegmentEntry> {
        self.entries.iter().find(|e| e.is_live() && e.handle == handle)
    }

    /// Increments the lock count and returns a borrowed view of the
    /// data, iff the segment is LOADED.
    pub fn lock(&mut self, handle: u32) -> Result<&[u8], SegmentError> {
        let entry = self.find_mut(handle)?;
        if !entry.state.contains(SegmentState::LOADED) {
            return Err(SegmentError::NotLoaded);
        }
        entry.lock_count += 1;
        Ok(entry.data.as_deref().unwrap_or(&[]))
    }

    /// Decrements the lock count, never below zero.
    pub fn unlock(&mut self, handle: u32) -> Result<(), SegmentError> {
        let entry = self.find_mut(handle)?;
        entry.lock_count = entry.lock_count.saturating_sub(1);
        Ok(())
    }

    pub fn evict(&mut self, handle: u32) -> Result<(), SegmentError> {
        let entry = self.find_mut(handle)?;
        if !entry.state.contains(SegmentState::DISCARDABLE) {
            return Err(SegmentError::NotDisc);
        }
        if entry.lock_count > 0 {
            return Err(SegmentError::Locked);
        }
        entry.data = None;
        entry.allocated = 0;
        entry.state.remove(SegmentState::LOADED);
        entry.state.insert(SegmentState::EVICTED);
        Ok(())
    }

    /// Demand-reloads an EVICTED entry from the attached file image.
    /// A zero `file_length` (BSS) reload leaves data empty but flips
    /// the state back to LOADED anyway.
    pub fn reload(&mut self, handle: u32) -> Result<(), SegmentError> {
        let file_image = self.file_image;
        let entry = self.find_mut(handle)?;
        if !entry.state.contains(SegmentState::EVICTED) {
            return Err(SegmentError::NotFound);
        }
        if entry.file_length == 0 {
            entry.data = None;
            entry.allocated = 0;
            entry.state.remove(SegmentState::EVICTED);
            entry.state.insert(SegmentState::LOADED);
            return Ok(());
        }
        let image = file_image.ok_or(SegmentError::NoFile)?;
        let start: usize = entry.file_offset.try_into().map_err(|_| SegmentError::BadOffset)?;
        let len = entry.file_length as usize;
        let end = start.checked_add(len).ok_or(SegmentError::BadOffset)?;
        if end > image.len() {
            return Err(SegmentError::BadOffset);
        }
        entry.data = Some(image[start..end].to_vec());
        entry.allocated = len;
        entry.state.remove(SegmentState::EVICTED);
        entry.state.insert(SegmentState::LOADED);
        Ok(())
    }

    /// Re-allocates every MOVABLE, LOADED, unlocked, data-bearing
    /// segment into a fresh buffer, in table order. Returns the number
    /// relocated. A partial failure (allocation) still leaves every
    /// already-moved entry valid (there's nothing here that can
    /// actually fail to allocate in safe Rust other than true OOM, but
    /// the contract is honored: entries processed before a failure
    /// keep their new buffers).
    pub fn compact(&mut self) -> Result<usize, SegmentError> {
        let mut relocated = 0usize;
        for entry in self.entries.iter_mut() {
            if !entry.is_live() {
                continue;
            }
            if !entry.state.contains(SegmentState::MOVABLE)
                || !entry.state.contains(SegmentState::LOADED)
                || entry.lock_count > 0
            {
                continue;
            }
            let Some(old) = entry.data.as_ref() else {
                continue;
            };
            if old.is_empty() {
                continue;
            }
            let fresh = old.clone();
            entry.data = Some(fresh);
            relocated += 1;
        }
        Ok(relocated)
    }

    pub fn free(&mut self, handle: u32) -> Result<(), SegmentError> {
        let entry = self.find_mut(handle)?;
        *entry = SegmentEntry::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_find_then_free_round_trips() {
        let mut mgr = SegmentManager::new(4).unwrap();
        let h = mgr.register(0, Some(vec![1, 2, 3]), 0, 3, false, false).unwrap();
        assert!(mgr.find(h).is_some());
        mgr.free(h).unwrap();
        assert!(mgr.find(h).is_none());
    }

    #[test]
    fn evict_requires_discardable() {
        let mut mgr = SegmentManager::new(4).unwrap();
        let h = mgr.register(0, Some(vec![1]), 0, 1, false, false).unwrap();
        assert_eq!(mgr.evict(h), Err(SegmentError::NotDisc));
    }

    #[test]
    fn locked_segment_cannot_be_evicted() {
        let mut mgr = SegmentManager::new(4).unwrap();
        let h = mgr.register(0, Some(vec![1]), 0, 1, false, true).unwrap();
        mgr.lock(h).unwrap();
        assert_eq!(mgr.evict(h), Err(SegmentError::Locked));
        mgr.unlock(h).unwrap();
        mgr.evict(h).unwrap();
        assert!(mgr.find(h).unwrap().state.contains(SegmentState::EVICTED));
    }

    #[test]
    fn reload_restores_data_from_attached_image() {
        let image = vec![0xAAu8, 0xBB, 0xCC, 0xDD];
        let mut mgr = SegmentManager::new(4).unwrap().with_file_image(&image);
        let h = mgr.register(0, Some(vec![0, 0]), 2, 2, false, true).unwrap();
        mgr.evict(h).unwrap();
        mgr.reload(h).unwrap();
        assert_eq!(mgr.find(h).unwrap().data.as_deref(), Some(&[0xCC, 0xDD][..]));
    }

    #[test]
    fn compact_skips_locked_and_immovable_without_error() {
        let mut mgr = SegmentManager::new(4).unwrap();
        let movable = mgr.register(0, Some(vec![1, 2]), 0, 2, true, false).unwrap();
        let fixed = mgr.register(0, Some(vec![3, 4]), 0, 2, false, false).unwrap();
        mgr.lock(fixed).unwrap();
        let n = mgr.compact().unwrap();
        assert_eq!(n, 1);
        assert_eq!(mgr.find(movable).unwrap().data.as_deref(), Some(&[1, 2][..]));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(SegmentManager::new(0).unwrap_err(), SegmentError::NullArg);
    }
}

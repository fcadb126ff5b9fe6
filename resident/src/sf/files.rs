//! Open File Arena
//!
//! DOS keeps its own SFT entry for every open file; the redirector needs
//! the host root and handle behind it. Those live in a fixed table and the
//! SFT "start cluster" field holds the slot index.
//!
//! That index is a weak back-reference: DOS may hand back an SFT whose
//! slot has since been freed (after close-all, or a stale copy), so every
//! lookup is checked and a dead index is rejected as an invalid handle.

use super::dos::DosError;
use crate::vbox::shfl::{Handle, Root};

/// Maximum number of files open at once on all redirected drives
pub const MAX_OPEN_FILES: usize = 40;

/// Host side of an open file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    pub root: Root,
    pub handle: Handle,
    /// Process that opened the file
    pub psp: u16,
}

#[derive(Clone, Copy)]
enum Slot {
    Used(OpenFile),
    Free { next: Option<u16> },
}

/// Fixed-size table of open files with an intrusive free list
pub struct FileArena {
    slots: [Slot; MAX_OPEN_FILES],
    free_head: Option<u16>,
    used: usize,
}

impl FileArena {
    pub const fn new() -> Self {
        let mut slots = [Slot::Free { next: None }; MAX_OPEN_FILES];
        let mut i = 0;
        while i + 1 < MAX_OPEN_FILES {
            slots[i] = Slot::Free { next: Some(i as u16 + 1) };
            i += 1;
        }
        Self {
            slots,
            free_head: Some(0),
            used: 0,
        }
    }

    /// Take a free slot for `file`, returning its index
    pub fn alloc(&mut self, file: OpenFile) -> Result<u16, DosError> {
        let index = self.free_head.ok_or(DosError::TooManyOpenFiles)?;
        self.free_head = match self.slots[index as usize] {
            Slot::Free { next } => next,
            // the free list only links free slots
            Slot::Used(_) => return Err(DosError::TooManyOpenFiles),
        };
        self.slots[index as usize] = Slot::Used(file);
        self.used += 1;
        Ok(index)
    }

    pub fn get(&self, index: u16) -> Result<OpenFile, DosError> {
        match self.slots.get(index as usize) {
            Some(Slot::Used(file)) => Ok(*file),
            _ => Err(DosError::InvalidHandle),
        }
    }

    /// Release slot `index`, returning what it held
    pub fn free(&mut self, index: u16) -> Result<OpenFile, DosError> {
        let file = self.get(index)?;
        self.slots[index as usize] = Slot::Free { next: self.free_head };
        self.free_head = Some(index);
        self.used -= 1;
        Ok(file)
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }
}

impl Default for FileArena {
    fn default() -> Self {
        Self::new()
    }
}

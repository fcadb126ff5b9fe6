//! Real-mode Memory
//!
//! DOS hands the drivers segment:offset pointers into its own structures
//! (SDA, SFT, CDS, DTA). [`DosMemory`] resolves them to byte slices; the
//! structures themselves are decoded by the modules that own them.

/// Size of the real-mode address space including the HMA
pub const REAL_MODE_LIMIT: usize = 0x10_FFF0;

/// A real-mode segment:offset pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FarPtr {
    pub segment: u16,
    pub offset: u16,
}

impl FarPtr {
    pub const NULL: FarPtr = FarPtr { segment: 0, offset: 0 };

    pub const fn new(segment: u16, offset: u16) -> Self {
        Self { segment, offset }
    }

    /// Decode the in-memory dword layout (offset low, segment high)
    pub const fn from_u32(raw: u32) -> Self {
        Self {
            segment: (raw >> 16) as u16,
            offset: raw as u16,
        }
    }

    pub const fn to_u32(self) -> u32 {
        ((self.segment as u32) << 16) | self.offset as u32
    }

    pub const fn is_null(&self) -> bool {
        self.segment == 0 && self.offset == 0
    }

    /// 20-bit (21 with the HMA) linear address
    pub const fn linear(&self) -> usize {
        ((self.segment as usize) << 4) + self.offset as usize
    }

    /// Pointer `n` bytes further into the same segment
    pub const fn add(self, n: u16) -> Self {
        Self {
            segment: self.segment,
            offset: self.offset.wrapping_add(n),
        }
    }
}

/// Access to conventional memory through far pointers
///
/// `bytes` and `bytes_mut` trust the pointer. Buffers named by an
/// application (cursor masks, status blocks, the DTA) must pass
/// [`DosMemory::contains`] first or go through [`DosMemory::checked`].
pub trait DosMemory {
    /// Bytes addressable from linear address 0
    fn size(&self) -> usize;
    fn bytes(&self, ptr: FarPtr, len: usize) -> &[u8];
    fn bytes_mut(&mut self, ptr: FarPtr, len: usize) -> &mut [u8];

    /// Whether `len` bytes at `ptr` lie inside the addressable range
    fn contains(&self, ptr: FarPtr, len: usize) -> bool {
        ptr.linear()
            .checked_add(len)
            .is_some_and(|end| end <= self.size())
    }

    fn checked(&self, ptr: FarPtr, len: usize) -> Option<&[u8]> {
        self.contains(ptr, len).then(|| self.bytes(ptr, len))
    }

    fn checked_mut(&mut self, ptr: FarPtr, len: usize) -> Option<&mut [u8]> {
        if self.contains(ptr, len) {
            Some(self.bytes_mut(ptr, len))
        } else {
            None
        }
    }

    fn read_u8(&self, ptr: FarPtr) -> u8 {
        self.bytes(ptr, 1)[0]
    }

    fn read_u16(&self, ptr: FarPtr) -> u16 {
        let b = self.bytes(ptr, 2);
        u16::from_le_bytes([b[0], b[1]])
    }

    fn read_u32(&self, ptr: FarPtr) -> u32 {
        let b = self.bytes(ptr, 4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn read_far_ptr(&self, ptr: FarPtr) -> FarPtr {
        FarPtr::from_u32(self.read_u32(ptr))
    }

    fn write_u8(&mut self, ptr: FarPtr, value: u8) {
        self.bytes_mut(ptr, 1)[0] = value;
    }

    fn write_u16(&mut self, ptr: FarPtr, value: u16) {
        self.bytes_mut(ptr, 2).copy_from_slice(&value.to_le_bytes());
    }

    fn write_u32(&mut self, ptr: FarPtr, value: u32) {
        self.bytes_mut(ptr, 4).copy_from_slice(&value.to_le_bytes());
    }

    fn write_far_ptr(&mut self, ptr: FarPtr, value: FarPtr) {
        self.write_u32(ptr, value.to_u32());
    }
}

/// A byte slice standing for memory starting at linear address 0
impl DosMemory for [u8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn bytes(&self, ptr: FarPtr, len: usize) -> &[u8] {
        let start = ptr.linear();
        &self[start..start + len]
    }

    fn bytes_mut(&mut self, ptr: FarPtr, len: usize) -> &mut [u8] {
        let start = ptr.linear();
        &mut self[start..start + len]
    }
}

/// Conventional memory seen through a flat mapping of linear address 0
pub struct ConventionalMemory {
    base: *mut u8,
}

impl ConventionalMemory {
    /// # Safety
    ///
    /// `base` must map at least [`REAL_MODE_LIMIT`] bytes of the real-mode
    /// address space, valid for reads and writes for the lifetime of the
    /// returned value.
    pub const unsafe fn new(base: *mut u8) -> Self {
        Self { base }
    }
}

impl ConventionalMemory {
    /// Start and length clamped to the mapping; never past [`REAL_MODE_LIMIT`]
    fn clamp(ptr: FarPtr, len: usize) -> (usize, usize) {
        let start = ptr.linear().min(REAL_MODE_LIMIT);
        (start, len.min(REAL_MODE_LIMIT - start))
    }
}

impl DosMemory for ConventionalMemory {
    fn size(&self) -> usize {
        REAL_MODE_LIMIT
    }

    fn bytes(&self, ptr: FarPtr, len: usize) -> &[u8] {
        let (start, len) = Self::clamp(ptr, len);
        unsafe { core::slice::from_raw_parts(self.base.add(start), len) }
    }

    fn bytes_mut(&mut self, ptr: FarPtr, len: usize) -> &mut [u8] {
        let (start, len) = Self::clamp(ptr, len);
        unsafe { core::slice::from_raw_parts_mut(self.base.add(start), len) }
    }
}

/// Owned test memory; `[u8]` itself cannot become a `dyn DosMemory`
#[cfg(test)]
pub(crate) struct FlatMemory(pub Vec<u8>);

#[cfg(test)]
impl FlatMemory {
    /// One megabyte plus the HMA, zeroed
    pub fn new() -> Self {
        Self(vec![0; REAL_MODE_LIMIT])
    }
}

#[cfg(test)]
impl DosMemory for FlatMemory {
    fn size(&self) -> usize {
        self.0.len()
    }

    fn bytes(&self, ptr: FarPtr, len: usize) -> &[u8] {
        self.0.as_slice().bytes(ptr, len)
    }

    fn bytes_mut(&mut self, ptr: FarPtr, len: usize) -> &mut [u8] {
        self.0.as_mut_slice().bytes_mut(ptr, len)
    }
}

//! Virtual DMA Services
//!
//! Under a memory manager real-mode addresses are not physical addresses.
//! Buffers handed to the host by physical address are locked through VDS
//! (INT 4Bh/81xx), which also reports the physical address. Without a
//! memory manager the mapping is the identity.

/// Page size the memory manager maps in
pub const PAGE_SIZE: u32 = 0x1000;

/// VDS error codes returned in AL
pub mod vds_status {
    pub const REGION_NOT_CONTIGUOUS: u8 = 0x01;
    pub const REGION_CROSSES_BOUNDARY: u8 = 0x02;
    pub const UNABLE_TO_LOCK: u8 = 0x03;
}

/// A locked region (the DMA descriptor structure, flattened)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRegion {
    pub linear: u32,
    pub size: u32,
    pub physical: u32,
    pub buffer_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VdsError(pub u8);

impl VdsError {
    /// The region could be locked if it did not span a page boundary
    pub fn is_page_crossing(&self) -> bool {
        matches!(
            self.0,
            vds_status::REGION_NOT_CONTIGUOUS | vds_status::REGION_CROSSES_BOUNDARY
        )
    }
}

/// INT 4Bh/81xx lock services
pub trait VirtualDma {
    fn lock(&mut self, linear: u32, size: u32) -> Result<DmaRegion, VdsError>;
    fn unlock(&mut self, region: &DmaRegion) -> Result<(), VdsError>;
}

/// No memory manager: physical equals linear
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityDma;

impl VirtualDma for IdentityDma {
    fn lock(&mut self, linear: u32, size: u32) -> Result<DmaRegion, VdsError> {
        Ok(DmaRegion {
            linear,
            size,
            physical: linear,
            buffer_id: 0,
        })
    }

    fn unlock(&mut self, _region: &DmaRegion) -> Result<(), VdsError> {
        Ok(())
    }
}

/// Lock `size` bytes at `linear`, sliding up to `slack` bytes forward when
/// the memory manager cannot lock a region that crosses a page.
///
/// Returns the region and how far it was moved from `linear`.
pub fn lock_contiguous<V: VirtualDma + ?Sized>(
    vds: &mut V,
    linear: u32,
    size: u32,
    slack: u32,
) -> Result<(DmaRegion, u32), VdsError> {
    match vds.lock(linear, size) {
        Ok(region) => Ok((region, 0)),
        Err(e) if e.is_page_crossing() => {
            let shift = PAGE_SIZE - (linear & (PAGE_SIZE - 1));
            if shift > slack || size > PAGE_SIZE {
                return Err(e);
            }
            log::debug!("[VDS] region {:#x}+{:#x} crosses a page, retrying at +{:#x}", linear, size, shift);
            let region = vds.lock(linear + shift, size)?;
            Ok((region, shift))
        }
        Err(e) => Err(e),
    }
}

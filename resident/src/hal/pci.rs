//! PCI BIOS Access
//!
//! Device lookup through the PCI BIOS (INT 1Ah/B1xx). The only device the
//! drivers look for is the VirtualBox guest device, whose I/O BAR carries
//! the request doorbell.

/// PCI configuration space offsets
pub mod config {
    pub const VENDOR_ID: u8 = 0x00;
    pub const DEVICE_ID: u8 = 0x02;
    pub const COMMAND: u8 = 0x04;
    pub const BAR0: u8 = 0x10;
    pub const BAR1: u8 = 0x14;
}

/// PCI bus/device/function address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciLocation {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciLocation {
    pub fn new(bus: u8, device: u8, function: u8) -> Self {
        Self { bus, device, function }
    }
}

/// Decoded base address register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bar {
    Io(u16),
    Memory(u32),
}

impl Bar {
    pub fn decode(raw: u32) -> Self {
        if raw & 1 != 0 {
            Bar::Io((raw & 0xFFFC) as u16)
        } else {
            Bar::Memory(raw & 0xFFFF_FFF0)
        }
    }
}

/// INT 1Ah/B1xx PCI BIOS services
pub trait PciBios {
    /// B101: whether a PCI BIOS is present
    fn is_present(&mut self) -> bool;
    /// B102: find the `index`-th device with the given ids
    fn find_device(&mut self, vendor: u16, device: u16, index: u16) -> Option<PciLocation>;
    /// B10A: read a configuration dword
    fn read_config_u32(&mut self, loc: PciLocation, offset: u8) -> u32;
}

/// Read and decode a BAR
pub fn read_bar<P: PciBios + ?Sized>(pci: &mut P, loc: PciLocation, bar: u8) -> Bar {
    Bar::decode(pci.read_config_u32(loc, config::BAR0 + bar * 4))
}

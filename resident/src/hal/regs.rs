//! Real-Mode Register Frame
//!
//! The interrupt entry stubs push the caller's registers into a
//! [`Registers`] frame, the drivers decode their request from it and write
//! results back before the stub returns with `iret`.

/// Carry flag, set by DOS interfaces to signal an error
pub const FLAG_CARRY: u16 = 0x0001;
/// Zero flag
pub const FLAG_ZERO: u16 = 0x0040;

/// 16-bit register frame of an interrupted real-mode program
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Registers {
    pub ax: u16,
    pub bx: u16,
    pub cx: u16,
    pub dx: u16,
    pub si: u16,
    pub di: u16,
    pub bp: u16,
    pub ds: u16,
    pub es: u16,
    pub flags: u16,
}

impl Registers {
    #[inline]
    pub fn ah(&self) -> u8 {
        (self.ax >> 8) as u8
    }

    #[inline]
    pub fn al(&self) -> u8 {
        self.ax as u8
    }

    #[inline]
    pub fn bl(&self) -> u8 {
        self.bx as u8
    }

    pub fn set_al(&mut self, value: u8) {
        self.ax = (self.ax & 0xFF00) | value as u16;
    }

    pub fn carry(&self) -> bool {
        self.flags & FLAG_CARRY != 0
    }

    pub fn set_carry(&mut self, carry: bool) {
        if carry {
            self.flags |= FLAG_CARRY;
        } else {
            self.flags &= !FLAG_CARRY;
        }
    }
}

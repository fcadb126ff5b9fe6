//! BIOS Services
//!
//! The mouse driver talks to the PS/2 pointing device only through the
//! INT 15h/C2xx BIOS interface, and reads display and timer state from the
//! BIOS data area at segment 0x40.

use super::memory::{DosMemory, FarPtr};

/// INT 15h/C2xx status codes returned in AH
pub mod ps2_status {
    pub const SUCCESS: u8 = 0x00;
    pub const INVALID_FUNCTION: u8 = 0x01;
    pub const INVALID_INPUT: u8 = 0x02;
    pub const INTERFACE_ERROR: u8 = 0x03;
    pub const NEED_RESEND: u8 = 0x04;
    pub const NO_HANDLER: u8 = 0x05;
}

/// Sample rate codes for INT 15h/C202
pub mod sample_rate {
    pub const RATE_10: u8 = 0;
    pub const RATE_20: u8 = 1;
    pub const RATE_40: u8 = 2;
    pub const RATE_60: u8 = 3;
    pub const RATE_80: u8 = 4;
    pub const RATE_100: u8 = 5;
    pub const RATE_200: u8 = 6;
}

/// Resolution codes for INT 15h/C203 (counts per millimetre)
pub mod resolution {
    pub const COUNTS_1: u8 = 0;
    pub const COUNTS_2: u8 = 1;
    pub const COUNTS_4: u8 = 2;
    pub const COUNTS_8: u8 = 3;
}

/// A failed PS/2 BIOS call, carrying the BIOS status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ps2Error(pub u8);

impl core::fmt::Display for Ps2Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let what = match self.0 {
            ps2_status::INVALID_FUNCTION => "invalid function",
            ps2_status::INVALID_INPUT => "invalid input",
            ps2_status::INTERFACE_ERROR => "interface error",
            ps2_status::NEED_RESEND => "resend",
            ps2_status::NO_HANDLER => "no far call installed",
            _ => "unknown error",
        };
        write!(f, "PS/2 BIOS {} ({:#04x})", what, self.0)
    }
}

/// INT 15h/C2xx pointing device services
pub trait Ps2Bios {
    /// C201: reset, returning the device id
    fn reset(&mut self) -> Result<u8, Ps2Error>;
    /// C205: initialize for `packet_size` byte packets (1..=8)
    fn init(&mut self, packet_size: u8) -> Result<(), Ps2Error>;
    /// C200: enable or disable the device
    fn enable(&mut self, enable: bool) -> Result<(), Ps2Error>;
    /// C202: set sample rate (see [`sample_rate`])
    fn set_sample_rate(&mut self, rate: u8) -> Result<(), Ps2Error>;
    /// C203: set resolution (see [`resolution`])
    fn set_resolution(&mut self, resolution: u8) -> Result<(), Ps2Error>;
    /// C204: read the device id
    fn device_id(&mut self) -> Result<u8, Ps2Error>;
    /// C207: install or remove the packet callback
    fn set_callback(&mut self, installed: bool) -> Result<(), Ps2Error>;
}

/// State the drivers read from the BIOS data area
pub trait BiosData {
    /// Timer ticks since midnight (18.2 Hz)
    fn ticks(&self) -> u32;
    /// Current video mode number
    fn video_mode(&self) -> u8;
    /// Text columns on screen
    fn text_columns(&self) -> u16;
    /// Text rows on screen; 0 when the BIOS does not record it
    fn text_rows(&self) -> u8;
    /// Character cell height in scan lines
    fn char_height(&self) -> u16;
    /// Offset of the active display page in the video segment
    fn page_offset(&self) -> u16;
}

/// BIOS data area offsets (segment 0x40)
pub mod bda {
    pub const SEGMENT: u16 = 0x0040;
    pub const VIDEO_MODE: u16 = 0x49;
    pub const TEXT_COLUMNS: u16 = 0x4A;
    pub const PAGE_OFFSET: u16 = 0x4E;
    pub const TIMER_TICKS: u16 = 0x6C;
    pub const TEXT_ROWS_MINUS_ONE: u16 = 0x84;
    pub const CHAR_HEIGHT: u16 = 0x85;
}

/// [`BiosData`] read straight from memory
pub struct BiosDataArea<'a, M: DosMemory + ?Sized> {
    mem: &'a M,
}

impl<'a, M: DosMemory + ?Sized> BiosDataArea<'a, M> {
    pub fn new(mem: &'a M) -> Self {
        Self { mem }
    }

    #[inline]
    fn at(offset: u16) -> FarPtr {
        FarPtr::new(bda::SEGMENT, offset)
    }
}

impl<M: DosMemory + ?Sized> BiosData for BiosDataArea<'_, M> {
    fn ticks(&self) -> u32 {
        self.mem.read_u32(Self::at(bda::TIMER_TICKS))
    }

    fn video_mode(&self) -> u8 {
        self.mem.read_u8(Self::at(bda::VIDEO_MODE)) & 0x7F
    }

    fn text_columns(&self) -> u16 {
        self.mem.read_u16(Self::at(bda::TEXT_COLUMNS))
    }

    fn text_rows(&self) -> u8 {
        match self.mem.read_u8(Self::at(bda::TEXT_ROWS_MINUS_ONE)) {
            0 => 0,
            n => n.saturating_add(1),
        }
    }

    fn char_height(&self) -> u16 {
        self.mem.read_u16(Self::at(bda::CHAR_HEIGHT))
    }

    fn page_offset(&self) -> u16 {
        self.mem.read_u16(Self::at(bda::PAGE_OFFSET))
    }
}

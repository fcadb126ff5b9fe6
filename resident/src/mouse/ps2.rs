//! PS/2 Pointing Device
//!
//! Detection through the INT 15h/C2xx BIOS services and decoding of the
//! packets the BIOS hands to our callback.
//!
//! A wheel mouse sends 4-byte packets, which most BIOSes cannot deliver.
//! In that case the BIOS is set up for 1-byte "packets" and the real
//! packets are put back together here.

use crate::hal::bios::{resolution, sample_rate, Ps2Bios, Ps2Error};

bitflags::bitflags! {
    /// First byte of every packet
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketStatus: u8 {
        const LEFT = 0x01;
        const RIGHT = 0x02;
        const MIDDLE = 0x04;
        /// Always set; used to find packet boundaries
        const ALWAYS_ONE = 0x08;
        const X_SIGN = 0x10;
        const Y_SIGN = 0x20;
        const X_OVERFLOW = 0x40;
        const Y_OVERFLOW = 0x80;
    }
}

/// Device ids returned by reset and C204
pub mod device_id {
    pub const STANDARD: u8 = 0x00;
    pub const INTELLIMOUSE: u8 = 0x03;
    pub const EXPLORER: u8 = 0x04;
}

/// Sample rate sequence that unlocks wheel reporting
const WHEEL_KNOCK: [u8; 3] = [sample_rate::RATE_200, sample_rate::RATE_100, sample_rate::RATE_80];

pub const STANDARD_PACKET_SIZE: usize = 3;
pub const WHEEL_PACKET_SIZE: usize = 4;

/// Where pointer input comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    NoHardware,
    RelativeOnly,
    AbsoluteCapable,
}

/// How the BIOS delivers packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketMode {
    /// Byte stream when a wheel is found, BIOS packets otherwise
    Auto,
    /// BIOS 3-byte packets
    Standard,
    /// BIOS 1-byte packets, reassembled by the driver
    ByteStream,
}

/// What detection found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ps2Device {
    pub id: u8,
    pub wheel: bool,
    pub mode: PacketMode,
}

impl Ps2Device {
    pub fn packet_size(&self) -> usize {
        if self.wheel {
            WHEEL_PACKET_SIZE
        } else {
            STANDARD_PACKET_SIZE
        }
    }
}

/// Send the IntelliMouse knock and check whether the id changed
fn enable_wheel(bios: &mut dyn Ps2Bios) -> Result<bool, Ps2Error> {
    for rate in WHEEL_KNOCK {
        bios.set_sample_rate(rate)?;
    }
    let id = bios.device_id()?;
    log::debug!("[PS2] device id after knock: {:#04x}", id);
    Ok(matches!(id, device_id::INTELLIMOUSE | device_id::EXPLORER))
}

/// Reset the device, look for a wheel and program the BIOS.
///
/// The callback is not installed and the device stays disabled.
pub fn detect(bios: &mut dyn Ps2Bios, use_wheel: bool, mode: PacketMode) -> Result<Ps2Device, Ps2Error> {
    bios.init(STANDARD_PACKET_SIZE as u8)?;
    let id = bios.reset()?;
    log::debug!("[PS2] device id {:#04x}", id);

    let mut wheel = use_wheel && mode != PacketMode::Standard && enable_wheel(bios)?;
    let mode = match mode {
        PacketMode::Auto if wheel => PacketMode::ByteStream,
        PacketMode::Auto => PacketMode::Standard,
        other => other,
    };

    if mode == PacketMode::ByteStream {
        // Re-initialising resets the device, so the knock is repeated
        bios.init(1)?;
        if wheel {
            wheel = enable_wheel(bios)?;
        }
    }

    bios.set_sample_rate(sample_rate::RATE_100)?;
    bios.set_resolution(resolution::COUNTS_4)?;

    Ok(Ps2Device { id, wheel, mode })
}

/// One decoded packet. `dy` grows downwards, like screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Packet {
    pub buttons: u8,
    pub dx: i16,
    pub dy: i16,
    pub wheel: i8,
}

impl Packet {
    pub fn decode(status: u8, x: u8, y: u8, z: u8) -> Self {
        let st = PacketStatus::from_bits_retain(status);

        let dx = if st.contains(PacketStatus::X_OVERFLOW) {
            0
        } else {
            nine_bit(x, st.contains(PacketStatus::X_SIGN))
        };
        let dy = if st.contains(PacketStatus::Y_OVERFLOW) {
            0
        } else {
            -nine_bit(y, st.contains(PacketStatus::Y_SIGN))
        };

        Self {
            buttons: status & 0x07,
            dx,
            dy,
            // low nibble, sign-extended
            wheel: ((z << 4) as i8) >> 4,
        }
    }
}

#[inline]
fn nine_bit(low: u8, negative: bool) -> i16 {
    if negative {
        low as i16 - 0x100
    } else {
        low as i16
    }
}

/// Puts byte-stream packets back together
pub struct PacketAssembler {
    bytes: [u8; WHEEL_PACKET_SIZE],
    len: usize,
    size: usize,
    first_tick: u32,
    timeout: u32,
}

impl PacketAssembler {
    pub const fn new(size: usize, timeout_ticks: u32) -> Self {
        Self {
            bytes: [0; WHEEL_PACKET_SIZE],
            len: 0,
            size,
            first_tick: 0,
            timeout: timeout_ticks,
        }
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Feed one byte received at BIOS tick `ticks`; returns a full packet
    pub fn push(&mut self, byte: u8, ticks: u32) -> Option<[u8; WHEEL_PACKET_SIZE]> {
        if self.len > 0 && ticks.wrapping_sub(self.first_tick) > self.timeout {
            log::trace!("[PS2] dropping stale partial packet ({} bytes)", self.len);
            self.len = 0;
        }

        if self.len == 0 {
            if byte & PacketStatus::ALWAYS_ONE.bits() == 0 {
                // not a first byte; wait for one
                return None;
            }
            self.first_tick = ticks;
        }

        self.bytes[self.len] = byte;
        self.len += 1;
        if self.len < self.size {
            return None;
        }

        self.len = 0;
        let mut packet = [0; WHEEL_PACKET_SIZE];
        packet[..self.size].copy_from_slice(&self.bytes[..self.size]);
        Some(packet)
    }
}

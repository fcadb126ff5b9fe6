//! I/O Port Access
//!
//! The drivers reach hardware through three ports only: the VMMDev request
//! doorbell, the VMware backdoor and the VGA sequencer/graphics controller.
//! All of them go through [`PortIo`] so tests can record the traffic.

#[cfg(target_arch = "x86_64")]
use x86_64::instructions::port::Port;

/// Byte, word and dword port access
pub trait PortIo {
    fn inb(&mut self, port: u16) -> u8;
    fn outb(&mut self, port: u16, value: u8);
    fn inw(&mut self, port: u16) -> u16;
    fn outw(&mut self, port: u16, value: u16);
    fn inl(&mut self, port: u16) -> u32;
    fn outl(&mut self, port: u16, value: u32);
}

/// Direct port access with `in`/`out` instructions
#[derive(Debug, Clone, Copy, Default)]
pub struct HardwarePorts;

#[cfg(target_arch = "x86_64")]
impl PortIo for HardwarePorts {
    #[inline]
    fn inb(&mut self, port: u16) -> u8 {
        unsafe { Port::<u8>::new(port).read() }
    }

    #[inline]
    fn outb(&mut self, port: u16, value: u8) {
        unsafe { Port::<u8>::new(port).write(value) }
    }

    #[inline]
    fn inw(&mut self, port: u16) -> u16 {
        unsafe { Port::<u16>::new(port).read() }
    }

    #[inline]
    fn outw(&mut self, port: u16, value: u16) {
        unsafe { Port::<u16>::new(port).write(value) }
    }

    #[inline]
    fn inl(&mut self, port: u16) -> u32 {
        unsafe { Port::<u32>::new(port).read() }
    }

    #[inline]
    fn outl(&mut self, port: u16, value: u32) {
        unsafe { Port::<u32>::new(port).write(value) }
    }
}

// Other architectures have no port space; reads float high.
#[cfg(not(target_arch = "x86_64"))]
impl PortIo for HardwarePorts {
    fn inb(&mut self, _port: u16) -> u8 {
        0xFF
    }

    fn outb(&mut self, _port: u16, _value: u8) {}

    fn inw(&mut self, _port: u16) -> u16 {
        0xFFFF
    }

    fn outw(&mut self, _port: u16, _value: u16) {}

    fn inl(&mut self, _port: u16) -> u32 {
        0xFFFF_FFFF
    }

    fn outl(&mut self, _port: u16, _value: u32) {}
}

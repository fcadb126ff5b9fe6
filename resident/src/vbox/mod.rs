//! VirtualBox Guest Device (VMMDev)
//!
//! The guest talks to VirtualBox by building a request in memory and
//! writing its physical address to the VMMDev I/O port. The host processes
//! the request synchronously during the port write and stores its status in
//! the request header.
//!
//! # Request Header
//!
//! | offset | field |
//! |---|---|
//! | 0 | total request size |
//! | 4 | header version (0x10001) |
//! | 8 | request type |
//! | 12 | status code (written by host) |
//! | 16 | reserved (2 dwords) |
//!
//! All requests share one buffer embedded in [`Transport`], so at most one
//! request is ever in flight.
//!
//! # Submodules
//!
//! - **mouse** - absolute mouse status and pointer shape requests
//! - **hgcm** - host-guest communication manager calls
//! - **shfl** - the shared folders service client

pub mod hgcm;
pub mod mouse;
pub mod shfl;

use crate::hal::pci::{read_bar, Bar, PciBios};
use crate::hal::port::PortIo;
use crate::hal::vds::{lock_contiguous, DmaRegion, VirtualDma};
use hgcm::HgcmParm;

/// PCI vendor id of the guest device
pub const VMMDEV_VENDOR_ID: u16 = 0x80EE;
/// PCI device id of the guest device
pub const VMMDEV_DEVICE_ID: u16 = 0xCAFE;

/// Request header version
pub const REQUEST_HEADER_VERSION: u32 = 0x0001_0001;
/// Guest interface version reported at install
pub const INTERFACE_VERSION: u32 = 0x0001_0004;
/// OS type reported at install
pub const OSTYPE_DOS: u32 = 0x0001_0000;

/// Size of the common request header
pub const REQUEST_HEADER_SIZE: usize = 24;

/// Largest request the drivers send (a 16x16 pointer shape)
pub const REQUEST_BUFFER_SIZE: usize = 1152;

bitflags::bitflags! {
    /// Pending host events, returned by AcknowledgeEvents
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HostEvents: u32 {
        const MOUSE_CAPABILITIES_CHANGED = 1 << 0;
        const HGCM = 1 << 1;
        const DISPLAY_CHANGE_REQUEST = 1 << 2;
        const MOUSE_POSITION_CHANGED = 1 << 9;
    }
}

/// Request type codes
pub mod request_type {
    pub const GET_MOUSE_STATUS: u32 = 1;
    pub const SET_MOUSE_STATUS: u32 = 2;
    pub const SET_POINTER_SHAPE: u32 = 3;
    pub const ACKNOWLEDGE_EVENTS: u32 = 41;
    pub const REPORT_GUEST_INFO: u32 = 50;
    pub const HGCM_CONNECT: u32 = 60;
    pub const HGCM_DISCONNECT: u32 = 61;
    pub const HGCM_CALL32: u32 = 62;
}

/// IPRT status codes seen by the drivers
pub mod rc {
    pub const VINF_SUCCESS: i32 = 0;
    pub const VINF_HGCM_ASYNC_EXECUTE: i32 = 2903;
    pub const VERR_GENERAL_FAILURE: i32 = -1;
    pub const VERR_INVALID_PARAMETER: i32 = -2;
    pub const VERR_INVALID_HANDLE: i32 = -4;
    pub const VERR_NOT_A_DIRECTORY: i32 = -20;
    pub const VERR_IS_A_DIRECTORY: i32 = -21;
    pub const VERR_NOT_SUPPORTED: i32 = -37;
    pub const VERR_ACCESS_DENIED: i32 = -38;
    pub const VERR_TIMEOUT: i32 = -40;
    pub const VERR_BUFFER_OVERFLOW: i32 = -41;
    pub const VERR_FILE_NOT_FOUND: i32 = -102;
    pub const VERR_PATH_NOT_FOUND: i32 = -103;
    pub const VERR_INVALID_NAME: i32 = -104;
    pub const VERR_ALREADY_EXISTS: i32 = -105;
    pub const VERR_TOO_MANY_OPEN_FILES: i32 = -106;
    pub const VERR_DIR_NOT_EMPTY: i32 = -108;
    pub const VERR_WRITE_PROTECT: i32 = -113;
    pub const VERR_SHARING_VIOLATION: i32 = -114;
    pub const VERR_FILE_LOCK_VIOLATION: i32 = -116;
    pub const VERR_FILENAME_TOO_LONG: i32 = -120;
    pub const VERR_NO_MORE_FILES: i32 = -201;
}

/// Transport failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VbError {
    /// No guest device on the PCI bus
    DeviceNotFound,
    /// The shared folders service is not connected
    NotConnected,
    /// The host returned a failure status
    Host(i32),
    /// An asynchronous request did not complete in time
    Timeout,
    /// The request does not fit in the request buffer
    BufferTooSmall,
    /// The request buffer could not be locked for DMA
    BufferLock,
}

impl core::fmt::Display for VbError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            VbError::DeviceNotFound => write!(f, "VirtualBox guest device not found"),
            VbError::NotConnected => write!(f, "shared folders service not connected"),
            VbError::Host(rc) => write!(f, "host returned error {}", rc),
            VbError::Timeout => write!(f, "host did not answer"),
            VbError::BufferTooSmall => write!(f, "request too large"),
            VbError::BufferLock => write!(f, "cannot lock request buffer"),
        }
    }
}

// ============================================================================
// Wire helpers
// ============================================================================

#[inline]
pub(crate) fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub(crate) fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub(crate) fn put_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub(crate) fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

#[inline]
pub(crate) fn get_u32(buf: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(b)
}

#[inline]
pub(crate) fn get_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

/// Header field offsets
pub mod header {
    pub const SIZE: usize = 0;
    pub const VERSION: usize = 4;
    pub const REQUEST_TYPE: usize = 8;
    pub const RC: usize = 12;
}

/// Fill in a request header at the start of `buf`
pub(crate) fn write_header(buf: &mut [u8], size: usize, request_type: u32) {
    for b in buf[..size].iter_mut() {
        *b = 0;
    }
    put_u32(buf, header::SIZE, size as u32);
    put_u32(buf, header::VERSION, REQUEST_HEADER_VERSION);
    put_u32(buf, header::REQUEST_TYPE, request_type);
    put_u32(buf, header::RC, rc::VERR_GENERAL_FAILURE as u32);
}

/// Status code the host stored in a request
#[inline]
pub fn request_rc(buf: &[u8]) -> i32 {
    get_u32(buf, header::RC) as i32
}

// ============================================================================
// Doorbell
// ============================================================================

/// How a request reaches the host
pub trait Doorbell {
    /// Submit the request at physical address `phys`. `request` is the same
    /// memory seen by the guest and `parms` are the buffers an HGCM call
    /// references by linear address.
    fn ring(&mut self, phys: u32, request: &mut [u8], parms: &mut [HgcmParm<'_>]);

    /// Called between polls of an asynchronous request
    fn wait(&mut self, _request: &mut [u8]) {
        core::hint::spin_loop();
    }

    /// Linear address of guest memory referenced from a request
    fn linear_address(&self, data: *const u8) -> u32 {
        data as usize as u32
    }
}

/// The real device: one 32-bit write to the request port
pub struct PortDoorbell<P: PortIo> {
    ports: P,
    port: u16,
}

impl<P: PortIo> PortDoorbell<P> {
    pub const fn new(ports: P, port: u16) -> Self {
        Self { ports, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl<P: PortIo> Doorbell for PortDoorbell<P> {
    fn ring(&mut self, phys: u32, _request: &mut [u8], _parms: &mut [HgcmParm<'_>]) {
        self.ports.outl(self.port, phys);
    }
}

/// Find the guest device and return its request port
pub fn find_vmmdev<P: PciBios + ?Sized>(pci: &mut P) -> Result<u16, VbError> {
    if !pci.is_present() {
        return Err(VbError::DeviceNotFound);
    }
    let loc = pci
        .find_device(VMMDEV_VENDOR_ID, VMMDEV_DEVICE_ID, 0)
        .ok_or(VbError::DeviceNotFound)?;

    match read_bar(pci, loc, 0) {
        Bar::Io(port) if port != 0 => {
            log::info!("[VBOX] guest device at {:?}, port {:#x}", loc, port);
            Ok(port)
        }
        _ => Err(VbError::DeviceNotFound),
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Transport tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Polls of the done flag before an asynchronous call times out
    pub max_polls: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { max_polls: 0x0400_0000 }
    }
}

/// Request memory with room to slide past a page boundary
#[repr(C, align(16))]
struct RequestBuffer([u8; 2 * REQUEST_BUFFER_SIZE]);

/// The single-request channel to the host
pub struct Transport<D: Doorbell> {
    doorbell: D,
    config: TransportConfig,
    storage: RequestBuffer,
    /// Start of the locked window inside `storage`
    offset: usize,
    phys: u32,
    region: Option<DmaRegion>,
}

impl<D: Doorbell> Transport<D> {
    pub const fn new(doorbell: D, config: TransportConfig) -> Self {
        Self {
            doorbell,
            config,
            storage: RequestBuffer([0; 2 * REQUEST_BUFFER_SIZE]),
            offset: 0,
            phys: 0,
            region: None,
        }
    }

    /// Pin the request buffer and learn its physical address.
    ///
    /// Must run after the transport reached its final resident location.
    pub fn lock_buffer<V: VirtualDma + ?Sized>(&mut self, vds: &mut V) -> Result<(), VbError> {
        let linear = self.doorbell.linear_address(self.storage.0.as_ptr());
        let (region, shift) = lock_contiguous(vds, linear, REQUEST_BUFFER_SIZE as u32, REQUEST_BUFFER_SIZE as u32)
            .map_err(|e| {
                log::error!("[VBOX] cannot lock request buffer: {:?}", e);
                VbError::BufferLock
            })?;
        self.offset = shift as usize;
        self.phys = region.physical;
        self.region = Some(region);
        log::debug!("[VBOX] request buffer at phys {:#x}", self.phys);
        Ok(())
    }

    /// Whether [`Transport::lock_buffer`] has pinned the buffer
    pub fn is_locked(&self) -> bool {
        self.region.is_some()
    }

    /// Release the lock taken by [`Transport::lock_buffer`]
    pub fn unlock_buffer<V: VirtualDma + ?Sized>(&mut self, vds: &mut V) {
        if let Some(region) = self.region.take() {
            if let Err(e) = vds.unlock(&region) {
                log::warn!("[VBOX] cannot unlock request buffer: {:?}", e);
            }
        }
    }

    pub fn physical_address(&self) -> u32 {
        self.phys
    }

    pub fn doorbell(&mut self) -> &mut D {
        &mut self.doorbell
    }

    /// Doorbell, request window and its physical address
    pub(crate) fn split(&mut self) -> (&mut D, &mut [u8], u32) {
        let off = self.offset;
        (
            &mut self.doorbell,
            &mut self.storage.0[off..off + REQUEST_BUFFER_SIZE],
            self.phys,
        )
    }

    /// Start building a request of `size` bytes
    pub(crate) fn request(&mut self, request_type: u32, size: usize) -> Result<&mut [u8], VbError> {
        if size > REQUEST_BUFFER_SIZE {
            return Err(VbError::BufferTooSmall);
        }
        let (_, buf, _) = self.split();
        write_header(buf, size, request_type);
        Ok(&mut buf[..size])
    }

    /// Submit a synchronous request built with [`Transport::request`]
    pub(crate) fn send(&mut self, size: usize) -> Result<&mut [u8], VbError> {
        let (doorbell, buf, phys) = self.split();
        doorbell.ring(phys, &mut buf[..size], &mut []);
        match request_rc(buf) {
            rc if rc < 0 => Err(VbError::Host(rc)),
            _ => Ok(&mut buf[..size]),
        }
    }

    /// Submit an HGCM request and wait for it with a bounded poll
    pub(crate) fn send_hgcm(&mut self, size: usize, parms: &mut [HgcmParm<'_>]) -> Result<(), VbError> {
        let max_polls = self.config.max_polls;
        let (doorbell, buf, phys) = self.split();
        let buf = &mut buf[..size];
        doorbell.ring(phys, buf, parms);

        if request_rc(buf) == rc::VINF_HGCM_ASYNC_EXECUTE {
            let mut polls = 0;
            while !hgcm::is_done(buf) {
                if polls == max_polls {
                    log::warn!("[HGCM] request timed out");
                    return Err(VbError::Timeout);
                }
                doorbell.wait(buf);
                polls += 1;
            }
        }

        match request_rc(buf) {
            rc if rc < 0 => Err(VbError::Host(rc)),
            _ => match hgcm::call_result(buf) {
                result if result < 0 => Err(VbError::Host(result)),
                _ => Ok(()),
            },
        }
    }

    /// Tell the host which guest is talking
    pub fn report_guest_info(&mut self) -> Result<(), VbError> {
        let size = REQUEST_HEADER_SIZE + 8;
        let req = self.request(request_type::REPORT_GUEST_INFO, size)?;
        put_u32(req, REQUEST_HEADER_SIZE, INTERFACE_VERSION);
        put_u32(req, REQUEST_HEADER_SIZE + 4, OSTYPE_DOS);
        self.send(size).map(|_| ())
    }

    /// Fetch and clear the host's pending events
    pub fn acknowledge_events(&mut self) -> Result<HostEvents, VbError> {
        let size = REQUEST_HEADER_SIZE + 4;
        let req = self.request(request_type::ACKNOWLEDGE_EVENTS, size)?;
        put_u32(req, REQUEST_HEADER_SIZE, 0);
        let reply = self.send(size)?;
        Ok(HostEvents::from_bits_retain(get_u32(reply, REQUEST_HEADER_SIZE)))
    }
}

impl<P: PortIo> Transport<PortDoorbell<P>> {
    /// A transport on the guest device found over PCI, not yet locked
    pub fn discover<B: PciBios + ?Sized>(ports: P, pci: &mut B, config: TransportConfig) -> Result<Self, VbError> {
        let port = find_vmmdev(pci)?;
        Ok(Self::new(PortDoorbell::new(ports, port), config))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StatusDoorbell;
    use super::*;
    use crate::hal::pci::PciLocation;
    use crate::hal::vds::IdentityDma;

    #[test]
    fn test_report_guest_info() {
        let mut t = Transport::new(StatusDoorbell::new(rc::VINF_SUCCESS), TransportConfig::default());
        t.lock_buffer(&mut IdentityDma).unwrap();
        assert_eq!(t.report_guest_info(), Ok(()));
        assert_eq!(t.doorbell().last_type, request_type::REPORT_GUEST_INFO);
    }

    #[test]
    fn test_acknowledge_events() {
        let mut t = Transport::new(StatusDoorbell::new(rc::VINF_SUCCESS), TransportConfig::default());
        assert_eq!(t.acknowledge_events(), Ok(HostEvents::empty()));
        assert_eq!(t.doorbell().last_type, request_type::ACKNOWLEDGE_EVENTS);
    }

    #[test]
    fn test_host_failure() {
        let mut t = Transport::new(StatusDoorbell::new(rc::VERR_NOT_SUPPORTED), TransportConfig::default());
        assert_eq!(t.report_guest_info(), Err(VbError::Host(rc::VERR_NOT_SUPPORTED)));
    }

    #[test]
    fn test_oversized_request() {
        let mut t = Transport::new(StatusDoorbell::new(0), TransportConfig::default());
        assert!(matches!(t.request(1, REQUEST_BUFFER_SIZE + 1), Err(VbError::BufferTooSmall)));
    }

    struct OnePci;

    impl PciBios for OnePci {
        fn is_present(&mut self) -> bool {
            true
        }
        fn find_device(&mut self, vendor: u16, device: u16, index: u16) -> Option<PciLocation> {
            (vendor == VMMDEV_VENDOR_ID && device == VMMDEV_DEVICE_ID && index == 0)
                .then(|| PciLocation::new(0, 4, 0))
        }
        fn read_config_u32(&mut self, _loc: PciLocation, offset: u8) -> u32 {
            if offset == 0x10 {
                0xD021
            } else {
                0
            }
        }
    }

    #[test]
    fn test_find_vmmdev() {
        assert_eq!(find_vmmdev(&mut OnePci), Ok(0xD020));
    }

    struct NoPci;

    impl PciBios for NoPci {
        fn is_present(&mut self) -> bool {
            false
        }
        fn find_device(&mut self, _vendor: u16, _device: u16, _index: u16) -> Option<PciLocation> {
            None
        }
        fn read_config_u32(&mut self, _loc: PciLocation, _offset: u8) -> u32 {
            0xFFFF_FFFF
        }
    }

    /// Remembers dword writes; reads float high
    #[derive(Default)]
    struct DwordLog(Vec<(u16, u32)>);

    impl PortIo for DwordLog {
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
        fn outl(&mut self, port: u16, value: u32) {
            self.0.push((port, value));
        }
    }

    #[test]
    fn test_discover() {
        let mut t = Transport::discover(DwordLog::default(), &mut OnePci, TransportConfig::default()).unwrap();
        assert_eq!(t.doorbell().port(), 0xD020);
        assert!(!t.is_locked());
        t.lock_buffer(&mut IdentityDma).unwrap();
        assert!(t.is_locked());
        t.unlock_buffer(&mut IdentityDma);
        assert!(!t.is_locked());

        let missing = Transport::discover(DwordLog::default(), &mut NoPci, TransportConfig::default());
        assert!(matches!(missing, Err(VbError::DeviceNotFound)));
    }
}

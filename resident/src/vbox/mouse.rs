//! Absolute Mouse and Host Pointer Requests
//!
//! With mouse integration enabled the host reports the pointer position as
//! an absolute value in 0..=0xFFFF on each axis, and can draw the pointer
//! itself from a shape the guest uploads.

use super::{get_u32, put_u32, request_type, Doorbell, Transport, VbError, REQUEST_HEADER_SIZE};

bitflags::bitflags! {
    /// VMMDev mouse feature bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MouseFeatures: u32 {
        /// Guest can read absolute positions
        const GUEST_CAN_ABSOLUTE = 0x0000_0001;
        /// Host wants to deliver absolute positions
        const HOST_WANTS_ABSOLUTE = 0x0000_0002;
        /// Guest cannot draw a pointer; the host must
        const GUEST_NEEDS_HOST_CURSOR = 0x0000_0004;
        /// Host cannot draw the pointer
        const HOST_CANNOT_HWPOINTER = 0x0000_0008;
        /// Guest uses the event-based protocol
        const NEW_PROTOCOL = 0x0000_0010;
    }
}

bitflags::bitflags! {
    /// Pointer shape request flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PointerFlags: u32 {
        const VISIBLE = 0x0001;
        const ALPHA = 0x0002;
        const SHAPE = 0x0004;
    }
}

/// Largest absolute coordinate the host reports
pub const ABSOLUTE_MAX: u16 = 0xFFFF;

/// Pointer image edge in pixels
pub const POINTER_SIZE: usize = 16;

/// 1bpp AND mask, two bytes per row, already dword aligned
pub const AND_MASK_BYTES: usize = POINTER_SIZE * 2;

/// 32bpp XOR image
pub const XOR_IMAGE_BYTES: usize = POINTER_SIZE * POINTER_SIZE * 4;

const MOUSE_STATUS_SIZE: usize = REQUEST_HEADER_SIZE + 12;
const POINTER_HEADER_SIZE: usize = REQUEST_HEADER_SIZE + 20;
const POINTER_SHAPE_SIZE: usize = POINTER_HEADER_SIZE + AND_MASK_BYTES + XOR_IMAGE_BYTES;
/// The host insists on room for at least one dword of pointer data
const POINTER_VISIBILITY_SIZE: usize = POINTER_HEADER_SIZE + 4;

/// Mouse status as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseStatus {
    pub features: MouseFeatures,
    pub x: u16,
    pub y: u16,
}

impl MouseStatus {
    /// The host is delivering absolute positions right now
    pub fn is_absolute(&self) -> bool {
        self.features.contains(MouseFeatures::HOST_WANTS_ABSOLUTE)
    }

    /// The host is able to draw the pointer
    pub fn host_can_draw(&self) -> bool {
        !self.features.contains(MouseFeatures::HOST_CANNOT_HWPOINTER)
    }
}

/// Expand a 16x16 AND/XOR word mask pair into the host pointer format
pub fn encode_pointer_shape(and_mask: &[u16; POINTER_SIZE], xor_mask: &[u16; POINTER_SIZE], out: &mut [u8]) {
    let (and_out, xor_out) = out.split_at_mut(AND_MASK_BYTES);

    for (row, &bits) in and_mask.iter().enumerate() {
        // leftmost pixel is the most significant bit
        and_out[row * 2..row * 2 + 2].copy_from_slice(&bits.to_be_bytes());
    }

    for (row, &bits) in xor_mask.iter().enumerate() {
        for col in 0..POINTER_SIZE {
            let lit = bits & (0x8000 >> col) != 0;
            let pixel: u32 = if lit { 0x00FF_FFFF } else { 0 };
            let off = (row * POINTER_SIZE + col) * 4;
            xor_out[off..off + 4].copy_from_slice(&pixel.to_le_bytes());
        }
    }
}

impl<D: Doorbell> Transport<D> {
    pub fn get_mouse_status(&mut self) -> Result<MouseStatus, VbError> {
        self.request(request_type::GET_MOUSE_STATUS, MOUSE_STATUS_SIZE)?;
        let rsp = self.send(MOUSE_STATUS_SIZE)?;
        Ok(MouseStatus {
            features: MouseFeatures::from_bits_truncate(get_u32(rsp, REQUEST_HEADER_SIZE)),
            x: get_u32(rsp, REQUEST_HEADER_SIZE + 4) as u16,
            y: get_u32(rsp, REQUEST_HEADER_SIZE + 8) as u16,
        })
    }

    pub fn set_mouse_status(&mut self, features: MouseFeatures) -> Result<(), VbError> {
        let req = self.request(request_type::SET_MOUSE_STATUS, MOUSE_STATUS_SIZE)?;
        put_u32(req, REQUEST_HEADER_SIZE, features.bits());
        self.send(MOUSE_STATUS_SIZE).map(|_| ())
    }

    /// Upload a new pointer shape and make it visible
    pub fn set_pointer_shape(
        &mut self,
        hot_x: u16,
        hot_y: u16,
        and_mask: &[u16; POINTER_SIZE],
        xor_mask: &[u16; POINTER_SIZE],
    ) -> Result<(), VbError> {
        let req = self.request(request_type::SET_POINTER_SHAPE, POINTER_SHAPE_SIZE)?;
        let flags = PointerFlags::VISIBLE | PointerFlags::SHAPE;
        write_pointer_header(req, flags, hot_x, hot_y);
        encode_pointer_shape(and_mask, xor_mask, &mut req[POINTER_HEADER_SIZE..]);
        self.send(POINTER_SHAPE_SIZE).map(|_| ())
    }

    /// Show or hide the host pointer without changing its shape
    pub fn set_pointer_visible(&mut self, visible: bool) -> Result<(), VbError> {
        let req = self.request(request_type::SET_POINTER_SHAPE, POINTER_VISIBILITY_SIZE)?;
        let flags = if visible { PointerFlags::VISIBLE } else { PointerFlags::empty() };
        write_pointer_header(req, flags, 0, 0);
        self.send(POINTER_VISIBILITY_SIZE).map(|_| ())
    }
}

fn write_pointer_header(req: &mut [u8], flags: PointerFlags, hot_x: u16, hot_y: u16) {
    put_u32(req, REQUEST_HEADER_SIZE, flags.bits());
    put_u32(req, REQUEST_HEADER_SIZE + 4, hot_x as u32);
    put_u32(req, REQUEST_HEADER_SIZE + 8, hot_y as u32);
    put_u32(req, REQUEST_HEADER_SIZE + 12, POINTER_SIZE as u32);
    put_u32(req, REQUEST_HEADER_SIZE + 16, POINTER_SIZE as u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vbox::hgcm::HgcmParm;
    use crate::vbox::{header, TransportConfig};

    /// Host with mouse integration on, pointer at the centre
    struct IntegratedHost {
        features: u32,
        last_features: u32,
        last_pointer_flags: u32,
        last_size: u32,
    }

    impl Doorbell for IntegratedHost {
        fn ring(&mut self, _phys: u32, request: &mut [u8], _parms: &mut [HgcmParm<'_>]) {
            self.last_size = get_u32(request, header::SIZE);
            match get_u32(request, header::REQUEST_TYPE) {
                request_type::GET_MOUSE_STATUS => {
                    put_u32(request, REQUEST_HEADER_SIZE, self.features);
                    put_u32(request, REQUEST_HEADER_SIZE + 4, 0x8000);
                    put_u32(request, REQUEST_HEADER_SIZE + 8, 0x4000);
                }
                request_type::SET_MOUSE_STATUS => self.last_features = get_u32(request, REQUEST_HEADER_SIZE),
                request_type::SET_POINTER_SHAPE => self.last_pointer_flags = get_u32(request, REQUEST_HEADER_SIZE),
                _ => {}
            }
            put_u32(request, header::RC, 0);
        }
    }

    fn transport(features: MouseFeatures) -> Transport<IntegratedHost> {
        let host = IntegratedHost { features: features.bits(), last_features: 0, last_pointer_flags: 0, last_size: 0 };
        Transport::new(host, TransportConfig::default())
    }

    #[test]
    fn test_get_status() {
        let mut t = transport(MouseFeatures::GUEST_CAN_ABSOLUTE | MouseFeatures::HOST_WANTS_ABSOLUTE);
        let status = t.get_mouse_status().unwrap();
        assert!(status.is_absolute());
        assert!(status.host_can_draw());
        assert_eq!((status.x, status.y), (0x8000, 0x4000));
    }

    #[test]
    fn test_set_status() {
        let mut t = transport(MouseFeatures::empty());
        t.set_mouse_status(MouseFeatures::GUEST_CAN_ABSOLUTE | MouseFeatures::NEW_PROTOCOL).unwrap();
        assert_eq!(t.doorbell().last_features, 0x11);
    }

    #[test]
    fn test_pointer_requests() {
        let mut t = transport(MouseFeatures::empty());
        t.set_pointer_shape(1, 2, &[0xFFFF; 16], &[0; 16]).unwrap();
        assert_eq!(t.doorbell().last_pointer_flags, 0x5);
        assert_eq!(t.doorbell().last_size as usize, POINTER_SHAPE_SIZE);

        t.set_pointer_visible(false).unwrap();
        assert_eq!(t.doorbell().last_pointer_flags, 0);
        assert_eq!(t.doorbell().last_size as usize, POINTER_VISIBILITY_SIZE);
    }

    #[test]
    fn test_shape_encoding() {
        let mut and_mask = [0xFFFFu16; 16];
        let mut xor_mask = [0u16; 16];
        and_mask[0] = 0x3FFF;
        xor_mask[0] = 0x8000;

        let mut out = [0u8; AND_MASK_BYTES + XOR_IMAGE_BYTES];
        encode_pointer_shape(&and_mask, &xor_mask, &mut out);

        assert_eq!(&out[..2], &[0x3F, 0xFF]);
        let xor = &out[AND_MASK_BYTES..];
        assert_eq!(&xor[..4], &[0xFF, 0xFF, 0xFF, 0x00]);
        assert_eq!(&xor[4..8], &[0, 0, 0, 0]);
    }
}

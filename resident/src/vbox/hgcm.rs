//! Host-Guest Communication Manager
//!
//! HGCM calls carry a client id, a function number and an array of typed
//! parameters. Buffers are passed by linear address and the host writes
//! back both 32/64-bit values and the used length of output buffers.
//!
//! Calls that need host I/O complete asynchronously: the port write returns
//! `VINF_HGCM_ASYNC_EXECUTE` and the host later sets [`HGCM_FLAG_DONE`] in
//! the request.

use super::{get_u32, get_u64, put_u32, put_u64, request_type, Doorbell, Transport, VbError};
use super::{REQUEST_BUFFER_SIZE, REQUEST_HEADER_SIZE};

/// Set by the host when an asynchronous request completed
pub const HGCM_FLAG_DONE: u32 = 0x0000_0001;

/// Connect to an existing host service by name
pub const HGCM_LOC_LOCALHOST_EXISTING: u32 = 2;

/// Longest service name including the terminator
pub const HGCM_SERVICE_NAME_MAX: usize = 128;

/// Flags and result follow the common header
pub const HGCM_HEADER_SIZE: usize = REQUEST_HEADER_SIZE + 8;
const FLAGS_OFFSET: usize = REQUEST_HEADER_SIZE;
const RESULT_OFFSET: usize = REQUEST_HEADER_SIZE + 4;

const CONNECT_SIZE: usize = HGCM_HEADER_SIZE + 4 + HGCM_SERVICE_NAME_MAX + 4;
const DISCONNECT_SIZE: usize = HGCM_HEADER_SIZE + 4;
const CALL_HEADER_SIZE: usize = HGCM_HEADER_SIZE + 12;

/// Encoded size of one parameter
pub const PARM_SIZE: usize = 12;

/// Most parameters any call takes
pub const MAX_PARMS: usize = (REQUEST_BUFFER_SIZE - CALL_HEADER_SIZE) / PARM_SIZE;

/// Parameter type codes
pub mod parm_type {
    pub const U32: u32 = 1;
    pub const U64: u32 = 2;
    pub const LINADDR: u32 = 4;
    pub const LINADDR_IN: u32 = 5;
    pub const LINADDR_OUT: u32 = 6;
}

/// One call parameter
#[derive(Debug)]
pub enum HgcmParm<'a> {
    U32(u32),
    U64(u64),
    /// Buffer read by the host
    In(&'a [u8]),
    /// Buffer written by the host; `len` is updated to the length it used
    Out { buf: &'a mut [u8], len: u32 },
    /// Buffer read and written by the host
    InOut { buf: &'a mut [u8], len: u32 },
}

impl<'a> HgcmParm<'a> {
    pub fn output(buf: &'a mut [u8]) -> Self {
        let len = buf.len() as u32;
        HgcmParm::Out { buf, len }
    }

    pub fn in_out(buf: &'a mut [u8]) -> Self {
        let len = buf.len() as u32;
        HgcmParm::InOut { buf, len }
    }

    /// Value of a 32-bit parameter (0 for other kinds)
    pub fn as_u32(&self) -> u32 {
        match self {
            HgcmParm::U32(v) => *v,
            _ => 0,
        }
    }

    /// Value of a 64-bit parameter (0 for other kinds)
    pub fn as_u64(&self) -> u64 {
        match self {
            HgcmParm::U64(v) => *v,
            _ => 0,
        }
    }

    /// Length the host reported for a buffer parameter
    pub fn len(&self) -> u32 {
        match self {
            HgcmParm::In(buf) => buf.len() as u32,
            HgcmParm::Out { len, .. } | HgcmParm::InOut { len, .. } => *len,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn encode<D: Doorbell>(&self, doorbell: &D, out: &mut [u8]) {
        match self {
            HgcmParm::U32(v) => {
                put_u32(out, 0, parm_type::U32);
                put_u32(out, 4, *v);
                put_u32(out, 8, 0);
            }
            HgcmParm::U64(v) => {
                put_u32(out, 0, parm_type::U64);
                put_u64(out, 4, *v);
            }
            HgcmParm::In(buf) => {
                put_u32(out, 0, parm_type::LINADDR_IN);
                put_u32(out, 4, buf.len() as u32);
                put_u32(out, 8, doorbell.linear_address(buf.as_ptr()));
            }
            HgcmParm::Out { buf, .. } => {
                put_u32(out, 0, parm_type::LINADDR_OUT);
                put_u32(out, 4, buf.len() as u32);
                put_u32(out, 8, doorbell.linear_address(buf.as_ptr()));
            }
            HgcmParm::InOut { buf, .. } => {
                put_u32(out, 0, parm_type::LINADDR);
                put_u32(out, 4, buf.len() as u32);
                put_u32(out, 8, doorbell.linear_address(buf.as_ptr()));
            }
        }
    }

    fn update(&mut self, raw: &[u8]) {
        match self {
            HgcmParm::U32(v) => *v = get_u32(raw, 4),
            HgcmParm::U64(v) => *v = get_u64(raw, 4),
            HgcmParm::In(_) => {}
            HgcmParm::Out { buf, len } | HgcmParm::InOut { buf, len } => {
                *len = get_u32(raw, 4).min(buf.len() as u32);
            }
        }
    }
}

/// Whether the host finished an asynchronous request
pub fn is_done(request: &[u8]) -> bool {
    // The host sets the flag behind the compiler's back
    let flags = unsafe { core::ptr::read_volatile(request.as_ptr().add(FLAGS_OFFSET) as *const u32) };
    u32::from_le(flags) & HGCM_FLAG_DONE != 0
}

/// Service-level result of a completed call
pub fn call_result(request: &[u8]) -> i32 {
    get_u32(request, RESULT_OFFSET) as i32
}

/// Request field offsets, shared with host fakes
pub mod layout {
    use super::HGCM_HEADER_SIZE;

    pub const FLAGS: usize = super::FLAGS_OFFSET;
    pub const RESULT: usize = super::RESULT_OFFSET;
    pub const CONNECT_LOC_TYPE: usize = HGCM_HEADER_SIZE;
    pub const CONNECT_NAME: usize = HGCM_HEADER_SIZE + 4;
    pub const CONNECT_CLIENT_ID: usize = HGCM_HEADER_SIZE + 4 + super::HGCM_SERVICE_NAME_MAX;
    pub const CLIENT_ID: usize = HGCM_HEADER_SIZE;
    pub const CALL_FUNCTION: usize = HGCM_HEADER_SIZE + 4;
    pub const CALL_PARM_COUNT: usize = HGCM_HEADER_SIZE + 8;
    pub const CALL_PARMS: usize = HGCM_HEADER_SIZE + 12;
}

impl<D: Doorbell> Transport<D> {
    /// Connect to a host service, returning the client id
    pub fn hgcm_connect(&mut self, service: &str) -> Result<u32, VbError> {
        let name = service.as_bytes();
        if name.len() >= HGCM_SERVICE_NAME_MAX {
            return Err(VbError::BufferTooSmall);
        }

        let req = self.request(request_type::HGCM_CONNECT, CONNECT_SIZE)?;
        put_u32(req, layout::CONNECT_LOC_TYPE, HGCM_LOC_LOCALHOST_EXISTING);
        req[layout::CONNECT_NAME..layout::CONNECT_NAME + name.len()].copy_from_slice(name);

        self.send_hgcm(CONNECT_SIZE, &mut [])?;

        let (_, buf, _) = self.split();
        let client = get_u32(buf, layout::CONNECT_CLIENT_ID);
        log::info!("[HGCM] connected to {} as client {}", service, client);
        Ok(client)
    }

    pub fn hgcm_disconnect(&mut self, client: u32) -> Result<(), VbError> {
        let req = self.request(request_type::HGCM_DISCONNECT, DISCONNECT_SIZE)?;
        put_u32(req, layout::CLIENT_ID, client);
        self.send_hgcm(DISCONNECT_SIZE, &mut [])
    }

    /// Call `function` of a connected service.
    ///
    /// On success the parameters hold the values and lengths the host
    /// wrote back.
    pub fn hgcm_call(&mut self, client: u32, function: u32, parms: &mut [HgcmParm<'_>]) -> Result<(), VbError> {
        if parms.len() > MAX_PARMS {
            return Err(VbError::BufferTooSmall);
        }
        let size = CALL_HEADER_SIZE + parms.len() * PARM_SIZE;

        self.request(request_type::HGCM_CALL32, size)?;
        {
            let (doorbell, buf, _) = self.split();
            put_u32(buf, layout::CLIENT_ID, client);
            put_u32(buf, layout::CALL_FUNCTION, function);
            put_u32(buf, layout::CALL_PARM_COUNT, parms.len() as u32);
            for (i, parm) in parms.iter().enumerate() {
                let off = layout::CALL_PARMS + i * PARM_SIZE;
                parm.encode(&*doorbell, &mut buf[off..off + PARM_SIZE]);
            }
        }

        self.send_hgcm(size, parms)?;

        let (_, buf, _) = self.split();
        for (i, parm) in parms.iter_mut().enumerate() {
            let off = layout::CALL_PARMS + i * PARM_SIZE;
            parm.update(&buf[off..off + PARM_SIZE]);
        }
        Ok(())
    }
}

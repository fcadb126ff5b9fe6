//! Shared Folders Service Client
//!
//! Typed wrappers for the `VBoxSharedFolders` HGCM service. Every
//! operation builds its parameter array, performs one call and maps the
//! host status onto [`RemoteError`].
//!
//! # Operations
//!
//! | function | operation |
//! |---|---|
//! | 1 | `query_mappings` |
//! | 2 | `query_map_name` |
//! | 3 | `open` (create/open/lookup) |
//! | 4 | `close` |
//! | 5/6 | `read` / `write` |
//! | 7 | `lock` |
//! | 8 | `list` |
//! | 9 | `query_info`, `query_volume_info`, `set_file_times` |
//! | 11 | `remove` |
//! | 13 | `unmap_folder` |
//! | 14 | `rename` |
//! | 16 | `set_utf8_mode` |
//! | 17 | `map_folder` |
//! | 21 | `query_map_info` |
//! | 24 | `set_file_size` |
//!
//! Strings travel as `SHFLSTRING`: a 16-bit buffer size, a 16-bit length and
//! the bytes. They are always built into [`ShflString`] so an overlong name
//! fails with [`RemoteError::TooLong`] instead of being cut.

use super::hgcm::HgcmParm;
use super::{get_u16, get_u32, get_u64, put_u16, put_u32, put_u64, rc, Doorbell, Transport, VbError};
use crate::hal::vds::VirtualDma;

/// Host service name
pub const SERVICE_NAME: &str = "VBoxSharedFolders";

/// Handle of a mapped folder
pub type Root = u32;
/// Not a mapped folder
pub const ROOT_NIL: Root = u32::MAX;

/// Handle of an open file or directory
pub type Handle = u64;
/// No handle
pub const HANDLE_NIL: Handle = u64::MAX;

/// Path delimiter used for all mappings
pub const PATH_DELIMITER: u8 = b'\\';

/// Service function numbers
pub mod function {
    pub const QUERY_MAPPINGS: u32 = 1;
    pub const QUERY_MAP_NAME: u32 = 2;
    pub const CREATE: u32 = 3;
    pub const CLOSE: u32 = 4;
    pub const READ: u32 = 5;
    pub const WRITE: u32 = 6;
    pub const LOCK: u32 = 7;
    pub const LIST: u32 = 8;
    pub const INFORMATION: u32 = 9;
    pub const REMOVE: u32 = 11;
    pub const UNMAP_FOLDER: u32 = 13;
    pub const RENAME: u32 = 14;
    pub const SET_UTF8: u32 = 16;
    pub const MAP_FOLDER: u32 = 17;
    pub const QUERY_MAP_INFO: u32 = 21;
    pub const SET_FILE_SIZE: u32 = 24;
}

/// What a create request did
pub mod create_result {
    pub const NO_RESULT: u32 = 0;
    pub const PATH_NOT_FOUND: u32 = 1;
    pub const FILE_NOT_FOUND: u32 = 2;
    pub const FILE_EXISTS: u32 = 3;
    pub const FILE_CREATED: u32 = 4;
    pub const FILE_REPLACED: u32 = 5;
}

bitflags::bitflags! {
    /// Create request flags. The zero values are "open if exists" and
    /// "create if new".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateFlags: u32 {
        /// Only look the object up; no handle is returned
        const LOOKUP = 0x0000_0001;
        const OPEN_TARGET_DIRECTORY = 0x0000_0002;
        /// Object is a directory
        const DIRECTORY = 0x0000_0004;
        const ACT_FAIL_IF_EXISTS = 0x0000_0100;
        const ACT_REPLACE_IF_EXISTS = 0x0000_0200;
        const ACT_OVERWRITE_IF_EXISTS = 0x0000_0300;
        const ACT_FAIL_IF_NEW = 0x0000_1000;
        const ACCESS_READ = 0x0001_0000;
        const ACCESS_WRITE = 0x0002_0000;
        const ACCESS_READWRITE = 0x0003_0000;
        const ACCESS_DENYREAD = 0x0010_0000;
        const ACCESS_DENYWRITE = 0x0020_0000;
        const ACCESS_DENYALL = 0x0030_0000;
    }
}

impl CreateFlags {
    pub const ACT_MASK_IF_EXISTS: u32 = 0x0000_0300;
    pub const ACT_MASK_IF_NEW: u32 = 0x0000_1000;
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ListFlags: u32 {
        const RETURN_ONE = 0x01;
        const RESTART = 0x02;
    }
}

bitflags::bitflags! {
    /// Information request flags; an empty set means "get"
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InfoFlags: u32 {
        const SET = 0x01;
        const NAME = 0x02;
        const SIZE = 0x04;
        const FILE = 0x08;
        const VOLUME = 0x10;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RemoveFlags: u32 {
        const FILE = 0x01;
        const DIR = 0x02;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RenameFlags: u32 {
        const FILE = 0x01;
        const DIR = 0x02;
        const REPLACE_IF_EXISTS = 0x04;
    }
}

bitflags::bitflags! {
    /// Lock flags; an empty set cancels a lock
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LockFlags: u32 {
        const SHARED = 0x01;
        const EXCLUSIVE = 0x02;
        const WAIT = 0x04;
        const ENTIRE = 0x08;
    }
}

bitflags::bitflags! {
    /// Mapping properties from `query_map_info`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapInfoFlags: u64 {
        const AUTO_MOUNT = 0x01;
        const READ_ONLY = 0x02;
        const HOST_ICASE = 0x04;
        const GUEST_ICASE = 0x08;
    }
}

/// Mapping query flags
pub mod mapping_flags {
    pub const UTF8: u32 = 0x01;
    pub const AUTOMOUNT: u32 = 0x02;
}

/// File mode bits of `FsObjInfo::mode`
pub mod fs_mode {
    pub const TYPE_MASK: u32 = 0o170000;
    pub const TYPE_DIRECTORY: u32 = 0o040000;
    pub const TYPE_FILE: u32 = 0o100000;
    pub const TYPE_SYMLINK: u32 = 0o120000;
    pub const DOS_SHIFT: u32 = 16;
    pub const DOS_READONLY: u32 = 0x0001_0000;
    pub const DOS_HIDDEN: u32 = 0x0002_0000;
    pub const DOS_SYSTEM: u32 = 0x0004_0000;
    pub const DOS_DIRECTORY: u32 = 0x0010_0000;
    pub const DOS_ARCHIVED: u32 = 0x0020_0000;
}

// ============================================================================
// Errors
// ============================================================================

/// Failures reported by the shared folders service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteError {
    NotFound,
    PathNotFound,
    AccessDenied,
    AlreadyExists,
    NoMoreEntries,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    SharingViolation,
    InvalidHandle,
    /// A name does not fit the buffer meant for it
    TooLong,
    /// Anything else, with the host status code
    Io(i32),
}

impl RemoteError {
    pub fn from_rc(status: i32) -> Self {
        match status {
            rc::VERR_FILE_NOT_FOUND => RemoteError::NotFound,
            rc::VERR_PATH_NOT_FOUND | rc::VERR_INVALID_NAME => RemoteError::PathNotFound,
            rc::VERR_ACCESS_DENIED | rc::VERR_WRITE_PROTECT => RemoteError::AccessDenied,
            rc::VERR_ALREADY_EXISTS => RemoteError::AlreadyExists,
            rc::VERR_NO_MORE_FILES => RemoteError::NoMoreEntries,
            rc::VERR_NOT_A_DIRECTORY => RemoteError::NotADirectory,
            rc::VERR_IS_A_DIRECTORY => RemoteError::IsADirectory,
            rc::VERR_DIR_NOT_EMPTY => RemoteError::DirectoryNotEmpty,
            rc::VERR_SHARING_VIOLATION | rc::VERR_FILE_LOCK_VIOLATION => RemoteError::SharingViolation,
            rc::VERR_INVALID_HANDLE => RemoteError::InvalidHandle,
            rc::VERR_FILENAME_TOO_LONG | rc::VERR_BUFFER_OVERFLOW => RemoteError::TooLong,
            other => RemoteError::Io(other),
        }
    }
}

impl From<VbError> for RemoteError {
    fn from(e: VbError) -> Self {
        match e {
            VbError::Host(status) => RemoteError::from_rc(status),
            VbError::Timeout => RemoteError::Io(rc::VERR_TIMEOUT),
            VbError::BufferTooSmall => RemoteError::TooLong,
            VbError::DeviceNotFound | VbError::NotConnected | VbError::BufferLock => {
                RemoteError::Io(rc::VERR_GENERAL_FAILURE)
            }
        }
    }
}

// ============================================================================
// Wire structures
// ============================================================================

/// Longest string payload the drivers build or accept
pub const SHFL_STRING_MAX: usize = 768;

const SHFL_STRING_HEADER: usize = 4;

/// A `SHFLSTRING` with inline storage
#[derive(Clone)]
pub struct ShflString {
    buf: [u8; SHFL_STRING_HEADER + SHFL_STRING_MAX + 1],
    len: usize,
}

impl ShflString {
    pub const fn new() -> Self {
        let mut buf = [0u8; SHFL_STRING_HEADER + SHFL_STRING_MAX + 1];
        buf[0] = 1; // size counts the terminator
        Self { buf, len: 0 }
    }

    pub fn from_bytes(s: &[u8]) -> Result<Self, RemoteError> {
        let mut string = Self::new();
        string.push(s)?;
        Ok(string)
    }

    pub fn push(&mut self, s: &[u8]) -> Result<(), RemoteError> {
        if self.len + s.len() > SHFL_STRING_MAX {
            return Err(RemoteError::TooLong);
        }
        let start = SHFL_STRING_HEADER + self.len;
        self.buf[start..start + s.len()].copy_from_slice(s);
        self.len += s.len();
        self.sync();
        Ok(())
    }

    pub fn push_byte(&mut self, b: u8) -> Result<(), RemoteError> {
        self.push(&[b])
    }

    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
            self.sync();
        }
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    fn sync(&mut self) {
        self.buf[SHFL_STRING_HEADER + self.len] = 0;
        put_u16(&mut self.buf, 0, (self.len + 1) as u16);
        put_u16(&mut self.buf, 2, self.len as u16);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[SHFL_STRING_HEADER..SHFL_STRING_HEADER + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Encoded form handed to the host
    pub fn wire(&self) -> &[u8] {
        &self.buf[..SHFL_STRING_HEADER + self.len + 1]
    }
}

impl Default for ShflString {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ShflString {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", core::str::from_utf8(self.as_bytes()).unwrap_or("<binary>"))
    }
}

/// Prepare an empty output `SHFLSTRING` spanning `raw`
fn init_output_string(raw: &mut [u8]) {
    let capacity = (raw.len() - SHFL_STRING_HEADER) as u16;
    put_u16(raw, 0, capacity);
    put_u16(raw, 2, 0);
}

/// Copy the payload of a host-written `SHFLSTRING` into `out`
fn read_output_string(raw: &[u8], out: &mut [u8]) -> Result<usize, RemoteError> {
    let len = get_u16(raw, 2) as usize;
    if SHFL_STRING_HEADER + len > raw.len() || len > out.len() {
        return Err(RemoteError::TooLong);
    }
    out[..len].copy_from_slice(&raw[SHFL_STRING_HEADER..SHFL_STRING_HEADER + len]);
    Ok(len)
}

/// Size of `SHFLFSOBJINFO`
pub const FS_OBJ_INFO_SIZE: usize = 92;

/// Object metadata; times are nanoseconds since 1970-01-01 UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FsObjInfo {
    pub size: i64,
    pub allocated: i64,
    pub access_time: i64,
    pub modification_time: i64,
    pub change_time: i64,
    pub birth_time: i64,
    pub mode: u32,
}

impl FsObjInfo {
    pub fn decode(raw: &[u8]) -> Self {
        Self {
            size: get_u64(raw, 0) as i64,
            allocated: get_u64(raw, 8) as i64,
            access_time: get_u64(raw, 16) as i64,
            modification_time: get_u64(raw, 24) as i64,
            change_time: get_u64(raw, 32) as i64,
            birth_time: get_u64(raw, 40) as i64,
            mode: get_u32(raw, 48),
        }
    }

    pub fn encode(&self, out: &mut [u8]) {
        for b in out[..FS_OBJ_INFO_SIZE].iter_mut() {
            *b = 0;
        }
        put_u64(out, 0, self.size as u64);
        put_u64(out, 8, self.allocated as u64);
        put_u64(out, 16, self.access_time as u64);
        put_u64(out, 24, self.modification_time as u64);
        put_u64(out, 32, self.change_time as u64);
        put_u64(out, 40, self.birth_time as u64);
        put_u32(out, 48, self.mode);
    }

    pub fn is_directory(&self) -> bool {
        self.mode & fs_mode::TYPE_MASK == fs_mode::TYPE_DIRECTORY
    }

    /// DOS attribute byte for this object
    pub fn dos_attributes(&self) -> u8 {
        let mut attr = ((self.mode >> fs_mode::DOS_SHIFT) & 0x37) as u8;
        if self.is_directory() {
            attr |= 0x10;
        }
        attr
    }

    /// Size as DOS sees it, if it fits in 32 bits
    pub fn dos_size(&self) -> Option<u32> {
        u32::try_from(self.size).ok()
    }
}

/// Size of `SHFLCREATEPARMS`
pub const CREATE_PARMS_SIZE: usize = 16 + FS_OBJ_INFO_SIZE;

/// Create request and its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateParms {
    pub handle: Handle,
    pub result: u32,
    pub flags: CreateFlags,
    pub info: FsObjInfo,
}

impl CreateParms {
    pub fn new(flags: CreateFlags) -> Self {
        Self {
            handle: HANDLE_NIL,
            result: create_result::NO_RESULT,
            flags,
            info: FsObjInfo::default(),
        }
    }

    pub fn encode(&self, out: &mut [u8]) {
        put_u64(out, 0, self.handle);
        put_u32(out, 8, self.result);
        put_u32(out, 12, self.flags.bits());
        self.info.encode(&mut out[16..]);
    }

    pub fn decode(raw: &[u8]) -> Self {
        Self {
            handle: get_u64(raw, 0),
            result: get_u32(raw, 8),
            flags: CreateFlags::from_bits_retain(get_u32(raw, 12)),
            info: FsObjInfo::decode(&raw[16..]),
        }
    }

    /// Fold the create result into success or an error
    pub fn outcome(&self) -> Result<(), RemoteError> {
        if self.flags.contains(CreateFlags::LOOKUP) {
            return match self.result {
                create_result::FILE_EXISTS => Ok(()),
                create_result::PATH_NOT_FOUND => Err(RemoteError::PathNotFound),
                _ => Err(RemoteError::NotFound),
            };
        }
        if self.handle != HANDLE_NIL {
            return Ok(());
        }
        match self.result {
            create_result::PATH_NOT_FOUND => Err(RemoteError::PathNotFound),
            create_result::FILE_NOT_FOUND => Err(RemoteError::NotFound),
            create_result::FILE_EXISTS => Err(RemoteError::AlreadyExists),
            _ => Err(RemoteError::Io(rc::VERR_GENERAL_FAILURE)),
        }
    }
}

/// Size of the fixed part of `SHFLVOLINFO` the drivers read
pub const VOLUME_INFO_SIZE: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub bytes_per_unit: u32,
    pub bytes_per_sector: u32,
    pub serial: u32,
}

impl VolumeInfo {
    pub fn decode(raw: &[u8]) -> Self {
        Self {
            total_bytes: get_u64(raw, 0),
            available_bytes: get_u64(raw, 8),
            bytes_per_unit: get_u32(raw, 16),
            bytes_per_sector: get_u32(raw, 20),
            serial: get_u32(raw, 24),
        }
    }
}

/// Longest entry name accepted from a listing
pub const MAX_NAME_BYTES: usize = 768;

/// `SHFLDIRINFO`: object info, short name, then the name string
const DIRINFO_NAME_OFFSET: usize = FS_OBJ_INFO_SIZE + 2 + 28;
const LIST_BUFFER_SIZE: usize = DIRINFO_NAME_OFFSET + SHFL_STRING_HEADER + MAX_NAME_BYTES + 2;

/// One directory entry returned by `list`
#[derive(Clone)]
pub struct DirEntry {
    pub info: FsObjInfo,
    name: [u8; MAX_NAME_BYTES],
    name_len: usize,
}

impl DirEntry {
    pub const fn new() -> Self {
        Self {
            info: FsObjInfo {
                size: 0,
                allocated: 0,
                access_time: 0,
                modification_time: 0,
                change_time: 0,
                birth_time: 0,
                mode: 0,
            },
            name: [0; MAX_NAME_BYTES],
            name_len: 0,
        }
    }

    /// UTF-8 name of the entry
    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len]
    }

    pub fn set(&mut self, info: FsObjInfo, name: &[u8]) -> Result<(), RemoteError> {
        if name.len() > MAX_NAME_BYTES {
            return Err(RemoteError::TooLong);
        }
        self.info = info;
        self.name[..name.len()].copy_from_slice(name);
        self.name_len = name.len();
        Ok(())
    }
}

impl Default for DirEntry {
    fn default() -> Self {
        Self::new()
    }
}

/// A mapping as returned by `query_mappings`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mapping {
    pub status: u32,
    pub root: Root,
}

/// Most mappings `query_mappings` reports
pub const MAX_MAPPINGS: usize = 64;

/// Result of `query_map_info`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapInfo {
    pub flags: MapInfoFlags,
    pub version: u32,
    pub name_len: usize,
    pub mount_point_len: usize,
}

// ============================================================================
// Operations
// ============================================================================

/// The shared folders operations the redirector needs
pub trait SharedFolders {
    /// Create, open or look up `path`. Succeeds only when a handle was
    /// returned, or for lookups when the object exists.
    fn open(&mut self, root: Root, path: &[u8], parms: &mut CreateParms) -> Result<(), RemoteError>;
    fn close(&mut self, root: Root, handle: Handle) -> Result<(), RemoteError>;
    fn read(&mut self, root: Root, handle: Handle, offset: u64, buf: &mut [u8]) -> Result<u32, RemoteError>;
    fn write(&mut self, root: Root, handle: Handle, offset: u64, data: &[u8]) -> Result<u32, RemoteError>;
    fn lock(&mut self, root: Root, handle: Handle, offset: u64, length: u64, flags: LockFlags) -> Result<(), RemoteError>;
    /// Return the next entry of an open directory, optionally filtered
    fn list(
        &mut self,
        root: Root,
        handle: Handle,
        flags: ListFlags,
        pattern: Option<&[u8]>,
        entry: &mut DirEntry,
    ) -> Result<(), RemoteError>;
    fn remove(&mut self, root: Root, path: &[u8], flags: RemoveFlags) -> Result<(), RemoteError>;
    fn rename(&mut self, root: Root, src: &[u8], dst: &[u8], flags: RenameFlags) -> Result<(), RemoteError>;
    fn query_info(&mut self, root: Root, handle: Handle) -> Result<FsObjInfo, RemoteError>;
    fn query_volume_info(&mut self, root: Root, handle: Handle) -> Result<VolumeInfo, RemoteError>;
    /// Update the timestamps of an open object; zero times are left alone
    fn set_file_times(&mut self, root: Root, handle: Handle, info: &FsObjInfo) -> Result<(), RemoteError>;
    fn set_file_size(&mut self, root: Root, handle: Handle, size: u64) -> Result<(), RemoteError>;
    fn map_folder(&mut self, name: &[u8]) -> Result<Root, RemoteError>;
    fn unmap_folder(&mut self, root: Root) -> Result<(), RemoteError>;
    fn query_mappings(&mut self, out: &mut [Mapping]) -> Result<usize, RemoteError>;
    /// Display name of a mapping, returning its length
    fn query_map_name(&mut self, root: Root, out: &mut [u8]) -> Result<usize, RemoteError>;
    fn query_map_info(&mut self, root: Root, name: &mut [u8], mount_point: &mut [u8]) -> Result<MapInfo, RemoteError>;
    fn set_utf8_mode(&mut self) -> Result<(), RemoteError>;

    /// Metadata of `path` without opening it
    fn lookup(&mut self, root: Root, path: &[u8]) -> Result<FsObjInfo, RemoteError> {
        let mut parms = CreateParms::new(CreateFlags::LOOKUP);
        self.open(root, path, &mut parms)?;
        Ok(parms.info)
    }
}

/// [`SharedFolders`] over an HGCM connection
pub struct ShflClient<D: Doorbell> {
    transport: Transport<D>,
    client_id: Option<u32>,
}

impl<D: Doorbell> ShflClient<D> {
    pub const fn new(transport: Transport<D>) -> Self {
        Self {
            transport,
            client_id: None,
        }
    }

    pub fn connect(&mut self) -> Result<(), VbError> {
        let id = self.transport.hgcm_connect(SERVICE_NAME)?;
        self.client_id = Some(id);
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), VbError> {
        match self.client_id.take() {
            Some(id) => self.transport.hgcm_disconnect(id),
            None => Ok(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client_id.is_some()
    }

    pub fn transport(&mut self) -> &mut Transport<D> {
        &mut self.transport
    }

    /// Bring the client up where it will stay resident: pin the request
    /// buffer, report the guest, connect and switch names to UTF-8.
    ///
    /// A failed step releases whatever the earlier ones took.
    pub fn start<V: VirtualDma + ?Sized>(&mut self, vds: &mut V) -> Result<(), RemoteError> {
        self.transport.lock_buffer(vds)?;
        let result = self.handshake();
        if let Err(e) = result {
            log::error!("[VBSF] cannot start shared folders client: {:?}", e);
            self.stop(vds);
        }
        result
    }

    fn handshake(&mut self) -> Result<(), RemoteError> {
        self.transport.report_guest_info()?;
        self.connect()?;
        self.set_utf8_mode()?;
        log::info!("[VBSF] connected, UTF-8 names");
        Ok(())
    }

    /// Undo [`ShflClient::start`]
    pub fn stop<V: VirtualDma + ?Sized>(&mut self, vds: &mut V) {
        if let Err(e) = self.disconnect() {
            log::warn!("[VBSF] disconnect failed: {}", e);
        }
        self.transport.unlock_buffer(vds);
    }

    fn call(&mut self, function: u32, parms: &mut [HgcmParm<'_>]) -> Result<(), RemoteError> {
        let client = self.client_id.ok_or(VbError::NotConnected)?;
        self.transport.hgcm_call(client, function, parms).map_err(|e| {
            log::trace!("[VBSF] function {} failed: {:?}", function, e);
            RemoteError::from(e)
        })
    }

    fn information(&mut self, root: Root, handle: Handle, flags: InfoFlags, buf: &mut [u8]) -> Result<u32, RemoteError> {
        let cb = buf.len() as u32;
        let mut parms = [
            HgcmParm::U32(root),
            HgcmParm::U64(handle),
            HgcmParm::U32(flags.bits()),
            HgcmParm::U32(cb),
            HgcmParm::in_out(buf),
        ];
        self.call(function::INFORMATION, &mut parms)?;
        Ok(parms[3].as_u32())
    }
}

impl<D: Doorbell> SharedFolders for ShflClient<D> {
    fn open(&mut self, root: Root, path: &[u8], parms: &mut CreateParms) -> Result<(), RemoteError> {
        let path = ShflString::from_bytes(path)?;
        let mut raw = [0u8; CREATE_PARMS_SIZE];
        parms.encode(&mut raw);

        let mut hgcm = [HgcmParm::U32(root), HgcmParm::In(path.wire()), HgcmParm::in_out(&mut raw)];
        self.call(function::CREATE, &mut hgcm)?;
        drop(hgcm);

        *parms = CreateParms::decode(&raw);
        parms.outcome()
    }

    fn close(&mut self, root: Root, handle: Handle) -> Result<(), RemoteError> {
        self.call(function::CLOSE, &mut [HgcmParm::U32(root), HgcmParm::U64(handle)])
    }

    fn read(&mut self, root: Root, handle: Handle, offset: u64, buf: &mut [u8]) -> Result<u32, RemoteError> {
        let cb = buf.len() as u32;
        let mut parms = [
            HgcmParm::U32(root),
            HgcmParm::U64(handle),
            HgcmParm::U64(offset),
            HgcmParm::U32(cb),
            HgcmParm::output(buf),
        ];
        self.call(function::READ, &mut parms)?;
        Ok(parms[3].as_u32())
    }

    fn write(&mut self, root: Root, handle: Handle, offset: u64, data: &[u8]) -> Result<u32, RemoteError> {
        let mut parms = [
            HgcmParm::U32(root),
            HgcmParm::U64(handle),
            HgcmParm::U64(offset),
            HgcmParm::U32(data.len() as u32),
            HgcmParm::In(data),
        ];
        self.call(function::WRITE, &mut parms)?;
        Ok(parms[3].as_u32())
    }

    fn lock(&mut self, root: Root, handle: Handle, offset: u64, length: u64, flags: LockFlags) -> Result<(), RemoteError> {
        self.call(
            function::LOCK,
            &mut [
                HgcmParm::U32(root),
                HgcmParm::U64(handle),
                HgcmParm::U64(offset),
                HgcmParm::U64(length),
                HgcmParm::U32(flags.bits()),
            ],
        )
    }

    fn list(
        &mut self,
        root: Root,
        handle: Handle,
        flags: ListFlags,
        pattern: Option<&[u8]>,
        entry: &mut DirEntry,
    ) -> Result<(), RemoteError> {
        let pattern = match pattern {
            Some(p) => Some(ShflString::from_bytes(p)?),
            None => None,
        };
        let mut raw = [0u8; LIST_BUFFER_SIZE];

        let mut parms = [
            HgcmParm::U32(root),
            HgcmParm::U64(handle),
            HgcmParm::U32((flags | ListFlags::RETURN_ONE).bits()),
            HgcmParm::U32(LIST_BUFFER_SIZE as u32),
            HgcmParm::In(pattern.as_ref().map(|p| p.wire()).unwrap_or(&[])),
            HgcmParm::output(&mut raw),
            HgcmParm::U32(0),
            HgcmParm::U32(0),
        ];
        self.call(function::LIST, &mut parms)?;
        let count = parms[7].as_u32();
        drop(parms);

        if count == 0 {
            return Err(RemoteError::NoMoreEntries);
        }
        let info = FsObjInfo::decode(&raw);
        let mut name = [0u8; MAX_NAME_BYTES];
        let len = read_output_string(&raw[DIRINFO_NAME_OFFSET..], &mut name)?;
        entry.set(info, &name[..len])
    }

    fn remove(&mut self, root: Root, path: &[u8], flags: RemoveFlags) -> Result<(), RemoteError> {
        let path = ShflString::from_bytes(path)?;
        self.call(
            function::REMOVE,
            &mut [HgcmParm::U32(root), HgcmParm::In(path.wire()), HgcmParm::U32(flags.bits())],
        )
    }

    fn rename(&mut self, root: Root, src: &[u8], dst: &[u8], flags: RenameFlags) -> Result<(), RemoteError> {
        let src = ShflString::from_bytes(src)?;
        let dst = ShflString::from_bytes(dst)?;
        self.call(
            function::RENAME,
            &mut [
                HgcmParm::U32(root),
                HgcmParm::In(src.wire()),
                HgcmParm::In(dst.wire()),
                HgcmParm::U32(flags.bits()),
            ],
        )
    }

    fn query_info(&mut self, root: Root, handle: Handle) -> Result<FsObjInfo, RemoteError> {
        let mut raw = [0u8; FS_OBJ_INFO_SIZE];
        self.information(root, handle, InfoFlags::FILE, &mut raw)?;
        Ok(FsObjInfo::decode(&raw))
    }

    fn query_volume_info(&mut self, root: Root, handle: Handle) -> Result<VolumeInfo, RemoteError> {
        let mut raw = [0u8; VOLUME_INFO_SIZE];
        self.information(root, handle, InfoFlags::VOLUME, &mut raw)?;
        Ok(VolumeInfo::decode(&raw))
    }

    fn set_file_times(&mut self, root: Root, handle: Handle, info: &FsObjInfo) -> Result<(), RemoteError> {
        let mut raw = [0u8; FS_OBJ_INFO_SIZE];
        info.encode(&mut raw);
        self.information(root, handle, InfoFlags::SET | InfoFlags::FILE, &mut raw)
            .map(|_| ())
    }

    fn set_file_size(&mut self, root: Root, handle: Handle, size: u64) -> Result<(), RemoteError> {
        let result = self.call(
            function::SET_FILE_SIZE,
            &mut [HgcmParm::U32(root), HgcmParm::U64(handle), HgcmParm::U64(size)],
        );
        match result {
            // Older hosts only know the information call
            Err(RemoteError::Io(rc::VERR_NOT_SUPPORTED)) | Err(RemoteError::Io(rc::VERR_INVALID_PARAMETER)) => {
                let info = FsObjInfo {
                    size: size as i64,
                    ..FsObjInfo::default()
                };
                let mut raw = [0u8; FS_OBJ_INFO_SIZE];
                info.encode(&mut raw);
                self.information(root, handle, InfoFlags::SET | InfoFlags::SIZE, &mut raw)
                    .map(|_| ())
            }
            other => other,
        }
    }

    fn map_folder(&mut self, name: &[u8]) -> Result<Root, RemoteError> {
        let name = ShflString::from_bytes(name)?;
        let mut parms = [
            HgcmParm::In(name.wire()),
            HgcmParm::U32(ROOT_NIL),
            HgcmParm::U32(PATH_DELIMITER as u32),
            // case-insensitive lookups on the host
            HgcmParm::U32(0),
        ];
        self.call(function::MAP_FOLDER, &mut parms)?;
        Ok(parms[1].as_u32())
    }

    fn unmap_folder(&mut self, root: Root) -> Result<(), RemoteError> {
        self.call(function::UNMAP_FOLDER, &mut [HgcmParm::U32(root)])
    }

    fn query_mappings(&mut self, out: &mut [Mapping]) -> Result<usize, RemoteError> {
        let capacity = out.len().min(MAX_MAPPINGS);
        let mut raw = [0u8; MAX_MAPPINGS * 8];
        let mut parms = [
            HgcmParm::U32(mapping_flags::UTF8),
            HgcmParm::U32(capacity as u32),
            HgcmParm::output(&mut raw[..capacity * 8]),
        ];
        self.call(function::QUERY_MAPPINGS, &mut parms)?;
        let count = (parms[1].as_u32() as usize).min(capacity);
        drop(parms);

        for (i, mapping) in out.iter_mut().take(count).enumerate() {
            *mapping = Mapping {
                status: get_u32(&raw, i * 8),
                root: get_u32(&raw, i * 8 + 4),
            };
        }
        Ok(count)
    }

    fn query_map_name(&mut self, root: Root, out: &mut [u8]) -> Result<usize, RemoteError> {
        let mut raw = [0u8; SHFL_STRING_HEADER + SHFL_STRING_MAX];
        init_output_string(&mut raw);
        self.call(function::QUERY_MAP_NAME, &mut [HgcmParm::U32(root), HgcmParm::in_out(&mut raw)])?;
        read_output_string(&raw, out)
    }

    fn query_map_info(&mut self, root: Root, name: &mut [u8], mount_point: &mut [u8]) -> Result<MapInfo, RemoteError> {
        let mut raw_name = [0u8; SHFL_STRING_HEADER + 256];
        let mut raw_mount = [0u8; SHFL_STRING_HEADER + 256];
        init_output_string(&mut raw_name);
        init_output_string(&mut raw_mount);

        let mut parms = [
            HgcmParm::U32(root),
            HgcmParm::in_out(&mut raw_name),
            HgcmParm::in_out(&mut raw_mount),
            HgcmParm::U64(0),
            HgcmParm::U32(0),
        ];
        self.call(function::QUERY_MAP_INFO, &mut parms)?;
        let flags = MapInfoFlags::from_bits_truncate(parms[3].as_u64());
        let version = parms[4].as_u32();
        drop(parms);

        Ok(MapInfo {
            flags,
            version,
            name_len: read_output_string(&raw_name, name)?,
            mount_point_len: read_output_string(&raw_mount, mount_point)?,
        })
    }

    fn set_utf8_mode(&mut self) -> Result<(), RemoteError> {
        self.call(function::SET_UTF8, &mut [])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vbox::hgcm::{layout, HGCM_FLAG_DONE, PARM_SIZE};
    use crate::hal::vds::IdentityDma;
    use crate::vbox::{header, request_type, TransportConfig};

    /// Tiny host with a single file "\\HELLO.TXT" containing "hello world"
    #[derive(Default)]
    struct TinyHost {
        calls: Vec<u32>,
        legacy: bool,
        size_via_info: Option<u64>,
    }

    fn parm_u32(request: &[u8], i: usize) -> u32 {
        get_u32(request, layout::CALL_PARMS + i * PARM_SIZE + 4)
    }

    fn set_parm_u32(request: &mut [u8], i: usize, v: u32) {
        put_u32(request, layout::CALL_PARMS + i * PARM_SIZE + 4, v);
    }

    fn string_payload(wire: &[u8]) -> &[u8] {
        let len = get_u16(wire, 2) as usize;
        &wire[4..4 + len]
    }

    impl TinyHost {
        fn call(&mut self, func: u32, request: &mut [u8], parms: &mut [HgcmParm<'_>]) -> i32 {
            self.calls.push(func);
            let file_info = FsObjInfo { size: 11, mode: fs_mode::TYPE_FILE, ..FsObjInfo::default() };
            match func {
                function::MAP_FOLDER => {
                    set_parm_u32(request, 1, 7);
                    0
                }
                function::CREATE => {
                    let path = match &parms[1] {
                        HgcmParm::In(wire) => string_payload(wire).to_vec(),
                        _ => return rc::VERR_INVALID_PARAMETER,
                    };
                    if let HgcmParm::InOut { buf, .. } = &mut parms[2] {
                        let mut cp = CreateParms::decode(buf);
                        if path == b"\\HELLO.TXT" {
                            cp.result = create_result::FILE_EXISTS;
                            cp.info = file_info;
                            if !cp.flags.contains(CreateFlags::LOOKUP) {
                                cp.handle = 0x10;
                            }
                        } else {
                            cp.result = create_result::FILE_NOT_FOUND;
                        }
                        cp.encode(buf);
                    }
                    0
                }
                function::READ => {
                    let offset = get_u64(request, layout::CALL_PARMS + 2 * PARM_SIZE + 4) as usize;
                    let data = &b"hello world"[offset.min(11)..];
                    let n = if let HgcmParm::Out { buf, .. } = &mut parms[4] {
                        let n = data.len().min(buf.len());
                        buf[..n].copy_from_slice(&data[..n]);
                        n
                    } else {
                        0
                    };
                    set_parm_u32(request, 3, n as u32);
                    0
                }
                function::LIST => {
                    if let HgcmParm::Out { buf, .. } = &mut parms[5] {
                        file_info.encode(buf);
                        let name = b"Hello World.txt";
                        let at = DIRINFO_NAME_OFFSET;
                        put_u16(buf, at, name.len() as u16 + 1);
                        put_u16(buf, at + 2, name.len() as u16);
                        buf[at + 4..at + 4 + name.len()].copy_from_slice(name);
                    }
                    set_parm_u32(request, 7, 1);
                    0
                }
                function::SET_UTF8 if self.legacy => rc::VERR_NOT_SUPPORTED,
                function::SET_UTF8 => 0,
                function::SET_FILE_SIZE if self.legacy => rc::VERR_NOT_SUPPORTED,
                function::SET_FILE_SIZE => 0,
                function::INFORMATION => {
                    if parm_u32(request, 2) == (InfoFlags::SET | InfoFlags::SIZE).bits() {
                        if let HgcmParm::InOut { buf, .. } = &parms[4] {
                            self.size_via_info = Some(FsObjInfo::decode(buf).size as u64);
                        }
                    }
                    0
                }
                function::QUERY_MAP_NAME => {
                    if let HgcmParm::InOut { buf, .. } = &mut parms[1] {
                        put_u16(buf, 2, 5);
                        buf[4..9].copy_from_slice(b"share");
                    }
                    0
                }
                _ => rc::VERR_NOT_SUPPORTED,
            }
        }
    }

    impl Doorbell for TinyHost {
        fn ring(&mut self, _phys: u32, request: &mut [u8], parms: &mut [HgcmParm<'_>]) {
            let result = match get_u32(request, header::REQUEST_TYPE) {
                request_type::HGCM_CONNECT => {
                    put_u32(request, layout::CONNECT_CLIENT_ID, 3);
                    0
                }
                request_type::HGCM_CALL32 => {
                    let func = get_u32(request, layout::CALL_FUNCTION);
                    self.call(func, request, parms)
                }
                _ => 0,
            };
            put_u32(request, layout::RESULT, result as u32);
            put_u32(request, layout::FLAGS, HGCM_FLAG_DONE);
            put_u32(request, header::RC, 0);
        }
    }

    fn client(host: TinyHost) -> ShflClient<TinyHost> {
        let mut c = ShflClient::new(Transport::new(host, TransportConfig::default()));
        c.connect().unwrap();
        c
    }

    #[test]
    fn test_start_and_stop() {
        let mut c = ShflClient::new(Transport::new(TinyHost::default(), TransportConfig::default()));
        c.start(&mut IdentityDma).unwrap();
        assert!(c.is_connected());
        assert!(c.transport().is_locked());
        assert_eq!(c.transport().doorbell().calls, vec![function::SET_UTF8]);

        c.stop(&mut IdentityDma);
        assert!(!c.is_connected());
        assert!(!c.transport().is_locked());
    }

    #[test]
    fn test_start_failure_releases_everything() {
        let host = TinyHost { legacy: true, ..TinyHost::default() };
        let mut c = ShflClient::new(Transport::new(host, TransportConfig::default()));
        assert_eq!(c.start(&mut IdentityDma), Err(RemoteError::Io(rc::VERR_NOT_SUPPORTED)));
        assert!(!c.is_connected());
        assert!(!c.transport().is_locked());
    }

    #[test]
    fn test_requires_connection() {
        let mut c = ShflClient::new(Transport::new(TinyHost::default(), TransportConfig::default()));
        assert_eq!(c.unmap_folder(1), Err(RemoteError::Io(rc::VERR_GENERAL_FAILURE)));
    }

    #[test]
    fn test_map_and_open() {
        let mut c = client(TinyHost::default());
        let root = c.map_folder(b"share").unwrap();
        assert_eq!(root, 7);

        let mut parms = CreateParms::new(CreateFlags::ACT_FAIL_IF_NEW | CreateFlags::ACCESS_READ);
        c.open(root, b"\\HELLO.TXT", &mut parms).unwrap();
        assert_eq!(parms.handle, 0x10);
        assert_eq!(parms.info.size, 11);

        let mut parms = CreateParms::new(CreateFlags::ACT_FAIL_IF_NEW | CreateFlags::ACCESS_READ);
        assert_eq!(c.open(root, b"\\MISSING", &mut parms), Err(RemoteError::NotFound));
    }

    #[test]
    fn test_lookup() {
        let mut c = client(TinyHost::default());
        assert_eq!(c.lookup(7, b"\\HELLO.TXT").map(|i| i.size), Ok(11));
        assert_eq!(c.lookup(7, b"\\NOPE").map(|i| i.size), Err(RemoteError::NotFound));
    }

    #[test]
    fn test_read() {
        let mut c = client(TinyHost::default());
        let mut buf = [0u8; 32];
        assert_eq!(c.read(7, 0x10, 6, &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"world");
    }

    #[test]
    fn test_list_one() {
        let mut c = client(TinyHost::default());
        let mut entry = DirEntry::new();
        c.list(7, 0x20, ListFlags::empty(), None, &mut entry).unwrap();
        assert_eq!(entry.name(), b"Hello World.txt");
        assert_eq!(entry.info.size, 11);
    }

    #[test]
    fn test_set_file_size_fallback() {
        let mut c = client(TinyHost { legacy: true, ..TinyHost::default() });
        c.set_file_size(7, 0x10, 1234).unwrap();
        assert_eq!(c.transport().doorbell().size_via_info, Some(1234));

        let mut c = client(TinyHost::default());
        c.set_file_size(7, 0x10, 1234).unwrap();
        assert_eq!(c.transport().doorbell().size_via_info, None);
    }

    #[test]
    fn test_query_map_name() {
        let mut c = client(TinyHost::default());
        let mut name = [0u8; 16];
        assert_eq!(c.query_map_name(7, &mut name), Ok(5));
        assert_eq!(&name[..5], b"share");
        let mut tiny = [0u8; 2];
        assert_eq!(c.query_map_name(7, &mut tiny), Err(RemoteError::TooLong));
    }

    #[test]
    fn test_overlong_path_never_reaches_host() {
        let mut c = client(TinyHost::default());
        let long = [b'A'; SHFL_STRING_MAX + 1];
        let before = c.transport().doorbell().calls.len();
        assert_eq!(c.remove(7, &long, RemoveFlags::FILE), Err(RemoteError::TooLong));
        assert_eq!(c.transport().doorbell().calls.len(), before);
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(RemoteError::from_rc(rc::VERR_DIR_NOT_EMPTY), RemoteError::DirectoryNotEmpty);
        assert_eq!(RemoteError::from_rc(rc::VERR_NO_MORE_FILES), RemoteError::NoMoreEntries);
        assert_eq!(RemoteError::from_rc(-9999), RemoteError::Io(-9999));
        assert_eq!(RemoteError::from(VbError::Timeout), RemoteError::Io(rc::VERR_TIMEOUT));
    }

    #[test]
    fn test_shfl_string() {
        let mut s = ShflString::from_bytes(b"\\DIR").unwrap();
        s.push_byte(b'\\').unwrap();
        assert_eq!(s.as_bytes(), b"\\DIR\\");
        assert_eq!(get_u16(s.wire(), 0), 6);
        assert_eq!(get_u16(s.wire(), 2), 5);
        assert_eq!(*s.wire().last().unwrap(), 0);
        s.truncate(4);
        assert_eq!(s.as_bytes(), b"\\DIR");
    }

    #[test]
    fn test_dos_attributes() {
        let dir = FsObjInfo { mode: fs_mode::TYPE_DIRECTORY, ..FsObjInfo::default() };
        assert_eq!(dir.dos_attributes(), 0x10);
        let ro = FsObjInfo { mode: fs_mode::TYPE_FILE | fs_mode::DOS_READONLY | fs_mode::DOS_ARCHIVED, ..FsObjInfo::default() };
        assert_eq!(ro.dos_attributes(), 0x21);
        let huge = FsObjInfo { size: 0x1_0000_0000, ..FsObjInfo::default() };
        assert_eq!(huge.dos_size(), None);
    }
}

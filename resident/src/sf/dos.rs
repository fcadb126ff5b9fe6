//! DOS Kernel Structures
//!
//! The redirector works on structures that belong to the DOS kernel and
//! are reached through far pointers:
//!
//! - **SDA** - swappable data area; current file names, DTA, search data
//! - **SFT** - system file table entry, one per open file
//! - **CDS** - current directory structure, one per drive letter
//! - **SDB** - search data block kept at the start of the DTA between
//!   find-first and find-next
//!
//! Each structure is decoded into a plain value, changed, and written back
//! field by field so the bytes DOS owns are left as they were.

use crate::hal::memory::{DosMemory, FarPtr};
use crate::rtl::FcbName;
use crate::vbox::shfl::RemoteError;

// ============================================================================
// Error codes
// ============================================================================

/// DOS error codes returned in AX with carry set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DosError {
    InvalidFunction = 0x01,
    FileNotFound = 0x02,
    PathNotFound = 0x03,
    TooManyOpenFiles = 0x04,
    AccessDenied = 0x05,
    InvalidHandle = 0x06,
    InvalidAccess = 0x0C,
    InvalidData = 0x0D,
    InvalidDrive = 0x0F,
    NotSameDevice = 0x11,
    NoMoreFiles = 0x12,
    GeneralFailure = 0x1F,
    SharingViolation = 0x20,
    LockViolation = 0x21,
    FileExists = 0x50,
}

impl DosError {
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl From<RemoteError> for DosError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::NotFound => DosError::FileNotFound,
            RemoteError::PathNotFound => DosError::PathNotFound,
            RemoteError::AccessDenied => DosError::AccessDenied,
            RemoteError::IsADirectory => DosError::AccessDenied,
            RemoteError::AlreadyExists => DosError::FileExists,
            RemoteError::NoMoreEntries => DosError::NoMoreFiles,
            RemoteError::NotADirectory => DosError::PathNotFound,
            // DOS has no "directory not empty"; callers have always seen 3
            RemoteError::DirectoryNotEmpty => DosError::PathNotFound,
            RemoteError::SharingViolation => DosError::SharingViolation,
            RemoteError::TooLong => DosError::PathNotFound,
            RemoteError::InvalidHandle => DosError::InvalidHandle,
            RemoteError::Io(_) => DosError::GeneralFailure,
        }
    }
}

// ============================================================================
// Flag words
// ============================================================================

bitflags::bitflags! {
    /// Directory entry attribute byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_LABEL = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

impl Attributes {
    /// Attributes a search must ask for before such entries are returned
    pub const SPECIAL: Attributes = Attributes::HIDDEN.union(Attributes::SYSTEM).union(Attributes::DIRECTORY);
}

bitflags::bitflags! {
    /// SFT device information word for redirected files
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceInfo: u16 {
        /// File was not written since it was opened
        const UNWRITTEN = 0x0040;
        /// A program set the date and time; push them on close
        const DATE_SET = 0x4000;
        /// File belongs to a network redirector
        const REMOTE = 0x8000;
    }
}

/// Drive number in the low bits of the device information word
pub const DEVICE_INFO_DRIVE_MASK: u16 = 0x003F;

bitflags::bitflags! {
    /// CDS flags word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CdsFlags: u16 {
        const SUBST = 0x1000;
        const JOIN = 0x2000;
        const PHYSICAL = 0x4000;
        const NETWORK = 0x8000;
    }
}

// ============================================================================
// Swappable data area
// ============================================================================

/// Offsets into the DOS 4+ swappable data area
pub mod sda {
    pub const DTA: u16 = 0x0C;
    pub const PSP: u16 = 0x10;
    pub const CURRENT_DRIVE: u16 = 0x16;
    /// First canonical file name
    pub const FN1: u16 = 0x9E;
    /// Second canonical file name (rename target)
    pub const FN2: u16 = 0x11E;
    pub const SEARCH_DATA_BLOCK: u16 = 0x19E;
    /// Directory entry filled by find-first/find-next
    pub const FOUND_ENTRY: u16 = 0x1B3;
    pub const SEARCH_ATTR: u16 = 0x24D;
    pub const OPEN_MODE: u16 = 0x24E;
    pub const CURRENT_CDS: u16 = 0x282;
    pub const EXT_OPEN_ACTION: u16 = 0x2DD;
    pub const EXT_OPEN_ATTR: u16 = 0x2DF;
    pub const EXT_OPEN_MODE: u16 = 0x2E1;
}

/// The caller's DTA, if `len` bytes of it are addressable
pub fn dta(mem: &dyn DosMemory, sda_ptr: FarPtr, len: usize) -> Result<FarPtr, DosError> {
    let dta = mem.read_far_ptr(sda_ptr.add(sda::DTA));
    if mem.contains(dta, len) {
        Ok(dta)
    } else {
        log::warn!("[VBSF] DTA {:04X}:{:04X} too short for {} bytes", dta.segment, dta.offset, len);
        Err(DosError::InvalidData)
    }
}

/// Length of the canonical file name buffers
pub const FILE_NAME_SIZE: usize = 128;

/// NUL-terminated canonical name at `ptr`, without the terminator
pub fn read_file_name(mem: &dyn DosMemory, ptr: FarPtr, out: &mut [u8; FILE_NAME_SIZE]) -> usize {
    let raw = mem.bytes(ptr, FILE_NAME_SIZE);
    let len = raw.iter().position(|&b| b == 0).unwrap_or(FILE_NAME_SIZE);
    out[..len].copy_from_slice(&raw[..len]);
    len
}

/// Drive index (A = 0) of a canonical `X:\...` name
pub fn drive_of(name: &[u8]) -> Option<u8> {
    match name {
        [letter, b':', ..] if letter.is_ascii_alphabetic() => Some(letter.to_ascii_uppercase() - b'A'),
        _ => None,
    }
}

// ============================================================================
// System file table entry
// ============================================================================

mod sft_offset {
    pub const HANDLE_COUNT: u16 = 0x00;
    pub const OPEN_MODE: u16 = 0x02;
    pub const ATTR: u16 = 0x04;
    pub const DEVICE_INFO: u16 = 0x05;
    pub const DEVICE_PTR: u16 = 0x07;
    pub const START_CLUSTER: u16 = 0x0B;
    pub const TIME: u16 = 0x0D;
    pub const DATE: u16 = 0x0F;
    pub const SIZE: u16 = 0x11;
    pub const POSITION: u16 = 0x15;
    pub const NAME: u16 = 0x20;
}

/// Fields of an SFT entry the redirector uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sft {
    pub handle_count: u16,
    pub open_mode: u16,
    pub attr: u8,
    pub device_info: DeviceInfo,
    pub drive: u8,
    /// Index of the open file in the driver's arena
    pub start_cluster: u16,
    pub time: u16,
    pub date: u16,
    pub size: u32,
    pub position: u32,
    pub name: FcbName,
}

impl Sft {
    pub fn read(mem: &dyn DosMemory, ptr: FarPtr) -> Self {
        let info = mem.read_u16(ptr.add(sft_offset::DEVICE_INFO));
        let mut name = [b' '; 11];
        name.copy_from_slice(mem.bytes(ptr.add(sft_offset::NAME), 11));
        Self {
            handle_count: mem.read_u16(ptr.add(sft_offset::HANDLE_COUNT)),
            open_mode: mem.read_u16(ptr.add(sft_offset::OPEN_MODE)),
            attr: mem.read_u8(ptr.add(sft_offset::ATTR)),
            device_info: DeviceInfo::from_bits_retain(info & !DEVICE_INFO_DRIVE_MASK),
            drive: (info & DEVICE_INFO_DRIVE_MASK) as u8,
            start_cluster: mem.read_u16(ptr.add(sft_offset::START_CLUSTER)),
            time: mem.read_u16(ptr.add(sft_offset::TIME)),
            date: mem.read_u16(ptr.add(sft_offset::DATE)),
            size: mem.read_u32(ptr.add(sft_offset::SIZE)),
            position: mem.read_u32(ptr.add(sft_offset::POSITION)),
            name,
        }
    }

    pub fn write(&self, mem: &mut dyn DosMemory, ptr: FarPtr) {
        let info = self.device_info.bits() | (self.drive as u16 & DEVICE_INFO_DRIVE_MASK);
        mem.write_u16(ptr.add(sft_offset::HANDLE_COUNT), self.handle_count);
        mem.write_u16(ptr.add(sft_offset::OPEN_MODE), self.open_mode);
        mem.write_u8(ptr.add(sft_offset::ATTR), self.attr);
        mem.write_u16(ptr.add(sft_offset::DEVICE_INFO), info);
        mem.write_u16(ptr.add(sft_offset::START_CLUSTER), self.start_cluster);
        mem.write_u16(ptr.add(sft_offset::TIME), self.time);
        mem.write_u16(ptr.add(sft_offset::DATE), self.date);
        mem.write_u32(ptr.add(sft_offset::SIZE), self.size);
        mem.write_u32(ptr.add(sft_offset::POSITION), self.position);
        mem.bytes_mut(ptr.add(sft_offset::NAME), 11).copy_from_slice(&self.name);
    }

    /// Redirected files carry no device driver
    pub fn clear_device(mem: &mut dyn DosMemory, ptr: FarPtr) {
        mem.write_far_ptr(ptr.add(sft_offset::DEVICE_PTR), FarPtr::NULL);
    }

    pub fn is_remote(&self) -> bool {
        self.device_info.contains(DeviceInfo::REMOTE)
    }
}

/// Access bits of an SFT or INT 21h open mode
pub mod open_mode {
    pub const ACCESS_MASK: u16 = 0x0003;
    pub const READ: u16 = 0x0000;
    pub const WRITE: u16 = 0x0001;
    pub const READ_WRITE: u16 = 0x0002;
    pub const SHARE_MASK: u16 = 0x0070;
    pub const DENY_ALL: u16 = 0x0010;
    pub const DENY_WRITE: u16 = 0x0020;
    pub const DENY_READ: u16 = 0x0030;
    pub const DENY_NONE: u16 = 0x0040;
}

// ============================================================================
// Current directory structure
// ============================================================================

/// Size of one CDS entry (DOS 4+)
pub const CDS_SIZE: u16 = 0x58;

mod cds_offset {
    pub const PATH: u16 = 0x00;
    pub const FLAGS: u16 = 0x43;
    pub const BACKSLASH_OFFSET: u16 = 0x4F;
}

/// Bytes reserved for the current path
pub const CDS_PATH_SIZE: usize = 67;

/// CDS entry of drive `drive` in the array at `base`
pub fn cds_entry(base: FarPtr, drive: u8) -> FarPtr {
    base.add(drive as u16 * CDS_SIZE)
}

pub fn cds_flags(mem: &dyn DosMemory, cds: FarPtr) -> CdsFlags {
    CdsFlags::from_bits_retain(mem.read_u16(cds.add(cds_offset::FLAGS)))
}

/// Drive letter of the CDS current path
pub fn cds_drive(mem: &dyn DosMemory, cds: FarPtr) -> Option<u8> {
    drive_of(mem.bytes(cds.add(cds_offset::PATH), 2))
}

/// Turn a CDS entry into a network drive rooted at `X:\`
pub fn cds_mark_network(mem: &mut dyn DosMemory, cds: FarPtr, drive: u8) {
    let path = mem.bytes_mut(cds.add(cds_offset::PATH), CDS_PATH_SIZE);
    path.fill(0);
    path[..3].copy_from_slice(&[b'A' + drive, b':', b'\\']);
    mem.write_u16(cds.add(cds_offset::FLAGS), (CdsFlags::NETWORK | CdsFlags::PHYSICAL).bits());
    mem.write_u16(cds.add(cds_offset::BACKSLASH_OFFSET), 2);
}

/// Return a CDS entry to the unused state
pub fn cds_clear(mem: &mut dyn DosMemory, cds: FarPtr) {
    let flags = cds_flags(mem, cds) & !(CdsFlags::NETWORK | CdsFlags::PHYSICAL);
    mem.write_u16(cds.add(cds_offset::FLAGS), flags.bits());
}

// ============================================================================
// Search data block and directory entry
// ============================================================================

/// Size of the search data block at the start of the DTA
pub const SDB_SIZE: usize = 21;

/// Drive byte flag marking a search as remote
pub const SDB_REMOTE: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchBlock {
    pub drive: u8,
    pub template: FcbName,
    pub attr: Attributes,
    /// Entries returned so far
    pub entry_count: u16,
    /// Tag of the directory this search belongs to
    pub dir_tag: u16,
}

impl SearchBlock {
    pub fn read(mem: &dyn DosMemory, ptr: FarPtr) -> Self {
        let raw = mem.bytes(ptr, SDB_SIZE);
        let mut template = [b' '; 11];
        template.copy_from_slice(&raw[1..12]);
        Self {
            drive: raw[0] & !SDB_REMOTE,
            template,
            attr: Attributes::from_bits_retain(raw[12]),
            entry_count: u16::from_le_bytes([raw[13], raw[14]]),
            dir_tag: u16::from_le_bytes([raw[15], raw[16]]),
        }
    }

    pub fn write(&self, mem: &mut dyn DosMemory, ptr: FarPtr) {
        let raw = mem.bytes_mut(ptr, SDB_SIZE);
        raw[0] = self.drive | SDB_REMOTE;
        raw[1..12].copy_from_slice(&self.template);
        raw[12] = self.attr.bits();
        raw[13..15].copy_from_slice(&self.entry_count.to_le_bytes());
        raw[15..17].copy_from_slice(&self.dir_tag.to_le_bytes());
        raw[17..21].fill(0);
    }
}

/// Size of a directory entry
pub const DIR_ENTRY_SIZE: usize = 32;

/// A found directory entry as DOS copies it to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoundEntry {
    pub name: FcbName,
    pub attr: Attributes,
    pub time: u16,
    pub date: u16,
    pub size: u32,
}

impl FoundEntry {
    pub fn write(&self, mem: &mut dyn DosMemory, ptr: FarPtr) {
        let raw = mem.bytes_mut(ptr, DIR_ENTRY_SIZE);
        raw.fill(0);
        raw[..11].copy_from_slice(&self.name);
        raw[11] = self.attr.bits();
        raw[0x16..0x18].copy_from_slice(&self.time.to_le_bytes());
        raw[0x18..0x1A].copy_from_slice(&self.date.to_le_bytes());
        raw[0x1C..0x20].copy_from_slice(&self.size.to_le_bytes());
    }

    pub fn read(mem: &dyn DosMemory, ptr: FarPtr) -> Self {
        let raw = mem.bytes(ptr, DIR_ENTRY_SIZE);
        let mut name = [b' '; 11];
        name.copy_from_slice(&raw[..11]);
        Self {
            name,
            attr: Attributes::from_bits_retain(raw[11]),
            time: u16::from_le_bytes([raw[0x16], raw[0x17]]),
            date: u16::from_le_bytes([raw[0x18], raw[0x19]]),
            size: u32::from_le_bytes([raw[0x1C], raw[0x1D], raw[0x1E], raw[0x1F]]),
        }
    }
}

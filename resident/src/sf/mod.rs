//! Shared Folder Redirector
//!
//! A DOS network redirector that shows VirtualBox shared folders as drive
//! letters. DOS calls it through INT 2Fh AH=11h; every request is turned
//! into shared folders RPCs over HGCM.
//!
//! # Submodules
//!
//! - **dos** - SDA, SFT, CDS and search block layouts; DOS error codes
//! - **files** - the open-file arena behind SFT entries
//! - **path** - DOS to host path translation, mangled name lookup
//! - **search** - find-first / find-next
//! - **redir** - the INT 2Fh dispatcher

pub mod dos;
pub mod files;
pub mod path;
pub mod redir;
pub mod search;

use crate::hal::interrupts::VectorError;
use crate::hal::memory::{DosMemory, FarPtr};
use crate::rtl::lfn::MAX_HASH_DIGITS;
use crate::rtl::FcbName;
use crate::vbox::shfl::{DirEntry, Mapping, RemoteError, Root, SharedFolders, ShflString, MAX_MAPPINGS, ROOT_NIL};
use crate::vbox::VbError;

use dos::{cds_clear, cds_entry, cds_flags, cds_mark_network, CdsFlags};
use files::{FileArena, OpenFile, MAX_OPEN_FILES};
use search::{volume_label, SearchDir};

/// Number of drive letters
pub const MAX_DRIVES: usize = 26;

/// Hex digits appended to mangled short names
pub const DEFAULT_HASH_DIGITS: u8 = 3;

/// Drive letters E: to Z:
pub const DEFAULT_MOUNT_DRIVES: u32 = 0x03FF_FFF0;

/// Longest folder name used for mounting
const MAX_FOLDER_NAME: usize = 256;

/// Longest host mount point looked at
const MAX_MOUNT_POINT: usize = 16;

/// Drive named by a host mount point such as `S`, `S:` or `S:\`
fn mount_point_drive(mount_point: &[u8]) -> Option<u8> {
    match mount_point {
        [letter] | [letter, b':'] | [letter, b':', b'\\'] if letter.is_ascii_alphabetic() => {
            Some(letter.to_ascii_uppercase() - b'A')
        }
        _ => None,
    }
}

// ============================================================================
// Configuration and errors
// ============================================================================

/// Installer options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfConfig {
    /// Hash digits in mangled names, 0 to 4; 0 hides names that need mangling
    pub hash_digits: u8,
    /// Local time offset from UTC in 2-second units, positive west
    pub tz_offset: i32,
    /// Drive letters automount may use, bit 0 = A:
    pub drives_to_mount: u32,
}

impl Default for SfConfig {
    fn default() -> Self {
        Self {
            hash_digits: DEFAULT_HASH_DIGITS,
            tz_offset: 0,
            drives_to_mount: DEFAULT_MOUNT_DRIVES,
        }
    }
}

/// Where the DOS kernel keeps the structures the redirector uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosTables {
    /// Swappable data area (INT 21h/5D06h)
    pub sda: FarPtr,
    /// First entry of the CDS array (list of lists + 16h)
    pub cds: FarPtr,
    /// Number of CDS entries (LASTDRIVE)
    pub last_drive: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallError {
    /// The shared folders service could not be reached
    Transport(VbError),
    /// The host refused a request
    Remote(RemoteError),
    /// The drive letter is beyond LASTDRIVE
    InvalidDrive(u8),
    /// The drive letter is already in use
    DriveInUse(u8),
    /// An interrupt vector was hooked over the driver
    Vector(VectorError),
}

impl From<VbError> for InstallError {
    fn from(e: VbError) -> Self {
        InstallError::Transport(e)
    }
}

impl From<RemoteError> for InstallError {
    fn from(e: RemoteError) -> Self {
        InstallError::Remote(e)
    }
}

impl From<VectorError> for InstallError {
    fn from(e: VectorError) -> Self {
        InstallError::Vector(e)
    }
}

impl core::fmt::Display for InstallError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InstallError::Transport(e) => write!(f, "shared folders unavailable: {}", e),
            InstallError::Remote(e) => write!(f, "host error: {:?}", e),
            InstallError::InvalidDrive(d) => write!(f, "drive {}: is beyond LASTDRIVE", drive_letter(*d)),
            InstallError::DriveInUse(d) => write!(f, "drive {}: is already in use", drive_letter(*d)),
            InstallError::Vector(VectorError::Rehooked { vector, current }) => write!(
                f,
                "INT {:02X}h now points at {:04X}:{:04X}, cannot uninstall",
                vector, current.segment, current.offset
            ),
        }
    }
}

#[inline]
fn drive_letter(drive: u8) -> char {
    (b'A' + drive) as char
}

// ============================================================================
// Driver
// ============================================================================

/// What a request runs against
pub struct Devices<'a> {
    pub folders: &'a mut dyn SharedFolders,
    pub memory: &'a mut dyn DosMemory,
}

/// Resident state of the redirector
pub struct SharedFolderDriver {
    config: SfConfig,
    tables: DosTables,
    /// Root of the folder mounted on each drive, or `ROOT_NIL`
    drives: [Root; MAX_DRIVES],
    labels: [FcbName; MAX_DRIVES],
    files: FileArena,
    search: SearchDir,
    /// Scratch space for listings and paths
    entry: DirEntry,
    path: ShflString,
    path2: ShflString,
    /// Returned by the private "get driver data" call
    data_pointer: FarPtr,
}

impl SharedFolderDriver {
    pub const fn new() -> Self {
        Self {
            config: SfConfig {
                hash_digits: DEFAULT_HASH_DIGITS,
                tz_offset: 0,
                drives_to_mount: DEFAULT_MOUNT_DRIVES,
            },
            tables: DosTables {
                sda: FarPtr::NULL,
                cds: FarPtr::NULL,
                last_drive: 0,
            },
            drives: [ROOT_NIL; MAX_DRIVES],
            labels: [[b' '; 11]; MAX_DRIVES],
            files: FileArena::new(),
            search: SearchDir::new(),
            entry: DirEntry::new(),
            path: ShflString::new(),
            path2: ShflString::new(),
            data_pointer: FarPtr::NULL,
        }
    }

    pub fn configure(&mut self, config: SfConfig, tables: DosTables) {
        self.config = SfConfig {
            hash_digits: config.hash_digits.min(MAX_HASH_DIGITS),
            ..config
        };
        self.tables = tables;
        log::debug!(
            "[VBSF] SDA {:04X}:{:04X}, CDS {:04X}:{:04X}, {} drives",
            tables.sda.segment,
            tables.sda.offset,
            tables.cds.segment,
            tables.cds.offset,
            tables.last_drive
        );
    }

    pub fn config(&self) -> &SfConfig {
        &self.config
    }

    pub fn set_data_pointer(&mut self, ptr: FarPtr) {
        self.data_pointer = ptr;
    }

    /// Root mounted on `drive`
    pub fn root_of(&self, drive: u8) -> Option<Root> {
        match self.drives.get(drive as usize) {
            Some(&root) if root != ROOT_NIL => Some(root),
            _ => None,
        }
    }

    pub fn is_mounted(&self, drive: u8) -> bool {
        self.root_of(drive).is_some()
    }

    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    /// Whether DOS or another redirector already owns `drive`
    fn drive_available(&self, drive: u8, mem: &dyn DosMemory) -> Result<(), InstallError> {
        if drive as usize >= MAX_DRIVES || drive >= self.tables.last_drive {
            return Err(InstallError::InvalidDrive(drive));
        }
        let flags = cds_flags(mem, cds_entry(self.tables.cds, drive));
        if self.is_mounted(drive) || flags.intersects(CdsFlags::PHYSICAL | CdsFlags::NETWORK) {
            return Err(InstallError::DriveInUse(drive));
        }
        Ok(())
    }

    /// Map the shared folder `name` and show it as `drive`
    pub fn mount(&mut self, drive: u8, name: &[u8], dev: &mut Devices<'_>) -> Result<(), InstallError> {
        self.drive_available(drive, dev.memory)?;
        let root = dev.folders.map_folder(name)?;

        self.drives[drive as usize] = root;
        self.labels[drive as usize] = volume_label(name);
        cds_mark_network(dev.memory, cds_entry(self.tables.cds, drive), drive);

        log::info!(
            "[VBSF] mounted {} on {}:",
            core::str::from_utf8(name).unwrap_or("?"),
            drive_letter(drive)
        );
        Ok(())
    }

    /// Drop `drive`, closing whatever was open on it
    pub fn unmount(&mut self, drive: u8, dev: &mut Devices<'_>) -> Result<(), InstallError> {
        let root = self.root_of(drive).ok_or(InstallError::InvalidDrive(drive))?;

        for index in 0..MAX_OPEN_FILES as u16 {
            match self.files.get(index) {
                Ok(file) if file.root == root => self.release(index, file, dev),
                _ => {}
            }
        }
        if self.search.root() == Some(root) {
            self.search.close(dev.folders);
        }

        if let Err(e) = dev.folders.unmap_folder(root) {
            log::warn!("[VBSF] unmapping {}: failed: {:?}", drive_letter(drive), e);
        }
        self.drives[drive as usize] = ROOT_NIL;
        cds_clear(dev.memory, cds_entry(self.tables.cds, drive));
        log::info!("[VBSF] unmounted {}:", drive_letter(drive));
        Ok(())
    }

    /// Name of mapping `root` and the drive its host mount point asks for.
    ///
    /// Hosts without mapping info still answer the plain name query.
    fn mapping_name(root: Root, name: &mut [u8], folders: &mut dyn SharedFolders) -> Result<(usize, Option<u8>), RemoteError> {
        let mut mount_point = [0u8; MAX_MOUNT_POINT];
        match folders.query_map_info(root, name, &mut mount_point) {
            Ok(info) => Ok((info.name_len, mount_point_drive(&mount_point[..info.mount_point_len]))),
            Err(e) => {
                log::debug!("[VBSF] no map info for {}: {:?}", root, e);
                Ok((folders.query_map_name(root, name)?, None))
            }
        }
    }

    /// Mount every host folder on the drive its mount point names, or else
    /// on the next free configured drive letter.
    ///
    /// Returns how many were mounted; running out of letters is not an error.
    pub fn automount(&mut self, dev: &mut Devices<'_>) -> Result<usize, InstallError> {
        let mut mappings = [Mapping::default(); MAX_MAPPINGS];
        let count = dev.folders.query_mappings(&mut mappings)?;
        let mut mounted = 0;
        let mut next = 0u8;

        for mapping in &mappings[..count] {
            let mut name = [0u8; MAX_FOLDER_NAME];
            let (len, wanted) = match Self::mapping_name(mapping.root, &mut name, dev.folders) {
                Ok(found) => found,
                Err(e) => {
                    log::warn!("[VBSF] mapping {} has no name: {:?}", mapping.root, e);
                    continue;
                }
            };

            let wanted = wanted.filter(|&d| match self.drive_available(d, dev.memory) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("[VBSF] mount point ignored: {}", e);
                    false
                }
            });
            let drive = if let Some(drive) = wanted {
                drive
            } else {
                loop {
                    if next as usize >= MAX_DRIVES {
                        log::warn!("[VBSF] out of drive letters");
                        return Ok(mounted);
                    }
                    let candidate = next;
                    next += 1;
                    if self.config.drives_to_mount & (1 << candidate) != 0
                        && self.drive_available(candidate, dev.memory).is_ok()
                    {
                        break candidate;
                    }
                }
            };

            match self.mount(drive, &name[..len], dev) {
                Ok(()) => mounted += 1,
                Err(e) => log::warn!("[VBSF] {}", e),
            }
        }

        if mounted == 0 {
            log::warn!("[VBSF] no shared folders mounted");
        }
        Ok(mounted)
    }

    /// Unmount every drive, as done before the driver leaves memory
    pub fn unmount_all(&mut self, dev: &mut Devices<'_>) {
        for drive in 0..MAX_DRIVES as u8 {
            if self.is_mounted(drive) {
                if let Err(e) = self.unmount(drive, dev) {
                    log::warn!("[VBSF] {}", e);
                }
            }
        }
    }

    /// Free arena slot `index` and close the host handle it held
    fn release(&mut self, index: u16, file: OpenFile, dev: &mut Devices<'_>) {
        if self.files.free(index).is_ok() {
            if let Err(e) = dev.folders.close(file.root, file.handle) {
                log::debug!("[VBSF] close of handle {:#x} failed: {:?}", file.handle, e);
            }
        }
    }
}

impl Default for SharedFolderDriver {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Test doubles
// ============================================================================

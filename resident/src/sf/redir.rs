//! INT 2Fh Redirector Interface
//!
//! DOS passes every file operation on a network drive to INT 2Fh with
//! AH=11h and the subfunction in AL. Most parameters are not in registers
//! but in the swappable data area (file names, DTA, search attribute, open
//! mode) or in the SFT / CDS entry at ES:DI.
//!
//! A request for a drive this driver does not own goes down the interrupt
//! chain untouched. Failures come back with carry set and the DOS error
//! code in AX.

use super::dos::{
    cds_drive, drive_of, dta, open_mode, read_file_name, sda, Attributes, DeviceInfo, DosError, SearchBlock, Sft,
    FILE_NAME_SIZE, SDB_REMOTE, SDB_SIZE,
};
use super::files::OpenFile;
use super::path::{component_fcb, has_wildcards, join, split_last, to_host_path, OPEN_DIRECTORY};
use super::{Devices, SharedFolderDriver, MAX_DRIVES};
use crate::hal::memory::{DosMemory, FarPtr};
use crate::hal::regs::Registers;
use crate::rtl::lfn::{fcb_matches, fcb_name_from_host};
use crate::rtl::{dos_to_timestamp, timestamp_to_dos, DosDateTime};
use crate::vbox::shfl::{
    create_result, CreateFlags, CreateParms, FsObjInfo, ListFlags, LockFlags, RemoteError, RemoveFlags, RenameFlags,
    Root, VolumeInfo,
};

/// INT 2Fh multiplex id of network redirectors
pub const REDIRECTOR_ID: u8 = 0x11;

/// BX and CX of the private "get driver data" call ('SF', 'RS')
pub const DRIVER_DATA_SIGNATURE: (u16, u16) = (0x5346, 0x5253);

/// Media descriptor reported for redirected drives
pub const MEDIA_ID: u8 = 0xF8;

/// Sector size reported for redirected drives
pub const BYTES_PER_SECTOR: u32 = 512;

/// Largest cluster size reported, in sectors
const MAX_SECTORS_PER_CLUSTER: u32 = 64;

/// Redirector subfunctions (AL)
pub mod subfunction {
    pub const INSTALL_CHECK: u8 = 0x00;
    pub const REMOVE_DIR: u8 = 0x01;
    pub const MAKE_DIR: u8 = 0x03;
    pub const CHANGE_DIR: u8 = 0x05;
    pub const CLOSE: u8 = 0x06;
    pub const COMMIT: u8 = 0x07;
    pub const READ: u8 = 0x08;
    pub const WRITE: u8 = 0x09;
    pub const LOCK: u8 = 0x0A;
    pub const DISK_FREE: u8 = 0x0C;
    pub const SET_ATTRIBUTES: u8 = 0x0E;
    pub const GET_ATTRIBUTES: u8 = 0x0F;
    pub const RENAME: u8 = 0x11;
    pub const DELETE: u8 = 0x13;
    pub const OPEN: u8 = 0x16;
    pub const CREATE: u8 = 0x17;
    pub const FIND_FIRST: u8 = 0x1B;
    pub const FIND_NEXT: u8 = 0x1C;
    pub const CLOSE_ALL: u8 = 0x1D;
    pub const SEEK_FROM_END: u8 = 0x21;
    pub const EXTENDED_OPEN: u8 = 0x2E;
    pub const DRIVER_DATA: u8 = 0xFE;
}

/// Extended open action word (SDA)
mod ext_action {
    pub const IF_EXISTS_MASK: u16 = 0x000F;
    pub const FAIL_IF_EXISTS: u16 = 0x0000;
    pub const OPEN_IF_EXISTS: u16 = 0x0001;
    pub const REPLACE_IF_EXISTS: u16 = 0x0002;
    pub const IF_NEW_MASK: u16 = 0x00F0;
    pub const FAIL_IF_NEW: u16 = 0x0000;
    pub const CREATE_IF_NEW: u16 = 0x0010;
}

/// Extended open result (CX)
pub mod ext_result {
    pub const OPENED: u16 = 1;
    pub const CREATED: u16 = 2;
    pub const REPLACED: u16 = 3;
}

// ============================================================================
// Requests and replies
// ============================================================================

/// A redirector call decoded from the register frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirRequest {
    InstallCheck,
    DriverData,
    RemoveDir,
    MakeDir,
    ChangeDir,
    Close { sft: FarPtr },
    Commit { sft: FarPtr },
    Read { sft: FarPtr, count: u16 },
    Write { sft: FarPtr, count: u16 },
    Lock { sft: FarPtr, unlock: bool, region: FarPtr },
    DiskFree { cds: FarPtr },
    SetAttributes,
    GetAttributes,
    Rename,
    Delete,
    Open { sft: FarPtr },
    Create { sft: FarPtr },
    FindFirst,
    FindNext,
    CloseAll,
    SeekFromEnd { sft: FarPtr, offset: i32 },
    ExtendedOpen { sft: FarPtr },
    Other(u8),
}

impl RedirRequest {
    /// `None` when the call is not for a redirector at all
    pub fn decode(regs: &Registers) -> Option<Self> {
        if regs.ah() != REDIRECTOR_ID {
            return None;
        }
        let es_di = FarPtr::new(regs.es, regs.di);

        use subfunction as f;
        Some(match regs.al() {
            f::INSTALL_CHECK => Self::InstallCheck,
            f::REMOVE_DIR => Self::RemoveDir,
            f::MAKE_DIR => Self::MakeDir,
            f::CHANGE_DIR => Self::ChangeDir,
            f::CLOSE => Self::Close { sft: es_di },
            f::COMMIT => Self::Commit { sft: es_di },
            f::READ => Self::Read { sft: es_di, count: regs.cx },
            f::WRITE => Self::Write { sft: es_di, count: regs.cx },
            f::LOCK => Self::Lock {
                sft: es_di,
                unlock: regs.bl() == 1,
                region: FarPtr::new(regs.ds, regs.dx),
            },
            f::DISK_FREE => Self::DiskFree { cds: es_di },
            f::SET_ATTRIBUTES => Self::SetAttributes,
            f::GET_ATTRIBUTES => Self::GetAttributes,
            f::RENAME => Self::Rename,
            f::DELETE => Self::Delete,
            f::OPEN => Self::Open { sft: es_di },
            f::CREATE => Self::Create { sft: es_di },
            f::FIND_FIRST => Self::FindFirst,
            f::FIND_NEXT => Self::FindNext,
            f::CLOSE_ALL => Self::CloseAll,
            f::SEEK_FROM_END => Self::SeekFromEnd {
                sft: es_di,
                offset: (((regs.cx as u32) << 16) | regs.dx as u32) as i32,
            },
            f::EXTENDED_OPEN => Self::ExtendedOpen { sft: es_di },
            f::DRIVER_DATA if (regs.bx, regs.cx) == DRIVER_DATA_SIGNATURE => Self::DriverData,
            other => Self::Other(other),
        })
    }
}

/// Registers a successful request returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RedirValues {
    pub ax: Option<u16>,
    pub bx: Option<u16>,
    pub cx: Option<u16>,
    pub dx: Option<u16>,
    pub di: Option<u16>,
    pub es: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirReply {
    /// Not ours; the next handler in the chain gets the call
    Chain,
    Done(RedirValues),
    Failed(DosError),
}

/// What the INT 2Fh entry stub does after the handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Return to the caller with the updated registers
    Handled,
    /// Jump to the previous INT 2Fh handler
    Chain,
}

impl RedirReply {
    pub fn apply(&self, regs: &mut Registers) -> Outcome {
        match self {
            RedirReply::Chain => Outcome::Chain,
            RedirReply::Done(values) => {
                let fields = [
                    (values.ax, &mut regs.ax),
                    (values.bx, &mut regs.bx),
                    (values.cx, &mut regs.cx),
                    (values.dx, &mut regs.dx),
                    (values.di, &mut regs.di),
                    (values.es, &mut regs.es),
                ];
                for (value, reg) in fields {
                    if let Some(v) = value {
                        *reg = v;
                    }
                }
                regs.set_carry(false);
                Outcome::Handled
            }
            RedirReply::Failed(e) => {
                regs.ax = e.code();
                regs.set_carry(true);
                Outcome::Handled
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Host access and sharing flags for a DOS open mode
fn access_flags(mode: u16) -> CreateFlags {
    let access = match mode & open_mode::ACCESS_MASK {
        open_mode::READ => CreateFlags::ACCESS_READ,
        open_mode::WRITE => CreateFlags::ACCESS_WRITE,
        _ => CreateFlags::ACCESS_READWRITE,
    };
    let share = match mode & open_mode::SHARE_MASK {
        open_mode::DENY_ALL => CreateFlags::ACCESS_DENYALL,
        open_mode::DENY_WRITE => CreateFlags::ACCESS_DENYWRITE,
        open_mode::DENY_READ => CreateFlags::ACCESS_DENYREAD,
        _ => CreateFlags::empty(),
    };
    access | share
}

/// Host create action for an extended open action word
fn ext_action_flags(action: u16) -> Result<CreateFlags, DosError> {
    let if_exists = match action & ext_action::IF_EXISTS_MASK {
        ext_action::FAIL_IF_EXISTS => CreateFlags::ACT_FAIL_IF_EXISTS,
        ext_action::OPEN_IF_EXISTS => CreateFlags::empty(),
        ext_action::REPLACE_IF_EXISTS => CreateFlags::ACT_OVERWRITE_IF_EXISTS,
        _ => return Err(DosError::InvalidFunction),
    };
    let if_new = match action & ext_action::IF_NEW_MASK {
        ext_action::FAIL_IF_NEW => CreateFlags::ACT_FAIL_IF_NEW,
        ext_action::CREATE_IF_NEW => CreateFlags::empty(),
        _ => return Err(DosError::InvalidFunction),
    };
    Ok(if_exists | if_new)
}

/// Sectors per cluster, total clusters and free clusters for a volume.
///
/// Clusters grow until the total fits 16 bits; larger volumes are
/// reported as their first 2 GiB.
pub fn disk_geometry(info: &VolumeInfo) -> (u8, u16, u16) {
    let mut spc = 1u32;
    while spc < MAX_SECTORS_PER_CLUSTER && info.total_bytes / (BYTES_PER_SECTOR * spc) as u64 > 0xFFFF {
        spc *= 2;
    }
    let cluster = (BYTES_PER_SECTOR * spc) as u64;
    let total = (info.total_bytes / cluster).min(0xFFFF) as u16;
    let free = (info.available_bytes / cluster).min(total as u64) as u16;
    (spc as u8, total, free)
}

fn size_of(info: &FsObjInfo) -> Result<u32, DosError> {
    // objects DOS cannot address do not exist as far as it knows
    info.dos_size().ok_or(DosError::PathNotFound)
}

// ============================================================================
// Dispatch
// ============================================================================

impl SharedFolderDriver {
    /// INT 2Fh entry
    pub fn int2f(&mut self, regs: &mut Registers, dev: &mut Devices<'_>) -> Outcome {
        match RedirRequest::decode(regs) {
            Some(request) => self.execute(request, dev).apply(regs),
            None => Outcome::Chain,
        }
    }

    pub fn execute(&mut self, request: RedirRequest, dev: &mut Devices<'_>) -> RedirReply {
        use RedirRequest as R;

        match request {
            R::InstallCheck => {
                return RedirReply::Done(RedirValues {
                    ax: Some(((REDIRECTOR_ID as u16) << 8) | 0xFF),
                    ..Default::default()
                })
            }
            R::DriverData => {
                return RedirReply::Done(RedirValues {
                    ax: Some(0),
                    es: Some(self.data_pointer.segment),
                    di: Some(self.data_pointer.offset),
                    ..Default::default()
                })
            }
            R::CloseAll => {
                self.close_all(dev);
                return RedirReply::Chain;
            }
            R::Other(_) => return RedirReply::Chain,
            _ => {}
        }

        let Some(drive) = self.owned_drive(&request, dev) else {
            return RedirReply::Chain;
        };
        let root = self.drives[drive as usize];
        log::trace!("[VBSF] {:?} on {}:", request, (b'A' + drive) as char);

        match self.dispatch(request, drive, root, dev) {
            Ok(values) => RedirReply::Done(values),
            Err(e) => {
                log::debug!("[VBSF] {:?} failed: {:?}", request, e);
                RedirReply::Failed(e)
            }
        }
    }

    /// The drive a request is for, if this driver owns it
    fn owned_drive(&self, request: &RedirRequest, dev: &Devices<'_>) -> Option<u8> {
        use RedirRequest as R;
        let mem: &dyn DosMemory = &*dev.memory;

        let drive = match *request {
            R::Close { sft }
            | R::Commit { sft }
            | R::Read { sft, .. }
            | R::Write { sft, .. }
            | R::Lock { sft, .. }
            | R::SeekFromEnd { sft, .. } => {
                let sft = Sft::read(mem, sft);
                if !sft.is_remote() {
                    return None;
                }
                sft.drive
            }
            R::DiskFree { cds } => cds_drive(mem, cds)?,
            R::FindNext => {
                let dta = mem.read_far_ptr(self.tables.sda.add(sda::DTA));
                if !mem.contains(dta, SDB_SIZE) || mem.read_u8(dta) & SDB_REMOTE == 0 {
                    return None;
                }
                SearchBlock::read(mem, dta).drive
            }
            R::RemoveDir
            | R::MakeDir
            | R::ChangeDir
            | R::SetAttributes
            | R::GetAttributes
            | R::Rename
            | R::Delete
            | R::Open { .. }
            | R::Create { .. }
            | R::FindFirst
            | R::ExtendedOpen { .. } => drive_of(mem.bytes(self.tables.sda.add(sda::FN1), 2))?,
            R::InstallCheck | R::DriverData | R::CloseAll | R::Other(_) => return None,
        };

        ((drive as usize) < MAX_DRIVES && self.is_mounted(drive)).then_some(drive)
    }

    fn dispatch(
        &mut self,
        request: RedirRequest,
        drive: u8,
        root: Root,
        dev: &mut Devices<'_>,
    ) -> Result<RedirValues, DosError> {
        use RedirRequest as R;
        let done = RedirValues::default();

        match request {
            R::RemoveDir => {
                self.first_name_to_host(root, dev)?;
                dev.folders.remove(root, self.path.as_bytes(), RemoveFlags::DIR)?;
                Ok(done)
            }
            R::MakeDir => {
                self.first_name_to_host(root, dev)?;
                let mut parms = CreateParms::new(
                    CreateFlags::DIRECTORY | CreateFlags::ACT_FAIL_IF_EXISTS | CreateFlags::ACCESS_READ,
                );
                dev.folders
                    .open(root, self.path.as_bytes(), &mut parms)
                    .map_err(|e| match e {
                        RemoteError::AlreadyExists => DosError::AccessDenied,
                        other => DosError::from(other),
                    })?;
                self.close_quietly(root, parms.handle, dev);
                Ok(done)
            }
            R::ChangeDir => {
                self.first_name_to_host(root, dev)?;
                match dev.folders.lookup(root, self.path.as_bytes()) {
                    Ok(info) if info.is_directory() => Ok(done),
                    Ok(_) | Err(RemoteError::NotFound) => Err(DosError::PathNotFound),
                    Err(e) => Err(e.into()),
                }
            }
            R::Close { sft } => self.close(sft, dev).map(|_| done),
            R::Commit { sft } => {
                let sft = Sft::read(dev.memory, sft);
                self.files.get(sft.start_cluster).map(|_| done)
            }
            R::Read { sft, count } => self.read(sft, count, dev),
            R::Write { sft, count } => self.write(sft, count, dev),
            R::Lock { sft, unlock, region } => self.lock(sft, unlock, region, dev).map(|_| done),
            R::DiskFree { .. } => self.disk_free(root, dev),
            R::SetAttributes => {
                // the host keeps its own attributes; only check the object exists
                self.first_name_to_host(root, dev)?;
                dev.folders.lookup(root, self.path.as_bytes())?;
                Ok(done)
            }
            R::GetAttributes => {
                self.first_name_to_host(root, dev)?;
                let info = dev.folders.lookup(root, self.path.as_bytes())?;
                let size = size_of(&info)?;
                let stamp = timestamp_to_dos(info.modification_time, self.config.tz_offset);
                Ok(RedirValues {
                    ax: Some(info.dos_attributes() as u16),
                    bx: Some((size >> 16) as u16),
                    di: Some(size as u16),
                    cx: Some(stamp.time),
                    dx: Some(stamp.date),
                    ..Default::default()
                })
            }
            R::Rename => self.rename(drive, root, dev).map(|_| done),
            R::Delete => self.delete(root, dev).map(|_| done),
            R::Open { sft } => {
                let mode = dev.memory.read_u8(self.tables.sda.add(sda::OPEN_MODE)) as u16;
                let flags = access_flags(mode) | CreateFlags::ACT_FAIL_IF_NEW;
                self.open(drive, root, sft, mode, flags, dev).map(|_| done)
            }
            R::Create { sft } => {
                let flags = CreateFlags::ACCESS_READWRITE | CreateFlags::ACT_OVERWRITE_IF_EXISTS;
                self.open(drive, root, sft, open_mode::READ_WRITE, flags, dev)
                    .map(|_| done)
            }
            R::ExtendedOpen { sft } => {
                let sda_ptr = self.tables.sda;
                let action = dev.memory.read_u16(sda_ptr.add(sda::EXT_OPEN_ACTION));
                let mode = dev.memory.read_u16(sda_ptr.add(sda::EXT_OPEN_MODE)) & 0x00FF;
                let flags = access_flags(mode) | ext_action_flags(action)?;
                let result = self.open(drive, root, sft, mode, flags, dev)?;
                let cx = match result {
                    create_result::FILE_CREATED => ext_result::CREATED,
                    create_result::FILE_REPLACED => ext_result::REPLACED,
                    _ => ext_result::OPENED,
                };
                Ok(RedirValues {
                    cx: Some(cx),
                    ..Default::default()
                })
            }
            R::FindFirst => self.find_first(drive, root, dev).map(|_| done),
            R::FindNext => self.find_next(dev).map(|_| done),
            R::SeekFromEnd { sft, offset } => self.seek_from_end(sft, offset, dev),
            R::InstallCheck | R::DriverData | R::CloseAll | R::Other(_) => Err(DosError::InvalidFunction),
        }
    }

    /// Translate FN1 into `self.path`, returning FN1 and its length
    fn first_name_to_host(
        &mut self,
        root: Root,
        dev: &mut Devices<'_>,
    ) -> Result<([u8; FILE_NAME_SIZE], usize), DosError> {
        let mut name = [0u8; FILE_NAME_SIZE];
        let len = read_file_name(dev.memory, self.tables.sda.add(sda::FN1), &mut name);
        to_host_path(
            dev.folders,
            root,
            &name[..len],
            self.config.hash_digits,
            &mut self.entry,
            &mut self.path,
        )?;
        Ok((name, len))
    }

    fn close_quietly(&mut self, root: Root, handle: u64, dev: &mut Devices<'_>) {
        if let Err(e) = dev.folders.close(root, handle) {
            log::debug!("[VBSF] close of handle {:#x} failed: {:?}", handle, e);
        }
    }

    // ------------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------------

    /// Open or create FN1 and fill in the SFT at `sft_ptr`.
    ///
    /// Returns the host's create result.
    fn open(
        &mut self,
        drive: u8,
        root: Root,
        sft_ptr: FarPtr,
        mode: u16,
        flags: CreateFlags,
        dev: &mut Devices<'_>,
    ) -> Result<u32, DosError> {
        let (name, len) = self.first_name_to_host(root, dev)?;

        let mut parms = CreateParms::new(flags);
        dev.folders.open(root, self.path.as_bytes(), &mut parms)?;

        let size = match (parms.info.is_directory(), parms.info.dos_size()) {
            (false, Some(size)) => size,
            (is_dir, _) => {
                self.close_quietly(root, parms.handle, dev);
                return Err(if is_dir { DosError::AccessDenied } else { DosError::PathNotFound });
            }
        };

        let psp = dev.memory.read_u16(self.tables.sda.add(sda::PSP));
        let file = OpenFile {
            root,
            handle: parms.handle,
            psp,
        };
        let index = match self.files.alloc(file) {
            Ok(index) => index,
            Err(e) => {
                self.close_quietly(root, parms.handle, dev);
                return Err(e);
            }
        };

        let stamp = timestamp_to_dos(parms.info.modification_time, self.config.tz_offset);
        let (_, last) = split_last(&name[..len]);
        let mut sft = Sft::read(dev.memory, sft_ptr);
        sft.open_mode = mode & 0x007F;
        sft.attr = parms.info.dos_attributes();
        sft.device_info = DeviceInfo::REMOTE | DeviceInfo::UNWRITTEN;
        sft.drive = drive;
        sft.start_cluster = index;
        sft.time = stamp.time;
        sft.date = stamp.date;
        sft.size = size;
        sft.position = 0;
        sft.name = component_fcb(last);
        sft.write(dev.memory, sft_ptr);
        Sft::clear_device(dev.memory, sft_ptr);

        log::trace!("[VBSF] opened {:?} as slot {}", self.path, index);
        Ok(parms.result)
    }

    /// Drop one SFT reference; the last one closes the host handle
    fn close(&mut self, sft_ptr: FarPtr, dev: &mut Devices<'_>) -> Result<(), DosError> {
        let mut sft = Sft::read(dev.memory, sft_ptr);

        if sft.handle_count > 1 {
            sft.handle_count -= 1;
            sft.write(dev.memory, sft_ptr);
            return Ok(());
        }

        let file = self.files.get(sft.start_cluster)?;
        if sft.device_info.contains(DeviceInfo::DATE_SET) {
            let info = FsObjInfo {
                modification_time: dos_to_timestamp(DosDateTime::new(sft.date, sft.time), self.config.tz_offset),
                ..FsObjInfo::default()
            };
            if let Err(e) = dev.folders.set_file_times(file.root, file.handle, &info) {
                log::debug!("[VBSF] setting file times failed: {:?}", e);
            }
        }

        self.files.free(sft.start_cluster)?;
        let closed = dev.folders.close(file.root, file.handle);
        sft.handle_count = 0;
        sft.write(dev.memory, sft_ptr);
        closed.map_err(DosError::from)
    }

    /// Close the files of the terminating process and the search directory
    fn close_all(&mut self, dev: &mut Devices<'_>) {
        let psp = dev.memory.read_u16(self.tables.sda.add(sda::PSP));
        for index in 0..super::files::MAX_OPEN_FILES as u16 {
            match self.files.get(index) {
                Ok(file) if file.psp == psp => self.release(index, file, dev),
                _ => {}
            }
        }
        self.search.close(dev.folders);
    }

    fn read(&mut self, sft_ptr: FarPtr, count: u16, dev: &mut Devices<'_>) -> Result<RedirValues, DosError> {
        let mut sft = Sft::read(dev.memory, sft_ptr);
        let file = self.files.get(sft.start_cluster)?;
        if sft.open_mode & open_mode::ACCESS_MASK == open_mode::WRITE {
            return Err(DosError::AccessDenied);
        }

        let dta = dta(dev.memory, self.tables.sda, count as usize)?;
        let buf = dev.memory.bytes_mut(dta, count as usize);
        let read = dev.folders.read(file.root, file.handle, sft.position as u64, buf)?;
        let read = read.min(count as u32);

        sft.position = sft.position.wrapping_add(read);
        sft.write(dev.memory, sft_ptr);
        Ok(RedirValues {
            cx: Some(read as u16),
            ..Default::default()
        })
    }

    /// Write CX bytes from the DTA; CX=0 sets the file size to the position
    fn write(&mut self, sft_ptr: FarPtr, count: u16, dev: &mut Devices<'_>) -> Result<RedirValues, DosError> {
        let mut sft = Sft::read(dev.memory, sft_ptr);
        let file = self.files.get(sft.start_cluster)?;
        if sft.open_mode & open_mode::ACCESS_MASK == open_mode::READ {
            return Err(DosError::AccessDenied);
        }

        let written = if count == 0 {
            dev.folders.set_file_size(file.root, file.handle, sft.position as u64)?;
            sft.size = sft.position;
            0
        } else {
            let dta = dta(dev.memory, self.tables.sda, count as usize)?;
            let data = dev.memory.bytes(dta, count as usize);
            let written = dev.folders.write(file.root, file.handle, sft.position as u64, data)?;
            let written = written.min(count as u32);
            sft.position = sft.position.wrapping_add(written);
            sft.size = sft.size.max(sft.position);
            written
        };

        sft.device_info.remove(DeviceInfo::UNWRITTEN);
        sft.write(dev.memory, sft_ptr);
        Ok(RedirValues {
            cx: Some(written as u16),
            ..Default::default()
        })
    }

    /// Lock or unlock the region described at DS:DX (offset, length)
    fn lock(&mut self, sft_ptr: FarPtr, unlock: bool, region: FarPtr, dev: &mut Devices<'_>) -> Result<(), DosError> {
        let sft = Sft::read(dev.memory, sft_ptr);
        let file = self.files.get(sft.start_cluster)?;
        let offset = dev.memory.read_u32(region) as u64;
        let length = dev.memory.read_u32(region.add(4)) as u64;
        let flags = if unlock { LockFlags::empty() } else { LockFlags::EXCLUSIVE };

        dev.folders
            .lock(file.root, file.handle, offset, length, flags)
            .map_err(|e| {
                log::debug!("[VBSF] lock {}+{} failed: {:?}", offset, length, e);
                DosError::LockViolation
            })
    }

    fn seek_from_end(&mut self, sft_ptr: FarPtr, offset: i32, dev: &mut Devices<'_>) -> Result<RedirValues, DosError> {
        let mut sft = Sft::read(dev.memory, sft_ptr);
        let file = self.files.get(sft.start_cluster)?;
        let size = size_of(&dev.folders.query_info(file.root, file.handle)?)?;

        let position = (size as i64 + offset as i64).clamp(0, u32::MAX as i64) as u32;
        sft.size = size;
        sft.position = position;
        sft.write(dev.memory, sft_ptr);
        Ok(RedirValues {
            ax: Some(position as u16),
            dx: Some((position >> 16) as u16),
            ..Default::default()
        })
    }

    // ------------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------------

    /// Rename FN1 to FN2; both must be on the same drive
    fn rename(&mut self, drive: u8, root: Root, dev: &mut Devices<'_>) -> Result<(), DosError> {
        let mut target = [0u8; FILE_NAME_SIZE];
        let len = read_file_name(dev.memory, self.tables.sda.add(sda::FN2), &mut target);
        if drive_of(&target[..len]) != Some(drive) {
            return Err(DosError::NotSameDevice);
        }

        self.first_name_to_host(root, dev)?;
        to_host_path(
            dev.folders,
            root,
            &target[..len],
            self.config.hash_digits,
            &mut self.entry,
            &mut self.path2,
        )?;
        dev.folders.rename(
            root,
            self.path.as_bytes(),
            self.path2.as_bytes(),
            RenameFlags::FILE | RenameFlags::DIR,
        )?;
        Ok(())
    }

    /// Delete FN1, which may hold wildcards in its last component
    fn delete(&mut self, root: Root, dev: &mut Devices<'_>) -> Result<(), DosError> {
        let mut name = [0u8; FILE_NAME_SIZE];
        let len = read_file_name(dev.memory, self.tables.sda.add(sda::FN1), &mut name);
        let (dir, pattern) = split_last(&name[..len]);

        if !has_wildcards(pattern) {
            self.first_name_to_host(root, dev)?;
            dev.folders.remove(root, self.path.as_bytes(), RemoveFlags::FILE)?;
            return Ok(());
        }

        let template = component_fcb(pattern);
        let digits = self.config.hash_digits;
        to_host_path(dev.folders, root, dir, digits, &mut self.entry, &mut self.path2)?;
        let mut parms = CreateParms::new(OPEN_DIRECTORY);
        dev.folders.open(root, self.path2.as_bytes(), &mut parms)?;

        let mut removed = 0usize;
        let mut result = Ok(());
        loop {
            match dev.folders.list(root, parms.handle, ListFlags::RETURN_ONE, None, &mut self.entry) {
                Ok(()) => {}
                Err(RemoteError::NoMoreEntries) => break,
                Err(e) => {
                    result = Err(DosError::from(e));
                    break;
                }
            }
            let attr = Attributes::from_bits_retain(self.entry.info.dos_attributes());
            if attr.intersects(Attributes::SPECIAL | Attributes::READ_ONLY) || self.entry.info.dos_size().is_none() {
                continue;
            }
            match fcb_name_from_host(self.entry.name(), digits) {
                Some(fcb) if fcb_matches(&template, &fcb) => {}
                _ => continue,
            }

            self.path.clear();
            let joined = self
                .path
                .push(self.path2.as_bytes())
                .and_then(|_| join(&mut self.path, self.entry.name()));
            if let Err(e) = joined.and_then(|_| dev.folders.remove(root, self.path.as_bytes(), RemoveFlags::FILE)) {
                result = Err(DosError::from(e));
                break;
            }
            removed += 1;
        }
        self.close_quietly(root, parms.handle, dev);

        result?;
        if removed == 0 {
            return Err(DosError::FileNotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Volume
    // ------------------------------------------------------------------------

    fn disk_free(&mut self, root: Root, dev: &mut Devices<'_>) -> Result<RedirValues, DosError> {
        let mut parms = CreateParms::new(OPEN_DIRECTORY);
        dev.folders.open(root, b"\\", &mut parms)?;
        let info = dev.folders.query_volume_info(root, parms.handle);
        self.close_quietly(root, parms.handle, dev);

        let (spc, total, free) = disk_geometry(&info?);
        Ok(RedirValues {
            ax: Some(((MEDIA_ID as u16) << 8) | spc as u16),
            bx: Some(total),
            cx: Some(BYTES_PER_SECTOR as u16),
            dx: Some(free),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::memory::ConventionalMemory;
    use crate::sf::dos::{cds_entry, FoundEntry};
    use crate::sf::testing::{Fixture, CDS, DRIVE, DTA, PSP, SDA, SFT};
    use crate::vbox::shfl::fs_mode;

    fn regs(ax: u16) -> Registers {
        Registers {
            ax,
            es: SFT.segment,
            di: SFT.offset,
            ..Default::default()
        }
    }

    /// Run a request that must be handled, returning the registers
    fn call(fx: &mut Fixture, r: Registers) -> Registers {
        let (outcome, out) = fx.call(r);
        assert_eq!(outcome, Outcome::Handled, "AX={:04X}", r.ax);
        out
    }

    fn ok(fx: &mut Fixture, r: Registers) -> Registers {
        let out = call(fx, r);
        assert!(!out.carry(), "AX={:04X} failed with {:#x}", r.ax, out.ax);
        out
    }

    fn err(fx: &mut Fixture, r: Registers) -> u16 {
        let out = call(fx, r);
        assert!(out.carry(), "AX={:04X} should fail", r.ax);
        out.ax
    }

    fn sft(fx: &Fixture) -> Sft {
        Sft::read(&fx.memory, SFT)
    }

    /// Open FN1 like DOS does: the SFT gets one reference afterwards
    fn open(fx: &mut Fixture, name: &[u8], mode: u8) -> Registers {
        fx.set_fn1(name);
        fx.memory.write_u8(SDA.add(sda::OPEN_MODE), mode);
        let out = ok(fx, regs(0x1116));
        fx.memory.write_u16(SFT, 1);
        out
    }

    fn find_names(fx: &mut Fixture, pattern: &[u8], attr: u8) -> Vec<String> {
        fx.set_fn1(pattern);
        fx.memory.write_u8(SDA.add(sda::SEARCH_ATTR), attr);
        let mut names = Vec::new();
        let mut r = call(fx, regs(0x111B));
        while !r.carry() {
            let found = FoundEntry::read(&fx.memory, SDA.add(sda::FOUND_ENTRY));
            names.push(String::from_utf8_lossy(&found.name).trim_end().to_string());
            r = call(fx, regs(0x111C));
        }
        assert_eq!(r.ax, 0x12);
        names
    }

    #[test]
    fn test_install_check_and_driver_data() {
        let mut fx = Fixture::new();
        assert_eq!(ok(&mut fx, regs(0x1100)).ax, 0x11FF);

        fx.driver.set_data_pointer(FarPtr::new(0x1234, 0x0010));
        let query = Registers {
            ax: 0x11FE,
            bx: 0x5346,
            cx: 0x5253,
            ..Default::default()
        };
        let out = ok(&mut fx, query);
        assert_eq!((out.es, out.di), (0x1234, 0x0010));

        // without the signature the query is somebody else's
        let (outcome, _) = fx.call(Registers { ax: 0x11FE, ..Default::default() });
        assert_eq!(outcome, Outcome::Chain);
    }

    #[test]
    fn test_foreign_requests_chain() {
        let mut fx = Fixture::new();
        assert_eq!(fx.call(regs(0x1600)).0, Outcome::Chain);

        fx.set_fn1(b"C:\\AUTOEXEC.BAT");
        assert_eq!(fx.call(regs(0x1116)).0, Outcome::Chain);

        // a local SFT
        fx.memory.write_u16(SFT.add(5), 0x0002);
        assert_eq!(fx.call(regs(0x1108)).0, Outcome::Chain);
        assert!(fx.host.calls.iter().all(|&c| c == "map_folder"));
    }

    #[test]
    fn test_open_read_close() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\readme.txt", b"hello world");

        open(&mut fx, b"E:\\README.TXT", 0x00);
        let s = sft(&fx);
        assert!(s.is_remote());
        assert!(s.device_info.contains(DeviceInfo::UNWRITTEN));
        assert_eq!(s.drive, DRIVE);
        assert_eq!(s.size, 11);
        assert_eq!(&s.name, b"README  TXT");
        // 2000-01-01
        assert_eq!(s.date, (20 << 9) | (1 << 5) | 1);
        assert_eq!(fx.driver.open_files(), 1);

        let mut r = regs(0x1108);
        r.cx = 5;
        assert_eq!(ok(&mut fx, r).cx, 5);
        assert_eq!(fx.memory.bytes(DTA, 5), b"hello");
        assert_eq!(sft(&fx).position, 5);

        r.cx = 100;
        assert_eq!(ok(&mut fx, r).cx, 6);
        assert_eq!(fx.memory.bytes(DTA, 6), b" world");

        ok(&mut fx, regs(0x1106));
        assert_eq!(sft(&fx).handle_count, 0);
        assert_eq!(fx.driver.open_files(), 0);
        assert_eq!(fx.host.open_handles(), 0);

        // the slot is gone; a stale SFT is rejected
        assert_eq!(err(&mut fx, regs(0x1108)), 0x06);
    }

    #[test]
    fn test_close_shared_reference() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\a.txt", b"a");
        open(&mut fx, b"E:\\A.TXT", 0x00);
        fx.memory.write_u16(SFT, 2);

        ok(&mut fx, regs(0x1106));
        assert_eq!(sft(&fx).handle_count, 1);
        assert_eq!(fx.driver.open_files(), 1);
        ok(&mut fx, regs(0x1106));
        assert_eq!(fx.driver.open_files(), 0);
    }

    #[test]
    fn test_close_pushes_set_date() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\a.txt", b"a");
        open(&mut fx, b"E:\\A.TXT", 0x02);

        let stamp = DosDateTime::from_fields(2021, 6, 15, 12, 30, 0);
        let mut s = sft(&fx);
        s.device_info |= DeviceInfo::DATE_SET;
        s.date = stamp.date;
        s.time = stamp.time;
        s.write(&mut fx.memory, SFT);

        ok(&mut fx, regs(0x1106));
        assert_eq!(fx.host.times_set, vec![("\\a.txt".to_string(), dos_to_timestamp(stamp, 0))]);
    }

    #[test]
    fn test_open_errors() {
        let mut fx = Fixture::new();
        fx.host.add_dir("\\sub");
        fx.set_fn1(b"E:\\NOPE.TXT");
        assert_eq!(err(&mut fx, regs(0x1116)), 0x02);
        fx.set_fn1(b"E:\\NODIR\\NOPE.TXT");
        assert_eq!(err(&mut fx, regs(0x1116)), 0x03);
        fx.set_fn1(b"E:\\SUB");
        assert_eq!(err(&mut fx, regs(0x1116)), 0x05);
        assert_eq!(fx.host.open_handles(), 0);
        assert_eq!(fx.driver.open_files(), 0);
    }

    #[test]
    fn test_large_files_are_invisible() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\huge.bin", b"").size = Some(5 << 30);
        fx.host.add_file("\\small.bin", b"x");

        fx.set_fn1(b"E:\\HUGE.BIN");
        assert_eq!(err(&mut fx, regs(0x1116)), 0x03);
        assert_eq!(fx.host.open_handles(), 0);
        assert_eq!(err(&mut fx, regs(0x110F)), 0x03);

        assert_eq!(find_names(&mut fx, b"E:\\*.BIN", 0x00), vec!["SMALL   BIN"]);
    }

    #[test]
    fn test_create_write_truncate() {
        let mut fx = Fixture::new();
        fx.set_fn1(b"E:\\NEW.TXT");
        ok(&mut fx, regs(0x1117));
        fx.memory.write_u16(SFT, 1);
        assert!(fx.host.node("\\NEW.TXT").is_some());

        fx.memory.bytes_mut(DTA, 3).copy_from_slice(b"abc");
        let mut r = regs(0x1109);
        r.cx = 3;
        assert_eq!(ok(&mut fx, r).cx, 3);
        let s = sft(&fx);
        assert_eq!((s.position, s.size), (3, 3));
        assert!(!s.device_info.contains(DeviceInfo::UNWRITTEN));

        // back to 1, then a zero-length write cuts the file there
        let mut s = sft(&fx);
        s.position = 1;
        s.write(&mut fx.memory, SFT);
        r.cx = 0;
        assert_eq!(ok(&mut fx, r).cx, 0);
        assert_eq!(fx.host.node("\\NEW.TXT").unwrap().data, b"a");
        assert_eq!(sft(&fx).size, 1);
        assert!(fx.host.calls.contains(&"set_file_size"));
    }

    #[test]
    fn test_access_mode_enforced() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\a.txt", b"abc");
        open(&mut fx, b"E:\\A.TXT", 0x00);
        let mut r = regs(0x1109);
        r.cx = 1;
        assert_eq!(err(&mut fx, r), 0x05);

        open(&mut fx, b"E:\\A.TXT", 0x01);
        assert_eq!(err(&mut fx, regs(0x1108)), 0x05);
    }

    #[test]
    fn test_seek_from_end() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\readme.txt", b"hello world");
        open(&mut fx, b"E:\\README.TXT", 0x00);

        let mut r = regs(0x1121);
        r.cx = 0xFFFF;
        r.dx = 0xFFFE;
        let out = ok(&mut fx, r);
        assert_eq!((out.dx, out.ax), (0, 9));
        assert_eq!(sft(&fx).position, 9);

        r.cx = 0;
        r.dx = 0x10;
        let out = ok(&mut fx, r);
        assert_eq!(out.ax, 27);

        // before the start clamps to 0
        r.cx = 0xFFFF;
        r.dx = 0x0000;
        assert_eq!(ok(&mut fx, r).ax, 0);
    }

    #[test]
    fn test_extended_open_results() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\a.txt", b"abc");
        let ext = |fx: &mut Fixture, name: &[u8], action: u16| {
            fx.set_fn1(name);
            fx.memory.write_u16(SDA.add(sda::EXT_OPEN_ACTION), action);
            fx.memory.write_u16(SDA.add(sda::EXT_OPEN_MODE), 0x0002);
            let out = call(fx, regs(0x112E));
            fx.memory.write_u16(SFT, 1);
            out
        };

        let out = ext(&mut fx, b"E:\\A.TXT", 0x0001);
        assert_eq!((out.carry(), out.cx), (false, 1));
        ok(&mut fx, regs(0x1106));

        let out = ext(&mut fx, b"E:\\B.TXT", 0x0010);
        assert_eq!((out.carry(), out.cx), (false, 2));
        ok(&mut fx, regs(0x1106));

        let out = ext(&mut fx, b"E:\\A.TXT", 0x0012);
        assert_eq!((out.carry(), out.cx), (false, 3));
        assert!(fx.host.node("\\a.txt").unwrap().data.is_empty());
        ok(&mut fx, regs(0x1106));

        let out = ext(&mut fx, b"E:\\A.TXT", 0x0010);
        assert_eq!((out.carry(), out.ax), (true, 0x50));
        let out = ext(&mut fx, b"E:\\C.TXT", 0x0001);
        assert_eq!((out.carry(), out.ax), (true, 0x02));
        assert_eq!(fx.host.open_handles(), 0);
    }

    #[test]
    fn test_lock() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\a.txt", b"abc");
        open(&mut fx, b"E:\\A.TXT", 0x02);
        let region = FarPtr::new(0x0400, 0);
        fx.memory.write_u32(region, 10);
        fx.memory.write_u32(region.add(4), 20);

        let mut r = regs(0x110A);
        r.ds = region.segment;
        r.dx = region.offset;
        ok(&mut fx, r);
        r.bx = 1;
        ok(&mut fx, r);
        assert_eq!(
            fx.host.locks,
            vec![(10, 20, LockFlags::EXCLUSIVE), (10, 20, LockFlags::empty())]
        );

        fx.host.fail_locks = true;
        assert_eq!(err(&mut fx, r), 0x21);
    }

    #[test]
    fn test_get_and_set_attributes() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\ro.txt", b"12345").extra_mode = fs_mode::DOS_READONLY;
        fx.set_fn1(b"E:\\RO.TXT");
        let out = ok(&mut fx, regs(0x110F));
        assert_eq!(out.ax, 0x01);
        assert_eq!((out.bx, out.di), (0, 5));
        assert_eq!(out.dx, (20 << 9) | (1 << 5) | 1);

        ok(&mut fx, regs(0x110E));
        fx.set_fn1(b"E:\\GONE.TXT");
        assert_eq!(err(&mut fx, regs(0x110E)), 0x02);
    }

    #[test]
    fn test_rename() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\a.txt", b"a");
        fx.set_fn1(b"E:\\A.TXT");
        fx.set_fn2(b"E:\\B.TXT");
        ok(&mut fx, regs(0x1111));
        assert!(fx.host.node("\\B.TXT").is_some());
        assert!(fx.host.node("\\a.txt").is_none());
    }

    #[test]
    fn test_rename_across_drives_makes_no_call() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\a.txt", b"a");
        fx.host.calls.clear();
        fx.set_fn1(b"E:\\A.TXT");
        fx.set_fn2(b"F:\\A.TXT");
        assert_eq!(err(&mut fx, regs(0x1111)), 0x11);
        assert!(fx.host.calls.is_empty());
    }

    #[test]
    fn test_delete() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\a.txt", b"a");
        fx.host.add_file("\\b.txt", b"b");
        fx.host.add_file("\\c.doc", b"c");
        fx.host.add_file("\\keep.txt", b"k").extra_mode = fs_mode::DOS_READONLY;

        fx.set_fn1(b"E:\\C.DOC");
        ok(&mut fx, regs(0x1113));
        assert!(fx.host.node("\\c.doc").is_none());

        fx.set_fn1(b"E:\\*.TXT");
        ok(&mut fx, regs(0x1113));
        assert!(fx.host.node("\\a.txt").is_none());
        assert!(fx.host.node("\\b.txt").is_none());
        assert!(fx.host.node("\\keep.txt").is_some());
        assert_eq!(fx.host.open_handles(), 0);

        fx.set_fn1(b"E:\\*.BAK");
        assert_eq!(err(&mut fx, regs(0x1113)), 0x02);
        fx.set_fn1(b"E:\\NONE.TXT");
        assert_eq!(err(&mut fx, regs(0x1113)), 0x02);
    }

    #[test]
    fn test_directories() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\file.txt", b"");

        fx.set_fn1(b"E:\\SUB");
        ok(&mut fx, regs(0x1103));
        assert!(fx.host.node("\\SUB").unwrap().dir);
        assert_eq!(fx.host.open_handles(), 0);
        assert_eq!(err(&mut fx, regs(0x1103)), 0x05);
        ok(&mut fx, regs(0x1105));

        fx.set_fn1(b"E:\\FILE.TXT");
        assert_eq!(err(&mut fx, regs(0x1105)), 0x03);
        fx.set_fn1(b"E:\\MISSING");
        assert_eq!(err(&mut fx, regs(0x1105)), 0x03);

        fx.host.add_file("\\SUB\\x.txt", b"");
        fx.set_fn1(b"E:\\SUB");
        assert_eq!(err(&mut fx, regs(0x1101)), 0x03);
        fx.set_fn1(b"E:\\SUB\\X.TXT");
        ok(&mut fx, regs(0x1113));
        fx.set_fn1(b"E:\\SUB");
        ok(&mut fx, regs(0x1101));
        assert!(fx.host.node("\\SUB").is_none());
    }

    #[test]
    fn test_disk_free() {
        let mut fx = Fixture::new();
        let mut r = regs(0x110C);
        let cds = cds_entry(CDS, DRIVE);
        r.es = cds.segment;
        r.di = cds.offset;
        let out = ok(&mut fx, r);
        // 100 MiB total, 50 MiB free in 2 KiB clusters
        assert_eq!(out.ax, 0xF804);
        assert_eq!(out.bx, 51200);
        assert_eq!(out.cx, 512);
        assert_eq!(out.dx, 25600);
        assert_eq!(fx.host.open_handles(), 0);
    }

    #[test]
    fn test_disk_geometry_limits() {
        let small = VolumeInfo { total_bytes: 1 << 20, available_bytes: 1 << 19, ..VolumeInfo::default() };
        assert_eq!(disk_geometry(&small), (1, 2048, 1024));

        let big = VolumeInfo { total_bytes: 1 << 40, available_bytes: 1 << 40, ..VolumeInfo::default() };
        assert_eq!(disk_geometry(&big), (64, 0xFFFF, 0xFFFF));
    }

    #[test]
    fn test_find_volume_label_first() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\a.txt", b"a");
        fx.host.add_dir("\\sub");

        let names = find_names(&mut fx, b"E:\\????????.???", 0x18);
        assert_eq!(names, vec!["SHARED", "A       TXT", "SUB"]);

        // without the directory bit only files come back
        assert_eq!(find_names(&mut fx, b"E:\\????????.???", 0x00), vec!["A       TXT"]);
    }

    #[test]
    fn test_find_label_only() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\a.txt", b"a");
        assert_eq!(find_names(&mut fx, b"E:\\????????.???", 0x08), vec!["SHARED"]);
        assert_eq!(fx.host.open_handles(), 0);
    }

    #[test]
    fn test_find_in_subdirectory_shows_dots() {
        let mut fx = Fixture::new();
        fx.host.add_dir("\\sub");
        fx.host.add_file("\\sub\\x.txt", b"x");
        let names = find_names(&mut fx, b"E:\\SUB\\????????.???", 0x10);
        assert_eq!(names, vec![".", "..", "X       TXT"]);
    }

    #[test]
    fn test_find_errors() {
        let mut fx = Fixture::new();
        fx.set_fn1(b"E:\\NODIR\\*.*");
        fx.memory.write_u8(SDA.add(sda::SEARCH_ATTR), 0);
        assert_eq!(err(&mut fx, regs(0x111B)), 0x03);

        fx.set_fn1(b"E:\\*.XYZ");
        assert_eq!(err(&mut fx, regs(0x111B)), 0x12);
    }

    /// Run one request with memory seen through the flat real-mode mapping
    fn conventional_call(fx: &mut Fixture, r: Registers) -> (Outcome, Registers) {
        let mut regs = r;
        let mut memory = unsafe { ConventionalMemory::new(fx.memory.0.as_mut_ptr()) };
        let mut dev = Devices {
            folders: &mut fx.host,
            memory: &mut memory,
        };
        let outcome = fx.driver.int2f(&mut regs, &mut dev);
        (outcome, regs)
    }

    #[test]
    fn test_dta_at_hma_edge() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\big.txt", &[b'x'; 64]);
        open(&mut fx, b"E:\\BIG.TXT", 0x02);

        // 32 bytes left below the top of the HMA
        let edge = FarPtr::new(0xFFFF, 0xFFE0);
        fx.memory.write_far_ptr(SDA.add(sda::DTA), edge);
        let mut r = regs(0x1108);
        r.cx = 64;
        let (outcome, out) = conventional_call(&mut fx, r);
        assert_eq!(outcome, Outcome::Handled);
        assert!(out.carry());
        assert_eq!(out.ax, DosError::InvalidData.code());
        assert_eq!(sft(&fx).position, 0);

        r.cx = 32;
        let (_, out) = conventional_call(&mut fx, r);
        assert!(!out.carry());
        assert_eq!(out.cx, 32);
        assert_eq!(fx.memory.bytes(edge, 32), &[b'x'; 32]);

        let mut w = regs(0x1109);
        w.cx = 33;
        let (_, out) = conventional_call(&mut fx, w);
        assert!(out.carry());
        assert_eq!(out.ax, DosError::InvalidData.code());
        assert!(!fx.host.calls.contains(&"write"));

        // no room for the search block
        fx.memory.write_far_ptr(SDA.add(sda::DTA), FarPtr::new(0xFFFF, 0xFFF0));
        fx.set_fn1(b"E:\\*.TXT");
        fx.memory.write_u8(SDA.add(sda::SEARCH_ATTR), 0);
        let (outcome, out) = conventional_call(&mut fx, regs(0x111B));
        assert_eq!(outcome, Outcome::Handled);
        assert_eq!(out.ax, DosError::InvalidData.code());
        // and a find-next there cannot be one of ours
        assert_eq!(conventional_call(&mut fx, regs(0x111C)).0, Outcome::Chain);
    }

    #[test]
    fn test_find_next_with_stale_tag() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\a.txt", b"a");
        fx.host.add_file("\\b.txt", b"b");
        fx.set_fn1(b"E:\\*.TXT");
        fx.memory.write_u8(SDA.add(sda::SEARCH_ATTR), 0);
        ok(&mut fx, regs(0x111B));

        let mut sdb = SearchBlock::read(&fx.memory, DTA);
        sdb.dir_tag = sdb.dir_tag.wrapping_add(1);
        sdb.write(&mut fx.memory, DTA);
        assert_eq!(err(&mut fx, regs(0x111C)), 0x12);
    }

    #[test]
    fn test_close_all_is_chained() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\a.txt", b"a");
        open(&mut fx, b"E:\\A.TXT", 0x00);

        // a file of another process stays open
        fx.memory.write_u16(SDA.add(sda::PSP), PSP + 1);
        open(&mut fx, b"E:\\A.TXT", 0x00);
        fx.memory.write_u16(SDA.add(sda::PSP), PSP);

        let (outcome, _) = fx.call(regs(0x111D));
        assert_eq!(outcome, Outcome::Chain);
        assert_eq!(fx.driver.open_files(), 1);
        assert_eq!(fx.host.open_handles(), 1);
    }

    #[test]
    fn test_mangled_names_round_trip() {
        let mut fx = Fixture::new();
        fx.host.add_file("\\Long File Name.text", b"data");
        let names = find_names(&mut fx, b"E:\\????????.???", 0x00);
        assert_eq!(names.len(), 1);
        let short = &names[0];
        assert_eq!(&short[4..5], "~");

        // open by the short name
        let base = short[..8].trim_end();
        let name = format!("E:\\{}.{}", base, &short[8..]);
        open(&mut fx, name.as_bytes(), 0x00);
        let mut r = regs(0x1108);
        r.cx = 4;
        assert_eq!(ok(&mut fx, r).cx, 4);
        assert_eq!(fx.memory.bytes(DTA, 4), b"data");
    }
}

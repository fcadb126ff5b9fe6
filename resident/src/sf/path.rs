//! Path Translation
//!
//! DOS hands the redirector canonical names such as `E:\SUBDIR\FILE.TXT`
//! in code page 437. The host wants `\subdir\file.txt` in UTF-8, relative
//! to the mapped folder.
//!
//! Components containing `~` may be mangled short names that only exist on
//! the DOS side. Those are looked up by listing the parent directory and
//! mangling every entry the same way find-first does.

use super::dos::{drive_of, DosError};
use crate::rtl::lfn::{fcb_name_from_host, looks_mangled, to_fcb_name, to_fcb_template};
use crate::rtl::nls::oem_to_utf8;
use crate::rtl::FcbName;
use crate::vbox::shfl::{
    CreateFlags, CreateParms, DirEntry, ListFlags, RemoteError, Root, SharedFolders, ShflString, PATH_DELIMITER,
};

/// Longest single DOS name component (8.3 with the dot)
const MAX_DOS_COMPONENT: usize = 12;

/// Flags for opening a directory to read its entries
pub const OPEN_DIRECTORY: CreateFlags = CreateFlags::DIRECTORY
    .union(CreateFlags::ACT_FAIL_IF_NEW)
    .union(CreateFlags::ACCESS_READ);

/// The part of a canonical name after the drive
pub fn strip_drive(name: &[u8]) -> &[u8] {
    match drive_of(name) {
        Some(_) => &name[2..],
        None => name,
    }
}

/// Split a canonical name into its directory and last component
pub fn split_last(name: &[u8]) -> (&[u8], &[u8]) {
    match name.iter().rposition(|&b| b == PATH_DELIMITER) {
        Some(pos) => (&name[..pos], &name[pos + 1..]),
        None => (&[][..], name),
    }
}

pub fn has_wildcards(component: &[u8]) -> bool {
    component.iter().any(|&b| b == b'?' || b == b'*')
}

/// FCB form of a DOS component, keeping wildcards
pub fn component_fcb(component: &[u8]) -> FcbName {
    to_fcb_name(component).unwrap_or_else(|| to_fcb_template(component))
}

/// Append `\name` to a host path, leaving a single separator after the root
pub fn join(path: &mut ShflString, name: &[u8]) -> Result<(), RemoteError> {
    if path.as_bytes().last() != Some(&PATH_DELIMITER) {
        path.push_byte(PATH_DELIMITER)?;
    }
    path.push(name)
}

/// Host path of a directory; the root is `\`
fn dir_path(path: &ShflString) -> &[u8] {
    if path.is_empty() {
        b"\\"
    } else {
        path.as_bytes()
    }
}

/// Translate a canonical DOS name on `root` into a host path in `out`.
///
/// `entry` is scratch space for directory listings. With `hash_digits == 0`
/// names are never treated as mangled.
pub fn to_host_path(
    folders: &mut dyn SharedFolders,
    root: Root,
    dos_name: &[u8],
    hash_digits: u8,
    entry: &mut DirEntry,
    out: &mut ShflString,
) -> Result<(), DosError> {
    out.clear();

    for component in strip_drive(dos_name).split(|&b| b == PATH_DELIMITER) {
        if component.is_empty() {
            continue;
        }
        if component.len() > MAX_DOS_COMPONENT {
            return Err(DosError::PathNotFound);
        }

        if hash_digits > 0 && looks_mangled(component) {
            if let Some(wanted) = to_fcb_name(component) {
                if resolve_mangled(folders, root, dir_path(out), &wanted, hash_digits, entry)? {
                    join(out, entry.name())?;
                    continue;
                }
            }
        }

        let mut utf8 = [0u8; MAX_DOS_COMPONENT * 3];
        let len = oem_to_utf8(component, &mut utf8).ok_or(DosError::PathNotFound)?;
        join(out, &utf8[..len])?;
    }

    if out.is_empty() {
        out.push_byte(PATH_DELIMITER)?;
    }
    Ok(())
}

/// Find the host entry of `parent` whose short name is `wanted`.
///
/// On success the entry is left in `entry`. A parent that cannot be opened
/// is not an error here; the caller's operation reports it.
fn resolve_mangled(
    folders: &mut dyn SharedFolders,
    root: Root,
    parent: &[u8],
    wanted: &FcbName,
    hash_digits: u8,
    entry: &mut DirEntry,
) -> Result<bool, DosError> {
    let mut parms = CreateParms::new(OPEN_DIRECTORY);
    if folders.open(root, parent, &mut parms).is_err() {
        return Ok(false);
    }

    let found = loop {
        match folders.list(root, parms.handle, ListFlags::RETURN_ONE, None, entry) {
            Ok(()) => {
                if fcb_name_from_host(entry.name(), hash_digits).as_ref() == Some(wanted) {
                    break Ok(true);
                }
            }
            Err(RemoteError::NoMoreEntries) => break Ok(false),
            Err(e) => break Err(DosError::from(e)),
        };
    };

    if let Err(e) = folders.close(root, parms.handle) {
        log::debug!("[VBSF] closing lookup directory failed: {:?}", e);
    }
    found
}

//! Directory Searches
//!
//! Find-first and find-next keep their position in the search data block
//! DOS stores at the start of the caller's DTA. The host directory handle
//! cannot live there, so the driver keeps one shared open directory and
//! stamps its tag into the block; a find-next carrying any other tag gets
//! "no more files".

use super::dos::{dta, sda, Attributes, DosError, FoundEntry, SearchBlock, FILE_NAME_SIZE, SDB_SIZE};
use super::path::{component_fcb, split_last, strip_drive, to_host_path, OPEN_DIRECTORY};
use super::{Devices, SharedFolderDriver};
use crate::rtl::lfn::{fcb_matches, fcb_name_from_host, is_valid_fcb_char};
use crate::rtl::nls::Utf8ToOem;
use crate::rtl::{timestamp_to_dos, FcbName};
use crate::vbox::shfl::{CreateParms, DirEntry, Handle, ListFlags, RemoteError, Root, SharedFolders};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenDir {
    root: Root,
    handle: Handle,
    tag: u16,
    /// `.` and `..` are hidden in the root of a folder
    at_root: bool,
    /// Only the volume label was asked for
    label_only: bool,
}

/// The shared search directory slot
pub struct SearchDir {
    dir: Option<OpenDir>,
    last_tag: u16,
}

impl SearchDir {
    pub const fn new() -> Self {
        Self { dir: None, last_tag: 0 }
    }

    fn start(&mut self, root: Root, handle: Handle, at_root: bool, label_only: bool) -> u16 {
        self.last_tag = match self.last_tag.wrapping_add(1) {
            0 => 1,
            tag => tag,
        };
        self.dir = Some(OpenDir {
            root,
            handle,
            tag: self.last_tag,
            at_root,
            label_only,
        });
        self.last_tag
    }

    fn current(&self, tag: u16) -> Option<OpenDir> {
        self.dir.filter(|d| d.tag == tag)
    }

    pub fn is_open(&self) -> bool {
        self.dir.is_some()
    }

    /// Root of the open search directory, if any
    pub fn root(&self) -> Option<Root> {
        self.dir.map(|d| d.root)
    }

    /// Close the shared directory handle, if one is open
    pub fn close(&mut self, folders: &mut dyn SharedFolders) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = folders.close(dir.root, dir.handle) {
                log::debug!("[VBSF] closing search directory failed: {:?}", e);
            }
        }
    }
}

impl Default for SearchDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Volume label for a folder name: 11 uppercase OEM columns
pub fn volume_label(name: &[u8]) -> FcbName {
    let mut label = [b' '; 11];
    for (dst, (c, _)) in label.iter_mut().zip(Utf8ToOem::new(name)) {
        let c = c.to_ascii_uppercase();
        *dst = if c == b' ' || is_valid_fcb_char(c) { c } else { b'_' };
    }
    label
}

/// Search criteria carried from the search block into the entry filter
pub struct Criteria {
    pub template: FcbName,
    pub attr: Attributes,
    pub at_root: bool,
    pub hash_digits: u8,
    pub tz_offset: i32,
}

/// The directory entry DOS sees for a host entry, or `None` to skip it
pub fn found_entry(entry: &DirEntry, criteria: &Criteria) -> Option<FoundEntry> {
    let info = &entry.info;
    let name = entry.name();
    if criteria.at_root && (name == b"." || name == b"..") {
        return None;
    }
    let size = info.dos_size()?;
    let fcb = fcb_name_from_host(name, criteria.hash_digits)?;
    if !fcb_matches(&criteria.template, &fcb) {
        return None;
    }

    let attr = Attributes::from_bits_retain(info.dos_attributes());
    if (attr - criteria.attr).intersects(Attributes::SPECIAL) {
        return None;
    }

    let stamp = timestamp_to_dos(info.modification_time, criteria.tz_offset);
    Some(FoundEntry {
        name: fcb,
        attr,
        time: stamp.time,
        date: stamp.date,
        size: if attr.contains(Attributes::DIRECTORY) { 0 } else { size },
    })
}

impl SharedFolderDriver {
    /// Find-first on `drive`: pattern in FN1, attribute in the SDA
    pub(super) fn find_first(&mut self, drive: u8, root: Root, dev: &mut Devices<'_>) -> Result<(), DosError> {
        let sda_ptr = self.tables.sda;
        let mut name = [0u8; FILE_NAME_SIZE];
        let len = super::dos::read_file_name(dev.memory, sda_ptr.add(sda::FN1), &mut name);
        let (dir, pattern) = split_last(&name[..len]);
        let attr = Attributes::from_bits_retain(dev.memory.read_u8(sda_ptr.add(sda::SEARCH_ATTR)));
        let dta = dta(dev.memory, sda_ptr, SDB_SIZE)?;

        self.search.close(dev.folders);
        to_host_path(dev.folders, root, dir, self.config.hash_digits, &mut self.entry, &mut self.path)?;

        let mut parms = CreateParms::new(OPEN_DIRECTORY);
        dev.folders
            .open(root, self.path.as_bytes(), &mut parms)
            .map_err(|e| match e {
                RemoteError::NotFound => DosError::PathNotFound,
                other => DosError::from(other),
            })?;

        let label_only = attr == Attributes::VOLUME_LABEL;
        let at_root = strip_drive(dir).is_empty();
        let tag = self.search.start(root, parms.handle, at_root, label_only);
        log::trace!("[VBSF] find first {:?} attr {:#04x} tag {}", self.path, attr.bits(), tag);

        let mut sdb = SearchBlock {
            drive,
            template: component_fcb(pattern),
            attr,
            entry_count: 0,
            dir_tag: tag,
        };

        if attr.contains(Attributes::VOLUME_LABEL) {
            let label = FoundEntry {
                name: self.labels[drive as usize],
                attr: Attributes::VOLUME_LABEL,
                time: 0,
                date: 0,
                size: 0,
            };
            label.write(dev.memory, sda_ptr.add(sda::FOUND_ENTRY));
            sdb.write(dev.memory, dta);
            return Ok(());
        }

        self.next_match(&mut sdb, dev)?;
        sdb.write(dev.memory, dta);
        Ok(())
    }

    /// Find-next using the search block in the DTA
    pub(super) fn find_next(&mut self, dev: &mut Devices<'_>) -> Result<(), DosError> {
        let dta = dta(dev.memory, self.tables.sda, SDB_SIZE)?;
        let mut sdb = SearchBlock::read(dev.memory, dta);
        self.next_match(&mut sdb, dev)?;
        sdb.write(dev.memory, dta);
        Ok(())
    }

    fn next_match(&mut self, sdb: &mut SearchBlock, dev: &mut Devices<'_>) -> Result<(), DosError> {
        let dir = match self.search.current(sdb.dir_tag) {
            Some(dir) if dir.label_only => {
                self.search.close(dev.folders);
                return Err(DosError::NoMoreFiles);
            }
            Some(dir) => dir,
            None => {
                log::trace!("[VBSF] find next: tag {} is not the open search", sdb.dir_tag);
                return Err(DosError::NoMoreFiles);
            }
        };
        let criteria = Criteria {
            template: sdb.template,
            attr: sdb.attr,
            at_root: dir.at_root,
            hash_digits: self.config.hash_digits,
            tz_offset: self.config.tz_offset,
        };

        loop {
            if let Err(e) = dev.folders.list(dir.root, dir.handle, ListFlags::RETURN_ONE, None, &mut self.entry) {
                self.search.close(dev.folders);
                return Err(match e {
                    RemoteError::NoMoreEntries => DosError::NoMoreFiles,
                    other => DosError::from(other),
                });
            }
            sdb.entry_count = sdb.entry_count.wrapping_add(1);

            if let Some(found) = found_entry(&self.entry, &criteria) {
                found.write(dev.memory, self.tables.sda.add(sda::FOUND_ENTRY));
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vbox::shfl::{fs_mode, FsObjInfo};

    fn entry(name: &[u8], size: i64, mode: u32) -> DirEntry {
        let mut e = DirEntry::new();
        e.set(FsObjInfo { size, mode, ..FsObjInfo::default() }, name).unwrap();
        e
    }

    fn criteria(template: &[u8; 11], attr: Attributes) -> Criteria {
        Criteria {
            template: *template,
            attr,
            at_root: true,
            hash_digits: 3,
            tz_offset: 0,
        }
    }

    #[test]
    fn test_volume_label() {
        assert_eq!(&volume_label(b"shared"), b"SHARED     ");
        assert_eq!(&volume_label(b"my folder+stuff"), b"MY FOLDER_S");
    }

    #[test]
    fn test_filter_dots_at_root() {
        let all = criteria(b"???????????", Attributes::DIRECTORY);
        let dot = entry(b".", 0, fs_mode::TYPE_DIRECTORY);
        assert!(found_entry(&dot, &all).is_none());
        let sub = Criteria { at_root: false, ..all };
        assert!(found_entry(&dot, &sub).is_some());
    }

    #[test]
    fn test_filter_large_files() {
        let all = criteria(b"???????????", Attributes::empty());
        assert!(found_entry(&entry(b"big.iso", 5 << 30, fs_mode::TYPE_FILE), &all).is_none());
        let ok = found_entry(&entry(b"small.iso", 4096, fs_mode::TYPE_FILE), &all).unwrap();
        assert_eq!(&ok.name, b"SMALL   ISO");
        assert_eq!(ok.size, 4096);
    }

    #[test]
    fn test_filter_attributes() {
        let files = criteria(b"???????????", Attributes::empty());
        let dirs = criteria(b"???????????", Attributes::DIRECTORY);
        let dir = entry(b"sub", 4096, fs_mode::TYPE_DIRECTORY);
        let hidden = entry(b"h.txt", 1, fs_mode::TYPE_FILE | fs_mode::DOS_HIDDEN);

        assert!(found_entry(&dir, &files).is_none());
        let found = found_entry(&dir, &dirs).unwrap();
        assert_eq!(found.attr, Attributes::DIRECTORY);
        assert_eq!(found.size, 0);
        assert!(found_entry(&hidden, &dirs).is_none());
        assert!(found_entry(&hidden, &criteria(b"???????????", Attributes::HIDDEN)).is_some());
    }

    #[test]
    fn test_filter_template() {
        let txt = criteria(b"????????TXT", Attributes::empty());
        assert!(found_entry(&entry(b"a.txt", 1, fs_mode::TYPE_FILE), &txt).is_some());
        assert!(found_entry(&entry(b"a.doc", 1, fs_mode::TYPE_FILE), &txt).is_none());
        // long names are matched by their mangled form
        let long = found_entry(&entry(b"Readme file.txt", 1, fs_mode::TYPE_FILE), &txt).unwrap();
        assert_eq!(long.name[4], b'~');
    }

    #[test]
    fn test_tags_skip_zero() {
        let mut search = SearchDir::new();
        search.last_tag = 0xFFFF;
        assert_eq!(search.start(1, 2, true, false), 1);
        assert!(search.current(1).is_some());
        assert!(search.current(2).is_none());
    }
}

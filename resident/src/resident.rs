//! Resident Singletons
//!
//! The one place with global state. The interrupt entry stubs find their
//! driver here; everything below takes the driver as an explicit context.
//!
//! - **Resident** - a driver behind a spin lock, entered with interrupts off
//! - **Hook** - a hooked interrupt vector and the handler it displaced
//!
//! Uninstall checks the vectors before touching any driver state: if some
//! later TSR hooked over us, the driver must stay in memory untouched.

use spin::Mutex;

use crate::hal::interrupts::{critical, hook_vector, unhook_vector, InterruptVectors, VectorError};
use crate::hal::memory::FarPtr;
use crate::hal::regs::Registers;
use crate::mouse::{self, MouseConfig, MouseDriver};
use crate::sf::redir::Outcome;
use crate::sf::{self, DosTables, SfConfig, SharedFolderDriver};

/// Mouse services
pub const MOUSE_VECTOR: u8 = 0x33;

/// DOS multiplex interrupt, carrying the redirector interface
pub const MULTIPLEX_VECTOR: u8 = 0x2F;

pub static MOUSE: Resident<MouseDriver> = Resident::new(MouseDriver::new());
pub static SHARED_FOLDERS: Resident<SharedFolderDriver> = Resident::new(SharedFolderDriver::new());

// ============================================================================
// Resident<T>
// ============================================================================

/// Driver state shared between the interrupt entry points
pub struct Resident<T> {
    inner: Mutex<T>,
}

impl<T> Resident<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Run `f` on the driver with interrupts disabled
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical(|| f(&mut self.inner.lock()))
    }

    /// Run `f` unless the driver is already in use further up the stack.
    ///
    /// An interrupt that arrives while the same driver is running must not
    /// spin on its lock; DOS would never get control back.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        critical(|| self.inner.try_lock().map(|mut guard| f(&mut guard)))
    }
}

// ============================================================================
// Vector hooks
// ============================================================================

/// An interrupt vector pointed at one of our entry stubs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hook {
    pub vector: u8,
    pub handler: FarPtr,
    /// Handler to chain to, restored on removal
    pub previous: FarPtr,
}

impl Hook {
    pub fn install<V: InterruptVectors + ?Sized>(ivt: &mut V, vector: u8, handler: FarPtr) -> Self {
        let previous = hook_vector(ivt, vector, handler);
        log::debug!(
            "[VBOX] INT {:02X}h hooked, previous {:04X}:{:04X}",
            vector,
            previous.segment,
            previous.offset
        );
        Self {
            vector,
            handler,
            previous,
        }
    }

    /// Whether the vector still points at us
    pub fn is_current<V: InterruptVectors + ?Sized>(&self, ivt: &V) -> bool {
        ivt.get_vector(self.vector) == self.handler
    }

    pub fn remove<V: InterruptVectors + ?Sized>(&self, ivt: &mut V) -> Result<(), VectorError> {
        unhook_vector(ivt, self.vector, self.handler, self.previous)
    }
}

/// Fail with the first hook that is no longer ours
fn check_hooks<V: InterruptVectors + ?Sized>(ivt: &V, hooks: &[Hook]) -> Result<(), VectorError> {
    match hooks.iter().find(|h| !h.is_current(ivt)) {
        Some(h) => Err(VectorError::Rehooked {
            vector: h.vector,
            current: ivt.get_vector(h.vector),
        }),
        None => Ok(()),
    }
}

// ============================================================================
// Mouse
// ============================================================================

impl Resident<MouseDriver> {
    /// Bring the mouse driver up and take over INT 33h
    pub fn install<V: InterruptVectors + ?Sized>(
        &self,
        config: MouseConfig,
        data_pointer: FarPtr,
        entry: FarPtr,
        ivt: &mut V,
        dev: &mut mouse::Devices<'_>,
    ) -> Result<Hook, mouse::InstallError> {
        self.with(|driver| {
            driver.set_data_pointer(data_pointer);
            driver.install(config, dev)
        })?;
        let hook = Hook::install(ivt, MOUSE_VECTOR, entry);
        self.with(|driver| driver.set_previous_vector(hook.previous));
        log::info!("[VBMOUSE] installed, {} resident", mouse::VERSION_STRING);
        Ok(hook)
    }

    /// Give INT 33h back and shut the driver down
    pub fn uninstall<V: InterruptVectors + ?Sized>(
        &self,
        hook: &Hook,
        ivt: &mut V,
        dev: &mut mouse::Devices<'_>,
    ) -> Result<(), mouse::InstallError> {
        hook.remove(ivt)?;
        self.with(|driver| driver.uninstall(dev));
        Ok(())
    }

    /// INT 33h entry
    pub fn int33(&self, regs: &mut Registers, dev: &mut mouse::Devices<'_>) {
        if self.try_with(|driver| driver.int33(regs, dev)).is_none() {
            log::trace!("[VBMOUSE] reentrant INT 33h AX={:04X} ignored", regs.ax);
        }
    }

    /// PS/2 BIOS callback entry
    pub fn bios_packet(&self, status: u8, x: u8, y: u8, z: u8, dev: &mut mouse::Devices<'_>) {
        // a packet arriving while INT 33h runs is dropped; the next one resyncs
        let _ = self.try_with(|driver| driver.on_bios_packet(status, x, y, z, dev));
    }
}

// ============================================================================
// Shared folders
// ============================================================================

/// Where the shared folder driver's entry points live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfInstall {
    pub config: SfConfig,
    pub tables: DosTables,
    pub data_pointer: FarPtr,
    pub entry: FarPtr,
}

impl Resident<SharedFolderDriver> {
    /// Mount the host's folders and take over the redirector interface.
    ///
    /// `dev.folders` must already be connected, as after
    /// [`ShflClient::start`](crate::vbox::shfl::ShflClient::start).
    /// Returns the hook and how many drives were mounted.
    pub fn install<V: InterruptVectors + ?Sized>(
        &self,
        install: &SfInstall,
        ivt: &mut V,
        dev: &mut sf::Devices<'_>,
    ) -> Result<(Hook, usize), sf::InstallError> {
        let mounted = self.with(|driver| {
            driver.configure(install.config, install.tables);
            driver.set_data_pointer(install.data_pointer);
            driver.automount(dev)
        })?;
        let hook = Hook::install(ivt, MULTIPLEX_VECTOR, install.entry);
        log::info!("[VBSF] installed, {} drive(s) mounted", mounted);
        Ok((hook, mounted))
    }

    /// Give INT 2Fh back and unmount every drive
    pub fn uninstall<V: InterruptVectors + ?Sized>(
        &self,
        hook: &Hook,
        ivt: &mut V,
        dev: &mut sf::Devices<'_>,
    ) -> Result<(), sf::InstallError> {
        check_hooks(ivt, core::slice::from_ref(hook))?;
        self.with(|driver| driver.unmount_all(dev));
        hook.remove(ivt)?;
        log::info!("[VBSF] uninstalled");
        Ok(())
    }

    /// INT 2Fh entry; a busy driver lets the request go down the chain
    pub fn int2f(&self, regs: &mut Registers, dev: &mut sf::Devices<'_>) -> Outcome {
        self.try_with(|driver| driver.int2f(regs, dev))
            .unwrap_or(Outcome::Chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::interrupts::VectorTable;
    use crate::hal::memory::FlatMemory;
    use crate::mouse::testing::Fixture as MouseFixture;
    use crate::sf::testing::{FakeFolders, CDS, LAST_DRIVE, SDA};

    const OLD_HANDLER: FarPtr = FarPtr::new(0xF000, 0x1000);
    const ENTRY: FarPtr = FarPtr::new(0x1000, 0x0200);

    #[test]
    fn test_try_with_refuses_reentry() {
        let cell = Resident::new(5u32);
        cell.with(|v| *v += 1);
        let nested = cell.with(|_| cell.try_with(|v| *v));
        assert_eq!(nested, None);
        assert_eq!(cell.try_with(|v| *v), Some(6));
    }

    #[test]
    fn test_hook_round_trip() {
        let mut mem = vec![0u8; 0x400];
        let mut ivt = VectorTable::new(mem.as_mut_slice());
        ivt.set_vector(MOUSE_VECTOR, OLD_HANDLER);

        let hook = Hook::install(&mut ivt, MOUSE_VECTOR, ENTRY);
        assert_eq!(hook.previous, OLD_HANDLER);
        assert!(hook.is_current(&ivt));

        hook.remove(&mut ivt).unwrap();
        assert_eq!(ivt.get_vector(MOUSE_VECTOR), OLD_HANDLER);
        assert!(!hook.is_current(&ivt));
    }

    fn sf_install() -> SfInstall {
        SfInstall {
            config: SfConfig::default(),
            tables: DosTables {
                sda: SDA,
                cds: CDS,
                last_drive: LAST_DRIVE,
            },
            data_pointer: FarPtr::new(0x1000, 0x0010),
            entry: ENTRY,
        }
    }

    #[test]
    fn test_shared_folders_lifecycle() {
        let resident = Resident::new(SharedFolderDriver::new());
        let mut host = FakeFolders::new();
        let mut memory = FlatMemory::new();
        let mut ivt_mem = vec![0u8; 0x400];
        let mut ivt = VectorTable::new(ivt_mem.as_mut_slice());
        ivt.set_vector(MULTIPLEX_VECTOR, OLD_HANDLER);

        let mut dev = sf::Devices {
            folders: &mut host,
            memory: &mut memory,
        };
        let (hook, mounted) = resident.install(&sf_install(), &mut ivt, &mut dev).unwrap();
        assert_eq!(mounted, 1);
        assert_eq!(ivt.get_vector(MULTIPLEX_VECTOR), ENTRY);

        let mut regs = Registers {
            ax: 0x1100,
            ..Default::default()
        };
        assert_eq!(resident.int2f(&mut regs, &mut dev), Outcome::Handled);
        assert_eq!(regs.ax, 0x11FF);

        resident.uninstall(&hook, &mut ivt, &mut dev).unwrap();
        assert_eq!(ivt.get_vector(MULTIPLEX_VECTOR), OLD_HANDLER);
        assert!(resident.with(|d| !d.is_mounted(4)));
        assert!(host.mapped.is_empty());
    }

    #[test]
    fn test_shared_folders_stay_when_rehooked() {
        let resident = Resident::new(SharedFolderDriver::new());
        let mut host = FakeFolders::new();
        let mut memory = FlatMemory::new();
        let mut ivt_mem = vec![0u8; 0x400];
        let mut ivt = VectorTable::new(ivt_mem.as_mut_slice());

        let mut dev = sf::Devices {
            folders: &mut host,
            memory: &mut memory,
        };
        let (hook, _) = resident.install(&sf_install(), &mut ivt, &mut dev).unwrap();
        let other = FarPtr::new(0x3000, 0);
        ivt.set_vector(MULTIPLEX_VECTOR, other);

        assert_eq!(
            resident.uninstall(&hook, &mut ivt, &mut dev),
            Err(sf::InstallError::Vector(VectorError::Rehooked {
                vector: MULTIPLEX_VECTOR,
                current: other
            }))
        );
        // nothing was torn down
        assert!(resident.with(|d| d.is_mounted(4)));
        assert_eq!(ivt.get_vector(MULTIPLEX_VECTOR), other);
    }

    #[test]
    fn test_busy_redirector_chains() {
        let resident = Resident::new(SharedFolderDriver::new());
        let mut host = FakeFolders::new();
        let mut memory = FlatMemory::new();
        let mut dev = sf::Devices {
            folders: &mut host,
            memory: &mut memory,
        };
        let mut regs = Registers {
            ax: 0x1100,
            ..Default::default()
        };
        let outcome = resident.with(|_| resident.int2f(&mut regs, &mut dev));
        assert_eq!(outcome, Outcome::Chain);
        assert_eq!(regs.ax, 0x1100);
    }

    #[test]
    fn test_mouse_lifecycle() {
        let resident = Resident::new(MouseDriver::new());
        let mut fx = MouseFixture::text();
        let mut ivt_mem = vec![0u8; 0x400];
        let mut ivt = VectorTable::new(ivt_mem.as_mut_slice());
        ivt.set_vector(MOUSE_VECTOR, OLD_HANDLER);

        let mut dev = fx.devices();
        let hook = resident
            .install(MouseConfig::default(), FarPtr::NULL, ENTRY, &mut ivt, &mut dev)
            .unwrap();
        assert_eq!(ivt.get_vector(MOUSE_VECTOR), ENTRY);

        let mut regs = Registers::default();
        resident.int33(&mut regs, &mut dev);
        assert_eq!(regs.ax, 0xFFFF);

        // disabling hands the caller the handler we chained over
        let mut regs = Registers { ax: 0x1F, ..Default::default() };
        resident.int33(&mut regs, &mut dev);
        assert_eq!(FarPtr::new(regs.es, regs.bx), OLD_HANDLER);

        resident.uninstall(&hook, &mut ivt, &mut dev).unwrap();
        assert_eq!(ivt.get_vector(MOUSE_VECTOR), OLD_HANDLER);
        assert!(resident.with(|d| d.capabilities().is_empty()));
    }
}

//! VMware Backdoor Absolute Pointer
//!
//! VMware (and QEMU's vmmouse emulation) expose an absolute pointer through
//! the "backdoor": an `in` from port 0x5658 with a magic value in EAX and a
//! command number in ECX, which the hypervisor intercepts and answers in all
//! four general registers.
//!
//! Pointer protocol:
//! - **ENABLE** then **STATUS** to check the device answered
//! - **ABSOLUTE** switches reporting to absolute coordinates
//! - **STATUS** low word counts queued data words, 4 per sample
//! - **DATA(4)** returns buttons, X, Y (0..0xFFFF) and a signed wheel byte

/// Backdoor I/O port
pub const BACKDOOR_PORT: u16 = 0x5658;
/// Backdoor magic, also echoed in EBX by GETVERSION
pub const BACKDOOR_MAGIC: u32 = 0x564D_5868;

/// Backdoor command numbers
pub mod command {
    pub const GET_VERSION: u32 = 10;
    pub const ABSPOINTER_DATA: u32 = 39;
    pub const ABSPOINTER_STATUS: u32 = 40;
    pub const ABSPOINTER_COMMAND: u32 = 41;
}

/// Arguments of `ABSPOINTER_COMMAND`
pub mod abspointer {
    pub const ENABLE: u32 = 0x4541_4552;
    pub const RELATIVE: u32 = 0xF5;
    pub const ABSOLUTE: u32 = 0x5342_4152;
}

/// STATUS value reporting a device error
pub const STATUS_ERROR: u32 = 0xFFFF_0000;
/// Data words per pointer sample
pub const SAMPLE_WORDS: u32 = 4;

bitflags::bitflags! {
    /// Button bits in the first data word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BackdoorButtons: u32 {
        const LEFT = 0x20;
        const RIGHT = 0x10;
        const MIDDLE = 0x08;
    }
}

/// Register file after a backdoor call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackdoorRegs {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// A single backdoor transaction
pub trait Backdoor {
    fn call(&mut self, command: u32, arg: u32) -> BackdoorRegs;
}

/// The real backdoor, reached with `in eax, dx`
#[derive(Debug, Clone, Copy, Default)]
pub struct PortBackdoor;

impl Backdoor for PortBackdoor {
    #[cfg(all(target_arch = "x86_64", not(test)))]
    fn call(&mut self, command: u32, arg: u32) -> BackdoorRegs {
        let eax: u32;
        let ebx: u32;
        let ecx: u32;
        let edx: u32;
        // RBX is reserved by LLVM, so it is saved by hand
        unsafe {
            core::arch::asm!(
                "push rbx",
                "mov ebx, {arg:e}",
                "in eax, dx",
                "mov {out_ebx:e}, ebx",
                "pop rbx",
                arg = in(reg) arg,
                out_ebx = out(reg) ebx,
                inout("eax") BACKDOOR_MAGIC => eax,
                inout("ecx") command => ecx,
                inout("edx") BACKDOOR_PORT as u32 => edx,
            );
        }
        BackdoorRegs { eax, ebx, ecx, edx }
    }

    // No hypervisor answers on other targets
    #[cfg(not(all(target_arch = "x86_64", not(test))))]
    fn call(&mut self, _command: u32, _arg: u32) -> BackdoorRegs {
        BackdoorRegs::default()
    }
}

/// One absolute pointer sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsSample {
    /// Buttons in INT 33h order (bit 0 left, bit 1 right, bit 2 middle)
    pub buttons: u8,
    pub x: u16,
    pub y: u16,
    pub wheel: i8,
}

/// Errors enabling the backdoor pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmwareError {
    NotPresent,
    DeviceError,
}

impl core::fmt::Display for VmwareError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            VmwareError::NotPresent => write!(f, "VMware backdoor not present"),
            VmwareError::DeviceError => write!(f, "VMware pointer did not answer"),
        }
    }
}

/// Absolute pointer driven through the backdoor
pub struct VmwarePointer<B: Backdoor> {
    backdoor: B,
    enabled: bool,
}

impl<B: Backdoor> VmwarePointer<B> {
    pub const fn new(backdoor: B) -> Self {
        Self {
            backdoor,
            enabled: false,
        }
    }

    /// Whether a hypervisor answers on the backdoor port
    pub fn detect(&mut self) -> bool {
        self.backdoor.call(command::GET_VERSION, 0).ebx == BACKDOOR_MAGIC
    }

    /// Switch the pointer to absolute reporting
    pub fn enable(&mut self) -> Result<(), VmwareError> {
        if !self.detect() {
            return Err(VmwareError::NotPresent);
        }

        self.backdoor.call(command::ABSPOINTER_COMMAND, abspointer::ENABLE);
        let status = self.backdoor.call(command::ABSPOINTER_STATUS, 0);
        if status.eax == STATUS_ERROR {
            log::warn!("[VMWARE] absolute pointer did not answer");
            return Err(VmwareError::DeviceError);
        }
        // Drain the version word queued by ENABLE
        self.backdoor.call(command::ABSPOINTER_DATA, 1);
        self.backdoor.call(command::ABSPOINTER_COMMAND, abspointer::ABSOLUTE);

        self.enabled = true;
        log::info!("[VMWARE] absolute pointer enabled");
        Ok(())
    }

    /// Return the pointer to relative PS/2 reporting
    pub fn disable(&mut self) {
        if self.enabled {
            self.backdoor.call(command::ABSPOINTER_COMMAND, abspointer::RELATIVE);
            self.enabled = false;
            log::info!("[VMWARE] absolute pointer disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fetch the next queued sample, if a complete one is pending
    pub fn poll(&mut self) -> Option<AbsSample> {
        if !self.enabled {
            return None;
        }

        let status = self.backdoor.call(command::ABSPOINTER_STATUS, 0);
        if status.eax == STATUS_ERROR {
            // The device reset itself; it has to be switched on again
            log::debug!("[VMWARE] pointer error, re-enabling");
            self.enabled = false;
            if let Err(e) = self.enable() {
                log::warn!("[VMWARE] re-enabling the pointer failed: {}", e);
            }
            return None;
        }
        if status.eax & 0xFFFF < SAMPLE_WORDS {
            return None;
        }

        let data = self.backdoor.call(command::ABSPOINTER_DATA, SAMPLE_WORDS);
        let flags = BackdoorButtons::from_bits_truncate(data.eax & 0xFFFF);
        let mut buttons = 0u8;
        if flags.contains(BackdoorButtons::LEFT) {
            buttons |= 0x01;
        }
        if flags.contains(BackdoorButtons::RIGHT) {
            buttons |= 0x02;
        }
        if flags.contains(BackdoorButtons::MIDDLE) {
            buttons |= 0x04;
        }

        Some(AbsSample {
            buttons,
            x: data.ebx as u16,
            y: data.ecx as u16,
            wheel: data.edx as u8 as i8,
        })
    }

    pub fn backdoor(&mut self) -> &mut B {
        &mut self.backdoor
    }
}

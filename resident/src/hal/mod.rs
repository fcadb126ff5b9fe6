//! Hardware Abstraction Layer
//!
//! Everything the drivers need from the machine, each behind a trait so the
//! state machines above can run against fakes:
//!
//! - **port** - x86 I/O port access
//! - **memory** - real-mode far pointers and DOS memory access
//! - **interrupts** - critical sections and interrupt vector hooking
//! - **bios** - PS/2 pointing device BIOS services and the BIOS data area
//! - **pci** - PCI BIOS device lookup
//! - **regs** - real-mode register frames passed to interrupt handlers
//! - **vds** - Virtual DMA Services buffer locking

pub mod bios;
pub mod interrupts;
pub mod memory;
pub mod pci;
pub mod port;
pub mod regs;
pub mod vds;

pub use bios::{BiosData, BiosDataArea, Ps2Bios, Ps2Error};
pub use interrupts::{critical, InterruptVectors};
pub use memory::{DosMemory, FarPtr};
pub use port::{HardwarePorts, PortIo};
pub use regs::Registers;

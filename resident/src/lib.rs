//! vbdos Resident Drivers
//!
//! Mouse integration and shared folders for DOS running under VirtualBox
//! or VMware. Both drivers stay resident and are entered only through
//! interrupts.
//!
//! # Architecture Overview
//!
//! - **hal** - ports, DOS memory, interrupt vectors, BIOS/PCI/VDS services
//! - **rtl** - 8.3 name mangling, code page and time conversion, scaling
//! - **vbox** - the VMMDev request transport, HGCM and the shared folders client
//! - **vmware** - the VMware backdoor absolute pointer
//! - **mouse** - PS/2 packet fusion, cursor drawing and the INT 33h API
//! - **sf** - the INT 2Fh network redirector over shared folders
//! - **resident** - the global driver instances and their vector hooks
//! - **serial** - the COM1 `log` backend
//!
//! # Entry Points
//!
//! The assembly entry stubs save the caller's registers into a
//! [`hal::Registers`] frame and call into [`resident`]: INT 33h and the PS/2
//! BIOS callback reach the mouse driver, INT 2Fh reaches the redirector.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

pub mod hal;
pub mod mouse;
pub mod resident;
pub mod rtl;
pub mod serial;
pub mod sf;
pub mod vbox;
pub mod vmware;

//! Mouse Driver
//!
//! A resident INT 33h driver for PS/2 mice with VirtualBox and VMware
//! pointer integration.
//!
//! # Input Pipeline
//!
//! ```text
//! BIOS callback -> ps2 (decode / reassemble) -> host status / backdoor
//!               -> events (double speed, scaling, clamping, counters)
//!               -> cursor refresh -> user handler
//! ```
//!
//! # Submodules
//!
//! - **ps2** - device detection, packet decode and reassembly
//! - **events** - pointer state and event fusion
//! - **cursor** - local and host cursor rendering
//! - **video** - BIOS video mode table and the VGA adapter
//! - **int33** - the INT 33h programming interface
//! - **status** - the save/restore state block

pub mod cursor;
pub mod events;
pub mod int33;
pub mod ps2;
pub mod status;
pub mod video;

use crate::hal::bios::{BiosData, Ps2Bios, Ps2Error};
use crate::hal::interrupts::{critical, VectorError};
use crate::hal::memory::{DosMemory, FarPtr};
use crate::rtl::scale::snap;
use crate::vbox::mouse::{MouseFeatures, MouseStatus};
use crate::vbox::{Doorbell, Transport, VbError};
use crate::vmware::{AbsSample, Backdoor, VmwarePointer};

use cursor::{Cursor, GraphicsShape, TextMasks};
use events::{EventFlags, Input, Motion, Outcome, PointerState, Window};
use ps2::{DeviceState, PacketAssembler, PacketMode, Ps2Device};
use video::VideoAdapter;

/// Version reported by function 24h (8.20)
pub const DRIVER_VERSION: u16 = 0x0820;

/// Probed by programs that look for a compatible driver in memory
pub const VERSION_STRING: &str = "VBMOUSE 8.20";

/// Extent assumed until a supported video mode is seen
const DEFAULT_EXTENT: (u16, u16) = (640, 200);

// ============================================================================
// Configuration and errors
// ============================================================================

/// Installer options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseConfig {
    /// Try the IntelliMouse knock
    pub use_wheel: bool,
    /// Use VirtualBox absolute input
    pub use_vbox: bool,
    /// Use the VMware backdoor pointer
    pub use_vmware: bool,
    /// Let the host draw the pointer while input is absolute
    pub host_cursor: bool,
    pub bios_packet_mode: PacketMode,
    /// BIOS ticks before a partial byte-stream packet is dropped
    pub packet_timeout_ticks: u32,
}

impl Default for MouseConfig {
    fn default() -> Self {
        Self {
            use_wheel: true,
            use_vbox: true,
            use_vmware: true,
            host_cursor: true,
            bios_packet_mode: PacketMode::Auto,
            packet_timeout_ticks: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallError {
    /// The PS/2 BIOS refused detection or setup
    Ps2(Ps2Error),
    /// An interrupt vector was hooked over the driver
    Vector(VectorError),
}

impl From<Ps2Error> for InstallError {
    fn from(e: Ps2Error) -> Self {
        InstallError::Ps2(e)
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
            InstallError::Ps2(e) => write!(f, "no PS/2 mouse: {}", e),
            InstallError::Vector(VectorError::Rehooked { vector, current }) => write!(
                f,
                "INT {:02X}h now points at {:04X}:{:04X}, cannot uninstall",
                vector, current.segment, current.offset
            ),
        }
    }
}

bitflags::bitflags! {
    /// What install found
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        const WHEEL = 0x01;
        const VBOX = 0x02;
        const VMWARE = 0x04;
        const ABSOLUTE = 0x08;
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// The VirtualBox side of pointer integration
pub trait HostPointer {
    fn status(&mut self) -> Result<MouseStatus, VbError>;
    fn set_features(&mut self, features: MouseFeatures) -> Result<(), VbError>;
    /// Upload `shape` and show it
    fn set_shape(&mut self, shape: &GraphicsShape) -> Result<(), VbError>;
    fn set_visible(&mut self, visible: bool) -> Result<(), VbError>;
}

impl<D: Doorbell> HostPointer for Transport<D> {
    fn status(&mut self) -> Result<MouseStatus, VbError> {
        self.get_mouse_status()
    }

    fn set_features(&mut self, features: MouseFeatures) -> Result<(), VbError> {
        self.set_mouse_status(features)
    }

    fn set_shape(&mut self, shape: &GraphicsShape) -> Result<(), VbError> {
        self.set_pointer_shape(shape.hot_x as u16, shape.hot_y as u16, &shape.and_mask, &shape.xor_mask)
    }

    fn set_visible(&mut self, visible: bool) -> Result<(), VbError> {
        self.set_pointer_visible(visible)
    }
}

/// An absolute pointer polled once per PS/2 packet
pub trait AbsPointer {
    fn enable(&mut self) -> bool;
    fn disable(&mut self);
    fn poll(&mut self) -> Option<AbsSample>;
}

impl<B: Backdoor> AbsPointer for VmwarePointer<B> {
    fn enable(&mut self) -> bool {
        VmwarePointer::<B>::enable(self).is_ok()
    }

    fn disable(&mut self) {
        VmwarePointer::<B>::disable(self)
    }

    fn poll(&mut self) -> Option<AbsSample> {
        VmwarePointer::<B>::poll(self)
    }
}

/// Registers passed to the user event handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerArgs {
    /// Event bits that matched the mask
    pub ax: u16,
    /// Buttons, wheel movement in the high byte
    pub bx: u16,
    pub cx: u16,
    pub dx: u16,
    /// Horizontal mickeys
    pub si: u16,
    /// Vertical mickeys
    pub di: u16,
}

/// Far call into the program's event handler
pub trait HandlerInvoker {
    fn call(&mut self, handler: FarPtr, args: &HandlerArgs);
}

/// Everything the driver touches outside its own state, for one call
pub struct Devices<'a> {
    pub bios: &'a dyn BiosData,
    pub ps2: &'a mut dyn Ps2Bios,
    pub video: &'a mut dyn VideoAdapter,
    pub host: Option<&'a mut dyn HostPointer>,
    pub abs: Option<&'a mut dyn AbsPointer>,
    pub handler: &'a mut dyn HandlerInvoker,
    pub memory: &'a mut dyn DosMemory,
}

// ============================================================================
// Driver
// ============================================================================

/// Resident mouse driver state
pub struct MouseDriver {
    config: MouseConfig,
    caps: Capabilities,
    device: Option<Ps2Device>,
    state: PointerState,
    cursor: Cursor,
    assembler: PacketAssembler,
    handler: FarPtr,
    mask: u16,
    enabled: bool,
    page: u16,
    /// Latest host status said input is absolute
    host_absolute: bool,
    host_can_draw: bool,
    /// Returned by function 7Fh
    data_pointer: FarPtr,
    /// INT 33h vector before ours, returned by function 1Fh
    previous_vector: FarPtr,
}

impl MouseDriver {
    pub const fn new() -> Self {
        Self {
            config: MouseConfig {
                use_wheel: true,
                use_vbox: true,
                use_vmware: true,
                host_cursor: true,
                bios_packet_mode: PacketMode::Auto,
                packet_timeout_ticks: 3,
            },
            caps: Capabilities::empty(),
            device: None,
            state: PointerState::new(),
            cursor: Cursor::new(),
            assembler: PacketAssembler::new(ps2::STANDARD_PACKET_SIZE, 3),
            handler: FarPtr::NULL,
            mask: 0,
            enabled: true,
            page: 0,
            host_absolute: false,
            host_can_draw: false,
            data_pointer: FarPtr::NULL,
            previous_vector: FarPtr::NULL,
        }
    }

    /// Detect the hardware, enable integration and start the PS/2 callback
    pub fn install(&mut self, config: MouseConfig, dev: &mut Devices<'_>) -> Result<(), InstallError> {
        self.config = config;
        self.caps = Capabilities::empty();

        let device = ps2::detect(dev.ps2, config.use_wheel, config.bios_packet_mode).map_err(|e| {
            log::error!("[PS2] detection failed: {}", e);
            InstallError::Ps2(e)
        })?;
        log::info!("[PS2] mouse id {:#04x}, wheel {}, {:?}", device.id, device.wheel, device.mode);
        if device.wheel {
            self.caps |= Capabilities::WHEEL;
        }
        self.assembler = PacketAssembler::new(device.packet_size(), config.packet_timeout_ticks);
        self.device = Some(device);

        if config.use_vbox {
            if let Some(host) = dev.host.as_deref_mut() {
                match host.set_features(MouseFeatures::GUEST_CAN_ABSOLUTE) {
                    Ok(()) => {
                        log::info!("[VBMOUSE] VirtualBox integration enabled");
                        self.caps |= Capabilities::VBOX | Capabilities::ABSOLUTE;
                    }
                    Err(e) => log::warn!("[VBMOUSE] VirtualBox integration unavailable: {}", e),
                }
            }
        }

        if config.use_vmware && !self.caps.contains(Capabilities::VBOX) {
            if let Some(abs) = dev.abs.as_deref_mut() {
                if abs.enable() {
                    self.caps |= Capabilities::VMWARE | Capabilities::ABSOLUTE | Capabilities::WHEEL;
                } else {
                    log::debug!("[VMWARE] backdoor pointer not available");
                }
            }
        }

        self.reset(dev);

        dev.ps2.set_callback(true)?;
        dev.ps2.enable(true)?;
        Ok(())
    }

    /// Stop the device and give the pointer back to the host
    pub fn uninstall(&mut self, dev: &mut Devices<'_>) {
        if let Err(e) = dev.ps2.enable(false) {
            log::warn!("[PS2] disable failed: {}", e);
        }
        if let Err(e) = dev.ps2.set_callback(false) {
            log::warn!("[PS2] clearing the callback failed: {}", e);
        }

        self.cursor.set_counter(-1);
        self.host_absolute = false;
        self.refresh(dev);

        if self.caps.contains(Capabilities::VBOX) {
            if let Some(host) = dev.host.as_deref_mut() {
                if let Err(e) = host.set_features(MouseFeatures::empty()) {
                    log::warn!("[VBMOUSE] releasing absolute mode failed: {}", e);
                }
            }
        }
        if self.caps.contains(Capabilities::VMWARE) {
            if let Some(abs) = dev.abs.as_deref_mut() {
                abs.disable();
            }
        }
        self.caps = Capabilities::empty();
        self.device = None;
        log::info!("[VBMOUSE] uninstalled");
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn device_state(&self) -> DeviceState {
        match self.device {
            None => DeviceState::NoHardware,
            Some(_) if self.caps.contains(Capabilities::ABSOLUTE) => DeviceState::AbsoluteCapable,
            Some(_) => DeviceState::RelativeOnly,
        }
    }

    pub fn state(&self) -> &PointerState {
        &self.state
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Where the resident copy of this state lives, for function 7Fh
    pub fn set_data_pointer(&mut self, ptr: FarPtr) {
        self.data_pointer = ptr;
    }

    pub fn set_previous_vector(&mut self, ptr: FarPtr) {
        self.previous_vector = ptr;
    }

    /// Settings back to defaults for the current video mode, cursor hidden
    pub fn reset(&mut self, dev: &mut Devices<'_>) {
        self.cursor.set_counter(-1);
        self.refresh(dev);

        let (width, height) = self.extent();
        self.state.reset(width, height);
        self.cursor.set_graphics_shape(GraphicsShape::ARROW, dev);
        self.cursor.set_text_masks(TextMasks::DEFAULT, dev);
        self.set_handler(FarPtr::NULL, 0);
        self.assembler.reset();
        self.refresh(dev);
    }

    /// Install the user handler; interrupts never see half of it
    pub fn set_handler(&mut self, handler: FarPtr, mask: u16) {
        critical(|| {
            self.handler = handler;
            self.mask = mask;
        });
    }

    fn extent(&self) -> (u16, u16) {
        self.cursor.mode().map(|m| (m.width, m.height)).unwrap_or(DEFAULT_EXTENT)
    }

    /// Snapped position as reported to programs
    fn reported_position(&self) -> (i16, i16) {
        let (gx, gy) = self.cursor.mode().map(|m| m.grid()).unwrap_or((1, 1));
        (snap(self.state.x, gx), snap(self.state.y, gy))
    }

    /// Redraw the cursor. A mode change resets the window to the new screen.
    fn refresh(&mut self, dev: &mut Devices<'_>) {
        let host_renders = self.config.host_cursor && self.host_absolute && self.host_can_draw;
        if let Some(mode) = self.cursor.refresh(self.state.x, self.state.y, host_renders, dev) {
            self.state.set_window(Window::full(mode.width, mode.height));
            self.cursor.refresh(self.state.x, self.state.y, host_renders, dev);
        }
    }

    // ------------------------------------------------------------------------
    // Packet path
    // ------------------------------------------------------------------------

    /// Entry from the PS/2 BIOS callback. In byte-stream mode only `status`
    /// carries data.
    pub fn on_bios_packet(&mut self, status: u8, x: u8, y: u8, z: u8, dev: &mut Devices<'_>) {
        let Some(device) = self.device else { return };

        let packet = if device.mode == PacketMode::ByteStream {
            match self.assembler.push(status, dev.bios.ticks()) {
                Some(bytes) => ps2::Packet::decode(bytes[0], bytes[1], bytes[2], bytes[3]),
                None => return,
            }
        } else {
            ps2::Packet::decode(status, x, y, z)
        };
        self.process(packet, dev);
    }

    /// Fuse one packet with any absolute input and deliver the events
    pub fn process(&mut self, packet: ps2::Packet, dev: &mut Devices<'_>) {
        if !self.enabled {
            return;
        }
        let ticks = dev.bios.ticks();
        let wheel = if self.caps.contains(Capabilities::WHEEL) { packet.wheel } else { 0 };
        let mut input = Input {
            motion: Motion::Relative { dx: packet.dx, dy: packet.dy },
            buttons: packet.buttons,
            wheel,
        };

        self.host_absolute = false;
        if self.caps.contains(Capabilities::VBOX) {
            if let Some(host) = dev.host.as_deref_mut() {
                match host.status() {
                    Ok(status) if status.is_absolute() => {
                        input.motion = Motion::Absolute { x: status.x, y: status.y };
                        self.host_absolute = true;
                        self.host_can_draw = status.host_can_draw();
                    }
                    Ok(_) => {}
                    Err(e) => log::trace!("[VBMOUSE] status query failed: {:?}", e),
                }
            }
        }
        if !self.host_absolute && self.caps.contains(Capabilities::VMWARE) {
            if let Some(sample) = dev.abs.as_deref_mut().and_then(|abs| abs.poll()) {
                input = Input {
                    motion: Motion::Absolute { x: sample.x, y: sample.y },
                    buttons: sample.buttons,
                    wheel: sample.wheel,
                };
            }
        }

        let outcome = self.state.apply(input, ticks, self.extent());
        self.refresh(dev);
        self.notify(&outcome, dev);
    }

    fn notify(&mut self, outcome: &Outcome, dev: &mut Devices<'_>) {
        let hits = outcome.events.bits() & self.mask;
        if hits == 0 || self.handler.is_null() {
            return;
        }
        let (x, y) = self.reported_position();
        let args = HandlerArgs {
            ax: hits,
            bx: self.state.buttons as u16 | (outcome.wheel as u8 as u16) << 8,
            cx: x as u16,
            dx: y as u16,
            si: outcome.dx as u16,
            di: outcome.dy as u16,
        };
        log::trace!("[VBMOUSE] handler events {:#06x}", hits);
        dev.handler.call(self.handler, &args);

        if outcome.events.contains(EventFlags::WHEEL) && hits & EventFlags::WHEEL.bits() != 0 {
            // the handler consumed the movement
            self.state.take_wheel();
        }
    }
}

impl Default for MouseDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::hal::bios::ps2_status;
    use crate::hal::memory::FlatMemory;
    use std::collections::VecDeque;

    pub struct FakeBios {
        pub mode: u8,
        pub columns: u16,
        pub rows: u8,
        pub ticks: u32,
        pub page: u16,
    }

    impl BiosData for FakeBios {
        fn ticks(&self) -> u32 {
            self.ticks
        }
        fn video_mode(&self) -> u8 {
            self.mode
        }
        fn text_columns(&self) -> u16 {
            self.columns
        }
        fn text_rows(&self) -> u8 {
            self.rows
        }
        fn char_height(&self) -> u16 {
            16
        }
        fn page_offset(&self) -> u16 {
            self.page
        }
    }

    /// PS/2 BIOS whose device answers the wheel knock when `wheel` is set
    #[derive(Default)]
    pub struct FakePs2 {
        pub wheel: bool,
        pub absent: bool,
        /// Last packet size passed to init
        pub packet_size: u8,
        pub rates: Vec<u8>,
        pub enabled: bool,
        pub callback: bool,
    }

    impl FakePs2 {
        fn check(&self) -> Result<(), Ps2Error> {
            if self.absent {
                Err(Ps2Error(ps2_status::INTERFACE_ERROR))
            } else {
                Ok(())
            }
        }
    }

    impl Ps2Bios for FakePs2 {
        fn reset(&mut self) -> Result<u8, Ps2Error> {
            self.check()?;
            self.rates.clear();
            Ok(0)
        }
        fn init(&mut self, packet_size: u8) -> Result<(), Ps2Error> {
            self.check()?;
            self.packet_size = packet_size;
            self.rates.clear();
            Ok(())
        }
        fn enable(&mut self, enable: bool) -> Result<(), Ps2Error> {
            self.check()?;
            self.enabled = enable;
            Ok(())
        }
        fn set_sample_rate(&mut self, rate: u8) -> Result<(), Ps2Error> {
            self.check()?;
            self.rates.push(rate);
            Ok(())
        }
        fn set_resolution(&mut self, _resolution: u8) -> Result<(), Ps2Error> {
            self.check()
        }
        fn device_id(&mut self) -> Result<u8, Ps2Error> {
            self.check()?;
            let knocked = self.rates.ends_with(&[6, 5, 4]);
            Ok(if self.wheel && knocked { ps2::device_id::INTELLIMOUSE } else { ps2::device_id::STANDARD })
        }
        fn set_callback(&mut self, installed: bool) -> Result<(), Ps2Error> {
            self.check()?;
            self.callback = installed;
            Ok(())
        }
    }

    /// Display memory as plain arrays. Planes are visible at A000 between
    /// `save_state` and `restore_state`.
    pub struct FakeVideo {
        pub text: Vec<u8>,
        pub vga: Vec<u8>,
        pub planes: [Vec<u8>; 4],
        pub plane: usize,
        pub planar_access: bool,
        pub saves: u32,
        pub restores: u32,
    }

    impl FakeVideo {
        fn new() -> Self {
            Self {
                text: vec![0; 0x8000],
                vga: vec![0; 0x10000],
                planes: [vec![0; 0x10000], vec![0; 0x10000], vec![0; 0x10000], vec![0; 0x10000]],
                plane: 0,
                planar_access: false,
                saves: 0,
                restores: 0,
            }
        }
    }

    impl VideoAdapter for FakeVideo {
        fn window(&mut self, segment: u16) -> &mut [u8] {
            match segment {
                video::segment::VGA if self.planar_access => self.planes[self.plane].as_mut_slice(),
                video::segment::VGA => self.vga.as_mut_slice(),
                _ => self.text.as_mut_slice(),
            }
        }
        fn select_plane(&mut self, plane: u8) {
            self.plane = plane as usize & 3;
        }
        fn save_state(&mut self) {
            self.saves += 1;
            self.planar_access = true;
        }
        fn restore_state(&mut self) {
            self.restores += 1;
            self.planar_access = false;
        }
    }

    /// VirtualBox pointer side, logging every visible change
    pub struct FakeHost {
        pub status: MouseStatus,
        pub features: Option<MouseFeatures>,
        pub log: Vec<&'static str>,
        pub fail: bool,
    }

    impl FakeHost {
        pub fn absolute(&mut self, x: u16, y: u16) {
            self.status = MouseStatus { features: MouseFeatures::HOST_WANTS_ABSOLUTE, x, y };
        }
    }

    impl HostPointer for FakeHost {
        fn status(&mut self) -> Result<MouseStatus, VbError> {
            if self.fail {
                return Err(VbError::Host(-1));
            }
            Ok(self.status)
        }
        fn set_features(&mut self, features: MouseFeatures) -> Result<(), VbError> {
            if self.fail {
                return Err(VbError::Host(-1));
            }
            self.features = Some(features);
            Ok(())
        }
        fn set_shape(&mut self, _shape: &GraphicsShape) -> Result<(), VbError> {
            self.log.push("shape");
            Ok(())
        }
        fn set_visible(&mut self, visible: bool) -> Result<(), VbError> {
            self.log.push(if visible { "show" } else { "hide" });
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeAbs {
        pub present: bool,
        pub enabled: bool,
        pub queue: VecDeque<AbsSample>,
    }

    impl AbsPointer for FakeAbs {
        fn enable(&mut self) -> bool {
            self.enabled = self.present;
            self.present
        }
        fn disable(&mut self) {
            self.enabled = false;
        }
        fn poll(&mut self) -> Option<AbsSample> {
            if self.enabled {
                self.queue.pop_front()
            } else {
                None
            }
        }
    }

    #[derive(Default)]
    pub struct RecordingHandler {
        pub calls: Vec<(FarPtr, HandlerArgs)>,
    }

    impl HandlerInvoker for RecordingHandler {
        fn call(&mut self, handler: FarPtr, args: &HandlerArgs) {
            self.calls.push((handler, *args));
        }
    }

    /// One of each collaborator
    pub struct Fixture {
        pub bios: FakeBios,
        pub ps2: FakePs2,
        pub video: FakeVideo,
        pub host: FakeHost,
        pub abs: FakeAbs,
        pub handler: RecordingHandler,
        pub memory: FlatMemory,
        pub with_host: bool,
        pub with_abs: bool,
    }

    impl Fixture {
        fn with_mode(mode: u8) -> Self {
            Self {
                bios: FakeBios { mode, columns: 80, rows: 25, ticks: 0, page: 0 },
                ps2: FakePs2::default(),
                video: FakeVideo::new(),
                host: FakeHost {
                    status: MouseStatus { features: MouseFeatures::empty(), x: 0, y: 0 },
                    features: None,
                    log: Vec::new(),
                    fail: false,
                },
                abs: FakeAbs::default(),
                handler: RecordingHandler::default(),
                memory: FlatMemory::new(),
                with_host: false,
                with_abs: false,
            }
        }

        /// 80x25 colour text
        pub fn text() -> Self {
            Self::with_mode(3)
        }

        pub fn graphics(mode: u8) -> Self {
            Self::with_mode(mode)
        }

        pub fn devices(&mut self) -> Devices<'_> {
            Devices {
                bios: &self.bios,
                ps2: &mut self.ps2,
                video: &mut self.video,
                host: if self.with_host { Some(&mut self.host as &mut dyn HostPointer) } else { None },
                abs: if self.with_abs { Some(&mut self.abs as &mut dyn AbsPointer) } else { None },
                handler: &mut self.handler,
                memory: &mut self.memory,
            }
        }
    }

    /// An installed driver over a fixture
    pub fn installed(fx: &mut Fixture) -> MouseDriver {
        let mut driver = MouseDriver::new();
        let mut dev = fx.devices();
        assert_eq!(driver.install(MouseConfig::default(), &mut dev), Ok(()));
        driver
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{installed, Fixture};
    use super::*;

    fn packet(buttons: u8, dx: i16, dy: i16) -> ps2::Packet {
        ps2::Packet { buttons, dx, dy, wheel: 0 }
    }

    #[test]
    fn test_install_relative_only() {
        let mut fx = Fixture::text();
        let driver = installed(&mut fx);
        assert_eq!(driver.device_state(), DeviceState::RelativeOnly);
        assert!(fx.ps2.enabled);
        assert!(fx.ps2.callback);
        assert_eq!((driver.state().x, driver.state().y), (320, 100));
        assert!(!driver.cursor().is_visible());
    }

    #[test]
    fn test_install_without_mouse() {
        let mut fx = Fixture::text();
        fx.ps2.absent = true;
        let mut driver = MouseDriver::new();
        let mut dev = fx.devices();
        assert!(matches!(driver.install(MouseConfig::default(), &mut dev), Err(InstallError::Ps2(_))));
        assert_eq!(driver.device_state(), DeviceState::NoHardware);
    }

    #[test]
    fn test_install_with_vbox() {
        let mut fx = Fixture::text();
        fx.with_host = true;
        let driver = installed(&mut fx);
        assert_eq!(driver.device_state(), DeviceState::AbsoluteCapable);
        assert_eq!(fx.host.features, Some(MouseFeatures::GUEST_CAN_ABSOLUTE));
    }

    #[test]
    fn test_vbox_failure_degrades() {
        let mut fx = Fixture::text();
        fx.with_host = true;
        fx.host.fail = true;
        let driver = installed(&mut fx);
        assert_eq!(driver.device_state(), DeviceState::RelativeOnly);
    }

    #[test]
    fn test_handler_receives_masked_events() {
        let mut fx = Fixture::graphics(0x12);
        let mut driver = installed(&mut fx);
        let handler = FarPtr::new(0x2000, 0x0010);
        driver.set_handler(handler, (EventFlags::LEFT_PRESSED | EventFlags::LEFT_RELEASED).bits());

        {
            let mut dev = fx.devices();
            driver.process(packet(0, 4, 0), &mut dev);
            driver.process(packet(1, 0, 0), &mut dev);
        }
        assert_eq!(fx.handler.calls.len(), 1);
        let (ptr, args) = fx.handler.calls[0];
        assert_eq!(ptr, handler);
        assert_eq!(args.ax, EventFlags::LEFT_PRESSED.bits());
        assert_eq!(args.bx, 1);
        assert_eq!(args.cx, 324);
        assert_eq!(args.dx, 240);
    }

    #[test]
    fn test_vbox_absolute_overrides_relative() {
        let mut fx = Fixture::graphics(0x12);
        fx.with_host = true;
        let mut driver = installed(&mut fx);
        fx.host.absolute(0xFFFF, 0);
        {
            let mut dev = fx.devices();
            driver.process(packet(0, 5, 5), &mut dev);
        }
        assert_eq!((driver.state().x, driver.state().y), (639, 0));
    }

    #[test]
    fn test_vmware_sample_used() {
        let mut fx = Fixture::graphics(0x12);
        fx.with_abs = true;
        fx.abs.present = true;
        let mut driver = installed(&mut fx);
        assert!(driver.capabilities().contains(Capabilities::VMWARE));

        fx.abs.queue.push_back(AbsSample { buttons: 2, x: 0, y: 0xFFFF, wheel: 1 });
        {
            let mut dev = fx.devices();
            driver.process(packet(0, 1, 1), &mut dev);
        }
        assert_eq!((driver.state().x, driver.state().y), (0, 479));
        assert_eq!(driver.state().buttons, 2);
        assert_eq!(driver.state().wheel, 1);
    }

    #[test]
    fn test_byte_stream_packets() {
        let mut fx = Fixture::graphics(0x12);
        fx.ps2.wheel = true;
        let mut driver = installed(&mut fx);
        assert!(driver.capabilities().contains(Capabilities::WHEEL));

        let mut dev = fx.devices();
        for byte in [0x08, 0x02, 0x00] {
            driver.on_bios_packet(byte, 0, 0, 0, &mut dev);
            assert_eq!(driver.state().x, 320);
        }
        driver.on_bios_packet(0x0F, 0, 0, 0, &mut dev);
        assert_eq!(driver.state().x, 322);
        assert_eq!(driver.state().wheel, -1);
    }

    #[test]
    fn test_host_cursor_follows_absolute() {
        let mut fx = Fixture::graphics(0x13);
        fx.with_host = true;
        let mut driver = installed(&mut fx);
        driver.cursor.show();
        fx.host.absolute(0x8000, 0x8000);
        {
            let mut dev = fx.devices();
            driver.process(packet(0, 0, 0), &mut dev);
        }
        assert_eq!(driver.cursor().state(), cursor::CursorState::ShownByHost);

        fx.host.status.features = MouseFeatures::empty();
        {
            let mut dev = fx.devices();
            driver.process(packet(0, 0, 0), &mut dev);
        }
        assert_eq!(driver.cursor().state(), cursor::CursorState::ShownGraphics);
    }

    #[test]
    fn test_mode_change_resets_window() {
        let mut fx = Fixture::graphics(0x12);
        let mut driver = installed(&mut fx);
        {
            let mut dev = fx.devices();
            driver.process(packet(0, 0, 2000), &mut dev);
        }
        assert_eq!(driver.state().y, 479);

        fx.bios.mode = 0x13;
        {
            let mut dev = fx.devices();
            driver.process(packet(0, 0, 0), &mut dev);
        }
        assert_eq!(driver.state().window, Window::full(640, 200));
        assert_eq!(driver.state().y, 199);
    }

    #[test]
    fn test_uninstall_releases_hardware() {
        let mut fx = Fixture::text();
        fx.with_host = true;
        let mut driver = installed(&mut fx);
        {
            let mut dev = fx.devices();
            driver.uninstall(&mut dev);
        }
        assert!(!fx.ps2.enabled);
        assert!(!fx.ps2.callback);
        assert_eq!(fx.host.features, Some(MouseFeatures::empty()));
        assert_eq!(driver.device_state(), DeviceState::NoHardware);
    }

    #[test]
    fn test_uninstall_survives_ps2_errors() {
        let mut fx = Fixture::text();
        fx.with_host = true;
        let mut driver = installed(&mut fx);
        fx.ps2.absent = true;
        {
            let mut dev = fx.devices();
            driver.uninstall(&mut dev);
        }
        // the PS/2 side refused, the host side is still released
        assert!(fx.ps2.callback);
        assert_eq!(fx.host.features, Some(MouseFeatures::empty()));
        assert!(driver.capabilities().is_empty());
        assert_eq!(driver.device_state(), DeviceState::NoHardware);
    }
}

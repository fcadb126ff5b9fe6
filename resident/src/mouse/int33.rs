//! INT 33h Programming Interface
//!
//! Requests are decoded from the caller's registers once, executed against
//! the driver, and the reply written back. Register assignments follow the
//! Microsoft mouse driver, with the CuteMouse wheel extensions (function 11h
//! and the wheel counter in BH of function 03h).

use super::cursor::{GraphicsShape, TextMasks, CURSOR_SIZE};
use super::events::{defaults, ButtonCounter, Window, NUM_BUTTONS};
use super::ps2::DeviceState;
use super::status::STATUS_SIZE;
use super::{Capabilities, Devices, MouseDriver, DRIVER_VERSION};
use crate::hal::memory::FarPtr;
use crate::hal::regs::Registers;

/// Function numbers in AX
pub mod function {
    pub const RESET: u16 = 0x00;
    pub const SHOW: u16 = 0x01;
    pub const HIDE: u16 = 0x02;
    pub const GET_POSITION: u16 = 0x03;
    pub const SET_POSITION: u16 = 0x04;
    pub const PRESS_INFO: u16 = 0x05;
    pub const RELEASE_INFO: u16 = 0x06;
    pub const H_WINDOW: u16 = 0x07;
    pub const V_WINDOW: u16 = 0x08;
    pub const GRAPHICS_CURSOR: u16 = 0x09;
    pub const TEXT_CURSOR: u16 = 0x0A;
    pub const MOTION: u16 = 0x0B;
    pub const SET_HANDLER: u16 = 0x0C;
    pub const SET_MICKEYS: u16 = 0x0F;
    pub const CAPABILITIES: u16 = 0x11;
    pub const DOUBLE_SPEED: u16 = 0x13;
    pub const EXCHANGE_HANDLER: u16 = 0x14;
    pub const STATUS_SIZE: u16 = 0x15;
    pub const SAVE_STATUS: u16 = 0x16;
    pub const LOAD_STATUS: u16 = 0x17;
    pub const SET_SENSITIVITY: u16 = 0x1A;
    pub const GET_SENSITIVITY: u16 = 0x1B;
    pub const SET_PAGE: u16 = 0x1D;
    pub const GET_PAGE: u16 = 0x1E;
    pub const DISABLE: u16 = 0x1F;
    pub const ENABLE: u16 = 0x20;
    pub const SOFTWARE_RESET: u16 = 0x21;
    pub const GET_LANGUAGE: u16 = 0x23;
    pub const DRIVER_INFO: u16 = 0x24;
    pub const MAX_COORDINATES: u16 = 0x26;
    pub const CURSOR_HOT_SPOT: u16 = 0x2A;
    pub const GET_WINDOW: u16 = 0x31;
    pub const INTERNAL_STATE: u16 = 0x7F;
}

/// 'WM' returned by function 11h
pub const WHEEL_API_SIGNATURE: u16 = 0x574D;

/// Mouse type reported by 24h and 2Ah
const TYPE_PS2: u8 = 4;

/// BX value asking function 05h for the wheel
const WHEEL_BUTTON: u16 = 0xFFFF;

/// A decoded INT 33h call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Int33Request {
    Reset,
    Show,
    Hide,
    GetPosition,
    SetPosition { x: i16, y: i16 },
    PressInfo { button: u16 },
    ReleaseInfo { button: u16 },
    HorizontalWindow { min: i16, max: i16 },
    VerticalWindow { min: i16, max: i16 },
    GraphicsCursor { hot_x: i16, hot_y: i16, masks: FarPtr },
    TextCursor { hardware: bool, and: u16, xor: u16 },
    MotionCounters,
    SetHandler { mask: u16, handler: FarPtr },
    SetMickeys { x: i16, y: i16 },
    Capabilities,
    DoubleSpeed { threshold: u16 },
    ExchangeHandler { mask: u16, handler: FarPtr },
    StatusSize,
    SaveStatus { buffer: FarPtr },
    LoadStatus { buffer: FarPtr },
    SetSensitivity { horizontal: u16, vertical: u16, threshold: u16 },
    GetSensitivity,
    SetPage { page: u16 },
    GetPage,
    Disable,
    Enable,
    SoftwareReset,
    GetLanguage,
    DriverInfo,
    MaxCoordinates,
    CursorHotSpot,
    GetWindow,
    InternalState,
    Unknown(u16),
}

impl Int33Request {
    pub fn decode(regs: &Registers) -> Self {
        let es_dx = FarPtr::new(regs.es, regs.dx);
        match regs.ax {
            function::RESET => Self::Reset,
            function::SHOW => Self::Show,
            function::HIDE => Self::Hide,
            function::GET_POSITION => Self::GetPosition,
            function::SET_POSITION => Self::SetPosition { x: regs.cx as i16, y: regs.dx as i16 },
            function::PRESS_INFO => Self::PressInfo { button: regs.bx },
            function::RELEASE_INFO => Self::ReleaseInfo { button: regs.bx },
            function::H_WINDOW => Self::HorizontalWindow { min: regs.cx as i16, max: regs.dx as i16 },
            function::V_WINDOW => Self::VerticalWindow { min: regs.cx as i16, max: regs.dx as i16 },
            function::GRAPHICS_CURSOR => Self::GraphicsCursor {
                hot_x: regs.bx as i16,
                hot_y: regs.cx as i16,
                masks: es_dx,
            },
            function::TEXT_CURSOR => Self::TextCursor {
                hardware: regs.bx != 0,
                and: regs.cx,
                xor: regs.dx,
            },
            function::MOTION => Self::MotionCounters,
            function::SET_HANDLER => Self::SetHandler { mask: regs.cx, handler: es_dx },
            function::SET_MICKEYS => Self::SetMickeys { x: regs.cx as i16, y: regs.dx as i16 },
            function::CAPABILITIES => Self::Capabilities,
            function::DOUBLE_SPEED => Self::DoubleSpeed { threshold: regs.dx },
            function::EXCHANGE_HANDLER => Self::ExchangeHandler { mask: regs.cx, handler: es_dx },
            function::STATUS_SIZE => Self::StatusSize,
            function::SAVE_STATUS => Self::SaveStatus { buffer: es_dx },
            function::LOAD_STATUS => Self::LoadStatus { buffer: es_dx },
            function::SET_SENSITIVITY => Self::SetSensitivity {
                horizontal: regs.bx,
                vertical: regs.cx,
                threshold: regs.dx,
            },
            function::GET_SENSITIVITY => Self::GetSensitivity,
            function::SET_PAGE => Self::SetPage { page: regs.bx },
            function::GET_PAGE => Self::GetPage,
            function::DISABLE => Self::Disable,
            function::ENABLE => Self::Enable,
            function::SOFTWARE_RESET => Self::SoftwareReset,
            function::GET_LANGUAGE => Self::GetLanguage,
            function::DRIVER_INFO => Self::DriverInfo,
            function::MAX_COORDINATES => Self::MaxCoordinates,
            function::CURSOR_HOT_SPOT => Self::CursorHotSpot,
            function::GET_WINDOW => Self::GetWindow,
            function::INTERNAL_STATE => Self::InternalState,
            other => Self::Unknown(other),
        }
    }
}

/// Registers changed by a call; `None` leaves the caller's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Int33Reply {
    pub ax: Option<u16>,
    pub bx: Option<u16>,
    pub cx: Option<u16>,
    pub dx: Option<u16>,
    pub di: Option<u16>,
    pub es: Option<u16>,
}

/// Wheel movement as the signed byte in BH; saturates instead of wrapping
fn wheel_byte(wheel: i16) -> u8 {
    wheel.clamp(i8::MIN as i16, i8::MAX as i16) as i8 as u8
}

impl Int33Reply {
    pub fn apply(&self, regs: &mut Registers) {
        let fields = [
            (self.ax, &mut regs.ax),
            (self.bx, &mut regs.bx),
            (self.cx, &mut regs.cx),
            (self.dx, &mut regs.dx),
            (self.di, &mut regs.di),
            (self.es, &mut regs.es),
        ];
        for (value, reg) in fields {
            if let Some(v) = value {
                *reg = v;
            }
        }
    }

    fn counter(buttons: u8, counter: ButtonCounter) -> Self {
        Self {
            ax: Some(buttons as u16),
            bx: Some(counter.count),
            cx: Some(counter.x as u16),
            dx: Some(counter.y as u16),
            ..Default::default()
        }
    }
}

impl MouseDriver {
    /// INT 33h entry
    pub fn int33(&mut self, regs: &mut Registers, dev: &mut Devices<'_>) {
        let request = Int33Request::decode(regs);
        log::trace!("[VBMOUSE] int33 {:?}", request);
        let reply = self.execute(request, dev);
        reply.apply(regs);
    }

    pub fn execute(&mut self, request: Int33Request, dev: &mut Devices<'_>) -> Int33Reply {
        use Int33Request as R;

        match request {
            R::Reset | R::SoftwareReset => {
                self.reset(dev);
                let present = self.device_state() != DeviceState::NoHardware || request == R::SoftwareReset;
                Int33Reply {
                    ax: Some(if present { 0xFFFF } else { 0 }),
                    bx: Some(NUM_BUTTONS as u16),
                    ..Default::default()
                }
            }
            R::Show => {
                self.cursor.show();
                self.refresh(dev);
                Int33Reply::default()
            }
            R::Hide => {
                self.cursor.hide();
                self.refresh(dev);
                Int33Reply::default()
            }
            R::GetPosition => {
                let (x, y) = self.reported_position();
                let wheel = if self.caps.contains(Capabilities::WHEEL) { self.state.take_wheel() } else { 0 };
                Int33Reply {
                    bx: Some(self.state.buttons as u16 | (wheel_byte(wheel) as u16) << 8),
                    cx: Some(x as u16),
                    dx: Some(y as u16),
                    ..Default::default()
                }
            }
            R::SetPosition { x, y } => {
                self.state.set_position(x, y);
                self.refresh(dev);
                Int33Reply::default()
            }
            R::PressInfo { button: WHEEL_BUTTON } => {
                let counter = ButtonCounter {
                    count: self.state.take_wheel() as u16,
                    x: self.state.wheel_x,
                    y: self.state.wheel_y,
                };
                Int33Reply::counter(self.state.buttons, counter)
            }
            R::PressInfo { button } => {
                let counter = match self.state.pressed.get_mut(button as usize) {
                    Some(c) => c.take(),
                    None => ButtonCounter::default(),
                };
                Int33Reply::counter(self.state.buttons, counter)
            }
            R::ReleaseInfo { button } => {
                let counter = match self.state.released.get_mut(button as usize) {
                    Some(c) => c.take(),
                    None => ButtonCounter::default(),
                };
                Int33Reply::counter(self.state.buttons, counter)
            }
            R::HorizontalWindow { min, max } => {
                let window = Window { min_x: min.min(max), max_x: min.max(max), ..self.state.window };
                self.state.set_window(window);
                self.refresh(dev);
                Int33Reply::default()
            }
            R::VerticalWindow { min, max } => {
                let window = Window { min_y: min.min(max), max_y: min.max(max), ..self.state.window };
                self.state.set_window(window);
                self.refresh(dev);
                Int33Reply::default()
            }
            R::GraphicsCursor { hot_x, hot_y, masks } => {
                let Some(bytes) = dev.memory.checked(masks, CURSOR_SIZE * 4) else {
                    log::warn!("[VBMOUSE] cursor masks at {:04X}:{:04X} out of range", masks.segment, masks.offset);
                    return Int33Reply::default();
                };
                let mut shape = GraphicsShape { hot_x, hot_y, ..GraphicsShape::ARROW };
                for i in 0..CURSOR_SIZE {
                    shape.and_mask[i] = u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
                    let x = 2 * (CURSOR_SIZE + i);
                    shape.xor_mask[i] = u16::from_le_bytes([bytes[x], bytes[x + 1]]);
                }
                self.cursor.set_graphics_shape(shape, dev);
                self.refresh(dev);
                Int33Reply::default()
            }
            R::TextCursor { hardware, and, xor } => {
                // the hardware cursor is emulated with the default masks
                let masks = if hardware { TextMasks::DEFAULT } else { TextMasks { and, xor } };
                self.cursor.set_text_masks(masks, dev);
                self.refresh(dev);
                Int33Reply::default()
            }
            R::MotionCounters => {
                let (x, y) = self.state.take_motion();
                Int33Reply {
                    cx: Some(x as u16),
                    dx: Some(y as u16),
                    ..Default::default()
                }
            }
            R::SetHandler { mask, handler } => {
                self.set_handler(handler, mask);
                Int33Reply::default()
            }
            R::SetMickeys { x, y } => {
                if x > 0 {
                    self.state.mickeys_x = x;
                }
                if y > 0 {
                    self.state.mickeys_y = y;
                }
                Int33Reply::default()
            }
            R::Capabilities => Int33Reply {
                ax: Some(WHEEL_API_SIGNATURE),
                bx: Some(0),
                cx: Some(self.caps.contains(Capabilities::WHEEL) as u16),
                ..Default::default()
            },
            R::DoubleSpeed { threshold } => {
                self.state.double_speed_threshold = match threshold {
                    0 => defaults::DOUBLE_SPEED_THRESHOLD,
                    t => t,
                };
                Int33Reply::default()
            }
            R::ExchangeHandler { mask, handler } => {
                let (old_handler, old_mask) = (self.handler, self.mask);
                self.set_handler(handler, mask);
                Int33Reply {
                    cx: Some(old_mask),
                    dx: Some(old_handler.offset),
                    es: Some(old_handler.segment),
                    ..Default::default()
                }
            }
            R::StatusSize => Int33Reply {
                bx: Some(STATUS_SIZE as u16),
                ..Default::default()
            },
            R::SaveStatus { buffer } => {
                let mut block = [0u8; STATUS_SIZE];
                self.save_status(&mut block);
                match dev.memory.checked_mut(buffer, STATUS_SIZE) {
                    Some(out) => out.copy_from_slice(&block),
                    None => log::warn!("[VBMOUSE] status buffer {:04X}:{:04X} out of range", buffer.segment, buffer.offset),
                }
                Int33Reply::default()
            }
            R::LoadStatus { buffer } => {
                let mut block = [0u8; STATUS_SIZE];
                match dev.memory.checked(buffer, STATUS_SIZE) {
                    Some(saved) => block.copy_from_slice(saved),
                    None => {
                        log::warn!("[VBMOUSE] status buffer {:04X}:{:04X} out of range", buffer.segment, buffer.offset);
                        return Int33Reply::default();
                    }
                }
                self.load_status(&block, dev);
                Int33Reply::default()
            }
            R::SetSensitivity { horizontal, vertical, threshold } => {
                self.state.sensitivity = [horizontal, vertical, threshold];
                Int33Reply::default()
            }
            R::GetSensitivity => {
                let [h, v, t] = self.state.sensitivity;
                Int33Reply {
                    bx: Some(h),
                    cx: Some(v),
                    dx: Some(t),
                    ..Default::default()
                }
            }
            R::SetPage { page } => {
                self.page = page;
                Int33Reply::default()
            }
            R::GetPage => Int33Reply {
                bx: Some(self.page),
                ..Default::default()
            },
            R::Disable => {
                if self.enabled {
                    self.enabled = false;
                    self.cursor.hide();
                    self.refresh(dev);
                    log::debug!("[VBMOUSE] disabled");
                }
                // ES:BX is the INT 33h vector that was in place before ours
                Int33Reply {
                    ax: Some(function::DISABLE),
                    bx: Some(self.previous_vector.offset),
                    es: Some(self.previous_vector.segment),
                    ..Default::default()
                }
            }
            R::Enable => {
                if !self.enabled {
                    self.enabled = true;
                    self.cursor.show();
                    self.refresh(dev);
                    log::debug!("[VBMOUSE] enabled");
                }
                Int33Reply::default()
            }
            R::GetLanguage => Int33Reply {
                bx: Some(0),
                ..Default::default()
            },
            R::DriverInfo => Int33Reply {
                bx: Some(DRIVER_VERSION),
                cx: Some((TYPE_PS2 as u16) << 8),
                ..Default::default()
            },
            R::MaxCoordinates => {
                let (width, height) = self.extent();
                Int33Reply {
                    bx: Some(!self.enabled as u16),
                    cx: Some(width.saturating_sub(1)),
                    dx: Some(height.saturating_sub(1)),
                    ..Default::default()
                }
            }
            R::CursorHotSpot => {
                let shape = self.cursor.shape();
                Int33Reply {
                    ax: Some(self.cursor.counter() as u16),
                    bx: Some(shape.hot_x as u16),
                    cx: Some(shape.hot_y as u16),
                    dx: Some(TYPE_PS2 as u16),
                    ..Default::default()
                }
            }
            R::GetWindow => {
                let w = self.state.window;
                Int33Reply {
                    ax: Some(w.min_x as u16),
                    bx: Some(w.min_y as u16),
                    cx: Some(w.max_x as u16),
                    dx: Some(w.max_y as u16),
                    ..Default::default()
                }
            }
            R::InternalState => {
                let state = match self.device_state() {
                    DeviceState::NoHardware => 0,
                    DeviceState::RelativeOnly => 1,
                    DeviceState::AbsoluteCapable => 2,
                };
                Int33Reply {
                    ax: Some(state),
                    bx: Some(self.caps.bits() as u16),
                    di: Some(self.data_pointer.offset),
                    es: Some(self.data_pointer.segment),
                    ..Default::default()
                }
            }
            R::Unknown(ax) => {
                log::debug!("[VBMOUSE] unsupported function {:#06x}", ax);
                Int33Reply::default()
            }
        }
    }
}

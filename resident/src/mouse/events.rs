//! Pointer Event Fusion
//!
//! Turns one input sample, relative or absolute, into the new pointer
//! position, the button counters and the event mask reported to programs.
//!
//! Relative motion goes through the double-speed check and fixed-point
//! mickey scaling; absolute samples are rescaled from 0..=0xFFFF to the
//! screen. Both end clamped to the current window.

use crate::rtl::scale::{rescale, scale_with_carry};

bitflags::bitflags! {
    /// INT 33h event mask bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u16 {
        const MOVE = 0x0001;
        const LEFT_PRESSED = 0x0002;
        const LEFT_RELEASED = 0x0004;
        const RIGHT_PRESSED = 0x0008;
        const RIGHT_RELEASED = 0x0010;
        const MIDDLE_PRESSED = 0x0020;
        const MIDDLE_RELEASED = 0x0040;
        const WHEEL = 0x0080;
        const ABSOLUTE = 0x0100;
    }
}

impl EventFlags {
    pub fn pressed(button: usize) -> Self {
        Self::from_bits_truncate(1 << (1 + 2 * button))
    }

    pub fn released(button: usize) -> Self {
        Self::from_bits_truncate(1 << (2 + 2 * button))
    }
}

pub const NUM_BUTTONS: usize = 3;

/// Largest absolute coordinate delivered by either hypervisor
pub const ABSOLUTE_MAX: u16 = 0xFFFF;

/// BIOS ticks in one double-speed window (about one second)
pub const SPEED_WINDOW_TICKS: u32 = 18;

pub mod defaults {
    pub const MICKEYS_X: i16 = 8;
    pub const MICKEYS_Y: i16 = 16;
    pub const DOUBLE_SPEED_THRESHOLD: u16 = 64;
    pub const SENSITIVITY: u16 = 50;
}

/// Press or release count of one button and where the last one happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ButtonCounter {
    pub count: u16,
    pub x: i16,
    pub y: i16,
}

impl ButtonCounter {
    fn record(&mut self, x: i16, y: i16) {
        self.count = self.count.wrapping_add(1);
        self.x = x;
        self.y = y;
    }

    /// Read and clear the count
    pub fn take(&mut self) -> ButtonCounter {
        let current = *self;
        self.count = 0;
        current
    }
}

/// Motion of one input sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    /// Mickeys, Y growing downwards
    Relative { dx: i16, dy: i16 },
    /// Position in 0..=[`ABSOLUTE_MAX`] on each axis
    Absolute { x: u16, y: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Input {
    pub motion: Motion,
    pub buttons: u8,
    pub wheel: i8,
}

/// What a sample changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub events: EventFlags,
    /// Mickeys after double speed, or the pixel distance for absolute samples
    pub dx: i16,
    pub dy: i16,
    pub wheel: i8,
}

/// Inclusive clamping rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub min_x: i16,
    pub max_x: i16,
    pub min_y: i16,
    pub max_y: i16,
}

impl Window {
    pub fn full(width: u16, height: u16) -> Self {
        Self {
            min_x: 0,
            max_x: width.saturating_sub(1) as i16,
            min_y: 0,
            max_y: height.saturating_sub(1) as i16,
        }
    }

    pub fn clamp(&self, x: i16, y: i16) -> (i16, i16) {
        (x.clamp(self.min_x, self.max_x.max(self.min_x)), y.clamp(self.min_y, self.max_y.max(self.min_y)))
    }
}

/// Position, counters and motion settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerState {
    pub x: i16,
    pub y: i16,
    pub rem_x: i16,
    pub rem_y: i16,
    pub buttons: u8,
    pub pressed: [ButtonCounter; NUM_BUTTONS],
    pub released: [ButtonCounter; NUM_BUTTONS],
    /// Wheel movement since it was last read
    pub wheel: i16,
    pub wheel_x: i16,
    pub wheel_y: i16,
    /// Mickeys since the motion counters were last read
    pub motion_x: i16,
    pub motion_y: i16,
    /// Mickeys per 8 pixels
    pub mickeys_x: i16,
    pub mickeys_y: i16,
    /// Mickeys per second above which motion doubles
    pub double_speed_threshold: u16,
    pub sensitivity: [u16; 3],
    pub window: Window,
    speed_window_start: u32,
    speed_accum: u32,
}

impl PointerState {
    pub const fn new() -> Self {
        Self {
            x: 0,
            y: 0,
            rem_x: 0,
            rem_y: 0,
            buttons: 0,
            pressed: [ButtonCounter { count: 0, x: 0, y: 0 }; NUM_BUTTONS],
            released: [ButtonCounter { count: 0, x: 0, y: 0 }; NUM_BUTTONS],
            wheel: 0,
            wheel_x: 0,
            wheel_y: 0,
            motion_x: 0,
            motion_y: 0,
            mickeys_x: defaults::MICKEYS_X,
            mickeys_y: defaults::MICKEYS_Y,
            double_speed_threshold: defaults::DOUBLE_SPEED_THRESHOLD,
            sensitivity: [defaults::SENSITIVITY; 3],
            window: Window { min_x: 0, max_x: 639, min_y: 0, max_y: 199 },
            speed_window_start: 0,
            speed_accum: 0,
        }
    }

    /// Reset settings and counters for a screen of the given extent,
    /// centring the pointer
    pub fn reset(&mut self, width: u16, height: u16) {
        *self = Self::new();
        self.window = Window::full(width, height);
        self.x = (width / 2) as i16;
        self.y = (height / 2) as i16;
    }

    /// Move to `(x, y)`, clamped to the window
    pub fn set_position(&mut self, x: i16, y: i16) {
        let (x, y) = self.window.clamp(x, y);
        self.x = x;
        self.y = y;
        self.rem_x = 0;
        self.rem_y = 0;
    }

    pub fn set_window(&mut self, window: Window) {
        self.window = window;
        let (x, y) = (self.x, self.y);
        let (cx, cy) = self.window.clamp(x, y);
        self.x = cx;
        self.y = cy;
    }

    /// Double the deltas when the window's accumulated motion exceeded the
    /// threshold before this packet
    fn double_speed(&mut self, dx: i16, dy: i16, ticks: u32) -> (i16, i16) {
        if ticks.wrapping_sub(self.speed_window_start) >= SPEED_WINDOW_TICKS {
            self.speed_window_start = ticks;
            self.speed_accum = 0;
        }

        let threshold = self.double_speed_threshold as u32;
        let exceeded = self.speed_accum > threshold * threshold;
        let magnitude = (dx as i32 * dx as i32 + dy as i32 * dy as i32) as u32;
        self.speed_accum = self.speed_accum.saturating_add(magnitude);

        if exceeded {
            (dx.saturating_mul(2), dy.saturating_mul(2))
        } else {
            (dx, dy)
        }
    }

    /// Fold one sample into the state.
    ///
    /// `extent` is the screen size absolute samples are scaled to.
    pub fn apply(&mut self, input: Input, ticks: u32, extent: (u16, u16)) -> Outcome {
        let mut events = EventFlags::empty();
        let (old_x, old_y) = (self.x, self.y);

        let (dx, dy) = match input.motion {
            Motion::Relative { dx, dy } => {
                let (dx, dy) = self.double_speed(dx, dy, ticks);
                let (px, rem_x) = scale_with_carry(dx, self.mickeys_x, 8, self.rem_x);
                let (py, rem_y) = scale_with_carry(dy, self.mickeys_y, 8, self.rem_y);
                self.rem_x = rem_x;
                self.rem_y = rem_y;

                let (x, y) = self.window.clamp(self.x.saturating_add(px), self.y.saturating_add(py));
                self.x = x;
                self.y = y;
                if dx != 0 || dy != 0 {
                    events |= EventFlags::MOVE;
                }
                (dx, dy)
            }
            Motion::Absolute { x, y } => {
                let sx = rescale(x, ABSOLUTE_MAX, extent.0.saturating_sub(1)) as i16;
                let sy = rescale(y, ABSOLUTE_MAX, extent.1.saturating_sub(1)) as i16;
                let (x, y) = self.window.clamp(sx, sy);
                self.x = x;
                self.y = y;
                self.rem_x = 0;
                self.rem_y = 0;
                events |= EventFlags::ABSOLUTE;
                if (x, y) != (old_x, old_y) {
                    events |= EventFlags::MOVE;
                }
                (x.wrapping_sub(old_x), y.wrapping_sub(old_y))
            }
        };
        self.motion_x = self.motion_x.wrapping_add(dx);
        self.motion_y = self.motion_y.wrapping_add(dy);

        let changed = self.buttons ^ input.buttons;
        for button in 0..NUM_BUTTONS {
            let bit = 1 << button;
            if changed & bit == 0 {
                continue;
            }
            if input.buttons & bit != 0 {
                self.pressed[button].record(self.x, self.y);
                events |= EventFlags::pressed(button);
            } else {
                self.released[button].record(self.x, self.y);
                events |= EventFlags::released(button);
            }
        }
        self.buttons = input.buttons & 0x07;

        if input.wheel != 0 {
            self.wheel = self.wheel.saturating_add(input.wheel as i16);
            self.wheel_x = self.x;
            self.wheel_y = self.y;
            events |= EventFlags::WHEEL;
        }

        Outcome {
            events,
            dx,
            dy,
            wheel: input.wheel,
        }
    }

    /// Read and clear the wheel movement
    pub fn take_wheel(&mut self) -> i16 {
        core::mem::take(&mut self.wheel)
    }

    /// Read and clear the motion counters
    pub fn take_motion(&mut self) -> (i16, i16) {
        (core::mem::take(&mut self.motion_x), core::mem::take(&mut self.motion_y))
    }
}

impl Default for PointerState {
    fn default() -> Self {
        Self::new()
    }
}

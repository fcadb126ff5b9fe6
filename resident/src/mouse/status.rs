//! Driver State Block
//!
//! Functions 15h-17h let a program (typically a task switcher) save the
//! driver state and put it back later. The block is little-endian with a
//! fixed field order:
//!
//! | field | words |
//! |---|---|
//! | position x, y | 2 |
//! | remainders x, y | 2 |
//! | buttons | 1 |
//! | press counters (count, x, y) x 3 | 9 |
//! | release counters (count, x, y) x 3 | 9 |
//! | wheel, wheel x, wheel y | 3 |
//! | motion counters x, y | 2 |
//! | mickeys x, y | 2 |
//! | double-speed threshold | 1 |
//! | sensitivity x 3 | 3 |
//! | window min x, max x, min y, max y | 4 |
//! | handler offset, segment | 2 |
//! | event mask | 1 |
//! | visibility counter | 1 |
//! | hot spot x, y | 2 |
//! | AND mask, XOR mask | 32 |
//! | text AND, XOR | 2 |
//! | display page | 1 |
//! | enabled | 1 |

use super::cursor::{GraphicsShape, TextMasks, CURSOR_SIZE};
use super::events::{ButtonCounter, Window, NUM_BUTTONS};
use super::{Devices, MouseDriver};
use crate::hal::memory::FarPtr;

/// Bytes in the state block
pub const STATUS_SIZE: usize = 160;

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn word(&mut self, v: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&v.to_le_bytes());
        self.pos += 2;
    }

    fn int(&mut self, v: i16) {
        self.word(v as u16);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn word(&mut self) -> u16 {
        let v = u16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        v
    }

    fn int(&mut self) -> i16 {
        self.word() as i16
    }

    fn counter(&mut self) -> ButtonCounter {
        ButtonCounter {
            count: self.word(),
            x: self.int(),
            y: self.int(),
        }
    }
}

impl MouseDriver {
    /// Write the state block into `out` (at least [`STATUS_SIZE`] bytes)
    pub fn save_status(&self, out: &mut [u8]) {
        let s = &self.state;
        let shape = self.cursor.shape();
        let text = self.cursor.text_masks();
        let mut w = Writer { buf: out, pos: 0 };

        w.int(s.x);
        w.int(s.y);
        w.int(s.rem_x);
        w.int(s.rem_y);
        w.word(s.buttons as u16);
        for c in s.pressed.iter().chain(s.released.iter()) {
            w.word(c.count);
            w.int(c.x);
            w.int(c.y);
        }
        w.int(s.wheel);
        w.int(s.wheel_x);
        w.int(s.wheel_y);
        w.int(s.motion_x);
        w.int(s.motion_y);
        w.int(s.mickeys_x);
        w.int(s.mickeys_y);
        w.word(s.double_speed_threshold);
        for v in s.sensitivity {
            w.word(v);
        }
        w.int(s.window.min_x);
        w.int(s.window.max_x);
        w.int(s.window.min_y);
        w.int(s.window.max_y);
        w.word(self.handler.offset);
        w.word(self.handler.segment);
        w.word(self.mask);
        w.int(self.cursor.counter());
        w.int(shape.hot_x);
        w.int(shape.hot_y);
        for v in shape.and_mask.iter().chain(shape.xor_mask.iter()) {
            w.word(*v);
        }
        w.word(text.and);
        w.word(text.xor);
        w.word(self.page);
        w.word(self.enabled as u16);
        debug_assert_eq!(w.pos, STATUS_SIZE);
    }

    /// Take the state back from a block written by [`MouseDriver::save_status`].
    ///
    /// The cursor comes off the screen first and is redrawn from the loaded
    /// shape and counter.
    pub fn load_status(&mut self, block: &[u8], dev: &mut Devices<'_>) {
        self.cursor.set_counter(-1);
        self.refresh(dev);

        let mut r = Reader { buf: block, pos: 0 };
        let s = &mut self.state;
        s.x = r.int();
        s.y = r.int();
        s.rem_x = r.int();
        s.rem_y = r.int();
        s.buttons = r.word() as u8;
        for i in 0..NUM_BUTTONS {
            s.pressed[i] = r.counter();
        }
        for i in 0..NUM_BUTTONS {
            s.released[i] = r.counter();
        }
        s.wheel = r.int();
        s.wheel_x = r.int();
        s.wheel_y = r.int();
        s.motion_x = r.int();
        s.motion_y = r.int();
        s.mickeys_x = r.int();
        s.mickeys_y = r.int();
        s.double_speed_threshold = r.word();
        for v in s.sensitivity.iter_mut() {
            *v = r.word();
        }
        s.window = Window {
            min_x: r.int(),
            max_x: r.int(),
            min_y: r.int(),
            max_y: r.int(),
        };

        let offset = r.word();
        let segment = r.word();
        let mask = r.word();
        self.set_handler(FarPtr::new(segment, offset), mask);
        let counter = r.int();

        let mut shape = GraphicsShape {
            hot_x: r.int(),
            hot_y: r.int(),
            ..GraphicsShape::ARROW
        };
        for i in 0..CURSOR_SIZE {
            shape.and_mask[i] = r.word();
        }
        for i in 0..CURSOR_SIZE {
            shape.xor_mask[i] = r.word();
        }
        let text = TextMasks { and: r.word(), xor: r.word() };
        self.page = r.word();
        self.enabled = r.word() != 0;

        self.cursor.set_graphics_shape(shape, dev);
        self.cursor.set_text_masks(text, dev);
        self.cursor.set_counter(counter);
        self.refresh(dev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mouse::ps2::Packet;
    use crate::mouse::testing::{installed, Fixture};

    #[test]
    fn test_block_size() {
        let mut fx = Fixture::text();
        let driver = installed(&mut fx);
        let mut block = [0xAAu8; STATUS_SIZE + 2];
        driver.save_status(&mut block);
        assert_eq!(&block[STATUS_SIZE..], &[0xAA, 0xAA]);
    }

    #[test]
    fn test_save_and_load() {
        let mut fx = Fixture::graphics(0x13);
        let mut driver = installed(&mut fx);
        driver.set_handler(FarPtr::new(0x1111, 0x2222), 0x0006);
        driver.cursor.show();
        {
            let mut dev = fx.devices();
            driver.process(Packet { buttons: 1, dx: 10, dy: 4, wheel: 0 }, &mut dev);
        }
        let mut block = [0u8; STATUS_SIZE];
        driver.save_status(&mut block);
        let saved_state = driver.state().clone();

        // Another program changes everything
        {
            let mut dev = fx.devices();
            driver.reset(&mut dev);
            driver.process(Packet { buttons: 0, dx: -100, dy: 0, wheel: 0 }, &mut dev);
        }
        assert_ne!(driver.state().x, saved_state.x);

        {
            let mut dev = fx.devices();
            driver.load_status(&block, &mut dev);
        }
        assert_eq!(driver.state().x, saved_state.x);
        assert_eq!(driver.state().pressed, saved_state.pressed);
        assert_eq!(driver.state().window, saved_state.window);
        assert_eq!(driver.handler, FarPtr::new(0x1111, 0x2222));
        assert_eq!(driver.mask, 0x0006);
        assert!(driver.cursor().is_visible());

        // exactly one cursor image on screen
        let mut again = [0u8; STATUS_SIZE];
        driver.save_status(&mut again);
        assert_eq!(block, again);
        let lit = fx.video.vga.iter().filter(|&&b| b == 0x0F).count();
        assert!(lit > 0 && lit < 256);
    }
}

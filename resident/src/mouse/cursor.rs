//! Cursor Rendering
//!
//! The cursor is drawn by the driver itself (a masked character cell in
//! text modes, a 16x16 AND/XOR bitmap in graphics modes) or by the host
//! when mouse integration is active and the host offers to draw it.
//!
//! Everything overwritten by a local drawing is saved first, so erasing is
//! the exact inverse of drawing however the cursor was clipped.
//!
//! # States
//!
//! - **Hidden** - nothing drawn
//! - **ShownText** - one character cell masked
//! - **ShownGraphics** - pixels masked, originals in the save area
//! - **ShownByHost** - the host pointer is visible, nothing drawn locally
//!
//! When absolute input goes away while the host draws the pointer, the host
//! pointer is hidden and the cursor is drawn locally in the same refresh.
//! When it comes back, the local drawing is erased before the host pointer
//! is shown.

use super::video::{Layout, ModeKey, VideoAdapter, VideoMode};
use super::Devices;

/// Cursor bitmap edge in pixels
pub const CURSOR_SIZE: usize = 16;

/// Graphics cursor bitmap; bit 15 of each word is the leftmost pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsShape {
    pub and_mask: [u16; CURSOR_SIZE],
    pub xor_mask: [u16; CURSOR_SIZE],
    pub hot_x: i16,
    pub hot_y: i16,
}

impl GraphicsShape {
    /// The standard arrow
    pub const ARROW: Self = Self {
        and_mask: [
            0x3FFF, 0x1FFF, 0x0FFF, 0x07FF, 0x03FF, 0x01FF, 0x00FF, 0x007F, 0x003F, 0x001F, 0x01FF, 0x10FF, 0x30FF,
            0xF87F, 0xF87F, 0xFC3F,
        ],
        xor_mask: [
            0x0000, 0x4000, 0x6000, 0x7000, 0x7800, 0x7C00, 0x7E00, 0x7F00, 0x7F80, 0x7C00, 0x6C00, 0x4600, 0x0600,
            0x0300, 0x0300, 0x0000,
        ],
        hot_x: 0,
        hot_y: 0,
    };
}

/// Text cursor masks applied to the character/attribute word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextMasks {
    pub and: u16,
    pub xor: u16,
}

impl TextMasks {
    /// Inverted attribute, character kept
    pub const DEFAULT: Self = Self { and: 0x77FF, xor: 0x7700 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Hidden,
    ShownText,
    ShownGraphics,
    ShownByHost,
}

/// Colour XORed into 8bpp modes
const XOR_COLOUR_8BPP: u8 = 0x0F;

/// Largest saved span per row: five bytes in each of four planes,
/// or sixteen bytes at 8bpp
const SAVE_ROW_BYTES: usize = 20;

#[derive(Debug, Clone, Copy, Default)]
struct SavedRow {
    offset: usize,
    len: u8,
}

/// Framebuffer bytes under the graphics cursor
struct SaveArea {
    rows: [SavedRow; CURSOR_SIZE],
    data: [[u8; SAVE_ROW_BYTES]; CURSOR_SIZE],
    count: usize,
}

impl SaveArea {
    const fn new() -> Self {
        Self {
            rows: [SavedRow { offset: 0, len: 0 }; CURSOR_SIZE],
            data: [[0; SAVE_ROW_BYTES]; CURSOR_SIZE],
            count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drawn {
    Nothing,
    Text { offset: usize, saved: u16 },
    Graphics,
    Host,
}

/// Masks for one cursor row in a packed or planar scan line
struct RowMasks {
    first_byte: usize,
    len: usize,
    and: u64,
    xor: u64,
}

/// Widen each bit of a 16-pixel mask to `bpp` bits, leftmost pixel highest
fn expand(mask: u16, bpp: u32) -> u32 {
    if bpp == 1 {
        return mask as u32;
    }
    let fill = (1u32 << bpp) - 1;
    (0..16).fold(0, |acc, i| {
        if mask & (0x8000 >> i) != 0 {
            acc | fill << (32 - bpp * (i + 1))
        } else {
            acc
        }
    })
}

/// Build the 64-bit masks for a row whose leftmost cursor pixel is at `px`.
///
/// The masks are aligned to the starting bit inside the first byte; bits
/// outside the on-screen part of the cursor keep the framebuffer as is.
fn row_masks(and: u16, xor: u16, px: i32, pixel_width: i32, bpp: u32) -> Option<RowMasks> {
    let start = px.max(0);
    let end = (px + CURSOR_SIZE as i32).min(pixel_width);
    if start >= end {
        return None;
    }
    let skip = (start - px) as u32;
    let count = (end - start) as u32;

    let visible = 0xFFFFu16 << (16 - count);
    let and = (and << skip) | !visible;
    let xor = (xor << skip) & visible;

    let start_bit = start as u32 * bpp;
    let shift = start_bit % 8;
    let span = 16 * bpp;
    let pos = 64 - span - shift;
    let field = ((1u64 << span) - 1) << pos;

    Some(RowMasks {
        first_byte: (start_bit / 8) as usize,
        len: ((shift + count * bpp + 7) / 8) as usize,
        and: !field | (expand(and, bpp) as u64) << pos,
        xor: (expand(xor, bpp) as u64) << pos,
    })
}

impl RowMasks {
    fn apply(&self, line: &mut [u8]) {
        let bytes = &mut line[self.first_byte..self.first_byte + self.len];
        let mut v = 0u64;
        for (i, &b) in bytes.iter().enumerate() {
            v |= (b as u64) << (56 - 8 * i);
        }
        v = (v & self.and) ^ self.xor;
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (v >> (56 - 8 * i)) as u8;
        }
    }
}

/// Cursor visibility, shape and what is currently on screen
pub struct Cursor {
    counter: i16,
    shape: GraphicsShape,
    text: TextMasks,
    mode: Option<VideoMode>,
    mode_key: Option<ModeKey>,
    drawn: Drawn,
    drawn_at: (i16, i16),
    save: SaveArea,
    host_shape_sent: bool,
}

impl Cursor {
    pub const fn new() -> Self {
        Self {
            counter: -1,
            shape: GraphicsShape::ARROW,
            text: TextMasks::DEFAULT,
            mode: None,
            mode_key: None,
            drawn: Drawn::Nothing,
            drawn_at: (0, 0),
            save: SaveArea::new(),
            host_shape_sent: false,
        }
    }

    pub fn state(&self) -> CursorState {
        match self.drawn {
            Drawn::Nothing => CursorState::Hidden,
            Drawn::Text { .. } => CursorState::ShownText,
            Drawn::Graphics => CursorState::ShownGraphics,
            Drawn::Host => CursorState::ShownByHost,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.counter >= 0
    }

    pub fn counter(&self) -> i16 {
        self.counter
    }

    pub fn set_counter(&mut self, counter: i16) {
        self.counter = counter;
    }

    pub fn show(&mut self) {
        self.counter = self.counter.saturating_add(1);
    }

    pub fn hide(&mut self) {
        self.counter = self.counter.saturating_sub(1);
    }

    pub fn shape(&self) -> &GraphicsShape {
        &self.shape
    }

    pub fn text_masks(&self) -> TextMasks {
        self.text
    }

    /// Mode found by the latest refresh
    pub fn mode(&self) -> Option<&VideoMode> {
        self.mode.as_ref()
    }

    /// Take the current BIOS mode without drawing, returning it when it
    /// differs from the one seen last
    pub fn poll_mode(&mut self, dev: &mut Devices<'_>) -> Option<VideoMode> {
        let key = ModeKey::read(dev.bios);
        if self.mode_key == Some(key) {
            return None;
        }
        // A mode set wipes the screen, so nothing local is left to erase
        if self.drawn != Drawn::Host {
            self.drawn = Drawn::Nothing;
        }
        self.mode_key = Some(key);
        self.mode = VideoMode::lookup(key.number, dev.bios);
        log::debug!("[VBMOUSE] video mode {:#04x}", key.number);
        self.mode
    }

    /// Replace the graphics shape, taking the old one off screen
    pub fn set_graphics_shape(&mut self, shape: GraphicsShape, dev: &mut Devices<'_>) {
        self.take_down_local(dev);
        self.shape = shape;
        self.host_shape_sent = false;
        if self.drawn == Drawn::Host {
            self.upload_shape(dev);
        }
    }

    pub fn set_text_masks(&mut self, masks: TextMasks, dev: &mut Devices<'_>) {
        self.take_down_local(dev);
        self.text = masks;
    }

    /// Bring the screen in line with the visibility counter, the position
    /// and who draws the pointer. Returns the new mode after a mode change.
    pub fn refresh(&mut self, x: i16, y: i16, host_renders: bool, dev: &mut Devices<'_>) -> Option<VideoMode> {
        let changed = self.poll_mode(dev);

        let target = self.target_state(host_renders && dev.host.is_some());
        let current = self.state();
        let moved = self.drawn_at != (x, y);
        let local = matches!(target, CursorState::ShownText | CursorState::ShownGraphics);
        if current == target && !(local && moved) {
            return changed;
        }

        match self.drawn {
            Drawn::Host if target != CursorState::ShownByHost => {
                if let Some(host) = dev.host.as_deref_mut() {
                    if let Err(e) = host.set_visible(false) {
                        log::warn!("[VBMOUSE] hiding the host cursor failed: {}", e);
                    }
                }
                self.drawn = Drawn::Nothing;
            }
            Drawn::Text { .. } | Drawn::Graphics => self.erase(dev),
            _ => {}
        }

        match target {
            CursorState::Hidden => {}
            CursorState::ShownText => self.draw_text(x, y, dev),
            CursorState::ShownGraphics => self.draw_graphics(x, y, dev),
            CursorState::ShownByHost => {
                if current != CursorState::ShownByHost {
                    if self.host_shape_sent {
                        if let Some(host) = dev.host.as_deref_mut() {
                            if let Err(e) = host.set_visible(true) {
                                log::warn!("[VBMOUSE] showing the host cursor failed: {}", e);
                            }
                        }
                    } else {
                        self.upload_shape(dev);
                    }
                }
                self.drawn = Drawn::Host;
            }
        }
        self.drawn_at = (x, y);
        changed
    }

    fn target_state(&self, host_renders: bool) -> CursorState {
        if !self.is_visible() {
            return CursorState::Hidden;
        }
        if host_renders {
            return CursorState::ShownByHost;
        }
        match self.mode {
            Some(mode) if mode.is_text() => CursorState::ShownText,
            Some(_) => CursorState::ShownGraphics,
            None => CursorState::Hidden,
        }
    }

    fn take_down_local(&mut self, dev: &mut Devices<'_>) {
        if matches!(self.drawn, Drawn::Text { .. } | Drawn::Graphics) {
            self.erase(dev);
        }
    }

    fn upload_shape(&mut self, dev: &mut Devices<'_>) {
        if let Some(host) = dev.host.as_deref_mut() {
            match host.set_shape(&self.shape) {
                Ok(()) => self.host_shape_sent = true,
                Err(e) => log::debug!("[VBMOUSE] pointer shape upload failed: {:?}", e),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Text modes
    // ------------------------------------------------------------------------

    fn draw_text(&mut self, x: i16, y: i16, dev: &mut Devices<'_>) {
        let Some(mode) = self.mode else { return };
        let Layout::Text { cell_width } = mode.layout else { return };

        let columns = (mode.bytes_per_line / 2) as usize;
        let rows = (mode.height / 8) as usize;
        let col = ((x.max(0) as usize) / cell_width as usize).min(columns - 1);
        let row = ((y.max(0) as usize) / 8).min(rows - 1);
        let offset = dev.bios.page_offset() as usize + (row * columns + col) * 2;

        let window = dev.video.window(mode.segment);
        let saved = u16::from_le_bytes([window[offset], window[offset + 1]]);
        let cell = (saved & self.text.and) ^ self.text.xor;
        window[offset..offset + 2].copy_from_slice(&cell.to_le_bytes());

        self.drawn = Drawn::Text { offset, saved };
    }

    // ------------------------------------------------------------------------
    // Graphics modes
    // ------------------------------------------------------------------------

    fn draw_graphics(&mut self, x: i16, y: i16, dev: &mut Devices<'_>) {
        let Some(mode) = self.mode else { return };

        let px = (x as i32 >> mode.x_shift) - self.shape.hot_x as i32;
        let py = y as i32 - self.shape.hot_y as i32;
        let pixel_width = mode.pixel_width() as i32;
        let planar = matches!(mode.layout, Layout::Planar { .. });

        if planar {
            dev.video.save_state();
        }
        self.save.count = 0;

        for r in 0..CURSOR_SIZE {
            let line = py + r as i32;
            if line < 0 || line >= mode.height as i32 {
                continue;
            }
            let base = mode.line_offset(line as u16);
            let and = self.shape.and_mask[r];
            let xor = self.shape.xor_mask[r];
            let slot = self.save.count;

            match mode.layout {
                Layout::Packed { bpp, .. } => {
                    let Some(masks) = row_masks(and, xor, px, pixel_width, bpp as u32) else { continue };
                    let window = dev.video.window(mode.segment);
                    let line = &mut window[base..base + mode.bytes_per_line as usize];
                    self.save.data[slot][..masks.len]
                        .copy_from_slice(&line[masks.first_byte..masks.first_byte + masks.len]);
                    masks.apply(line);
                    self.save.rows[slot] = SavedRow { offset: base + masks.first_byte, len: masks.len as u8 };
                }
                Layout::Planar { planes } => {
                    let Some(masks) = row_masks(and, xor, px, pixel_width, 1) else { continue };
                    let mut n = 0;
                    for plane in (0..4).filter(|p| planes & (1 << p) != 0) {
                        dev.video.select_plane(plane);
                        let window = dev.video.window(mode.segment);
                        let line = &mut window[base..base + mode.bytes_per_line as usize];
                        self.save.data[slot][n..n + masks.len]
                            .copy_from_slice(&line[masks.first_byte..masks.first_byte + masks.len]);
                        masks.apply(line);
                        n += masks.len;
                    }
                    self.save.rows[slot] = SavedRow { offset: base + masks.first_byte, len: masks.len as u8 };
                }
                Layout::Linear8 => {
                    let start = px.max(0);
                    let end = (px + CURSOR_SIZE as i32).min(pixel_width);
                    if start >= end {
                        continue;
                    }
                    let window = dev.video.window(mode.segment);
                    let pixels = &mut window[base + start as usize..base + end as usize];
                    self.save.data[slot][..pixels.len()].copy_from_slice(pixels);
                    for (i, pixel) in pixels.iter_mut().enumerate() {
                        let bit = 0x8000u16 >> (start - px + i as i32);
                        if and & bit == 0 {
                            *pixel = 0;
                        }
                        if xor & bit != 0 {
                            *pixel ^= XOR_COLOUR_8BPP;
                        }
                    }
                    self.save.rows[slot] = SavedRow { offset: base + start as usize, len: (end - start) as u8 };
                }
                Layout::Text { .. } => continue,
            }
            self.save.count += 1;
        }

        if planar {
            dev.video.restore_state();
        }
        self.drawn = Drawn::Graphics;
    }

    /// Put back what the last local drawing replaced
    fn erase(&mut self, dev: &mut Devices<'_>) {
        match self.drawn {
            Drawn::Text { offset, saved } => {
                if let Some(mode) = self.mode {
                    let window = dev.video.window(mode.segment);
                    window[offset..offset + 2].copy_from_slice(&saved.to_le_bytes());
                }
            }
            Drawn::Graphics => {
                if let Some(mode) = self.mode {
                    self.restore_graphics(&mode, dev.video);
                }
            }
            Drawn::Nothing | Drawn::Host => return,
        }
        self.drawn = Drawn::Nothing;
    }

    fn restore_graphics(&mut self, mode: &VideoMode, video: &mut dyn VideoAdapter) {
        let rows = &self.save.rows[..self.save.count];
        match mode.layout {
            Layout::Planar { planes } => {
                video.save_state();
                let mut n = 0;
                for plane in (0..4).filter(|p| planes & (1 << p) != 0) {
                    video.select_plane(plane);
                    let window = video.window(mode.segment);
                    for (row, data) in rows.iter().zip(self.save.data.iter()) {
                        let len = row.len as usize;
                        window[row.offset..row.offset + len].copy_from_slice(&data[n * len..(n + 1) * len]);
                    }
                    n += 1;
                }
                video.restore_state();
            }
            _ => {
                let window = video.window(mode.segment);
                for (row, data) in rows.iter().zip(self.save.data.iter()) {
                    let len = row.len as usize;
                    window[row.offset..row.offset + len].copy_from_slice(&data[..len]);
                }
            }
        }
        self.save.count = 0;
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

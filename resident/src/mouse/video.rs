//! Video Modes
//!
//! The mouse driver works in a virtual coordinate space that depends only on
//! the BIOS video mode: 640 wide in every supported mode (320-pixel modes
//! report doubled X coordinates), and in text modes 8 units per character
//! row. This module maps BIOS modes to their framebuffer layout and wraps the
//! VGA registers the cursor renderer must touch in planar modes.

use crate::hal::bios::BiosData;
use crate::hal::memory::{DosMemory, FarPtr};
use crate::hal::port::PortIo;

/// Display memory segments
pub mod segment {
    pub const VGA: u16 = 0xA000;
    pub const MONO_TEXT: u16 = 0xB000;
    pub const COLOR: u16 = 0xB800;
}

/// CGA odd scan lines live this far into the segment
pub const CGA_ODD_BANK: usize = 0x2000;

/// Virtual width reported in every mode
pub const VIRTUAL_WIDTH: u16 = 640;

/// Framebuffer organisation of a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Character/attribute cells; `cell_width` virtual pixels per column
    Text { cell_width: u8 },
    /// Packed pixels, most significant bits leftmost
    Packed { bpp: u8, interleaved: bool },
    /// One bit per pixel in each plane of `planes`
    Planar { planes: u8 },
    /// One byte per pixel
    Linear8,
}

/// A supported video mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMode {
    pub number: u8,
    pub layout: Layout,
    /// Virtual extent
    pub width: u16,
    pub height: u16,
    pub segment: u16,
    pub bytes_per_line: u16,
    /// Virtual X to framebuffer pixel shift
    pub x_shift: u8,
}

impl VideoMode {
    const fn graphics(number: u8, layout: Layout, height: u16, segment: u16, bytes_per_line: u16, x_shift: u8) -> Self {
        Self {
            number,
            layout,
            width: VIRTUAL_WIDTH,
            height,
            segment,
            bytes_per_line,
            x_shift,
        }
    }

    /// Describe BIOS mode `number`, or `None` for modes the driver cannot draw in
    pub fn lookup(number: u8, bios: &dyn BiosData) -> Option<Self> {
        let mode = match number {
            0..=3 | 7 => {
                let default_columns = if number <= 1 { 40 } else { 80 };
                let columns = match bios.text_columns() {
                    0 => default_columns,
                    c => c,
                };
                let rows = match bios.text_rows() {
                    0 => 25,
                    r => r as u16,
                };
                let cell_width: u8 = if columns <= 40 { 16 } else { 8 };
                Self {
                    number,
                    layout: Layout::Text { cell_width },
                    width: columns * cell_width as u16,
                    height: rows * 8,
                    segment: if number == 7 { segment::MONO_TEXT } else { segment::COLOR },
                    bytes_per_line: columns * 2,
                    x_shift: 0,
                }
            }
            4 | 5 => Self::graphics(number, Layout::Packed { bpp: 2, interleaved: true }, 200, segment::COLOR, 80, 1),
            6 => Self::graphics(number, Layout::Packed { bpp: 1, interleaved: true }, 200, segment::COLOR, 80, 0),
            0x0D => Self::graphics(number, Layout::Planar { planes: 0x0F }, 200, segment::VGA, 40, 1),
            0x0E => Self::graphics(number, Layout::Planar { planes: 0x0F }, 200, segment::VGA, 80, 0),
            0x0F => Self::graphics(number, Layout::Planar { planes: 0x05 }, 350, segment::VGA, 80, 0),
            0x10 => Self::graphics(number, Layout::Planar { planes: 0x0F }, 350, segment::VGA, 80, 0),
            0x11 => Self::graphics(number, Layout::Packed { bpp: 1, interleaved: false }, 480, segment::VGA, 80, 0),
            0x12 => Self::graphics(number, Layout::Planar { planes: 0x0F }, 480, segment::VGA, 80, 0),
            0x13 => Self::graphics(number, Layout::Linear8, 200, segment::VGA, 320, 1),
            _ => return None,
        };
        Some(mode)
    }

    pub fn is_text(&self) -> bool {
        matches!(self.layout, Layout::Text { .. })
    }

    /// Snap granularity for reported coordinates
    pub fn grid(&self) -> (i16, i16) {
        match self.layout {
            Layout::Text { cell_width } => (cell_width as i16, 8),
            _ => (1 << self.x_shift, 1),
        }
    }

    /// Width in framebuffer pixels
    pub fn pixel_width(&self) -> u16 {
        self.width >> self.x_shift
    }

    /// Byte offset of scan line `y`
    pub fn line_offset(&self, y: u16) -> usize {
        match self.layout {
            Layout::Packed { interleaved: true, .. } => {
                (y as usize & 1) * CGA_ODD_BANK + (y as usize >> 1) * self.bytes_per_line as usize
            }
            _ => y as usize * self.bytes_per_line as usize,
        }
    }
}

/// What identifies a video mode for change detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeKey {
    pub number: u8,
    pub rows: u8,
    pub char_height: u16,
}

impl ModeKey {
    pub fn read(bios: &dyn BiosData) -> Self {
        Self {
            number: bios.video_mode(),
            rows: bios.text_rows(),
            char_height: bios.char_height(),
        }
    }
}

// ============================================================================
// Adapter access
// ============================================================================

/// Display memory and the plane registers of the video adapter
pub trait VideoAdapter {
    /// Display memory starting at `segment`:0
    fn window(&mut self, segment: u16) -> &mut [u8];
    /// Route reads and writes to a single bit plane
    fn select_plane(&mut self, plane: u8);
    /// Remember the registers [`VideoAdapter::select_plane`] modifies
    fn save_state(&mut self);
    /// Put back what [`VideoAdapter::save_state`] remembered
    fn restore_state(&mut self);
}

/// VGA register ports
pub mod vga_port {
    pub const SEQ_INDEX: u16 = 0x3C4;
    pub const SEQ_DATA: u16 = 0x3C5;
    pub const GC_INDEX: u16 = 0x3CE;
    pub const GC_DATA: u16 = 0x3CF;
}

/// Graphics controller registers
pub mod gc_reg {
    pub const SET_RESET: u8 = 0;
    pub const ENABLE_SET_RESET: u8 = 1;
    pub const DATA_ROTATE: u8 = 3;
    pub const READ_MAP: u8 = 4;
    pub const MODE: u8 = 5;
    pub const BIT_MASK: u8 = 8;
}

/// Sequencer map mask register
pub const SEQ_MAP_MASK: u8 = 2;

const SAVED_GC_REGS: [u8; 6] = [
    gc_reg::SET_RESET,
    gc_reg::ENABLE_SET_RESET,
    gc_reg::DATA_ROTATE,
    gc_reg::READ_MAP,
    gc_reg::MODE,
    gc_reg::BIT_MASK,
];

const WINDOW_SIZE: usize = 0x1_0000;

/// [`VideoAdapter`] on real VGA hardware
pub struct VgaAdapter<'a, P: PortIo, M: DosMemory + ?Sized> {
    ports: P,
    memory: &'a mut M,
    map_mask: u8,
    gc: [u8; SAVED_GC_REGS.len()],
}

impl<'a, P: PortIo, M: DosMemory + ?Sized> VgaAdapter<'a, P, M> {
    pub fn new(ports: P, memory: &'a mut M) -> Self {
        Self {
            ports,
            memory,
            map_mask: 0x0F,
            gc: [0; SAVED_GC_REGS.len()],
        }
    }

    fn write_gc(&mut self, index: u8, value: u8) {
        self.ports.outb(vga_port::GC_INDEX, index);
        self.ports.outb(vga_port::GC_DATA, value);
    }

    fn read_gc(&mut self, index: u8) -> u8 {
        self.ports.outb(vga_port::GC_INDEX, index);
        self.ports.inb(vga_port::GC_DATA)
    }

    pub fn ports(&mut self) -> &mut P {
        &mut self.ports
    }
}

impl<P: PortIo, M: DosMemory + ?Sized> VideoAdapter for VgaAdapter<'_, P, M> {
    fn window(&mut self, segment: u16) -> &mut [u8] {
        self.memory.bytes_mut(FarPtr::new(segment, 0), WINDOW_SIZE)
    }

    fn select_plane(&mut self, plane: u8) {
        self.ports.outb(vga_port::SEQ_INDEX, SEQ_MAP_MASK);
        self.ports.outb(vga_port::SEQ_DATA, 1 << (plane & 3));
        self.write_gc(gc_reg::READ_MAP, plane & 3);
    }

    fn save_state(&mut self) {
        self.ports.outb(vga_port::SEQ_INDEX, SEQ_MAP_MASK);
        self.map_mask = self.ports.inb(vga_port::SEQ_DATA);
        for (i, &index) in SAVED_GC_REGS.iter().enumerate() {
            self.gc[i] = self.read_gc(index);
        }

        // Plain write mode 0 with every bit of the latch replaced
        self.write_gc(gc_reg::ENABLE_SET_RESET, 0);
        self.write_gc(gc_reg::DATA_ROTATE, 0);
        self.write_gc(gc_reg::MODE, 0);
        self.write_gc(gc_reg::BIT_MASK, 0xFF);
    }

    fn restore_state(&mut self) {
        self.ports.outb(vga_port::SEQ_INDEX, SEQ_MAP_MASK);
        self.ports.outb(vga_port::SEQ_DATA, self.map_mask);
        for (i, &index) in SAVED_GC_REGS.iter().enumerate() {
            let value = self.gc[i];
            self.write_gc(index, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub struct FixedBios {
        pub mode: u8,
        pub columns: u16,
        pub rows: u8,
    }

    impl BiosData for FixedBios {
        fn ticks(&self) -> u32 {
            0
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
            0
        }
    }

    /// Emulates the indexed registers and records every write
    #[derive(Default)]
    struct RegisterFile {
        seq: [u8; 8],
        gc: [u8; 16],
        seq_index: u8,
        gc_index: u8,
        writes: usize,
    }

    impl PortIo for RegisterFile {
        fn inb(&mut self, port: u16) -> u8 {
            match port {
                vga_port::SEQ_DATA => self.seq[self.seq_index as usize & 7],
                vga_port::GC_DATA => self.gc[self.gc_index as usize & 15],
                _ => 0xFF,
            }
        }
        fn outb(&mut self, port: u16, value: u8) {
            self.writes += 1;
            match port {
                vga_port::SEQ_INDEX => self.seq_index = value,
                vga_port::SEQ_DATA => self.seq[self.seq_index as usize & 7] = value,
                vga_port::GC_INDEX => self.gc_index = value,
                vga_port::GC_DATA => self.gc[self.gc_index as usize & 15] = value,
                _ => {}
            }
        }
        fn inw(&mut self, _port: u16) -> u16 {
            0xFFFF
        }
        fn outw(&mut self, _port: u16, _value: u16) {}
        fn inl(&mut self, _port: u16) -> u32 {
            0xFFFF_FFFF
        }
        fn outl(&mut self, _port: u16, _value: u32) {}
    }

    #[test]
    fn test_text_modes() {
        let bios = FixedBios { mode: 3, columns: 80, rows: 50 };
        let mode = VideoMode::lookup(3, &bios).unwrap();
        assert_eq!(mode.width, 640);
        assert_eq!(mode.height, 400);
        assert_eq!(mode.grid(), (8, 8));

        let bios = FixedBios { mode: 1, columns: 40, rows: 0 };
        let mode = VideoMode::lookup(1, &bios).unwrap();
        assert_eq!(mode.width, 640);
        assert_eq!(mode.height, 200);
        assert_eq!(mode.grid(), (16, 8));

        let mode = VideoMode::lookup(7, &bios).unwrap();
        assert_eq!(mode.segment, segment::MONO_TEXT);
    }

    #[test]
    fn test_graphics_modes() {
        let bios = FixedBios { mode: 0x13, columns: 40, rows: 25 };
        let mode = VideoMode::lookup(0x13, &bios).unwrap();
        assert_eq!(mode.pixel_width(), 320);
        assert_eq!(mode.grid(), (2, 1));

        let mode = VideoMode::lookup(0x12, &bios).unwrap();
        assert_eq!(mode.grid(), (1, 1));
        assert_eq!(mode.line_offset(479), 479 * 80);

        assert!(VideoMode::lookup(0x6A, &bios).is_none());
    }

    #[test]
    fn test_cga_interleave() {
        let bios = FixedBios { mode: 6, columns: 80, rows: 25 };
        let mode = VideoMode::lookup(6, &bios).unwrap();
        assert_eq!(mode.line_offset(0), 0);
        assert_eq!(mode.line_offset(1), CGA_ODD_BANK);
        assert_eq!(mode.line_offset(2), 80);
        assert_eq!(mode.line_offset(3), CGA_ODD_BANK + 80);
    }

    #[test]
    fn test_vga_state_round_trip() {
        let mut memory = vec![0u8; 0x10_0000];
        let mut regs = RegisterFile::default();
        regs.seq[SEQ_MAP_MASK as usize] = 0x0F;
        regs.gc[gc_reg::MODE as usize] = 0x02;
        regs.gc[gc_reg::BIT_MASK as usize] = 0x81;

        let mut vga = VgaAdapter::new(regs, &mut memory[..]);
        vga.save_state();
        assert_eq!(vga.ports().gc[gc_reg::MODE as usize], 0);
        vga.select_plane(2);
        assert_eq!(vga.ports().seq[SEQ_MAP_MASK as usize], 0x04);
        assert_eq!(vga.ports().gc[gc_reg::READ_MAP as usize], 2);

        vga.restore_state();
        assert_eq!(vga.ports().seq[SEQ_MAP_MASK as usize], 0x0F);
        assert_eq!(vga.ports().gc[gc_reg::MODE as usize], 0x02);
        assert_eq!(vga.ports().gc[gc_reg::BIT_MASK as usize], 0x81);
        assert!(vga.ports().writes > 0);

        vga.window(segment::VGA)[0] = 0x5A;
        assert_eq!(memory[0xA0000], 0x5A);
    }
}

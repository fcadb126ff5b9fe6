//! Serial Debug Log
//!
//! `log` backend writing to COM1 (0x3F8). Emulators usually route the port
//! to a file or console, which is the only place a resident driver can
//! report what it is doing without disturbing the DOS screen.

use core::fmt::{self, Write};
use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::hal::port::{HardwarePorts, PortIo};

/// COM1 port address
const COM1: u16 = 0x3F8;

/// Line status register offset
const LINE_STATUS: u16 = 5;

/// Transmit holding register empty
const LSR_THR_EMPTY: u8 = 0x20;

/// Give up on a stuck UART after this many status polls
const TX_SPIN_LIMIT: u32 = 10_000;

/// Serial port writer
pub struct SerialWriter<P: PortIo> {
    ports: P,
    base: u16,
}

impl<P: PortIo> SerialWriter<P> {
    pub const fn new(ports: P, base: u16) -> Self {
        Self { ports, base }
    }

    fn write_byte(&mut self, byte: u8) {
        let mut spins = 0;
        while self.ports.inb(self.base + LINE_STATUS) & LSR_THR_EMPTY == 0 {
            spins += 1;
            if spins == TX_SPIN_LIMIT {
                return;
            }
        }
        self.ports.outb(self.base, byte);
    }
}

impl<P: PortIo> Write for SerialWriter<P> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// The `log` backend
pub struct SerialLogger {
    writer: Mutex<SerialWriter<HardwarePorts>>,
}

static LOGGER: SerialLogger = SerialLogger {
    writer: Mutex::new(SerialWriter::new(HardwarePorts, COM1)),
};

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) || cfg!(test) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        // A logging call from an interrupt that hit mid-line would deadlock
        if let Some(mut writer) = self.writer.try_lock() {
            let _ = writeln!(writer, "[{}] {}", tag, record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the serial logger. Only the first call has an effect.
pub fn init(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

//! COM1 serial console and the `log` backend that writes to it

use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// Base I/O port of the first serial controller
pub const COM1: u16 = 0x3F8;

pub struct SerialPort {
    base: u16,
}

#[cfg(target_arch = "x86_64")]
impl SerialPort {
    pub const fn new(base: u16) -> Self {
        Self { base }
    }

    pub fn init(&self) {
        self.out(1, 0x00); // Disable interrupts
        self.out(3, 0x80); // Enable DLAB
        self.out(0, 0x03); // Divisor low (38400 baud)
        self.out(1, 0x00); // Divisor high
        self.out(3, 0x03); // 8 bits, no parity, one stop bit
        self.out(2, 0xC7); // Enable FIFO
        self.out(4, 0x0B); // RTS/DSR set
    }

    fn out(&self, offset: u16, value: u8) {
        use x86_64::instructions::port::Port;
        unsafe { Port::<u8>::new(self.base + offset).write(value) }
    }

    fn transmit_empty(&self) -> bool {
        use x86_64::instructions::port::Port;
        unsafe { Port::<u8>::new(self.base + 5).read() & 0x20 != 0 }
    }

    pub fn write_byte(&self, byte: u8) {
        while !self.transmit_empty() {
            core::hint::spin_loop();
        }
        self.out(0, byte);
    }
}

#[cfg(target_arch = "x86_64")]
impl Write for SerialPort {
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

/// `log` records to COM1, one line per record
pub struct SerialLogger {
    port: Mutex<SerialPort>,
}

impl SerialLogger {
    pub const fn new(base: u16) -> Self {
        Self {
            port: Mutex::new(SerialPort { base }),
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Records also come from interrupt handlers; keep them off the lock
        x86_64::instructions::interrupts::without_interrupts(|| {
            let mut port = self.port.lock();
            let _ = writeln!(port, "[{:<5}] {}: {}", record.level(), record.target(), record.args());
        });
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger::new(COM1);

/// Bring up COM1 and install it as the `log` backend.
#[cfg(target_arch = "x86_64")]
pub fn init_logger(level: LevelFilter) {
    LOGGER.port.lock().init();
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

/// Parse a `log=` command-line value; unknown names fall back to `Info`.
pub fn parse_level(value: &str) -> LevelFilter {
    match value {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

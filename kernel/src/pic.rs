//! Legacy 8259 interrupt controller pair
//!
//! IRQ 0-7 sit on the master, 8-15 on the slave, which cascades through
//! master line 2. Vectors are remapped to start at 32.

use netif::InterruptController;
use spin::Mutex;

/// First vector of the master controller after remapping
pub const MASTER_OFFSET: u8 = 32;
/// First vector of the slave controller after remapping
pub const SLAVE_OFFSET: u8 = 40;

const MASTER_COMMAND: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_COMMAND: u16 = 0xA0;
const SLAVE_DATA: u16 = 0xA1;

const ICW1_INIT: u8 = 0x11;
const ICW4_8086: u8 = 0x01;
const EOI: u8 = 0x20;
const CASCADE_LINE: u8 = 2;

/// Interrupt masks for both controllers; a set bit masks the line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Masks {
    pub master: u8,
    pub slave: u8,
}

impl Masks {
    /// Everything masked but the cascade
    pub const fn initial() -> Self {
        Self {
            master: !(1 << CASCADE_LINE),
            slave: 0xFF,
        }
    }

    /// Masks with `line` unmasked. Out-of-range lines change nothing.
    pub const fn unmask(self, line: u8) -> Self {
        match line {
            0..=7 => Self {
                master: self.master & !(1 << line),
                slave: self.slave,
            },
            8..=15 => Self {
                master: self.master & !(1 << CASCADE_LINE),
                slave: self.slave & !(1 << (line - 8)),
            },
            _ => self,
        }
    }
}

pub struct Pic {
    masks: Mutex<Masks>,
}

impl Pic {
    pub const fn new() -> Self {
        Self {
            masks: Mutex::new(Masks::initial()),
        }
    }

    pub fn masks(&self) -> Masks {
        *self.masks.lock()
    }
}

impl Default for Pic {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_arch = "x86_64")]
impl Pic {
    /// Remap both controllers and apply the current masks.
    ///
    /// # Safety
    /// Must run once, with interrupts disabled.
    pub unsafe fn init(&self) {
        use x86_64::instructions::port::Port;

        let mut master_cmd = Port::<u8>::new(MASTER_COMMAND);
        let mut master_data = Port::<u8>::new(MASTER_DATA);
        let mut slave_cmd = Port::<u8>::new(SLAVE_COMMAND);
        let mut slave_data = Port::<u8>::new(SLAVE_DATA);

        master_cmd.write(ICW1_INIT);
        slave_cmd.write(ICW1_INIT);
        master_data.write(MASTER_OFFSET);
        slave_data.write(SLAVE_OFFSET);
        master_data.write(1 << CASCADE_LINE);
        slave_data.write(CASCADE_LINE);
        master_data.write(ICW4_8086);
        slave_data.write(ICW4_8086);

        let masks = self.masks();
        master_data.write(masks.master);
        slave_data.write(masks.slave);
    }

    /// Acknowledge `line` so that it can fire again.
    pub fn end_of_interrupt(&self, line: u8) {
        use x86_64::instructions::port::Port;
        unsafe {
            if line >= 8 {
                Port::<u8>::new(SLAVE_COMMAND).write(EOI);
            }
            Port::<u8>::new(MASTER_COMMAND).write(EOI);
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl InterruptController for Pic {
    fn enable(&self, line: u8) {
        use x86_64::instructions::port::Port;

        let mut masks = self.masks.lock();
        *masks = masks.unmask(line);
        unsafe {
            Port::<u8>::new(MASTER_DATA).write(masks.master);
            Port::<u8>::new(SLAVE_DATA).write(masks.slave);
        }
        log::debug!("pic: irq {} unmasked", line);
    }
}

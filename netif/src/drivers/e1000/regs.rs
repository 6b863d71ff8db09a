// e1000 register file: offsets, bit definitions and the MMIO accessor

use crate::error::NetError;
use alloc::sync::Arc;
use core::ptr::NonNull;
use volatile::VolatilePtr;

/// Size of the controller's memory-mapped register window
pub const REGISTER_WINDOW: u64 = 128 * 1024;

/// Minimum size of the optional I/O window
pub const IO_WINDOW: u64 = 64;

/// 32-bit registers used by this driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Reg {
    Ctrl = 0x0000,
    Status = 0x0008,
    Eerd = 0x0014,
    Icr = 0x00C0,
    Ims = 0x00D0,
    Imc = 0x00D8,
    Rctl = 0x0100,
    Tctl = 0x0400,
    Tipg = 0x0410,
    Rdbal = 0x2800,
    Rdbah = 0x2804,
    Rdlen = 0x2808,
    Rdh = 0x2810,
    Rdt = 0x2818,
    Tdbal = 0x3800,
    Tdbah = 0x3804,
    Tdlen = 0x3808,
    Tdh = 0x3810,
    Tdt = 0x3818,
    Ral0 = 0x5400,
    Rah0 = 0x5404,
}

impl Reg {
    pub const fn offset(self) -> usize {
        self as usize
    }
}

// CTRL
pub const CTRL_ASDE: u32 = 1 << 5;
pub const CTRL_SLU: u32 = 1 << 6;
pub const CTRL_RST: u32 = 1 << 26;

// STATUS
pub const STATUS_LU: u32 = 1 << 1;

// RAH
pub const RAH_AV: u32 = 1 << 31;

// TCTL
pub const TCTL_EN: u32 = 1 << 1;
pub const TCTL_PSP: u32 = 1 << 3;
pub const TCTL_CT_SHIFT: u32 = 4;
pub const TCTL_COLD_SHIFT: u32 = 12;
pub const TCTL_CT: u32 = 0x0F;
pub const TCTL_COLD: u32 = 0x200;

// TIPG
pub const TIPG_IPGT_SHIFT: u32 = 0;
pub const TIPG_IPGR1_SHIFT: u32 = 10;
pub const TIPG_IPGR2_SHIFT: u32 = 20;
pub const TIPG_GAP: u32 = 10;

// RCTL
pub const RCTL_EN: u32 = 1 << 1;
pub const RCTL_BAM: u32 = 1 << 15;
pub const RCTL_BSIZE_2048: u32 = 0;
pub const RCTL_SECRC: u32 = 1 << 26;

// Interrupt causes (ICR/IMS/IMC)
pub const INT_TXDW: u32 = 1 << 0;
pub const INT_TXQE: u32 = 1 << 1;
pub const INT_LSC: u32 = 1 << 2;
pub const INT_RXSEQ: u32 = 1 << 3;
pub const INT_RXO: u32 = 1 << 6;
pub const INT_RXT0: u32 = 1 << 7;

/// Causes unmasked at attach
pub const INT_ENABLED: u32 = INT_RXSEQ | INT_RXO | INT_RXT0 | INT_TXQE;

/// Causes that mean the receive ring has work; all of them are unmasked
pub const INT_RX_MASK: u32 = INT_RXSEQ | INT_RXO | INT_RXT0;

pub const fn tctl_value() -> u32 {
    TCTL_EN | TCTL_PSP | (TCTL_CT << TCTL_CT_SHIFT) | (TCTL_COLD << TCTL_COLD_SHIFT)
}

pub const fn tipg_value() -> u32 {
    (TIPG_GAP << TIPG_IPGT_SHIFT) | (TIPG_GAP << TIPG_IPGR1_SHIFT) | (TIPG_GAP << TIPG_IPGR2_SHIFT)
}

pub const fn rctl_value() -> u32 {
    RCTL_EN | RCTL_BAM | RCTL_BSIZE_2048 | RCTL_SECRC
}

/// Typed access to the controller's registers
pub trait RegisterBlock: Send + Sync {
    fn read(&self, reg: Reg) -> u32;
    fn write(&self, reg: Reg, value: u32);

    fn set_bits(&self, reg: Reg, bits: u32) {
        self.write(reg, self.read(reg) | bits);
    }

    fn clear_bits(&self, reg: Reg, bits: u32) {
        self.write(reg, self.read(reg) & !bits);
    }
}

impl<T: RegisterBlock + ?Sized> RegisterBlock for Arc<T> {
    fn read(&self, reg: Reg) -> u32 {
        (**self).read(reg)
    }

    fn write(&self, reg: Reg, value: u32) {
        (**self).write(reg, value)
    }
}

/// Memory-mapped register window, validated once at construction
pub struct Mmio {
    base: NonNull<u32>,
    len: usize,
}

// Register accesses are single volatile dword operations.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

impl Mmio {
    /// # Safety
    /// `base` must map `len` bytes of device registers for the lifetime of
    /// the returned value.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Result<Self, NetError> {
        if (base.as_ptr() as usize) & 0x3 != 0 {
            return Err(NetError::ResourceMismatch("register window is not dword aligned"));
        }
        if (len as u64) < REGISTER_WINDOW {
            return Err(NetError::ResourceMismatch("register window smaller than 128 KiB"));
        }
        Ok(Self {
            base: base.cast(),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn register(&self, reg: Reg) -> VolatilePtr<'_, u32> {
        // Every Reg offset lies inside the validated 128 KiB window
        unsafe {
            let ptr = self.base.as_ptr().cast::<u8>().add(reg.offset()).cast::<u32>();
            VolatilePtr::new(NonNull::new_unchecked(ptr))
        }
    }
}

impl RegisterBlock for Mmio {
    fn read(&self, reg: Reg) -> u32 {
        self.register(reg).read()
    }

    fn write(&self, reg: Reg, value: u32) {
        self.register(reg).write(value)
    }
}

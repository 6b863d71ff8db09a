// Narrow interfaces to the kernel services this layer depends on

use alloc::sync::Arc;
use core::ptr::NonNull;

/// Page granularity of the DMA allocator
pub const PAGE_SIZE: usize = 4096;

/// One physically contiguous, mapped page suitable for device DMA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaPage {
    phys: u64,
    virt: NonNull<u8>,
}

// A DmaPage is a plain address pair; ownership is tracked by whoever holds it.
unsafe impl Send for DmaPage {}
unsafe impl Sync for DmaPage {}

impl DmaPage {
    /// # Safety
    /// `virt` must map `PAGE_SIZE` writable bytes backed by physical `phys`.
    pub unsafe fn new(phys: u64, virt: NonNull<u8>) -> Self {
        Self { phys, virt }
    }

    pub fn phys(&self) -> u64 {
        self.phys
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.virt.as_ptr()
    }
}

/// Page-granularity allocator for descriptor rings and packet buffers
pub trait PageAllocator: Send + Sync {
    /// Allocate one zeroed, mapped page, or `None` when memory is exhausted.
    fn allocate(&self) -> Option<DmaPage>;

    /// Return a page to the allocator.
    ///
    /// # Safety
    /// The page must have come from this allocator and must no longer be
    /// referenced by the device or any live slice.
    unsafe fn free(&self, page: DmaPage);
}

/// Interrupt controller enable primitive
pub trait InterruptController: Send + Sync {
    /// Unmask a legacy interrupt line.
    fn enable(&self, line: u8);
}

/// Maps device register windows into the kernel address space
pub trait AddressSpace: Send + Sync {
    /// Return a virtual pointer covering `len` bytes at physical `phys`.
    fn map_mmio(&self, phys: u64, len: usize) -> Option<NonNull<u8>>;
}

/// Opaque key a blocked context waits on
pub type WaitKey = u64;

/// Scheduler block/wake primitive
///
/// `block` returns when the key is woken, when `deadline_ms` has passed, or
/// spuriously; callers re-check their condition after every return.
pub trait Scheduler: Send + Sync {
    /// Monotonic milliseconds since boot.
    fn now_ms(&self) -> u64;

    /// Suspend the calling context on `key` until woken or `deadline_ms`.
    fn block(&self, key: WaitKey, deadline_ms: u64);

    /// Make every context blocked on `key` runnable.
    fn wake(&self, key: WaitKey);
}

impl<T: Scheduler + ?Sized> Scheduler for Arc<T> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn block(&self, key: WaitKey, deadline_ms: u64) {
        (**self).block(key, deadline_ms)
    }

    fn wake(&self, key: WaitKey) {
        (**self).wake(key)
    }
}

/// Run `f` with local interrupts masked.
///
/// Every lock the interrupt path also takes is held only inside this when
/// taken from thread context, so a handler never spins on a lock its own
/// CPU already holds. Hosted builds have no interrupts to mask.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    x86_64::instructions::interrupts::without_interrupts(f)
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    f()
}

/// Kernel services handed to a driver at attach time
#[derive(Clone)]
pub struct Platform {
    pub pages: Arc<dyn PageAllocator>,
    pub interrupts: Arc<dyn InterruptController>,
    pub address_space: Arc<dyn AddressSpace>,
}

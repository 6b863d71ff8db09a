//! Physical frame allocation and the direct map, as seen by drivers

use alloc::vec::Vec;
use core::ptr::NonNull;
use netif::{AddressSpace, DmaPage, PageAllocator};
use shared::memory::{phys_to_virt, MemoryMap, MemoryRegion, PAGE_SIZE};
use spin::Mutex;

/// Frames below this stay with firmware and legacy devices
const LOW_MEMORY: u64 = 0x10_0000;

/// Usable range handed out front to back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    next: u64,
    end: u64,
}

struct Frames {
    spans: Vec<Span>,
    recycled: Vec<u64>,
}

/// Frame allocator over the boot memory map
///
/// Frames come from the usable regions in order; freed frames are reused
/// first. Every frame is zeroed through the direct map before it is
/// returned.
pub struct FrameAllocator {
    frames: Mutex<Frames>,
}

impl FrameAllocator {
    /// `reserved` is excluded from every usable region (the kernel heap).
    pub fn new(map: &MemoryMap, reserved: core::ops::Range<u64>) -> Self {
        let mut spans = Vec::new();
        for region in map.usable() {
            spans.extend(usable_spans(region, &reserved));
        }
        Self {
            frames: Mutex::new(Frames {
                spans,
                recycled: Vec::new(),
            }),
        }
    }

    /// Frames never handed out yet
    pub fn remaining(&self) -> u64 {
        let frames = self.frames.lock();
        let fresh: u64 = frames.spans.iter().map(|s| (s.end - s.next) / PAGE_SIZE as u64).sum();
        fresh + frames.recycled.len() as u64
    }

    fn next_frame(&self) -> Option<u64> {
        let mut frames = self.frames.lock();
        if let Some(phys) = frames.recycled.pop() {
            return Some(phys);
        }
        let span = frames.spans.iter_mut().find(|s| s.next < s.end)?;
        let phys = span.next;
        span.next += PAGE_SIZE as u64;
        Some(phys)
    }
}

fn usable_spans(region: &MemoryRegion, reserved: &core::ops::Range<u64>) -> impl Iterator<Item = Span> {
    let start = align_up(region.start as u64).max(LOW_MEMORY);
    let end = align_down(region.end() as u64);

    // Split around the reserved range
    let below = Span {
        next: start,
        end: end.min(align_down(reserved.start)),
    };
    let above = Span {
        next: start.max(align_up(reserved.end)),
        end,
    };
    [below, above].into_iter().filter(|s| s.next < s.end)
}

const fn align_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1)
}

const fn align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}

impl PageAllocator for FrameAllocator {
    fn allocate(&self) -> Option<DmaPage> {
        let phys = self.next_frame()?;
        let virt = NonNull::new(phys_to_virt(phys) as *mut u8)?;
        unsafe {
            core::ptr::write_bytes(virt.as_ptr(), 0, PAGE_SIZE);
            Some(DmaPage::new(phys, virt))
        }
    }

    unsafe fn free(&self, page: DmaPage) {
        self.frames.lock().recycled.push(page.phys());
    }
}

/// Device windows reached through the bootloader's direct map
///
/// The loader maps all of physical address space, MMIO holes included, at
/// the direct-map offset, so mapping is a translation.
pub struct DirectMap;

impl AddressSpace for DirectMap {
    fn map_mmio(&self, phys: u64, len: usize) -> Option<NonNull<u8>> {
        if len == 0 || phys.checked_add(len as u64).is_none() {
            return None;
        }
        NonNull::new(phys_to_virt(phys) as *mut u8)
    }
}

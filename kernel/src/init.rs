//! Kernel initialization functions
//!
//! Heap, console logging and boot-time network bring-up.

use crate::interrupts;
use crate::mm::{DirectMap, FrameAllocator};
use crate::sched::TickScheduler;
use alloc::sync::Arc;
use log::{info, warn};
use netif::{
    enumerate, irq_router, nic_registry, ArpEngine, AttachContext, ConfigSpace, EnumerationReport,
    InterruptController, NetConfig, Platform, DEFAULT_DRIVERS,
};
use shared::memory::MemoryMap;
use spin::Once;

/// Global heap allocator
#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: linked_list_allocator::LockedHeap = linked_list_allocator::LockedHeap::empty();

/// Initialize the heap allocator
///
/// Sets up the global heap allocator with the given start address and size.
/// This must be called before any heap allocations are made.
///
/// # Safety
///
/// The region must be mapped, writable and used for nothing else.
#[cfg(not(test))]
pub unsafe fn init_heap(heap_start: usize, heap_size: usize) {
    ALLOCATOR.lock().init(heap_start as *mut u8, heap_size);
}

type Engine = ArpEngine<TickScheduler>;

static ARP_ENGINE: Once<Engine> = Once::new();

/// The ARP engine, once the network is up
pub fn arp_engine() -> Option<&'static Engine> {
    ARP_ENGINE.get()
}

/// Kernel services handed to drivers
pub fn platform(memory_map: &MemoryMap, heap: core::ops::Range<u64>) -> Platform {
    Platform {
        pages: Arc::new(FrameAllocator::new(memory_map, heap)),
        interrupts: Arc::new(PicHandle),
        address_space: Arc::new(DirectMap),
    }
}

/// Enumerate PCI, attach every supported controller and start ARP.
///
/// A machine without a usable controller still gets an engine; every
/// resolution then fails with `NoSuchInterface`.
pub fn init_network(config: &NetConfig, cfg_space: &dyn ConfigSpace, platform: &Platform) -> EnumerationReport {
    let registry = nic_registry();
    let ctx = AttachContext {
        config_space: cfg_space,
        platform,
        registry,
        router: irq_router(),
        config,
    };
    let report = enumerate(&ctx, DEFAULT_DRIVERS);

    info!(
        "net: {} devices, {} functions, {} interfaces attached",
        report.devices, report.functions, report.attached
    );
    if report.failed > 0 {
        warn!("net: {} controllers failed to attach", report.failed);
    }
    for name in registry.names() {
        info!("net: {} ready", name);
    }

    ARP_ENGINE.call_once(|| ArpEngine::new(registry.clone(), TickScheduler::new(), config.local_ip, config.arp));
    report
}

/// Forwards line enables to the global PIC
struct PicHandle;

impl InterruptController for PicHandle {
    #[cfg(target_arch = "x86_64")]
    fn enable(&self, line: u8) {
        interrupts::pic().enable(line);
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn enable(&self, _line: u8) {}
}

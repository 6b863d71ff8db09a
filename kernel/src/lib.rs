#![cfg_attr(not(test), no_std)]

//! moteOS Kernel - entry point and network bring-up
//!
//! `kernel_main` is called by the bootloader once memory, the IDT and the
//! timer are set up. It installs the heap and console logger, brings up
//! every supported network controller and then idles, servicing
//! interrupts.

extern crate alloc;

pub mod init;
pub mod interrupts;
pub mod mm;
pub mod pic;
pub mod sched;
pub mod serial;
pub mod syscall;

#[cfg(not(test))]
use core::panic::PanicInfo;
#[cfg(not(test))]
use shared::BootInfo;

/// Value of `key` on a whitespace-separated `key=value` command line
pub fn cmdline_value<'a>(cmdline: &'a str, key: &str) -> Option<&'a str> {
    cmdline
        .split_whitespace()
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// Kernel main entry point
///
/// # Arguments
///
/// * `boot_info` - Boot information from the bootloader
#[cfg(all(target_arch = "x86_64", not(test)))]
#[no_mangle]
pub extern "C" fn kernel_main(boot_info: &'static BootInfo) -> ! {
    use netif::{InterruptController, NetConfig};

    unsafe { init::init_heap(boot_info.heap_start, boot_info.heap_size) };
    shared::memory::set_phys_offset(boot_info.phys_offset);

    let level = cmdline_value(boot_info.cmdline, "log").map_or(log::LevelFilter::Info, serial::parse_level);
    serial::init_logger(level);
    log::info!("moteOS kernel starting");

    let config = match NetConfig::parse(boot_info.cmdline) {
        Ok(config) => config,
        Err(err) => {
            log::warn!("net: bad command line ({}), using defaults", err);
            NetConfig::default()
        }
    };

    unsafe { interrupts::pic().init() };

    let heap_start = shared::memory::virt_to_phys(boot_info.heap_start as u64).unwrap_or(0);
    let heap = heap_start..heap_start + boot_info.heap_size as u64;
    let platform = init::platform(&boot_info.memory_map, heap);
    let cfg_space = netif::PortConfigSpace::new();
    init::init_network(&config, &cfg_space, &platform);

    // Timer ticks drive ARP timeouts from here on
    interrupts::pic().enable(interrupts::TIMER_LINE);
    x86_64::instructions::interrupts::enable();

    loop {
        x86_64::instructions::hlt();
    }
}

/// Panic handler
///
/// Logs the panic to the serial console and halts the CPU.
#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("kernel panic: {}", info);
    loop {
        #[cfg(target_arch = "x86_64")]
        x86_64::instructions::hlt();
    }
}

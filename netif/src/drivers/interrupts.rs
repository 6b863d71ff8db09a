// Interrupt routing for network drivers

use crate::drivers::{FrameSink, NetworkDriver};
use crate::hal::without_interrupts;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::{Mutex, Once};

/// Maps legacy interrupt lines to the drivers sharing them
pub struct IrqRouter {
    routes: Mutex<BTreeMap<u8, Vec<Arc<dyn NetworkDriver>>>>,
}

impl IrqRouter {
    pub const fn new() -> Self {
        Self {
            routes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Route interrupts on `line` to `driver` (lines may be shared).
    pub fn register(&self, line: u8, driver: Arc<dyn NetworkDriver>) {
        without_interrupts(|| self.routes.lock().entry(line).or_default().push(driver));
    }

    /// Drop routes to drivers that have been shut down.
    pub fn prune(&self) {
        without_interrupts(|| {
            let mut routes = self.routes.lock();
            for drivers in routes.values_mut() {
                drivers.retain(|d| d.is_ready());
            }
            routes.retain(|_, drivers| !drivers.is_empty());
        });
    }

    /// Service an interrupt on `line`.
    ///
    /// Every driver on the line acknowledges its own cause register and
    /// drains its receive ring into `sink`. Returns the number of frames
    /// delivered.
    ///
    /// This is the only path that advances receive heads; call it from the
    /// interrupt handler (or with the line masked).
    pub fn dispatch(&self, line: u8, sink: &dyn FrameSink) -> usize {
        // Handlers run under the routing lock; the interrupt path must not allocate
        without_interrupts(|| {
            let routes = self.routes.lock();
            let Some(drivers) = routes.get(&line) else {
                return 0;
            };

            let mut delivered = 0;
            for driver in drivers.iter().filter(|d| d.is_ready()) {
                match driver.handle_interrupt(sink) {
                    Ok(n) => delivered += n,
                    Err(err) => log::debug!("irq {}: driver {} error: {}", line, driver.mac_address(), err),
                }
            }
            delivered
        })
    }

    pub fn lines(&self) -> Vec<u8> {
        without_interrupts(|| self.routes.lock().keys().copied().collect())
    }
}

impl Default for IrqRouter {
    fn default() -> Self {
        Self::new()
    }
}

static IRQ_ROUTER: Once<IrqRouter> = Once::new();

/// Get the global interrupt router
pub fn irq_router() -> &'static IrqRouter {
    IRQ_ROUTER.call_once(IrqRouter::new)
}

/// Service `line` on the global router; called from the kernel's interrupt stub.
pub fn dispatch_irq(line: u8, sink: &dyn FrameSink) -> usize {
    irq_router().dispatch(line, sink)
}

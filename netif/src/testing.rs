// Host-side fakes for the kernel services and the hardware

use crate::drivers::e1000::regs::*;
use crate::drivers::e1000::ring::{RxDescriptor, TxDescriptor, RX_STATUS_DD, RX_STATUS_EOP, TX_STATUS_DD};
use crate::drivers::{FrameSink, NetworkDriver, NicStatsSnapshot};
use crate::error::NetError;
use crate::hal::{AddressSpace, DmaPage, InterruptController, PageAllocator, Platform, Scheduler, WaitKey, PAGE_SIZE};
use crate::pci::{ConfigSpace, PciAddress, REG_BAR0, REG_COMMAND_STATUS};
use crate::wire::{ArpOperation, EthernetArpFrame, MacAddress, ETHERTYPE_ARP};
use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

// ---------------------------------------------------------------------------
// Configuration space

/// One function's 256-byte configuration header
#[derive(Clone)]
pub struct FakeFunction {
    regs: [u32; 64],
    bar_masks: [u32; 6],
}

impl FakeFunction {
    pub fn new(vendor_id: u16, device_id: u16, class_reg: u32) -> Self {
        let mut regs = [0u32; 64];
        regs[0] = u32::from(vendor_id) | (u32::from(device_id) << 16);
        regs[2] = class_reg;
        Self {
            regs,
            bar_masks: [0; 6],
        }
    }

    /// `readback` is what the BAR returns after all ones are written.
    pub fn with_bar(mut self, slot: usize, value: u32, readback: u32) -> Self {
        self.regs[4 + slot] = value;
        self.bar_masks[slot] = readback;
        self
    }

    pub fn with_irq(mut self, line: u8, pin: u8) -> Self {
        self.regs[15] = u32::from(line) | (u32::from(pin) << 8);
        self
    }

    pub fn multifunction(mut self) -> Self {
        self.regs[3] |= 0x80 << 16;
        self
    }
}

/// Configuration space backed by a table of fake functions
pub struct FakeConfigSpace {
    functions: Mutex<BTreeMap<PciAddress, FakeFunction>>,
    writes: Mutex<Vec<(PciAddress, u8, u32)>>,
}

impl FakeConfigSpace {
    pub fn new() -> Self {
        Self {
            functions: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, addr: PciAddress, function: FakeFunction) {
        self.functions.lock().insert(addr, function);
    }

    pub fn writes_to(&self, addr: PciAddress, offset: u8) -> usize {
        self.writes
            .lock()
            .iter()
            .filter(|(a, o, _)| *a == addr && *o == offset)
            .count()
    }
}

impl ConfigSpace for FakeConfigSpace {
    fn read(&self, addr: PciAddress, offset: u8) -> u32 {
        match self.functions.lock().get(&addr) {
            Some(f) => f.regs[usize::from(offset / 4)],
            None => u32::MAX,
        }
    }

    fn write(&self, addr: PciAddress, offset: u8, value: u32) {
        self.writes.lock().push((addr, offset, value));
        let mut functions = self.functions.lock();
        let Some(f) = functions.get_mut(&addr) else {
            return;
        };
        let index = usize::from(offset / 4);
        if (REG_BAR0..REG_BAR0 + 24).contains(&offset) {
            // Hardwired low bits and unimplemented address bits
            f.regs[index] = value & f.bar_masks[index - 4];
        } else if offset == REG_COMMAND_STATUS {
            f.regs[index] = (f.regs[index] & 0xFFFF_0000) | (value & 0xFFFF);
        } else {
            f.regs[index] = value;
        }
    }
}

// ---------------------------------------------------------------------------
// Pages, interrupts, mappings

struct AllocState {
    live: Vec<(usize, usize)>,
    misalign_next: Option<usize>,
    limit: Option<usize>,
    total: usize,
}

/// Identity-mapped pages from the host heap (physical == virtual)
pub struct TestAllocator {
    state: Mutex<AllocState>,
}

const BLOCK: usize = PAGE_SIZE * 2;

impl TestAllocator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AllocState {
                live: Vec::new(),
                misalign_next: None,
                limit: None,
                total: 0,
            }),
        }
    }

    /// Offset the next page by `bytes` from its natural alignment.
    pub fn misalign_next(&self, bytes: usize) {
        self.state.lock().misalign_next = Some(bytes);
    }

    /// Refuse allocations once `pages` are outstanding.
    pub fn limit(&self, pages: usize) {
        self.state.lock().limit = Some(pages);
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn total_allocated(&self) -> usize {
        self.state.lock().total
    }

    fn layout() -> Layout {
        Layout::from_size_align(BLOCK, PAGE_SIZE).unwrap()
    }
}

impl PageAllocator for TestAllocator {
    fn allocate(&self) -> Option<DmaPage> {
        let mut state = self.state.lock();
        if state.limit.is_some_and(|limit| state.live.len() >= limit) {
            return None;
        }
        let block = unsafe { alloc_zeroed(Self::layout()) };
        let block = NonNull::new(block)?;
        let offset = state.misalign_next.take().unwrap_or(0);
        let virt = unsafe { block.as_ptr().add(offset) };
        state.live.push((block.as_ptr() as usize, virt as usize));
        state.total += 1;
        Some(unsafe { DmaPage::new(virt as u64, NonNull::new_unchecked(virt)) })
    }

    unsafe fn free(&self, page: DmaPage) {
        let mut state = self.state.lock();
        let at = state
            .live
            .iter()
            .position(|&(_, virt)| virt == page.as_ptr() as usize)
            .expect("freeing a page this allocator never handed out");
        let (block, _) = state.live.swap_remove(at);
        dealloc(block as *mut u8, Self::layout());
    }
}

/// Records every line enabled at the interrupt controller
pub struct RecordingInterrupts {
    lines: Mutex<Vec<u8>>,
}

impl RecordingInterrupts {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn enabled(&self) -> Vec<u8> {
        self.lines.lock().clone()
    }
}

impl InterruptController for RecordingInterrupts {
    fn enable(&self, line: u8) {
        self.lines.lock().push(line);
    }
}

/// Refuses every mapping; attach paths that get this far use a simulated device
pub struct NoMappings;

impl AddressSpace for NoMappings {
    fn map_mmio(&self, _phys: u64, _len: usize) -> Option<NonNull<u8>> {
        None
    }
}

pub fn test_platform_with(pages: Arc<TestAllocator>, interrupts: Arc<RecordingInterrupts>) -> Platform {
    Platform {
        pages,
        interrupts,
        address_space: Arc::new(NoMappings),
    }
}

pub fn test_platform() -> Platform {
    test_platform_with(Arc::new(TestAllocator::new()), Arc::new(RecordingInterrupts::new()))
}

// ---------------------------------------------------------------------------
// Scheduler

/// Virtual clock that advances one quantum per unwoken block
pub struct ManualScheduler {
    now: AtomicU64,
    quantum: u64,
    woken: Mutex<BTreeSet<WaitKey>>,
    hook: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    blocks: AtomicUsize,
}

impl ManualScheduler {
    pub fn new(quantum: u64) -> Self {
        Self {
            now: AtomicU64::new(0),
            quantum,
            woken: Mutex::new(BTreeSet::new()),
            hook: Mutex::new(None),
            blocks: AtomicUsize::new(0),
        }
    }

    /// Run `hook` at the start of every block, standing in for interrupts
    /// that arrive while the caller sleeps.
    pub fn on_block(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.hook.lock() = Some(Arc::new(hook));
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn blocks(&self) -> usize {
        self.blocks.load(Ordering::SeqCst)
    }
}

impl Scheduler for ManualScheduler {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn block(&self, key: WaitKey, _deadline_ms: u64) {
        self.blocks.fetch_add(1, Ordering::SeqCst);
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
        if self.woken.lock().remove(&key) {
            return;
        }
        self.now.fetch_add(self.quantum, Ordering::SeqCst);
    }

    fn wake(&self, key: WaitKey) {
        self.woken.lock().insert(key);
    }
}

// ---------------------------------------------------------------------------
// Drivers and sinks

/// Minimal driver: records sends, hands queued frames to the sink
pub struct StubDriver {
    ready: AtomicBool,
    mac: MacAddress,
    sent: Mutex<Vec<Vec<u8>>>,
    rx: Mutex<VecDeque<Vec<u8>>>,
    on_send: Mutex<Option<Arc<SendHook>>>,
}

type SendHook = dyn Fn(&[u8]) + Send + Sync;

impl StubDriver {
    pub fn ready() -> Self {
        Self::with_mac(MacAddress([0x02, 0, 0, 0, 0, 0x01]))
    }

    pub fn with_mac(mac: MacAddress) -> Self {
        Self {
            ready: AtomicBool::new(true),
            mac,
            sent: Mutex::new(Vec::new()),
            rx: Mutex::new(VecDeque::new()),
            on_send: Mutex::new(None),
        }
    }

    /// Run `hook` with every frame `send` accepts, as a receive interrupt
    /// landing mid-transmit would.
    pub fn on_send(&self, hook: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.on_send.lock() = Some(Arc::new(hook));
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn queue_rx(&self, frame: &[u8]) {
        self.rx.lock().push_back(frame.to_vec());
    }
}

impl NetworkDriver for StubDriver {
    fn send(&self, frame: &[u8]) -> Result<(), NetError> {
        if !self.is_ready() {
            return Err(NetError::DeviceDown);
        }
        self.sent.lock().push(frame.to_vec());
        let hook = self.on_send.lock().clone();
        if let Some(hook) = hook {
            hook(frame);
        }
        Ok(())
    }

    fn try_send(&self, frame: &[u8]) -> Result<(), NetError> {
        if !self.is_ready() {
            return Err(NetError::DeviceDown);
        }
        self.sent.lock().push(frame.to_vec());
        Ok(())
    }

    fn receive(&self, sink: &dyn FrameSink) -> Result<usize, NetError> {
        let mut delivered = 0;
        while let Some(frame) = self.rx.lock().pop_front() {
            sink.deliver("stub", &frame);
            delivered += 1;
        }
        Ok(delivered)
    }

    fn handle_interrupt(&self, sink: &dyn FrameSink) -> Result<usize, NetError> {
        self.receive(sink)
    }

    fn mac_address(&self) -> MacAddress {
        self.mac
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn is_link_up(&self) -> bool {
        self.is_ready()
    }

    fn shutdown(&self) {
        self.set_ready(false);
    }

    fn stats(&self) -> NicStatsSnapshot {
        NicStatsSnapshot::default()
    }
}

/// Collects every delivered frame
pub struct RecordingSink {
    frames: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().iter().map(|(_, f)| f.clone()).collect()
    }

    pub fn interfaces(&self) -> Vec<String> {
        self.frames.lock().iter().map(|(i, _)| i.clone()).collect()
    }
}

impl FrameSink for RecordingSink {
    fn deliver(&self, interface: &str, frame: &[u8]) {
        self.frames.lock().push((String::from(interface), frame.to_vec()));
    }
}

// ---------------------------------------------------------------------------
// Simulated e1000

struct SimState {
    regs: BTreeMap<Reg, u32>,
    reset_polls: Option<u32>,
    reset_reads: u32,
    auto_complete: bool,
    eeprom: [u16; 64],
    peers: Vec<(u32, MacAddress)>,
    transmitted: Vec<Vec<u8>>,
    writes: Vec<(Reg, u32)>,
}

impl SimState {
    fn reg(&self, reg: Reg) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    fn set(&mut self, reg: Reg, value: u32) {
        self.regs.insert(reg, value);
    }

    fn ring_len(&self, len_reg: Reg) -> u32 {
        (self.reg(len_reg) / 16).max(1)
    }

    /// Walk TDH..TDT like the DMA engine: copy each frame out, mark it done.
    fn run_transmit(&mut self) {
        if self.reg(Reg::Tctl) & TCTL_EN == 0 {
            return;
        }
        let base = u64::from(self.reg(Reg::Tdbal)) | (u64::from(self.reg(Reg::Tdbah)) << 32);
        let len = self.ring_len(Reg::Tdlen);
        let tail = self.reg(Reg::Tdt);
        let mut head = self.reg(Reg::Tdh);

        while head != tail {
            let slot = (base as usize + head as usize * 16) as *mut TxDescriptor;
            let frame = unsafe {
                let mut desc = core::ptr::read_volatile(slot);
                let frame =
                    core::slice::from_raw_parts(desc.addr as usize as *const u8, usize::from(desc.length)).to_vec();
                desc.status |= TX_STATUS_DD;
                core::ptr::write_volatile(slot, desc);
                frame
            };
            self.answer_arp(&frame);
            self.transmitted.push(frame);
            head = (head + 1) % len;
        }
        self.set(Reg::Tdh, head);
        let icr = self.reg(Reg::Icr);
        self.set(Reg::Icr, icr | INT_TXDW | INT_TXQE);
    }

    fn answer_arp(&mut self, frame: &[u8]) {
        let Ok(request) = EthernetArpFrame::parse(frame) else {
            return;
        };
        if request.ethertype != ETHERTYPE_ARP || request.operation() != Some(ArpOperation::Request) {
            return;
        }
        if let Some(&(_, mac)) = self.peers.iter().find(|(ip, _)| *ip == request.target_ip) {
            let reply = EthernetArpFrame::reply_to(&request, mac).to_bytes();
            self.receive(&reply, RX_STATUS_DD | RX_STATUS_EOP, 0);
        }
    }

    /// Place a frame in the next hardware-owned receive slot.
    fn receive(&mut self, frame: &[u8], status: u8, errors: u8) -> bool {
        if self.reg(Reg::Rctl) & RCTL_EN == 0 {
            return false;
        }
        let base = u64::from(self.reg(Reg::Rdbal)) | (u64::from(self.reg(Reg::Rdbah)) << 32);
        let len = self.ring_len(Reg::Rdlen);
        let head = self.reg(Reg::Rdh);
        if head == self.reg(Reg::Rdt) {
            // No descriptors left; the frame is missed
            return false;
        }

        let slot = (base as usize + head as usize * 16) as *mut RxDescriptor;
        unsafe {
            let mut desc = core::ptr::read_volatile(slot);
            let copy = frame.len().min(2046);
            core::ptr::copy_nonoverlapping(frame.as_ptr(), desc.addr() as usize as *mut u8, copy);
            desc.length = copy as u16;
            desc.status = status;
            desc.errors = errors;
            core::ptr::write_volatile(slot, desc);
        }
        self.set(Reg::Rdh, (head + 1) % len);
        let icr = self.reg(Reg::Icr);
        self.set(Reg::Icr, icr | INT_RXT0);
        true
    }
}

/// Register-level model of an 82540EM for host tests
///
/// Descriptor and buffer addresses are dereferenced directly, so it must be
/// paired with [`TestAllocator`]'s identity-mapped pages.
pub struct SimulatedE1000 {
    state: Mutex<SimState>,
}

impl SimulatedE1000 {
    pub fn new(mac: [u8; 6]) -> Self {
        let mut regs = BTreeMap::new();
        regs.insert(Reg::Ral0, u32::from_le_bytes([mac[0], mac[1], mac[2], mac[3]]));
        regs.insert(Reg::Rah0, u32::from(u16::from_le_bytes([mac[4], mac[5]])) | RAH_AV);
        let mut eeprom = [0u16; 64];
        eeprom[0] = u16::from_le_bytes([mac[0], mac[1]]);
        eeprom[1] = u16::from_le_bytes([mac[2], mac[3]]);
        eeprom[2] = u16::from_le_bytes([mac[4], mac[5]]);
        Self {
            state: Mutex::new(SimState {
                regs,
                reset_polls: Some(3),
                reset_reads: 0,
                auto_complete: true,
                eeprom,
                peers: Vec::new(),
                transmitted: Vec::new(),
                writes: Vec::new(),
            }),
        }
    }

    /// Reset never completes.
    pub fn stuck_in_reset(self) -> Self {
        self.state.lock().reset_polls = None;
        self
    }

    /// RAL0/RAH0 read as zero; the address must come from the EEPROM.
    pub fn without_receive_address(self) -> Self {
        {
            let mut state = self.state.lock();
            state.regs.remove(&Reg::Ral0);
            state.regs.remove(&Reg::Rah0);
        }
        self
    }

    /// RAL0/RAH0 and the EEPROM are both blank.
    pub fn without_mac(self) -> Self {
        self.state.lock().eeprom = [0; 64];
        self.without_receive_address()
    }

    /// Whether a tail write makes the transmit engine run.
    pub fn set_auto_complete(&self, on: bool) {
        self.state.lock().auto_complete = on;
    }

    /// Answer ARP requests for `ip` with `mac`.
    pub fn add_peer(&self, ip: u32, mac: MacAddress) {
        self.state.lock().peers.push((ip, mac));
    }

    /// Process everything queued between TDH and TDT now.
    pub fn complete_transmits(&self) {
        self.state.lock().run_transmit();
    }

    pub fn inject_frame(&self, frame: &[u8]) -> bool {
        self.state.lock().receive(frame, RX_STATUS_DD | RX_STATUS_EOP, 0)
    }

    pub fn inject_errored_frame(&self, frame: &[u8], errors: u8) -> bool {
        self.state.lock().receive(frame, RX_STATUS_DD | RX_STATUS_EOP, errors)
    }

    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.state.lock().transmitted.clone()
    }

    pub fn writes(&self) -> Vec<(Reg, u32)> {
        self.state.lock().writes.clone()
    }

    pub fn wrote(&self, reg: Reg) -> bool {
        self.state.lock().writes.iter().any(|(r, _)| *r == reg)
    }

    pub fn peek(&self, reg: Reg) -> u32 {
        self.state.lock().reg(reg)
    }
}

impl RegisterBlock for SimulatedE1000 {
    fn read(&self, reg: Reg) -> u32 {
        let mut state = self.state.lock();
        match reg {
            Reg::Ctrl => {
                let ctrl = state.reg(Reg::Ctrl);
                if ctrl & CTRL_RST != 0 {
                    state.reset_reads += 1;
                    if state.reset_polls.is_some_and(|n| state.reset_reads >= n) {
                        let keep_ral = state.regs.get(&Reg::Ral0).copied();
                        let keep_rah = state.regs.get(&Reg::Rah0).copied();
                        state.regs.clear();
                        if let (Some(ral), Some(rah)) = (keep_ral, keep_rah) {
                            state.set(Reg::Ral0, ral);
                            state.set(Reg::Rah0, rah);
                        }
                        return 0;
                    }
                }
                ctrl
            }
            Reg::Icr => {
                let icr = state.reg(Reg::Icr);
                state.set(Reg::Icr, 0);
                icr
            }
            other => state.reg(other),
        }
    }

    fn write(&self, reg: Reg, value: u32) {
        let mut state = self.state.lock();
        state.writes.push((reg, value));
        match reg {
            Reg::Ctrl => {
                state.set(Reg::Ctrl, value);
                if value & CTRL_RST != 0 {
                    state.reset_reads = 0;
                }
                let status = state.reg(Reg::Status);
                if value & CTRL_SLU != 0 {
                    state.set(Reg::Status, status | STATUS_LU);
                }
            }
            Reg::Ims => {
                let ims = state.reg(Reg::Ims);
                state.set(Reg::Ims, ims | value);
            }
            Reg::Imc => {
                let ims = state.reg(Reg::Ims);
                state.set(Reg::Ims, ims & !value);
            }
            Reg::Eerd if value & 1 != 0 => {
                let word = ((value >> 8) & 0x3F) as usize;
                let data = u32::from(state.eeprom[word]);
                state.set(Reg::Eerd, (data << 16) | (1 << 4) | (value & 0xFF00));
            }
            Reg::Tdt => {
                state.set(Reg::Tdt, value);
                if state.auto_complete {
                    state.run_transmit();
                }
            }
            other => state.set(other, value),
        }
    }
}

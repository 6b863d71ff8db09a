// Descriptor rings and the packet buffers they own

use crate::error::NetError;
use crate::hal::{DmaPage, PageAllocator, PAGE_SIZE};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::marker::PhantomData;
use core::ptr::NonNull;

/// Descriptors per ring
pub const RING_SIZE: usize = 128;

/// Usable bytes in one packet buffer
pub const PACKET_BUFFER_SIZE: usize = 2046;

/// Two packet buffers share each 4 KiB page
const BUFFER_STRIDE: usize = 2048;
const BUFFERS_PER_PAGE: usize = PAGE_SIZE / BUFFER_STRIDE;

/// Ring base addresses must sit on a paragraph boundary
pub const RING_ALIGN: u64 = 16;

// Transmit command and status bits
pub const TX_CMD_EOP: u8 = 0x01;
pub const TX_CMD_IFCS: u8 = 0x02;
pub const TX_CMD_RS: u8 = 0x08;
pub const TX_STATUS_DD: u8 = 0x01;

// Receive status bits
pub const RX_STATUS_DD: u8 = 0x01;
pub const RX_STATUS_EOP: u8 = 0x02;

/// Hardware descriptor layout shared by both rings
pub trait Descriptor: Copy + Default {
    /// Hardware has finished with this descriptor
    fn is_done(&self) -> bool;
}

/// Legacy transmit descriptor
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxDescriptor {
    pub addr: u64,
    pub length: u16,
    pub cso: u8,
    pub cmd: u8,
    pub status: u8,
    pub css: u8,
    pub special: u16,
}

impl TxDescriptor {
    /// Single-buffer frame: report status, end of packet, insert FCS.
    pub fn frame(addr: u64, length: u16) -> Self {
        Self {
            addr,
            length,
            cmd: TX_CMD_RS | TX_CMD_EOP | TX_CMD_IFCS,
            ..Self::default()
        }
    }
}

impl Descriptor for TxDescriptor {
    fn is_done(&self) -> bool {
        self.status & TX_STATUS_DD != 0
    }
}

/// Legacy receive descriptor
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxDescriptor {
    pub addr_lo: u32,
    pub addr_hi: u32,
    pub length: u16,
    pub checksum: u16,
    pub status: u8,
    pub errors: u8,
    pub special: u16,
}

impl RxDescriptor {
    pub fn armed(addr: u64) -> Self {
        Self {
            addr_lo: addr as u32,
            addr_hi: (addr >> 32) as u32,
            ..Self::default()
        }
    }

    pub fn addr(&self) -> u64 {
        (u64::from(self.addr_hi) << 32) | u64::from(self.addr_lo)
    }

    pub fn is_end_of_packet(&self) -> bool {
        self.status & RX_STATUS_EOP != 0
    }
}

impl Descriptor for RxDescriptor {
    fn is_done(&self) -> bool {
        self.status & RX_STATUS_DD != 0
    }
}

const _: () = assert!(core::mem::size_of::<TxDescriptor>() == 16);
const _: () = assert!(core::mem::size_of::<RxDescriptor>() == 16);

/// Who may touch a packet buffer right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Driver,
    Hardware,
}

/// One DMA packet buffer tagged with its current owner
pub struct PacketBuffer {
    phys: u64,
    virt: NonNull<u8>,
    owner: Owner,
}

impl PacketBuffer {
    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn phys(&self) -> u64 {
        self.phys
    }

    /// Copy a frame in and hand the buffer to hardware.
    ///
    /// Returns the physical address for the descriptor.
    pub fn load(&mut self, frame: &[u8]) -> Result<u64, NetError> {
        if self.owner == Owner::Hardware {
            return Err(NetError::RingFull);
        }
        if frame.is_empty() || frame.len() > PACKET_BUFFER_SIZE {
            return Err(NetError::FrameTooLarge { len: frame.len() });
        }
        // Driver-owned: no descriptor references this memory
        unsafe {
            core::ptr::copy_nonoverlapping(frame.as_ptr(), self.virt.as_ptr(), frame.len());
        }
        self.owner = Owner::Hardware;
        Ok(self.phys)
    }

    /// Hand an empty buffer to hardware for receive.
    pub fn arm(&mut self) -> u64 {
        self.owner = Owner::Hardware;
        self.phys
    }

    /// Hardware reported completion; the driver owns the buffer again.
    pub fn reclaim(&mut self) {
        self.owner = Owner::Driver;
    }

    /// Bytes of a driver-owned buffer.
    pub fn contents(&self, len: usize) -> &[u8] {
        debug_assert_eq!(self.owner, Owner::Driver);
        let len = len.min(PACKET_BUFFER_SIZE);
        unsafe { core::slice::from_raw_parts(self.virt.as_ptr(), len) }
    }
}

// Raw pointers into DMA pages; access is serialized by the ring's lock.
unsafe impl Send for PacketBuffer {}
unsafe impl Sync for PacketBuffer {}

/// Fixed-capacity descriptor ring with one packet buffer per slot
///
/// Pages are returned to the allocator when the ring is dropped, so the
/// device must be stopped from using the ring first.
pub struct DescriptorRing<T: Descriptor> {
    page: DmaPage,
    buffer_pages: Vec<DmaPage>,
    buffers: Vec<PacketBuffer>,
    head: usize,
    tail: usize,
    pages: Arc<dyn PageAllocator>,
    _descriptor: PhantomData<T>,
}

pub type TxRing = DescriptorRing<TxDescriptor>;
pub type RxRing = DescriptorRing<RxDescriptor>;

impl<T: Descriptor> DescriptorRing<T> {
    /// Allocate the descriptor page and every slot's packet buffer.
    ///
    /// A descriptor page off a 16-byte boundary is released and rejected
    /// before anything else happens.
    pub fn allocate(pages: &Arc<dyn PageAllocator>) -> Result<Self, NetError> {
        let page = pages.allocate().ok_or(NetError::OutOfMemory)?;
        if page.phys() % RING_ALIGN != 0 {
            // Never handed to the device
            unsafe { pages.free(page) };
            return Err(NetError::RingAlignment { base: page.phys() });
        }

        let mut ring = Self {
            page,
            buffer_pages: Vec::with_capacity(RING_SIZE / BUFFERS_PER_PAGE),
            buffers: Vec::with_capacity(RING_SIZE),
            head: 0,
            tail: 0,
            pages: pages.clone(),
            _descriptor: PhantomData,
        };
        unsafe { core::ptr::write_bytes(ring.page.as_ptr(), 0, PAGE_SIZE) };

        while ring.buffers.len() < RING_SIZE {
            // On failure `ring` drops and frees everything allocated so far
            let buffer_page = ring.pages.allocate().ok_or(NetError::OutOfMemory)?;
            ring.buffer_pages.push(buffer_page);
            for half in 0..BUFFERS_PER_PAGE {
                let offset = half * BUFFER_STRIDE;
                ring.buffers.push(PacketBuffer {
                    phys: buffer_page.phys() + offset as u64,
                    virt: unsafe { NonNull::new_unchecked(buffer_page.as_ptr().add(offset)) },
                    owner: Owner::Driver,
                });
            }
        }
        Ok(ring)
    }

    /// Physical base for the BAL/BAH registers
    pub fn base(&self) -> u64 {
        self.page.phys()
    }

    /// Value for the LEN register
    pub fn byte_len(&self) -> u32 {
        (RING_SIZE * core::mem::size_of::<T>()) as u32
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    pub fn advance_head(&mut self) {
        self.head = (self.head + 1) % RING_SIZE;
    }

    pub fn advance_tail(&mut self) {
        self.tail = (self.tail + 1) % RING_SIZE;
    }

    pub fn descriptor(&self, slot: usize) -> T {
        // The device writes descriptors behind our back
        unsafe { core::ptr::read_volatile(self.slot_ptr(slot)) }
    }

    pub fn set_descriptor(&mut self, slot: usize, descriptor: T) {
        unsafe { core::ptr::write_volatile(self.slot_ptr(slot), descriptor) }
    }

    pub fn buffer(&self, slot: usize) -> &PacketBuffer {
        &self.buffers[slot % RING_SIZE]
    }

    pub fn buffer_mut(&mut self, slot: usize) -> &mut PacketBuffer {
        &mut self.buffers[slot % RING_SIZE]
    }

    /// Slots whose buffer hardware currently owns
    pub fn in_flight(&self) -> usize {
        self.buffers.iter().filter(|b| b.owner == Owner::Hardware).count()
    }

    /// A slot that hardware still owns and has not completed
    fn is_pending(&self, slot: usize) -> bool {
        self.buffer(slot).owner() == Owner::Hardware && !self.descriptor(slot).is_done()
    }

    fn slot_ptr(&self, slot: usize) -> *mut T {
        unsafe { self.page.as_ptr().cast::<T>().add(slot % RING_SIZE) }
    }
}

impl TxRing {
    /// Fill the tail slot with `frame` and advance the tail.
    ///
    /// Fails with `RingFull` if the tail slot is still in flight, or if the
    /// slot after it is, since publishing that tail would make the hardware
    /// see an empty ring. Returns the slot filled.
    pub fn push(&mut self, frame: &[u8]) -> Result<usize, NetError> {
        let slot = self.tail;
        let next = (slot + 1) % RING_SIZE;
        if self.is_pending(slot) || self.is_pending(next) {
            return Err(NetError::RingFull);
        }
        if self.buffer(slot).owner() == Owner::Hardware {
            // Completed earlier but nobody collected it yet
            self.buffer_mut(slot).reclaim();
        }

        let phys = self.buffer_mut(slot).load(frame)?;
        self.set_descriptor(slot, TxDescriptor::frame(phys, frame.len() as u16));
        self.advance_tail();
        Ok(slot)
    }

    /// Collect `slot` if hardware has finished with it.
    pub fn complete(&mut self, slot: usize) -> bool {
        if self.descriptor(slot).is_done() {
            if self.buffer(slot).owner() == Owner::Hardware {
                self.buffer_mut(slot).reclaim();
            }
            true
        } else {
            false
        }
    }
}

impl RxRing {
    /// Give every buffer to hardware with a clean descriptor.
    pub fn arm_all(&mut self) {
        for slot in 0..RING_SIZE {
            self.rearm(slot);
        }
    }

    /// Point `slot` back at its buffer with the status cleared.
    pub fn rearm(&mut self, slot: usize) {
        let phys = self.buffer_mut(slot).arm();
        self.set_descriptor(slot, RxDescriptor::armed(phys));
    }

    /// The descriptor at head, if hardware has filled it.
    pub fn completed_at_head(&self) -> Option<RxDescriptor> {
        let descriptor = self.descriptor(self.head);
        descriptor.is_done().then_some(descriptor)
    }
}

impl<T: Descriptor> Drop for DescriptorRing<T> {
    fn drop(&mut self) {
        for page in self.buffer_pages.drain(..) {
            unsafe { self.pages.free(page) };
        }
        unsafe { self.pages.free(self.page) };
    }
}

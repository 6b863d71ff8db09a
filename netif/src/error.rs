// Error types for the network-interface layer

use thiserror::Error;

/// Network-interface errors
///
/// Payloads are `Copy` so that errors can be raised and logged from
/// interrupt context without touching the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NetError {
    #[error("Resource mismatch: {0}")]
    ResourceMismatch(&'static str),

    #[error("Device reset did not complete after {polls} polls")]
    ResetTimeout { polls: u32 },

    #[error("Descriptor ring base {base:#x} is not 16-byte aligned")]
    RingAlignment { base: u64 },

    #[error("Transmit ring full")]
    RingFull,

    #[error("No such interface")]
    NoSuchInterface,

    #[error("Malformed address")]
    MalformedAddress,

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(&'static str),

    #[error("ARP resolution timed out after {waited_ms} ms")]
    ResolutionTimeout { waited_ms: u64 },

    #[error("Transmit did not complete")]
    TransmitTimeout,

    #[error("Frame of {len} bytes does not fit a packet buffer")]
    FrameTooLarge { len: usize },

    #[error("Buffer too small: {needed} bytes required")]
    BufferTooSmall { needed: usize },

    #[error("Out of DMA memory")]
    OutOfMemory,

    #[error("Device is shut down")]
    DeviceDown,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl NetError {
    /// Negative status code handed back across the system-call boundary.
    pub const fn errno(&self) -> i32 {
        match self {
            NetError::ResourceMismatch(_) => -1,
            NetError::ResetTimeout { .. } => -2,
            NetError::RingAlignment { .. } => -3,
            NetError::RingFull => -4,
            NetError::NoSuchInterface => -5,
            NetError::MalformedAddress => -6,
            NetError::ProtocolMismatch(_) => -7,
            NetError::ResolutionTimeout { .. } => -8,
            NetError::TransmitTimeout => -9,
            NetError::FrameTooLarge { .. } => -10,
            NetError::BufferTooSmall { .. } => -11,
            NetError::OutOfMemory => -12,
            NetError::DeviceDown => -13,
            NetError::InvalidConfig(_) => -14,
        }
    }
}

//! Error types for emulator operations
//!
//! Every variant is a local, recoverable condition. An operation that fails
//! leaves the board, its memory and its pins exactly as they were.

use crate::board::BoardId;
use crate::memory::SpaceId;
use thiserror::Error;

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, EmuError>;

/// Errors that can occur while driving simulated boards
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmuError {
    /// Offset past the end of the handle, or the handle was freed
    #[error("Offset {offset} out of range for handle of {len} registers")]
    OutOfRange {
        /// Requested register offset within the handle
        offset: usize,
        /// Length of the handle in registers (0 once freed)
        len: usize,
    },

    /// Value does not fit in one register
    #[error("Value {value:#x} does not fit in a {bits}-bit register")]
    ValueTooWide {
        /// Rejected value
        value: u64,
        /// Register width in bits
        bits: u32,
    },

    /// No free run of the requested length exists
    #[error("Out of memory: no free run of {requested} registers ({available} free, largest run {largest_run})")]
    OutOfMemory {
        /// Registers requested
        requested: usize,
        /// Free registers in total
        available: usize,
        /// Longest contiguous free run
        largest_run: usize,
    },

    /// Zero-length allocations are not handed out
    #[error("Cannot allocate zero registers")]
    ZeroSizedAllocation,

    /// Handle's region was already released
    #[error("Double free of region at {start} ({len} registers)")]
    DoubleFree {
        /// Start register of the region
        start: usize,
        /// Region length in registers
        len: usize,
    },

    /// Handle was issued by a different address space
    #[error("Handle belongs to address space {handle_space}, not {space}")]
    InvalidHandle {
        /// Address space that issued the handle
        handle_space: SpaceId,
        /// Address space it was presented to
        space: SpaceId,
    },

    /// One end of a link request is already wired
    #[error("Pin {pin} is already linked")]
    AlreadyLinked {
        /// Pin that already has a peer
        pin: String,
    },

    /// Both ends of a link request are the same pin
    #[error("Pin {pin} cannot be wired to itself")]
    SelfLink {
        /// Pin named as both ends
        pin: String,
    },

    /// Unlink requested on a pin with no peer
    #[error("Pin {pin} is not linked")]
    NotLinked {
        /// Pin without a peer
        pin: String,
    },

    /// GPIO number outside the documented usable set
    #[error("GPIO{index} is not a usable pin")]
    InvalidPinIndex {
        /// Rejected GPIO number
        index: u8,
    },

    /// Peer inbox is full and the overflow policy rejects new payloads
    #[error("Inbox of pin {pin} is full ({capacity} payloads)")]
    InboxFull {
        /// Pin whose inbox overflowed
        pin: String,
        /// Inbox capacity
        capacity: usize,
    },

    /// Board already holds a global address
    #[error("Board {board} already has address {address}")]
    AlreadyAddressed {
        /// Board that was asked to re-address
        board: BoardId,
        /// Address it already holds
        address: u16,
    },

    /// Every 16-bit address is already known
    #[error("No free global address left")]
    AddressesExhausted,

    /// Board id not present in the network
    #[error("Board {board} is not part of this network")]
    UnknownBoard {
        /// Missing board id
        board: BoardId,
    },
}

impl EmuError {
    /// Create an already-linked error
    pub fn already_linked(pin: impl ToString) -> Self {
        Self::AlreadyLinked {
            pin: pin.to_string(),
        }
    }

    /// Create a self-link error
    pub fn self_link(pin: impl ToString) -> Self {
        Self::SelfLink {
            pin: pin.to_string(),
        }
    }

    /// Create a not-linked error
    pub fn not_linked(pin: impl ToString) -> Self {
        Self::NotLinked {
            pin: pin.to_string(),
        }
    }

    /// Create an inbox-full error
    pub fn inbox_full(pin: impl ToString, capacity: usize) -> Self {
        Self::InboxFull {
            pin: pin.to_string(),
            capacity,
        }
    }
}

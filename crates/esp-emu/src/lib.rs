//! Board and network emulator for ESP32-class microcontrollers.
//!
//! Each [`Board`] carries a register-addressed DRAM with a bitmap allocator
//! and a full 40-pin GPIO header. Pins on different boards are joined by
//! wires that carry byte payloads, and a [`Network`] holds a set of boards so
//! that topology queries and the LBTP addressing handshake can see more than
//! one of them at a time.
//!
//! # Layers
//!
//! ```text
//! Network      boards by id, connect/disconnect, LBTP join sequence
//!   Board      memory + 40 pins + global address
//!     AddressSpace   80 000 × 32-bit registers, read/write/dump
//!       Allocator    first-fit over a packed occupancy bitmap
//!     Pin            one end of a wire, bounded inbox
//! ```
//!
//! # Quick start
//!
//! ```
//! use esp_emu::{Board, Network};
//!
//! # fn main() -> esp_emu::Result<()> {
//! let mut net = Network::new();
//! let a = net.add_board(Board::new());
//! let b = net.add_board(Board::new());
//! net.connect(a, 3, b, 5)?;
//!
//! let board = net.board_mut(a)?;
//! let handle = board.allocate_memory(10)?;
//! board.write(&handle, 0, 0xDEAD_BEEF)?;
//! board.send_memory(3, &handle)?;
//!
//! // Registers travel little-endian, the whole allocation at once.
//! let received = net.board_mut(b)?.receive_on_pin(5)?.expect("payload");
//! assert_eq!(received.len(), 40);
//! assert_eq!(&received[..4], &[0xEF, 0xBE, 0xAD, 0xDE]);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod allocator;
mod bitmap;
mod board;
mod error;
pub mod lbtp;
mod memory;
mod network;
pub mod pin;

pub use allocator::Handle;
pub use board::{Board, BoardConfig, BoardId, DEFAULT_INBOX_CAPACITY};
pub use error::{EmuError, Result};
pub use lbtp::{derive_global_address, GlobalAddress, LbtpConfig};
pub use memory::{AddressSpace, MemoryDump, SpaceId};
pub use network::Network;
pub use pin::{OverflowPolicy, Payload, Pin, PinAddress};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        AddressSpace, Board, BoardConfig, BoardId, EmuError, GlobalAddress, Handle, LbtpConfig,
        Network, OverflowPolicy, Payload, Pin, PinAddress, Result,
    };
}

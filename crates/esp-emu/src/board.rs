// SPDX-License-Identifier: AGPL-3.0-only

//! Simulated ESP32 board
//!
//! A [`Board`] is one ESP32 instance: private DRAM (an [`AddressSpace`]), the
//! 40 GPIO pads, and, once the LBTP handshake has run, a global address.
//!
//! It cannot execute code. It exists to prototype network structure and
//! transfer logic before anything is flashed to real hardware:
//!
//! 1. **Memory**: processes ask for registers and get a [`Handle`] back;
//!    they never see raw addresses.
//!
//! 2. **Pins**: only the documented usable GPIOs can be wired. Sending on a
//!    pin with nothing attached is fine, exactly as on the real chip.
//!
//! 3. **Memory-to-memory transfer**: [`Board::send_memory`] and
//!    [`Board::receive_to_memory`] move a region out of one board's DRAM and
//!    into a fresh allocation on another, by value.
//!
//! Boards refer to neighbours by the pin they are wired through. The global
//! address is separate and only exists after the handshake.

use crate::allocator::Handle;
use crate::error::{EmuError, Result};
use crate::lbtp::GlobalAddress;
use crate::memory::AddressSpace;
use crate::pin::{OverflowPolicy, Payload, Pin, PinAddress};
use bytes::{BufMut, BytesMut};
use esp_chip::dram::{registers_for, REGISTER_BYTES, REGISTER_COUNT};
use esp_chip::gpio::PIN_COUNT;
use esp_chip::PinIndex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

/// Inbox depth per pin unless configured otherwise
pub const DEFAULT_INBOX_CAPACITY: usize = 64;

static NEXT_BOARD_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique board identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoardId(u32);

impl BoardId {
    /// Mint a fresh id
    pub fn next() -> Self {
        Self(NEXT_BOARD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "esp{}", self.0)
    }
}

/// Board construction parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    /// DRAM size in 32-bit registers
    pub registers: usize,
    /// Payloads each pin can queue
    pub inbox_capacity: usize,
    /// What a full inbox does
    pub overflow: OverflowPolicy,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            registers: REGISTER_COUNT,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl BoardConfig {
    /// Set DRAM size in registers
    #[must_use]
    pub const fn with_registers(mut self, registers: usize) -> Self {
        self.registers = registers;
        self
    }

    /// Set per-pin inbox depth
    #[must_use]
    pub const fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    /// Set inbox overflow behaviour
    #[must_use]
    pub const fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }
}

/// One simulated ESP32
pub struct Board {
    id: BoardId,
    memory: AddressSpace,
    /// Indexed by GPIO number; every number has a pad, usable or not.
    pins: Vec<Pin>,
    address: Option<GlobalAddress>,
    known: BTreeSet<GlobalAddress>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Board")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("memory", &self.memory)
            .field("linked", &self.linked_pins())
            .finish_non_exhaustive()
    }
}

impl Board {
    /// Board with ESP32 defaults: 80 000 registers, 64-deep inboxes
    pub fn new() -> Self {
        Self::with_config(&BoardConfig::default())
    }

    /// Board built from `config`
    pub fn with_config(config: &BoardConfig) -> Self {
        let id = BoardId::next();
        let pins = (0..PIN_COUNT)
            .filter_map(|gpio| u8::try_from(gpio).ok().and_then(PinIndex::new))
            .map(|pin| Pin::new(PinAddress::new(id, pin), config.inbox_capacity, config.overflow))
            .collect();
        info!(
            "{id}: powered up with {} registers, inbox depth {}",
            config.registers, config.inbox_capacity
        );
        Self {
            id,
            memory: AddressSpace::new(config.registers),
            pins,
            address: None,
            known: BTreeSet::new(),
        }
    }

    /// Board identity
    pub const fn id(&self) -> BoardId {
        self.id
    }

    /// Board DRAM
    pub const fn memory(&self) -> &AddressSpace {
        &self.memory
    }

    /// Board DRAM, mutably
    pub fn memory_mut(&mut self) -> &mut AddressSpace {
        &mut self.memory
    }

    // ── Memory ───────────────────────────────────────────────────────────────

    /// Reserve `len` registers
    ///
    /// # Errors
    ///
    /// `ZeroSizedAllocation` or `OutOfMemory`.
    pub fn allocate_memory(&mut self, len: usize) -> Result<Handle> {
        self.memory.allocate(len)
    }

    /// Release a region
    ///
    /// # Errors
    ///
    /// `InvalidHandle` or `DoubleFree`.
    pub fn free_memory(&mut self, handle: &Handle) -> Result<()> {
        self.memory.free(handle)
    }

    /// Read one register through `handle`
    ///
    /// # Errors
    ///
    /// `InvalidHandle` or `OutOfRange`.
    pub fn read(&self, handle: &Handle, offset: usize) -> Result<u32> {
        self.memory.read(handle, offset)
    }

    /// Write one register through `handle`
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, `OutOfRange` or `ValueTooWide`.
    pub fn write(&mut self, handle: &Handle, offset: usize, value: u64) -> Result<()> {
        self.memory.write(handle, offset, value)
    }

    // ── Pins ─────────────────────────────────────────────────────────────────

    /// Pin `index`
    ///
    /// # Errors
    ///
    /// `InvalidPinIndex` unless `index` is in the usable GPIO set.
    pub fn pin(&self, index: u8) -> Result<&Pin> {
        let slot = Self::slot(index)?;
        Ok(&self.pins[slot])
    }

    /// Pin `index`, mutably (to hand to a peer's [`connect_pin`](Self::connect_pin))
    ///
    /// # Errors
    ///
    /// `InvalidPinIndex` unless `index` is in the usable GPIO set.
    pub fn pin_mut(&mut self, index: u8) -> Result<&mut Pin> {
        let slot = Self::slot(index)?;
        Ok(&mut self.pins[slot])
    }

    /// Wire pin `index` to `peer`
    ///
    /// # Errors
    ///
    /// `InvalidPinIndex` for an undocumented index, `AlreadyLinked` if
    /// either end is wired.
    pub fn connect_pin(&mut self, index: u8, peer: &mut Pin) -> Result<()> {
        self.pin_mut(index)?.link(peer)
    }

    /// Wire two pins of this board to each other
    ///
    /// # Errors
    ///
    /// `InvalidPinIndex`, `SelfLink` if `a == b`, or `AlreadyLinked`.
    pub fn connect_local(&mut self, a: u8, b: u8) -> Result<()> {
        let (sa, sb) = (Self::slot(a)?, Self::slot(b)?);
        if sa == sb {
            return Err(EmuError::self_link(self.pins[sa].address()));
        }
        let (lo, hi) = (sa.min(sb), sa.max(sb));
        let (head, tail) = self.pins.split_at_mut(hi);
        head[lo].link(&mut tail[0])
    }

    /// Cut the wire on pin `index`, returning the former peer
    ///
    /// # Errors
    ///
    /// `InvalidPinIndex` or `NotLinked`.
    pub fn disconnect_pin(&mut self, index: u8) -> Result<PinAddress> {
        self.pin_mut(index)?.unlink()
    }

    /// Send a copy of `payload` out of pin `index`
    ///
    /// # Errors
    ///
    /// `InvalidPinIndex`, or `InboxFull` from a rejecting peer. An unlinked
    /// pin is not an error.
    pub fn send_on_pin(&self, index: u8, payload: impl AsRef<[u8]>) -> Result<()> {
        self.pin(index)?.send(payload)
    }

    /// Oldest payload received on pin `index`
    ///
    /// # Errors
    ///
    /// `InvalidPinIndex`.
    pub fn receive_on_pin(&mut self, index: u8) -> Result<Option<Payload>> {
        Ok(self.pin_mut(index)?.receive())
    }

    /// Pins with a live wire
    pub fn linked_pins(&self) -> BTreeSet<PinIndex> {
        self.pins
            .iter()
            .filter(|p| p.is_linked())
            .map(Pin::index)
            .collect()
    }

    /// Send the contents of `handle` out of pin `index`
    ///
    /// Registers go on the wire little-endian, four bytes each.
    ///
    /// # Errors
    ///
    /// Memory errors from reading the region, or pin errors from sending.
    pub fn send_memory(&self, index: u8, handle: &Handle) -> Result<()> {
        let pin = self.pin(index)?;
        let words = self.memory.read_slice(handle, 0, handle.len())?;
        let mut buf = BytesMut::with_capacity(words.len() * REGISTER_BYTES);
        for word in words {
            buf.put_u32_le(word);
        }
        pin.send(buf.freeze())
    }

    /// Store the oldest payload on pin `index` into a fresh allocation
    ///
    /// The payload is packed little-endian, four bytes per register, with the
    /// last register zero-padded. An empty payload still takes one register.
    /// If the allocation fails the payload stays queued.
    ///
    /// # Errors
    ///
    /// `InvalidPinIndex` or `OutOfMemory`.
    pub fn receive_to_memory(&mut self, index: u8) -> Result<Option<Handle>> {
        let slot = Self::slot(index)?;
        let Some(payload) = self.pins[slot].receive() else {
            return Ok(None);
        };
        let handle = match self.memory.allocate(registers_for(payload.len()).max(1)) {
            Ok(handle) => handle,
            Err(e) => {
                self.pins[slot].requeue(payload);
                return Err(e);
            }
        };
        let words: Vec<u32> = payload
            .chunks(REGISTER_BYTES)
            .map(|chunk| {
                let mut word = [0u8; REGISTER_BYTES];
                word[..chunk.len()].copy_from_slice(chunk);
                u32::from_le_bytes(word)
            })
            .collect();
        self.memory.write_slice(&handle, 0, &words)?;
        debug!(
            "{}: stored {} bytes from {} at {} registers",
            self.id,
            payload.len(),
            self.pins[slot].address(),
            handle.len()
        );
        Ok(Some(handle))
    }

    // ── Addressing ───────────────────────────────────────────────────────────

    /// Global address, once assigned
    pub const fn address(&self) -> Option<GlobalAddress> {
        self.address
    }

    /// Every global address this board knows of, its own included
    pub const fn known_addresses(&self) -> &BTreeSet<GlobalAddress> {
        &self.known
    }

    /// Take `address` as this board's global address
    ///
    /// # Errors
    ///
    /// `AlreadyAddressed` if an address is already held; the old one stays.
    pub fn assign_address(&mut self, address: GlobalAddress) -> Result<()> {
        if let Some(current) = self.address {
            return Err(EmuError::AlreadyAddressed {
                board: self.id,
                address: current.get(),
            });
        }
        self.address = Some(address);
        self.known.insert(address);
        info!("{}: assigned global address {address}", self.id);
        Ok(())
    }

    /// Add addresses heard from the network to the address book
    pub fn learn_addresses(&mut self, addresses: impl IntoIterator<Item = GlobalAddress>) {
        self.known.extend(addresses);
    }

    fn slot(index: u8) -> Result<usize> {
        PinIndex::usable(index)
            .map(|pin| usize::from(pin.get()))
            .ok_or(EmuError::InvalidPinIndex { index })
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        debug!("{}: powered down", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Board {
        Board::with_config(&BoardConfig::default().with_registers(256))
    }

    #[test]
    fn allocate_write_read() {
        let mut x = small();
        let h = x.allocate_memory(10).unwrap();
        x.write(&h, 0, 42).unwrap();
        assert_eq!(x.read(&h, 0).unwrap(), 42);
        x.free_memory(&h).unwrap();
        assert!(matches!(x.free_memory(&h), Err(EmuError::DoubleFree { .. })));
    }

    #[test]
    fn undocumented_pins_rejected() {
        let mut x = small();
        let mut y = small();
        for index in [6, 11, 20, 24, 30, 40, 200] {
            let peer = y.pin_mut(5).unwrap();
            assert_eq!(
                x.connect_pin(index, peer),
                Err(EmuError::InvalidPinIndex { index })
            );
            assert!(x.send_on_pin(index, b"x").is_err());
            assert!(x.receive_on_pin(index).is_err());
        }
        assert!(x.linked_pins().is_empty());
        assert!(y.linked_pins().is_empty());
    }

    #[test]
    fn connect_and_exchange() {
        let mut x = small();
        let mut y = small();
        x.connect_pin(3, y.pin_mut(5).unwrap()).unwrap();
        assert_eq!(x.linked_pins().into_iter().collect::<Vec<_>>(), vec![PinIndex::new(3).unwrap()]);
        assert_eq!(y.pin(5).unwrap().peer(), Some(x.pin(3).unwrap().address()));

        x.send_on_pin(3, "hello").unwrap();
        assert_eq!(y.receive_on_pin(5).unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(y.receive_on_pin(5).unwrap(), None);

        y.send_on_pin(5, "back").unwrap();
        assert_eq!(x.receive_on_pin(3).unwrap().as_deref(), Some(&b"back"[..]));
    }

    #[test]
    fn local_loopback() {
        let mut x = small();
        x.connect_local(4, 2).unwrap();
        x.send_on_pin(2, b"loop").unwrap();
        assert_eq!(x.receive_on_pin(4).unwrap().as_deref(), Some(&b"loop"[..]));
        assert_eq!(
            x.connect_local(12, 12),
            Err(EmuError::SelfLink {
                pin: format!("{}:GPIO12", x.id())
            })
        );
        assert!(x.pin(12).unwrap().peer().is_none());
        assert!(matches!(x.connect_local(4, 12), Err(EmuError::AlreadyLinked { .. })));
    }

    #[test]
    fn disconnect_reports_peer() {
        let mut x = small();
        let mut y = small();
        x.connect_pin(12, y.pin_mut(13).unwrap()).unwrap();
        let peer = x.disconnect_pin(12).unwrap();
        assert_eq!(peer, PinAddress::new(y.id(), PinIndex::new(13).unwrap()));
        assert!(matches!(y.disconnect_pin(13), Err(EmuError::NotLinked { .. })));
    }

    #[test]
    fn memory_moves_between_boards_by_value() {
        let mut x = small();
        let mut y = small();
        x.connect_pin(25, y.pin_mut(26).unwrap()).unwrap();

        let src = x.allocate_memory(3).unwrap();
        x.memory_mut().write_slice(&src, 0, &[1, 0xdead_beef, 7]).unwrap();
        x.send_memory(25, &src).unwrap();
        x.write(&src, 0, 99).unwrap();

        let dst = y.receive_to_memory(26).unwrap().unwrap();
        assert_eq!(dst.space(), y.memory().id());
        assert_eq!(y.memory().read_slice(&dst, 0, 3).unwrap(), vec![1, 0xdead_beef, 7]);
        assert_eq!(y.receive_to_memory(26).unwrap(), None);
    }

    #[test]
    fn odd_sized_payload_is_padded() {
        let mut x = small();
        let mut y = small();
        x.connect_pin(0, y.pin_mut(2).unwrap()).unwrap();
        x.send_on_pin(0, [1u8, 2, 3, 4, 5]).unwrap();
        let h = y.receive_to_memory(2).unwrap().unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(y.read(&h, 0).unwrap(), 0x0403_0201);
        assert_eq!(y.read(&h, 1).unwrap(), 0x0000_0005);
    }

    #[test]
    fn failed_store_keeps_payload_queued() {
        let mut x = small();
        let mut y = Board::with_config(&BoardConfig::default().with_registers(1));
        x.connect_pin(0, y.pin_mut(2).unwrap()).unwrap();
        x.send_on_pin(0, [0u8; 8]).unwrap();
        assert!(matches!(y.receive_to_memory(2), Err(EmuError::OutOfMemory { .. })));
        assert_eq!(y.pin(2).unwrap().pending(), 1);
    }

    #[test]
    fn address_is_assigned_once() {
        let mut x = small();
        assert_eq!(x.address(), None);
        x.assign_address(GlobalAddress::new(4)).unwrap();
        assert_eq!(
            x.assign_address(GlobalAddress::new(9)),
            Err(EmuError::AlreadyAddressed {
                board: x.id(),
                address: 4
            })
        );
        assert_eq!(x.address(), Some(GlobalAddress::new(4)));
        assert!(x.known_addresses().contains(&GlobalAddress::new(4)));
    }
}

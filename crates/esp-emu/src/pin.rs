//! Pins and the wires between them
//!
//! A [`Pin`] belongs to exactly one board and owns its inbound queue. Linking
//! two pins strings a single [`Wire`] between them; both ends hold the same
//! wire, so "A is linked to B" and "B is linked to A" are one fact rather than
//! two fields that could disagree. Cutting the wire from either end (or
//! dropping either pin) unlinks both.
//!
//! Payloads are copied onto the wire. The sender keeps nothing that aliases
//! the receiver's queue contents, just as a real board only ever shares a
//! voltage level with its neighbour.
//!
//! ```text
//!   Board X                                Board Y
//!   ┌──────────┐        Wire               ┌──────────┐
//!   │ GPIO3  ──┼──── ends[0] ─ ends[1] ────┼── GPIO5  │
//!   │  inbox ◄─┼──── inboxes[0]            │  inbox   │
//!   └──────────┘            inboxes[1] ───►┼──►       │
//!                                          └──────────┘
//! ```

use crate::board::BoardId;
use crate::error::{EmuError, Result};
use bytes::Bytes;
use esp_chip::PinIndex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};

/// Data moved across a wire
pub type Payload = Bytes;

/// Global name of a pin: which board, which GPIO
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PinAddress {
    /// Owning board
    pub board: BoardId,
    /// GPIO number on that board
    pub pin: PinIndex,
}

impl PinAddress {
    /// Address of `pin` on `board`
    pub const fn new(board: BoardId, pin: PinIndex) -> Self {
        Self { board, pin }
    }
}

impl fmt::Display for PinAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.board, self.pin)
    }
}

/// What a full inbox does with the next payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest queued payload to make room
    #[default]
    DropOldest,
    /// Discard the incoming payload
    DropNewest,
    /// Refuse the payload; the sender gets `InboxFull`
    Reject,
}

/// Bounded FIFO of received payloads
#[derive(Debug)]
struct Inbox {
    owner: PinAddress,
    capacity: usize,
    policy: OverflowPolicy,
    queue: Mutex<VecDeque<Payload>>,
}

impl Inbox {
    fn new(owner: PinAddress, capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            owner,
            capacity,
            policy,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Payload>> {
        // A panicking holder cannot leave the deque half-updated.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, payload: Payload) -> Result<()> {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    queue.pop_front();
                    warn!("{}: inbox full, dropped oldest payload", self.owner);
                }
                OverflowPolicy::DropNewest => {
                    warn!("{}: inbox full, dropped {} byte payload", self.owner, payload.len());
                    return Ok(());
                }
                OverflowPolicy::Reject => {
                    return Err(EmuError::inbox_full(self.owner, self.capacity));
                }
            }
        }
        if self.capacity > 0 {
            queue.push_back(payload);
        }
        Ok(())
    }

    fn pop(&self) -> Option<Payload> {
        self.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Shared link between two pins
#[derive(Debug)]
struct Wire {
    ends: [PinAddress; 2],
    inboxes: [Arc<Inbox>; 2],
    cut: AtomicBool,
}

#[derive(Debug)]
struct Link {
    wire: Arc<Wire>,
    side: usize,
}

impl Link {
    fn is_live(&self) -> bool {
        !self.wire.cut.load(Ordering::Acquire)
    }

    fn peer(&self) -> PinAddress {
        self.wire.ends[1 - self.side]
    }
}

/// One GPIO of a simulated board
#[derive(Debug)]
pub struct Pin {
    address: PinAddress,
    inbox: Arc<Inbox>,
    link: Option<Link>,
}

impl Pin {
    /// Unlinked pin with an empty inbox
    pub(crate) fn new(address: PinAddress, inbox_capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            address,
            inbox: Arc::new(Inbox::new(address, inbox_capacity, policy)),
            link: None,
        }
    }

    /// Global name of this pin
    pub const fn address(&self) -> PinAddress {
        self.address
    }

    /// GPIO number
    pub const fn index(&self) -> PinIndex {
        self.address.pin
    }

    /// Owning board
    pub const fn board(&self) -> BoardId {
        self.address.board
    }

    /// Whether a live wire is attached
    pub fn is_linked(&self) -> bool {
        self.live_link().is_some()
    }

    /// The pin at the other end of the wire
    pub fn peer(&self) -> Option<PinAddress> {
        self.live_link().map(Link::peer)
    }

    /// Payloads waiting in the inbox
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    /// Wire this pin to `other`
    ///
    /// # Errors
    ///
    /// `AlreadyLinked` if either pin already has a live wire. Neither pin is
    /// changed on failure.
    pub fn link(&mut self, other: &mut Pin) -> Result<()> {
        if self.is_linked() {
            return Err(EmuError::already_linked(self.address));
        }
        if other.is_linked() {
            return Err(EmuError::already_linked(other.address));
        }

        let wire = Arc::new(Wire {
            ends: [self.address, other.address],
            inboxes: [Arc::clone(&self.inbox), Arc::clone(&other.inbox)],
            cut: AtomicBool::new(false),
        });
        self.link = Some(Link {
            wire: Arc::clone(&wire),
            side: 0,
        });
        other.link = Some(Link { wire, side: 1 });

        info!("linked {} <-> {}", self.address, other.address);
        Ok(())
    }

    /// Cut the wire, unlinking both ends
    ///
    /// Payloads already delivered stay in their inboxes.
    ///
    /// # Errors
    ///
    /// `NotLinked` if there is no live wire.
    pub fn unlink(&mut self) -> Result<PinAddress> {
        let Some(link) = self.link.take().filter(Link::is_live) else {
            return Err(EmuError::not_linked(self.address));
        };
        link.wire.cut.store(true, Ordering::Release);
        let peer = link.peer();
        info!("unlinked {} <-> {peer}", self.address);
        Ok(peer)
    }

    /// Put a copy of `payload` on the wire
    ///
    /// An unlinked pin accepts the payload and does nothing with it, as a
    /// real GPIO driven with nothing attached would.
    ///
    /// # Errors
    ///
    /// `InboxFull` if the peer's inbox is full and its policy is `Reject`.
    pub fn send(&self, payload: impl AsRef<[u8]>) -> Result<()> {
        let payload = payload.as_ref();
        let Some(link) = self.live_link() else {
            trace!("{}: not linked, {} bytes go nowhere", self.address, payload.len());
            return Ok(());
        };
        debug!("{} -> {}: {} bytes", self.address, link.peer(), payload.len());
        link.wire.inboxes[1 - link.side].push(Bytes::copy_from_slice(payload))
    }

    /// Pop the oldest received payload, `None` if the inbox is empty
    pub fn receive(&mut self) -> Option<Payload> {
        self.inbox.pop()
    }

    /// Put a payload back at the head of the inbox
    pub(crate) fn requeue(&mut self, payload: Payload) {
        self.inbox.lock().push_front(payload);
    }

    fn live_link(&self) -> Option<&Link> {
        self.link.as_ref().filter(|l| l.is_live())
    }
}

impl Drop for Pin {
    fn drop(&mut self) {
        if let Some(link) = self.live_link() {
            link.wire.cut.store(true, Ordering::Release);
            debug!("{} dropped, wire to {} cut", self.address, link.peer());
        }
    }
}

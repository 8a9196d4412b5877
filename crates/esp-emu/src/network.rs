//! Network of boards
//!
//! The network is an arena of [`Board`]s keyed by [`BoardId`]. It owns no
//! links of its own: the wires live on the pins, and every topology query
//! here is answered by walking them. What the arena adds is the ability to
//! reach two boards at once, which wiring and the LBTP handshake need.

use crate::board::{Board, BoardConfig, BoardId};
use crate::error::{EmuError, Result};
use crate::lbtp::{derive_global_address, GlobalAddress, LbtpConfig};
use crate::pin::PinAddress;
use esp_chip::PinIndex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info};

/// A set of boards and the wires between them
#[derive(Debug, Default)]
pub struct Network {
    boards: BTreeMap<BoardId, Board>,
    protocol: LbtpConfig,
}

impl Network {
    /// Empty network running LBTP on the default pins
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty network running LBTP on `protocol`'s pins
    pub fn with_protocol(protocol: LbtpConfig) -> Self {
        Self {
            boards: BTreeMap::new(),
            protocol,
        }
    }

    /// LBTP configuration shared by every board
    pub const fn protocol(&self) -> &LbtpConfig {
        &self.protocol
    }

    /// Add an existing board
    pub fn add_board(&mut self, board: Board) -> BoardId {
        let id = board.id();
        self.boards.insert(id, board);
        debug!("network: added {id} ({} boards)", self.boards.len());
        id
    }

    /// Build a board from `config` and add it
    pub fn spawn(&mut self, config: &BoardConfig) -> BoardId {
        self.add_board(Board::with_config(config))
    }

    /// Take a board out of the network; its wires stay attached
    ///
    /// # Errors
    ///
    /// `UnknownBoard`.
    pub fn remove_board(&mut self, id: BoardId) -> Result<Board> {
        self.boards
            .remove(&id)
            .ok_or(EmuError::UnknownBoard { board: id })
    }

    /// Board `id`
    ///
    /// # Errors
    ///
    /// `UnknownBoard`.
    pub fn board(&self, id: BoardId) -> Result<&Board> {
        self.boards.get(&id).ok_or(EmuError::UnknownBoard { board: id })
    }

    /// Board `id`, mutably
    ///
    /// # Errors
    ///
    /// `UnknownBoard`.
    pub fn board_mut(&mut self, id: BoardId) -> Result<&mut Board> {
        self.boards
            .get_mut(&id)
            .ok_or(EmuError::UnknownBoard { board: id })
    }

    /// Boards in id order
    pub fn boards(&self) -> impl Iterator<Item = &Board> {
        self.boards.values()
    }

    /// Number of boards
    pub fn len(&self) -> usize {
        self.boards.len()
    }

    /// Whether the network has no boards
    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    /// Wire `a_pin` of board `a` to `b_pin` of board `b`
    ///
    /// # Errors
    ///
    /// An LBTP wire joins two address books: both sides learn everything
    /// the other side knew, so later joins cannot reuse an address.
    ///
    /// # Errors
    ///
    /// `UnknownBoard`, `InvalidPinIndex`, `AlreadyLinked` or `SelfLink`;
    /// nothing is wired on failure.
    pub fn connect(&mut self, a: BoardId, a_pin: u8, b: BoardId, b_pin: u8) -> Result<()> {
        if a == b {
            return self.board_mut(a)?.connect_local(a_pin, b_pin);
        }
        self.board(a)?;
        let mut other = self.remove_board(b)?;
        let result = other
            .pin_mut(b_pin)
            .and_then(|peer| self.board_mut(a)?.connect_pin(a_pin, peer));
        self.boards.insert(b, other);
        result?;
        if self.is_lbtp(a_pin) && self.is_lbtp(b_pin) {
            self.merge_address_books(a)?;
        }
        Ok(())
    }

    /// Cut the wire on `pin` of board `id`
    ///
    /// # Errors
    ///
    /// `UnknownBoard`, `InvalidPinIndex` or `NotLinked`.
    pub fn disconnect(&mut self, id: BoardId, pin: u8) -> Result<PinAddress> {
        self.board_mut(id)?.disconnect_pin(pin)
    }

    /// Every live wire once, as `(lower end, higher end)`
    pub fn links(&self) -> Vec<(PinAddress, PinAddress)> {
        let mut links = Vec::new();
        for board in self.boards.values() {
            for index in board.linked_pins() {
                let Ok(pin) = board.pin(index.get()) else {
                    continue;
                };
                if let Some(peer) = pin.peer() {
                    if pin.address() < peer {
                        links.push((pin.address(), peer));
                    }
                }
            }
        }
        links
    }

    /// Boards in this network wired directly to `id`
    ///
    /// # Errors
    ///
    /// `UnknownBoard`.
    pub fn neighbours(&self, id: BoardId) -> Result<BTreeSet<BoardId>> {
        self.peers(id, |_| true)
    }

    /// Boards reachable from `id` over any wire, `id` included
    ///
    /// # Errors
    ///
    /// `UnknownBoard`.
    pub fn component(&self, id: BoardId) -> Result<BTreeSet<BoardId>> {
        self.flood(id, |_| true)
    }

    /// PING_LOCAL: addresses known to the boards on the far side of `id`'s
    /// wired LBTP pins, sorted and deduplicated
    ///
    /// # Errors
    ///
    /// `UnknownBoard`.
    pub fn ping_local_peers(&self, id: BoardId) -> Result<Vec<GlobalAddress>> {
        let known: BTreeSet<GlobalAddress> = self
            .lbtp_peers(id)?
            .into_iter()
            .filter_map(|peer| self.boards.get(&peer))
            .flat_map(|board| board.known_addresses().iter().copied())
            .collect();
        Ok(known.into_iter().collect())
    }

    /// Run the LBTP join sequence for board `id`
    ///
    /// Pings the neighbours, derives an address no board reachable over
    /// LBTP wires knows, stores it, and floods the whole address book to
    /// that component.
    ///
    /// # Errors
    ///
    /// `UnknownBoard`, `AlreadyAddressed` or `AddressesExhausted`. Nothing
    /// changes on failure.
    pub fn assign_address(&mut self, id: BoardId) -> Result<GlobalAddress> {
        let board = self.board(id)?;
        if let Some(current) = board.address() {
            return Err(EmuError::AlreadyAddressed {
                board: id,
                address: current.get(),
            });
        }
        let wired = self.protocol.set_up_pins(board);
        let neighbours = self.ping_local_peers(id)?;
        let component = self.lbtp_component(id)?;
        // Normally equal to what the neighbours report; wider when boards
        // were wired outside `connect`.
        let mut known = self.address_book(&component);
        let address = derive_global_address(&known)?;
        debug!(
            "{id}: {} LBTP pins wired, neighbours know {}, component knows {}",
            wired.len(),
            neighbours.len(),
            known.len()
        );

        self.board_mut(id)?.assign_address(address)?;
        known.insert(address);
        for other in component {
            if let Some(board) = self.boards.get_mut(&other) {
                board.learn_addresses(known.iter().copied());
            }
        }
        Ok(address)
    }

    /// Address every unaddressed board
    ///
    /// Starts from the lowest unaddressed id and joins boards breadth-first
    /// over LBTP wires, so a chain is numbered in order. Boards on separate
    /// islands each start again from address 1. Addresses are never
    /// reassigned, so two islands numbered apart and wired together later
    /// keep whatever duplicates they had.
    ///
    /// # Errors
    ///
    /// `AddressesExhausted`.
    pub fn assign_all(&mut self) -> Result<BTreeMap<BoardId, GlobalAddress>> {
        while let Some(root) = self.next_unaddressed() {
            let mut queue = VecDeque::from([root]);
            let mut seen = BTreeSet::from([root]);
            while let Some(id) = queue.pop_front() {
                if self.board(id)?.address().is_none() {
                    self.assign_address(id)?;
                }
                for next in self.lbtp_peers(id)? {
                    if seen.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }

        let addresses: BTreeMap<_, _> = self
            .boards
            .values()
            .filter_map(|b| b.address().map(|a| (b.id(), a)))
            .collect();
        info!("network: {} boards addressed", addresses.len());
        Ok(addresses)
    }

    fn next_unaddressed(&self) -> Option<BoardId> {
        self.boards
            .values()
            .find(|b| b.address().is_none())
            .map(Board::id)
    }

    fn is_lbtp(&self, gpio: u8) -> bool {
        PinIndex::new(gpio).is_some_and(|pin| self.protocol.claims(pin))
    }

    /// Union of the address books of `boards`
    fn address_book(&self, boards: &BTreeSet<BoardId>) -> BTreeSet<GlobalAddress> {
        boards
            .iter()
            .filter_map(|id| self.boards.get(id))
            .flat_map(|board| board.known_addresses().iter().copied())
            .collect()
    }

    /// Give every board in `id`'s LBTP component the same address book
    fn merge_address_books(&mut self, id: BoardId) -> Result<()> {
        let component = self.lbtp_component(id)?;
        let book = self.address_book(&component);
        if book.is_empty() {
            return Ok(());
        }
        for other in &component {
            if let Some(board) = self.boards.get_mut(other) {
                board.learn_addresses(book.iter().copied());
            }
        }
        debug!(
            "network: merged {} addresses across {} boards",
            book.len(),
            component.len()
        );
        Ok(())
    }

    fn lbtp_peers(&self, id: BoardId) -> Result<BTreeSet<BoardId>> {
        self.peers(id, |pin| self.protocol.claims(pin.pin))
    }

    fn lbtp_component(&self, id: BoardId) -> Result<BTreeSet<BoardId>> {
        self.flood(id, |pin| self.protocol.claims(pin.pin))
    }

    /// Boards in this network wired to `id` where both wire ends pass `via`
    fn peers(&self, id: BoardId, via: impl Fn(PinAddress) -> bool) -> Result<BTreeSet<BoardId>> {
        let board = self.board(id)?;
        Ok(board
            .linked_pins()
            .into_iter()
            .filter_map(|index| board.pin(index.get()).ok())
            .filter(|pin| via(pin.address()))
            .filter_map(|pin| pin.peer())
            .filter(|peer| via(*peer) && peer.board != id && self.boards.contains_key(&peer.board))
            .map(|peer| peer.board)
            .collect())
    }

    fn flood(&self, id: BoardId, via: impl Fn(PinAddress) -> bool) -> Result<BTreeSet<BoardId>> {
        self.board(id)?;
        let mut seen = BTreeSet::from([id]);
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for next in self.peers(current, &via)? {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> BoardConfig {
        BoardConfig::default().with_registers(64)
    }

    /// `n` boards, board i GPIO38 wired to board i+1 GPIO37
    fn chain(n: usize) -> (Network, Vec<BoardId>) {
        let mut net = Network::new();
        let ids: Vec<_> = (0..n).map(|_| net.spawn(&small())).collect();
        for pair in ids.windows(2) {
            net.connect(pair[0], 38, pair[1], 37).unwrap();
        }
        (net, ids)
    }

    #[test]
    fn connect_and_query_links() {
        let (net, ids) = chain(3);
        let links = net.links();
        assert_eq!(links.len(), 2);
        assert_eq!(
            net.neighbours(ids[1]).unwrap(),
            BTreeSet::from([ids[0], ids[2]])
        );
        assert_eq!(net.component(ids[0]).unwrap().len(), 3);
    }

    #[test]
    fn failed_connect_leaves_network_intact() {
        let (mut net, ids) = chain(2);
        assert!(matches!(
            net.connect(ids[0], 38, ids[1], 39),
            Err(EmuError::AlreadyLinked { .. })
        ));
        assert!(matches!(
            net.connect(ids[0], 6, ids[1], 39),
            Err(EmuError::InvalidPinIndex { index: 6 })
        ));
        assert_eq!(net.len(), 2);
        assert_eq!(net.links().len(), 1);

        let ghost = BoardId::next();
        assert_eq!(
            net.connect(ids[0], 39, ghost, 39),
            Err(EmuError::UnknownBoard { board: ghost })
        );
        assert_eq!(net.len(), 2);
    }

    #[test]
    fn chain_is_numbered_in_order() {
        let (mut net, ids) = chain(4);
        let addresses = net.assign_all().unwrap();
        let raw: Vec<u16> = ids.iter().map(|id| addresses[id].get()).collect();
        assert_eq!(raw, vec![1, 2, 3, 4]);
        // Every board heard about every address.
        for board in net.boards() {
            assert_eq!(board.known_addresses().len(), 4);
        }
    }

    #[test]
    fn star_addresses_are_unique() {
        let mut net = Network::with_protocol(LbtpConfig::all_atd());
        let hub = net.spawn(&small());
        let spokes: Vec<_> = (0..4).map(|_| net.spawn(&small())).collect();
        for (spoke, hub_pin) in spokes.iter().zip([32, 33, 34, 35]) {
            net.connect(hub, hub_pin, *spoke, 36).unwrap();
        }
        // Address a leaf first so the hub is not the root.
        net.assign_address(spokes[2]).unwrap();
        let addresses = net.assign_all().unwrap();
        let unique: BTreeSet<_> = addresses.values().collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn handshake_is_one_shot() {
        let (mut net, ids) = chain(2);
        let first = net.assign_address(ids[0]).unwrap();
        assert_eq!(first, GlobalAddress::FIRST);
        assert_eq!(
            net.assign_address(ids[0]),
            Err(EmuError::AlreadyAddressed {
                board: ids[0],
                address: 1
            })
        );
        assert_eq!(net.board(ids[0]).unwrap().address(), Some(first));
        assert_eq!(net.ping_local_peers(ids[1]).unwrap(), vec![first]);
    }

    #[test]
    fn non_lbtp_wires_are_invisible_to_the_handshake() {
        let mut net = Network::new();
        let a = net.spawn(&small());
        let b = net.spawn(&small());
        net.connect(a, 3, b, 5).unwrap();
        net.assign_address(a).unwrap();
        assert!(net.ping_local_peers(b).unwrap().is_empty());
        assert_eq!(net.neighbours(b).unwrap(), BTreeSet::from([a]));
    }

    #[test]
    fn islands_restart_numbering() {
        let mut net = Network::new();
        let a = net.spawn(&small());
        let b = net.spawn(&small());
        let addresses = net.assign_all().unwrap();
        assert_eq!(addresses[&a], GlobalAddress::FIRST);
        assert_eq!(addresses[&b], GlobalAddress::FIRST);
    }

    #[test]
    fn disconnect_and_remove() {
        let (mut net, ids) = chain(2);
        let peer = net.disconnect(ids[0], 38).unwrap();
        assert_eq!(peer.board, ids[1]);
        assert!(net.links().is_empty());
        let board = net.remove_board(ids[1]).unwrap();
        assert_eq!(board.id(), ids[1]);
        assert!(matches!(net.board(ids[1]), Err(EmuError::UnknownBoard { .. })));
    }
}

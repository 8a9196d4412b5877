//! Network topology and LBTP addressing

use esp_emu::prelude::*;
use std::collections::BTreeSet;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG=esp_emu=debug cargo test` shows the handshake
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn small() -> BoardConfig {
    BoardConfig::default().with_registers(128)
}

#[test]
fn test_ring_gets_distinct_addresses() {
    init_tracing();
    let mut net = Network::new();
    let ids: Vec<BoardId> = (0..6).map(|_| net.spawn(&small())).collect();
    for (i, &id) in ids.iter().enumerate() {
        let next = ids[(i + 1) % ids.len()];
        net.connect(id, 38, next, 37).expect("ring link");
    }
    assert_eq!(net.links().len(), 6);

    let addresses = net.assign_all().expect("assign_all");
    let distinct: BTreeSet<GlobalAddress> = addresses.values().copied().collect();
    assert_eq!(distinct.len(), 6);
    assert_eq!(
        distinct.iter().map(|a| a.get()).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5, 6]
    );
}

#[test]
fn test_late_joiner_avoids_existing_addresses() {
    init_tracing();
    let mut net = Network::new();
    let a = net.spawn(&small());
    let b = net.spawn(&small());
    net.connect(a, 39, b, 39).expect("link");
    net.assign_all().expect("assign_all");

    let c = net.spawn(&small());
    net.connect(b, 37, c, 38).expect("link late joiner");
    let addr = net.assign_address(c).expect("join");
    assert_eq!(addr.get(), 3);
    assert!(net
        .board(a)
        .expect("board a")
        .known_addresses()
        .contains(&addr));
}

#[test]
fn test_relay_joining_numbered_pair_gets_fresh_addresses() {
    init_tracing();
    let mut net = Network::new();
    let a = net.spawn(&small());
    let b = net.spawn(&small());
    net.connect(a, 39, b, 39).expect("link");
    net.assign_all().expect("assign_all");

    // F has the lower id, so assign_all starts from the far end of the relay.
    let f = net.spawn(&small());
    let e = net.spawn(&small());
    net.connect(b, 37, e, 38).expect("link relay");
    net.connect(e, 37, f, 38).expect("link far board");
    for id in [e, f] {
        assert_eq!(
            net.board(id).expect("board").known_addresses().len(),
            2,
            "{id} should know the pair's addresses once wired"
        );
    }

    let addresses = net.assign_all().expect("assign_all");
    assert_eq!(addresses[&f].get(), 3);
    assert_eq!(addresses[&e].get(), 4);
    let distinct: BTreeSet<GlobalAddress> = addresses.values().copied().collect();
    assert_eq!(distinct.len(), 4);
}

#[test]
fn test_boards_wired_before_joining_still_get_fresh_addresses() {
    init_tracing();
    let mut net = Network::new();
    let a = net.spawn(&small());
    let b = net.spawn(&small());
    net.connect(a, 39, b, 39).expect("link");
    net.assign_all().expect("assign_all");

    // Wire the newcomers board to board, bypassing the network.
    let mut pair = net.remove_board(b).expect("board b");
    let mut e = Board::with_config(&small());
    let mut f = Board::with_config(&small());
    e.connect_pin(38, pair.pin_mut(37).expect("pin")).expect("wire e");
    f.connect_pin(38, e.pin_mut(37).expect("pin")).expect("wire f");
    net.add_board(pair);
    let e = net.add_board(e);
    let f = net.add_board(f);

    // F's only neighbour knows nothing yet; the component does.
    assert!(net.ping_local_peers(f).expect("ping").is_empty());
    assert_eq!(net.assign_address(f).expect("join").get(), 3);
    assert_eq!(net.assign_address(e).expect("join").get(), 4);
    assert_eq!(
        net.board(a).expect("board a").known_addresses().len(),
        4
    );
}

#[test]
fn test_messages_cross_the_network() {
    let mut net = Network::new();
    let a = net.spawn(&small());
    let b = net.spawn(&small());
    net.connect(a, 3, b, 5).expect("link");

    net.board(a).expect("a").send_on_pin(3, "ping").expect("send");
    net.board(b).expect("b").send_on_pin(5, "pong").expect("send");

    let at_b = net.board_mut(b).expect("b").receive_on_pin(5).expect("recv");
    let at_a = net.board_mut(a).expect("a").receive_on_pin(3).expect("recv");
    assert_eq!(at_b.as_deref(), Some(&b"ping"[..]));
    assert_eq!(at_a.as_deref(), Some(&b"pong"[..]));
}

#[test]
fn test_loopback_wire_on_one_board() {
    let mut net = Network::new();
    let a = net.spawn(&small());
    net.connect(a, 12, a, 13).expect("loopback");
    assert_eq!(
        net.connect(a, 14, a, 14),
        Err(EmuError::SelfLink {
            pin: format!("{a}:GPIO14")
        })
    );
    assert_eq!(
        net.connect(a, 13, a, 14),
        Err(EmuError::AlreadyLinked {
            pin: format!("{a}:GPIO13")
        })
    );

    net.board(a).expect("a").send_on_pin(12, [1u8, 2, 3]).expect("send");
    let got = net.board_mut(a).expect("a").receive_on_pin(13).expect("recv");
    assert_eq!(got.as_deref(), Some(&[1u8, 2, 3][..]));
    // Self-loops are not neighbours.
    assert!(net.neighbours(a).expect("neighbours").is_empty());
}

#[test]
fn test_custom_protocol_pins() {
    let protocol = LbtpConfig::new([25, 26]).expect("ATD pins");
    let mut net = Network::with_protocol(protocol);
    let a = net.spawn(&small());
    let b = net.spawn(&small());
    let c = net.spawn(&small());
    net.connect(a, 25, b, 26).expect("lbtp link");
    // Default LBTP pins are plain GPIO under this config.
    net.connect(b, 37, c, 37).expect("plain link");

    net.assign_address(a).expect("a joins");
    assert_eq!(net.ping_local_peers(b).expect("ping").len(), 1);
    assert!(net.ping_local_peers(c).expect("ping").is_empty());
}

#[test]
fn test_unknown_board_errors() {
    let mut net = Network::new();
    let stray = Board::new();
    let ghost = stray.id();
    drop(stray);

    assert!(matches!(net.board(ghost), Err(EmuError::UnknownBoard { .. })));
    assert!(matches!(net.assign_address(ghost), Err(EmuError::UnknownBoard { .. })));
    assert!(matches!(net.component(ghost), Err(EmuError::UnknownBoard { .. })));
    assert!(net.is_empty());
}

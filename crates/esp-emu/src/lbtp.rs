//! LBTP (Low Bandwidth Transfer Protocol) handshake skeleton
//!
//! LBTP is meant to be declared by an application the way a Bluetooth serial
//! link is, claiming a few ADC-capable pins and running a join sequence when
//! the board powers up:
//!
//! ```text
//! SET_UP_PINS   which configured LBTP pins have a wire attached?
//! PING_LOCAL    ask each wired neighbour for the addresses it knows
//! ADDRESS       derive an address nobody nearby holds, keep it forever
//! ```
//!
//! Only the primitives live here. [`Network`](crate::Network) strings them
//! together, since asking a neighbour anything needs access to that
//! neighbour's board.
//!
//! ## Address derivation
//!
//! A board takes the smallest address ≥ 1 that is absent from everything its
//! neighbours report. Address 0 is reserved for "unassigned".

use crate::board::Board;
use crate::error::{EmuError, Result};
use esp_chip::gpio::{ATD, LBTP_DEFAULT};
use esp_chip::PinIndex;
use std::collections::BTreeSet;
use std::fmt;

/// 16-bit network-wide board address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalAddress(u16);

impl GlobalAddress {
    /// First address handed out
    pub const FIRST: Self = Self(1);

    /// Wrap a raw address
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw address
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for GlobalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Which pins the protocol runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbtpConfig {
    pins: Vec<PinIndex>,
}

impl Default for LbtpConfig {
    /// GPIO 37, 38, 39
    fn default() -> Self {
        Self {
            pins: LBTP_DEFAULT.iter().filter_map(|&g| PinIndex::new(g)).collect(),
        }
    }
}

impl LbtpConfig {
    /// Claim `pins` for LBTP, in channel order; duplicates are ignored
    ///
    /// # Errors
    ///
    /// `InvalidPinIndex` for any pin that is not ADC-capable.
    pub fn new(pins: impl IntoIterator<Item = u8>) -> Result<Self> {
        let mut claimed = Vec::new();
        for gpio in pins {
            let pin = PinIndex::usable(gpio)
                .filter(|p| p.is_atd())
                .ok_or(EmuError::InvalidPinIndex { index: gpio })?;
            if !claimed.contains(&pin) {
                claimed.push(pin);
            }
        }
        Ok(Self { pins: claimed })
    }

    /// Claim all 18 ADC-capable pins
    pub fn all_atd() -> Self {
        Self {
            pins: ATD.iter().filter_map(|&g| PinIndex::new(g)).collect(),
        }
    }

    /// Claimed pins, in channel order
    pub fn pins(&self) -> &[PinIndex] {
        &self.pins
    }

    /// Whether `pin` carries LBTP
    pub fn claims(&self, pin: PinIndex) -> bool {
        self.pins.contains(&pin)
    }

    /// SET_UP_PINS: claimed pins that currently have a wire attached
    pub fn set_up_pins(&self, board: &Board) -> Vec<PinIndex> {
        let linked = board.linked_pins();
        self.pins
            .iter()
            .copied()
            .filter(|p| linked.contains(p))
            .collect()
    }
}

/// Smallest address ≥ 1 that is not in `known`
///
/// # Errors
///
/// `AddressesExhausted` if every address from 1 to 65535 is taken.
pub fn derive_global_address(known: &BTreeSet<GlobalAddress>) -> Result<GlobalAddress> {
    let mut candidate = u32::from(GlobalAddress::FIRST.0);
    for address in known {
        let raw = u32::from(address.0);
        if raw < candidate {
            continue;
        }
        if raw > candidate {
            break;
        }
        candidate += 1;
    }
    u16::try_from(candidate)
        .map(GlobalAddress)
        .map_err(|_| EmuError::AddressesExhausted)
}

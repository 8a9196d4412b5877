//! GPIO table for the ESP32 (WROOM-32 module pinout).
//!
//! The chip numbers its pads GPIO 0–39, but not every number is a pin you
//! can wire to another board:
//!
//! ```text
//! GPIO  0– 5   general purpose (1/3 double as UART0 TX/RX)
//! GPIO  6–11   internal SPI flash, not usable
//! GPIO 12–19   general purpose
//! GPIO 20      not bonded
//! GPIO 21–23   general purpose
//! GPIO 24      not bonded
//! GPIO 25–27   general purpose
//! GPIO 28–31   not bonded
//! GPIO 32–33   general purpose
//! GPIO 34–39   input only
//! ```
//!
//! Eighteen of the usable pins are ADC-capable ("ATD"). LBTP only runs on
//! those, three at a time, GPIO 37/38/39 by default.

use std::fmt;

/// Number of GPIO numbers on the chip (0..=39).
pub const PIN_COUNT: usize = 40;

/// Pins that can be wired to a peer, in ascending order.
pub const USABLE: &[u8] = &[
    0, 1, 2, 3, 4, 5, 12, 13, 14, 15, 16, 17, 18, 19, 21, 22, 23, 25, 26, 27, 32, 33, 34, 35, 36,
    37, 38, 39,
];

/// ADC-capable pins, in LBTP channel order (channel 1 is GPIO 36).
pub const ATD: [u8; 18] = [36, 37, 38, 39, 32, 33, 34, 35, 4, 0, 2, 15, 13, 12, 14, 27, 25, 26];

/// Pins LBTP claims when none are configured.
pub const LBTP_DEFAULT: [u8; 3] = [37, 38, 39];

/// What a GPIO number is wired to on the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinFunction {
    /// Bidirectional general purpose pin.
    Gpio,
    /// Input-only pad (GPIO 34–39).
    InputOnly,
    /// Reserved for the on-module SPI flash (GPIO 6–11).
    Flash,
    /// No pad exists for this number.
    Unbonded,
}

impl PinFunction {
    /// Classify a GPIO number. Numbers past 39 are unbonded.
    #[must_use]
    pub const fn of(gpio: u8) -> Self {
        match gpio {
            6..=11 => Self::Flash,
            20 | 24 | 28..=31 => Self::Unbonded,
            34..=39 => Self::InputOnly,
            0..=39 => Self::Gpio,
            _ => Self::Unbonded,
        }
    }

    /// Whether a wire can be attached to a pad with this function.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::Gpio | Self::InputOnly)
    }
}

/// A physical GPIO number, 0..=39.
///
/// Holding a `PinIndex` only proves the number exists on the chip; use
/// [`PinIndex::is_usable`] or [`PinIndex::usable`] before wiring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PinIndex(u8);

impl PinIndex {
    /// Any GPIO number on the chip.
    #[must_use]
    pub const fn new(gpio: u8) -> Option<Self> {
        if (gpio as usize) < PIN_COUNT {
            Some(Self(gpio))
        } else {
            None
        }
    }

    /// A GPIO number that can be wired to a peer.
    #[must_use]
    pub const fn usable(gpio: u8) -> Option<Self> {
        match Self::new(gpio) {
            Some(pin) if pin.is_usable() => Some(pin),
            _ => None,
        }
    }

    /// GPIO number.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// What the pad is wired to.
    #[must_use]
    pub const fn function(self) -> PinFunction {
        PinFunction::of(self.0)
    }

    /// Whether the pin is in the documented usable set.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        self.function().is_usable()
    }

    /// Whether the pin is ADC-capable and may carry LBTP.
    #[must_use]
    pub fn is_atd(self) -> bool {
        ATD.contains(&self.0)
    }

    /// LBTP channel number (1-based) for ATD pins.
    #[must_use]
    pub fn lbtp_channel(self) -> Option<usize> {
        ATD.iter().position(|&g| g == self.0).map(|i| i + 1)
    }

    /// Every pin in the usable set.
    pub fn all_usable() -> impl Iterator<Item = Self> {
        USABLE.iter().map(|&g| Self(g))
    }
}

impl fmt::Display for PinIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

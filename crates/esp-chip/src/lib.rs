//! Silicon model for ESP32-class boards.
//!
//! This crate has **no dependencies** and **no simulation state**. It is a
//! pure model of the parts of the ESP32 the emulator cares about: the 40-pin
//! GPIO table, which of those pins can be wired up, which are ADC-capable
//! (and therefore eligible for LBTP), and the DRAM geometry.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`gpio`] | Pin numbering, usable set, ATD set, LBTP default pins |
//! | [`dram`] | Register width, register count, derived byte sizes |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dram;
pub mod gpio;

pub use gpio::{PinFunction, PinIndex};

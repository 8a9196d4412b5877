//! DRAM geometry.
//!
//! The ESP32 has 320 KB of data RAM on a 32-bit bus, so the emulator models
//! it as 80 000 registers of 32 bits each.
//!
//! ```text
//! 80 000 registers × 4 bytes = 320 000 bytes
//! ```

/// Bits per register.
pub const REGISTER_BITS: u32 = 32;

/// Bytes per register.
pub const REGISTER_BYTES: usize = (REGISTER_BITS / 8) as usize;

/// Registers on a default board.
pub const REGISTER_COUNT: usize = 80_000;

/// Registers needed to hold `bytes` bytes, rounding up.
#[must_use]
pub const fn registers_for(bytes: usize) -> usize {
    bytes.div_ceil(REGISTER_BYTES)
}

//! Simulated DRAM
//!
//! An [`AddressSpace`] is a flat run of 32-bit registers plus the
//! allocator that decides who owns them. There is no raw indexed access:
//! every read and write goes through a [`Handle`], and is checked against the
//! handle's length and liveness, so one process cannot touch memory it was not
//! granted.
//!
//! ```text
//!   allocate(n) ──► Handle { space, serial, start, len }
//!                      │
//!   read/write(handle, offset) ──► registers[start + offset]
//! ```

use crate::allocator::{Allocator, Handle};
use crate::error::{EmuError, Result};
use esp_chip::dram::{REGISTER_BITS, REGISTER_COUNT};
use std::fmt;
use std::ops::{Bound, Range, RangeBounds};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

static NEXT_SPACE_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique address space identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceId(u32);

impl SpaceId {
    /// Mint a fresh id
    pub(crate) fn next() -> Self {
        Self(NEXT_SPACE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Flat register memory of one board
///
/// Not `Clone`: a copy would honour the original's handles.
pub struct AddressSpace {
    id: SpaceId,
    registers: Vec<u32>,
    allocator: Allocator,
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new(REGISTER_COUNT)
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("occupied", &self.occupied())
            .field("live", &self.allocator.live_count())
            .finish_non_exhaustive()
    }
}

impl AddressSpace {
    /// Zeroed space of `capacity` registers, nothing allocated
    pub fn new(capacity: usize) -> Self {
        let id = SpaceId::next();
        debug!("space {id}: {capacity} x {REGISTER_BITS}-bit registers");
        Self {
            id,
            registers: vec![0; capacity],
            allocator: Allocator::new(id, capacity),
        }
    }

    /// Identity checked against every handle
    pub const fn id(&self) -> SpaceId {
        self.id
    }

    /// Register count
    pub fn capacity(&self) -> usize {
        self.registers.len()
    }

    /// Register width in bits (always 32)
    pub const fn register_bits(&self) -> u32 {
        REGISTER_BITS
    }

    /// Registers currently allocated
    pub fn occupied(&self) -> usize {
        self.allocator.occupied()
    }

    /// Registers currently free
    pub fn available(&self) -> usize {
        self.allocator.available()
    }

    /// Longest contiguous free run
    pub fn largest_free_run(&self) -> usize {
        self.allocator.largest_free_run()
    }

    /// Live regions in address order, as register ranges
    ///
    /// Diagnostic only: a range grants no access, only a [`Handle`] does.
    pub fn live_regions(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.allocator.live_regions()
    }

    /// Whether `handle` still owns its region here
    pub fn is_live(&self, handle: &Handle) -> bool {
        self.allocator.is_live(handle)
    }

    /// Reserve `len` registers, first fit
    ///
    /// # Errors
    ///
    /// `ZeroSizedAllocation` if `len` is 0, `OutOfMemory` if no free run of
    /// `len` registers exists.
    pub fn allocate(&mut self, len: usize) -> Result<Handle> {
        self.allocator.allocate(len)
    }

    /// Release the region behind `handle` and scrub it to zero
    ///
    /// # Errors
    ///
    /// `InvalidHandle` if the handle came from another space, `DoubleFree`
    /// if it was already released.
    pub fn free(&mut self, handle: &Handle) -> Result<()> {
        self.allocator.free(handle)?;
        self.registers[handle.start()..handle.start() + handle.len()].fill(0);
        Ok(())
    }

    /// Read one register of the region
    ///
    /// # Errors
    ///
    /// - `InvalidHandle` if the handle came from another space
    /// - `OutOfRange` if `offset >= handle.len()` or the handle was freed
    pub fn read(&self, handle: &Handle, offset: usize) -> Result<u32> {
        let index = self.resolve(handle, offset, 1)?;
        Ok(self.registers[index])
    }

    /// Write one register of the region
    ///
    /// # Errors
    ///
    /// - `InvalidHandle` if the handle came from another space
    /// - `OutOfRange` if `offset >= handle.len()` or the handle was freed
    /// - `ValueTooWide` if `value` does not fit in 32 bits
    pub fn write(&mut self, handle: &Handle, offset: usize, value: u64) -> Result<()> {
        let index = self.resolve(handle, offset, 1)?;
        let value = u32::try_from(value).map_err(|_| EmuError::ValueTooWide {
            value,
            bits: REGISTER_BITS,
        })?;
        self.registers[index] = value;
        Ok(())
    }

    /// Read `count` registers starting at `offset`
    ///
    /// # Errors
    ///
    /// As [`read`](Self::read), checked for the whole range up front.
    pub fn read_slice(&self, handle: &Handle, offset: usize, count: usize) -> Result<Vec<u32>> {
        let index = self.resolve(handle, offset, count)?;
        Ok(self.registers[index..index + count].to_vec())
    }

    /// Write `values` starting at `offset`
    ///
    /// Nothing is written unless the whole range fits in the handle.
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write), checked for the whole range up front.
    pub fn write_slice(&mut self, handle: &Handle, offset: usize, values: &[u32]) -> Result<()> {
        let index = self.resolve(handle, offset, values.len())?;
        self.registers[index..index + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Render occupancy and register values for `range`
    pub fn dump(&self, range: impl RangeBounds<usize>) -> MemoryDump<'_> {
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => e.saturating_add(1),
            Bound::Excluded(&e) => e,
            Bound::Unbounded => self.capacity(),
        };
        let end = end.min(self.capacity());
        MemoryDump {
            space: self,
            range: start.min(end)..end,
            columns: 8,
        }
    }

    /// Global register index for `offset..offset + count` inside `handle`
    fn resolve(&self, handle: &Handle, offset: usize, count: usize) -> Result<usize> {
        self.allocator.check_owner(handle)?;
        if !self.allocator.is_live(handle) {
            return Err(EmuError::OutOfRange { offset, len: 0 });
        }
        let len = handle.len();
        if offset > len || count > len - offset {
            return Err(EmuError::OutOfRange {
                offset: offset.max(len),
                len,
            });
        }
        Ok(handle.start() + offset)
    }
}

/// Human-readable view of part of an address space
///
/// Each row shows the row's first address, an occupancy strip (`#` owned,
/// `.` free) and the raw register values in hex.
#[derive(Debug, Clone)]
pub struct MemoryDump<'a> {
    space: &'a AddressSpace,
    range: Range<usize>,
    columns: usize,
}

impl MemoryDump<'_> {
    /// Registers per row (default 8)
    #[must_use]
    pub fn with_columns(mut self, columns: usize) -> Self {
        self.columns = columns.max(1);
        self
    }
}

impl fmt::Display for MemoryDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let space = self.space;
        let occupancy = space.allocator.occupancy();
        writeln!(
            f,
            "Memory state: space {}, registers {}..{} ({} / {} occupied in {} runs, {} live regions)",
            space.id,
            self.range.start,
            self.range.end,
            space.occupied(),
            space.capacity(),
            occupancy.set_runs().count(),
            space.allocator.live_count()
        )?;
        writeln!(f, "{}", "-".repeat(20 + self.columns * 10))?;

        let mut row = self.range.start;
        while row < self.range.end {
            let end = (row + self.columns).min(self.range.end);
            write!(f, "{row:#08x}  ")?;
            for i in row..row + self.columns {
                let mark = match i {
                    i if i >= end => ' ',
                    i if occupancy.get(i) => '#',
                    _ => '.',
                };
                write!(f, "{mark}")?;
            }
            write!(f, " ")?;
            for value in &space.registers[row..end] {
                write!(f, " {value:08x}")?;
            }
            writeln!(f)?;
            row = end;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let mut mem = AddressSpace::new(32);
        let h = mem.allocate(10).unwrap();
        mem.write(&h, 0, 42).unwrap();
        mem.write(&h, 9, u64::from(u32::MAX)).unwrap();
        assert_eq!(mem.read(&h, 0).unwrap(), 42);
        assert_eq!(mem.read(&h, 9).unwrap(), u32::MAX);
    }

    #[test]
    fn value_wider_than_register_rejected() {
        let mut mem = AddressSpace::new(4);
        let h = mem.allocate(1).unwrap();
        assert_eq!(
            mem.write(&h, 0, 1 << 32),
            Err(EmuError::ValueTooWide {
                value: 1 << 32,
                bits: 32
            })
        );
        assert_eq!(mem.read(&h, 0).unwrap(), 0);
    }

    #[test]
    fn offset_past_handle_rejected() {
        let mut mem = AddressSpace::new(16);
        let a = mem.allocate(4).unwrap();
        let b = mem.allocate(4).unwrap();
        mem.write(&b, 0, 7).unwrap();
        // Offset 4 of `a` is register 0 of `b`; it must not be reachable.
        assert_eq!(
            mem.write(&a, 4, 1),
            Err(EmuError::OutOfRange { offset: 4, len: 4 })
        );
        assert!(mem.read(&a, 4).is_err());
        assert_eq!(mem.read(&b, 0).unwrap(), 7);
    }

    #[test]
    fn freed_handle_is_dead() {
        let mut mem = AddressSpace::new(8);
        let h = mem.allocate(2).unwrap();
        mem.write(&h, 1, 5).unwrap();
        mem.free(&h).unwrap();
        assert_eq!(mem.read(&h, 0), Err(EmuError::OutOfRange { offset: 0, len: 0 }));
        assert!(mem.write(&h, 0, 1).is_err());

        // Scrubbed before reuse.
        let fresh = mem.allocate(2).unwrap();
        assert_eq!(mem.read(&fresh, 1).unwrap(), 0);
        assert!(mem.read(&h, 1).is_err());
    }

    #[test]
    fn foreign_handle_rejected_on_access() {
        let mut a = AddressSpace::new(8);
        let mut b = AddressSpace::new(8);
        let _ = a.allocate(1).unwrap();
        let hb = b.allocate(1).unwrap();
        assert!(matches!(a.read(&hb, 0), Err(EmuError::InvalidHandle { .. })));
        assert!(matches!(a.write(&hb, 0, 1), Err(EmuError::InvalidHandle { .. })));
    }

    #[test]
    fn handle_minted_outside_the_space_grants_nothing() {
        let mut mem = AddressSpace::new(8);
        let owned = mem.allocate(4).unwrap();
        mem.write(&owned, 0, 0xbeef).unwrap();

        // Same space id, same region, but not issued by `mem`.
        let forged = Allocator::new(mem.id(), 8).allocate(4).unwrap();
        assert_eq!((forged.start(), forged.len()), (owned.start(), owned.len()));
        assert!(!mem.is_live(&forged));
        assert_eq!(mem.read(&forged, 0), Err(EmuError::OutOfRange { offset: 0, len: 0 }));
        assert!(mem.write(&forged, 0, 1).is_err());
        assert_eq!(mem.free(&forged), Err(EmuError::DoubleFree { start: 0, len: 4 }));

        assert!(mem.is_live(&owned));
        assert_eq!(mem.read(&owned, 0).unwrap(), 0xbeef);
        assert_eq!(mem.live_regions().collect::<Vec<_>>(), vec![0..4]);
    }

    #[test]
    fn slices_are_all_or_nothing() {
        let mut mem = AddressSpace::new(16);
        let h = mem.allocate(4).unwrap();
        mem.write_slice(&h, 1, &[1, 2, 3]).unwrap();
        assert_eq!(mem.read_slice(&h, 0, 4).unwrap(), vec![0, 1, 2, 3]);

        assert!(mem.write_slice(&h, 2, &[9, 9, 9]).is_err());
        assert_eq!(mem.read_slice(&h, 0, 4).unwrap(), vec![0, 1, 2, 3]);
        assert!(mem.read_slice(&h, 3, 2).is_err());
        assert_eq!(mem.read_slice(&h, 4, 0).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn default_space_is_esp32_dram() {
        let mem = AddressSpace::default();
        assert_eq!(mem.capacity(), 80_000);
        assert_eq!(mem.register_bits(), 32);
        assert_eq!(mem.available(), 80_000);
    }

    #[test]
    fn dump_shows_occupancy_and_values() {
        let mut mem = AddressSpace::new(16);
        let h = mem.allocate(3).unwrap();
        mem.write(&h, 0, 0x2a).unwrap();
        let text = mem.dump(0..16).to_string();
        assert!(text.contains("3 / 16 occupied"));
        assert!(text.contains("###....."));
        assert!(text.contains("0000002a"));
        assert_eq!(text.lines().count(), 4);

        let clipped = mem.dump(10..).with_columns(4).to_string();
        assert!(clipped.contains("registers 10..16"));
    }

    #[test]
    fn dump_header_counts_runs_and_regions_apart() {
        let mut mem = AddressSpace::new(16);
        let a = mem.allocate(3).unwrap();
        let b = mem.allocate(2).unwrap();
        let _c = mem.allocate(1).unwrap();
        // Adjacent regions merge into one occupied run.
        assert!(mem.dump(..).to_string().contains("6 / 16 occupied in 1 runs, 3 live regions"));

        mem.free(&b).unwrap();
        assert!(mem.dump(..).to_string().contains("4 / 16 occupied in 2 runs, 2 live regions"));
        mem.free(&a).unwrap();
        assert_eq!(mem.live_regions().collect::<Vec<_>>(), vec![5..6]);
    }
}

//! First-fit region allocator
//!
//! The allocator owns the occupancy bitmap of one address space and the table
//! of live regions. It never touches register contents; it only decides who
//! owns which registers and hands that decision out as a [`Handle`].

use crate::bitmap::Bitmap;
use crate::error::{EmuError, Result};
use crate::memory::SpaceId;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Allocation serials are unique across every address space in the process.
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Capability for one allocated region of an address space
///
/// Handles can only be minted by [`AddressSpace::allocate`](crate::AddressSpace::allocate).
/// Each carries the serial of the allocation that created it, so a handle
/// kept after `free` stays dead even once the same registers are handed out
/// again, and no two spaces ever issue the same serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    space: SpaceId,
    serial: u64,
    start: usize,
    len: usize,
}

impl Handle {
    /// Length of the region in registers
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always false: zero-length regions are never allocated
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address space that issued this handle
    pub const fn space(&self) -> SpaceId {
        self.space
    }

    /// First register of the region, for diagnostics only
    pub const fn start(&self) -> usize {
        self.start
    }

    /// Allocation serial
    pub const fn serial(&self) -> u64 {
        self.serial
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    len: usize,
    serial: u64,
}

/// Bitmap-backed first-fit allocator
///
/// Only an [`AddressSpace`](crate::AddressSpace) builds one, so handles
/// cannot be minted for a space from outside it.
#[derive(Debug)]
pub(crate) struct Allocator {
    space: SpaceId,
    occupancy: Bitmap,
    live: BTreeMap<usize, Region>,
}

impl Allocator {
    /// Allocator over `capacity` registers of address space `space`
    pub(crate) fn new(space: SpaceId, capacity: usize) -> Self {
        Self {
            space,
            occupancy: Bitmap::new(capacity),
            live: BTreeMap::new(),
        }
    }

    /// Reserve the lowest run of `len` free registers
    ///
    /// # Errors
    ///
    /// - `ZeroSizedAllocation` if `len` is 0
    /// - `OutOfMemory` if no free run of `len` registers exists
    pub fn allocate(&mut self, len: usize) -> Result<Handle> {
        if len == 0 {
            return Err(EmuError::ZeroSizedAllocation);
        }
        let Some(start) = self.occupancy.first_fit(len) else {
            debug!(
                "space {}: no run of {len} registers ({} free)",
                self.space,
                self.available()
            );
            return Err(EmuError::OutOfMemory {
                requested: len,
                available: self.available(),
                largest_run: self.largest_free_run(),
            });
        };

        self.occupancy.set_range(start, len);
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        self.live.insert(start, Region { len, serial });
        trace!("space {}: allocated {start}..{} (serial {serial})", self.space, start + len);

        Ok(Handle {
            space: self.space,
            serial,
            start,
            len,
        })
    }

    /// Release the region behind `handle`
    ///
    /// # Errors
    ///
    /// - `InvalidHandle` if the handle came from another address space
    /// - `DoubleFree` if the region was already released
    pub fn free(&mut self, handle: &Handle) -> Result<()> {
        self.check_owner(handle)?;
        if !self.is_live(handle) {
            return Err(EmuError::DoubleFree {
                start: handle.start,
                len: handle.len,
            });
        }
        debug_assert!(self.occupancy.all_set(handle.start, handle.len));
        self.live.remove(&handle.start);
        self.occupancy.clear_range(handle.start, handle.len);
        trace!(
            "space {}: freed {}..{} (serial {})",
            self.space,
            handle.start,
            handle.start + handle.len,
            handle.serial
        );
        Ok(())
    }

    /// Fail with `InvalidHandle` unless this allocator issued `handle`
    pub(crate) fn check_owner(&self, handle: &Handle) -> Result<()> {
        if handle.space == self.space {
            Ok(())
        } else {
            Err(EmuError::InvalidHandle {
                handle_space: handle.space,
                space: self.space,
            })
        }
    }

    /// Whether `handle` still owns its region
    pub fn is_live(&self, handle: &Handle) -> bool {
        handle.space == self.space
            && self
                .live
                .get(&handle.start)
                .is_some_and(|r| r.serial == handle.serial && r.len == handle.len)
    }

    /// Registers tracked
    pub fn capacity(&self) -> usize {
        self.occupancy.len()
    }

    /// Registers currently allocated
    pub fn occupied(&self) -> usize {
        self.occupancy.count_ones()
    }

    /// Registers currently free
    pub fn available(&self) -> usize {
        self.capacity() - self.occupied()
    }

    /// Longest contiguous free run
    pub fn largest_free_run(&self) -> usize {
        self.occupancy.largest_clear_run()
    }

    /// Live regions in address order, as register ranges
    pub fn live_regions(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.live.iter().map(|(&start, r)| start..start + r.len)
    }

    /// Number of live regions
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Occupancy bitmap, for dumps
    pub(crate) const fn occupancy(&self) -> &Bitmap {
        &self.occupancy
    }
}

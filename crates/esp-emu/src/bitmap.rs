//! Occupancy bitmap
//!
//! One bit per register, packed into 64-bit words. Bit `i` lives in word
//! `i / 64` at position `i % 64`. Bits past `len` in the last word are kept
//! clear.

const WORD_BITS: usize = u64::BITS as usize;

/// Packed occupancy bitmap
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    /// Bitmap of `len` clear bits
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    /// Number of bits tracked
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether bit `i` is set. Out-of-range bits read as clear.
    pub fn get(&self, i: usize) -> bool {
        i < self.len && self.words[i / WORD_BITS] & (1 << (i % WORD_BITS)) != 0
    }

    /// Number of set bits
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Set every bit in `start..start + len`
    ///
    /// # Panics
    ///
    /// Panics if the range runs past the end of the bitmap.
    pub fn set_range(&mut self, start: usize, len: usize) {
        self.apply(start, len, |word, mask| *word |= mask);
    }

    /// Clear every bit in `start..start + len`
    ///
    /// # Panics
    ///
    /// Panics if the range runs past the end of the bitmap.
    pub fn clear_range(&mut self, start: usize, len: usize) {
        self.apply(start, len, |word, mask| *word &= !mask);
    }

    /// Whether every bit in `start..start + len` is set
    pub fn all_set(&self, start: usize, len: usize) -> bool {
        start + len <= self.len && self.next_clear(start).map_or(true, |i| i >= start + len)
    }

    /// Lowest start of a run of `len` clear bits (first fit)
    ///
    /// Walks the bitmap once, left to right. Each step either succeeds or
    /// moves `start` strictly past an occupied bit, so the scan ends after at
    /// most `self.len` steps.
    pub fn first_fit(&self, len: usize) -> Option<usize> {
        if len == 0 || len > self.len {
            return None;
        }
        let mut start = self.next_clear(0)?;
        while start + len <= self.len {
            match self.next_set_before(start, start + len) {
                None => return Some(start),
                Some(busy) => start = self.next_clear(busy + 1)?,
            }
        }
        None
    }

    /// Length of the longest run of clear bits
    pub fn largest_clear_run(&self) -> usize {
        let mut best = 0;
        let mut cursor = 0;
        while let Some(start) = self.next_clear(cursor) {
            let end = self.next_set_before(start, self.len).unwrap_or(self.len);
            best = best.max(end - start);
            cursor = end;
        }
        best
    }

    /// Iterate over maximal runs of set bits as `(start, len)`
    pub fn set_runs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let mut cursor = 0;
        std::iter::from_fn(move || {
            let start = self.next_set_before(cursor, self.len)?;
            let end = self.next_clear(start).unwrap_or(self.len);
            cursor = end;
            Some((start, end - start))
        })
    }

    /// First clear bit at or after `from`
    fn next_clear(&self, from: usize) -> Option<usize> {
        let mut w = from / WORD_BITS;
        if w >= self.words.len() {
            return None;
        }
        // Treat bits below `from` as set so they are skipped.
        let mut word = self.words[w] | low_mask(from % WORD_BITS);
        loop {
            if word != u64::MAX {
                let i = w * WORD_BITS + word.trailing_ones() as usize;
                return (i < self.len).then_some(i);
            }
            w += 1;
            word = *self.words.get(w)?;
        }
    }

    /// First set bit in `from..to`
    fn next_set_before(&self, from: usize, to: usize) -> Option<usize> {
        if from >= to {
            return None;
        }
        let mut w = from / WORD_BITS;
        let mut word = self.words.get(w)? & !low_mask(from % WORD_BITS);
        loop {
            if word != 0 {
                let i = w * WORD_BITS + word.trailing_zeros() as usize;
                return (i < to).then_some(i);
            }
            w += 1;
            if w * WORD_BITS >= to {
                return None;
            }
            word = *self.words.get(w)?;
        }
    }

    fn apply(&mut self, start: usize, len: usize, op: impl Fn(&mut u64, u64)) {
        assert!(
            start + len <= self.len,
            "bit range {start}+{len} exceeds bitmap of {}",
            self.len
        );
        let mut i = start;
        let end = start + len;
        while i < end {
            let bit = i % WORD_BITS;
            let take = (WORD_BITS - bit).min(end - i);
            let mask = if take == WORD_BITS {
                u64::MAX
            } else {
                ((1u64 << take) - 1) << bit
            };
            op(&mut self.words[i / WORD_BITS], mask);
            i += take;
        }
    }
}

/// Mask with the lowest `bits` bits set
const fn low_mask(bits: usize) -> u64 {
    if bits == 0 {
        0
    } else {
        u64::MAX >> (WORD_BITS - bits)
    }
}

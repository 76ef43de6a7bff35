//! Stack slot bitmap
//!
//! One bit per arena slot, set while a stack lives in the slot. Allocation
//! scans for the lowest clear bit at or after `next_free_hint` and wraps
//! around to the start of the map. Releasing a slot below the hint moves the
//! hint down to it, so freed low slots are reused first.

use alloc::boxed::Box;
use alloc::vec;
use bit_field::BitField;
use spin::Mutex;

use crate::types::SlotIndex;

const WORD_BITS: usize = u64::BIT_LENGTH;

// ============================================================================
// Bitset
// ============================================================================

/// Fixed-size bitset over `u64` words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitset {
    words: Box<[u64]>,
    len: usize,
}

impl Bitset {
    /// All-clear set of `len` bits
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(WORD_BITS)].into_boxed_slice(),
            len,
        }
    }

    /// Number of bits
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, bit: usize) -> bool {
        bit < self.len && self.words[bit / WORD_BITS].get_bit(bit % WORD_BITS)
    }

    pub fn set(&mut self, bit: usize) {
        assert!(bit < self.len, "bit {} out of range", bit);
        self.words[bit / WORD_BITS].set_bit(bit % WORD_BITS, true);
    }

    pub fn clear(&mut self, bit: usize) {
        assert!(bit < self.len, "bit {} out of range", bit);
        self.words[bit / WORD_BITS].set_bit(bit % WORD_BITS, false);
    }

    /// Number of set bits
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Lowest clear bit in `[from, len)`
    pub fn find_first_unset_from(&self, from: usize) -> Option<usize> {
        if from >= self.len {
            return None;
        }

        let first = from / WORD_BITS;
        let skip = from % WORD_BITS;
        for (i, &word) in self.words.iter().enumerate().skip(first) {
            // Bits below `from` in the first word count as taken
            let word = if i == first && skip != 0 {
                word | ((1u64 << skip) - 1)
            } else {
                word
            };
            if word != u64::MAX {
                let bit = i * WORD_BITS + (!word).trailing_zeros() as usize;
                // Tail bits past `len` are never valid
                return (bit < self.len).then_some(bit);
            }
        }
        None
    }
}

// ============================================================================
// Slot Allocator
// ============================================================================

#[derive(Debug)]
struct SlotState {
    bits: Bitset,
    next_free_hint: usize,
    in_use: usize,
}

/// Bitmap allocator over the arena's slots
#[derive(Debug)]
pub struct SlotAllocator {
    state: Mutex<SlotState>,
}

impl SlotAllocator {
    pub fn new(slots: usize) -> Self {
        Self {
            state: Mutex::new(SlotState {
                bits: Bitset::new(slots),
                next_free_hint: 0,
                in_use: 0,
            }),
        }
    }

    /// Reserve the lowest free slot at or after the hint, wrapping once
    pub fn reserve(&self) -> Option<SlotIndex> {
        let mut state = self.state.lock();
        let hint = state.next_free_hint;
        let bit = state.bits.find_first_unset_from(hint).or_else(|| {
            state
                .bits
                .find_first_unset_from(0)
                .filter(|&bit| bit < hint)
        })?;

        state.bits.set(bit);
        state.next_free_hint = bit + 1;
        state.in_use += 1;
        Some(SlotIndex(bit))
    }

    /// Release a reserved slot
    pub fn release(&self, slot: SlotIndex) {
        let mut state = self.state.lock();
        let bit = slot.index();
        debug_assert!(state.bits.get(bit), "slot {} released twice", bit);
        if !state.bits.get(bit) {
            return;
        }

        state.bits.clear(bit);
        state.in_use -= 1;
        if bit < state.next_free_hint {
            state.next_free_hint = bit;
        }
    }

    /// Check if a slot is reserved
    pub fn is_reserved(&self, slot: SlotIndex) -> bool {
        self.state.lock().bits.get(slot.index())
    }

    /// Number of reserved slots
    pub fn in_use(&self) -> usize {
        self.state.lock().in_use
    }

    /// Current scan hint
    pub fn next_free_hint(&self) -> usize {
        self.state.lock().next_free_hint
    }

    /// Total slots
    pub fn capacity(&self) -> usize {
        self.state.lock().bits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_bitset_basic() {
        let mut bits = Bitset::new(130);
        assert_eq!(bits.len(), 130);
        assert_eq!(bits.find_first_unset_from(0), Some(0));

        bits.set(0);
        bits.set(1);
        bits.set(64);
        assert!(bits.get(64));
        assert!(!bits.get(200));
        assert_eq!(bits.count_ones(), 3);
        assert_eq!(bits.find_first_unset_from(0), Some(2));
        assert_eq!(bits.find_first_unset_from(64), Some(65));
        assert_eq!(bits.find_first_unset_from(130), None);

        bits.clear(1);
        assert_eq!(bits.find_first_unset_from(0), Some(1));
    }

    #[test]
    fn test_bitset_tail_word() {
        let mut bits = Bitset::new(66);
        for i in 0..66 {
            bits.set(i);
        }
        assert_eq!(bits.find_first_unset_from(0), None);
        assert_eq!(bits.find_first_unset_from(65), None);
    }

    #[test]
    fn test_reserve_in_order_then_full() {
        let slots = SlotAllocator::new(4);
        let got: Vec<_> = (0..4).filter_map(|_| slots.reserve()).collect();
        assert_eq!(got, [SlotIndex(0), SlotIndex(1), SlotIndex(2), SlotIndex(3)]);
        assert_eq!(slots.reserve(), None);
        assert_eq!(slots.in_use(), 4);
    }

    #[test]
    fn test_release_moves_hint_down() {
        let slots = SlotAllocator::new(4);
        for _ in 0..4 {
            slots.reserve();
        }
        slots.release(SlotIndex(1));
        assert_eq!(slots.next_free_hint(), 1);
        assert!(!slots.is_reserved(SlotIndex(1)));
        assert_eq!(slots.reserve(), Some(SlotIndex(1)));
    }

    #[test]
    fn test_hint_tracks_lowest_free() {
        let slots = SlotAllocator::new(4);
        for _ in 0..3 {
            slots.reserve();
        }
        slots.release(SlotIndex(0));
        assert_eq!(slots.reserve(), Some(SlotIndex(0)));
        assert_eq!(slots.next_free_hint(), 1);

        // Skips the live slots between the hint and the next free one
        slots.release(SlotIndex(2));
        assert_eq!(slots.next_free_hint(), 1);
        assert_eq!(slots.reserve(), Some(SlotIndex(2)));
        assert_eq!(slots.reserve(), Some(SlotIndex(3)));
        assert_eq!(slots.next_free_hint(), 4);

        // Hint at the end; a release brings it back
        assert_eq!(slots.reserve(), None);
        slots.release(SlotIndex(3));
        assert_eq!(slots.reserve(), Some(SlotIndex(3)));
    }
}
